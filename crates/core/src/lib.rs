pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod interpret;

pub use domain::message::{Message, MessageId, Sender};
pub use domain::session::{
    ChatStep, LicenseStatus, LicenseType, Session, SessionField, SessionId, VehicleStep,
};
pub use domain::vehicle::{Vehicle, VehicleField, VehicleId, VehicleUse};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{
    FlowAction, FlowContext, FlowEngine, FlowEvent, FlowTransitionError, IntakeFlow, Phase,
    TransitionOutcome, VehicleIdentity,
};
pub use interpret::{Authority, Interpretation, OracleVerdict, Resolution, ResponseInterpreter};
