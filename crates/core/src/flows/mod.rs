pub mod engine;
pub mod states;
pub mod vehicle_loop;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, IntakeFlow};
pub use states::{FlowAction, FlowContext, FlowEvent, Phase, TransitionOutcome};
pub use vehicle_loop::VehicleIdentity;
