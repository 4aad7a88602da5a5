use serde::{Deserialize, Serialize};

use crate::domain::session::{ChatStep, Session, SessionField, VehicleStep};
use crate::domain::vehicle::{VehicleField, VehicleId};
use crate::flows::vehicle_loop::VehicleIdentity;

/// Conversation position derived from `(current_step, vehicle_step)` plus
/// completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    ZipCode,
    FullName,
    Email,
    /// `vehicles` with no active sub-step: the "add a vehicle?" question.
    VehicleGate,
    Vehicle(VehicleStep),
    LicenseType,
    LicenseStatus,
    Complete,
}

impl Phase {
    pub fn of(session: &Session) -> Self {
        if session.is_complete() {
            return Self::Complete;
        }
        match (session.current_step, session.vehicle_step) {
            (ChatStep::ZipCode, _) => Self::ZipCode,
            (ChatStep::FullName, _) => Self::FullName,
            (ChatStep::Email, _) => Self::Email,
            (ChatStep::Vehicles, None) => Self::VehicleGate,
            (ChatStep::Vehicles, Some(step)) => Self::Vehicle(step),
            (ChatStep::LicenseType, _) => Self::LicenseType,
            (ChatStep::LicenseStatus, _) => Self::LicenseStatus,
        }
    }

    /// Persisted representation of this phase.
    pub fn steps(&self) -> (ChatStep, Option<VehicleStep>) {
        match self {
            Self::ZipCode => (ChatStep::ZipCode, None),
            Self::FullName => (ChatStep::FullName, None),
            Self::Email => (ChatStep::Email, None),
            Self::VehicleGate => (ChatStep::Vehicles, None),
            Self::Vehicle(step) => (ChatStep::Vehicles, Some(*step)),
            Self::LicenseType => (ChatStep::LicenseType, None),
            Self::LicenseStatus | Self::Complete => (ChatStep::LicenseStatus, None),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ZipCode => "zip_code",
            Self::FullName => "full_name",
            Self::Email => "email",
            Self::VehicleGate => "vehicle_gate",
            Self::Vehicle(step) => step.as_str(),
            Self::LicenseType => "license_type",
            Self::LicenseStatus => "license_status",
            Self::Complete => "complete",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    /// Canonical extracted value for the current phase.
    Answered(String),
    /// Vehicle identification, possibly completed by a lookup tool.
    Identified(VehicleIdentity),
    /// The gate question was affirmed in an earlier reply.
    GateAffirmedEarlier,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    /// Most recently created vehicle of the session, if any.
    pub active_vehicle: Option<VehicleId>,
    pub vehicle_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    SetSessionField(SessionField),
    CreateVehicle,
    SetVehicleField(VehicleField),
    ClearGateAffirmation,
    CompleteIntake,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: Phase,
    pub to: Phase,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    /// Whether the outcome identified the vehicle through several fields at once.
    pub fn filled_vehicle_identity(&self) -> bool {
        self.actions
            .iter()
            .filter(|action| {
                matches!(
                    action,
                    FlowAction::SetVehicleField(
                        VehicleField::Vin(_)
                            | VehicleField::Year(_)
                            | VehicleField::Make(_)
                            | VehicleField::BodyType(_)
                    )
                )
            })
            .count()
            > 1
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::Phase;
    use crate::domain::session::{
        ChatStep, LicenseStatus, LicenseType, Session, SessionField, SessionId, VehicleStep,
    };

    #[test]
    fn phase_follows_persisted_steps() {
        let mut session = Session::new(SessionId(1), Utc::now());
        assert_eq!(Phase::of(&session), Phase::ZipCode);

        session.current_step = ChatStep::Vehicles;
        assert_eq!(Phase::of(&session), Phase::VehicleGate);

        session.vehicle_step = Some(VehicleStep::CommutingMiles);
        assert_eq!(Phase::of(&session), Phase::Vehicle(VehicleStep::CommutingMiles));
        assert_eq!(
            Phase::of(&session).steps(),
            (ChatStep::Vehicles, Some(VehicleStep::CommutingMiles))
        );
    }

    #[test]
    fn completed_session_reports_complete_phase() {
        let mut session = Session::new(SessionId(2), Utc::now());
        session.current_step = ChatStep::LicenseStatus;
        session.apply(SessionField::LicenseType(LicenseType::Foreign));
        assert_eq!(Phase::of(&session), Phase::LicenseStatus);

        session.apply(SessionField::LicenseStatus(LicenseStatus::Suspended));
        assert_eq!(Phase::of(&session), Phase::Complete);
        assert_eq!(Phase::Complete.steps(), (ChatStep::LicenseStatus, None));
    }
}
