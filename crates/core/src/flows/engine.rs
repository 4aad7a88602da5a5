use thiserror::Error;
use tracing::{info, warn};

use crate::domain::session::SessionField;
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, Phase, TransitionOutcome};
use crate::flows::vehicle_loop;
use crate::interpret::rules;

pub trait FlowDefinition {
    fn initial_phase(&self) -> Phase;
    fn transition(
        &self,
        current: &Phase,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Linear intake order with the nested vehicle loop between email and the
/// license questions.
#[derive(Clone, Debug, Default)]
pub struct IntakeFlow;

impl FlowDefinition for IntakeFlow {
    fn initial_phase(&self) -> Phase {
        Phase::ZipCode
    }

    fn transition(
        &self,
        current: &Phase,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_intake(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_phase(&self) -> Phase {
        self.flow.initial_phase()
    }

    pub fn apply(
        &self,
        current: &Phase,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    /// Applies the event and records the outcome under the given correlation id.
    pub fn apply_logged(
        &self,
        current: &Phase,
        event: &FlowEvent,
        context: &FlowContext,
        correlation_id: &str,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => info!(
                event_name = "flow.transition_applied",
                correlation_id,
                from = outcome.from.label(),
                to = outcome.to.label(),
                actions = outcome.actions.len(),
                "flow transition applied"
            ),
            Err(error) => warn!(
                event_name = "flow.transition_rejected",
                correlation_id,
                phase = current.label(),
                error = %error,
                "flow transition rejected"
            ),
        }
        result
    }
}

impl Default for FlowEngine<IntakeFlow> {
    fn default() -> Self {
        Self::new(IntakeFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {phase:?} using event {event:?}")]
    InvalidTransition { phase: Phase, event: FlowEvent },
    #[error("answer `{answer}` is not a legal value at {phase:?}")]
    UnparseableAnswer { phase: Phase, answer: String },
    #[error("no active vehicle to update at {phase:?}")]
    NoActiveVehicle { phase: Phase },
    #[error("intake is already complete")]
    AlreadyComplete,
}

fn transition_intake(
    current: &Phase,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    let (to, actions) = match (current, event) {
        (Phase::Complete, _) => return Err(FlowTransitionError::AlreadyComplete),
        (Phase::VehicleGate | Phase::Vehicle(_), _) => {
            vehicle_loop::transition(*current, event, context)?
        }
        (Phase::ZipCode, FlowEvent::Answered(answer)) => {
            let zip = rules::zip_code(answer).ok_or_else(|| unparseable(current, answer))?;
            (Phase::FullName, vec![FlowAction::SetSessionField(SessionField::ZipCode(zip))])
        }
        (Phase::FullName, FlowEvent::Answered(answer)) => {
            (Phase::Email, set_session(current, "full_name", answer)?)
        }
        (Phase::Email, FlowEvent::Answered(answer)) => {
            (Phase::VehicleGate, set_session(current, "email", answer)?)
        }
        (Phase::LicenseType, FlowEvent::Answered(answer)) => {
            (Phase::LicenseStatus, set_session(current, "license_type", answer)?)
        }
        (Phase::LicenseStatus, FlowEvent::Answered(answer)) => {
            let mut actions = set_session(current, "license_status", answer)?;
            actions.push(FlowAction::CompleteIntake);
            (Phase::Complete, actions)
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                phase: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}

fn set_session(
    phase: &Phase,
    attribute: &str,
    answer: &str,
) -> Result<Vec<FlowAction>, FlowTransitionError> {
    SessionField::parse(attribute, answer)
        .map(|field| vec![FlowAction::SetSessionField(field)])
        .map_err(|_| unparseable(phase, answer))
}

fn unparseable(phase: &Phase, answer: &str) -> FlowTransitionError {
    FlowTransitionError::UnparseableAnswer { phase: *phase, answer: answer.to_string() }
}

#[cfg(test)]
mod tests {
    use crate::domain::session::{LicenseStatus, LicenseType, SessionField, VehicleStep};
    use crate::domain::vehicle::{VehicleField, VehicleId, VehicleUse};
    use crate::flows::engine::{FlowDefinition, FlowEngine, FlowTransitionError, IntakeFlow};
    use crate::flows::states::{FlowAction, FlowContext, FlowEvent, Phase};
    use crate::flows::vehicle_loop::VehicleIdentity;

    fn answered(value: &str) -> FlowEvent {
        FlowEvent::Answered(value.to_string())
    }

    fn with_vehicle() -> FlowContext {
        FlowContext { active_vehicle: Some(VehicleId(1)), vehicle_count: 1 }
    }

    #[test]
    fn contact_steps_advance_in_order() {
        let engine = FlowEngine::default();
        let context = FlowContext::default();
        let mut phase = engine.initial_phase();

        for (answer, expected) in [
            ("95014", Phase::FullName),
            ("Jane Doe", Phase::Email),
            ("jane@example.com", Phase::VehicleGate),
        ] {
            let outcome = engine.apply(&phase, &answered(answer), &context).expect("advance");
            assert_eq!(outcome.from, phase);
            assert_eq!(outcome.to, expected);
            phase = outcome.to;
        }
    }

    #[test]
    fn zip_code_must_be_five_digits() {
        let error = FlowEngine::default()
            .apply(&Phase::ZipCode, &answered("9501"), &FlowContext::default())
            .expect_err("four digits");
        assert!(matches!(
            error,
            FlowTransitionError::UnparseableAnswer { phase: Phase::ZipCode, .. }
        ));
    }

    #[test]
    fn gate_affirmation_creates_vehicle_and_decline_moves_to_license() {
        let engine = FlowEngine::default();
        let yes = engine
            .apply(&Phase::VehicleGate, &answered("true"), &FlowContext::default())
            .expect("gate yes");
        assert_eq!(yes.to, Phase::Vehicle(VehicleStep::VinOrYearMakeBody));
        assert!(yes.actions.contains(&FlowAction::CreateVehicle));

        let remembered = engine
            .apply(&Phase::VehicleGate, &FlowEvent::GateAffirmedEarlier, &FlowContext::default())
            .expect("remembered gate");
        assert_eq!(remembered.to, yes.to);

        let no = engine
            .apply(&Phase::VehicleGate, &answered("false"), &with_vehicle())
            .expect("gate no");
        assert_eq!(no.to, Phase::LicenseType);
        assert_eq!(no.actions, vec![FlowAction::ClearGateAffirmation]);
    }

    #[test]
    fn use_routes_commuting_and_other_uses_differently() {
        let engine = FlowEngine::default();
        let phase = Phase::Vehicle(VehicleStep::Use);

        let commuting = engine.apply(&phase, &answered("commuting"), &with_vehicle()).expect("use");
        assert_eq!(commuting.to, Phase::Vehicle(VehicleStep::CommutingDays));
        assert_eq!(
            commuting.actions,
            vec![FlowAction::SetVehicleField(VehicleField::VehicleUse(VehicleUse::Commuting))]
        );

        for other in ["commercial", "farming", "business"] {
            let outcome = engine.apply(&phase, &answered(other), &with_vehicle()).expect("use");
            assert_eq!(outcome.to, Phase::Vehicle(VehicleStep::AnnualMileage));
        }
    }

    #[test]
    fn commuting_branch_returns_to_gate_after_blind_spot() {
        let engine = FlowEngine::default();
        let context = with_vehicle();
        let mut phase = Phase::Vehicle(VehicleStep::CommutingDays);

        for answer in ["3", "12", "false"] {
            phase = engine.apply(&phase, &answered(answer), &context).expect("sub step").to;
        }
        assert_eq!(phase, Phase::VehicleGate);
    }

    #[test]
    fn out_of_range_numbers_do_not_advance() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&Phase::Vehicle(VehicleStep::CommutingDays), &answered("9"), &with_vehicle())
            .expect_err("days out of range");
        assert!(matches!(error, FlowTransitionError::UnparseableAnswer { .. }));
    }

    #[test]
    fn identification_sets_every_decoded_field() {
        let identity = VehicleIdentity {
            vin: Some("1HGCM82633A004352".to_string()),
            year: Some(2003),
            make: Some("HONDA".to_string()),
            body_type: Some("Coupe".to_string()),
        };
        let outcome = FlowEngine::default()
            .apply(
                &Phase::Vehicle(VehicleStep::VinOrYearMakeBody),
                &FlowEvent::Identified(identity),
                &with_vehicle(),
            )
            .expect("identified");

        assert_eq!(outcome.to, Phase::Vehicle(VehicleStep::Use));
        assert_eq!(outcome.actions.len(), 4);
        assert!(outcome.filled_vehicle_identity());
    }

    #[test]
    fn vehicle_sub_steps_require_an_active_vehicle() {
        let error = FlowEngine::default()
            .apply(&Phase::Vehicle(VehicleStep::Use), &answered("farming"), &FlowContext::default())
            .expect_err("no vehicle");
        assert!(matches!(error, FlowTransitionError::NoActiveVehicle { .. }));
    }

    #[test]
    fn license_status_completes_intake() {
        let engine = FlowEngine::new(IntakeFlow);
        let context = FlowContext::default();

        let license_type =
            engine.apply(&Phase::LicenseType, &answered("personal"), &context).expect("type");
        assert_eq!(
            license_type.actions,
            vec![FlowAction::SetSessionField(SessionField::LicenseType(LicenseType::Personal))]
        );

        let status =
            engine.apply(&license_type.to, &answered("valid"), &context).expect("status");
        assert_eq!(status.to, Phase::Complete);
        assert_eq!(
            status.actions,
            vec![
                FlowAction::SetSessionField(SessionField::LicenseStatus(LicenseStatus::Valid)),
                FlowAction::CompleteIntake,
            ]
        );

        let error = engine.apply(&Phase::Complete, &answered("hi"), &context).expect_err("done");
        assert_eq!(error, FlowTransitionError::AlreadyComplete);
    }

    #[test]
    fn misplaced_events_are_rejected() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&Phase::Email, &FlowEvent::GateAffirmedEarlier, &FlowContext::default())
            .expect_err("gate memory outside gate");
        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition {
                phase: Phase::Email,
                event: FlowEvent::GateAffirmedEarlier,
            }
        ));
        assert_eq!(IntakeFlow.initial_phase(), Phase::ZipCode);
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let engine = FlowEngine::default();
        let events = [answered("95014"), answered("Jane Doe"), answered("jane@example.com")];

        let run = |engine: &FlowEngine<IntakeFlow>| {
            let mut phase = engine.initial_phase();
            let mut actions = Vec::new();
            for event in &events {
                let outcome =
                    engine.apply(&phase, event, &FlowContext::default()).expect("deterministic");
                actions.push(outcome.actions);
                phase = outcome.to;
            }
            (phase, actions)
        };

        assert_eq!(run(&engine), run(&engine));
    }
}
