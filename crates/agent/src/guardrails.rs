use intake_core::domain::session::VehicleStep;
use intake_core::flows::Phase;

use crate::tools::{INSPIRATIONAL_QUOTE, VALIDATE_VEHICLE_INFO, VALIDATE_VIN};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
}

/// Which tools the oracle may call in which phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ToolPolicy;

impl ToolPolicy {
    pub fn offered_tools(&self, phase: Phase) -> Vec<&'static str> {
        let mut tools = Vec::new();
        if phase == Phase::Complete {
            return tools;
        }
        tools.push(INSPIRATIONAL_QUOTE);
        if phase == Phase::Vehicle(VehicleStep::VinOrYearMakeBody) {
            tools.push(VALIDATE_VIN);
            tools.push(VALIDATE_VEHICLE_INFO);
        }
        tools
    }

    /// A model may name a tool it was not offered; such calls are refused.
    pub fn evaluate(&self, phase: Phase, tool_name: &str) -> ToolDecision {
        if self.offered_tools(phase).contains(&tool_name) {
            return ToolDecision::Allow;
        }
        match tool_name {
            VALIDATE_VIN | VALIDATE_VEHICLE_INFO => ToolDecision::Deny {
                reason_code: "vehicle_lookup_out_of_phase",
                user_message: "Vehicle lookups are only available while identifying a vehicle."
                    .to_string(),
            },
            INSPIRATIONAL_QUOTE => ToolDecision::Deny {
                reason_code: "intake_complete",
                user_message: "The intake is already complete.".to_string(),
            },
            _ => ToolDecision::Deny {
                reason_code: "unknown_tool",
                user_message: format!("Tool `{tool_name}` is not available."),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use intake_core::domain::session::VehicleStep;
    use intake_core::flows::Phase;

    use super::{ToolDecision, ToolPolicy};
    use crate::tools::{INSPIRATIONAL_QUOTE, VALIDATE_VEHICLE_INFO, VALIDATE_VIN};

    #[test]
    fn lookups_offered_only_while_identifying_vehicle() {
        let policy = ToolPolicy::default();
        assert_eq!(
            policy.offered_tools(Phase::Vehicle(VehicleStep::VinOrYearMakeBody)),
            vec![INSPIRATIONAL_QUOTE, VALIDATE_VIN, VALIDATE_VEHICLE_INFO]
        );
        assert_eq!(policy.offered_tools(Phase::Email), vec![INSPIRATIONAL_QUOTE]);
        assert!(policy.offered_tools(Phase::Complete).is_empty());
    }

    #[test]
    fn out_of_phase_lookup_is_denied() {
        let decision = ToolPolicy::default().evaluate(Phase::ZipCode, VALIDATE_VIN);
        let reason_code = match decision {
            ToolDecision::Deny { reason_code, .. } => reason_code,
            ToolDecision::Allow => "",
        };
        assert_eq!(reason_code, "vehicle_lookup_out_of_phase");
    }

    #[test]
    fn quote_tool_is_refused_once_intake_is_complete() {
        let policy = ToolPolicy;
        assert_eq!(policy.evaluate(Phase::FullName, INSPIRATIONAL_QUOTE), ToolDecision::Allow);
        assert!(matches!(
            policy.evaluate(Phase::Complete, INSPIRATIONAL_QUOTE),
            ToolDecision::Deny { reason_code: "intake_complete", .. }
        ));
        assert_eq!(
            policy.evaluate(Phase::Vehicle(VehicleStep::VinOrYearMakeBody), VALIDATE_VEHICLE_INFO),
            ToolDecision::Allow
        );
    }
}
