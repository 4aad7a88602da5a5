//! Reconciles the oracle's proposal for a phase with the deterministic rules.

pub mod rules;

use serde::{Deserialize, Serialize};

use crate::domain::session::{LicenseStatus, LicenseType, VehicleStep};
use crate::flows::states::{FlowEvent, Phase};
use crate::flows::vehicle_loop::VehicleIdentity;

/// Extraction marker the oracle uses to hand the user over to a person.
pub const ESCALATION_MARKER: &str = "connect_to_agent";

/// Where a verdict came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authority {
    Oracle,
    /// Finalised from a lookup tool result; taken verbatim.
    Tool,
}

/// The oracle's (or a tool's) opinion on the latest user reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleVerdict {
    pub valid: bool,
    pub extracted: Option<String>,
    pub authority: Authority,
    /// Decoded vehicle details returned by a lookup tool.
    pub vehicle: Option<VehicleIdentity>,
}

impl OracleVerdict {
    pub fn from_oracle(valid: bool, extracted: Option<String>) -> Self {
        Self { valid, extracted, authority: Authority::Oracle, vehicle: None }
    }

    pub fn invalid() -> Self {
        Self::from_oracle(false, None)
    }

    fn proposal(&self) -> Option<&str> {
        self.extracted
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("none"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// The gate was affirmed in an earlier reply.
    GateMemory,
    ToolResult,
    Oracle,
    Fallback,
    /// No deterministic rule exists; the oracle's word is final.
    TrustedOracle,
    Escalated,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpretation {
    pub valid: bool,
    pub extracted: Option<String>,
    pub resolution: Resolution,
    pub vehicle: Option<VehicleIdentity>,
}

impl Interpretation {
    fn accepted(extracted: String, resolution: Resolution) -> Self {
        Self { valid: true, extracted: Some(extracted), resolution, vehicle: None }
    }

    fn rejected() -> Self {
        Self { valid: false, extracted: None, resolution: Resolution::Rejected, vehicle: None }
    }

    pub fn is_escalation(&self) -> bool {
        self.resolution == Resolution::Escalated
    }

    /// Whether this result was derived without genuinely new user input.
    pub fn is_short_circuit(&self) -> bool {
        self.resolution == Resolution::GateMemory
    }

    /// The flow event to apply, if the reply advances the conversation.
    pub fn event(&self, phase: Phase) -> Option<FlowEvent> {
        if !self.valid {
            return None;
        }
        match self.resolution {
            Resolution::Escalated | Resolution::Rejected => None,
            Resolution::GateMemory => Some(FlowEvent::GateAffirmedEarlier),
            _ => {
                if phase == Phase::Vehicle(VehicleStep::VinOrYearMakeBody) {
                    if let Some(identity) = &self.vehicle {
                        return Some(FlowEvent::Identified(identity.clone()));
                    }
                }
                self.extracted.clone().map(FlowEvent::Answered)
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResponseInterpreter;

impl ResponseInterpreter {
    pub fn interpret(
        &self,
        phase: Phase,
        user_text: &str,
        verdict: &OracleVerdict,
        gate_affirmed: bool,
    ) -> Interpretation {
        if phase == Phase::VehicleGate && gate_affirmed {
            return Interpretation::accepted("true".to_string(), Resolution::GateMemory);
        }

        if phase == Phase::Complete {
            return Interpretation::rejected();
        }

        if let Some(proposal) = verdict.proposal() {
            if proposal.eq_ignore_ascii_case(ESCALATION_MARKER) {
                return Interpretation {
                    valid: true,
                    extracted: Some(ESCALATION_MARKER.to_string()),
                    resolution: Resolution::Escalated,
                    vehicle: None,
                };
            }
        }

        if verdict.authority == Authority::Tool {
            return Interpretation {
                valid: verdict.valid,
                extracted: verdict.extracted.clone().filter(|_| verdict.valid),
                resolution: if verdict.valid {
                    Resolution::ToolResult
                } else {
                    Resolution::Rejected
                },
                vehicle: verdict.vehicle.clone().filter(|_| verdict.valid),
            };
        }

        if verdict.valid {
            if let Some(canonical) = verdict.proposal().and_then(|value| canonicalize(phase, value))
            {
                return with_identity(phase, canonical, Resolution::Oracle);
            }
        }

        if has_fallback(phase) {
            return match fallback(phase, user_text) {
                Some(value) => with_identity(phase, value, Resolution::Fallback),
                None => Interpretation::rejected(),
            };
        }

        match verdict.proposal() {
            Some(value) if verdict.valid => {
                Interpretation::accepted(value.to_string(), Resolution::TrustedOracle)
            }
            _ => Interpretation::rejected(),
        }
    }
}

fn with_identity(phase: Phase, value: String, resolution: Resolution) -> Interpretation {
    let mut interpretation = Interpretation::accepted(value, resolution);
    if phase == Phase::Vehicle(VehicleStep::VinOrYearMakeBody) {
        interpretation.vehicle =
            interpretation.extracted.as_deref().and_then(VehicleIdentity::from_answer);
    }
    interpretation
}

fn has_fallback(phase: Phase) -> bool {
    !matches!(phase, Phase::FullName | Phase::Email | Phase::Complete)
}

/// Canonical in-domain form of an oracle proposal, if it is legal for the
/// phase. Name and email have no canonical form of their own.
pub fn canonicalize(phase: Phase, value: &str) -> Option<String> {
    match phase {
        Phase::ZipCode => rules::zip_code(value),
        Phase::VehicleGate | Phase::Vehicle(VehicleStep::BlindSpot) => {
            rules::yes_no(value).map(|answer| answer.to_string())
        }
        Phase::Vehicle(VehicleStep::VinOrYearMakeBody) => {
            VehicleIdentity::from_answer(value).map(|identity| identity.canonical())
        }
        Phase::Vehicle(VehicleStep::Use) => {
            rules::vehicle_use(value).map(|kind| kind.as_str().to_string())
        }
        Phase::Vehicle(VehicleStep::CommutingDays) => value
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|days| (1..=7).contains(days))
            .map(|days| days.to_string()),
        Phase::Vehicle(VehicleStep::CommutingMiles | VehicleStep::AnnualMileage) => value
            .trim()
            .replace(',', "")
            .parse::<u32>()
            .ok()
            .filter(|miles| *miles > 0)
            .map(|miles| miles.to_string()),
        Phase::LicenseType => {
            value.parse::<LicenseType>().ok().map(|kind| kind.as_str().to_string())
        }
        Phase::LicenseStatus => {
            value.parse::<LicenseStatus>().ok().map(|status| status.as_str().to_string())
        }
        Phase::FullName | Phase::Email | Phase::Complete => None,
    }
}

/// Recomputes the extraction from the user's own words.
pub fn fallback(phase: Phase, user_text: &str) -> Option<String> {
    match phase {
        Phase::ZipCode => rules::zip_code(user_text),
        Phase::VehicleGate | Phase::Vehicle(VehicleStep::BlindSpot) => {
            rules::yes_no(user_text).map(|answer| answer.to_string())
        }
        Phase::Vehicle(VehicleStep::VinOrYearMakeBody) => {
            VehicleIdentity::from_answer(user_text).map(|identity| identity.canonical())
        }
        Phase::Vehicle(VehicleStep::Use) => {
            rules::vehicle_use(user_text).map(|kind| kind.as_str().to_string())
        }
        Phase::Vehicle(VehicleStep::CommutingDays) => {
            rules::commuting_days(user_text).map(|days| days.to_string())
        }
        Phase::Vehicle(VehicleStep::CommutingMiles | VehicleStep::AnnualMileage) => {
            rules::positive_miles(user_text).map(|miles| miles.to_string())
        }
        Phase::LicenseType => rules::license_type(user_text).map(|kind| kind.as_str().to_string()),
        Phase::LicenseStatus => {
            rules::license_status(user_text).map(|status| status.as_str().to_string())
        }
        Phase::FullName | Phase::Email | Phase::Complete => None,
    }
}
