use serde::{Deserialize, Serialize};

use crate::domain::session::VehicleStep;
use crate::domain::vehicle::{Vehicle, VehicleField, VehicleUse};
use crate::flows::engine::FlowTransitionError;
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, Phase};
use crate::interpret::rules;

/// Bot phrasing that marks a message as asking the vehicle gate question.
pub const GATE_TRIGGER_PHRASES: [&str; 2] = ["add a vehicle", "add another vehicle"];

/// Vehicle identification in either accepted form. A decoded VIN may carry
/// year, make and body type as well.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleIdentity {
    pub vin: Option<String>,
    pub year: Option<i32>,
    pub make: Option<String>,
    pub body_type: Option<String>,
}

impl VehicleIdentity {
    pub fn from_vin(vin: impl Into<String>) -> Self {
        Self { vin: Some(vin.into()), ..Self::default() }
    }

    pub fn from_description(
        year: i32,
        make: impl Into<String>,
        body_type: impl Into<String>,
    ) -> Self {
        Self {
            vin: None,
            year: Some(year),
            make: Some(make.into()),
            body_type: Some(body_type.into()),
        }
    }

    /// Reads a VIN or a `<year> <make> <body>` description from free text.
    pub fn from_answer(text: &str) -> Option<Self> {
        if let Some(vin) = rules::normalize_vin(text) {
            return Some(Self::from_vin(vin));
        }
        rules::year_make_body(text)
            .map(|found| Self::from_description(found.year, found.make, found.body_type))
    }

    pub fn is_empty(&self) -> bool {
        self.vin.is_none() && self.year.is_none() && self.make.is_none() && self.body_type.is_none()
    }

    /// Canonical extracted form: the VIN when present, else the description.
    pub fn canonical(&self) -> String {
        if let Some(vin) = &self.vin {
            return vin.clone();
        }
        [self.year.map(|year| year.to_string()), self.make.clone(), self.body_type.clone()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn fields(&self) -> Vec<VehicleField> {
        let mut fields = Vec::new();
        if let Some(vin) = &self.vin {
            fields.push(VehicleField::Vin(vin.clone()));
        }
        if let Some(year) = self.year {
            fields.push(VehicleField::Year(year));
        }
        if let Some(make) = &self.make {
            fields.push(VehicleField::Make(make.clone()));
        }
        if let Some(body_type) = &self.body_type {
            fields.push(VehicleField::BodyType(body_type.clone()));
        }
        fields
    }
}

pub fn gate_question(vehicle_count: usize) -> &'static str {
    if vehicle_count == 0 {
        "Would you like to add a vehicle? Please respond with yes or no."
    } else {
        "Would you like to add another vehicle? Please respond with yes or no."
    }
}

pub fn asks_gate_question(bot_text: &str) -> bool {
    let lowered = bot_text.to_lowercase();
    GATE_TRIGGER_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// Sub-step writes always target the most recently created vehicle.
pub fn active_vehicle(vehicles: &[Vehicle]) -> Option<&Vehicle> {
    vehicles.iter().max_by_key(|vehicle| vehicle.id)
}

pub fn step_after_use(vehicle_use: VehicleUse) -> VehicleStep {
    match vehicle_use {
        VehicleUse::Commuting => VehicleStep::CommutingDays,
        VehicleUse::Commercial | VehicleUse::Farming | VehicleUse::Business => {
            VehicleStep::AnnualMileage
        }
    }
}

pub(crate) fn transition(
    current: Phase,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<(Phase, Vec<FlowAction>), FlowTransitionError> {
    match (current, event) {
        (Phase::VehicleGate, FlowEvent::GateAffirmedEarlier) => Ok(start_vehicle()),
        (Phase::VehicleGate, FlowEvent::Answered(answer)) => match answer.trim().parse::<bool>() {
            Ok(true) => Ok(start_vehicle()),
            Ok(false) => Ok((Phase::LicenseType, vec![FlowAction::ClearGateAffirmation])),
            Err(_) => Err(unparseable(current, answer)),
        },
        (Phase::Vehicle(step), _) => {
            if context.active_vehicle.is_none() {
                return Err(FlowTransitionError::NoActiveVehicle { phase: current });
            }
            sub_step(step, event)
        }
        _ => Err(FlowTransitionError::InvalidTransition { phase: current, event: event.clone() }),
    }
}

fn start_vehicle() -> (Phase, Vec<FlowAction>) {
    (
        Phase::Vehicle(VehicleStep::VinOrYearMakeBody),
        vec![FlowAction::ClearGateAffirmation, FlowAction::CreateVehicle],
    )
}

fn sub_step(
    step: VehicleStep,
    event: &FlowEvent,
) -> Result<(Phase, Vec<FlowAction>), FlowTransitionError> {
    let phase = Phase::Vehicle(step);

    if let (VehicleStep::VinOrYearMakeBody, FlowEvent::Identified(identity)) = (step, event) {
        if identity.is_empty() {
            return Err(unparseable(phase, ""));
        }
        return Ok((Phase::Vehicle(VehicleStep::Use), set_all(identity.fields())));
    }

    let FlowEvent::Answered(answer) = event else {
        return Err(FlowTransitionError::InvalidTransition { phase, event: event.clone() });
    };

    let field = |attribute: &str| {
        VehicleField::parse(attribute, answer).map_err(|_| unparseable(phase, answer))
    };

    let (next, field) = match step {
        VehicleStep::VinOrYearMakeBody => {
            let identity =
                VehicleIdentity::from_answer(answer).ok_or_else(|| unparseable(phase, answer))?;
            return Ok((Phase::Vehicle(VehicleStep::Use), set_all(identity.fields())));
        }
        VehicleStep::Use => {
            let field = field("vehicle_use")?;
            let VehicleField::VehicleUse(vehicle_use) = field else {
                return Err(unparseable(phase, answer));
            };
            (Phase::Vehicle(step_after_use(vehicle_use)), field)
        }
        VehicleStep::CommutingDays => {
            (Phase::Vehicle(VehicleStep::CommutingMiles), field("days_per_week")?)
        }
        VehicleStep::CommutingMiles => {
            (Phase::Vehicle(VehicleStep::BlindSpot), field("one_way_miles")?)
        }
        VehicleStep::AnnualMileage => {
            (Phase::Vehicle(VehicleStep::BlindSpot), field("annual_mileage")?)
        }
        VehicleStep::BlindSpot => (Phase::VehicleGate, field("blind_spot_warning_equipped")?),
    };

    Ok((next, vec![FlowAction::SetVehicleField(field)]))
}

fn set_all(fields: Vec<VehicleField>) -> Vec<FlowAction> {
    fields.into_iter().map(FlowAction::SetVehicleField).collect()
}

fn unparseable(phase: Phase, answer: &str) -> FlowTransitionError {
    FlowTransitionError::UnparseableAnswer { phase, answer: answer.to_string() }
}
