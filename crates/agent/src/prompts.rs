//! Instruction rendering for each conversation phase.

use intake_core::domain::message::Message;
use intake_core::domain::session::{LicenseType, Session, VehicleStep};
use intake_core::domain::vehicle::{Vehicle, VehicleUse};
use intake_core::flows::vehicle_loop::gate_question;
use intake_core::flows::Phase;
use intake_core::interpret::ESCALATION_MARKER;

use crate::conversation::render_history;

const PREAMBLE: &str = "\
You are an insurance agent bot gathering information from the user. You do NOT have a name.
If you are not given any previous messages, you are starting the conversation;
make the user feel welcome.
Keep a positive, helpful tone without being overly optimistic, and do not rush the user.
Never leave the scope of collecting insurance intake information for the current question.";

const RESPONSE_CONTRACT: &str = "\
Your response must be valid JSON with double quoted keys and values.
Exact format: {\"content\": \"<your reply>\", \"valid\": true|false, \
\"extracted\": \"<the value extracted from the LAST user message if valid, otherwise none>\"}
Validate only the LAST user message for the current step. Extract only the value itself,
be lenient with typos, and always list the available options when asking a question.";

/// Everything the instruction for one oracle call is rendered from.
#[derive(Clone, Debug)]
pub struct OracleRequest {
    pub phase: Phase,
    pub session: Session,
    pub vehicles: Vec<Vehicle>,
    /// Recent messages, oldest first.
    pub history: Vec<Message>,
}

pub fn render_instruction(request: &OracleRequest, tools: &[&str]) -> String {
    let mut prompt = String::new();
    prompt.push_str(PREAMBLE);
    prompt.push_str("\n\n");
    prompt.push_str(RESPONSE_CONTRACT);
    prompt.push_str("\n\n");

    if tools.contains(&crate::tools::INSPIRATIONAL_QUOTE) {
        prompt.push_str(&format!(
            "Only when the user explicitly asks for a human, expresses strong frustration or asks \
             to stop, call get_inspirational_quote, share the quote, say you are connecting them \
             to an agent, and set valid: true, extracted: \"{ESCALATION_MARKER}\". \
             A normal answer is never frustration.\n\n"
        ));
    }

    prompt.push_str(&format!(
        "Past {} messages (oldest first):\n*** CONVERSATION BEGINS ***\n",
        request.history.len()
    ));
    prompt.push_str(&render_history(&request.history));
    prompt.push_str("*** CONVERSATION ENDS ***\n");
    if request.history.is_empty() {
        prompt.push_str("The conversation has no messages yet; treat this message as the intro.\n");
    }

    let collected = collected_fields(&request.session);
    if !collected.is_empty() {
        prompt.push_str("\nAlready collected (do NOT ask about these again, do NOT go back):\n");
        for line in collected {
            prompt.push_str(&format!("- {line}\n"));
        }
    }

    prompt.push('\n');
    prompt.push_str(&phase_request(request.phase, request.vehicles.len()));
    prompt
}

fn collected_fields(session: &Session) -> Vec<String> {
    [
        session.zip_code.as_ref().map(|value| format!("Zip Code: {value}")),
        session.full_name.as_ref().map(|value| format!("Full Name: {value}")),
        session.email.as_ref().map(|value| format!("Email: {value}")),
        session.license_type.map(|value| format!("License Type: {}", value.as_str())),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn options<T: Copy>(values: &[T], name: fn(&T) -> &'static str) -> String {
    let names: Vec<&str> = values.iter().map(name).collect();
    match names.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{}, or {last}", rest.join(", ")),
        _ => names.join(""),
    }
}

/// The phase's question, its allowed values and how to report the extraction.
pub fn phase_request(phase: Phase, vehicle_count: usize) -> String {
    match phase {
        Phase::ZipCode => "Current step: ZIP CODE. If the last user message is a valid 5-digit \
            zip code, set valid: true and extracted: just the zip code, then ask for their full \
            name. Otherwise set valid: false and ask for a valid 5-digit zip code."
            .to_string(),
        Phase::FullName => "Current step: FULL NAME. If the last user message contains a first \
            and last name, set valid: true and extracted: the full name, then ask for their email \
            address. Otherwise set valid: false and ask for their full name."
            .to_string(),
        Phase::Email => format!(
            "Current step: EMAIL. If the last user message is a valid email address, set valid: \
             true and extracted: the email, then ask: '{}' Otherwise set valid: false and ask for \
             a valid email address.",
            gate_question(0)
        ),
        Phase::VehicleGate => format!(
            "Current step: ADD VEHICLE QUESTION. Ask: '{}' Users can add several vehicles. For \
             any affirmative answer set valid: true and extracted: 'true' and ask for a VIN or \
             Year, Make and Body Type. For any negative answer set valid: true and extracted: \
             'false' and ask: 'Please choose your license type: {}.' Only set valid: false when \
             the answer is unclear.",
            gate_question(vehicle_count),
            options(&LicenseType::ALL, LicenseType::as_str)
        ),
        Phase::Vehicle(step) => vehicle_request(step),
        Phase::LicenseType => format!(
            "Current step: LICENSE TYPE. We are past the vehicle questions; do not mention \
             vehicles. Ask: 'Please choose your license type: {options}.' If the last user \
             message matches one option, set valid: true and extracted: exactly that option, then \
             ask for their license status: valid or suspended. Otherwise set valid: false and ask \
             again with the options shown.",
            options = options(&LicenseType::ALL, LicenseType::as_str)
        ),
        Phase::LicenseStatus => "Current step: LICENSE STATUS. This is the final question. The \
            only acceptable values are 'valid' and 'suspended'. If the last user message contains \
            'valid' set valid: true and extracted: 'valid'; if it contains 'suspended' set valid: \
            true and extracted: 'suspended'. Otherwise set valid: false and ask only: 'Please \
            choose your license status: valid or suspended.'"
            .to_string(),
        Phase::Complete => "All information has been collected. Do not ask for anything else. \
            Set valid: true and extracted: none."
            .to_string(),
    }
}

fn vehicle_request(step: VehicleStep) -> String {
    match step {
        VehicleStep::VinOrYearMakeBody => "Current step: VEHICLE IDENTIFICATION. Ask: 'Please \
            provide either a VIN (17 characters) or Year, Make, and Body Type (e.g., 2020 Toyota \
            Sedan).' If the user gives a VIN, call validate_vin. If they give Year, Make and Body \
            Type, call validate_vehicle_info. Body Type is mandatory: without it do not call a \
            tool, set valid: false and ask for the body type. Never say you are validating. When \
            valid, set extracted: the VIN or 'year make body_type' and ask for the vehicle use."
            .to_string(),
        VehicleStep::Use => format!(
            "Current step: VEHICLE USE. Ask: 'Please choose the vehicle use: {}.' If the last user \
             message matches one option, set valid: true and extracted: exactly that option. If \
             commuting, next ask only how many days per week they commute; otherwise ask for the \
             annual mileage.",
            options(&VehicleUse::ALL, VehicleUse::as_str)
        ),
        VehicleStep::CommutingDays => "Current step: COMMUTING DAYS PER WEEK. Ask only how many \
            days per week they commute. If the last user message is a number from 1 to 7, set \
            valid: true and extracted: the number, then ask: 'How many one-way miles is your \
            commute to work or school?'"
            .to_string(),
        VehicleStep::CommutingMiles => "Current step: COMMUTING MILES (ONE-WAY). Do not ask about \
            days again. If the last user message is a positive number, set valid: true and \
            extracted: the number, then ask whether the vehicle has blind spot warning (yes/no)."
            .to_string(),
        VehicleStep::AnnualMileage => "Current step: ANNUAL MILEAGE. If the last user message is \
            a positive number, set valid: true and extracted: the number, then ask whether the \
            vehicle has blind spot warning (yes/no)."
            .to_string(),
        VehicleStep::BlindSpot => format!(
            "Current step: BLIND SPOT WARNING, the last question for this vehicle. Ask: 'Does \
             your vehicle have blind spot warning? Please respond with yes or no.' For an \
             affirmative answer set valid: true and extracted: 'true', for a negative answer \
             extracted: 'false', then ask: '{}'",
            gate_question(1)
        ),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use intake_core::domain::session::{Session, SessionId, VehicleStep};
    use intake_core::flows::Phase;

    use super::{phase_request, render_instruction, OracleRequest};
    use crate::tools::{INSPIRATIONAL_QUOTE, VALIDATE_VIN};

    fn request(phase: Phase) -> OracleRequest {
        let mut session = Session::new(SessionId(3), Utc::now());
        session.zip_code = Some("95014".to_string());
        OracleRequest { phase, session, vehicles: Vec::new(), history: Vec::new() }
    }

    #[test]
    fn instruction_lists_collected_fields_and_phase_question() {
        let prompt = render_instruction(&request(Phase::FullName), &[INSPIRATIONAL_QUOTE]);
        assert!(prompt.contains("- Zip Code: 95014"));
        assert!(prompt.contains("Current step: FULL NAME"));
        assert!(prompt.contains("connect_to_agent"));
        assert!(prompt.contains("treat this message as the intro"));
    }

    #[test]
    fn escalation_text_omitted_without_quote_tool() {
        let prompt = render_instruction(&request(Phase::ZipCode), &[]);
        assert!(!prompt.contains("get_inspirational_quote"));
    }

    #[test]
    fn gate_question_depends_on_vehicle_count() {
        assert!(phase_request(Phase::VehicleGate, 0).contains("add a vehicle?"));
        assert!(phase_request(Phase::VehicleGate, 2).contains("add another vehicle?"));
        assert!(phase_request(Phase::LicenseType, 0).contains("personal, commercial, or foreign"));
    }

    #[test]
    fn identification_step_names_lookup_tools() {
        let prompt = render_instruction(
            &request(Phase::Vehicle(VehicleStep::VinOrYearMakeBody)),
            &[INSPIRATIONAL_QUOTE, VALIDATE_VIN],
        );
        assert!(prompt.contains("validate_vin"));
        assert!(prompt.contains("Body Type is mandatory"));
    }
}
