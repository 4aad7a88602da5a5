//! Conversation helpers shared by the oracle adapter and the runtime: canned
//! replies, history rendering, the completion summary and gate memory.

use intake_core::domain::message::{Message, Sender};
use intake_core::domain::session::Session;
use intake_core::domain::vehicle::Vehicle;
use intake_core::flows::vehicle_loop::asks_gate_question;
use intake_core::interpret::rules;

/// Reply used when the oracle cannot be reached or returns nothing.
pub const ORACLE_FAILURE_REPLY: &str =
    "I apologize, but I encountered an error processing your request. Please try again.";
/// Reply used when the oracle answers with something that is not the JSON contract.
pub const MALFORMED_REPLY: &str = "Error while processing your request. Please try again.";
/// Reply used when a turn cannot advance on its own.
pub const AUTO_ADVANCE_FAILURE_REPLY: &str =
    "I'm sorry, something went wrong while moving to the next question. Please try again.";

/// One line per collected value, in collection order.
pub fn session_summary(session: &Session, vehicles: &[Vehicle]) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(zip_code) = &session.zip_code {
        lines.push(format!("Zip Code: {zip_code}"));
    }
    if let Some(full_name) = &session.full_name {
        lines.push(format!("Full Name: {full_name}"));
    }
    if let Some(email) = &session.email {
        lines.push(format!("Email: {email}"));
    }
    if let Some(license_type) = session.license_type {
        lines.push(format!("License Type: {}", license_type.as_str()));
    }
    if let Some(license_status) = session.license_status {
        lines.push(format!("License Status: {}", license_status.as_str()));
    }
    if !vehicles.is_empty() {
        lines.push(format!("Vehicles: {} vehicle(s) added", vehicles.len()));
    }
    lines
}

pub fn completion_message(session: &Session, vehicles: &[Vehicle]) -> String {
    let summary = session_summary(session, vehicles);
    let summary = if summary.is_empty() {
        "No additional information collected.".to_string()
    } else {
        summary.join("\n")
    };
    format!(
        "Thank you! All of your information has been collected. \
         I'm connecting you with an agent who will help with your insurance needs.\n\n{summary}"
    )
}

/// `sender: content` lines, oldest first.
pub fn render_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}\n", message.sender.as_str(), message.content))
        .collect()
}

/// Whether the latest user reply affirmatively answers a bot message that asked
/// to add a vehicle. `messages` must be in chronological order.
pub fn latest_reply_affirms_gate(messages: &[Message]) -> bool {
    let Some(reply_index) = messages.iter().rposition(|message| message.sender == Sender::User)
    else {
        return false;
    };
    let asked = messages[..reply_index]
        .last()
        .is_some_and(|prior| prior.sender == Sender::Bot && asks_gate_question(&prior.content));
    asked && rules::yes_no(&messages[reply_index].content) == Some(true)
}

/// Content of the most recent user message, if any.
pub fn latest_user_text(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|message| message.sender == Sender::User)
        .map(|message| message.content.as_str())
}
