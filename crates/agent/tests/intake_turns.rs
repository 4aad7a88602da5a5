use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use intake_agent::conversation::{AUTO_ADVANCE_FAILURE_REPLY, ORACLE_FAILURE_REPLY};
use intake_agent::{AgentRuntime, OracleAdapter, OracleReply, RuntimeSettings, Stores};
use intake_agent::prompts::OracleRequest;
use intake_core::flows::vehicle_loop::gate_question;
use intake_core::interpret::{Authority, ESCALATION_MARKER};
use intake_core::{
    ChatStep, LicenseStatus, LicenseType, OracleVerdict, Phase, Sender, SessionId, VehicleIdentity,
    VehicleStep, VehicleUse,
};

/// Accepts whatever the user said last, the way a cooperative model would.
/// Vehicle identification comes back as a lookup-tool verdict.
struct EchoOracle {
    asked: Mutex<Vec<Phase>>,
    identify: fn(&str) -> OracleVerdict,
}

impl EchoOracle {
    fn new() -> Self {
        Self { asked: Mutex::new(Vec::new()), identify: looked_up }
    }

    fn with_identify(identify: fn(&str) -> OracleVerdict) -> Self {
        Self { asked: Mutex::new(Vec::new()), identify }
    }

    fn asked(&self) -> Vec<Phase> {
        self.asked.lock().expect("asked lock").clone()
    }
}

fn looked_up(user_text: &str) -> OracleVerdict {
    let identity = VehicleIdentity::from_answer(user_text);
    OracleVerdict {
        valid: identity.is_some(),
        extracted: identity.as_ref().map(VehicleIdentity::canonical),
        authority: Authority::Tool,
        vehicle: identity,
    }
}

fn empty_lookup(_user_text: &str) -> OracleVerdict {
    OracleVerdict {
        valid: true,
        extracted: Some("unknown".to_string()),
        authority: Authority::Tool,
        vehicle: Some(VehicleIdentity::default()),
    }
}

#[async_trait]
impl OracleAdapter for EchoOracle {
    async fn respond(&self, request: &OracleRequest, _correlation_id: &str) -> OracleReply {
        self.asked.lock().expect("asked lock").push(request.phase);
        let user_text = request
            .history
            .iter()
            .rev()
            .find(|message| message.sender == Sender::User)
            .map(|message| message.content.clone())
            .unwrap_or_default();

        if user_text.contains("human") {
            return OracleReply {
                content: "Here is a quote while I connect you to an agent.".to_string(),
                verdict: OracleVerdict::from_oracle(true, Some(ESCALATION_MARKER.to_string())),
            };
        }

        let content = match request.phase {
            Phase::Email => format!("Thanks! {}", gate_question(0)),
            Phase::Vehicle(VehicleStep::BlindSpot) => format!("Noted. {}", gate_question(1)),
            phase => format!("Next question after {}.", phase.label()),
        };
        let verdict = match request.phase {
            Phase::Vehicle(VehicleStep::VinOrYearMakeBody) => (self.identify)(&user_text),
            _ => OracleVerdict::from_oracle(true, Some(user_text)),
        };
        OracleReply { content, verdict }
    }
}

/// An oracle whose every call fails and degrades to the canned apology.
#[derive(Default)]
struct DownOracle {
    asked: Mutex<Vec<Phase>>,
}

#[async_trait]
impl OracleAdapter for DownOracle {
    async fn respond(&self, request: &OracleRequest, _correlation_id: &str) -> OracleReply {
        self.asked.lock().expect("asked lock").push(request.phase);
        OracleReply { content: ORACLE_FAILURE_REPLY.to_string(), verdict: OracleVerdict::invalid() }
    }
}

fn runtime_with(oracle: Arc<EchoOracle>, settings: RuntimeSettings) -> AgentRuntime {
    AgentRuntime::new(Stores::in_memory(), oracle, settings)
}

async fn say(runtime: &AgentRuntime, session_id: SessionId, text: &str) -> String {
    runtime.append_message(session_id, Sender::User, text).await.expect("user message stored");
    runtime.generate_bot_message(session_id, "req-test").await.expect("bot turn").content
}

async fn answer_all(runtime: &AgentRuntime, session_id: SessionId, answers: &[&str]) {
    for answer in answers {
        say(runtime, session_id, answer).await;
    }
}

#[tokio::test]
async fn full_intake_collects_every_field_and_summarizes() {
    let oracle = Arc::new(EchoOracle::new());
    let runtime = runtime_with(oracle.clone(), RuntimeSettings::default());
    let session = runtime.create_session().await.expect("session");

    let intro = runtime.generate_bot_message(session.id, "req-intro").await.expect("intro");
    assert_eq!(intro.sender, Sender::Bot);

    answer_all(&runtime, session.id, &["95014", "Jane Doe", "jane@example.com"]).await;
    let after_gate = say(&runtime, session.id, "yes").await;
    assert_eq!(after_gate, "Next question after vin_or_year_make_body.");

    answer_all(
        &runtime,
        session.id,
        &["2019 Ford Sedan", "commuting", "3", "12", "no", "no", "personal"],
    )
    .await;
    let closing = say(&runtime, session.id, "I have a valid license").await;

    assert!(closing.starts_with("Thank you! All of your information has been collected."));
    assert!(closing.contains("Zip Code: 95014"));
    assert!(closing.contains("Full Name: Jane Doe"));
    assert!(closing.contains("Email: jane@example.com"));
    assert!(closing.contains("License Type: personal"));
    assert!(closing.contains("License Status: valid"));
    assert!(closing.contains("Vehicles: 1 vehicle(s) added"));

    let snapshot = runtime.session_snapshot(session.id).await.expect("snapshot");
    assert_eq!(snapshot.phase, Phase::Complete);
    assert_eq!(snapshot.session.license_type, Some(LicenseType::Personal));
    assert_eq!(snapshot.session.license_status, Some(LicenseStatus::Valid));
    assert_eq!(snapshot.vehicles.len(), 1);

    let vehicle = &snapshot.vehicles[0];
    assert_eq!(vehicle.year, Some(2019));
    assert_eq!(vehicle.make.as_deref(), Some("Ford"));
    assert_eq!(vehicle.body_type.as_deref(), Some("Sedan"));
    assert_eq!(vehicle.vehicle_use, Some(VehicleUse::Commuting));
    assert_eq!(vehicle.days_per_week, Some(3));
    assert_eq!(vehicle.one_way_miles, Some(12));
    assert_eq!(vehicle.blind_spot_warning_equipped, Some(false));

    // The gate affirmation and the tool-finalised identification each advanced
    // without waiting for the user.
    let identify = Phase::Vehicle(VehicleStep::VinOrYearMakeBody);
    let asked = oracle.asked();
    assert!(asked.windows(2).any(|pair| pair == [identify, Phase::Vehicle(VehicleStep::Use)]));
    assert!(!asked.windows(2).any(|pair| pair == [Phase::VehicleGate, identify]));
}

#[tokio::test]
async fn tool_finalised_identification_stores_two_bot_messages() {
    let runtime = runtime_with(Arc::new(EchoOracle::new()), RuntimeSettings::default());
    let session = runtime.create_session().await.expect("session");
    answer_all(&runtime, session.id, &["95014", "Jane Doe", "jane@example.com", "yes"]).await;
    let bots_before = runtime.count_messages(session.id, Sender::Bot).await.expect("count");

    let reply = say(&runtime, session.id, "2019 Ford Sedan").await;

    assert_eq!(reply, "Next question after use.");
    let bots_after = runtime.count_messages(session.id, Sender::Bot).await.expect("count");
    assert_eq!(bots_after - bots_before, 2);
    let snapshot = runtime.session_snapshot(session.id).await.expect("snapshot");
    assert_eq!(snapshot.phase, Phase::Vehicle(VehicleStep::Use));
}

#[tokio::test]
async fn each_affirmed_gate_adds_one_vehicle() {
    let runtime = runtime_with(Arc::new(EchoOracle::new()), RuntimeSettings::default());
    let session = runtime.create_session().await.expect("session");
    answer_all(&runtime, session.id, &["95014", "Jane Doe", "jane@example.com"]).await;

    for (index, description) in ["2019 Ford Sedan", "2021 Honda Coupe", "2015 Ram Truck"]
        .into_iter()
        .enumerate()
    {
        say(&runtime, session.id, "yes").await;
        answer_all(&runtime, session.id, &[description, "business", "9000", "yes"]).await;
        let snapshot = runtime.session_snapshot(session.id).await.expect("snapshot");
        assert_eq!(snapshot.vehicles.len(), index + 1);
        assert_eq!(snapshot.phase, Phase::VehicleGate);
    }

    say(&runtime, session.id, "no").await;
    let snapshot = runtime.session_snapshot(session.id).await.expect("snapshot");
    assert_eq!(snapshot.phase, Phase::LicenseType);
    assert!(snapshot.vehicles.iter().all(|vehicle| vehicle.annual_mileage == Some(9000)));
    assert!(snapshot
        .vehicles
        .iter()
        .all(|vehicle| vehicle.blind_spot_warning_equipped == Some(true)));
}

#[tokio::test]
async fn exhausted_auto_advance_replies_with_failure_message() {
    let settings = RuntimeSettings { max_auto_advance: 1, ..RuntimeSettings::default() };
    let runtime = runtime_with(Arc::new(EchoOracle::new()), settings);
    let session = runtime.create_session().await.expect("session");
    answer_all(&runtime, session.id, &["95014", "Jane Doe", "jane@example.com"]).await;

    let reply = say(&runtime, session.id, "yes").await;

    assert_eq!(reply, AUTO_ADVANCE_FAILURE_REPLY);
    let snapshot = runtime.session_snapshot(session.id).await.expect("snapshot");
    assert_eq!(snapshot.phase, Phase::Vehicle(VehicleStep::VinOrYearMakeBody));
    assert!(!snapshot.session.vehicle_gate_answered);
}

#[tokio::test]
async fn unusable_lookup_result_leaves_state_unchanged() {
    let runtime =
        runtime_with(Arc::new(EchoOracle::with_identify(empty_lookup)), RuntimeSettings::default());
    let session = runtime.create_session().await.expect("session");
    answer_all(&runtime, session.id, &["95014", "Jane Doe", "jane@example.com", "yes"]).await;

    let reply = say(&runtime, session.id, "something with wheels").await;

    assert_eq!(reply, AUTO_ADVANCE_FAILURE_REPLY);
    let snapshot = runtime.session_snapshot(session.id).await.expect("snapshot");
    assert_eq!(snapshot.phase, Phase::Vehicle(VehicleStep::VinOrYearMakeBody));
    assert_eq!(snapshot.vehicles.len(), 1);
    assert_eq!(snapshot.vehicles[0].make, None);
}

#[tokio::test]
async fn escalation_keeps_the_current_question() {
    let runtime = runtime_with(Arc::new(EchoOracle::new()), RuntimeSettings::default());
    let session = runtime.create_session().await.expect("session");
    answer_all(&runtime, session.id, &["95014"]).await;

    let reply = say(&runtime, session.id, "just get me a human").await;

    assert_eq!(reply, "Here is a quote while I connect you to an agent.");
    let snapshot = runtime.session_snapshot(session.id).await.expect("snapshot");
    assert_eq!(snapshot.session.current_step, ChatStep::FullName);
    assert_eq!(snapshot.session.full_name, None);
}

#[tokio::test]
async fn completed_session_repeats_summary_without_asking_the_oracle() {
    let oracle = Arc::new(EchoOracle::new());
    let runtime = runtime_with(oracle.clone(), RuntimeSettings::default());
    let session = runtime.create_session().await.expect("session");
    answer_all(
        &runtime,
        session.id,
        &["95014", "Jane Doe", "jane@example.com", "no", "foreign", "suspended"],
    )
    .await;
    let asked_before = oracle.asked().len();

    let reply = say(&runtime, session.id, "anything else?").await;

    assert!(reply.contains("License Status: suspended"));
    assert!(!reply.contains("Vehicles:"));
    assert_eq!(oracle.asked().len(), asked_before);
}

#[tokio::test]
async fn fallback_answer_moves_on_to_the_next_question_when_the_oracle_is_down() {
    let oracle = Arc::new(DownOracle::default());
    let runtime =
        AgentRuntime::new(Stores::in_memory(), oracle.clone(), RuntimeSettings::default());
    let session = runtime.create_session().await.expect("session");

    say(&runtime, session.id, "95014").await;

    let snapshot = runtime.session_snapshot(session.id).await.expect("snapshot");
    assert_eq!(snapshot.session.current_step, ChatStep::FullName);
    assert_eq!(snapshot.session.zip_code.as_deref(), Some("95014"));
    // The zip-code reply was dropped; the stored turn was produced for full_name.
    assert_eq!(*oracle.asked.lock().expect("asked lock"), vec![Phase::ZipCode, Phase::FullName]);
    assert_eq!(runtime.count_messages(session.id, Sender::Bot).await.expect("count"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_turns_on_one_session_create_a_single_vehicle() {
    let runtime = Arc::new(runtime_with(Arc::new(EchoOracle::new()), RuntimeSettings::default()));
    let session = runtime.create_session().await.expect("session");
    answer_all(&runtime, session.id, &["95014", "Jane Doe", "jane@example.com"]).await;
    runtime.append_message(session.id, Sender::User, "yes").await.expect("user message stored");

    let turn = |correlation_id: &'static str| {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.generate_bot_message(session.id, correlation_id).await })
    };
    let (first, second) = tokio::join!(turn("req-first"), turn("req-second"));
    first.expect("first task").expect("first turn");
    second.expect("second task").expect("second turn");

    let snapshot = runtime.session_snapshot(session.id).await.expect("snapshot");
    assert_eq!(snapshot.vehicles.len(), 1);
    assert_eq!(snapshot.phase, Phase::Vehicle(VehicleStep::VinOrYearMakeBody));
}
