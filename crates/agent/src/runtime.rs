use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use intake_core::config::ConversationConfig;
use intake_core::domain::message::{Message, Sender};
use intake_core::domain::session::{Session, SessionField, SessionId};
use intake_core::domain::vehicle::{Vehicle, VehicleField, VehicleId};
use intake_core::errors::{ApplicationError, DomainError};
use intake_core::flows::vehicle_loop::active_vehicle;
use intake_core::flows::{
    FlowAction, FlowContext, FlowEngine, FlowEvent, FlowTransitionError, IntakeFlow, Phase,
    TransitionOutcome,
};
use intake_core::interpret::{OracleVerdict, Resolution, ResponseInterpreter};
use intake_db::{
    DbPool, InMemoryMessageRepository, InMemorySessionRepository, InMemoryTransitionRepository,
    InMemoryVehicleRepository, MessageRepository, SessionRepository, SqlMessageRepository,
    SqlSessionRepository, SqlTransitionRepository, SqlVehicleRepository, TransitionRepository,
    VehicleRepository, VehicleWrite,
};

use crate::conversation::{
    completion_message, latest_reply_affirms_gate, latest_user_text, AUTO_ADVANCE_FAILURE_REPLY,
};
use crate::oracle::{OracleAdapter, OracleReply};
use crate::prompts::OracleRequest;

#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionRepository>,
    pub vehicles: Arc<dyn VehicleRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub transitions: Arc<dyn TransitionRepository>,
}

impl Stores {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            sessions: Arc::new(SqlSessionRepository::new(pool.clone())),
            vehicles: Arc::new(SqlVehicleRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(pool.clone())),
            transitions: Arc::new(SqlTransitionRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        let sessions = Arc::new(InMemorySessionRepository::default());
        let vehicles = Arc::new(InMemoryVehicleRepository::default());
        Self {
            transitions: Arc::new(InMemoryTransitionRepository::new(
                sessions.clone(),
                vehicles.clone(),
            )),
            sessions,
            vehicles,
            messages: Arc::new(InMemoryMessageRepository::default()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Upper bound on oracle round trips and self-advances within one turn.
    pub max_auto_advance: u32,
    pub history_window: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self { max_auto_advance: 5, history_window: 15 }
    }
}

impl From<&ConversationConfig> for RuntimeSettings {
    fn from(config: &ConversationConfig) -> Self {
        Self { max_auto_advance: config.max_auto_advance, history_window: config.history_window }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub phase: Phase,
    pub vehicles: Vec<Vehicle>,
}

/// Drives intake turns: observe the stored conversation, ask the oracle,
/// reconcile its verdict, commit the transition and decide whether to advance
/// again without waiting for the user.
pub struct AgentRuntime {
    stores: Stores,
    oracle: Arc<dyn OracleAdapter>,
    engine: FlowEngine<IntakeFlow>,
    interpreter: ResponseInterpreter,
    settings: RuntimeSettings,
    session_locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

/// What one loop iteration decided.
enum Step {
    /// Store this reply and end the turn.
    Reply(String),
    /// State moved without new user input; ask again for the new phase.
    Advance,
}

impl AgentRuntime {
    pub fn new(stores: Stores, oracle: Arc<dyn OracleAdapter>, settings: RuntimeSettings) -> Self {
        Self {
            stores,
            oracle,
            engine: FlowEngine::default(),
            interpreter: ResponseInterpreter,
            settings,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create_session(&self) -> Result<Session, ApplicationError> {
        let session = self.stores.sessions.create(Utc::now()).await?;
        info!(event_name = "session.created", session_id = session.id.0, "intake session created");
        Ok(session)
    }

    pub async fn session_snapshot(
        &self,
        session_id: SessionId,
    ) -> Result<SessionSnapshot, ApplicationError> {
        let session = self.require_session(session_id).await?;
        let vehicles = self.stores.vehicles.list_for_session(session_id).await?;
        Ok(SessionSnapshot { phase: Phase::of(&session), session, vehicles })
    }

    /// Stores a message without touching conversation state.
    pub async fn append_message(
        &self,
        session_id: SessionId,
        sender: Sender,
        content: &str,
    ) -> Result<Message, ApplicationError> {
        self.require_session(session_id).await?;
        Ok(self.stores.messages.append(session_id, sender, content, Utc::now()).await?)
    }

    pub async fn list_messages(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Message>, ApplicationError> {
        self.require_session(session_id).await?;
        Ok(self.stores.messages.list_for_session(session_id).await?)
    }

    pub async fn count_messages(
        &self,
        session_id: SessionId,
        sender: Sender,
    ) -> Result<i64, ApplicationError> {
        self.require_session(session_id).await?;
        Ok(self.stores.messages.count_by_sender(session_id, sender).await?)
    }

    pub async fn save_session_field(
        &self,
        session_id: SessionId,
        attribute: &str,
        value: &str,
    ) -> Result<Session, ApplicationError> {
        let field = SessionField::parse(attribute, value)?;
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.require_session(session_id).await?;
        session.apply(field);
        session.updated_at = Utc::now();
        self.stores.sessions.save(&session).await?;
        info!(
            event_name = "session.field_saved",
            session_id = session_id.0,
            attribute,
            "session field saved"
        );
        Ok(session)
    }

    pub async fn save_vehicle_field(
        &self,
        vehicle_id: VehicleId,
        attribute: &str,
        value: &str,
    ) -> Result<Vehicle, ApplicationError> {
        let field = VehicleField::parse(attribute, value)?;
        let owner = self.require_vehicle(vehicle_id).await?.session_id;
        let lock = self.session_lock(owner).await;
        let _guard = lock.lock().await;

        let mut vehicle = self.require_vehicle(vehicle_id).await?;
        vehicle.apply(field);
        self.stores.vehicles.save(&vehicle).await?;
        info!(
            event_name = "vehicle.field_saved",
            vehicle_id = vehicle_id.0,
            attribute,
            "vehicle field saved"
        );
        Ok(vehicle)
    }

    /// Runs one full turn and returns the last bot message it stored.
    pub async fn generate_bot_message(
        &self,
        session_id: SessionId,
        correlation_id: &str,
    ) -> Result<Message, ApplicationError> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.require_session(session_id).await?;
        if session.repair_license_steps() {
            info!(
                event_name = "session.steps_repaired",
                correlation_id,
                session_id = session_id.0,
                step = session.current_step.as_str(),
                "license steps repaired"
            );
            self.persist_session(&mut session).await?;
        }

        let history = self.recent_history(session_id).await?;
        if !session.vehicle_gate_answered
            && remembers_gate_answer(Phase::of(&session))
            && latest_reply_affirms_gate(&history)
        {
            session.vehicle_gate_answered = true;
            self.persist_session(&mut session).await?;
            info!(
                event_name = "session.gate_affirmed",
                correlation_id,
                session_id = session_id.0,
                "vehicle gate affirmed"
            );
        }
        let user_text = latest_user_text(&history).unwrap_or_default().to_string();

        let mut advancing = false;
        let mut iterations = 0;
        let content = loop {
            if iterations >= self.settings.max_auto_advance {
                warn!(
                    event_name = "agent.auto_advance_exhausted",
                    correlation_id,
                    session_id = session_id.0,
                    iterations,
                    "auto-advance limit reached"
                );
                break AUTO_ADVANCE_FAILURE_REPLY.to_string();
            }
            iterations += 1;

            let step = if advancing {
                self.ask_again(&session, correlation_id).await?
            } else {
                self.interpret_turn(&mut session, &user_text, correlation_id).await?
            };
            match step {
                Step::Reply(content) => break content,
                Step::Advance => advancing = true,
            }
        };

        Ok(self.stores.messages.append(session_id, Sender::Bot, &content, Utc::now()).await?)
    }

    /// First pass of a turn: interpret the latest user reply for the current phase.
    async fn interpret_turn(
        &self,
        session: &mut Session,
        user_text: &str,
        correlation_id: &str,
    ) -> Result<Step, ApplicationError> {
        let vehicles = self.stores.vehicles.list_for_session(session.id).await?;
        let phase = Phase::of(session);
        if phase == Phase::Complete {
            return Ok(Step::Reply(completion_message(session, &vehicles)));
        }

        if phase == Phase::VehicleGate && session.vehicle_gate_answered {
            let interpretation =
                self.interpreter.interpret(phase, user_text, &OracleVerdict::invalid(), true);
            let advanced = match interpretation.event(phase) {
                Some(event) if interpretation.is_short_circuit() => {
                    self.advance(session, phase, event, &vehicles, correlation_id).await?.is_some()
                }
                _ => false,
            };
            return Ok(if advanced {
                Step::Advance
            } else {
                Step::Reply(AUTO_ADVANCE_FAILURE_REPLY.to_string())
            });
        }

        let reply = self.ask_oracle(session, phase, vehicles.clone(), correlation_id).await?;
        let interpretation = self.interpreter.interpret(
            phase,
            user_text,
            &reply.verdict,
            session.vehicle_gate_answered,
        );
        info!(
            event_name = "agent.reply_interpreted",
            correlation_id,
            session_id = session.id.0,
            phase = phase.label(),
            valid = interpretation.valid,
            resolution = ?interpretation.resolution,
            "user reply interpreted"
        );

        if interpretation.is_escalation() {
            info!(
                event_name = "agent.escalated",
                correlation_id,
                session_id = session.id.0,
                "user handed over to an agent"
            );
            return Ok(Step::Reply(reply.content));
        }
        let Some(event) = interpretation.event(phase) else {
            return Ok(Step::Reply(reply.content));
        };

        let Some(outcome) = self.advance(session, phase, event, &vehicles, correlation_id).await?
        else {
            return Ok(Step::Reply(AUTO_ADVANCE_FAILURE_REPLY.to_string()));
        };

        if outcome.to == Phase::Complete {
            let vehicles = self.stores.vehicles.list_for_session(session.id).await?;
            return Ok(Step::Reply(completion_message(session, &vehicles)));
        }
        if interpretation.resolution == Resolution::ToolResult && outcome.filled_vehicle_identity()
        {
            self.stores.messages.append(session.id, Sender::Bot, &reply.content, Utc::now()).await?;
            return Ok(Step::Advance);
        }
        if interpretation.resolution == Resolution::Fallback && !reply.verdict.valid {
            // The oracle's content still asks for the old phase.
            return Ok(Step::Advance);
        }
        Ok(Step::Reply(reply.content))
    }

    /// Re-entry pass: the state already moved, so only the question for the
    /// new phase is wanted and the oracle's validity guess is ignored.
    async fn ask_again(
        &self,
        session: &Session,
        correlation_id: &str,
    ) -> Result<Step, ApplicationError> {
        let vehicles = self.stores.vehicles.list_for_session(session.id).await?;
        let phase = Phase::of(session);
        if phase == Phase::Complete {
            return Ok(Step::Reply(completion_message(session, &vehicles)));
        }
        let reply = self.ask_oracle(session, phase, vehicles, correlation_id).await?;
        Ok(Step::Reply(reply.content))
    }

    async fn ask_oracle(
        &self,
        session: &Session,
        phase: Phase,
        vehicles: Vec<Vehicle>,
        correlation_id: &str,
    ) -> Result<OracleReply, ApplicationError> {
        let history = self.recent_history(session.id).await?;
        let request = OracleRequest { phase, session: session.clone(), vehicles, history };
        Ok(self.oracle.respond(&request, correlation_id).await)
    }

    /// Applies the event and commits its actions. `None` means the flow refused
    /// the event and nothing changed.
    async fn advance(
        &self,
        session: &mut Session,
        phase: Phase,
        event: FlowEvent,
        vehicles: &[Vehicle],
        correlation_id: &str,
    ) -> Result<Option<TransitionOutcome>, ApplicationError> {
        let mut active = active_vehicle(vehicles).cloned();
        let context = FlowContext {
            active_vehicle: active.as_ref().map(|vehicle| vehicle.id),
            vehicle_count: vehicles.len(),
        };
        let Ok(outcome) = self.engine.apply_logged(&phase, &event, &context, correlation_id) else {
            return Ok(None);
        };

        let mut vehicle_created = false;
        let mut vehicle_changed = false;
        for action in &outcome.actions {
            match action {
                FlowAction::SetSessionField(field) => session.apply(field.clone()),
                FlowAction::CreateVehicle => {
                    // The id is assigned when the transition commits.
                    active = Some(Vehicle::new(VehicleId(0), session.id, Utc::now()));
                    vehicle_created = true;
                }
                FlowAction::SetVehicleField(field) => {
                    let vehicle = active.as_mut().ok_or(DomainError::FlowTransition(
                        FlowTransitionError::NoActiveVehicle { phase },
                    ))?;
                    vehicle.apply(field.clone());
                    vehicle_changed = true;
                }
                FlowAction::ClearGateAffirmation => session.vehicle_gate_answered = false,
                FlowAction::CompleteIntake => info!(
                    event_name = "session.completed",
                    correlation_id,
                    session_id = session.id.0,
                    "intake complete"
                ),
            }
        }

        let (current_step, vehicle_step) = outcome.to.steps();
        if current_step.ordinal() < session.current_step.ordinal() {
            return Err(DomainError::InvariantViolation(format!(
                "session {} would regress from {} to {}",
                session.id,
                session.current_step.as_str(),
                current_step.as_str()
            ))
            .into());
        }
        session.current_step = current_step;
        session.vehicle_step = vehicle_step;
        session.check_invariants()?;

        let write = match &active {
            Some(vehicle) if vehicle_created => VehicleWrite::Insert(vehicle),
            Some(vehicle) if vehicle_changed => VehicleWrite::Update(vehicle),
            _ => VehicleWrite::Unchanged,
        };
        session.updated_at = Utc::now();
        if let Some(vehicle) = self.stores.transitions.commit(session, write).await? {
            info!(
                event_name = "vehicle.created",
                correlation_id,
                session_id = session.id.0,
                vehicle_id = vehicle.id.0,
                "vehicle created"
            );
        }
        Ok(Some(outcome))
    }

    async fn persist_session(&self, session: &mut Session) -> Result<(), ApplicationError> {
        session.updated_at = Utc::now();
        Ok(self.stores.sessions.save(session).await?)
    }

    async fn recent_history(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Message>, ApplicationError> {
        Ok(self.stores.messages.recent(session_id, self.settings.history_window).await?)
    }

    async fn require_session(&self, session_id: SessionId) -> Result<Session, ApplicationError> {
        self.stores
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            })
    }

    async fn require_vehicle(&self, vehicle_id: VehicleId) -> Result<Vehicle, ApplicationError> {
        self.stores
            .vehicles
            .find_by_id(vehicle_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound {
                entity: "vehicle",
                id: vehicle_id.to_string(),
            })
    }

    /// Hands out the session's write lock. Entries nobody else holds are
    /// idle and get dropped here, so the map only tracks sessions in flight.
    async fn session_lock(&self, session_id: SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks.retain(|id, lock| *id == session_id || Arc::strong_count(lock) > 1);
        locks.entry(session_id).or_default().clone()
    }
}

/// Phases in which an earlier "yes" to the add-vehicle question is remembered.
fn remembers_gate_answer(phase: Phase) -> bool {
    matches!(phase, Phase::ZipCode | Phase::FullName | Phase::Email | Phase::VehicleGate)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use intake_core::domain::message::Sender;
    use intake_core::domain::session::{ChatStep, LicenseType};
    use intake_core::errors::ApplicationError;
    use intake_core::interpret::OracleVerdict;

    use super::{AgentRuntime, RuntimeSettings, Stores};
    use crate::oracle::{OracleAdapter, OracleReply};
    use crate::prompts::OracleRequest;

    struct SilentOracle;

    #[async_trait]
    impl OracleAdapter for SilentOracle {
        async fn respond(&self, _request: &OracleRequest, _correlation_id: &str) -> OracleReply {
            OracleReply {
                content: "Could you repeat that?".to_string(),
                verdict: OracleVerdict::invalid(),
            }
        }
    }

    fn runtime() -> AgentRuntime {
        AgentRuntime::new(Stores::in_memory(), Arc::new(SilentOracle), RuntimeSettings::default())
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let error = runtime()
            .append_message(intake_core::SessionId(77), Sender::User, "hi")
            .await
            .expect_err("missing session");
        assert!(matches!(error, ApplicationError::NotFound { entity: "session", .. }));
    }

    #[tokio::test]
    async fn field_save_rejects_unknown_attribute() {
        let runtime = runtime();
        let session = runtime.create_session().await.expect("session");
        let error = runtime
            .save_session_field(session.id, "favorite_color", "blue")
            .await
            .expect_err("unknown attribute");
        assert!(matches!(error, ApplicationError::Domain(_)));
    }

    #[tokio::test]
    async fn license_steps_are_repaired_before_the_turn() {
        let runtime = runtime();
        let session = runtime.create_session().await.expect("session");
        runtime
            .save_session_field(session.id, "license_type", "commercial")
            .await
            .expect("license type saved");

        let mut stored = runtime.session_snapshot(session.id).await.expect("snapshot").session;
        stored.current_step = ChatStep::LicenseType;
        runtime.stores.sessions.save(&stored).await.expect("force step");

        runtime.generate_bot_message(session.id, "req-repair").await.expect("turn");
        let repaired = runtime.session_snapshot(session.id).await.expect("snapshot").session;
        assert_eq!(repaired.current_step, ChatStep::LicenseStatus);
        assert_eq!(repaired.license_type, Some(LicenseType::Commercial));
    }

    #[tokio::test]
    async fn rejected_reply_is_stored_as_reask_without_state_change() {
        let runtime = runtime();
        let session = runtime.create_session().await.expect("session");
        runtime.append_message(session.id, Sender::User, "not a zip").await.expect("append");

        let message = runtime.generate_bot_message(session.id, "req-reask").await.expect("turn");
        assert_eq!(message.content, "Could you repeat that?");
        assert_eq!(message.sender, Sender::Bot);
        let snapshot = runtime.session_snapshot(session.id).await.expect("snapshot");
        assert_eq!(snapshot.session.current_step, ChatStep::ZipCode);
        assert_eq!(runtime.count_messages(session.id, Sender::Bot).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn idle_session_locks_are_dropped() {
        let runtime = runtime();
        let first = runtime.create_session().await.expect("session");
        let second = runtime.create_session().await.expect("session");
        runtime.generate_bot_message(first.id, "req-first").await.expect("turn");

        let held = runtime.session_lock(second.id).await;
        let tracked: Vec<_> = runtime.session_locks.lock().await.keys().copied().collect();
        assert_eq!(tracked, vec![second.id]);

        let again = runtime.session_lock(second.id).await;
        assert!(Arc::ptr_eq(&held, &again), "a held lock is shared, not replaced");
    }
}
