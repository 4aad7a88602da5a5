use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use intake_core::domain::message::{Message, MessageId, Sender};
use intake_core::domain::session::{Session, SessionId};
use intake_core::domain::vehicle::{Vehicle, VehicleId};

use super::{
    MessageRepository, RepositoryError, SessionRepository, TransitionRepository, VehicleRepository,
    VehicleWrite,
};

/// Rows keyed by identity; identities are handed out sequentially from 1.
struct Table<T> {
    rows: BTreeMap<i64, T>,
    next_id: i64,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self { rows: BTreeMap::new(), next_id: 1 }
    }
}

impl<T> Table<T> {
    fn allocate(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<Table<Session>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self, now: DateTime<Utc>) -> Result<Session, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let session = Session::new(SessionId(sessions.allocate()), now);
        sessions.rows.insert(session.id.0, session.clone());
        Ok(session)
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.rows.get(&id.0).cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        match sessions.rows.get_mut(&session.id.0) {
            Some(stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound { entity: "session", id: session.id.0 }),
        }
    }
}

#[derive(Default)]
pub struct InMemoryVehicleRepository {
    vehicles: RwLock<Table<Vehicle>>,
}

#[async_trait::async_trait]
impl VehicleRepository for InMemoryVehicleRepository {
    async fn find_by_id(&self, id: VehicleId) -> Result<Option<Vehicle>, RepositoryError> {
        let vehicles = self.vehicles.read().await;
        Ok(vehicles.rows.get(&id.0).cloned())
    }

    async fn list_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Vehicle>, RepositoryError> {
        let vehicles = self.vehicles.read().await;
        Ok(vehicles
            .rows
            .values()
            .filter(|vehicle| vehicle.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn save(&self, vehicle: &Vehicle) -> Result<(), RepositoryError> {
        let mut vehicles = self.vehicles.write().await;
        match vehicles.rows.get_mut(&vehicle.id.0) {
            Some(stored) => {
                *stored = vehicle.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound { entity: "vehicle", id: vehicle.id.0 }),
        }
    }
}

/// Commits against the in-memory session and vehicle tables while holding
/// both write locks.
pub struct InMemoryTransitionRepository {
    sessions: Arc<InMemorySessionRepository>,
    vehicles: Arc<InMemoryVehicleRepository>,
}

impl InMemoryTransitionRepository {
    pub fn new(
        sessions: Arc<InMemorySessionRepository>,
        vehicles: Arc<InMemoryVehicleRepository>,
    ) -> Self {
        Self { sessions, vehicles }
    }
}

#[async_trait::async_trait]
impl TransitionRepository for InMemoryTransitionRepository {
    async fn commit(
        &self,
        session: &Session,
        vehicle: VehicleWrite<'_>,
    ) -> Result<Option<Vehicle>, RepositoryError> {
        let mut vehicles = self.vehicles.vehicles.write().await;
        let mut sessions = self.sessions.sessions.write().await;

        let Some(stored_session) = sessions.rows.get_mut(&session.id.0) else {
            return Err(RepositoryError::NotFound { entity: "session", id: session.id.0 });
        };
        let inserted = match vehicle {
            VehicleWrite::Unchanged => None,
            VehicleWrite::Insert(draft) => {
                let vehicle = Vehicle { id: VehicleId(vehicles.allocate()), ..draft.clone() };
                vehicles.rows.insert(vehicle.id.0, vehicle.clone());
                Some(vehicle)
            }
            VehicleWrite::Update(vehicle) => {
                let Some(stored) = vehicles.rows.get_mut(&vehicle.id.0) else {
                    return Err(RepositoryError::NotFound { entity: "vehicle", id: vehicle.id.0 });
                };
                *stored = vehicle.clone();
                None
            }
        };
        *stored_session = session.clone();
        Ok(inserted)
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Table<Message>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(
        &self,
        session_id: SessionId,
        sender: Sender,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, RepositoryError> {
        let mut messages = self.messages.write().await;
        let message = Message {
            id: MessageId(messages.allocate()),
            session_id,
            sender,
            content: content.to_string(),
            created_at: now,
        };
        messages.rows.insert(message.id.0, message.clone());
        Ok(message)
    }

    async fn list_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .rows
            .values()
            .filter(|message| message.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn recent(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut all = self.list_for_session(session_id).await?;
        let skip = all.len().saturating_sub(limit);
        Ok(all.split_off(skip))
    }

    async fn count_by_sender(
        &self,
        session_id: SessionId,
        sender: Sender,
    ) -> Result<i64, RepositoryError> {
        let messages = self.messages.read().await;
        let count = messages
            .rows
            .values()
            .filter(|message| message.session_id == session_id && message.sender == sender)
            .count();
        Ok(count as i64)
    }
}
