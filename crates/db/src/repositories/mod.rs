use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use intake_core::domain::message::{Message, Sender};
use intake_core::domain::session::{Session, SessionId};
use intake_core::domain::vehicle::{Vehicle, VehicleId};
use intake_core::errors::ApplicationError;

pub mod memory;
pub mod message;
pub mod session;
pub mod transition;
pub mod vehicle;

pub use memory::{
    InMemoryMessageRepository, InMemorySessionRepository, InMemoryTransitionRepository,
    InMemoryVehicleRepository,
};
pub use message::SqlMessageRepository;
pub use session::SqlSessionRepository;
pub use transition::SqlTransitionRepository;
pub use vehicle::SqlVehicleRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound { entity, id } => {
                ApplicationError::NotFound { entity, id: id.to_string() }
            }
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Creates a session at the first step with nothing collected.
    async fn create(&self, now: DateTime<Utc>) -> Result<Session, RepositoryError>;
    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, RepositoryError>;
    async fn save(&self, session: &Session) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait VehicleRepository: Send + Sync {
    async fn find_by_id(&self, id: VehicleId) -> Result<Option<Vehicle>, RepositoryError>;
    /// Vehicles of a session in creation order.
    async fn list_for_session(&self, session_id: SessionId)
        -> Result<Vec<Vehicle>, RepositoryError>;
    async fn save(&self, vehicle: &Vehicle) -> Result<(), RepositoryError>;
}

/// Vehicle side of a committed flow transition.
#[derive(Clone, Copy, Debug)]
pub enum VehicleWrite<'a> {
    Unchanged,
    /// Insert this draft; its id is replaced by the allocated one.
    Insert(&'a Vehicle),
    Update(&'a Vehicle),
}

/// Commits the session and vehicle rows a flow transition touched, all or
/// nothing.
#[async_trait]
pub trait TransitionRepository: Send + Sync {
    /// Returns the inserted vehicle for [`VehicleWrite::Insert`].
    async fn commit(
        &self,
        session: &Session,
        vehicle: VehicleWrite<'_>,
    ) -> Result<Option<Vehicle>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(
        &self,
        session_id: SessionId,
        sender: Sender,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, RepositoryError>;
    /// All messages of a session in chronological order.
    async fn list_for_session(&self, session_id: SessionId)
        -> Result<Vec<Message>, RepositoryError>;
    /// The most recent `limit` messages, oldest first.
    async fn recent(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;
    async fn count_by_sender(
        &self,
        session_id: SessionId,
        sender: Sender,
    ) -> Result<i64, RepositoryError>;
}

pub(crate) fn decode<E: std::fmt::Display>(error: E) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)).map_err(decode)
}
