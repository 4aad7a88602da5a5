use intake_core::domain::session::Session;
use intake_core::domain::vehicle::Vehicle;

use super::session::update_session;
use super::vehicle::{insert_vehicle, update_vehicle};
use super::{RepositoryError, TransitionRepository, VehicleWrite};
use crate::DbPool;

pub struct SqlTransitionRepository {
    pool: DbPool,
}

impl SqlTransitionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TransitionRepository for SqlTransitionRepository {
    async fn commit(
        &self,
        session: &Session,
        vehicle: VehicleWrite<'_>,
    ) -> Result<Option<Vehicle>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let inserted = match vehicle {
            VehicleWrite::Unchanged => None,
            VehicleWrite::Insert(draft) => Some(insert_vehicle(&mut tx, draft).await?),
            VehicleWrite::Update(vehicle) => {
                update_vehicle(&mut tx, vehicle).await?;
                None
            }
        };
        update_session(&mut tx, session).await?;

        tx.commit().await?;
        Ok(inserted)
    }
}
