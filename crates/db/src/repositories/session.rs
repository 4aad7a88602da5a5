use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use intake_core::domain::session::{
    ChatStep, LicenseStatus, LicenseType, Session, SessionId, VehicleStep,
};

use super::{decode, parse_timestamp, RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str = "id, current_step, vehicle_step, zip_code, full_name, email,
     license_type, license_status, vehicle_gate_answered, created_at, updated_at";

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, RepositoryError> {
    let current_step: String = row.try_get("current_step").map_err(decode)?;
    let vehicle_step: Option<String> = row.try_get("vehicle_step").map_err(decode)?;
    let license_type: Option<String> = row.try_get("license_type").map_err(decode)?;
    let license_status: Option<String> = row.try_get("license_status").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    let vehicle_step =
        vehicle_step.map(|step| step.parse::<VehicleStep>()).transpose().map_err(decode)?;
    let license_type =
        license_type.map(|kind| kind.parse::<LicenseType>()).transpose().map_err(decode)?;
    let license_status =
        license_status.map(|status| status.parse::<LicenseStatus>()).transpose().map_err(decode)?;

    Ok(Session {
        id: SessionId(row.try_get("id").map_err(decode)?),
        current_step: current_step.parse::<ChatStep>().map_err(decode)?,
        vehicle_step,
        zip_code: row.try_get("zip_code").map_err(decode)?,
        full_name: row.try_get("full_name").map_err(decode)?,
        email: row.try_get("email").map_err(decode)?,
        license_type,
        license_status,
        vehicle_gate_answered: row.try_get("vehicle_gate_answered").map_err(decode)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn create(&self, now: DateTime<Utc>) -> Result<Session, RepositoryError> {
        let id = sqlx::query(
            "INSERT INTO sessions (current_step, created_at, updated_at) VALUES ('zip_code', ?, ?)",
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.find_by_id(SessionId(id))
            .await?
            .ok_or(RepositoryError::NotFound { entity: "session", id })
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        update_session(&mut conn, session).await
    }
}

pub(super) async fn update_session(
    conn: &mut SqliteConnection,
    session: &Session,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE sessions SET
             current_step = ?,
             vehicle_step = ?,
             zip_code = ?,
             full_name = ?,
             email = ?,
             license_type = ?,
             license_status = ?,
             vehicle_gate_answered = ?,
             updated_at = ?
         WHERE id = ?",
    )
    .bind(session.current_step.as_str())
    .bind(session.vehicle_step.map(|step| step.as_str()))
    .bind(&session.zip_code)
    .bind(&session.full_name)
    .bind(&session.email)
    .bind(session.license_type.map(|kind| kind.as_str()))
    .bind(session.license_status.map(|status| status.as_str()))
    .bind(session.vehicle_gate_answered)
    .bind(session.updated_at.to_rfc3339())
    .bind(session.id.0)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound { entity: "session", id: session.id.0 });
    }
    Ok(())
}
