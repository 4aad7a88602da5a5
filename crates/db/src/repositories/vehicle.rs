use sqlx::{Row, SqliteConnection};

use intake_core::domain::session::SessionId;
use intake_core::domain::vehicle::{Vehicle, VehicleId, VehicleUse};

use super::{decode, parse_timestamp, RepositoryError, VehicleRepository};
use crate::DbPool;

pub struct SqlVehicleRepository {
    pool: DbPool,
}

impl SqlVehicleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const VEHICLE_COLUMNS: &str = "id, session_id, vin, year, make, body_type, vehicle_use,
     blind_spot_warning_equipped, days_per_week, one_way_miles, annual_mileage, created_at";

fn narrow<T: TryFrom<i64>>(
    column: &str,
    value: Option<i64>,
) -> Result<Option<T>, RepositoryError> {
    value
        .map(|raw| {
            T::try_from(raw).map_err(|_| {
                RepositoryError::Decode(format!("{column} value {raw} is out of range"))
            })
        })
        .transpose()
}

fn row_to_vehicle(row: &sqlx::sqlite::SqliteRow) -> Result<Vehicle, RepositoryError> {
    let vehicle_use: Option<String> = row.try_get("vehicle_use").map_err(decode)?;
    let year: Option<i64> = row.try_get("year").map_err(decode)?;
    let days_per_week: Option<i64> = row.try_get("days_per_week").map_err(decode)?;
    let one_way_miles: Option<i64> = row.try_get("one_way_miles").map_err(decode)?;
    let annual_mileage: Option<i64> = row.try_get("annual_mileage").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let vehicle_use =
        vehicle_use.map(|kind| kind.parse::<VehicleUse>()).transpose().map_err(decode)?;

    Ok(Vehicle {
        id: VehicleId(row.try_get("id").map_err(decode)?),
        session_id: SessionId(row.try_get("session_id").map_err(decode)?),
        vin: row.try_get("vin").map_err(decode)?,
        year: narrow("year", year)?,
        make: row.try_get("make").map_err(decode)?,
        body_type: row.try_get("body_type").map_err(decode)?,
        vehicle_use,
        blind_spot_warning_equipped: row.try_get("blind_spot_warning_equipped").map_err(decode)?,
        days_per_week: narrow("days_per_week", days_per_week)?,
        one_way_miles: narrow("one_way_miles", one_way_miles)?,
        annual_mileage: narrow("annual_mileage", annual_mileage)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl VehicleRepository for SqlVehicleRepository {
    async fn find_by_id(&self, id: VehicleId) -> Result<Option<Vehicle>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_vehicle).transpose()
    }

    async fn list_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Vehicle>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE session_id = ? ORDER BY id ASC"
        ))
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_vehicle).collect()
    }

    async fn save(&self, vehicle: &Vehicle) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        update_vehicle(&mut conn, vehicle).await
    }
}

/// Inserts a draft vehicle and returns it under its allocated id.
pub(super) async fn insert_vehicle(
    conn: &mut SqliteConnection,
    draft: &Vehicle,
) -> Result<Vehicle, RepositoryError> {
    let id = sqlx::query(
        "INSERT INTO vehicles (session_id, vin, year, make, body_type, vehicle_use,
             blind_spot_warning_equipped, days_per_week, one_way_miles, annual_mileage, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(draft.session_id.0)
    .bind(&draft.vin)
    .bind(draft.year)
    .bind(&draft.make)
    .bind(&draft.body_type)
    .bind(draft.vehicle_use.map(|kind| kind.as_str()))
    .bind(draft.blind_spot_warning_equipped)
    .bind(draft.days_per_week.map(i64::from))
    .bind(draft.one_way_miles.map(i64::from))
    .bind(draft.annual_mileage.map(i64::from))
    .bind(draft.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(Vehicle { id: VehicleId(id), ..draft.clone() })
}

pub(super) async fn update_vehicle(
    conn: &mut SqliteConnection,
    vehicle: &Vehicle,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE vehicles SET
             vin = ?,
             year = ?,
             make = ?,
             body_type = ?,
             vehicle_use = ?,
             blind_spot_warning_equipped = ?,
             days_per_week = ?,
             one_way_miles = ?,
             annual_mileage = ?
         WHERE id = ?",
    )
    .bind(&vehicle.vin)
    .bind(vehicle.year)
    .bind(&vehicle.make)
    .bind(&vehicle.body_type)
    .bind(vehicle.vehicle_use.map(|kind| kind.as_str()))
    .bind(vehicle.blind_spot_warning_equipped)
    .bind(vehicle.days_per_week.map(i64::from))
    .bind(vehicle.one_way_miles.map(i64::from))
    .bind(vehicle.annual_mileage.map(i64::from))
    .bind(vehicle.id.0)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound { entity: "vehicle", id: vehicle.id.0 });
    }
    Ok(())
}
