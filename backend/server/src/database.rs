//! # MySQL
//!
//! Relational store holding trips and everything hanging off them.
//!
//! ## Tables
//!
//! - `viajes`: trips, unique `access_code`, budget, one-shot `alerta_70_enviada` flag
//! - `viaje_miembros`: (trip, address) primary key, membership is a set
//! - `actividades`: priced, dated activities
//! - `actividad_votos`: (activity, address) primary key, last write wins
//! - `actividad_pagos`: (activity, address) primary key, last write wins
//!
//! Every child table cascades on trip deletion. Schema creation is not done here.
//!
//! ## Concurrency
//!
//! - No locks are taken; concurrent requests race freely
//! - Membership, votes and payments rely on `INSERT .. ON DUPLICATE KEY UPDATE`
//! - Join code collisions surface as [`StoreError::Duplicate`] and are retried by the caller
//! - Addresses are stored and compared lowercase
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ledger::{Activity, ActivityDraft, ActivityId, NewTrip, Payment, Trip, TripId, Vote};
use sqlx::{
    MySqlPool, Row,
    mysql::{MySqlPoolOptions, MySqlRow},
};

use crate::error::StoreError;

#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn trip(&self, trip_id: TripId) -> Result<Option<Trip>, StoreError>;

    async fn trip_by_code(&self, code: &str) -> Result<Option<Trip>, StoreError>;

    /// Trips owned or joined by `address`, newest first.
    async fn trips_for(&self, address: &str) -> Result<Vec<Trip>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] when the join code is taken.
    async fn insert_trip(&self, trip: &NewTrip) -> Result<TripId, StoreError>;

    async fn delete_trip(&self, trip_id: TripId) -> Result<(), StoreError>;

    /// Idempotent.
    async fn add_member(&self, trip_id: TripId, address: &str) -> Result<(), StoreError>;

    /// Lowercase union of members and owner, deduplicated and sorted.
    async fn members(&self, trip_id: TripId) -> Result<Vec<String>, StoreError>;

    async fn activity(&self, activity_id: ActivityId) -> Result<Option<Activity>, StoreError>;

    /// Newest first.
    async fn activities(&self, trip_id: TripId) -> Result<Vec<Activity>, StoreError>;

    async fn activities_starting_on(&self, date: NaiveDate) -> Result<Vec<Activity>, StoreError>;

    async fn insert_activity(
        &self,
        trip_id: TripId,
        draft: &ActivityDraft,
        created_by: Option<&str>,
    ) -> Result<ActivityId, StoreError>;

    /// Returns whether a row was removed.
    async fn delete_activity(
        &self,
        trip_id: TripId,
        activity_id: ActivityId,
    ) -> Result<bool, StoreError>;

    async fn upsert_vote(
        &self,
        activity_id: ActivityId,
        address: &str,
        in_favor: bool,
    ) -> Result<(), StoreError>;

    async fn votes(&self, trip_id: TripId) -> Result<Vec<Vote>, StoreError>;

    async fn activity_votes(&self, activity_id: ActivityId) -> Result<Vec<Vote>, StoreError>;

    /// Upserts a confirmed payment.
    async fn mark_paid(
        &self,
        activity_id: ActivityId,
        address: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn payment(
        &self,
        activity_id: ActivityId,
        address: &str,
    ) -> Result<Option<Payment>, StoreError>;

    async fn payments(&self, trip_id: TripId) -> Result<Vec<Payment>, StoreError>;

    async fn activity_payments(&self, activity_id: ActivityId) -> Result<Vec<Payment>, StoreError>;

    /// Flips the one-shot budget alert flag. There is no way back.
    async fn mark_budget_alert_sent(&self, trip_id: TripId) -> Result<(), StoreError>;
}

const TRIP_COLUMNS: &str = "v.id, v.nombre, v.access_code, COALESCE(v.user_email, v.user_sub) AS owner, \
     v.fecha_inicio, v.fecha_fin, CAST(v.presupuesto_total AS DOUBLE) AS presupuesto_total, \
     v.alerta_70_enviada, v.created_at";

const ACTIVITY_COLUMNS: &str = "a.id, a.viaje_id, a.nombre, CAST(a.precio AS DOUBLE) AS precio, \
     a.fecha_inicio, a.fecha_fin, a.created_by_email, a.created_at";

pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }
}

fn id(row: &MySqlRow, column: &str) -> Result<u64, sqlx::Error> {
    let raw: i64 = row.try_get(column)?;

    u64::try_from(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn flag(row: &MySqlRow, column: &str) -> Result<bool, sqlx::Error> {
    let raw: Option<i8> = row.try_get(column)?;

    Ok(raw == Some(1))
}

fn trip_from_row(row: &MySqlRow) -> Result<Trip, sqlx::Error> {
    Ok(Trip {
        id: id(row, "id")?,
        name: row.try_get("nombre")?,
        code: row.try_get("access_code")?,
        owner: row
            .try_get::<Option<String>, _>("owner")?
            .map(|owner| owner.to_lowercase()),
        starts_on: row.try_get("fecha_inicio")?,
        ends_on: row.try_get("fecha_fin")?,
        budget: row.try_get("presupuesto_total")?,
        budget_alert_sent: flag(row, "alerta_70_enviada")?,
        created_at: row.try_get("created_at")?,
    })
}

fn activity_from_row(row: &MySqlRow) -> Result<Activity, sqlx::Error> {
    Ok(Activity {
        id: id(row, "id")?,
        trip_id: id(row, "viaje_id")?,
        name: row.try_get("nombre")?,
        price: row.try_get::<Option<f64>, _>("precio")?.unwrap_or(0.0),
        starts_on: row.try_get("fecha_inicio")?,
        ends_on: row.try_get("fecha_fin")?,
        created_by: row.try_get("created_by_email")?,
        created_at: row.try_get("created_at")?,
    })
}

fn vote_from_row(row: &MySqlRow) -> Result<Vote, sqlx::Error> {
    Ok(Vote {
        activity_id: id(row, "actividad_id")?,
        address: row.try_get("user_email")?,
        in_favor: flag(row, "voto")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payment_from_row(row: &MySqlRow) -> Result<Payment, sqlx::Error> {
    Ok(Payment {
        activity_id: id(row, "actividad_id")?,
        address: row.try_get("user_email")?,
        paid: flag(row, "pagado")?,
        paid_at: row.try_get("fecha_pago")?,
    })
}

fn collect<T>(
    rows: Vec<MySqlRow>,
    map: fn(&MySqlRow) -> Result<T, sqlx::Error>,
) -> Result<Vec<T>, StoreError> {
    rows.iter()
        .map(|row| map(row).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl Store for MySqlStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;

        Ok(())
    }

    async fn trip(&self, trip_id: TripId) -> Result<Option<Trip>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TRIP_COLUMNS} FROM viajes v WHERE v.id = ? LIMIT 1"))
            .bind(trip_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(trip_from_row).transpose()?)
    }

    async fn trip_by_code(&self, code: &str) -> Result<Option<Trip>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TRIP_COLUMNS} FROM viajes v WHERE v.access_code = ? LIMIT 1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(trip_from_row).transpose()?)
    }

    async fn trips_for(&self, address: &str) -> Result<Vec<Trip>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT {TRIP_COLUMNS} \
             FROM viajes v \
             LEFT JOIN viaje_miembros m ON m.viaje_id = v.id AND m.user_email = ? \
             WHERE v.user_email = ? OR v.user_sub = ? OR m.user_email IS NOT NULL \
             ORDER BY v.id DESC"
        ))
        .bind(address)
        .bind(address)
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        collect(rows, trip_from_row)
    }

    async fn insert_trip(&self, trip: &NewTrip) -> Result<TripId, StoreError> {
        let result = sqlx::query(
            "INSERT INTO viajes \
             (nombre, user_email, user_sub, access_code, fecha_inicio, fecha_fin, presupuesto_total) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trip.name)
        .bind(&trip.owner)
        .bind(&trip.owner)
        .bind(&trip.code)
        .bind(trip.starts_on)
        .bind(trip.ends_on)
        .bind(trip.budget)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_id())
    }

    async fn delete_trip(&self, trip_id: TripId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM viajes WHERE id = ?")
            .bind(trip_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn add_member(&self, trip_id: TripId, address: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO viaje_miembros (viaje_id, user_email) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE joined_at = joined_at",
        )
        .bind(trip_id)
        .bind(address.to_lowercase())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn members(&self, trip_id: TripId) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT LOWER(user_email) AS user_email FROM ( \
                 SELECT user_email FROM viaje_miembros WHERE viaje_id = ? \
                 UNION \
                 SELECT user_email FROM viajes WHERE id = ? AND user_email IS NOT NULL \
             ) m \
             WHERE user_email IS NOT NULL AND user_email <> '' \
             ORDER BY user_email",
        )
        .bind(trip_id)
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("user_email").map_err(StoreError::from))
            .collect()
    }

    async fn activity(&self, activity_id: ActivityId) -> Result<Option<Activity>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM actividades a WHERE a.id = ? LIMIT 1"
        ))
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(activity_from_row).transpose()?)
    }

    async fn activities(&self, trip_id: TripId) -> Result<Vec<Activity>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM actividades a WHERE a.viaje_id = ? \
             ORDER BY a.created_at DESC, a.id DESC"
        ))
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows, activity_from_row)
    }

    async fn activities_starting_on(&self, date: NaiveDate) -> Result<Vec<Activity>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM actividades a WHERE a.fecha_inicio = ? ORDER BY a.id"
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        collect(rows, activity_from_row)
    }

    async fn insert_activity(
        &self,
        trip_id: TripId,
        draft: &ActivityDraft,
        created_by: Option<&str>,
    ) -> Result<ActivityId, StoreError> {
        let result = sqlx::query(
            "INSERT INTO actividades (viaje_id, nombre, precio, fecha_inicio, fecha_fin, created_by_email) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(trip_id)
        .bind(&draft.name)
        .bind(draft.price)
        .bind(draft.starts_on)
        .bind(draft.ends_on)
        .bind(created_by)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_id())
    }

    async fn delete_activity(
        &self,
        trip_id: TripId,
        activity_id: ActivityId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM actividades WHERE id = ? AND viaje_id = ?")
            .bind(activity_id)
            .bind(trip_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_vote(
        &self,
        activity_id: ActivityId,
        address: &str,
        in_favor: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO actividad_votos (actividad_id, user_email, voto) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE voto = VALUES(voto), updated_at = CURRENT_TIMESTAMP",
        )
        .bind(activity_id)
        .bind(address.to_lowercase())
        .bind(i8::from(in_favor))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn votes(&self, trip_id: TripId) -> Result<Vec<Vote>, StoreError> {
        let rows = sqlx::query(
            "SELECT actividad_id, LOWER(user_email) AS user_email, voto, \
                    COALESCE(updated_at, created_at) AS updated_at \
             FROM actividad_votos \
             WHERE actividad_id IN (SELECT id FROM actividades WHERE viaje_id = ?)",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows, vote_from_row)
    }

    async fn activity_votes(&self, activity_id: ActivityId) -> Result<Vec<Vote>, StoreError> {
        let rows = sqlx::query(
            "SELECT actividad_id, LOWER(user_email) AS user_email, voto, \
                    COALESCE(updated_at, created_at) AS updated_at \
             FROM actividad_votos WHERE actividad_id = ?",
        )
        .bind(activity_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows, vote_from_row)
    }

    async fn mark_paid(
        &self,
        activity_id: ActivityId,
        address: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO actividad_pagos (actividad_id, user_email, pagado, fecha_pago) \
             VALUES (?, ?, 1, ?) \
             ON DUPLICATE KEY UPDATE pagado = 1, fecha_pago = VALUES(fecha_pago), \
                                     updated_at = CURRENT_TIMESTAMP",
        )
        .bind(activity_id)
        .bind(address.to_lowercase())
        .bind(paid_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn payment(
        &self,
        activity_id: ActivityId,
        address: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(
            "SELECT actividad_id, LOWER(user_email) AS user_email, pagado, fecha_pago \
             FROM actividad_pagos WHERE actividad_id = ? AND user_email = ?",
        )
        .bind(activity_id)
        .bind(address.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(payment_from_row).transpose()?)
    }

    async fn payments(&self, trip_id: TripId) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query(
            "SELECT actividad_id, LOWER(user_email) AS user_email, pagado, fecha_pago \
             FROM actividad_pagos \
             WHERE actividad_id IN (SELECT id FROM actividades WHERE viaje_id = ?)",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows, payment_from_row)
    }

    async fn activity_payments(&self, activity_id: ActivityId) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query(
            "SELECT actividad_id, LOWER(user_email) AS user_email, pagado, fecha_pago \
             FROM actividad_pagos WHERE actividad_id = ?",
        )
        .bind(activity_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows, payment_from_row)
    }

    async fn mark_budget_alert_sent(&self, trip_id: TripId) -> Result<(), StoreError> {
        sqlx::query("UPDATE viajes SET alerta_70_enviada = 1 WHERE id = ?")
            .bind(trip_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
