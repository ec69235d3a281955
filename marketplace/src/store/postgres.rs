//! `PostgreSQL` store.
//!
//! Row locks are `SELECT ... FOR UPDATE`; the per-profile booking lock is a
//! transaction-scoped advisory lock. The overlap exclusion constraint and the
//! unique keys in the schema back up every check the reducers make.

use super::{MarketplaceStore, StoreError, StoreResult, StoreTransaction};
use crate::config::PostgresConfig;
use crate::types::{
    Appointment, AppointmentId, AvailabilityWindow, Discrepancy, DiscrepancyId, Money,
    Notification, NotificationId, Offer, OfferId, PaymentIntent, PaymentIntentId,
    PaymentMetadata, Processor, Profile, Request, RequestId, Responder, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

const REQUEST_COLUMNS: &str = "id, client_id, target_kind, target_id, title, description, style, \
     size, placement, budget_min, budget_max, deadline, status, active, created_at, updated_at";

const OFFER_COLUMNS: &str = "id, request_id, responder_kind, responder_id, message, price, \
     estimated_duration_minutes, available_from, available_until, status, paid_at, created_at, \
     updated_at";

const APPOINTMENT_COLUMNS: &str = "id, profile_id, client_id, offer_id, start_at, end_at, status, \
     service_type, description, notes, created_at, updated_at";

const INTENT_COLUMNS: &str = "id, amount, currency, processor, status, external_ref, metadata, \
     failure_reason, created_at, updated_at, completed_at";

const NOTIFICATION_COLUMNS: &str = "id, recipient_id, sender_id, type, payload, read, created_at";

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &error {
            let constraint = db.constraint().unwrap_or_default().to_string();
            match db.code().as_deref() {
                Some("23505") => return Self::UniqueViolation(constraint),
                Some("23P01") => return Self::ExclusionViolation(constraint),
                _ => {}
            }
        }
        match error {
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => Self::Corrupt(error.to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

// ============================================================================
// Row decoding
// ============================================================================

fn text<T>(row: &PgRow, column: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::Corrupt(format!("{column}: {e}")))
}

fn optional_text<T>(row: &PgRow, column: &str) -> StoreResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        value
            .parse()
            .map_err(|e: T::Err| StoreError::Corrupt(format!("{column}: {e}")))
    })
    .transpose()
}

fn uuid_col(row: &PgRow, column: &str) -> StoreResult<Uuid> {
    Ok(row.try_get(column)?)
}

fn optional_uuid(row: &PgRow, column: &str) -> StoreResult<Option<Uuid>> {
    Ok(row.try_get(column)?)
}

fn money(row: &PgRow, column: &str) -> StoreResult<Option<Money>> {
    let cents: Option<i64> = row.try_get(column)?;
    Ok(cents.map(Money::from_cents))
}

fn profile_from_row(row: &PgRow) -> StoreResult<Profile> {
    Ok(Profile {
        id: UserId::from_uuid(uuid_col(row, "id")?),
        kind: text(row, "kind")?,
        display_name: row.try_get("display_name")?,
        active: row.try_get("active")?,
    })
}

fn request_from_row(row: &PgRow) -> StoreResult<Request> {
    let target = match (optional_text(row, "target_kind")?, optional_uuid(row, "target_id")?) {
        (Some(kind), Some(id)) => Some(Responder {
            kind,
            user_id: UserId::from_uuid(id),
        }),
        _ => None,
    };
    Ok(Request {
        id: RequestId::from_uuid(uuid_col(row, "id")?),
        client_id: UserId::from_uuid(uuid_col(row, "client_id")?),
        target,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        style: row.try_get("style")?,
        size: row.try_get("size")?,
        placement: row.try_get("placement")?,
        budget_min: money(row, "budget_min")?,
        budget_max: money(row, "budget_max")?,
        deadline: row.try_get("deadline")?,
        status: text(row, "status")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn offer_from_row(row: &PgRow) -> StoreResult<Offer> {
    let from: Option<DateTime<Utc>> = row.try_get("available_from")?;
    let until: Option<DateTime<Utc>> = row.try_get("available_until")?;
    let availability = match (from, until) {
        (Some(start), Some(end)) => Some(AvailabilityWindow { start, end }),
        _ => None,
    };
    let price: i64 = row.try_get("price")?;
    Ok(Offer {
        id: OfferId::from_uuid(uuid_col(row, "id")?),
        request_id: RequestId::from_uuid(uuid_col(row, "request_id")?),
        responder: Responder {
            kind: text(row, "responder_kind")?,
            user_id: UserId::from_uuid(uuid_col(row, "responder_id")?),
        },
        message: row.try_get("message")?,
        price: Money::from_cents(price),
        estimated_duration_minutes: row.try_get("estimated_duration_minutes")?,
        availability,
        status: text(row, "status")?,
        paid_at: row.try_get("paid_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn appointment_from_row(row: &PgRow) -> StoreResult<Appointment> {
    Ok(Appointment {
        id: AppointmentId::from_uuid(uuid_col(row, "id")?),
        profile_id: UserId::from_uuid(uuid_col(row, "profile_id")?),
        client_id: UserId::from_uuid(uuid_col(row, "client_id")?),
        offer_id: optional_uuid(row, "offer_id")?.map(OfferId::from_uuid),
        start_at: row.try_get("start_at")?,
        end_at: row.try_get("end_at")?,
        status: text(row, "status")?,
        service_type: row.try_get("service_type")?,
        description: row.try_get("description")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn intent_from_row(row: &PgRow) -> StoreResult<PaymentIntent> {
    let amount: i64 = row.try_get("amount")?;
    let Json(metadata): Json<PaymentMetadata> = row.try_get("metadata")?;
    Ok(PaymentIntent {
        id: PaymentIntentId::from_uuid(uuid_col(row, "id")?),
        amount: Money::from_cents(amount),
        currency: row.try_get("currency")?,
        processor: text(row, "processor")?,
        status: text(row, "status")?,
        external_ref: row.try_get("external_ref")?,
        metadata,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn notification_from_row(row: &PgRow) -> StoreResult<Notification> {
    Ok(Notification {
        id: NotificationId::from_uuid(uuid_col(row, "id")?),
        recipient_id: UserId::from_uuid(uuid_col(row, "recipient_id")?),
        sender_id: optional_uuid(row, "sender_id")?.map(UserId::from_uuid),
        kind: text(row, "type")?,
        payload: row.try_get("payload")?,
        read: row.try_get("read")?,
        created_at: row.try_get("created_at")?,
    })
}

fn discrepancy_from_row(row: &PgRow) -> StoreResult<Discrepancy> {
    Ok(Discrepancy {
        id: DiscrepancyId::from_uuid(uuid_col(row, "id")?),
        intent_id: PaymentIntentId::from_uuid(uuid_col(row, "intent_id")?),
        processor: text(row, "processor")?,
        external_ref: row.try_get("external_ref")?,
        kind: text(row, "kind")?,
        detail: row.try_get("detail")?,
        created_at: row.try_get("created_at")?,
    })
}

fn affected(rows: u64, entity: &'static str, id: impl ToString) -> StoreResult<()> {
    if rows == 0 {
        Err(StoreError::missing(entity, id))
    } else {
        Ok(())
    }
}

// ============================================================================
// Store
// ============================================================================

/// `PostgreSQL`-backed [`MarketplaceStore`].
#[derive(Clone, Debug)]
pub struct PgMarketplaceStore {
    pool: PgPool,
}

impl PgMarketplaceStore {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool sized by `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be reached.
    pub async fn connect(config: &PostgresConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns error if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
    }
}

#[async_trait]
impl MarketplaceStore for PgMarketplaceStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_profile(&self, profile: &Profile) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO profiles (id, kind, display_name, active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
                SET kind = EXCLUDED.kind,
                    display_name = EXCLUDED.display_name,
                    active = EXCLUDED.active
            ",
        )
        .bind(profile.id.as_uuid())
        .bind(profile.kind.as_str())
        .bind(&profile.display_name)
        .bind(profile.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn discrepancies(&self) -> StoreResult<Vec<Discrepancy>> {
        let rows = sqlx::query(
            r"
            SELECT id, intent_id, processor, external_ref, kind, detail, created_at
            FROM payment_discrepancies
            ORDER BY created_at DESC
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(discrepancy_from_row).collect()
    }
}

struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgStoreTransaction {
    async fn fetch_request(&mut self, id: RequestId, lock: bool) -> StoreResult<Option<Request>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE id = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn fetch_offer(&mut self, id: OfferId, lock: bool) -> StoreResult<Option<Offer>> {
        let sql = format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE id = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(offer_from_row).transpose()
    }

    async fn fetch_offers(&mut self, request_id: RequestId, lock: bool) -> StoreResult<Vec<Offer>> {
        let sql = format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE request_id = $1 ORDER BY created_at, id{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        let rows = sqlx::query(&sql)
            .bind(request_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(offer_from_row).collect()
    }

    async fn fetch_appointment(
        &mut self,
        id: AppointmentId,
        lock: bool,
    ) -> StoreResult<Option<Appointment>> {
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(appointment_from_row).transpose()
    }

    async fn fetch_intent(
        &mut self,
        id: PaymentIntentId,
        lock: bool,
    ) -> StoreResult<Option<PaymentIntent>> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(intent_from_row).transpose()
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn get_profile(&mut self, id: UserId) -> StoreResult<Option<Profile>> {
        let row = sqlx::query("SELECT id, kind, display_name, active FROM profiles WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn get_request(&mut self, id: RequestId) -> StoreResult<Option<Request>> {
        self.fetch_request(id, false).await
    }

    async fn lock_request(&mut self, id: RequestId) -> StoreResult<Option<Request>> {
        self.fetch_request(id, true).await
    }

    async fn insert_request(&mut self, request: &Request) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO requests
                (id, client_id, target_kind, target_id, title, description, style, size,
                 placement, budget_min, budget_max, deadline, status, active, created_at,
                 updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ",
        )
        .bind(request.id.as_uuid())
        .bind(request.client_id.as_uuid())
        .bind(request.target.map(|t| t.kind.as_str()))
        .bind(request.target.map(|t| *t.user_id.as_uuid()))
        .bind(&request.title)
        .bind(&request.description)
        .bind(&request.style)
        .bind(&request.size)
        .bind(&request.placement)
        .bind(request.budget_min.map(|m| m.cents()))
        .bind(request.budget_max.map(|m| m.cents()))
        .bind(request.deadline)
        .bind(request.status.as_str())
        .bind(request.active)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_request(&mut self, request: &Request) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            UPDATE requests
            SET title = $2, description = $3, style = $4, size = $5, placement = $6,
                budget_min = $7, budget_max = $8, deadline = $9, status = $10, active = $11,
                updated_at = $12
            WHERE id = $1
            ",
        )
        .bind(request.id.as_uuid())
        .bind(&request.title)
        .bind(&request.description)
        .bind(&request.style)
        .bind(&request.size)
        .bind(&request.placement)
        .bind(request.budget_min.map(|m| m.cents()))
        .bind(request.budget_max.map(|m| m.cents()))
        .bind(request.deadline)
        .bind(request.status.as_str())
        .bind(request.active)
        .bind(request.updated_at)
        .execute(&mut *self.tx)
        .await?;
        affected(result.rows_affected(), "request", request.id)
    }

    async fn delete_request(&mut self, id: RequestId) -> StoreResult<()> {
        sqlx::query("DELETE FROM requests WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn get_offer(&mut self, id: OfferId) -> StoreResult<Option<Offer>> {
        self.fetch_offer(id, false).await
    }

    async fn lock_offer(&mut self, id: OfferId) -> StoreResult<Option<Offer>> {
        self.fetch_offer(id, true).await
    }

    async fn lock_offers_for_request(&mut self, request_id: RequestId) -> StoreResult<Vec<Offer>> {
        self.fetch_offers(request_id, true).await
    }

    async fn list_offers_for_request(&mut self, request_id: RequestId) -> StoreResult<Vec<Offer>> {
        self.fetch_offers(request_id, false).await
    }

    async fn insert_offer(&mut self, offer: &Offer) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO offers
                (id, request_id, responder_kind, responder_id, message, price,
                 estimated_duration_minutes, available_from, available_until, status, paid_at,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(offer.id.as_uuid())
        .bind(offer.request_id.as_uuid())
        .bind(offer.responder.kind.as_str())
        .bind(offer.responder.user_id.as_uuid())
        .bind(&offer.message)
        .bind(offer.price.cents())
        .bind(offer.estimated_duration_minutes)
        .bind(offer.availability.map(|w| w.start))
        .bind(offer.availability.map(|w| w.end))
        .bind(offer.status.as_str())
        .bind(offer.paid_at)
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_offer(&mut self, offer: &Offer) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            UPDATE offers
            SET message = $2, price = $3, estimated_duration_minutes = $4,
                available_from = $5, available_until = $6, status = $7, paid_at = $8,
                updated_at = $9
            WHERE id = $1
            ",
        )
        .bind(offer.id.as_uuid())
        .bind(&offer.message)
        .bind(offer.price.cents())
        .bind(offer.estimated_duration_minutes)
        .bind(offer.availability.map(|w| w.start))
        .bind(offer.availability.map(|w| w.end))
        .bind(offer.status.as_str())
        .bind(offer.paid_at)
        .bind(offer.updated_at)
        .execute(&mut *self.tx)
        .await?;
        affected(result.rows_affected(), "offer", offer.id)
    }

    async fn delete_offer(&mut self, id: OfferId) -> StoreResult<()> {
        sqlx::query("DELETE FROM offers WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn lock_profile_schedule(&mut self, profile_id: UserId) -> StoreResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(profile_id.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn blocking_appointments(&mut self, profile_id: UserId) -> StoreResult<Vec<Appointment>> {
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments \
             WHERE profile_id = $1 AND status IN ('pending', 'confirmed') \
             ORDER BY start_at"
        );
        let rows = sqlx::query(&sql)
            .bind(profile_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(appointment_from_row).collect()
    }

    async fn get_appointment(&mut self, id: AppointmentId) -> StoreResult<Option<Appointment>> {
        self.fetch_appointment(id, false).await
    }

    async fn lock_appointment(&mut self, id: AppointmentId) -> StoreResult<Option<Appointment>> {
        self.fetch_appointment(id, true).await
    }

    async fn insert_appointment(&mut self, appointment: &Appointment) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO appointments
                (id, profile_id, client_id, offer_id, start_at, end_at, status, service_type,
                 description, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(appointment.id.as_uuid())
        .bind(appointment.profile_id.as_uuid())
        .bind(appointment.client_id.as_uuid())
        .bind(appointment.offer_id.map(|id| *id.as_uuid()))
        .bind(appointment.start_at)
        .bind(appointment.end_at)
        .bind(appointment.status.as_str())
        .bind(&appointment.service_type)
        .bind(&appointment.description)
        .bind(&appointment.notes)
        .bind(appointment.created_at)
        .bind(appointment.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_appointment(&mut self, appointment: &Appointment) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            UPDATE appointments
            SET start_at = $2, end_at = $3, status = $4, service_type = $5, description = $6,
                notes = $7, updated_at = $8
            WHERE id = $1
            ",
        )
        .bind(appointment.id.as_uuid())
        .bind(appointment.start_at)
        .bind(appointment.end_at)
        .bind(appointment.status.as_str())
        .bind(&appointment.service_type)
        .bind(&appointment.description)
        .bind(&appointment.notes)
        .bind(appointment.updated_at)
        .execute(&mut *self.tx)
        .await?;
        affected(result.rows_affected(), "appointment", appointment.id)
    }

    async fn get_intent(&mut self, id: PaymentIntentId) -> StoreResult<Option<PaymentIntent>> {
        self.fetch_intent(id, false).await
    }

    async fn lock_intent(&mut self, id: PaymentIntentId) -> StoreResult<Option<PaymentIntent>> {
        self.fetch_intent(id, true).await
    }

    async fn lock_intent_by_external_ref(
        &mut self,
        processor: Processor,
        external_ref: &str,
    ) -> StoreResult<Option<PaymentIntent>> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE processor = $1 AND external_ref = $2 FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(processor.as_str())
            .bind(external_ref)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(intent_from_row).transpose()
    }

    async fn intents_for_offer(&mut self, offer_id: OfferId) -> StoreResult<Vec<PaymentIntent>> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE metadata->>'offer_id' = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(offer_id.to_string())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(intent_from_row).collect()
    }

    async fn insert_intent(&mut self, intent: &PaymentIntent) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO payment_intents
                (id, amount, currency, processor, status, external_ref, metadata,
                 failure_reason, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(intent.id.as_uuid())
        .bind(intent.amount.cents())
        .bind(&intent.currency)
        .bind(intent.processor.as_str())
        .bind(intent.status.as_str())
        .bind(&intent.external_ref)
        .bind(Json(&intent.metadata))
        .bind(&intent.failure_reason)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .bind(intent.completed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_intent(&mut self, intent: &PaymentIntent) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            UPDATE payment_intents
            SET status = $2, external_ref = $3, metadata = $4, failure_reason = $5,
                updated_at = $6, completed_at = $7
            WHERE id = $1
            ",
        )
        .bind(intent.id.as_uuid())
        .bind(intent.status.as_str())
        .bind(&intent.external_ref)
        .bind(Json(&intent.metadata))
        .bind(&intent.failure_reason)
        .bind(intent.updated_at)
        .bind(intent.completed_at)
        .execute(&mut *self.tx)
        .await?;
        affected(result.rows_affected(), "payment intent", intent.id)
    }

    async fn insert_notification(&mut self, notification: &Notification) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO notifications (id, recipient_id, sender_id, type, payload, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(notification.id.as_uuid())
        .bind(notification.recipient_id.as_uuid())
        .bind(notification.sender_id.map(|id| *id.as_uuid()))
        .bind(notification.kind.as_str())
        .bind(&notification.payload)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_notifications(
        &mut self,
        recipient_id: UserId,
        unread_only: bool,
    ) -> StoreResult<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE recipient_id = $1 AND (NOT $2 OR read = FALSE) \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(recipient_id.as_uuid())
            .bind(unread_only)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn lock_notification(&mut self, id: NotificationId) -> StoreResult<Option<Notification>> {
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(notification_from_row).transpose()
    }

    async fn mark_notification_read(&mut self, id: NotificationId) -> StoreResult<()> {
        let result = sqlx::query("UPDATE notifications SET read = TRUE WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        affected(result.rows_affected(), "notification", id)
    }

    async fn insert_discrepancy(&mut self, discrepancy: &Discrepancy) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO payment_discrepancies
                (id, intent_id, processor, external_ref, kind, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(discrepancy.id.as_uuid())
        .bind(discrepancy.intent_id.as_uuid())
        .bind(discrepancy.processor.as_str())
        .bind(&discrepancy.external_ref)
        .bind(discrepancy.kind.as_str())
        .bind(&discrepancy.detail)
        .bind(discrepancy.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
