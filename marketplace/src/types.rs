//! Domain types for the marketplace transaction engine.
//!
//! Identifiers, money, and the five persisted entities: [`Request`],
//! [`Offer`], [`Appointment`], [`PaymentIntent`] and [`Notification`].
//! Status enums carry their own transition tables so reducers and stores
//! agree on what a legal move is.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing `Uuid`
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a user (client, artist or studio). Profiles share it.
    UserId
);
id_type!(
    /// Identifier of a client's request
    RequestId
);
id_type!(
    /// Identifier of an offer
    OfferId
);
id_type!(
    /// Identifier of an appointment
    AppointmentId
);
id_type!(
    /// Identifier of a local payment intent
    PaymentIntentId
);
id_type!(
    /// Identifier of a notification record
    NotificationId
);
id_type!(
    /// Identifier of a recorded reconciliation discrepancy
    DiscrepancyId
);

/// Error returned when a stored or supplied enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// `as_str` / `FromStr` pairs for enums persisted as text.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Stable text form used in storage and JSON
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError::new($kind, other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ============================================================================
// Callers and profiles
// ============================================================================

/// Role resolved by the identity gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Someone looking for a tattoo
    Client,
    /// Individual artist
    Artist,
    /// Studio
    Studio,
}

text_enum!(Role, "role", {
    Client => "client",
    Artist => "artist",
    Studio => "studio",
});

/// The authenticated party behind an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Resolved user id
    pub user_id: UserId,
    /// Resolved role
    pub role: Role,
}

impl Caller {
    /// Creates a caller
    #[must_use]
    pub const fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// The responder identity this caller offers as, if it is an artist or studio
    #[must_use]
    pub const fn as_responder(&self) -> Option<Responder> {
        match self.role {
            Role::Artist => Some(Responder::artist(self.user_id)),
            Role::Studio => Some(Responder::studio(self.user_id)),
            Role::Client => None,
        }
    }
}

/// Kind of bookable profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// Individual artist
    Artist,
    /// Studio
    Studio,
}

text_enum!(ProfileKind, "profile kind", {
    Artist => "artist",
    Studio => "studio",
});

/// An artist or studio profile as seen by the scheduling engine.
///
/// Profile CRUD lives outside this engine; only the fields bookings depend on
/// are modelled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Owning user; also the profile reference on appointments
    pub id: UserId,
    /// Artist or studio
    pub kind: ProfileKind,
    /// Display name
    pub display_name: String,
    /// Inactive profiles cannot be booked
    pub active: bool,
}

/// The party responding to a request: exactly one artist or one studio.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Responder {
    /// Artist or studio
    pub kind: ProfileKind,
    /// The responding user
    pub user_id: UserId,
}

impl Responder {
    /// An artist responder
    #[must_use]
    pub const fn artist(user_id: UserId) -> Self {
        Self {
            kind: ProfileKind::Artist,
            user_id,
        }
    }

    /// A studio responder
    #[must_use]
    pub const fn studio(user_id: UserId) -> Self {
        Self {
            kind: ProfileKind::Studio,
            user_id,
        }
    }
}

// ============================================================================
// Money
// ============================================================================

/// Amount in minor currency units (cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Strictly positive amount
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, (self.0 % 100).abs())
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Lifecycle of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Accepting offers
    #[serde(alias = "pending")]
    Open,
    /// An offer was accepted
    InProgress,
    /// The accepted engagement was completed
    Completed,
    /// Cancelled by the client
    Cancelled,
}

text_enum!(RequestStatus, "request status", {
    Open => "open",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl RequestStatus {
    /// Completed and cancelled requests never change again
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// A client's solicitation for a tattoo.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Identifier
    pub id: RequestId,
    /// Owning client
    pub client_id: UserId,
    /// Only this artist or studio may respond, when set
    pub target: Option<Responder>,
    /// Short title
    pub title: String,
    /// Free-text description
    pub description: String,
    /// Tattoo style
    pub style: String,
    /// Size
    pub size: String,
    /// Body placement
    pub placement: String,
    /// Lower budget bound
    pub budget_min: Option<Money>,
    /// Upper budget bound
    pub budget_max: Option<Money>,
    /// Optional deadline
    pub deadline: Option<DateTime<Utc>>,
    /// Lifecycle status
    pub status: RequestStatus,
    /// Soft-delete flag
    pub active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// `budget_min <= budget_max` whenever both bounds are present.
#[must_use]
pub fn budget_is_valid(min: Option<Money>, max: Option<Money>) -> bool {
    match (min, max) {
        (Some(min), Some(max)) => min <= max,
        _ => true,
    }
}

// ============================================================================
// Offers
// ============================================================================

/// Workflow status of an offer. Payment completion is tracked separately by
/// [`Offer::paid_at`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    /// Awaiting the client's decision
    Pending,
    /// Accepted by the client
    Accepted,
    /// Rejected by the client, or by accepting a sibling
    Rejected,
    /// Withdrawn by the responder
    Withdrawn,
    /// Engagement completed
    Completed,
    /// Accepted engagement called off
    Cancelled,
}

text_enum!(OfferStatus, "offer status", {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Withdrawn => "withdrawn",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl OfferStatus {
    /// The allowed-transition table. Anything not listed is rejected.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Accepted | Self::Rejected | Self::Withdrawn)
                | (Self::Accepted, Self::Completed | Self::Cancelled)
        )
    }

    /// No outgoing transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Withdrawn | Self::Completed | Self::Cancelled
        )
    }

    /// States in which the paid marker may be set
    #[must_use]
    pub const fn is_payable(self) -> bool {
        matches!(self, Self::Accepted | Self::Completed)
    }
}

/// When the responder is available to do the work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    /// Earliest start
    pub start: DateTime<Utc>,
    /// Latest end
    pub end: DateTime<Utc>,
}

/// A responder's proposal against a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Identifier
    pub id: OfferId,
    /// Parent request
    pub request_id: RequestId,
    /// Who is offering
    pub responder: Responder,
    /// Message to the client
    pub message: String,
    /// Proposed price
    pub price: Money,
    /// Proposed session length in minutes
    pub estimated_duration_minutes: i32,
    /// Optional availability window
    pub availability: Option<AvailabilityWindow>,
    /// Workflow status
    pub status: OfferStatus,
    /// Set once a payment for this offer is confirmed
    pub paid_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    /// Whether the paid marker is set
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }
}

// ============================================================================
// Appointments
// ============================================================================

/// Lifecycle of an appointment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    /// Booked, awaiting confirmation by the profile owner
    Pending,
    /// Confirmed by the profile owner
    Confirmed,
    /// Took place
    Completed,
    /// Called off
    Cancelled,
    /// Client did not show up
    NoShow,
}

text_enum!(AppointmentStatus, "appointment status", {
    Pending => "pending",
    Confirmed => "confirmed",
    Completed => "completed",
    Cancelled => "cancelled",
    NoShow => "no_show",
});

impl AppointmentStatus {
    /// Pending and confirmed appointments occupy their slot
    #[must_use]
    pub const fn blocks_slot(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// The allowed-transition table. Terminal states are immutable.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Confirmed | Self::Cancelled)
                | (Self::Confirmed, Self::Completed | Self::Cancelled | Self::NoShow)
        )
    }
}

/// A booked time interval on a profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Identifier
    pub id: AppointmentId,
    /// Booked profile
    pub profile_id: UserId,
    /// Booking client
    pub client_id: UserId,
    /// Offer this booking was derived from, if any
    pub offer_id: Option<OfferId>,
    /// Interval start (inclusive)
    pub start_at: DateTime<Utc>,
    /// Interval end (exclusive), start plus duration
    pub end_at: DateTime<Utc>,
    /// Lifecycle status
    pub status: AppointmentStatus,
    /// Kind of service
    pub service_type: Option<String>,
    /// Free-text description
    pub description: Option<String>,
    /// Free-text notes
    pub notes: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Length of the booked interval
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end_at - self.start_at
    }

    /// The other party of the booking, seen from `user`
    #[must_use]
    pub fn counterpart_of(&self, user: UserId) -> UserId {
        if user == self.profile_id {
            self.client_id
        } else {
            self.profile_id
        }
    }
}

// ============================================================================
// Payments
// ============================================================================

/// External payment rail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Processor {
    /// Card-network processor
    #[serde(rename = "processor_a", alias = "card")]
    ProcessorA,
    /// Wallet-based processor
    #[serde(rename = "processor_b", alias = "wallet")]
    ProcessorB,
}

impl Processor {
    /// Stable text form used in storage and JSON
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessorA => "processor_a",
            Self::ProcessorB => "processor_b",
        }
    }
}

impl FromStr for Processor {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processor_a" | "card" => Ok(Self::ProcessorA),
            "processor_b" | "wallet" => Ok(Self::ProcessorB),
            other => Err(ParseEnumError::new("processor", other)),
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local status of a payment intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Recorded locally, processor not yet called
    Pending,
    /// Accepted by the processor, awaiting confirmation
    Processing,
    /// Confirmed
    Completed,
    /// Processor rejected, timed out, or confirmed failure
    Failed,
    /// Cancelled at the processor
    Cancelled,
}

text_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl PaymentStatus {
    /// Whether an intent in this status still owns its offer's payment:
    /// a new intent for the same offer is refused while one exists.
    #[must_use]
    pub const fn holds_offer(self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Completed)
    }

    /// Pending or processing
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

/// Back-references carried by a payment intent. Weak: deleting the intent
/// never touches the referenced rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    /// Paying client
    pub client_id: UserId,
    /// Responder to credit
    #[serde(default)]
    pub responder_id: Option<UserId>,
    /// Linked offer
    #[serde(default)]
    pub offer_id: Option<OfferId>,
    /// Linked appointment
    #[serde(default)]
    pub appointment_id: Option<AppointmentId>,
}

/// Local record of an attempted payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Identifier
    pub id: PaymentIntentId,
    /// Amount in minor units
    pub amount: Money,
    /// Lowercase ISO currency code
    pub currency: String,
    /// Rail executing the payment
    pub processor: Processor,
    /// Local status
    pub status: PaymentStatus,
    /// Processor's id, immutable once set
    pub external_ref: Option<String>,
    /// Back-references
    pub metadata: PaymentMetadata,
    /// Last failure reason reported by the processor
    pub failure_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Set on completion
    pub completed_at: Option<DateTime<Utc>>,
}

/// Closed set of outcomes an external processor can report.
///
/// Provider payloads are translated into this at the boundary; nothing past
/// the API layer looks at provider-specific shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorOutcome {
    /// Funds captured
    Success,
    /// Payment failed
    Failure,
    /// Payment cancelled
    Cancelled,
    /// Still in flight
    Pending,
}

impl ProcessorOutcome {
    /// Translate a provider status string. Unknown states are `Pending`.
    #[must_use]
    pub fn from_provider_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "success" | "succeeded" | "captured" | "completed" | "paid" => Self::Success,
            "failure" | "failed" | "declined" | "error" => Self::Failure,
            "cancelled" | "canceled" | "voided" | "expired" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Notification type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A responder offered on the client's request
    NewOffer,
    /// The client accepted the responder's offer
    OfferAccepted,
    /// The client rejected the responder's offer
    OfferRejected,
    /// The responder withdrew their offer
    OfferWithdrawn,
    /// A payment for the responder's offer completed
    PaymentReceived,
    /// The client's payment failed or was cancelled
    PaymentCancelled,
    /// A client booked the profile
    AppointmentBooked,
    /// An appointment was rescheduled or changed status
    AppointmentUpdated,
    /// Reminder ahead of an appointment. Produced by an external scheduler.
    AppointmentReminder,
}

text_enum!(NotificationType, "notification type", {
    NewOffer => "new_offer",
    OfferAccepted => "offer_accepted",
    OfferRejected => "offer_rejected",
    OfferWithdrawn => "offer_withdrawn",
    PaymentReceived => "payment_received",
    PaymentCancelled => "payment_cancelled",
    AppointmentBooked => "appointment_booked",
    AppointmentUpdated => "appointment_updated",
    AppointmentReminder => "appointment_reminder",
});

/// A notification a reducer asks the shell to record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationDraft {
    /// Recipient
    pub recipient_id: UserId,
    /// Sender, when a user triggered it
    pub sender_id: Option<UserId>,
    /// Type
    pub kind: NotificationType,
    /// Opaque payload for the delivery layer
    pub payload: serde_json::Value,
}

/// A recorded notification intent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Identifier
    pub id: NotificationId,
    /// Recipient
    pub recipient_id: UserId,
    /// Sender
    pub sender_id: Option<UserId>,
    /// Type
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Payload
    pub payload: serde_json::Value,
    /// Only the recipient flips this
    pub read: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Materialise a draft
    #[must_use]
    pub fn from_draft(draft: NotificationDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: NotificationId::new(),
            recipient_id: draft.recipient_id,
            sender_id: draft.sender_id,
            kind: draft.kind,
            payload: draft.payload,
            read: false,
            created_at: now,
        }
    }
}

// ============================================================================
// Discrepancies
// ============================================================================

/// Why local and external payment state disagree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// The processor accepted the payment but the local write failed
    LocalWriteFailed,
    /// A success confirmation arrived for an offer that is no longer payable
    OfferNotPayable,
    /// A failure confirmation arrived for an already completed intent
    ReversalIgnored,
}

text_enum!(DiscrepancyKind, "discrepancy kind", {
    LocalWriteFailed => "local_write_failed",
    OfferNotPayable => "offer_not_payable",
    ReversalIgnored => "reversal_ignored",
});

/// A reconciliation discrepancy awaiting manual or async repair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Identifier
    pub id: DiscrepancyId,
    /// Intent involved
    pub intent_id: PaymentIntentId,
    /// Rail involved
    pub processor: Processor,
    /// Processor's reference, when known
    pub external_ref: Option<String>,
    /// Kind
    pub kind: DiscrepancyKind,
    /// Human-readable detail
    pub detail: String,
    /// Recorded at
    pub created_at: DateTime<Utc>,
}
