use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raised when a stored status string does not map to a known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown enum variant: {}", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }
    };
}

/// Applicant status in the registration lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicantStatus {
    Registered,
    AccountCreated,
    Scheduled,
    Ticketed,
    Completed,
    Cancelled,
}

text_enum!(ApplicantStatus {
    Registered => "REGISTERED",
    AccountCreated => "ACCOUNT_CREATED",
    Scheduled => "SCHEDULED",
    Ticketed => "TICKETED",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

/// Ticket status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Issued,
    Used,
    NoShow,
    Cancelled,
    Modified,
}

text_enum!(TicketStatus {
    Issued => "ISSUED",
    Used => "USED",
    NoShow => "NO_SHOW",
    Cancelled => "CANCELLED",
    Modified => "MODIFIED",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripType {
    OneWay,
    RoundTrip,
}

text_enum!(TripType {
    OneWay => "ONE_WAY",
    RoundTrip => "ROUND_TRIP",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyCategory {
    Cancellation,
    Modification,
    NoShow,
}

text_enum!(PolicyCategory {
    Cancellation => "CANCELLATION",
    Modification => "MODIFICATION",
    NoShow => "NO_SHOW",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyCondition {
    LessThan,
    GreaterThan,
}

text_enum!(PolicyCondition {
    LessThan => "LESS_THAN",
    GreaterThan => "GREATER_THAN",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Payment,
    Expense,
    Withdrawal,
}

text_enum!(TransactionType {
    Payment => "PAYMENT",
    Expense => "EXPENSE",
    Withdrawal => "WITHDRAWAL",
});

/// The root financial and status entity: a person registered for the
/// exam/travel program. Never hard-deleted, only status-cancelled.
///
/// All amounts are whole dinars (no minor unit). Invariant after every
/// ledger mutation: `remaining_balance == total_amount - discount - amount_paid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Applicant {
    pub id: Uuid,
    pub full_name: String,
    /// Public-facing reference code (PNR).
    pub applicant_code: String,
    pub phone: Option<String>,
    pub status: ApplicantStatus,
    pub total_amount: i64,
    pub discount: i64,
    pub amount_paid: i64,
    pub remaining_balance: i64,
    pub has_transportation: bool,
    pub transport_type: Option<TripType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Applicant {
    pub fn new(full_name: String, applicant_code: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            full_name,
            applicant_code,
            phone: None,
            status: ApplicantStatus::Registered,
            total_amount: 0,
            discount: 0,
            amount_paid: 0,
            remaining_balance: 0,
            has_transportation: false,
            transport_type: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the derived balance cache agrees with the base fields.
    pub fn balance_consistent(&self) -> bool {
        self.remaining_balance == self.total_amount - self.discount - self.amount_paid
    }
}

/// A bus ticket, one-to-one with an applicant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub applicant_id: Uuid,
    pub ticket_number: String,
    pub departure_date: DateTime<Utc>,
    pub departure_location: String,
    pub arrival_location: String,
    pub bus_number: Option<String>,
    pub seat_number: Option<String>,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn update_status(&mut self, status: TicketStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Directed route between two locations. Direction matters: there is no
/// implicit reverse-route fallback when pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportRoute {
    pub id: Uuid,
    pub departure_location: String,
    pub arrival_location: String,
    pub one_way_price: i64,
    pub round_trip_price: i64,
    pub is_active: bool,
}

/// A configured fee rule mapping a time-to-departure condition to a fee,
/// scoped to CANCELLATION, MODIFICATION, or NO_SHOW.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationPolicy {
    pub id: Uuid,
    pub name: String,
    pub category: PolicyCategory,
    pub hours_trigger: Option<i64>,
    pub condition: Option<PolicyCondition>,
    pub fee_amount: i64,
    pub is_active: bool,
}

/// Immutable financial event. Balance fields on Applicant are a derived
/// cache updated alongside each entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub tx_type: TransactionType,
    pub category: String,
    pub amount: i64,
    pub applicant_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A redeemable credit. Monetary metadata lives inside `notes` in a
/// `[META:{...}]` block (see the voucher codec) because the schema carries
/// no structured columns for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub id: Uuid,
    pub voucher_type: String,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit record tied to an applicant and optionally a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: Uuid,
    pub applicant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}
