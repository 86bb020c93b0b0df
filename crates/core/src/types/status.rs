//! Order status and its transition table.
//!
//! ```text
//! PENDING ──► PROCESSING ──► READY_FOR_PICKUP ──► COMPLETED
//!    │             │
//!    └──► CANCELLED ◄┘
//! ```
//!
//! `PENDING` is the only initial state. `COMPLETED` and `CANCELLED` are
//! terminal. Every other pair, including same-state requests, is rejected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Order fulfillment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    ReadyForPickup,
    Completed,
    Cancelled,
}

/// A requested status change that the transition table does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move order from {from} to {to}")]
pub struct InvalidTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl OrderStatus {
    /// All statuses in progress order, `CANCELLED` last.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Processing,
        Self::ReadyForPickup,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Wire/storage literal (`READY_FOR_PICKUP`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::ReadyForPickup => "READY_FOR_PICKUP",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Human-readable label for emails and dashboards.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::ReadyForPickup => "Ready for pickup",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// No transition is accepted out of a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Position on the forward path; `None` for `CANCELLED`, which sits off it.
    #[must_use]
    pub const fn progress_rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Processing => Some(1),
            Self::ReadyForPickup => Some(2),
            Self::Completed => Some(3),
            Self::Cancelled => None,
        }
    }

    /// Validate `self -> to`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when the pair is not in the table.
    pub const fn check_transition(self, to: Self) -> Result<(), InvalidTransition> {
        if allowed_transition(self, to) {
            Ok(())
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

/// Whether `from -> to` is in the transition table.
#[must_use]
pub const fn allowed_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::{Cancelled, Completed, Pending, Processing, ReadyForPickup};

    matches!(
        (from, to),
        (Pending, Processing | Cancelled)
            | (Processing, ReadyForPickup | Cancelled)
            | (ReadyForPickup, Completed)
    )
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("invalid order status: {s}"))
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for OrderStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for OrderStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(s.parse::<Self>()?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for OrderStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Who asked for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionSource {
    /// Automatic transition after a confirmed payment.
    Payment,
    /// Manual change by an authorized operator.
    Operator,
}

impl TransitionSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Operator => "operator",
        }
    }
}

impl fmt::Display for TransitionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(Self::Payment),
            "operator" => Ok(Self::Operator),
            _ => Err(format!("invalid transition source: {s}")),
        }
    }
}
