//! Tracked business entities the engine evaluates.
//!
//! Quotes and invoices are owned and mutated exclusively by the surrounding
//! business application. The engine reads their status and timestamps to
//! decide whether a follow-up is warranted; it never writes them back.

use billhound_core::{ClientId, InvoiceId, ParseIdError, QuoteId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two business domains the engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A sales quote awaiting client action.
    Quote,
    /// An invoice awaiting payment.
    Invoice,
}

impl EntityKind {
    /// Returns the stable string form used in storage and APIs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Invoice => "invoice",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "quote" => Some(Self::Quote),
            "invoice" => Some(Self::Invoice),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a quote, as maintained by the business application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    /// Not yet sent to the client.
    Draft,
    /// Sent, not yet opened.
    Sent,
    /// Opened by the client.
    Viewed,
    /// Accepted by the client.
    Accepted,
    /// Rejected by the client.
    Rejected,
    /// Validity window elapsed.
    Expired,
}

impl QuoteStatus {
    /// Returns the stable string form used in storage and APIs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Viewed => "viewed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "viewed" => Some(Self::Viewed),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Returns true once the quote can no longer receive follow-ups.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Expired)
    }
}

/// Status of an invoice, as maintained by the business application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Issued, payment outstanding.
    Unpaid,
    /// Payment outstanding past the due date.
    Overdue,
    /// Paid in full.
    Paid,
    /// Cancelled before payment.
    Cancelled,
}

impl InvoiceStatus {
    /// Returns the stable string form used in storage and APIs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Overdue => "overdue",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(Self::Unpaid),
            "overdue" => Some(Self::Overdue),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns true once the invoice can no longer receive follow-ups.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }
}

/// A typed reference to one tracked entity.
///
/// Serializes to the `entity_type` / `entity_id` pair persisted on every
/// follow-up record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "entity_id", rename_all = "snake_case")]
pub enum EntityRef {
    /// Reference to a quote.
    Quote(QuoteId),
    /// Reference to an invoice.
    Invoice(InvoiceId),
}

impl EntityRef {
    /// Returns the domain of the referenced entity.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Quote(_) => EntityKind::Quote,
            Self::Invoice(_) => EntityKind::Invoice,
        }
    }

    /// Returns the prefixed string form of the underlying ID.
    #[must_use]
    pub fn id_string(&self) -> String {
        match self {
            Self::Quote(id) => id.to_string(),
            Self::Invoice(id) => id.to_string(),
        }
    }

    /// Reassembles a reference from its storage column pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID does not parse for the given kind.
    pub fn from_parts(kind: EntityKind, id: &str) -> Result<Self, ParseIdError> {
        match kind {
            EntityKind::Quote => Ok(Self::Quote(QuoteId::from_str(id)?)),
            EntityKind::Invoice => Ok(Self::Invoice(InvoiceId::from_str(id)?)),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quote(id) => write!(f, "{id}"),
            Self::Invoice(id) => write!(f, "{id}"),
        }
    }
}

/// A quote as read from the business application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// Quote ID.
    pub id: QuoteId,
    /// Owning client.
    pub client_id: ClientId,
    /// Human-readable quote number.
    pub number: String,
    /// Current status.
    pub status: QuoteStatus,
    /// When the quote was sent to the client.
    pub sent_at: Option<DateTime<Utc>>,
    /// End of the validity window, if one was set.
    pub valid_until: Option<DateTime<Utc>>,
    /// When the quote was created.
    pub created_at: DateTime<Utc>,
}

/// An invoice as read from the business application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice ID.
    pub id: InvoiceId,
    /// Owning client.
    pub client_id: ClientId,
    /// Human-readable invoice number.
    pub number: String,
    /// Current status.
    pub status: InvoiceStatus,
    /// When the invoice was issued.
    pub issue_date: DateTime<Utc>,
    /// When payment is due.
    pub due_date: DateTime<Utc>,
    /// When the invoice was created.
    pub created_at: DateTime<Utc>,
}

/// A tracked entity, polymorphic over the two domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum TrackedEntity {
    /// A quote.
    Quote(Quote),
    /// An invoice.
    Invoice(Invoice),
}

impl TrackedEntity {
    /// Returns the typed reference for this entity.
    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        match self {
            Self::Quote(quote) => EntityRef::Quote(quote.id),
            Self::Invoice(invoice) => EntityRef::Invoice(invoice.id),
        }
    }

    /// Returns the domain of this entity.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Quote(_) => EntityKind::Quote,
            Self::Invoice(_) => EntityKind::Invoice,
        }
    }

    /// Returns the owning client.
    #[must_use]
    pub fn client_id(&self) -> ClientId {
        match self {
            Self::Quote(quote) => quote.client_id,
            Self::Invoice(invoice) => invoice.client_id,
        }
    }

    /// Returns the human-readable document number.
    #[must_use]
    pub fn number(&self) -> &str {
        match self {
            Self::Quote(quote) => &quote.number,
            Self::Invoice(invoice) => &invoice.number,
        }
    }

    /// Returns the stable string form of the current status.
    #[must_use]
    pub fn status_str(&self) -> &'static str {
        match self {
            Self::Quote(quote) => quote.status.as_str(),
            Self::Invoice(invoice) => invoice.status.as_str(),
        }
    }

    /// Returns true once this entity can no longer receive follow-ups.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Quote(quote) => quote.status.is_terminal(),
            Self::Invoice(invoice) => invoice.status.is_terminal(),
        }
    }
}
