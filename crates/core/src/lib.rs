//! Vigie core types: order feed records and notifications.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod status;

pub use status::{classify, status_text, StatusClass};

/// Backend order identifier. Opaque to the engine.
pub type OrderId = String;

/// One record of the polled order feed. External input, read-only: the
/// engine never writes these back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderRecord {
    pub id: OrderId,
    /// Raw status code or label as the backend sent it.
    pub status_raw: String,
    /// Optional human label supplied by the backend (preferred over the code).
    pub status_label: Option<String>,
    pub customer_name: Option<String>,
    pub order_number: Option<String>,
    pub location: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderRecord {
    /// Human status label for this record: explicit label when present,
    /// else the fixed mapping over the raw code.
    pub fn status_text(&self) -> String {
        status_text(self.status_label.as_deref(), &self.status_raw)
    }

    /// Short reference used in messages: order number when the backend
    /// provides one, else the raw id.
    pub fn reference(&self) -> &str {
        self.order_number.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewOrder,
    StatusChange,
    Delivered,
}

impl NotificationKind {
    /// NewOrder and Delivered share one dedup slot per order; StatusChange
    /// is keyed per distinct status value.
    pub fn is_arrival_class(self) -> bool {
        matches!(self, NotificationKind::NewOrder | NotificationKind::Delivered)
    }
}

/// A synthesized notification event. Immutable once created, except for the
/// in-place delivered upgrade and the read flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    /// Unique per logical event, stable across upgrades.
    pub id: String,
    pub order_id: OrderId,
    pub kind: NotificationKind,
    pub message: String,
    pub customer_name: Option<String>,
    pub order_number: Option<String>,
    pub location: Option<String>,
    /// Human status label at synthesis (or upgrade) time.
    pub status: String,
    pub previous_status: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    pub is_new: bool,
}

impl Notification {
    fn base(
        order: &OrderRecord,
        kind: NotificationKind,
        message: String,
        status: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            kind,
            message,
            customer_name: order.customer_name.clone(),
            order_number: order.order_number.clone(),
            location: order.location.clone(),
            status,
            previous_status: None,
            timestamp,
            is_read: false,
            is_new: true,
        }
    }

    /// Event for an order seen for the first time. Orders that arrive
    /// already delivered skip the NewOrder stage entirely.
    pub fn arrival(order: &OrderRecord, status: String, now: DateTime<Utc>) -> Self {
        let ts = order.created_at.unwrap_or(now);
        if classify(&status) == StatusClass::Delivered {
            let msg = status::delivered_message(order.reference());
            Self::base(order, NotificationKind::Delivered, msg, status, ts)
        } else {
            let msg = status::new_order_message(order.reference(), order.customer_name.as_deref());
            Self::base(order, NotificationKind::NewOrder, msg, status, ts)
        }
    }

    /// Event for an observed status transition.
    pub fn status_change(order: &OrderRecord, status: String, previous: String, now: DateTime<Utc>) -> Self {
        let ts = order.updated_at.unwrap_or(now);
        let kind = if classify(&status) == StatusClass::Delivered {
            NotificationKind::Delivered
        } else {
            NotificationKind::StatusChange
        };
        let msg = match kind {
            NotificationKind::Delivered => status::delivered_message(order.reference()),
            _ => status::change_message(order.reference(), Some(&status)),
        };
        let mut n = Self::base(order, kind, msg, status, ts);
        n.previous_status = Some(previous);
        n
    }

    /// Retroactive upgrade: an unread NewOrder whose order is now delivered
    /// becomes a Delivered notification in place. Same id, read flags kept.
    pub fn upgrade_to_delivered(&mut self, order: &OrderRecord, status: String, now: DateTime<Utc>) {
        self.kind = NotificationKind::Delivered;
        self.message = status::delivered_message(order.reference());
        self.previous_status = Some(std::mem::replace(&mut self.status, status));
        self.timestamp = order.updated_at.unwrap_or(now);
    }

    /// Mark acknowledged. Monotone: never flips a read notification back.
    pub fn mark_read(&mut self) {
        self.is_read = true;
        self.is_new = false;
    }
}

pub mod prelude {
    pub use super::{classify, status_text, Notification, NotificationKind, OrderId, OrderRecord, StatusClass};
}
