//! Typed outbound events produced by the commerce workflows.
//!
//! One variant per committed state transition. Consumers (notification
//! senders, analytics, search indexers) subscribe via the bus; none of them
//! participate in workflow correctness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wayfare_core::{BookingId, OrderId, SlotId, UserId};

use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommerceEvent {
    BookingCreated {
        booking_id: BookingId,
        slot_id: SlotId,
        buyer: UserId,
        guests: u32,
        occurred_at: DateTime<Utc>,
    },
    BookingConfirmed {
        booking_id: BookingId,
        occurred_at: DateTime<Utc>,
    },
    BookingPaymentFailed {
        booking_id: BookingId,
        occurred_at: DateTime<Utc>,
    },
    BookingCancelled {
        booking_id: BookingId,
        slot_id: SlotId,
        guests_released: u32,
        occurred_at: DateTime<Utc>,
    },
    BookingCompleted {
        booking_id: BookingId,
        occurred_at: DateTime<Utc>,
    },
    OrderCreated {
        order_id: OrderId,
        buyer: UserId,
        occurred_at: DateTime<Utc>,
    },
    OrderPaid {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    OrderPaymentFailed {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    OrderRefunded {
        order_id: OrderId,
        units_restored: u32,
        occurred_at: DateTime<Utc>,
    },
    OrderCancelled {
        order_id: OrderId,
        units_restored: u32,
        occurred_at: DateTime<Utc>,
    },
    FulfillmentAdvanced {
        order_id: OrderId,
        status: String,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for CommerceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CommerceEvent::BookingCreated { .. } => "booking.created",
            CommerceEvent::BookingConfirmed { .. } => "booking.confirmed",
            CommerceEvent::BookingPaymentFailed { .. } => "booking.payment_failed",
            CommerceEvent::BookingCancelled { .. } => "booking.cancelled",
            CommerceEvent::BookingCompleted { .. } => "booking.completed",
            CommerceEvent::OrderCreated { .. } => "order.created",
            CommerceEvent::OrderPaid { .. } => "order.paid",
            CommerceEvent::OrderPaymentFailed { .. } => "order.payment_failed",
            CommerceEvent::OrderRefunded { .. } => "order.refunded",
            CommerceEvent::OrderCancelled { .. } => "order.cancelled",
            CommerceEvent::FulfillmentAdvanced { .. } => "order.fulfillment_advanced",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CommerceEvent::BookingCreated { occurred_at, .. }
            | CommerceEvent::BookingConfirmed { occurred_at, .. }
            | CommerceEvent::BookingPaymentFailed { occurred_at, .. }
            | CommerceEvent::BookingCancelled { occurred_at, .. }
            | CommerceEvent::BookingCompleted { occurred_at, .. }
            | CommerceEvent::OrderCreated { occurred_at, .. }
            | CommerceEvent::OrderPaid { occurred_at, .. }
            | CommerceEvent::OrderPaymentFailed { occurred_at, .. }
            | CommerceEvent::OrderRefunded { occurred_at, .. }
            | CommerceEvent::OrderCancelled { occurred_at, .. }
            | CommerceEvent::FulfillmentAdvanced { occurred_at, .. } => *occurred_at,
        }
    }
}
