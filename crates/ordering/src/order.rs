use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wayfare_core::{DomainError, DomainResult, Entity, OrderId, ProductId, Transition, UserId, Versioned};
use wayfare_payments::PaymentRef;

/// Order lifecycle.
///
/// `PendingPayment → {Paid, PaymentFailed, Cancelled}`,
/// `Paid → Processing → Shipped → Delivered`, any pre-`Delivered` state
/// `→ {Cancelled, Refunded}`. Terminal: `Delivered`, `Cancelled`,
/// `Refunded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    PaymentFailed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::PaymentFailed => "payment_failed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// States the stale-reservation sweep may cancel.
    pub fn is_reclaimable(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingPayment | OrderStatus::PaymentFailed
        )
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(OrderStatus::PendingPayment),
            "paid" => Ok(OrderStatus::Paid),
            "payment_failed" => Ok(OrderStatus::PaymentFailed),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(DomainError::validation(format!(
                "unknown order status '{other}'"
            ))),
        }
    }
}

/// One requested line of a cart, before price snapshotting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// The buyer's cart at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
}

impl CartSnapshot {
    pub fn new(lines: Vec<CartLine>) -> Self {
        Self { lines }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.lines.is_empty() {
            return Err(DomainError::validation("cart is empty"));
        }
        for line in &self.lines {
            if line.quantity == 0 {
                return Err(DomainError::validation(format!(
                    "zero quantity for product {}",
                    line.product_id
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for line in &self.lines {
            if !seen.insert(line.product_id) {
                return Err(DomainError::validation(format!(
                    "duplicate cart line for product {}",
                    line.product_id
                )));
            }
        }
        Ok(())
    }
}

/// A committed order line: product, quantity, and the unit price at
/// creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
}

impl OrderLine {
    pub fn line_total(&self) -> u64 {
        self.unit_price * u64::from(self.quantity)
    }
}

/// Outcome of a refund/cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    /// Commit the returned row and restore stock for every line.
    Applied(Order),
    /// Already cancelled or refunded; stock was restored when the terminal
    /// state was first reached.
    AlreadyResolved,
    /// The order was already delivered; resolution goes to manual review.
    RequiresReview,
}

/// A purchase of one or more product lines from a single seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    buyer: UserId,
    seller: UserId,
    lines: Vec<OrderLine>,
    total: u64,
    status: OrderStatus,
    payment_ref: PaymentRef,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        id: OrderId,
        buyer: UserId,
        seller: UserId,
        lines: Vec<OrderLine>,
        payment_ref: PaymentRef,
        created_at: DateTime<Utc>,
    ) -> Self {
        let total = lines.iter().map(OrderLine::line_total).sum();
        Self {
            id,
            buyer,
            seller,
            lines,
            total,
            status: OrderStatus::PendingPayment,
            payment_ref,
            created_at,
            paid_at: None,
            resolved_at: None,
            version: 0,
        }
    }

    /// Reconstruct a row loaded from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: OrderId,
        buyer: UserId,
        seller: UserId,
        lines: Vec<OrderLine>,
        total: u64,
        status: OrderStatus,
        payment_ref: PaymentRef,
        created_at: DateTime<Utc>,
        paid_at: Option<DateTime<Utc>>,
        resolved_at: Option<DateTime<Utc>>,
        version: u64,
    ) -> Self {
        Self {
            id,
            buyer,
            seller,
            lines,
            total,
            status,
            payment_ref,
            created_at,
            paid_at,
            resolved_at,
            version,
        }
    }

    pub fn buyer(&self) -> UserId {
        self.buyer
    }

    pub fn seller(&self) -> UserId {
        self.seller
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_ref(&self) -> &PaymentRef {
        &self.payment_ref
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Total units across all lines (for restore accounting).
    pub fn unit_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Payment success. `PendingPayment → Paid`; repeats and late
    /// deliveries are no-ops. A mismatched reference is an integrity error.
    pub fn mark_paid(
        &self,
        reference: &PaymentRef,
        at: DateTime<Utc>,
    ) -> DomainResult<Transition<Self>> {
        if reference != &self.payment_ref {
            return Err(DomainError::payment_mismatch(
                format!("order {}", self.id),
                reference.as_str(),
            ));
        }

        match self.status {
            OrderStatus::PendingPayment => {
                let mut next = self.clone();
                next.status = OrderStatus::Paid;
                next.paid_at = Some(at);
                Ok(Transition::Changed(next))
            }
            _ => Ok(Transition::Unchanged),
        }
    }

    /// Payment failure. Success is authoritative and never downgraded.
    pub fn fail_payment(&self, _at: DateTime<Utc>) -> Transition<Self> {
        match self.status {
            OrderStatus::PendingPayment => {
                let mut next = self.clone();
                next.status = OrderStatus::PaymentFailed;
                Transition::Changed(next)
            }
            _ => Transition::Unchanged,
        }
    }

    /// Refund. Allowed from any pre-`Delivered` state; the committed row
    /// must be accompanied by stock restores for every line in the same
    /// write batch.
    pub fn refund(&self, at: DateTime<Utc>) -> RefundOutcome {
        self.resolve(OrderStatus::Refunded, at)
    }

    /// Cancellation (buyer abandonment or reclamation sweep).
    pub fn cancel(&self, at: DateTime<Utc>) -> RefundOutcome {
        self.resolve(OrderStatus::Cancelled, at)
    }

    fn resolve(&self, terminal: OrderStatus, at: DateTime<Utc>) -> RefundOutcome {
        match self.status {
            OrderStatus::Cancelled | OrderStatus::Refunded => RefundOutcome::AlreadyResolved,
            OrderStatus::Delivered => RefundOutcome::RequiresReview,
            _ => {
                let mut next = self.clone();
                next.status = terminal;
                next.resolved_at = Some(at);
                RefundOutcome::Applied(next)
            }
        }
    }

    /// Seller-driven fulfillment progression:
    /// `Paid → Processing → Shipped → Delivered`.
    ///
    /// Re-requesting the current state is a no-op (idempotent seller
    /// updates); any other jump is an invalid transition. Does not touch
    /// shared stock counters.
    pub fn advance(&self, to: OrderStatus, _at: DateTime<Utc>) -> DomainResult<Transition<Self>> {
        if to == self.status {
            return Ok(Transition::Unchanged);
        }

        let legal = matches!(
            (self.status, to),
            (OrderStatus::Paid, OrderStatus::Processing)
                | (OrderStatus::Processing, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
        );
        if !legal {
            return Err(DomainError::InvalidTransition {
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }

        let mut next = self.clone();
        next.status = to;
        Ok(Transition::Changed(next))
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> &OrderId {
        &self.id
    }
}

impl Versioned for Order {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_order() -> Order {
        Order::pending(
            OrderId::new(),
            UserId::new(),
            UserId::new(),
            vec![
                OrderLine {
                    product_id: ProductId::new(),
                    quantity: 3,
                    unit_price: 1000,
                },
                OrderLine {
                    product_id: ProductId::new(),
                    quantity: 1,
                    unit_price: 500,
                },
            ],
            PaymentRef::new("pi_9"),
            Utc::now(),
        )
    }

    #[test]
    fn total_is_the_sum_of_line_totals() {
        let order = test_order();
        assert_eq!(order.total(), 3500);
        assert_eq!(order.unit_count(), 4);
    }

    #[test]
    fn mark_paid_is_idempotent() {
        let order = test_order();
        let paid = order
            .mark_paid(&PaymentRef::new("pi_9"), Utc::now())
            .unwrap()
            .changed()
            .unwrap();

        assert_eq!(paid.status(), OrderStatus::Paid);
        assert_eq!(
            paid.mark_paid(&PaymentRef::new("pi_9"), Utc::now()).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn mismatched_reference_is_an_integrity_error() {
        let order = test_order();
        assert!(matches!(
            order.mark_paid(&PaymentRef::new("pi_other"), Utc::now()),
            Err(DomainError::PaymentMismatch { .. })
        ));
    }

    #[test]
    fn failure_never_downgrades_paid() {
        let paid = test_order()
            .mark_paid(&PaymentRef::new("pi_9"), Utc::now())
            .unwrap()
            .changed()
            .unwrap();
        assert_eq!(paid.fail_payment(Utc::now()), Transition::Unchanged);
    }

    #[test]
    fn refund_applies_once() {
        let paid = test_order()
            .mark_paid(&PaymentRef::new("pi_9"), Utc::now())
            .unwrap()
            .changed()
            .unwrap();

        let refunded = match paid.refund(Utc::now()) {
            RefundOutcome::Applied(next) => next,
            other => panic!("expected refund, got {other:?}"),
        };
        assert_eq!(refunded.status(), OrderStatus::Refunded);
        assert_eq!(refunded.refund(Utc::now()), RefundOutcome::AlreadyResolved);
    }

    #[test]
    fn delivered_orders_go_to_review_instead_of_refunding() {
        let order = test_order();
        let delivered = order
            .mark_paid(&PaymentRef::new("pi_9"), Utc::now())
            .unwrap()
            .changed()
            .unwrap()
            .advance(OrderStatus::Processing, Utc::now())
            .unwrap()
            .changed()
            .unwrap()
            .advance(OrderStatus::Shipped, Utc::now())
            .unwrap()
            .changed()
            .unwrap()
            .advance(OrderStatus::Delivered, Utc::now())
            .unwrap()
            .changed()
            .unwrap();

        assert_eq!(delivered.refund(Utc::now()), RefundOutcome::RequiresReview);
        assert_eq!(delivered.cancel(Utc::now()), RefundOutcome::RequiresReview);
    }

    #[test]
    fn advance_rejects_jumps_and_tolerates_repeats() {
        let paid = test_order()
            .mark_paid(&PaymentRef::new("pi_9"), Utc::now())
            .unwrap()
            .changed()
            .unwrap();

        assert!(matches!(
            paid.advance(OrderStatus::Shipped, Utc::now()),
            Err(DomainError::InvalidTransition { .. })
        ));

        let processing = paid
            .advance(OrderStatus::Processing, Utc::now())
            .unwrap()
            .changed()
            .unwrap();
        assert_eq!(
            processing.advance(OrderStatus::Processing, Utc::now()).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn cart_validation_catches_bad_lines() {
        assert!(CartSnapshot::new(vec![]).validate().is_err());

        let product_id = ProductId::new();
        assert!(
            CartSnapshot::new(vec![CartLine {
                product_id,
                quantity: 0
            }])
            .validate()
            .is_err()
        );
        assert!(
            CartSnapshot::new(vec![
                CartLine {
                    product_id,
                    quantity: 1
                },
                CartLine {
                    product_id,
                    quantity: 2
                },
            ])
            .validate()
            .is_err()
        );
    }
}
