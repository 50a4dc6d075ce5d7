//! Fulfillment workflow: product orders.

use chrono::Utc;
use tracing::{info, instrument};

use wayfare_core::{DomainError, OrderId, Transition, UserId, Versioned};
use wayfare_events::{CommerceEvent, EventBus, EventEnvelope};
use wayfare_ordering::{CartSnapshot, Order, OrderLine, OrderStatus, RefundOutcome};
use wayfare_payments::{PaymentIntents, PaymentRef};

use crate::occ::{OptimisticExecutor, RetryPolicy, ServiceError};
use crate::store::{CommerceStore, ReviewItem, ReviewReason, WriteBatch};

use super::publish;

/// Creates orders from cart snapshots and drives their state machine.
pub struct FulfillmentService<S, B, P> {
    exec: OptimisticExecutor<S>,
    bus: B,
    intents: P,
}

impl<S, B, P> FulfillmentService<S, B, P>
where
    S: CommerceStore,
    B: EventBus<EventEnvelope<CommerceEvent>>,
    P: PaymentIntents,
{
    pub fn new(store: S, bus: B, intents: P) -> Self {
        Self {
            exec: OptimisticExecutor::new(store),
            bus,
            intents,
        }
    }

    pub fn with_policy(store: S, bus: B, intents: P, policy: RetryPolicy) -> Self {
        Self {
            exec: OptimisticExecutor::with_policy(store, policy),
            bus,
            intents,
        }
    }

    pub fn executor(&self) -> &OptimisticExecutor<S> {
        &self.exec
    }

    /// Validate the cart, decrement stock for every line and create a
    /// `PendingPayment` order — all decrements plus the order insert in one
    /// atomic batch, so either every line is reserved or none is.
    ///
    /// Stock validation runs before any mutation and collects **all**
    /// failing lines into one [`DomainError::InsufficientStock`] rejection.
    #[instrument(skip(self, cart), fields(%buyer, lines = cart.lines.len()))]
    pub fn create_order(&self, buyer: UserId, cart: &CartSnapshot) -> Result<Order, ServiceError> {
        cart.validate()?;

        // Price/seller snapshot and fast stock check before asking the
        // gateway for an intent.
        let (total, _seller) = self.snapshot_cart(cart)?;
        let payment_ref = self.intents.create_intent(total)?;
        let order_id = OrderId::new();

        let mut order = self.exec.run("order", |store| {
            let mut batch = WriteBatch::new();
            let mut lines = Vec::with_capacity(cart.lines.len());
            let mut shortages = Vec::new();
            let mut seller: Option<UserId> = None;

            for line in &cart.lines {
                let product = store
                    .product(line.product_id)?
                    .ok_or(DomainError::NotFound("product"))?;

                match seller {
                    None => seller = Some(product.seller()),
                    Some(existing) if existing != product.seller() => {
                        return Err(
                            DomainError::validation("cart spans multiple sellers").into()
                        );
                    }
                    Some(_) => {}
                }

                match product.reserve_stock(line.quantity) {
                    Ok(next) => {
                        lines.push(OrderLine {
                            product_id: line.product_id,
                            quantity: line.quantity,
                            unit_price: product.unit_price(),
                        });
                        batch.put_product(product.version(), next);
                    }
                    Err(shortage) => shortages.push(shortage),
                }
            }

            if !shortages.is_empty() {
                return Err(DomainError::InsufficientStock { shortages }.into());
            }
            let seller = seller.expect("validated cart is non-empty");

            let order = Order::pending(
                order_id,
                buyer,
                seller,
                lines,
                payment_ref.clone(),
                Utc::now(),
            );
            batch.insert_order(order.clone());
            store.commit(batch)?;
            Ok(order)
        })?;
        order.set_version(1);

        info!(%order_id, total = order.total(), "order created");
        publish(
            &self.bus,
            CommerceEvent::OrderCreated {
                order_id,
                buyer,
                occurred_at: order.created_at(),
            },
        );
        Ok(order)
    }

    /// Payment success for an order (webhook path).
    #[instrument(skip(self, reference), fields(%order_id))]
    pub fn mark_order_paid(
        &self,
        order_id: OrderId,
        reference: &PaymentRef,
    ) -> Result<Transition<Order>, ServiceError> {
        let transition = self.exec.run("order", |store| {
            let order = store
                .order(order_id)?
                .ok_or(DomainError::NotFound("order"))?;

            match order.mark_paid(reference, Utc::now())? {
                Transition::Changed(next) => {
                    let mut batch = WriteBatch::new();
                    batch.put_order(order.version(), next.clone());
                    store.commit(batch)?;
                    Ok(Transition::Changed(next))
                }
                Transition::Unchanged => Ok(Transition::Unchanged),
            }
        })?;

        if transition.is_changed() {
            info!(%order_id, "order paid");
            publish(
                &self.bus,
                CommerceEvent::OrderPaid {
                    order_id,
                    occurred_at: Utc::now(),
                },
            );
        }
        Ok(transition)
    }

    /// Payment failure for an order (webhook path).
    #[instrument(skip(self), fields(%order_id))]
    pub fn fail_order(&self, order_id: OrderId) -> Result<Transition<Order>, ServiceError> {
        let transition = self.exec.run("order", |store| {
            let order = store
                .order(order_id)?
                .ok_or(DomainError::NotFound("order"))?;

            match order.fail_payment(Utc::now()) {
                Transition::Changed(next) => {
                    let mut batch = WriteBatch::new();
                    batch.put_order(order.version(), next.clone());
                    store.commit(batch)?;
                    Ok(Transition::Changed(next))
                }
                Transition::Unchanged => Ok(Transition::Unchanged),
            }
        })?;

        if transition.is_changed() {
            info!(%order_id, "order payment failed");
            publish(
                &self.bus,
                CommerceEvent::OrderPaymentFailed {
                    order_id,
                    occurred_at: Utc::now(),
                },
            );
        }
        Ok(transition)
    }

    /// Refund an order, restoring stock for every line in the same batch
    /// as the status write. A refund against a delivered order goes to
    /// manual review instead.
    #[instrument(skip(self), fields(%order_id))]
    pub fn refund_order(&self, order_id: OrderId) -> Result<RefundOutcome, ServiceError> {
        self.resolve_order(order_id, None, Resolution::Refund)
    }

    /// Cancel an order (buyer abandonment or the reclamation sweep),
    /// restoring stock for every line.
    #[instrument(skip(self), fields(%order_id))]
    pub fn cancel_order(
        &self,
        order_id: OrderId,
        actor: Option<UserId>,
    ) -> Result<RefundOutcome, ServiceError> {
        self.resolve_order(order_id, actor, Resolution::Cancel)
    }

    fn resolve_order(
        &self,
        order_id: OrderId,
        actor: Option<UserId>,
        resolution: Resolution,
    ) -> Result<RefundOutcome, ServiceError> {
        let outcome = self.exec.run("order", |store| {
            let order = store
                .order(order_id)?
                .ok_or(DomainError::NotFound("order"))?;

            if let Some(actor) = actor {
                if actor != order.buyer() {
                    return Err(DomainError::Forbidden.into());
                }
            }

            let resolved = match resolution {
                Resolution::Refund => order.refund(Utc::now()),
                Resolution::Cancel => order.cancel(Utc::now()),
            };

            match resolved {
                RefundOutcome::Applied(next) => {
                    let mut batch = WriteBatch::new();
                    batch.put_order(order.version(), next.clone());
                    for line in next.lines() {
                        let product = store
                            .product(line.product_id)?
                            .ok_or(DomainError::NotFound("product"))?;
                        batch.put_product(product.version(), product.restock(line.quantity));
                    }
                    store.commit(batch)?;
                    Ok(RefundOutcome::Applied(next))
                }
                RefundOutcome::AlreadyResolved => Ok(RefundOutcome::AlreadyResolved),
                RefundOutcome::RequiresReview => {
                    store.push_review(
                        ReviewItem::for_order(
                            order_id,
                            ReviewReason::RefundAfterDelivery,
                            Utc::now(),
                        )
                        .with_payment_ref(order.payment_ref().as_str()),
                    )?;
                    Ok(RefundOutcome::RequiresReview)
                }
            }
        })?;

        if let RefundOutcome::Applied(next) = &outcome {
            let units_restored = next.unit_count();
            info!(%order_id, units_restored, "order resolved, stock restored");
            let occurred_at = next.resolved_at().unwrap_or_else(Utc::now);
            let event = match resolution {
                Resolution::Refund => CommerceEvent::OrderRefunded {
                    order_id,
                    units_restored,
                    occurred_at,
                },
                Resolution::Cancel => CommerceEvent::OrderCancelled {
                    order_id,
                    units_restored,
                    occurred_at,
                },
            };
            publish(&self.bus, event);
        }
        Ok(outcome)
    }

    /// Seller-driven fulfillment progression
    /// (`Paid → Processing → Shipped → Delivered`).
    ///
    /// Authorized only for the order's seller; touches no shared stock
    /// counters.
    #[instrument(skip(self), fields(%order_id, to = to.as_str()))]
    pub fn advance_order(
        &self,
        order_id: OrderId,
        seller: UserId,
        to: OrderStatus,
    ) -> Result<Transition<Order>, ServiceError> {
        let transition = self.exec.run("order", |store| {
            let order = store
                .order(order_id)?
                .ok_or(DomainError::NotFound("order"))?;

            if seller != order.seller() {
                return Err(DomainError::Forbidden.into());
            }

            match order.advance(to, Utc::now())? {
                Transition::Changed(next) => {
                    let mut batch = WriteBatch::new();
                    batch.put_order(order.version(), next.clone());
                    store.commit(batch)?;
                    Ok(Transition::Changed(next))
                }
                Transition::Unchanged => Ok(Transition::Unchanged),
            }
        })?;

        if transition.is_changed() {
            publish(
                &self.bus,
                CommerceEvent::FulfillmentAdvanced {
                    order_id,
                    status: to.as_str().to_string(),
                    occurred_at: Utc::now(),
                },
            );
        }
        Ok(transition)
    }

    /// Pre-flight read of the cart: total price and seller, with the same
    /// all-shortages-at-once rejection as the committed path.
    fn snapshot_cart(&self, cart: &CartSnapshot) -> Result<(u64, UserId), ServiceError> {
        let store = self.exec.store();
        let mut total = 0u64;
        let mut shortages = Vec::new();
        let mut seller: Option<UserId> = None;

        for line in &cart.lines {
            let product = store
                .product(line.product_id)?
                .ok_or(DomainError::NotFound("product"))?;
            match seller {
                None => seller = Some(product.seller()),
                Some(existing) if existing != product.seller() => {
                    return Err(DomainError::validation("cart spans multiple sellers").into());
                }
                Some(_) => {}
            }
            match product.reserve_stock(line.quantity) {
                Ok(_) => total += product.unit_price() * u64::from(line.quantity),
                Err(shortage) => shortages.push(shortage),
            }
        }

        if !shortages.is_empty() {
            return Err(DomainError::InsufficientStock { shortages }.into());
        }
        Ok((total, seller.expect("validated cart is non-empty")))
    }
}

#[derive(Debug, Clone, Copy)]
enum Resolution {
    Refund,
    Cancel,
}
