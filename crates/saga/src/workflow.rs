//! The order fulfillment workflow.
//!
//! One [`OrderSaga`] drives one order from INITIALIZING to a terminal status.
//! Every decision is journaled before it takes effect, so a saga rebuilt
//! from its journal resumes at the same point:
//! - committed steps are never re-run
//! - received signals and the payment deadline are reused
//! - an interrupted unwind continues with the remaining compensations

use std::sync::Arc;

use chrono::TimeDelta;
use common::OrderId;
use domain::{AdminAction, Aggregate, Order, Shipment};
use event_store::EventStore;

use crate::aggregate::{SagaInstance, ShipmentOutcome};
use crate::compensation::Compensation;
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::journal;
use crate::order_fulfillment::{STEP_JOURNAL_APPEND, STEP_RESERVE_INVENTORY, SagaConfig};
use crate::retry::retry_step;
use crate::services::{InventoryService, ShippingService};
use crate::shipment::{ShipmentSplitter, plan_shipments};
use crate::signals::{SignalBus, SignalWindow, WaitPoint};
use crate::snapshot::StatusCell;
use crate::state::{OrderState, OrderStatus};
use crate::timer::TimerService;

/// Collaborators shared by every saga of one coordinator.
pub struct SagaEnv<S, I, Sh, T> {
    pub(crate) store: S,
    pub(crate) inventory: I,
    pub(crate) shipping: Arc<Sh>,
    pub(crate) timer: T,
    pub(crate) signals: SignalBus,
    pub(crate) config: SagaConfig,
}

impl<S, I, Sh, T> SagaEnv<S, I, Sh, T> {
    pub fn new(store: S, inventory: I, shipping: Sh, timer: T, config: SagaConfig) -> Self {
        Self {
            store,
            inventory,
            shipping: Arc::new(shipping),
            timer,
            signals: SignalBus::new(),
            config,
        }
    }
}

enum PaymentOutcome {
    Paid(String),
    TimedOut,
}

/// A running order fulfillment saga.
pub struct OrderSaga<S, I, Sh, T> {
    env: Arc<SagaEnv<S, I, Sh, T>>,
    order_id: OrderId,
    instance: SagaInstance,
    status: Arc<StatusCell>,
    window: Option<SignalWindow>,
}

impl<S, I, Sh, T> OrderSaga<S, I, Sh, T>
where
    S: EventStore + Clone + 'static,
    I: InventoryService + 'static,
    Sh: ShippingService + 'static,
    T: TimerService + 'static,
{
    /// Wraps a started or replayed instance.
    ///
    /// A saga resumed while still waiting reopens its wait point here, before
    /// the caller can observe its status.
    pub(crate) fn new(
        env: Arc<SagaEnv<S, I, Sh, T>>,
        instance: SagaInstance,
        status: Arc<StatusCell>,
    ) -> Result<Self> {
        let order_id = instance
            .order_id()
            .cloned()
            .ok_or_else(|| SagaError::CorruptJournal("saga has no order".to_string()))?;
        let mut saga = Self {
            env,
            order_id,
            instance,
            status,
            window: None,
        };
        if saga.instance.pending_abort().is_none() && !saga.instance.wait_resolved() {
            if let Some(point) = saga.instance.state().wait_point() {
                saga.open_window(point);
            }
        }
        Ok(saga)
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// Drives the saga until it reaches a terminal status.
    pub async fn run(mut self) -> Result<OrderStatus> {
        loop {
            if let Some((target, reason)) = self.instance.pending_abort().cloned() {
                self.unwind(target, reason).await?;
                continue;
            }

            match self.instance.state() {
                OrderState::Initializing => {
                    self.transition(OrderState::Reserving, "reserving inventory")
                        .await?
                }
                OrderState::Reserving => self.reserve_inventory().await?,
                OrderState::AwaitingReview => self.await_review().await?,
                OrderState::AwaitingPayment => self.await_payment().await?,
                OrderState::Shipping => self.ship().await?,
                OrderState::Completed
                | OrderState::Rejected
                | OrderState::Cancelled
                | OrderState::Failed => return self.current_status(),
            }
        }
    }

    fn order(&self) -> Result<&Order> {
        self.instance
            .order()
            .ok_or_else(|| SagaError::CorruptJournal("saga has no order".to_string()))
    }

    fn current_status(&self) -> Result<OrderStatus> {
        self.instance
            .status()
            .ok_or_else(|| SagaError::CorruptJournal("saga has no order".to_string()))
    }

    #[tracing::instrument(skip(self))]
    async fn reserve_inventory(&mut self) -> Result<()> {
        let order = self.order()?.clone();

        if !self.instance.is_step_completed(STEP_RESERVE_INVENTORY) {
            tracing::info!(step = STEP_RESERVE_INVENTORY, "saga step started");
            let env = Arc::clone(&self.env);
            let reserved = retry_step(STEP_RESERVE_INVENTORY, &env.config.retry, || {
                env.inventory.reserve(&order.order_id, &order.items)
            })
            .await;

            match reserved {
                Ok(()) => {
                    let undo = Compensation::ReleaseInventory {
                        order_id: order.order_id.clone(),
                        items: order.items.clone(),
                    };
                    self.record(SagaEvent::step_completed(STEP_RESERVE_INVENTORY, Some(undo)))
                        .await?;
                    tracing::info!(step = STEP_RESERVE_INVENTORY, "saga step completed");
                }
                Err(err) => {
                    let reason = err.to_string();
                    tracing::warn!(step = STEP_RESERVE_INVENTORY, error = %reason, "saga step failed");
                    self.record(SagaEvent::step_failed(STEP_RESERVE_INVENTORY, &reason))
                        .await?;
                    return self
                        .abort(
                            OrderState::Failed,
                            format!("inventory reservation failed: {reason}"),
                        )
                        .await;
                }
            }
        }

        if order.requires_review() {
            self.transition(OrderState::AwaitingReview, "awaiting risk review")
                .await
        } else {
            self.transition(OrderState::AwaitingPayment, "awaiting payment")
                .await
        }
    }

    async fn await_review(&mut self) -> Result<()> {
        let action = match self.instance.admin_action() {
            Some(action) => action,
            None => {
                let received = self
                    .open_window(WaitPoint::AdminReview)
                    .recv_admin_action()
                    .await;
                self.window = None;
                let action =
                    received.ok_or_else(|| SagaError::WaitInterrupted(self.order_id.clone()))?;
                self.record(SagaEvent::admin_action_received(action)).await?;
                action
            }
        };
        tracing::info!(%action, "risk review decided");

        match action {
            AdminAction::Approve => {
                self.transition(
                    OrderState::AwaitingPayment,
                    "approved by risk review; awaiting payment",
                )
                .await
            }
            AdminAction::Reject => {
                self.abort(OrderState::Rejected, "rejected by risk review".to_string())
                    .await
            }
        }
    }

    async fn await_payment(&mut self) -> Result<()> {
        if self.instance.payment_reference().is_some() {
            return self
                .transition(OrderState::Shipping, "payment received; shipping")
                .await;
        }
        if self.instance.payment_timed_out() {
            return self.abort(OrderState::Cancelled, self.timeout_reason()).await;
        }

        let deadline = match self.instance.payment_deadline() {
            Some(deadline) => deadline,
            None => {
                let timeout = TimeDelta::from_std(self.env.config.payment_timeout)
                    .map_err(|err| SagaError::Config(format!("payment timeout: {err}")))?;
                let deadline = self
                    .env
                    .timer
                    .now()
                    .checked_add_signed(timeout)
                    .ok_or_else(|| SagaError::Config("payment timeout overflows".to_string()))?;
                self.record(SagaEvent::payment_timer_started(deadline))
                    .await?;
                deadline
            }
        };

        let order_id = self.order_id.clone();
        let env = Arc::clone(&self.env);
        let window = self.open_window(WaitPoint::Payment);
        let outcome = tokio::select! {
            biased;
            reference = window.recv_payment() => match reference {
                Some(reference) => PaymentOutcome::Paid(reference),
                None => return Err(SagaError::WaitInterrupted(order_id)),
            },
            () = env.timer.sleep_until(deadline) => PaymentOutcome::TimedOut,
        };
        self.window = None;

        match outcome {
            PaymentOutcome::Paid(reference) => {
                tracing::info!(%reference, "payment received");
                self.record(SagaEvent::payment_received(reference)).await?;
                self.transition(OrderState::Shipping, "payment received; shipping")
                    .await
            }
            PaymentOutcome::TimedOut => {
                tracing::info!(%deadline, "payment deadline passed");
                self.record(SagaEvent::payment_timed_out(deadline)).await?;
                self.abort(OrderState::Cancelled, self.timeout_reason())
                    .await
            }
        }
    }

    fn timeout_reason(&self) -> String {
        format!(
            "payment not received within {}s",
            self.env.config.payment_timeout.as_secs()
        )
    }

    #[tracing::instrument(skip(self))]
    async fn ship(&mut self) -> Result<()> {
        let shipments: Vec<Shipment> = if self.instance.shipments().is_empty() {
            let planned = plan_shipments(self.order()?);
            self.record(SagaEvent::shipments_planned(planned.clone()))
                .await?;
            planned
        } else {
            self.instance.shipments().to_vec()
        };

        let pending: Vec<Shipment> = shipments
            .iter()
            .filter(|s| self.instance.shipment_outcome(&s.shipment_id).is_none())
            .cloned()
            .collect();

        if !pending.is_empty() {
            let splitter = ShipmentSplitter::new(
                self.env.store.clone(),
                Arc::clone(&self.env.shipping),
                self.env.config.retry.clone(),
            );
            for (shipment_id, result) in splitter.run_all(pending).await {
                let event = match result {
                    Ok(tracking_number) => SagaEvent::shipment_completed(shipment_id, tracking_number),
                    Err(err) => SagaEvent::shipment_failed(shipment_id, err.to_string()),
                };
                self.record(event).await?;
            }
        }

        let failures: Vec<String> = shipments
            .iter()
            .filter_map(|s| match self.instance.shipment_outcome(&s.shipment_id) {
                Some(ShipmentOutcome::Failed { error }) => {
                    Some(format!("{}: {}", s.shipment_id, error))
                }
                _ => None,
            })
            .collect();

        if failures.is_empty() {
            self.transition(OrderState::Completed, "order fulfilled; all shipments labeled")
                .await
        } else {
            self.transition(
                OrderState::Failed,
                format!("shipment failed: {}", failures.join("; ")),
            )
            .await
        }
    }

    /// Settles in `target`, unwinding committed steps first if there are any.
    async fn abort(&mut self, target: OrderState, reason: String) -> Result<()> {
        if self.instance.compensations().is_empty() {
            return self.transition(target, reason).await;
        }
        self.record(SagaEvent::compensation_started(target, &reason))
            .await?;
        self.unwind(target, reason).await
    }

    /// Runs the remaining compensations most recent first, then settles.
    ///
    /// The undo actions run on a task of their own so that dropping this
    /// saga mid-unwind does not interrupt them; their outcomes are journaled
    /// once the task finishes.
    async fn unwind(&mut self, target: OrderState, reason: String) -> Result<()> {
        self.window = None;
        tracing::warn!(%target, %reason, "compensating");

        let entries: Vec<Compensation> = self.instance.compensations().unwind_order().cloned().collect();
        let env = Arc::clone(&self.env);
        let outcomes = tokio::spawn(async move {
            let mut outcomes = Vec::with_capacity(entries.len());
            for entry in entries {
                let result =
                    retry_step(entry.step_name(), &env.config.retry, || entry.run(&env.inventory))
                        .await;
                outcomes.push((entry.step_name(), result));
            }
            outcomes
        })
        .await
        .map_err(|err| SagaError::CompensationFailed {
            step: "unwind".to_string(),
            reason: err.to_string(),
        })?;

        for (step, result) in outcomes {
            match result {
                Ok(()) => {
                    tracing::info!(step, "compensation step completed");
                    self.record(SagaEvent::compensation_step_completed(step))
                        .await?;
                }
                Err(err) => {
                    tracing::error!(step, error = %err, "compensation step failed");
                    metrics::counter!("saga_compensation_failures_total", "step" => step)
                        .increment(1);
                    self.record(SagaEvent::compensation_step_failed(step, err.to_string()))
                        .await?;
                }
            }
        }

        let failures = self.instance.compensation_failures();
        let message = if failures.is_empty() {
            reason
        } else {
            format!("{reason}; compensation failed: {}", failures.join(", "))
        };
        self.transition(target, message).await
    }

    async fn transition(&mut self, next: OrderState, message: impl Into<String>) -> Result<()> {
        let current = self.instance.state();
        if !current.can_transition_to(next) {
            return Err(SagaError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        match next.wait_point() {
            Some(point) => {
                self.open_window(point);
            }
            None => self.window = None,
        }

        self.record(SagaEvent::status_changed(next, message)).await?;
        tracing::info!(from = %current, to = %next, "order status changed");

        if next.is_terminal() {
            metrics::counter!("saga_finished_total", "status" => next.as_str()).increment(1);
        }
        Ok(())
    }

    /// Returns the open window for `point`, opening it if needed.
    fn open_window(&mut self, point: WaitPoint) -> &mut SignalWindow {
        let window = match self.window.take() {
            Some(window) if window.point() == point => window,
            _ => self.env.signals.open(&self.order_id, point),
        };
        self.window.insert(window)
    }

    /// Journals one event, then folds it in and publishes the new status.
    ///
    /// Journal outages are retried under the step policy. An append that
    /// landed but reported failure comes back as a version conflict, which
    /// halts the saga so it can be rebuilt from what was written.
    async fn record(&mut self, event: SagaEvent) -> Result<()> {
        let stream_id = self
            .instance
            .stream_id()
            .ok_or_else(|| SagaError::CorruptJournal("saga has no stream".to_string()))?;
        let current = self.instance.version();
        let env = Arc::clone(&self.env);
        let version = retry_step(STEP_JOURNAL_APPEND, &env.config.retry, || {
            journal::append(
                &env.store,
                &stream_id,
                SagaInstance::stream_type(),
                current,
                &event,
            )
        })
        .await?;

        self.instance.apply(event);
        self.instance.set_version(version);
        if let Some(status) = self.instance.status() {
            self.status.publish(status);
        }
        Ok(())
    }
}
