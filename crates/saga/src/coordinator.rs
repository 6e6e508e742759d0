//! Saga coordinator: the boundary through which orders enter and are observed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use common::OrderId;
use dashmap::DashMap;
use domain::{AdminAction, Aggregate, Order};
use event_store::{EventStore, EventStoreExt, Version};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::Instrument;

use crate::aggregate::SagaInstance;
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::journal;
use crate::order_fulfillment::{SAGA_TYPE, SagaConfig, saga_stream_id};
use crate::services::{InventoryService, ShippingService};
use crate::signals::{Delivery, Signal};
use crate::snapshot::StatusCell;
use crate::state::OrderStatus;
use crate::timer::TimerService;
use crate::workflow::{OrderSaga, SagaEnv};

/// Handle on one order's saga.
#[derive(Debug, Clone)]
pub struct OrderHandle {
    order_id: OrderId,
    status: Arc<StatusCell>,
}

impl OrderHandle {
    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// Last committed status.
    pub fn status(&self) -> OrderStatus {
        self.status.load()
    }

    /// Waits until the status satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&OrderStatus) -> bool) -> OrderStatus {
        self.status.wait_for(predicate).await
    }

    pub async fn wait_until_terminal(&self) -> OrderStatus {
        self.wait_for(OrderStatus::is_terminal).await
    }
}

struct RunningSaga {
    generation: u64,
    status: Arc<StatusCell>,
    task: AbortHandle,
}

type RunningMap = DashMap<OrderId, RunningSaga>;

/// Starts, resumes, signals and queries order fulfillment sagas.
///
/// Each saga runs on its own task, which removes itself from the running set
/// once the order is terminal. Status queries are answered from the
/// in-process snapshot while the saga runs here, and from the journal
/// otherwise.
pub struct SagaCoordinator<S, I, Sh, T> {
    env: Arc<SagaEnv<S, I, Sh, T>>,
    running: Arc<RunningMap>,
    next_generation: AtomicU64,
}

impl<S, I, Sh, T> SagaCoordinator<S, I, Sh, T>
where
    S: EventStore + Clone + 'static,
    I: InventoryService + 'static,
    Sh: ShippingService + 'static,
    T: TimerService + 'static,
{
    /// Creates a new saga coordinator.
    pub fn new(store: S, inventory: I, shipping: Sh, timer: T, config: SagaConfig) -> Self {
        Self {
            env: Arc::new(SagaEnv::new(store, inventory, shipping, timer, config)),
            running: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.env.store
    }

    pub fn inventory(&self) -> &I {
        &self.env.inventory
    }

    pub fn shipping(&self) -> &Sh {
        &self.env.shipping
    }

    pub fn config(&self) -> &SagaConfig {
        &self.env.config
    }

    /// Validates and journals a new order, then starts its saga.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id, amount = order.amount))]
    pub async fn start_order(&self, order: Order) -> Result<OrderHandle> {
        order.validate()?;
        if self.running.contains_key(&order.order_id) {
            return Err(SagaError::DuplicateOrder(order.order_id));
        }

        let stream_id = saga_stream_id(&order.order_id);
        let started = SagaEvent::saga_started(order.clone());
        let version = match journal::append(
            &self.env.store,
            &stream_id,
            SAGA_TYPE,
            Version::initial(),
            &started,
        )
        .await
        {
            Ok(version) => version,
            Err(SagaError::EventStore(err)) if err.is_conflict() => {
                return Err(SagaError::DuplicateOrder(order.order_id));
            }
            Err(err) => return Err(err),
        };

        let mut instance = SagaInstance::default();
        instance.apply(started);
        instance.set_version(version);

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!("order saga started");
        self.launch(instance)
    }

    /// Number of sagas currently owned by this coordinator.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Last committed status of an order.
    pub async fn query_status(&self, order_id: &OrderId) -> Result<OrderStatus> {
        if let Some(running) = self.running.get(order_id) {
            return Ok(running.status.load());
        }

        let instance = self.load(order_id).await?;
        instance
            .status()
            .ok_or_else(|| SagaError::CorruptJournal(format!("order {order_id} has no start")))
    }

    pub fn handle(&self, order_id: &OrderId) -> Option<OrderHandle> {
        self.running.get(order_id).map(|running| OrderHandle {
            order_id: order_id.clone(),
            status: running.status.clone(),
        })
    }

    /// Delivers a payment confirmation. Dropped unless the order awaits payment.
    #[tracing::instrument(skip(self, reference))]
    pub async fn signal_payment(
        &self,
        order_id: &OrderId,
        reference: impl Into<String>,
    ) -> Result<Delivery> {
        self.ensure_known(order_id).await?;
        let delivery = self.env.signals.deliver(
            order_id,
            Signal::PaymentPaid {
                reference: reference.into(),
            },
        );
        tracing::info!(?delivery, "payment signal");
        Ok(delivery)
    }

    /// Delivers a risk review decision. Dropped unless the order awaits review.
    #[tracing::instrument(skip(self))]
    pub async fn signal_admin_action(&self, order_id: &OrderId, action: &str) -> Result<Delivery> {
        let action: AdminAction = action.parse()?;
        self.ensure_known(order_id).await?;
        let delivery = self
            .env
            .signals
            .deliver(order_id, Signal::AdminAction(action));
        tracing::info!(%action, ?delivery, "admin action signal");
        Ok(delivery)
    }

    /// Restarts every journaled saga that has not reached a terminal status.
    ///
    /// Returns how many were started.
    #[tracing::instrument(skip(self))]
    pub async fn resume_all(&self) -> Result<usize> {
        let mut resumed = 0;
        for stream_id in self.env.store.list_streams(SAGA_TYPE).await? {
            let Some(instance) =
                journal::load::<_, SagaInstance>(&self.env.store, &stream_id).await?
            else {
                continue;
            };
            let Some(order_id) = instance.order_id().cloned() else {
                tracing::warn!(%stream_id, "journal without start event skipped");
                continue;
            };
            if instance.state().is_terminal() || self.is_running(&order_id) {
                continue;
            }

            tracing::info!(%order_id, status = %instance.state(), "resuming order saga");
            self.launch(instance)?;
            resumed += 1;
        }

        tracing::info!(resumed, "unfinished sagas resumed");
        Ok(resumed)
    }

    /// Restarts one saga from its journal unless it is already running here.
    pub async fn resume(&self, order_id: &OrderId) -> Result<OrderHandle> {
        if self.is_running(order_id) {
            if let Some(handle) = self.handle(order_id) {
                return Ok(handle);
            }
        }
        let instance = self.load(order_id).await?;
        self.launch(instance)
    }

    /// Stops every saga task. Journals are left as they are, ready to resume.
    pub fn shutdown(&self) {
        for running in self.running.iter() {
            running.task.abort();
        }
        self.running.clear();
        tracing::info!("saga coordinator stopped");
    }

    fn is_running(&self, order_id: &OrderId) -> bool {
        self.running
            .get(order_id)
            .is_some_and(|running| !running.task.is_finished())
    }

    async fn load(&self, order_id: &OrderId) -> Result<SagaInstance> {
        journal::load(&self.env.store, &saga_stream_id(order_id))
            .await?
            .ok_or_else(|| SagaError::OrderNotFound(order_id.clone()))
    }

    async fn ensure_known(&self, order_id: &OrderId) -> Result<()> {
        if self.running.contains_key(order_id)
            || self
                .env
                .store
                .stream_exists(&saga_stream_id(order_id))
                .await?
        {
            Ok(())
        } else {
            Err(SagaError::OrderNotFound(order_id.clone()))
        }
    }

    fn launch(&self, instance: SagaInstance) -> Result<OrderHandle> {
        let initial = instance
            .status()
            .ok_or_else(|| SagaError::CorruptJournal("saga has no order".to_string()))?;
        let status = Arc::new(StatusCell::new(initial));
        let saga = OrderSaga::new(Arc::clone(&self.env), instance, Arc::clone(&status))?;
        let order_id = saga.order_id().clone();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let env = Arc::clone(&self.env);
        let running = Arc::clone(&self.running);
        let task_status = Arc::clone(&status);
        let span = tracing::info_span!("order_saga", %order_id);
        let task = tokio::spawn(
            async move {
                // the entry must exist before it can be removed
                let _ = registered_rx.await;
                let order_id = saga.order_id().clone();
                supervise(env, saga, task_status).await;
                running.remove_if(&order_id, |_, entry| entry.generation == generation);
            }
            .instrument(span),
        );

        self.running.insert(
            order_id.clone(),
            RunningSaga {
                generation,
                status: Arc::clone(&status),
                task: task.abort_handle(),
            },
        );
        let _ = registered_tx.send(());
        Ok(OrderHandle { order_id, status })
    }
}

/// Drives a saga to a terminal status.
///
/// A saga that halts, for example because its journal stayed unreachable
/// through every append attempt, is rebuilt from its journal and run again,
/// up to the retry policy's attempt budget.
async fn supervise<S, I, Sh, T>(
    env: Arc<SagaEnv<S, I, Sh, T>>,
    mut saga: OrderSaga<S, I, Sh, T>,
    status: Arc<StatusCell>,
) where
    S: EventStore + Clone + 'static,
    I: InventoryService + 'static,
    Sh: ShippingService + 'static,
    T: TimerService + 'static,
{
    let started = Instant::now();
    let order_id = saga.order_id().clone();
    let policy = env.config.retry.clone();
    let mut relaunches = 0;

    loop {
        match saga.run().await {
            Ok(finished) => {
                metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
                tracing::info!(
                    status = %finished.status,
                    message = %finished.message,
                    "order saga finished"
                );
                return;
            }
            Err(err) => {
                metrics::counter!("saga_halted_total").increment(1);
                tracing::error!(error = %err, "order saga halted");
            }
        }

        saga = loop {
            relaunches += 1;
            if relaunches > policy.max_attempts {
                tracing::error!(
                    relaunches = policy.max_attempts,
                    "order saga abandoned, resume it from its journal"
                );
                return;
            }
            tokio::time::sleep(policy.delay_after(relaunches)).await;
            match relaunch(&env, &order_id, &status).await {
                Ok(saga) => break saga,
                Err(err) => {
                    tracing::warn!(error = %err, attempt = relaunches, "order saga relaunch failed");
                }
            }
        };
        tracing::info!(attempt = relaunches, "order saga relaunched from its journal");
    }
}

/// Rebuilds a halted saga from what its journal holds.
async fn relaunch<S, I, Sh, T>(
    env: &Arc<SagaEnv<S, I, Sh, T>>,
    order_id: &OrderId,
    status: &Arc<StatusCell>,
) -> Result<OrderSaga<S, I, Sh, T>>
where
    S: EventStore + Clone + 'static,
    I: InventoryService + 'static,
    Sh: ShippingService + 'static,
    T: TimerService + 'static,
{
    let instance = journal::load::<_, SagaInstance>(&env.store, &saga_stream_id(order_id))
        .await?
        .ok_or_else(|| SagaError::OrderNotFound(order_id.clone()))?;
    if let Some(current) = instance.status() {
        status.publish(current);
    }
    OrderSaga::new(Arc::clone(env), instance, Arc::clone(status))
}

impl<S, I, Sh, T> Drop for SagaCoordinator<S, I, Sh, T> {
    fn drop(&mut self) {
        for running in self.running.iter() {
            running.task.abort();
        }
    }
}
