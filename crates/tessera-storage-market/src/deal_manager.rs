//! Deal Manager
//!
//! Owns the deal registry and the per-deal lifecycle tasks. Callers create
//! deals from optimizer output, start their lifecycles, and query, verify,
//! renew or stop monitoring them.

use crate::error::{Result, StorageMarketError};
use crate::ledger::{LedgerAddress, LedgerClient};
use crate::lifecycle::{
    Applier, DealLifecycle, EventSink, LifecycleContext, LifecycleEventKind, VerificationOutcome,
};
use crate::provider::ProviderTransport;
use crate::retry::RetryPolicy;
use crate::types::{Deal, DealParameters, DealState, LifecycleState};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tessera_crypto::Keypair;
use tessera_storage::DealStore;
use tessera_types::{DatasetId, DealId};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RenewalPolicy {
    /// Renew only through `renew_deal`
    #[default]
    Manual,
    /// Renew automatically when the expiring window opens
    Auto { extra_epochs: u64 },
}

/// Deal manager configuration
#[derive(Debug, Clone)]
pub struct DealManagerConfig {
    /// Wall-clock length of one ledger epoch
    pub epoch_duration: Duration,
    pub inclusion_timeout: Duration,
    /// First sealing poll interval; doubles per poll
    pub poll_base_interval: Duration,
    pub poll_max_interval: Duration,
    pub max_polls: u32,
    pub verification_interval: Duration,
    pub challenges_per_verification: u32,
    pub max_consecutive_failures: u32,
    /// How long before expiry a deal enters `Expiring`
    pub expiring_window: Duration,
    pub renewal_policy: RenewalPolicy,
    pub min_renewal_epochs: u64,
    pub require_signed_proofs: bool,
    /// Fetch each challenged leaf and compare it with the proof
    pub retrieval_spot_check: bool,
    pub ledger_address: LedgerAddress,
    pub retry: RetryPolicy,
    pub event_buffer: usize,
}

impl Default for DealManagerConfig {
    fn default() -> Self {
        Self {
            epoch_duration: Duration::from_secs(30),
            inclusion_timeout: Duration::from_secs(600),
            poll_base_interval: Duration::from_secs(5),
            poll_max_interval: Duration::from_secs(300),
            max_polls: 60,
            verification_interval: Duration::from_secs(3600),
            challenges_per_verification: 3,
            max_consecutive_failures: 3,
            expiring_window: Duration::from_secs(7 * 24 * 3600),
            renewal_policy: RenewalPolicy::Manual,
            min_renewal_epochs: 2_880, // one day of epochs
            require_signed_proofs: true,
            retrieval_spot_check: true,
            ledger_address: LedgerAddress::default(),
            retry: RetryPolicy::default(),
            event_buffer: 256,
        }
    }
}

impl DealManagerConfig {
    /// Delay after the `poll`-th sealing poll
    pub fn poll_interval(&self, poll: u32) -> Duration {
        self.poll_base_interval
            .saturating_mul(2u32.saturating_pow(poll.min(16)))
            .min(self.poll_max_interval)
    }
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    ctx: LifecycleContext,
    tasks: Mutex<HashMap<DealId, MonitorTask>>,
    create_lock: Mutex<()>,
    applier: Mutex<Option<JoinHandle<()>>>,
    /// Stopped after every lifecycle task has joined, so final reports land
    applier_cancel: CancellationToken,
    cancel: CancellationToken,
    transitions: broadcast::Sender<Deal>,
}

/// Cheap-to-clone handle to the deal manager
#[derive(Clone)]
pub struct DealManager {
    inner: Arc<Inner>,
}

impl DealManager {
    /// Create a manager and start its applier. Must be called inside a
    /// tokio runtime.
    pub fn new(
        config: DealManagerConfig,
        store: DealStore<Deal>,
        ledger: Arc<dyn LedgerClient>,
        provider: Arc<dyn ProviderTransport>,
        keypair: Arc<Keypair>,
    ) -> Self {
        let config = Arc::new(config);
        let cancel = CancellationToken::new();
        let applier_cancel = CancellationToken::new();
        let (transitions, _) = broadcast::channel(config.event_buffer.max(16));
        let (events, rx) = EventSink::channel(config.event_buffer);

        let applier =
            Applier::new(store.clone(), transitions.clone(), Arc::clone(&config)).spawn(rx, applier_cancel.clone());

        Self {
            inner: Arc::new(Inner {
                ctx: LifecycleContext {
                    config,
                    store,
                    ledger,
                    provider,
                    keypair,
                    events,
                },
                tasks: Mutex::new(HashMap::new()),
                create_lock: Mutex::new(()),
                applier: Mutex::new(Some(applier)),
                applier_cancel,
                cancel,
                transitions,
            }),
        }
    }

    pub fn config(&self) -> &DealManagerConfig {
        &self.inner.ctx.config
    }

    pub fn store(&self) -> &DealStore<Deal> {
        &self.inner.ctx.store
    }

    /// Every record the applier writes, as it is written
    pub fn subscribe(&self) -> broadcast::Receiver<Deal> {
        self.inner.transitions.subscribe()
    }

    /// Register a deal in `Drafted`. One deal per (dataset, provider,
    /// replica index).
    pub async fn create_deal(&self, params: &DealParameters) -> Result<Deal> {
        if params.duration_epochs == 0 {
            return Err(StorageMarketError::MalformedInput(
                "deal duration must be at least one epoch".to_string(),
            ));
        }
        let store = &self.inner.ctx.store;

        let _guard = self.inner.create_lock.lock().await;
        let existing = store.list_by_dataset(&params.dataset_id).await?;
        if let Some(dup) = existing
            .iter()
            .find(|d| d.provider == params.provider && d.replica_index == params.replica_index)
        {
            return Err(StorageMarketError::MalformedInput(format!(
                "deal {} already covers replica {} of dataset {} with {}",
                dup.deal_id, params.replica_index, params.dataset_id, params.provider
            )));
        }

        let deal_id = store.next_deal_id().await?;
        let deal = Deal::from_parameters(deal_id, params, Utc::now());
        store.insert(&deal).await?;

        info!(
            deal_id,
            dataset_id = %deal.dataset_id,
            provider = %deal.provider,
            replica_index = deal.replica_index,
            total_cost = %deal.total_cost,
            "Deal drafted"
        );
        Ok(deal)
    }

    /// Spawn the lifecycle task for a deal. `payload` is the archive handed
    /// to the provider; a resumed deal past `Drafted` needs none.
    pub async fn start_lifecycle(&self, deal_id: DealId, payload: Option<Arc<Vec<u8>>>) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(StorageMarketError::Cancelled);
        }
        let deal = self.get_deal(deal_id).await?;
        if deal.state.is_terminal() {
            debug!(deal_id, state = ?deal.state, "Deal is terminal, nothing to monitor");
            return Ok(());
        }

        let mut tasks = self.inner.tasks.lock().await;
        if let Some(task) = tasks.get(&deal_id) {
            if !task.handle.is_finished() {
                return Ok(());
            }
        }

        let cancel = self.inner.cancel.child_token();
        let handle = DealLifecycle::new(deal_id, self.inner.ctx.clone(), payload, cancel.clone()).spawn();
        tasks.insert(deal_id, MonitorTask { cancel, handle });
        debug!(deal_id, state = ?deal.state, "Lifecycle task started");
        Ok(())
    }

    /// Restart monitoring for every non-terminal deal in the registry
    pub async fn resume_all(&self) -> Result<usize> {
        let mut resumed = 0;
        for deal in self.inner.ctx.store.list().await? {
            if !deal.state.is_terminal() {
                self.start_lifecycle(deal.deal_id, None).await?;
                resumed += 1;
            }
        }
        if resumed > 0 {
            info!(resumed, "Resumed deal lifecycles");
        }
        Ok(resumed)
    }

    pub async fn get_deal(&self, deal_id: DealId) -> Result<Deal> {
        Ok(self.inner.ctx.store.require(deal_id).await?)
    }

    pub async fn list_dataset_deals(&self, dataset_id: &DatasetId) -> Result<Vec<Deal>> {
        let mut deals = self.inner.ctx.store.list_by_dataset(dataset_id).await?;
        deals.sort_by_key(|d| d.deal_id);
        Ok(deals)
    }

    /// Challenge the provider now and record the outcome
    pub async fn verify_deal(&self, deal_id: DealId) -> Result<VerificationOutcome> {
        let deal = self.get_deal(deal_id).await?;
        if !deal.state.is_storing() {
            return Err(StorageMarketError::InvalidStateTransition {
                from: format!("{:?}", deal.state),
                to: "Verification".to_string(),
            });
        }

        let outcome = self.cancellable(self.inner.ctx.verify_storage(&deal)).await?;
        self.inner
            .ctx
            .events
            .submit(
                deal_id,
                LifecycleEventKind::VerificationCompleted {
                    ok: outcome.verified,
                    detail: outcome.detail.clone(),
                },
            )
            .await?;
        Ok(outcome)
    }

    /// Extend an active or expiring deal by `extra_epochs`
    pub async fn renew_deal(&self, deal_id: DealId, extra_epochs: u64) -> Result<Deal> {
        let min = self.config().min_renewal_epochs.max(1);
        if extra_epochs < min {
            return Err(StorageMarketError::MalformedInput(format!(
                "renewal must add at least {} epochs",
                min
            )));
        }

        let deal = self.get_deal(deal_id).await?;
        if !matches!(deal.state, DealState::Active | DealState::Expiring) {
            return Err(StorageMarketError::InvalidStateTransition {
                from: format!("{:?}", deal.state),
                to: format!("{:?}", DealState::Renewed),
            });
        }

        let renewed = self.cancellable(self.inner.ctx.renew(&deal, extra_epochs)).await??;
        info!(
            deal_id,
            extra_epochs,
            expires_at = ?renewed.expires_at,
            "Deal renewal applied"
        );
        Ok(renewed)
    }

    /// Stop a deal's lifecycle task; its recorded state is left as is.
    /// Returns whether a task was running.
    pub async fn cancel_monitoring(&self, deal_id: DealId) -> Result<bool> {
        let task = self.inner.tasks.lock().await.remove(&deal_id);
        let Some(task) = task else {
            // make sure the deal exists
            self.get_deal(deal_id).await?;
            return Ok(false);
        };
        let was_running = !task.handle.is_finished();
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(deal_id, error = %e, "Lifecycle task ended abnormally");
        }
        info!(deal_id, "Deal monitoring cancelled");
        Ok(was_running)
    }

    pub async fn is_monitored(&self, deal_id: DealId) -> bool {
        self.inner
            .tasks
            .lock()
            .await
            .get(&deal_id)
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Wait until the deal reaches one of `states`
    pub async fn wait_for_state(&self, deal_id: DealId, states: &[DealState], timeout: Duration) -> Result<Deal> {
        let rx = self.subscribe();
        tokio::time::timeout(timeout, self.next_in_state(rx, deal_id, states))
            .await
            .map_err(|_| {
                StorageMarketError::Other(format!("deal {} did not reach {:?} within {:?}", deal_id, states, timeout))
            })?
    }

    async fn next_in_state(
        &self,
        mut rx: broadcast::Receiver<Deal>,
        deal_id: DealId,
        states: &[DealState],
    ) -> Result<Deal> {
        let deal = self.get_deal(deal_id).await?;
        if states.contains(&deal.state) {
            return Ok(deal);
        }
        loop {
            match rx.recv().await {
                Ok(deal) if deal.deal_id == deal_id && states.contains(&deal.state) => return Ok(deal),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    let deal = self.get_deal(deal_id).await?;
                    if states.contains(&deal.state) {
                        return Ok(deal);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(StorageMarketError::Cancelled),
            }
        }
    }

    async fn cancellable<T>(&self, fut: impl std::future::Future<Output = T>) -> Result<T> {
        tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(StorageMarketError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Cancel every task, stop the applier and flush the registry
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.cancel.cancel();

        let (deal_ids, handles): (Vec<DealId>, Vec<JoinHandle<()>>) = self
            .inner
            .tasks
            .lock()
            .await
            .drain()
            .map(|(deal_id, task)| (deal_id, task.handle))
            .unzip();
        for (deal_id, joined) in deal_ids.into_iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                warn!(deal_id, error = %e, "Lifecycle task ended abnormally");
            }
        }
        self.inner.applier_cancel.cancel();
        if let Some(applier) = self.inner.applier.lock().await.take() {
            if let Err(e) = applier.await {
                warn!(error = %e, "Applier ended abnormally");
            }
        }

        self.inner.ctx.store.flush().await?;
        info!("Deal manager stopped");
        Ok(())
    }
}
