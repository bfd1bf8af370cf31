//! End-to-End Integration Tests for the Storage Market
//!
//! Runs datasets through archive, planning, proposal, inclusion, sealing,
//! verification, renewal and expiry against the simulated ledger and
//! providers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tessera_archive::piece_commitment;
use tessera_crypto::Keypair;
use tessera_storage::{DealStore, RegistryConfig};
use tessera_storage_market::*;
use tessera_types::{DatasetId, DealId, FilAmount, ProviderAddress};
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(30);

/// Test fixture wiring a coordinator to simulated collaborators
struct MarketFixture {
    coordinator: StorageMarketCoordinator,
    ledger: Arc<SimulatedLedger>,
    providers: Vec<Arc<SimulatedProvider>>,
    dir: TempDir,
}

fn deal_config() -> DealManagerConfig {
    DealManagerConfig {
        epoch_duration: Duration::from_millis(10),
        inclusion_timeout: Duration::from_secs(5),
        poll_base_interval: Duration::from_millis(10),
        poll_max_interval: Duration::from_millis(50),
        max_polls: 20,
        verification_interval: Duration::from_secs(3600),
        challenges_per_verification: 3,
        max_consecutive_failures: 3,
        expiring_window: Duration::from_millis(200),
        renewal_policy: RenewalPolicy::Manual,
        min_renewal_epochs: 10,
        retry: RetryPolicy {
            per_call_timeout: Duration::from_secs(5),
            max_attempts: 4,
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
            jitter: 0.0,
        },
        ..Default::default()
    }
}

/// Deals last `duration_epochs` × 10ms
fn market_config(deals: DealManagerConfig, duration_epochs: u64) -> MarketConfig {
    MarketConfig {
        optimizer: OptimizerConfig {
            min_duration_epochs: duration_epochs,
            candidate_durations: vec![duration_epochs],
            ..Default::default()
        },
        deals,
        compute_threads: 2,
        ..Default::default()
    }
}

impl MarketFixture {
    async fn new(config: MarketConfig) -> Self {
        Self::with_ledger(config, SimulatedLedger::new()).await
    }

    async fn with_ledger(config: MarketConfig, ledger: SimulatedLedger) -> Self {
        let mut network = SimulatedNetwork::new();
        let providers = vec![
            network.add(SimulatedProvider::new("f01000", FilAmount::from_atto(1_000), "eu")),
            network.add(SimulatedProvider::new("f01001", FilAmount::from_atto(1_200), "us")),
            network.add(SimulatedProvider::new("f01002", FilAmount::from_atto(5_000), "asia")),
        ];
        let catalog = network.catalog();
        let ledger = Arc::new(ledger);
        let store = DealStore::new(RegistryConfig::default()).unwrap();

        let coordinator = StorageMarketCoordinator::new(
            config,
            store,
            ledger.clone(),
            Arc::new(network),
            Arc::new(Keypair::generate()),
            catalog,
        );

        Self {
            coordinator,
            ledger,
            providers,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write_file(&self, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| ((i * 31 + i / 4096) % 251) as u8).collect();
        let path = self.dir.path().join(name);
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    /// Store a small dataset with one replica and return its deal
    async fn store_one(&self, name: &str) -> Deal {
        let (path, _) = self.write_file(name, 64 * 1024);
        let params = self
            .coordinator
            .store_dataset(&[path], FilAmount::from_fil(1.0), 1)
            .await
            .unwrap();
        let deals = self.coordinator.list_dataset_deals(&params[0].dataset_id).await.unwrap();
        assert_eq!(deals.len(), 1);
        deals.into_iter().next().unwrap()
    }

    async fn wait_for(&self, deal_id: DealId, states: &[DealState]) -> Deal {
        self.coordinator
            .deal_manager()
            .wait_for_state(deal_id, states, WAIT)
            .await
            .unwrap()
    }

    fn provider(&self, deal: &Deal) -> &Arc<SimulatedProvider> {
        self.providers
            .iter()
            .find(|p| p.address() == &deal.provider)
            .unwrap()
    }
}

fn transitions(deal: &Deal) -> Vec<(DealState, DealState)> {
    deal.audit_trail
        .iter()
        .filter_map(|e| match &e.event {
            AuditEvent::Transition { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_mib_dataset_reaches_active_on_two_providers() {
    let fx = MarketFixture::new(market_config(deal_config(), 100_000)).await;
    let (path, data) = fx.write_file("data.bin", 10 * 1024 * 1024);

    let budget = FilAmount::from_fil(1.0);
    let params = fx.coordinator.store_dataset(&[path], budget, 2).await.unwrap();
    assert!(params.len() >= 2);
    let total = params
        .iter()
        .fold(FilAmount::ZERO, |acc, p| acc.saturating_add(p.total_cost));
    assert!(total <= budget);

    // the two cheapest providers, in different regions
    let mut chosen: Vec<_> = params.iter().map(|p| p.provider.as_str().to_string()).collect();
    chosen.sort();
    assert_eq!(chosen, vec!["f01000", "f01001"]);

    let deals = fx.coordinator.list_dataset_deals(&params[0].dataset_id).await.unwrap();
    assert_eq!(deals.len(), 2);
    for deal in &deals {
        let active = fx.wait_for(deal.deal_id, &[DealState::Active]).await;
        assert!(active.activated_at.is_some());
        assert!(active.expires_at > active.activated_at);
        assert!(active.chain_deal_id.is_some());
        assert_eq!(
            transitions(&active),
            vec![
                (DealState::Drafted, DealState::Proposed),
                (DealState::Proposed, DealState::Publishing),
                (DealState::Publishing, DealState::Active),
            ]
        );

        let outcome = fx.coordinator.verify_deal(deal.deal_id).await.unwrap();
        assert!(outcome.verified, "{:?}", outcome.detail);
        assert!(outcome.proof.is_some());

        let verified = fx.coordinator.get_deal_status(deal.deal_id).await.unwrap();
        assert!(verified.last_verified_at.is_some());
        assert_eq!(verified.consecutive_failures, 0);

        let file = fx.coordinator.retrieve_file(deal.deal_id, "data.bin").await.unwrap();
        assert!(file == data);
    }

    let stats = fx.coordinator.get_stats().await.unwrap();
    assert_eq!(stats.total_deals, 2);
    assert_eq!(stats.active_deals, 2);
    assert_eq!(stats.monitored_deals, 2);
    assert_eq!(stats.committed_cost, total);

    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_budget_and_replica_floor_are_enforced() {
    let fx = MarketFixture::new(market_config(deal_config(), 1_000)).await;
    let (path, _) = fx.write_file("small.bin", 4096);

    let err = fx
        .coordinator
        .store_dataset(std::slice::from_ref(&path), FilAmount::from_atto(1), 2)
        .await
        .unwrap_err();
    match err {
        StorageMarketError::BudgetInfeasible { required, .. } => assert!(required.is_some()),
        other => panic!("unexpected error: {other}"),
    }

    let err = fx
        .coordinator
        .store_dataset(std::slice::from_ref(&path), FilAmount::from_fil(1.0), 4)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageMarketError::BudgetInfeasible { required: None, .. }));

    let err = fx
        .coordinator
        .store_dataset(&[path], FilAmount::from_fil(1.0), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageMarketError::MalformedInput(_)));

    // nothing was drafted
    assert_eq!(fx.coordinator.get_stats().await.unwrap().total_deals, 0);
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_storing_again_adds_replicas() {
    let fx = MarketFixture::new(market_config(deal_config(), 1_000)).await;
    let (path, _) = fx.write_file("again.bin", 4096);

    let first = fx
        .coordinator
        .store_dataset(std::slice::from_ref(&path), FilAmount::from_fil(1.0), 1)
        .await
        .unwrap();
    let second = fx
        .coordinator
        .store_dataset(&[path], FilAmount::from_fil(1.0), 1)
        .await
        .unwrap();

    assert_eq!(first[0].dataset_id, second[0].dataset_id);
    assert_eq!(first[0].replica_index, 0);
    assert_eq!(second[0].replica_index, 1);
    let deals = fx.coordinator.list_dataset_deals(&first[0].dataset_id).await.unwrap();
    assert_eq!(deals.len(), 2);
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unchanged_dataset_is_prepared_once() {
    let fx = MarketFixture::new(market_config(deal_config(), 1_000)).await;
    let (path, _) = fx.write_file("cached.bin", 8192);
    let paths = vec![path.clone()];

    let first = fx.coordinator.prepare_dataset(&paths).await.unwrap();
    fx.coordinator
        .store_dataset(&paths, FilAmount::from_fil(1.0), 1)
        .await
        .unwrap();
    let again = fx.coordinator.prepare_dataset(&paths).await.unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    // changed content is a new dataset version
    std::fs::write(&path, b"different bytes").unwrap();
    let changed = fx.coordinator.prepare_dataset(&paths).await.unwrap();
    assert_ne!(changed.dataset_id, first.dataset_id);
    assert!(!Arc::ptr_eq(&first, &changed));

    assert!(fx.coordinator.forget_dataset(&first.dataset_id).await);
    assert!(fx.coordinator.prepared(&first.dataset_id).await.is_none());
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_proposal_fails_and_stays_failed() {
    let fx = MarketFixture::new(market_config(deal_config(), 1_000)).await;
    for provider in &fx.providers {
        provider
            .set_behaviour(ProviderBehaviour {
                reject_proposals: Some("no capacity".to_string()),
                ..Default::default()
            })
            .await;
    }

    let deal = fx.store_one("rejected.bin").await;
    let failed = fx.wait_for(deal.deal_id, &[DealState::Failed]).await;
    assert_eq!(
        failed.failure,
        Some(FailureCause::ProviderRejected {
            reason: "no capacity".to_string()
        })
    );
    assert_eq!(transitions(&failed), vec![(DealState::Drafted, DealState::Failed)]);

    // terminal: no further transitions are accepted
    let err = fx.coordinator.verify_deal(deal.deal_id).await.unwrap_err();
    assert!(matches!(err, StorageMarketError::InvalidStateTransition { .. }));
    let err = fx.coordinator.renew_deal(deal.deal_id, 100).await.unwrap_err();
    assert!(matches!(err, StorageMarketError::InvalidStateTransition { .. }));

    let after = fx.coordinator.get_deal_status(deal.deal_id).await.unwrap();
    assert_eq!(after.state, DealState::Failed);
    assert_eq!(after.audit_trail.len(), failed.audit_trail.len());
    assert!(fx.ledger.submitted().await.is_empty());
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_transaction_fails_deal() {
    let ledger = SimulatedLedger::with_behaviour(LedgerBehaviour {
        reject_transactions: Some("insufficient collateral".to_string()),
        ..Default::default()
    });
    let fx = MarketFixture::with_ledger(market_config(deal_config(), 1_000), ledger).await;

    let deal = fx.store_one("tx.bin").await;
    let failed = fx.wait_for(deal.deal_id, &[DealState::Failed]).await;
    assert!(matches!(failed.failure, Some(FailureCause::TransactionRejected { .. })));
    assert!(failed.transaction_ref.is_some());
    assert_eq!(
        transitions(&failed),
        vec![(DealState::Drafted, DealState::Proposed), (DealState::Proposed, DealState::Failed)]
    );
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_during_submission_keeps_single_proposal() {
    let ledger = SimulatedLedger::with_behaviour(LedgerBehaviour {
        submit_delay: Duration::from_millis(300),
        ..Default::default()
    });
    let fx = MarketFixture::with_ledger(market_config(deal_config(), 1_000), ledger).await;
    let deal = fx.store_one("slow-ledger.bin").await;

    // the ledger has recorded the transaction but not answered yet
    tokio::time::timeout(WAIT, async {
        while fx.ledger.submitted().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(fx.coordinator.cancel_monitoring(deal.deal_id).await.unwrap());

    let proposed = fx.coordinator.get_deal_status(deal.deal_id).await.unwrap();
    assert_eq!(proposed.state, DealState::Proposed);
    assert!(proposed.transaction_ref.is_some());

    fx.ledger.set_behaviour(LedgerBehaviour::default()).await;
    assert_eq!(fx.coordinator.resume_all().await.unwrap(), 1);
    let active = fx.wait_for(deal.deal_id, &[DealState::Active]).await;
    assert_eq!(active.transaction_ref, proposed.transaction_ref);
    assert_eq!(fx.ledger.submitted().await.len(), 1);
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_inclusion_times_out() {
    let ledger = SimulatedLedger::with_behaviour(LedgerBehaviour {
        never_include: true,
        ..Default::default()
    });
    let config = DealManagerConfig {
        inclusion_timeout: Duration::from_millis(300),
        ..deal_config()
    };
    let fx = MarketFixture::with_ledger(market_config(config, 1_000), ledger).await;

    let deal = fx.store_one("dropped.bin").await;
    let failed = fx.wait_for(deal.deal_id, &[DealState::Failed]).await;
    assert_eq!(failed.failure, Some(FailureCause::InclusionTimeout));
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_inclusion_is_applied_once() {
    let ledger = SimulatedLedger::with_behaviour(LedgerBehaviour {
        duplicate_inclusion: true,
        ..Default::default()
    });
    let fx = MarketFixture::with_ledger(market_config(deal_config(), 1_000), ledger).await;

    let deal = fx.store_one("dup.bin").await;
    let active = fx.wait_for(deal.deal_id, &[DealState::Active]).await;
    let tx_ref = active.transaction_ref.clone().unwrap();
    assert_eq!(fx.ledger.inclusion_reports(&tx_ref).await, 2);

    let publishing = transitions(&active)
        .into_iter()
        .filter(|(_, to)| *to == DealState::Publishing)
        .count();
    assert_eq!(publishing, 1);
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_applier_ignores_repeated_reports() {
    let store: DealStore<Deal> = DealStore::new(RegistryConfig::default()).unwrap();
    let commitment = piece_commitment(b"applier payload", 0).unwrap();
    let params = DealParameters {
        dataset_id: DatasetId::new(b"applier"),
        piece_cid: commitment.piece_cid(),
        commitment_version: commitment.version,
        raw_size: commitment.unpadded_size,
        padded_size: commitment.padded_size,
        provider: ProviderAddress::new("f01000"),
        provider_key: *Keypair::generate().public_key(),
        price_per_epoch: FilAmount::from_atto(10),
        duration_epochs: 100,
        verified: false,
        replication_factor: 1,
        replica_index: 0,
        total_cost: FilAmount::from_atto(1_000),
    };
    let deal = Deal::from_parameters(store.next_deal_id().await.unwrap(), &params, chrono::Utc::now());
    store.insert(&deal).await.unwrap();

    let (tx, _rx) = broadcast::channel(16);
    let applier = Applier::new(store.clone(), tx, Arc::new(deal_config()));
    let tx_ref = TxRef("abc".to_string());

    for _ in 0..2 {
        applier
            .apply(
                deal.deal_id,
                LifecycleEventKind::ProposalSubmitted { tx_ref: tx_ref.clone() },
            )
            .await
            .unwrap();
        applier
            .apply(
                deal.deal_id,
                LifecycleEventKind::InclusionObserved {
                    block_height: 9,
                    chain_deal_id: Some(4),
                },
            )
            .await
            .unwrap();
    }

    let stored = store.require(deal.deal_id).await.unwrap();
    assert_eq!(stored.state, DealState::Publishing);
    assert_eq!(stored.chain_deal_id, Some(4));
    assert_eq!(transitions(&stored).len(), 2);

    // a different transaction for an already proposed deal is rejected
    let err = applier
        .apply(
            deal.deal_id,
            LifecycleEventKind::ProposalSubmitted {
                tx_ref: TxRef("other".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageMarketError::InvalidStateTransition { .. }));

    // an expiry report for a stale expiry is a no-op
    applier.apply(deal.deal_id, LifecycleEventKind::SealingConfirmed).await.unwrap();
    let before = store.require(deal.deal_id).await.unwrap();
    applier
        .apply(
            deal.deal_id,
            LifecycleEventKind::ExpiryWindowReached {
                expires_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();
    assert_eq!(store.require(deal.deal_id).await.unwrap().state, before.state);
}

#[tokio::test]
async fn test_sealing_rejection_and_poll_budget() {
    let config = DealManagerConfig {
        max_polls: 3,
        ..deal_config()
    };
    let fx = MarketFixture::new(market_config(config, 1_000)).await;
    let cheapest = &fx.providers[0];

    cheapest
        .set_behaviour(ProviderBehaviour {
            reject_sealing: Some("sector fault".to_string()),
            ..Default::default()
        })
        .await;
    let deal = fx.store_one("seal-a.bin").await;
    let failed = fx.wait_for(deal.deal_id, &[DealState::Failed]).await;
    assert!(matches!(failed.failure, Some(FailureCause::ProviderRejected { .. })));

    cheapest
        .set_behaviour(ProviderBehaviour {
            never_seal: true,
            ..Default::default()
        })
        .await;
    let deal = fx.store_one("seal-b.bin").await;
    let failed = fx.wait_for(deal.deal_id, &[DealState::Failed]).await;
    assert_eq!(failed.failure, Some(FailureCause::PollBudgetExhausted { polls: 3 }));
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let fx = MarketFixture::new(market_config(deal_config(), 1_000)).await;
    fx.providers[0].fail_next(2);
    fx.ledger.fail_next(2);

    let deal = fx.store_one("flaky.bin").await;
    let active = fx.wait_for(deal.deal_id, &[DealState::Active, DealState::Failed]).await;
    assert_eq!(active.state, DealState::Active);
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_fail_deal() {
    let fx = MarketFixture::new(market_config(deal_config(), 1_000)).await;
    fx.providers[0].fail_next(100);

    let deal = fx.store_one("down.bin").await;
    let failed = fx.wait_for(deal.deal_id, &[DealState::Failed]).await;
    assert_eq!(
        failed.failure,
        Some(FailureCause::RetryBudgetExhausted {
            operation: "propose_deal".to_string()
        })
    );
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lost_data_fails_after_consecutive_misses() {
    let config = DealManagerConfig {
        verification_interval: Duration::from_millis(100),
        max_consecutive_failures: 2,
        ..deal_config()
    };
    let fx = MarketFixture::new(market_config(config, 100_000)).await;

    let deal = fx.store_one("lost.bin").await;
    fx.wait_for(deal.deal_id, &[DealState::Active]).await;
    fx.provider(&deal)
        .set_behaviour(ProviderBehaviour {
            lose_data: true,
            ..Default::default()
        })
        .await;

    let failed = fx.wait_for(deal.deal_id, &[DealState::Failed]).await;
    assert_eq!(failed.failure, Some(FailureCause::VerificationFailed { consecutive: 2 }));
    let misses = failed
        .audit_trail
        .iter()
        .filter(|e| matches!(e.event, AuditEvent::Verification { ok: false, .. }))
        .count();
    assert_eq!(misses, 2);
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_proof_is_not_verified() {
    let fx = MarketFixture::new(market_config(deal_config(), 100_000)).await;
    let deal = fx.store_one("corrupt.bin").await;
    fx.wait_for(deal.deal_id, &[DealState::Active]).await;

    fx.provider(&deal)
        .set_behaviour(ProviderBehaviour {
            corrupt_proofs: true,
            ..Default::default()
        })
        .await;
    let outcome = fx.coordinator.verify_deal(deal.deal_id).await.unwrap();
    assert!(!outcome.verified);

    let after = fx.coordinator.get_deal_status(deal.deal_id).await.unwrap();
    assert_eq!(after.last_verified_at, None);
    assert_eq!(after.consecutive_failures, 1);
    assert_eq!(after.state, DealState::Active);
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_manual_renewal_extends_deal() {
    let fx = MarketFixture::new(market_config(deal_config(), 100_000)).await;
    let deal = fx.store_one("renew.bin").await;
    let active = fx.wait_for(deal.deal_id, &[DealState::Active]).await;

    let err = fx.coordinator.renew_deal(deal.deal_id, 5).await.unwrap_err();
    assert!(matches!(err, StorageMarketError::MalformedInput(_)));

    let renewed = fx.coordinator.renew_deal(deal.deal_id, 500).await.unwrap();
    assert_eq!(renewed.state, DealState::Active);
    assert_eq!(renewed.renewals, 1);
    assert_eq!(renewed.duration_epochs, active.duration_epochs + 500);
    assert!(renewed.expires_at > active.expires_at);
    assert!(renewed.total_cost > active.total_cost);
    assert!(transitions(&renewed).ends_with(&[
        (DealState::Active, DealState::Renewed),
        (DealState::Renewed, DealState::Active),
    ]));
    assert!(fx
        .ledger
        .submitted()
        .await
        .iter()
        .any(|tx| matches!(tx, TransactionPayload::RenewDeal { extra_epochs: 500, .. })));
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unrenewed_deal_expires() {
    // 50 epochs × 10ms, expiring window 200ms
    let fx = MarketFixture::new(market_config(deal_config(), 50)).await;
    let deal = fx.store_one("expire.bin").await;

    let expired = fx.wait_for(deal.deal_id, &[DealState::Expired]).await;
    assert!(transitions(&expired).ends_with(&[
        (DealState::Active, DealState::Expiring),
        (DealState::Expiring, DealState::Expired),
    ]));

    let err = fx.coordinator.renew_deal(deal.deal_id, 100).await.unwrap_err();
    assert!(matches!(err, StorageMarketError::InvalidStateTransition { .. }));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!fx.coordinator.deal_manager().is_monitored(deal.deal_id).await);
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_auto_renewal_keeps_deal_alive() {
    let config = DealManagerConfig {
        renewal_policy: RenewalPolicy::Auto { extra_epochs: 100 },
        ..deal_config()
    };
    let fx = MarketFixture::new(market_config(config, 50)).await;
    let deal = fx.store_one("auto.bin").await;

    let mut rx = fx.coordinator.deal_manager().subscribe();
    let renewed = tokio::time::timeout(WAIT, async {
        loop {
            let current = fx.coordinator.get_deal_status(deal.deal_id).await.unwrap();
            if current.renewals >= 1 {
                return current;
            }
            let _ = rx.recv().await;
        }
    })
    .await
    .unwrap();

    assert_ne!(renewed.state, DealState::Expired);
    assert_ne!(renewed.state, DealState::Failed);
    assert!(renewed
        .audit_trail
        .iter()
        .any(|e| matches!(e.event, AuditEvent::Renewal { extra_epochs: 100, .. })));
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_monitoring_keeps_recorded_state() {
    let config = DealManagerConfig {
        max_polls: 1_000,
        ..deal_config()
    };
    let fx = MarketFixture::new(market_config(config, 1_000)).await;
    fx.providers[0]
        .set_behaviour(ProviderBehaviour {
            never_seal: true,
            ..Default::default()
        })
        .await;

    let deal = fx.store_one("cancel.bin").await;
    fx.wait_for(deal.deal_id, &[DealState::Publishing]).await;

    assert!(fx.coordinator.cancel_monitoring(deal.deal_id).await.unwrap());
    assert!(!fx.coordinator.deal_manager().is_monitored(deal.deal_id).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after = fx.coordinator.get_deal_status(deal.deal_id).await.unwrap();
    assert_eq!(after.state, DealState::Publishing);

    // cancelling twice reports nothing was running
    assert!(!fx.coordinator.cancel_monitoring(deal.deal_id).await.unwrap());

    // resuming picks the deal up from its recorded state
    fx.providers[0].set_behaviour(ProviderBehaviour::default()).await;
    assert_eq!(fx.coordinator.resume_all().await.unwrap(), 1);
    let active = fx.wait_for(deal.deal_id, &[DealState::Active]).await;
    assert_eq!(active.state, DealState::Active);
    fx.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_deal_and_retrieval_checks() {
    let fx = MarketFixture::new(market_config(deal_config(), 100_000)).await;
    let err = fx.coordinator.get_deal_status(999).await.unwrap_err();
    assert!(matches!(err, StorageMarketError::DealNotFound(999)));

    let deal = fx.store_one("retrieve.bin").await;
    fx.wait_for(deal.deal_id, &[DealState::Active]).await;
    let err = fx
        .coordinator
        .retrieve_file(deal.deal_id, "not-there.bin")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageMarketError::NotFound(_)));

    let prepared = fx.coordinator.prepared(&deal.dataset_id).await.unwrap();
    let root = *prepared.archive.root().unwrap();
    let proof = fx.coordinator.prove_inclusion(&deal.dataset_id, &root).await.unwrap();
    assert!(verify_inclusion_proof(&proof, &root));
    fx.coordinator.shutdown().await.unwrap();
}
