//! Integration tests for the full entitlement pipeline.
//!
//! Tests: bootstrap → authorize → record usage → billing event → authorize
//!
//! Verifies:
//! - Free quota is enforced over the sliding window and lifted by Pro
//! - Billing events are idempotent and ordered by provider time
//! - Concurrent bootstrap yields a single account
//! - Store failures are errors, and fail closed when collapsed to a decision

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    use tierguard_core::{AccountId, Clock as _, DocumentId, FixedClock, SubscriptionId};
    use tierguard_entitlements::{
        Account, BillingEvent, BillingEventKind, Correlation, Decision, DenialReason, Tier,
        UnchangedReason,
    };

    use crate::config::EngineConfig;
    use crate::engine::{
        AccountBootstrap, BillingReconciler, DropReason, ReconcileOutcome, TierPolicyEngine,
        UsageRecorder,
    };
    use crate::error::{DecisionResultExt, EngineError};
    use crate::store::{AccountStore, InMemoryAccountStore, InMemoryUsageLedger};

    type TestClock = Arc<FixedClock>;

    struct Harness {
        accounts: Arc<InMemoryAccountStore>,
        ledger: Arc<InMemoryUsageLedger>,
        clock: TestClock,
        bootstrap: AccountBootstrap<InMemoryAccountStore, TestClock>,
        policy: TierPolicyEngine<InMemoryAccountStore, InMemoryUsageLedger, TestClock>,
        recorder: UsageRecorder<InMemoryUsageLedger, TestClock>,
        reconciler: BillingReconciler<InMemoryAccountStore, TestClock>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 20, 10, 0, 0).unwrap()
    }

    fn setup_with(config: EngineConfig) -> Harness {
        let _ = tierguard_observability::init_with(tierguard_observability::LogFormat::Pretty);

        let accounts = Arc::new(InMemoryAccountStore::new());
        let ledger = Arc::new(InMemoryUsageLedger::new());
        let clock: TestClock = Arc::new(FixedClock::new(start()));

        Harness {
            bootstrap: AccountBootstrap::with_clock(accounts.clone(), clock.clone()),
            policy: TierPolicyEngine::with_clock(accounts.clone(), ledger.clone(), clock.clone())
                .with_policy(config.usage_policy()),
            recorder: UsageRecorder::with_clock(ledger.clone(), clock.clone()),
            reconciler: BillingReconciler::with_clock(accounts.clone(), clock.clone())
                .with_email_fallback(config.email_correlation_fallback),
            accounts,
            ledger,
            clock,
        }
    }

    fn setup() -> Harness {
        setup_with(EngineConfig::default())
    }

    fn acct(raw: &str) -> AccountId {
        AccountId::parse(raw).unwrap()
    }

    fn billing_event(
        account: &AccountId,
        kind: BillingEventKind,
        at: DateTime<Utc>,
    ) -> BillingEvent {
        BillingEvent {
            event_id: None,
            kind,
            correlation: Correlation {
                account_id: Some(account.clone()),
                email: None,
            },
            subscription_id: SubscriptionId::parse("sub_acct").unwrap(),
            customer_id: None,
            period_end: Some(at + Duration::days(30)),
            occurred_at: at,
        }
    }

    async fn seed_usage_at(h: &Harness, account: &AccountId, at: DateTime<Utc>, n: usize) {
        let now = h.clock.now();
        h.clock.set(at);
        for _ in 0..n {
            h.recorder
                .record_creation(account, DocumentId::new())
                .await
                .unwrap();
        }
        h.clock.set(now);
    }

    #[tokio::test]
    async fn free_account_hits_limit_then_upgrades() {
        let h = setup();
        let id = acct("acct-1");

        let account = h.bootstrap.ensure_account(&id).await.unwrap();
        assert_eq!(account.tier, Tier::Free);

        for i in 0..10 {
            let decision = h.policy.authorize_create(&id).await.unwrap();
            assert!(decision.is_allowed(), "creation {} should be allowed", i + 1);
            h.recorder.record_creation(&id, DocumentId::new()).await.unwrap();
            h.clock.advance(Duration::minutes(1));
        }

        let eleventh = h.policy.authorize_create(&id).await.unwrap();
        assert_eq!(eleventh, Decision::deny(DenialReason::LimitReached));
        assert_eq!(
            serde_json::to_value(eleventh).unwrap(),
            json!({ "allowed": false, "reason": "LIMIT_REACHED" })
        );

        let activated =
            billing_event(&id, BillingEventKind::SubscriptionActivated, h.clock.now());
        assert!(h.reconciler.apply_billing_event(&activated).await.unwrap().is_applied());

        assert!(h.policy.authorize_create(&id).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn deleting_documents_frees_quota() {
        let h = setup();
        let id = acct("acct-delete");
        h.bootstrap.ensure_account(&id).await.unwrap();

        let mut docs = Vec::new();
        for _ in 0..12 {
            let doc = DocumentId::new();
            h.recorder.record_creation(&id, doc).await.unwrap();
            docs.push(doc);
        }
        assert!(!h.policy.authorize_create(&id).await.unwrap().is_allowed());

        for doc in docs.iter().rev().take(3) {
            h.recorder.mark_document_deleted(&id, *doc).await.unwrap();
        }
        assert_eq!(h.policy.quota(&id).await.unwrap().used, 9);
        assert!(h.policy.authorize_create(&id).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn window_boundaries_at_29_30_31_days() {
        let h = setup();
        let id = acct("acct-window");
        h.bootstrap.ensure_account(&id).await.unwrap();
        seed_usage_at(&h, &id, start() - Duration::hours(1), 8).await;

        seed_usage_at(&h, &id, start() - Duration::days(31), 5).await;
        assert_eq!(h.policy.quota(&id).await.unwrap().used, 8);

        seed_usage_at(&h, &id, start() - Duration::days(29), 1).await;
        assert_eq!(h.policy.quota(&id).await.unwrap().used, 9);
        assert!(h.policy.authorize_create(&id).await.unwrap().is_allowed());

        // Exactly 30 days old still counts.
        seed_usage_at(&h, &id, start() - Duration::days(30), 1).await;
        assert_eq!(h.policy.quota(&id).await.unwrap().used, 10);
        assert!(!h.policy.authorize_create(&id).await.unwrap().is_allowed());

        // One second later it has slid out.
        h.clock.advance(Duration::seconds(1));
        assert!(h.policy.authorize_create(&id).await.unwrap().is_allowed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_bootstrap_creates_one_account() {
        let h = Arc::new(setup());
        let id = acct("acct-race");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let h = h.clone();
                let id = id.clone();
                tokio::spawn(async move { h.bootstrap.ensure_account(&id).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(h.accounts.len(), 1);
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn duplicate_created_event_is_idempotent() {
        let h = setup();
        let id = acct("acct-dup");
        h.bootstrap.ensure_account(&id).await.unwrap();

        let created = billing_event(&id, BillingEventKind::SubscriptionCreated, start());
        assert!(h.reconciler.apply_billing_event(&created).await.unwrap().is_applied());
        let before = h.accounts.get_account(&id).await.unwrap().unwrap();

        assert_eq!(
            h.reconciler.apply_billing_event(&created).await.unwrap(),
            ReconcileOutcome::Unchanged {
                account_id: id.clone(),
                reason: UnchangedReason::Duplicate
            }
        );
        let after = h.accounts.get_account(&id).await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(after.tier, Tier::Pro);
        assert_eq!(after.subscription_id, Some(SubscriptionId::parse("sub_acct").unwrap()));
    }

    #[tokio::test]
    async fn late_created_after_revoke_stays_free() {
        let h = setup();
        let id = acct("acct-order");
        h.bootstrap.ensure_account(&id).await.unwrap();

        let revoked = billing_event(&id, BillingEventKind::SubscriptionRevoked, start());
        let created = billing_event(
            &id,
            BillingEventKind::SubscriptionCreated,
            start() - Duration::minutes(1),
        );

        h.reconciler.apply_billing_event(&revoked).await.unwrap();
        let outcome = h.reconciler.apply_billing_event(&created).await.unwrap();
        assert!(matches!(
            outcome,
            ReconcileOutcome::Dropped {
                reason: DropReason::StaleEvent { .. }
            }
        ));

        let account = h.accounts.get_account(&id).await.unwrap().unwrap();
        assert_eq!(account.tier, Tier::Free);
        assert!(account.subscription_id.is_none());
    }

    #[tokio::test]
    async fn cancel_keeps_pro_until_revoke() {
        let h = setup();
        let id = acct("acct-cancel");
        h.bootstrap.ensure_account(&id).await.unwrap();

        for (kind, minutes) in [
            (BillingEventKind::SubscriptionCreated, 0),
            (BillingEventKind::SubscriptionCanceled, 5),
        ] {
            h.reconciler
                .apply_billing_event(&billing_event(&id, kind, start() + Duration::minutes(minutes)))
                .await
                .unwrap();
        }
        assert!(h.policy.authorize_edit(&id).await.unwrap().is_allowed());

        h.reconciler
            .apply_billing_event(&billing_event(
                &id,
                BillingEventKind::SubscriptionRevoked,
                start() + Duration::days(30),
            ))
            .await
            .unwrap();
        assert_eq!(
            h.policy.authorize_edit(&id).await.unwrap(),
            Decision::deny(DenialReason::TierRestricted)
        );
    }

    #[tokio::test]
    async fn corrupt_tier_is_treated_as_free() {
        let h = setup();
        let account: Account = serde_json::from_value(json!({
            "id": "acct-corrupt",
            "tier": "",
            "subscription_id": null,
            "billing_period_end": null,
            "billing_customer_id": null,
            "email": null,
            "billing_watermark": null,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        let id = account.id.clone();
        h.accounts.put(account).unwrap();

        assert_eq!(
            h.policy.authorize_delete(&id).await.unwrap(),
            Decision::deny(DenialReason::TierRestricted)
        );
        seed_usage_at(&h, &id, start(), 10).await;
        assert_eq!(
            h.policy.authorize_create(&id).await.unwrap(),
            Decision::deny(DenialReason::LimitReached)
        );
    }

    #[tokio::test]
    async fn pro_is_allowed_everything_regardless_of_usage() {
        let h = setup();
        let id = acct("acct-pro");
        h.bootstrap.ensure_account(&id).await.unwrap();
        seed_usage_at(&h, &id, start(), 25).await;
        h.reconciler
            .apply_billing_event(&billing_event(&id, BillingEventKind::SubscriptionCreated, start()))
            .await
            .unwrap();

        for decision in [
            h.policy.authorize_create(&id).await,
            h.policy.authorize_edit(&id).await,
            h.policy.authorize_delete(&id).await,
            h.policy.authorize_download(&id).await,
            h.policy.authorize_view(&id).await,
        ] {
            assert!(decision.unwrap().is_allowed());
        }
        let quota = h.policy.quota(&id).await.unwrap();
        assert_eq!(quota.limit, None);
        assert_eq!(quota.used, 25);
    }

    #[tokio::test]
    async fn outage_is_an_error_and_fails_closed() {
        let h = setup();
        let id = acct("acct-outage");
        h.bootstrap.ensure_account(&id).await.unwrap();

        h.ledger.set_unavailable(true);
        let result = h.policy.authorize_create(&id).await;
        assert!(matches!(result, Err(EngineError::PersistenceUnavailable(_))));
        assert_eq!(result.or_fail_closed(), Decision::fail_closed());

        // Edit does not touch the ledger.
        assert!(h.policy.authorize_edit(&id).await.is_ok());

        h.accounts.set_unavailable(true);
        let event = billing_event(&id, BillingEventKind::SubscriptionCreated, start());
        let err = h.reconciler.apply_billing_event(&event).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn webhook_payload_reconciles_by_metadata_account_id() {
        let h = setup();
        let id = acct("user_abc");
        h.bootstrap.ensure_account(&id).await.unwrap();

        let body = json!({
            "id": "evt_1",
            "type": "subscription.created",
            "timestamp": "2026-05-20T09:00:00Z",
            "data": {
                "id": "sub_1",
                "customer_id": "cus_1",
                "current_period_end": "2026-06-20T09:00:00Z",
                "metadata": { "account_id": "user_abc" },
                "customer": { "email": "abc@example.com" }
            }
        });
        let event = BillingEvent::from_webhook_json(&body).unwrap();
        assert!(h.reconciler.apply_billing_event(&event).await.unwrap().is_applied());
        assert_eq!(
            h.bootstrap.billing_customer_id(&id).await.unwrap().map(|c| c.to_string()),
            Some("cus_1".to_string())
        );
    }

    #[tokio::test]
    async fn same_instant_webhooks_replay_without_flipping_tier() {
        let h = setup();
        let id = acct("user_same");
        h.bootstrap.ensure_account(&id).await.unwrap();

        let webhook = |event_id: &str, kind: &str| {
            json!({
                "id": event_id,
                "type": kind,
                "timestamp": "2026-05-20T09:00:00.123456789Z",
                "data": {
                    "id": "sub_same",
                    "metadata": { "account_id": "user_same" }
                }
            })
        };
        let created =
            BillingEvent::from_webhook_json(&webhook("evt_c", "subscription.created")).unwrap();
        let revoked =
            BillingEvent::from_webhook_json(&webhook("evt_r", "subscription.revoked")).unwrap();

        assert!(h.reconciler.apply_billing_event(&created).await.unwrap().is_applied());
        assert!(h.reconciler.apply_billing_event(&revoked).await.unwrap().is_applied());
        let redelivered =
            BillingEvent::from_webhook_json(&webhook("evt_c", "subscription.created")).unwrap();
        assert_eq!(
            h.reconciler.apply_billing_event(&redelivered).await.unwrap(),
            ReconcileOutcome::Unchanged {
                account_id: id.clone(),
                reason: UnchangedReason::Duplicate
            }
        );

        let account = h.accounts.get_account(&id).await.unwrap().unwrap();
        assert_eq!(account.tier, Tier::Free);
        let watermark = account.billing_watermark.unwrap();
        assert_eq!(watermark.at.timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(watermark.event_keys.len(), 2);
        assert_eq!(account.updated_at, start());
    }

    #[tokio::test]
    async fn email_fallback_refuses_ambiguous_matches() {
        let h = setup_with(EngineConfig {
            email_correlation_fallback: true,
            ..EngineConfig::default()
        });
        for raw in ["acct-a", "acct-b"] {
            h.accounts
                .put(Account::bootstrap(acct(raw), start()).with_email("shared@example.com"))
                .unwrap();
        }
        h.accounts
            .put(Account::bootstrap(acct("acct-c"), start()).with_email("solo@example.com"))
            .unwrap();

        let mut event = billing_event(&acct("acct-a"), BillingEventKind::SubscriptionCreated, start());
        event.correlation = Correlation {
            account_id: None,
            email: Some("shared@example.com".into()),
        };
        assert_eq!(
            h.reconciler.apply_billing_event(&event).await.unwrap(),
            ReconcileOutcome::Dropped {
                reason: DropReason::UnresolvedCorrelation
            }
        );

        event.correlation.email = Some("solo@example.com".into());
        assert_eq!(
            h.reconciler.apply_billing_event(&event).await.unwrap(),
            ReconcileOutcome::Applied {
                account_id: acct("acct-c"),
                tier: Tier::Pro
            }
        );
    }
}
