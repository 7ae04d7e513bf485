use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, Utc};
use std::sync::Arc;
use tierguard_core::{AccountId, DocumentId, FixedClock};
use tierguard_entitlements::{Account, Action, Tier, UsageRecord};
use tierguard_infra::store::{AccountStore, InMemoryAccountStore, InMemoryUsageLedger, UsageLedger};
use tierguard_infra::TierPolicyEngine;
use tokio::runtime::Runtime;

type Engine = TierPolicyEngine<InMemoryAccountStore, InMemoryUsageLedger, FixedClock>;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("tokio runtime")
}

/// Engine with one account at `tier` and `history` usage records spread over
/// the last 60 days (roughly half inside the window).
fn setup(rt: &Runtime, tier: Tier, history: usize) -> (Engine, AccountId) {
    let now = Utc::now();
    let account_id = AccountId::parse("acct-bench").unwrap();
    let accounts = Arc::new(InMemoryAccountStore::new());
    let ledger = Arc::new(InMemoryUsageLedger::new());

    rt.block_on(async {
        let mut account = Account::bootstrap(account_id.clone(), now);
        account.tier = tier;
        accounts.insert_if_absent(&account).await.unwrap();

        for i in 0..history {
            let at = now - Duration::hours((i as i64 * 1440) / history.max(1) as i64);
            ledger
                .append(&UsageRecord::document_created(
                    account_id.clone(),
                    DocumentId::new(),
                    at,
                ))
                .await
                .unwrap();
        }
    });

    let engine = TierPolicyEngine::with_clock(accounts, ledger, FixedClock::new(now));
    (engine, account_id)
}

fn bench_authorize_create(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("authorize_create");
    group.throughput(Throughput::Elements(1));

    for history in [0usize, 10, 100, 1000].iter() {
        let (engine, account_id) = setup(&rt, Tier::Free, *history);
        group.bench_with_input(BenchmarkId::new("free", history), history, |b, _| {
            b.iter(|| {
                let decision = rt
                    .block_on(engine.authorize_create(black_box(&account_id)))
                    .unwrap();
                black_box(decision)
            });
        });
    }

    let (engine, account_id) = setup(&rt, Tier::Pro, 1000);
    group.bench_function("pro_skips_ledger", |b| {
        b.iter(|| {
            let decision = rt
                .block_on(engine.authorize_create(black_box(&account_id)))
                .unwrap();
            black_box(decision)
        });
    });

    group.finish();
}

fn bench_tier_gated_actions(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("authorize_gated");
    let (engine, account_id) = setup(&rt, Tier::Free, 100);

    for action in [Action::Edit, Action::Delete, Action::View] {
        group.bench_function(action.as_str(), |b| {
            b.iter(|| {
                let decision = rt
                    .block_on(engine.authorize(black_box(&account_id), action))
                    .unwrap();
                black_box(decision)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_authorize_create, bench_tier_gated_actions);
criterion_main!(benches);
