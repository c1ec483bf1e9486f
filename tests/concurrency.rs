//! Concurrent mutations must never leave conflicting active rules behind.

mod common;

use blockip::clock::Clock;
use blockip::error::ServiceError;
use blockip::rules::duration::DurationSpec;
use blockip::rules::model::RuleType;
use blockip::rules::{Actor, RuleEngine};
use common::{backends, net};
use std::sync::Arc;
use tokio::task::JoinSet;

// A nested chain: every pair overlaps.
const ADDRESSES: [&str; 6] = [
    "198.51.100.0/24",
    "198.51.100.0/25",
    "198.51.100.0/26",
    "198.51.100.0/27",
    "198.51.100.0/28",
    "198.51.100.7",
];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_lists_never_overlap() {
    for b in backends().await {
        let engine: Arc<RuleEngine> = Arc::new(b.engine);
        let mut tasks = JoinSet::new();

        for (i, address) in ADDRESSES.iter().enumerate() {
            let engine = Arc::clone(&engine);
            let address = net(address);
            tasks.spawn(async move {
                let actor = Actor::new("racer", "race");
                if i % 2 == 0 {
                    engine
                        .add_blacklist_entry(address, &DurationSpec::For("1h".into()), actor)
                        .await
                        .map(|_| RuleType::Blacklist)
                } else {
                    engine
                        .add_whitelist_entry(address, actor)
                        .await
                        .map(|_| RuleType::Whitelist)
                }
            });
        }

        let mut winners = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap() {
                Ok(rule_type) => winners.push(rule_type),
                Err(
                    ServiceError::AddressCannotBeBlacklisted { .. }
                    | ServiceError::AddressCannotBeWhitelisted { .. },
                ) => {}
                Err(other) => panic!("{}: unexpected error {other:?}", b.name),
            }
        }

        // The first commit decides the list; the rest of that type nest inside it.
        assert!(!winners.is_empty(), "{}", b.name);
        assert!(winners.iter().all(|t| *t == winners[0]), "{}", b.name);

        let blacklist = engine.list_active(RuleType::Blacklist).await.unwrap();
        let whitelist = engine.list_active(RuleType::Whitelist).await.unwrap();
        for black in &blacklist {
            for white in &whitelist {
                assert!(
                    !black.rule.address.overlaps(&white.rule.address),
                    "{}: {} overlaps {}",
                    b.name,
                    black.rule.address,
                    white.rule.address
                );
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exact_duplicates_leave_one_active_entry() {
    for b in backends().await {
        let engine: Arc<RuleEngine> = Arc::new(b.engine);
        let mut tasks = JoinSet::new();

        for hours in 1..=8u32 {
            let engine = Arc::clone(&engine);
            tasks.spawn(async move {
                engine
                    .add_blacklist_entry(
                        net("203.0.113.5"),
                        &DurationSpec::For(format!("{hours}h")),
                        Actor::new("racer", "race"),
                    )
                    .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap() {
                Ok(_) | Err(ServiceError::AddressAlreadyBlacklisted { .. }) => {}
                Err(other) => panic!("{}: unexpected error {other:?}", b.name),
            }
        }

        let active = engine.list_active(RuleType::Blacklist).await.unwrap();
        assert_eq!(active.len(), 1, "{}", b.name);
        assert_eq!(
            active[0].rule.expires_at,
            Some(b.clock.now() + chrono::Duration::hours(8)),
            "{}",
            b.name
        );
    }
}
