//! Multi-cycle resize scenarios
//!
//! Each test drives a single-instance cluster through several monitoring
//! cycles against in-memory PVCs and checks sizes, audit events and
//! notifications.

use chrono::Duration;
use postgres_storage_operator::autoresize::actuator::{self, Expansion};
use postgres_storage_operator::autoresize::quantity::{GIB, MIB};
use postgres_storage_operator::autoresize::rate_limit::MAX_EVENT_HISTORY;
use postgres_storage_operator::autoresize::volume::{VolumeKey, VolumeRole};
use postgres_storage_operator::autoresize::{IdleReason, VolumeOutcome, VolumeResizer};
use postgres_storage_operator::crd::{BlockReason, ResizeResult};

use crate::common::*;

fn ts(name: &str) -> VolumeRole {
    VolumeRole::Tablespace(name.to_string())
}

mod sizing {
    use super::*;

    #[tokio::test]
    async fn test_limit_caps_expansion() {
        let cluster = create_test_cluster_with_wal_resize(
            "db",
            "default",
            ResizeBuilder::new().step("1Gi").limit("2560Mi").build(),
        );
        let mut sim = Simulation::new(cluster);

        let report = sim.cycle(&[(VolumeRole::Wal, 95)]).await;
        assert_eq!(report.outcome.expanded.len(), 1);
        assert_eq!(sim.size(&VolumeRole::Wal), 2 * GIB + 512 * MIB);

        // still full, but nothing left to grow into
        sim.advance(Duration::minutes(5));
        let report = sim.cycle(&[(VolumeRole::Wal, 95)]).await;
        assert!(report.outcome.expanded.is_empty());
        assert_eq!(report.notification_reasons(), vec!["AutoResizeAtLimit"]);
        assert_eq!(sim.size(&VolumeRole::Wal), 2 * GIB + 512 * MIB);
        assert_eq!(sim.resizer.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_min_step_floors_percentage_growth() {
        let cluster = PostgresClusterBuilder::new("db", "default")
            .with_storage("2Gi", None)
            .with_data_resize(ResizeBuilder::new().step("5%").min_step("1Gi").build())
            .with_wal_storage("1Gi", None)
            .build();
        let mut sim = Simulation::new(cluster);

        sim.cycle(&[(VolumeRole::Data, 90)]).await;

        assert_eq!(sim.size(&VolumeRole::Data), 3 * GIB);
    }

    #[tokio::test]
    async fn test_min_available_triggers_below_threshold() {
        let cluster = create_test_cluster_with_wal_resize(
            "db",
            "default",
            ResizeBuilder::new().threshold(95).min_available("1Gi").step("1Gi").build(),
        );
        let mut sim = Simulation::new(cluster);

        // 60% of 2Gi leaves ~819Mi available
        sim.cycle(&[(VolumeRole::Wal, 60)]).await;

        assert_eq!(sim.size(&VolumeRole::Wal), 3 * GIB);
    }

    #[tokio::test]
    async fn test_below_threshold_is_idle() {
        let cluster = create_test_cluster_with_wal_resize("db", "default", ResizeBuilder::new().build());
        let mut sim = Simulation::new(cluster);

        let report = sim.cycle(&[(VolumeRole::Wal, 50)]).await;

        assert_eq!(
            report.plan.decisions[0].outcome,
            VolumeOutcome::Idle(IdleReason::NotTriggered)
        );
        assert!(sim.events().is_empty());
        assert!(sim.resizer.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_sample_is_idle() {
        let cluster = create_test_cluster_with_wal_resize("db", "default", ResizeBuilder::new().build());
        let mut sim = Simulation::new(cluster);

        let report = sim.cycle(&[]).await;

        assert_eq!(
            report.plan.decisions[0].outcome,
            VolumeOutcome::Idle(IdleReason::NoSample)
        );
    }
}

mod idempotence {
    use super::*;

    #[tokio::test]
    async fn test_same_target_submitted_once() {
        let resizer = InMemoryResizer::default();
        resizer.insert("wal-db-0", 2 * GIB);
        let expansion = Expansion {
            key: VolumeKey::new("db-0", VolumeRole::Wal),
            claim: "wal-db-0".to_string(),
            current: 2 * GIB,
            target: 3 * GIB,
            alert_wal_risk: false,
        };
        let now = chrono::Utc::now();

        let first = actuator::actuate(&resizer, &expansion, now).await.unwrap();
        let second = actuator::actuate(&resizer, &expansion, now).await.unwrap();

        assert!(first.event.is_some());
        assert!(second.event.is_none());
        assert!(second.notifications.is_empty());
        assert_eq!(resizer.requests(), vec![("wal-db-0".to_string(), 3 * GIB)]);
    }

    #[tokio::test]
    async fn test_missing_claim_records_nothing() {
        let resizer = InMemoryResizer::default();
        let expansion = Expansion {
            key: VolumeKey::new("db-0", VolumeRole::Data),
            claim: "data-db-0".to_string(),
            current: GIB,
            target: 2 * GIB,
            alert_wal_risk: false,
        };

        let result = actuator::actuate(&resizer, &expansion, chrono::Utc::now()).await;

        assert!(result.is_err());
        let now = chrono::Utc::now();
        assert!(resizer.request_size("data-db-0", 2 * GIB, now).await.is_err());
    }
}

mod rate_limit {
    use super::*;

    #[tokio::test]
    async fn test_one_action_per_day() {
        let cluster = create_test_cluster_with_wal_resize(
            "db",
            "default",
            ResizeBuilder::new().step("1Gi").max_actions_per_day(1).build(),
        );
        let mut sim = Simulation::new(cluster);

        sim.cycle(&[(VolumeRole::Wal, 95)]).await;
        assert_eq!(sim.size(&VolumeRole::Wal), 3 * GIB);

        // the trigger persists for the whole window
        for _ in 1..24 {
            sim.advance(Duration::hours(1));
            let report = sim.cycle(&[(VolumeRole::Wal, 95)]).await;
            assert!(report.outcome.expanded.is_empty());
            assert_eq!(report.notification_reasons(), vec!["AutoResizeBlocked"]);
            assert_eq!(sim.size(&VolumeRole::Wal), 3 * GIB);
        }

        let events = sim.events();
        assert_eq!(
            events.iter().filter(|e| e.result == ResizeResult::Success).count(),
            1
        );
        assert!(events
            .iter()
            .filter(|e| e.result == ResizeResult::Blocked)
            .all(|e| e.block_reason == Some(BlockReason::RateLimitExceeded)));

        // the window has rolled over
        sim.advance(Duration::hours(1));
        let report = sim.cycle(&[(VolumeRole::Wal, 95)]).await;
        assert_eq!(report.outcome.expanded.len(), 1);
        assert_eq!(sim.size(&VolumeRole::Wal), 4 * GIB);
    }

    #[tokio::test]
    async fn test_unset_limit_is_unlimited() {
        let cluster = create_test_cluster_with_wal_resize("db", "default", ResizeBuilder::new().step("1Gi").build());
        let mut sim = Simulation::new(cluster);

        for _ in 0..5 {
            sim.cycle(&[(VolumeRole::Wal, 95)]).await;
            sim.advance(Duration::minutes(10));
        }

        assert_eq!(sim.size(&VolumeRole::Wal), 7 * GIB);
    }

    #[tokio::test]
    async fn test_lost_status_write_still_counts_against_budget() {
        let cluster = create_test_cluster_with_wal_resize(
            "db",
            "default",
            ResizeBuilder::new().step("1Gi").max_actions_per_day(1).build(),
        );
        let mut sim = Simulation::new(cluster);

        sim.lose_status_writes = true;
        let report = sim.cycle(&[(VolumeRole::Wal, 95)]).await;
        assert_eq!(report.outcome.expanded.len(), 1);
        assert!(sim.events().is_empty());
        assert_eq!(sim.resizer.history("wal-db-0").len(), 1);

        sim.lose_status_writes = false;
        sim.advance(Duration::hours(1));
        let report = sim.cycle(&[(VolumeRole::Wal, 95)]).await;
        assert!(report.outcome.expanded.is_empty());
        assert!(matches!(
            report.plan.decisions[0].outcome,
            VolumeOutcome::Blocked {
                reason: BlockReason::RateLimitExceeded,
                ..
            }
        ));
        assert_eq!(sim.size(&VolumeRole::Wal), 3 * GIB);
    }

    #[tokio::test]
    async fn test_event_log_is_capped() {
        let cluster = create_test_cluster_with_wal_resize(
            "db",
            "default",
            ResizeBuilder::new().step("1Gi").max_actions_per_day(1).build(),
        );
        let mut sim = Simulation::new(cluster);

        for _ in 0..(MAX_EVENT_HISTORY + 10) {
            sim.cycle(&[(VolumeRole::Wal, 95)]).await;
            sim.advance(Duration::seconds(30));
        }

        let events = sim.events();
        assert_eq!(events.len(), MAX_EVENT_HISTORY);
        // the success that holds the window closed survives eviction
        assert_eq!(
            events.iter().filter(|e| e.result == ResizeResult::Success).count(),
            1
        );
    }
}

mod wal_safety {
    use super::*;
    use postgres_storage_operator::crd::PostgresCluster;

    fn single_volume(resize: ResizeBuilder) -> PostgresCluster {
        PostgresClusterBuilder::new("db", "default")
            .with_storage("10Gi", None)
            .with_data_resize(resize.acknowledge_wal_risk().step("1Gi").build())
            .with_backup()
            .build()
    }

    #[tokio::test]
    async fn test_unhealthy_archive_blocks_consistently() {
        let mut sim = Simulation::new(single_volume(ResizeBuilder::new().require_archive_healthy(true)));
        sim.wal_health = Some(failing_archive());

        for _ in 0..10 {
            let report = sim.cycle(&[(VolumeRole::Data, 95)]).await;
            assert!(report.outcome.expanded.is_empty());
            assert_eq!(sim.size(&VolumeRole::Data), 10 * GIB);
            sim.advance(Duration::seconds(30));
        }
        let events = sim.events();
        assert_eq!(events.len(), 10);
        assert!(events
            .iter()
            .all(|e| e.block_reason == Some(BlockReason::ArchiveUnhealthy)));

        // archiving recovers
        sim.wal_health = Some(healthy_wal());
        sim.cycle(&[(VolumeRole::Data, 95)]).await;
        assert_eq!(sim.size(&VolumeRole::Data), 11 * GIB);
    }

    #[tokio::test]
    async fn test_slot_retention_blocks_data_volume() {
        let mut sim = Simulation::new(single_volume(ResizeBuilder::new().max_slot_retention_bytes(GIB as i64)));
        sim.wal_health = Some(retaining_slot(2 * GIB as i64));

        let report = sim.cycle(&[(VolumeRole::Data, 95)]).await;

        assert!(matches!(
            report.plan.decisions[0].outcome,
            VolumeOutcome::Blocked {
                reason: BlockReason::SlotRetentionExceeded,
                ..
            }
        ));
        assert_eq!(sim.size(&VolumeRole::Data), 10 * GIB);
    }

    #[tokio::test]
    async fn test_slot_within_retention_permits() {
        let mut sim = Simulation::new(single_volume(ResizeBuilder::new().max_slot_retention_bytes(GIB as i64)));
        sim.wal_health = Some(retaining_slot(MIB as i64));

        sim.cycle(&[(VolumeRole::Data, 95)]).await;

        assert_eq!(sim.size(&VolumeRole::Data), 11 * GIB);
    }

    #[tokio::test]
    async fn test_unobserved_health_blocks() {
        let mut sim = Simulation::new(single_volume(ResizeBuilder::new()));
        sim.wal_health = None;

        sim.cycle(&[(VolumeRole::Data, 95)]).await;

        let events = sim.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].block_reason, Some(BlockReason::WalHealthUnavailable));
    }

    #[tokio::test]
    async fn test_stale_health_is_still_used() {
        let mut sim = Simulation::new(single_volume(ResizeBuilder::new()));
        let mut health = failing_archive();
        health.stale = true;
        sim.wal_health = Some(health);

        sim.cycle(&[(VolumeRole::Data, 95)]).await;

        assert_eq!(sim.size(&VolumeRole::Data), 10 * GIB);
        assert_eq!(sim.events()[0].block_reason, Some(BlockReason::ArchiveUnhealthy));
    }

    #[tokio::test]
    async fn test_wal_carrying_expansion_raises_risk_alert() {
        let mut sim = Simulation::new(single_volume(ResizeBuilder::new()));

        let report = sim.cycle(&[(VolumeRole::Data, 95)]).await;

        assert_eq!(
            report.notification_reasons(),
            vec!["AutoResizeSuccess", "AutoResizeWALRisk"]
        );
    }

    #[tokio::test]
    async fn test_risk_alert_can_be_silenced() {
        let mut sim = Simulation::new(single_volume(ResizeBuilder::new().alert_on_resize(false)));

        let report = sim.cycle(&[(VolumeRole::Data, 95)]).await;

        assert_eq!(report.notification_reasons(), vec!["AutoResizeSuccess"]);
    }

    #[tokio::test]
    async fn test_wal_volume_grows_during_archive_failure() {
        let cluster = create_test_cluster_with_wal_resize("db", "default", ResizeBuilder::new().step("1Gi").build());
        let mut sim = Simulation::new(cluster);
        sim.wal_health = Some(failing_archive());

        sim.cycle(&[(VolumeRole::Wal, 95)]).await;

        assert_eq!(sim.size(&VolumeRole::Wal), 3 * GIB);
    }
}

mod independence {
    use super::*;

    #[tokio::test]
    async fn test_only_full_volume_grows() {
        let cluster = PostgresClusterBuilder::new("db", "default")
            .with_storage("10Gi", None)
            .with_data_resize(ResizeBuilder::new().step("1Gi").build())
            .with_wal_storage("2Gi", Some(ResizeBuilder::new().step("1Gi").build()))
            .with_tablespace("idx", "5Gi", Some(ResizeBuilder::new().step("1Gi").build()))
            .build();
        let mut sim = Simulation::new(cluster);

        let report = sim
            .cycle(&[(VolumeRole::Data, 10), (VolumeRole::Wal, 95), (ts("idx"), 10)])
            .await;

        assert_eq!(report.plan.decisions.len(), 3);
        assert_eq!(report.outcome.expanded, vec![sim.key(VolumeRole::Wal)]);
        assert_eq!(sim.size(&VolumeRole::Data), 10 * GIB);
        assert_eq!(sim.size(&VolumeRole::Wal), 3 * GIB);
        assert_eq!(sim.size(&ts("idx")), 5 * GIB);
    }

    #[tokio::test]
    async fn test_rate_limit_is_per_volume() {
        let cluster = PostgresClusterBuilder::new("db", "default")
            .with_storage("10Gi", None)
            .with_wal_storage("2Gi", Some(ResizeBuilder::new().step("1Gi").max_actions_per_day(1).build()))
            .with_tablespace("idx", "5Gi", Some(ResizeBuilder::new().step("1Gi").max_actions_per_day(1).build()))
            .build();
        let mut sim = Simulation::new(cluster);

        sim.cycle(&[(VolumeRole::Wal, 95)]).await;
        sim.advance(Duration::minutes(1));
        sim.cycle(&[(ts("idx"), 95)]).await;

        assert_eq!(sim.size(&VolumeRole::Wal), 3 * GIB);
        assert_eq!(sim.size(&ts("idx")), 6 * GIB);
        let event = sim
            .events()
            .into_iter()
            .find(|e| e.tablespace.as_deref() == Some("idx"))
            .unwrap();
        assert_eq!(event.result, ResizeResult::Success);
    }
}
