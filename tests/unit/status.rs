//! Unit tests for status management

use chrono::{DateTime, Duration, Utc};
use postgres_storage_operator::autoresize::rate_limit::parse_timestamp;
use postgres_storage_operator::controller::status::{
    ConditionBuilder, ConditionUpdate, StatusUpdate, condition_status, condition_types, spec_changed,
    status_patch,
};
use postgres_storage_operator::crd::{
    AutoResizeEvent, InstanceDiskStatus, PostgresClusterStatus, ResizeResult, VolumeType,
};
use std::collections::BTreeMap;

use crate::common::*;

fn now() -> DateTime<Utc> {
    parse_timestamp("2024-06-01T12:00:00Z").unwrap()
}

fn success(instance: &str, at: DateTime<Utc>) -> AutoResizeEvent {
    AutoResizeEvent {
        timestamp: at.to_rfc3339(),
        instance: instance.to_string(),
        volume_type: VolumeType::Wal,
        tablespace: None,
        pvc_name: Some(format!("wal-{}", instance)),
        result: ResizeResult::Success,
        block_reason: None,
        previous_size: Some("2Gi".to_string()),
        new_size: Some("3Gi".to_string()),
        message: None,
    }
}

mod condition_builder_tests {
    use super::*;

    #[test]
    fn test_new_condition_builder() {
        let conditions = ConditionBuilder::new(Some(1)).build();
        assert!(conditions.is_empty());
    }

    #[test]
    fn test_transition_time_moves_only_on_flip() {
        let first = ConditionBuilder::new(Some(1))
            .at(now())
            .auto_resize_healthy(true, "Healthy", "ok")
            .build();

        let same = ConditionBuilder::from_existing(first.clone(), Some(2))
            .at(now() + Duration::minutes(5))
            .auto_resize_healthy(true, "Healthy", "still ok")
            .build();
        assert_eq!(same[0].last_transition_time, first[0].last_transition_time);
        assert_eq!(same[0].message, "still ok");
        assert_eq!(same[0].observed_generation, Some(2));

        let flipped = ConditionBuilder::from_existing(same, Some(2))
            .at(now() + Duration::minutes(10))
            .auto_resize_healthy(false, "ResizeBlocked", "archive failing")
            .build();
        assert_eq!(flipped[0].status, condition_status::FALSE);
        assert_ne!(flipped[0].last_transition_time, first[0].last_transition_time);
    }

    #[test]
    fn test_conditions_are_independent() {
        let conditions = ConditionBuilder::new(Some(1))
            .ready(true, "Collected", "")
            .config_valid(false, "InvalidPolicy", "bad step")
            .build();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].type_, condition_types::READY);
        assert_eq!(conditions[1].type_, condition_types::CONFIG_VALID);
        assert_eq!(conditions[1].status, condition_status::FALSE);
    }
}

mod status_update_tests {
    use super::*;

    #[test]
    fn test_events_accumulate_across_updates() {
        let mut status: Option<PostgresClusterStatus> = None;
        for i in 0..3 {
            let at = now() + Duration::hours(i);
            let update = StatusUpdate {
                new_events: vec![success("db-0", at)],
                ..Default::default()
            };
            status = Some(update.apply(status.as_ref(), Some(1), at));
        }
        let status = status.unwrap();
        assert_eq!(status.auto_resize_events.len(), 3);
        assert_eq!(status.observed_generation, Some(1));
    }

    #[test]
    fn test_old_events_are_pruned() {
        let existing = PostgresClusterStatus {
            auto_resize_events: vec![success("db-0", now() - Duration::hours(30))],
            ..Default::default()
        };
        let status = StatusUpdate::default().apply(Some(&existing), Some(1), now());
        assert!(status.auto_resize_events.is_empty());
    }

    #[test]
    fn test_disk_status_replaced_with_primary() {
        let existing = PostgresClusterStatus {
            primary_pod: Some("db-0".to_string()),
            disk_status: BTreeMap::from([("db-0".to_string(), InstanceDiskStatus::default())]),
            ..Default::default()
        };
        let update = StatusUpdate {
            primary_pod: Some("db-1".to_string()),
            disk_status: Some(BTreeMap::from([("db-1".to_string(), InstanceDiskStatus::default())])),
            conditions: vec![ConditionUpdate::new(condition_types::READY, true, "Collected", "")],
            ..Default::default()
        };
        let status = update.apply(Some(&existing), Some(3), now());
        assert_eq!(status.primary_pod.as_deref(), Some("db-1"));
        assert!(status.disk_status.contains_key("db-1"));
        assert!(!status.disk_status.contains_key("db-0"));
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn test_patch_removes_departed_instances() {
        let cluster = PostgresClusterBuilder::new("db", "default")
            .with_status(PostgresClusterStatus {
                disk_status: BTreeMap::from([
                    ("db-0".to_string(), InstanceDiskStatus::default()),
                    ("db-1".to_string(), InstanceDiskStatus::default()),
                ]),
                ..Default::default()
            })
            .build();
        let update = StatusUpdate {
            disk_status: Some(BTreeMap::from([("db-0".to_string(), InstanceDiskStatus::default())])),
            ..Default::default()
        };

        let patch = status_patch(&cluster, &update, now()).unwrap();

        assert!(patch["status"]["diskStatus"]["db-1"].is_null());
        assert!(patch["status"]["diskStatus"].get("db-1").is_some());
        assert!(patch["status"]["diskStatus"].get("db-0").is_none());
    }
}

mod spec_changed_tests {
    use super::*;

    #[test]
    fn test_same_generation_unchanged() {
        let a = PostgresClusterBuilder::new("db", "default").with_generation(2).build();
        let b = PostgresClusterBuilder::new("db", "default").with_generation(2).build();
        assert!(!spec_changed(&a, &b));
    }

    #[test]
    fn test_new_generation_changed() {
        let a = PostgresClusterBuilder::new("db", "default").with_generation(2).build();
        let b = PostgresClusterBuilder::new("db", "default").with_generation(3).build();
        assert!(spec_changed(&a, &b));
    }
}
