//! Unit tests for validation logic

use postgres_storage_operator::controller::Error;
use postgres_storage_operator::controller::validation::{
    MISSING_WAL_RISK_ACKNOWLEDGEMENT, validate_spec, validate_storage,
};

use crate::common::*;

#[test]
fn test_cluster_without_resize_is_valid() {
    let cluster = create_test_cluster("db", "default");
    let report = validate_spec(&cluster).unwrap();
    assert!(report.is_valid());
    assert!(report.warnings.is_empty());
}

#[test]
fn test_acknowledgement_required_only_without_wal_volume() {
    let single = PostgresClusterBuilder::new("db", "default")
        .with_data_resize(ResizeBuilder::new().build())
        .build();
    let report = validate_storage(&single.spec);
    assert!(report.has_code(MISSING_WAL_RISK_ACKNOWLEDGEMENT));

    let dedicated = PostgresClusterBuilder::new("db", "default")
        .with_data_resize(ResizeBuilder::new().build())
        .with_wal_storage("2Gi", None)
        .build();
    assert!(validate_storage(&dedicated.spec).is_valid());
}

#[test]
fn test_tablespace_does_not_need_acknowledgement() {
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_tablespace("idx", "5Gi", Some(ResizeBuilder::new().build()))
        .build();
    assert!(validate_storage(&cluster.spec).is_valid());
}

#[test]
fn test_invalid_spec_becomes_validation_error() {
    let cluster = create_test_cluster_with_wal_resize(
        "db",
        "default",
        ResizeBuilder::new().threshold(0).step("-5Gi").build(),
    );
    match validate_spec(&cluster) {
        Err(Error::ValidationError(message)) => {
            assert!(message.contains("spec.walStorage.resize.triggers.usageThreshold"), "{}", message);
            assert!(message.contains("spec.walStorage.resize.expansion.step"), "{}", message);
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_step_bounds_checked() {
    let cluster = create_test_cluster_with_wal_resize(
        "db",
        "default",
        ResizeBuilder::new().min_step("10Gi").max_step("1Gi").build(),
    );
    let report = validate_storage(&cluster.spec);
    assert!(report.has_code("step-bounds"));
}

#[test]
fn test_zero_rate_limit_rejected() {
    let cluster = create_test_cluster_with_wal_resize(
        "db",
        "default",
        ResizeBuilder::new().max_actions_per_day(0).build(),
    );
    assert!(validate_storage(&cluster.spec).has_code("invalid-rate-limit"));
}

#[test]
fn test_limit_below_size_warns() {
    let cluster = create_test_cluster_with_wal_resize("db", "default", ResizeBuilder::new().limit("1Gi").build());
    let report = validate_storage(&cluster.spec);
    assert!(report.is_valid());
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn test_archive_requirement_without_backup_warns() {
    let without_backup = PostgresClusterBuilder::new("db", "default")
        .with_data_resize(ResizeBuilder::new().acknowledge_wal_risk().require_archive_healthy(true).build())
        .build();
    let report = validate_storage(&without_backup.spec);
    assert!(report.is_valid());
    assert_eq!(report.warnings.len(), 1);

    let with_backup = PostgresClusterBuilder::new("db", "default")
        .with_data_resize(ResizeBuilder::new().acknowledge_wal_risk().require_archive_healthy(true).build())
        .with_backup()
        .build();
    assert!(validate_storage(&with_backup.spec).warnings.is_empty());
}

#[test]
fn test_disabled_policy_not_checked() {
    let mut resize = ResizeBuilder::new().threshold(500).build();
    resize.enabled = false;
    let cluster = PostgresClusterBuilder::new("db", "default")
        .with_data_resize(resize)
        .build();
    assert!(validate_storage(&cluster.spec).is_valid());
}
