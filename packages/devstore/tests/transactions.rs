use std::sync::Arc;

use collection_literals::btree;
use serde_json::json;

use devstore::{
    path, Datastore, DatastoreKind, DiffType, Error, Path, StaticSchema, TransactionState, Value,
};

fn schema() -> Arc<StaticSchema> {
    Arc::new(
        StaticSchema::new()
            .list(path!("/interfaces/interface"), &["name"])
            .leaf(path!("/interfaces/interface/name"))
            .leaf(path!("/interfaces/interface/config/name"))
            .leaf(path!("/interfaces/interface/config/enabled"))
            .leaf(path!("/interfaces/interface/config/mtu"))
            .leaf(path!("/system/hostname")),
    )
}

fn seeded() -> Datastore {
    let ds = Datastore::new(DatastoreKind::Config, schema());
    let mut tx = ds.new_tx().unwrap();
    tx.merge(
        &Path::root(),
        Value::from(json!({
            "system": {"hostname": "r1"},
            "interfaces": {"interface": [
                {"name": "eth0", "config": {"name": "eth0", "mtu": 1500}}
            ]}
        })),
    )
    .unwrap();
    tx.commit().unwrap();
    ds
}

#[test]
fn test_create_diff_on_empty_store() {
    let ds = Datastore::new(DatastoreKind::Config, schema());
    let mut tx = ds.new_tx().unwrap();
    let config = path!("/interfaces/interface[name='eth0']/config");
    let payload = Value::Map(btree! {
        "name".into() => Value::from("eth0"),
        "enabled".into() => Value::from(true),
    });
    tx.merge(&config, payload.clone()).unwrap();

    let diffs = tx.diff().unwrap();
    assert_eq!(diffs.len(), 1);
    let record = &diffs[&config];
    assert_eq!(record.diff_type, DiffType::Create);
    assert_eq!(record.path, config);
    assert_eq!(record.before, Value::map());
    assert_eq!(record.after, payload);

    tx.commit().unwrap();
    assert_eq!(ds.read_committed(&config).unwrap(), payload);
}

#[test]
fn test_open_transaction_is_isolated() {
    let ds = seeded();
    let before = ds.read_committed(&Path::root()).unwrap();

    let mut tx = ds.new_tx().unwrap();
    tx.merge(&path!("/system"), Value::from(json!({"hostname": "r2"})))
        .unwrap();
    tx.delete(&path!("/interfaces")).unwrap();

    assert_eq!(ds.read_committed(&Path::root()).unwrap(), before);
    assert_eq!(tx.read_committed(&Path::root()).unwrap(), before);
    assert_eq!(
        tx.read(&path!("/system/hostname")).unwrap(),
        Value::from("r2")
    );
}

#[test]
fn test_commit_publishes_working_forest() {
    let ds = seeded();
    let mut tx = ds.new_tx().unwrap();
    tx.delete(&path!("/system")).unwrap();
    tx.merge(
        &path!("/interfaces/interface[name='eth1']/config"),
        Value::from(json!({"name": "eth1", "enabled": false})),
    )
    .unwrap();
    let working = tx.read(&Path::root()).unwrap();

    tx.commit().unwrap();
    assert_eq!(tx.state(), TransactionState::Committed);
    assert_eq!(ds.read_committed(&Path::root()).unwrap(), working);
    assert_eq!(ds.read_committed(&path!("/system")).unwrap(), Value::map());
    assert!(!ds.is_transaction_underway());
}

#[test]
fn test_abort_leaves_committed_forest_untouched() {
    let ds = seeded();
    let before = ds.read_committed(&Path::root()).unwrap();

    let mut tx = ds.new_tx().unwrap();
    tx.delete(&Path::root()).unwrap();
    tx.merge(&path!("/system"), Value::from(json!({"hostname": "other"})))
        .unwrap();
    tx.abort().unwrap();

    assert_eq!(tx.state(), TransactionState::Aborted);
    assert_eq!(ds.read_committed(&Path::root()).unwrap(), before);

    let tx = ds.new_tx().unwrap();
    assert_eq!(tx.read(&Path::root()).unwrap(), before);
}

#[test]
fn test_single_writer() {
    let ds = seeded();
    let first = ds.new_tx().unwrap();
    assert!(matches!(ds.new_tx(), Err(Error::TransactionConflict)));

    let clone = ds.clone();
    assert!(matches!(clone.new_tx(), Err(Error::TransactionConflict)));

    drop(first);
    assert!(ds.new_tx().is_ok());
}

#[test]
fn test_finalized_transaction_fails_in_any_order() {
    let ds = seeded();
    let mut tx = ds.new_tx().unwrap();
    tx.commit().unwrap();

    let p = path!("/system/hostname");
    for _ in 0..2 {
        assert!(matches!(tx.abort(), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.merge(&p, Value::from("x")), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.commit(), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.read(&p), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.diff(), Err(Error::TransactionFinalized)));
    }
    assert_eq!(tx.state(), TransactionState::Committed);
}

#[test]
fn test_delete_depth_semantics() {
    let ds = seeded();
    let mut tx = ds.new_tx().unwrap();

    assert!(tx.delete(&path!("/interfaces")).unwrap());
    assert_eq!(tx.read(&path!("/interfaces")).unwrap(), Value::map());
    assert_eq!(
        tx.read(&path!("/system")).unwrap(),
        Value::from(json!({"hostname": "r1"}))
    );

    assert!(tx.delete(&Path::root()).unwrap());
    assert_eq!(tx.read(&Path::root()).unwrap(), Value::map());

    let diffs = tx.diff().unwrap();
    assert_eq!(diffs.len(), 2);
    assert!(diffs.values().all(|r| r.diff_type == DiffType::Delete));
    assert!(diffs.contains_key(&path!("/interfaces")));
    assert!(diffs.contains_key(&path!("/system")));
}
