//! Isolated, single-writer transactions over a datastore.

use std::sync::Arc;

use devstore_core::{Error, Path, Result, SchemaIndex, Value};

use crate::diff::{diff_forests, DiffMap, DiffRecord, DiffType};
use crate::router::{DiffResult, Router};
use crate::state::DatastoreState;
use crate::tree;

/// Lifecycle of a transaction. `Committed` and `Aborted` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    Aborted,
}

/// A working copy of the datastore forest.
///
/// Created by [`Datastore::new_tx`](crate::Datastore::new_tx). Changes are
/// invisible outside the transaction until [`commit`](Self::commit). Once
/// committed or aborted, every operation fails with
/// [`Error::TransactionFinalized`]. Dropping an open transaction aborts it.
pub struct DatastoreTransaction {
    datastore: Arc<DatastoreState>,
    schema: Arc<dyn SchemaIndex>,
    status: TransactionState,
}

impl DatastoreTransaction {
    pub(crate) fn new(datastore: Arc<DatastoreState>, schema: Arc<dyn SchemaIndex>) -> Self {
        datastore.duplicate_for_transaction();
        Self {
            datastore,
            schema,
            status: TransactionState::Open,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.status
    }

    fn check_open(&self) -> Result<()> {
        if self.status != TransactionState::Open {
            tracing::warn!(state = ?self.status, "transaction already committed or aborted");
            return Err(Error::TransactionFinalized);
        }
        Ok(())
    }

    /// Read the node at `path` from the working forest.
    ///
    /// Returns an empty map when nothing matches and fails with
    /// [`Error::AmbiguousRead`] when more than one node does.
    pub fn read(&self, path: &Path) -> Result<Value> {
        self.check_open()?;
        tree::read(self.schema.as_ref(), &self.datastore.working(), path)
    }

    /// Read the node at `path` as last committed.
    pub fn read_committed(&self, path: &Path) -> Result<Value> {
        self.check_open()?;
        tree::read(self.schema.as_ref(), &self.datastore.committed(), path)
    }

    /// Merge `value`, the content of the node at `path`, into the working
    /// forest. Ancestors and list keys along `path` are synthesized.
    ///
    /// At the root, `value` maps module names to module contents.
    pub fn merge(&mut self, path: &Path, value: Value) -> Result<()> {
        self.check_open()?;

        let Some(module) = path.module_name() else {
            let Value::Map(modules) = value else {
                return Err(Error::invalid_value(path, "root content must map module names"));
            };
            for (module, content) in modules {
                self.merge(&tree::module_path(&module)?, content)?;
            }
            return Ok(());
        };

        let module_path = tree::module_path(module)?;
        let mut content = tree::wrap(self.schema.as_ref(), path, value)?;
        tree::prune_empty_lists(self.schema.as_ref(), &mut content, &module_path);

        let mut working = self.datastore.working();
        match working.get_mut(module) {
            Some(root) => tree::merge(
                self.schema.as_ref(),
                Arc::make_mut(root),
                content,
                &module_path,
            ),
            None => {
                working.insert(module.to_string(), Arc::new(content));
            }
        }
        Ok(())
    }

    /// Replace the node at `path` with `value`.
    pub fn overwrite(&mut self, path: &Path, value: Value) -> Result<()> {
        self.delete(path)?;
        self.merge(path, value)
    }

    /// Remove the node(s) at `path`. Returns whether anything was removed.
    ///
    /// The root path clears every module; a module path clears that module.
    pub fn delete(&mut self, path: &Path) -> Result<bool> {
        self.check_open()?;
        let mut working = self.datastore.working();

        let Some(module) = path.module_name() else {
            let removed = !working.is_empty();
            working.clear();
            tracing::debug!(removed, "cleared every module");
            return Ok(removed);
        };

        if path.depth() == 1 {
            let removed = working.remove(module).is_some();
            tracing::debug!(module, removed, "cleared module");
            return Ok(removed);
        }

        let Some(root) = working.get_mut(module) else {
            tracing::debug!(%path, "nothing to delete");
            return Ok(false);
        };
        if tree::find(self.schema.as_ref(), root, path).is_empty() {
            tracing::debug!(%path, "nothing to delete");
            return Ok(false);
        }
        let count = tree::delete(self.schema.as_ref(), Arc::make_mut(root), path);
        tracing::debug!(%path, count, "deleted subtrees");
        Ok(count > 0)
    }

    /// Validate every module of the working forest.
    pub fn is_valid(&self) -> Result<bool> {
        self.check_open()?;
        Ok(self.validation_failure().is_none())
    }

    fn validation_failure(&self) -> Option<Error> {
        let mode = self.datastore.kind().validation_mode();
        let working = self.datastore.working_snapshot();
        for (module, content) in &working {
            let module_path = match tree::module_path(module) {
                Ok(path) => path,
                Err(e) => return Some(e),
            };
            if let Err(message) = self.schema.validate(&module_path, content, mode) {
                return Some(Error::ValidationFailure {
                    module: module.clone(),
                    message,
                });
            }
        }
        None
    }

    /// Validate, then replace the committed forest with the working one.
    ///
    /// On validation failure the transaction stays open.
    pub fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        if let Some(failure) = self.validation_failure() {
            tracing::warn!(error = %failure, "model is invalid, not committing");
            return Err(failure);
        }
        self.datastore.commit_from_transaction();
        self.finish(TransactionState::Committed);
        tracing::info!(kind = %self.datastore.kind(), "transaction committed");
        Ok(())
    }

    /// Discard the working forest.
    pub fn abort(&mut self) -> Result<()> {
        self.check_open()?;
        self.datastore.clear_transaction();
        self.finish(TransactionState::Aborted);
        tracing::debug!(kind = %self.datastore.kind(), "transaction aborted");
        Ok(())
    }

    fn finish(&mut self, status: TransactionState) {
        self.status = status;
        self.datastore.release();
    }

    /// Structural changes of the working forest against the committed one.
    pub fn diff(&self) -> Result<DiffMap> {
        self.check_open()?;
        let committed = self.datastore.committed();
        let working = self.datastore.working_snapshot();
        if committed.is_empty() && working.is_empty() {
            return Err(Error::DiffUnavailable);
        }
        diff_forests(self.schema.as_ref(), &committed, &working)
    }

    /// [`diff`](Self::diff), routed to the given subscriber paths.
    pub fn diff_for(&self, subscribers: &[Path]) -> Result<DiffResult> {
        let diffs = self.diff()?;
        let committed = self.datastore.committed();
        let working = self.datastore.working_snapshot();
        Router::new(self.schema.as_ref(), &committed, &working, subscribers).route(&diffs)
    }

    /// Replay one diff record onto the working forest.
    pub fn apply(&mut self, record: &DiffRecord) -> Result<()> {
        match record.diff_type {
            DiffType::Create => self.merge(&record.path, record.after.clone()),
            DiffType::Update => self.overwrite(&record.path, record.after.clone()),
            DiffType::Delete => self.delete(&record.path).map(|_| ()),
        }
    }
}

impl Drop for DatastoreTransaction {
    fn drop(&mut self) {
        if self.status == TransactionState::Open {
            tracing::debug!("open transaction dropped, aborting");
            self.datastore.clear_transaction();
            self.finish(TransactionState::Aborted);
        }
    }
}

impl std::fmt::Debug for DatastoreTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatastoreTransaction")
            .field("kind", &self.datastore.kind())
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Datastore, DatastoreKind};
    use devstore_core::{path, StaticSchema};
    use serde_json::json;

    fn schema() -> Arc<StaticSchema> {
        Arc::new(
            StaticSchema::new()
                .list(path!("/interfaces/interface"), &["name"])
                .leaf(path!("/interfaces/interface/name"))
                .mandatory_leaf(path!("/interfaces/interface/config/name"))
                .leaf(path!("/interfaces/interface/config/enabled"))
                .leaf(path!("/interfaces/interface/config/mtu"))
                .leaf(path!("/system/hostname")),
        )
    }

    fn store(kind: DatastoreKind) -> Datastore {
        Datastore::new(kind, schema())
    }

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn merge_then_read_back() {
        let ds = store(DatastoreKind::Config);
        let mut tx = ds.new_tx().unwrap();
        tx.merge(
            &path!("/interfaces/interface[name='eth0']/config"),
            v(json!({"name": "eth0", "enabled": true})),
        )
        .unwrap();

        assert_eq!(
            tx.read(&path!("/interfaces/interface[name='eth0']/config/enabled"))
                .unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            tx.read(&path!("/interfaces")).unwrap(),
            v(json!({"interface": [{"name": "eth0", "config": {"name": "eth0", "enabled": true}}]}))
        );
        assert_eq!(
            tx.read(&path!("/interfaces/interface[name='eth1']")).unwrap(),
            Value::map()
        );
    }

    #[test]
    fn merge_at_root_and_module_level() {
        let ds = store(DatastoreKind::Config);
        let mut tx = ds.new_tx().unwrap();
        tx.merge(&Path::root(), v(json!({"system": {"hostname": "r1"}})))
            .unwrap();
        tx.merge(&path!("/system"), v(json!({"hostname": "r2"})))
            .unwrap();
        assert_eq!(
            tx.read(&Path::root()).unwrap(),
            v(json!({"system": {"hostname": "r2"}}))
        );
        assert!(tx.merge(&Path::root(), Value::from(1i64)).is_err());
    }

    #[test]
    fn overwrite_replaces_instead_of_merging() {
        let ds = store(DatastoreKind::Config);
        let mut tx = ds.new_tx().unwrap();
        let config = path!("/interfaces/interface[name='eth0']/config");
        tx.merge(&config, v(json!({"name": "eth0", "mtu": 1500})))
            .unwrap();
        tx.merge(&config, v(json!({"enabled": true}))).unwrap();
        assert_eq!(
            tx.read(&config).unwrap(),
            v(json!({"name": "eth0", "mtu": 1500, "enabled": true}))
        );

        tx.overwrite(&config, v(json!({"name": "eth0"}))).unwrap();
        assert_eq!(tx.read(&config).unwrap(), v(json!({"name": "eth0"})));
    }

    #[test]
    fn delete_depths() {
        let ds = store(DatastoreKind::Operational);
        let mut tx = ds.new_tx().unwrap();
        tx.merge(&Path::root(), v(json!({
            "system": {"hostname": "r1"},
            "interfaces": {"interface": [{"name": "a"}, {"name": "b"}]}
        })))
        .unwrap();

        assert!(tx.delete(&path!("/interfaces/interface[name='a']")).unwrap());
        assert!(!tx.delete(&path!("/interfaces/interface[name='a']")).unwrap());
        assert!(!tx.delete(&path!("/missing/thing")).unwrap());

        assert!(tx.delete(&path!("/system")).unwrap());
        assert!(!tx.delete(&path!("/system")).unwrap());
        assert_eq!(tx.read(&path!("/system")).unwrap(), Value::map());

        assert!(tx.delete(&Path::root()).unwrap());
        assert_eq!(tx.read(&Path::root()).unwrap(), Value::map());
        assert!(!tx.delete(&Path::root()).unwrap());
    }

    #[test]
    fn empty_lists_are_normalized_away() {
        let ds = store(DatastoreKind::Operational);
        let mut tx = ds.new_tx().unwrap();
        tx.merge(
            &Path::root(),
            v(json!({
                "system": {"hostname": "r1"},
                "interfaces": {"interface": [{"name": "a"}]}
            })),
        )
        .unwrap();
        tx.commit().unwrap();

        let mut tx = ds.new_tx().unwrap();
        tx.overwrite(&path!("/interfaces"), v(json!({"interface": []})))
            .unwrap();
        let working = tx.read(&Path::root()).unwrap();
        assert_eq!(working.field("interfaces"), Some(&Value::map()));

        let records: Vec<DiffRecord> = tx.diff().unwrap().into_values().collect();
        tx.abort().unwrap();

        let mut replay = ds.new_tx().unwrap();
        for record in &records {
            replay.apply(record).unwrap();
        }
        assert_eq!(replay.read(&Path::root()).unwrap(), working);
    }

    #[test]
    fn ambiguous_read_fails() {
        let ds = store(DatastoreKind::Operational);
        let mut tx = ds.new_tx().unwrap();
        tx.merge(
            &path!("/interfaces"),
            v(json!({"interface": [{"name": "a"}, {"name": "b"}]})),
        )
        .unwrap();
        assert!(matches!(
            tx.read(&path!("/interfaces/interface")),
            Err(Error::AmbiguousRead { matches: 2, .. })
        ));
    }

    #[test]
    fn validation_mode_follows_kind() {
        let missing_mandatory = v(json!({"interface": [{"name": "a", "config": {"mtu": 1}}]}));

        let ds = store(DatastoreKind::Operational);
        let mut tx = ds.new_tx().unwrap();
        tx.merge(&path!("/interfaces"), missing_mandatory.clone())
            .unwrap();
        assert!(tx.is_valid().unwrap());
        tx.commit().unwrap();

        let ds = store(DatastoreKind::Config);
        let mut tx = ds.new_tx().unwrap();
        tx.merge(&path!("/interfaces"), missing_mandatory).unwrap();
        assert!(!tx.is_valid().unwrap());
        assert!(matches!(
            tx.commit(),
            Err(Error::ValidationFailure { ref module, .. }) if module == "interfaces"
        ));
        assert_eq!(tx.state(), TransactionState::Open);
        tx.abort().unwrap();
        assert_eq!(ds.read_committed(&Path::root()).unwrap(), Value::map());
    }

    #[test]
    fn unknown_nodes_block_commit() {
        let ds = store(DatastoreKind::Operational);
        let mut tx = ds.new_tx().unwrap();
        tx.merge(&path!("/system"), v(json!({"bogus": 1}))).unwrap();
        assert!(matches!(
            tx.commit(),
            Err(Error::ValidationFailure { .. })
        ));
    }

    #[test]
    fn finalized_transactions_reject_everything() {
        let ds = store(DatastoreKind::Config);
        let mut tx = ds.new_tx().unwrap();
        tx.abort().unwrap();
        assert_eq!(tx.state(), TransactionState::Aborted);

        let p = path!("/system");
        assert!(matches!(tx.read(&p), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.read_committed(&p), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.merge(&p, Value::map()), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.overwrite(&p, Value::map()), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.delete(&p), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.is_valid(), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.diff(), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.diff_for(&[p.clone()]), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.commit(), Err(Error::TransactionFinalized)));
        assert!(matches!(tx.abort(), Err(Error::TransactionFinalized)));
    }

    #[test]
    fn diff_unavailable_without_any_tree() {
        let ds = store(DatastoreKind::Config);
        let tx = ds.new_tx().unwrap();
        assert!(matches!(tx.diff(), Err(Error::DiffUnavailable)));
    }

    #[test]
    fn apply_replays_records() {
        let ds = store(DatastoreKind::Config);
        let mut tx = ds.new_tx().unwrap();
        tx.apply(&DiffRecord::create(
            path!("/interfaces/interface[name='eth0']/config"),
            v(json!({"name": "eth0", "mtu": 1500})),
        ))
        .unwrap();
        tx.apply(&DiffRecord::update(
            path!("/interfaces/interface[name='eth0']/config/mtu"),
            Value::from(1500i64),
            Value::from(9000i64),
        ))
        .unwrap();
        assert_eq!(
            tx.read(&path!("/interfaces/interface[name='eth0']/config")).unwrap(),
            v(json!({"name": "eth0", "mtu": 9000}))
        );
        tx.apply(&DiffRecord::delete(
            path!("/interfaces/interface[name='eth0']"),
            Value::map(),
        ))
        .unwrap();
        assert_eq!(tx.read(&path!("/interfaces")).unwrap(), Value::map());
    }

    #[test]
    fn dropping_open_transaction_releases_writer() {
        let ds = store(DatastoreKind::Config);
        {
            let mut tx = ds.new_tx().unwrap();
            tx.merge(&path!("/system"), v(json!({"hostname": "r1"})))
                .unwrap();
            assert!(ds.is_transaction_underway());
        }
        assert!(!ds.is_transaction_underway());
        let tx = ds.new_tx().unwrap();
        assert_eq!(tx.read(&path!("/system")).unwrap(), Value::map());
    }
}
