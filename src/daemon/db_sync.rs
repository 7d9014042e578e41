//! Db-sync stage: persist batches of pub changes through a [`Store`]
//!
//! Tasks are drained in batches. Each batch is one transaction: identity
//! rows for pubs not yet persisted, schema rows for new elements, then every
//! queued value snapshot. A failed batch is rolled back and dropped.

use super::context::{DaemonContext, DaemonStats, SyncTask};
use crate::pubs::{Pub, ValueSnapshot};
use crate::store::{Store, StoreError};
use ahash::AHashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rows written by one committed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub pubs: usize,
    pub schema_rows: usize,
    pub values: usize,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.pubs + self.schema_rows + self.values
    }
}

pub(crate) fn run_db_sync(ctx: Arc<DaemonContext>, mut store: Box<dyn Store>) {
    let max = ctx.config.db_batch_max.max(1);
    let linger = ctx.config.db_sync_interval;
    loop {
        let tasks = ctx.db_pipe.pop_batch_linger(max, linger);
        if tasks.is_empty() {
            break;
        }
        match persist_batch(store.as_mut(), &tasks) {
            Ok(outcome) => {
                DaemonStats::bump(&ctx.stats.batches_committed);
                DaemonStats::add(&ctx.stats.rows_persisted, outcome.total() as u64);
                debug!(
                    tasks = tasks.len(),
                    pubs = outcome.pubs,
                    schema_rows = outcome.schema_rows,
                    values = outcome.values,
                    "batch committed"
                );
            }
            Err(e) => {
                DaemonStats::bump(&ctx.stats.batches_failed);
                warn!(error = %e, tasks = tasks.len(), "batch dropped");
            }
        }
    }
    info!("db-sync drained");
}

/// Work copied out of one pub entry so the entry lock is not held during
/// store calls.
struct Staged {
    task: usize,
    pub_: Pub,
    needs_pub: bool,
    needs_schema: bool,
    snaps: Vec<ValueSnapshot>,
}

/// Persist every change referenced by `tasks` in a single transaction.
///
/// Several tasks naming the same pub are folded into one. Entry flags are
/// updated only after the commit succeeds.
pub fn persist_batch(
    store: &mut dyn Store,
    tasks: &[SyncTask],
) -> Result<BatchOutcome, StoreError> {
    let mut seen = AHashSet::with_capacity(tasks.len());
    let mut staged = Vec::with_capacity(tasks.len());
    for (i, task) in tasks.iter().enumerate() {
        if !seen.insert(task.pub_guid) {
            continue;
        }
        let mut entry = task.entry.lock();
        let snaps = entry.snaps.drain();
        if snaps.is_empty() && !entry.needs_schema() {
            continue;
        }
        staged.push(Staged {
            task: i,
            pub_: entry.pub_.clone(),
            needs_pub: !entry.persisted,
            needs_schema: entry.needs_schema(),
            snaps,
        });
    }
    if staged.is_empty() {
        return Ok(BatchOutcome::default());
    }

    store.begin_transaction()?;
    let staged_rows = stage_rows(store, &staged);
    let outcome = match staged_rows.and_then(|outcome| {
        store.commit_transaction()?;
        Ok(outcome)
    }) {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Err(rb) = store.rollback_transaction() {
                warn!(error = %rb, "rollback failed");
            }
            return Err(e);
        }
    };

    for s in &staged {
        tasks[s.task].entry.lock().mark_schema_persisted(&s.pub_);
    }
    Ok(outcome)
}

fn stage_rows(store: &mut dyn Store, staged: &[Staged]) -> Result<BatchOutcome, StoreError> {
    let mut outcome = BatchOutcome::default();
    for s in staged {
        if s.needs_pub {
            store.insert_pub(&s.pub_)?;
            outcome.pubs += 1;
        }
        if s.needs_schema {
            outcome.schema_rows += store.insert_data_schema(&s.pub_)?;
        }
        for snap in &s.snaps {
            store.insert_value_snapshot(&s.pub_, snap)?;
            outcome.values += 1;
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::pub_table::PubTable;
    use crate::guid::GuidAllocator;
    use crate::pubs::{ValState, ValType, Value};
    use crate::store::{InMemoryStore, Row};
    use crate::wire::MsgType;

    fn task_with_values(table: &PubTable, guid: u64, values: &[i32]) -> SyncTask {
        let ids = GuidAllocator::new(guid * 100, guid * 100 + 99);
        let (entry, _) = table.get_or_create(guid);
        {
            let mut e = entry.lock();
            e.pub_.pack(&ids, "x", 0).unwrap();
            for (frame, v) in values.iter().enumerate() {
                e.pub_.pack(&ids, "x", *v).unwrap();
                let snap = ValueSnapshot::capture(&e.pub_, 0, frame as i64).unwrap();
                e.snaps.push(snap);
            }
        }
        SyncTask {
            pub_guid: guid,
            msg_type: MsgType::Publish,
            entry,
        }
    }

    #[test]
    fn test_batch_is_one_commit() {
        let table = PubTable::new();
        let mut store = InMemoryStore::new();
        let tasks = vec![
            task_with_values(&table, 1, &[1, 2, 3]),
            task_with_values(&table, 2, &[4, 5]),
        ];
        let outcome = persist_batch(&mut store, &tasks).unwrap();
        assert_eq!(
            outcome,
            BatchOutcome {
                pubs: 2,
                schema_rows: 2,
                values: 5
            }
        );
        assert_eq!(store.commit_count(), 1);
        assert_eq!(store.value_rows_for(1).len(), 3);
        assert_eq!(store.value_rows_for(2).len(), 2);
        assert!(!store.in_transaction());
    }

    #[test]
    fn test_second_batch_writes_only_new_rows() {
        let table = PubTable::new();
        let mut store = InMemoryStore::new();
        let first = task_with_values(&table, 1, &[1]);
        persist_batch(&mut store, std::slice::from_ref(&first)).unwrap();
        assert!(first.entry.lock().persisted);

        {
            let mut e = first.entry.lock();
            let snap = ValueSnapshot::capture(&e.pub_, 0, 7).unwrap();
            e.snaps.push(snap);
        }
        let outcome = persist_batch(&mut store, &[first.clone(), first]).unwrap();
        assert_eq!(
            outcome,
            BatchOutcome {
                pubs: 0,
                schema_rows: 0,
                values: 1
            }
        );
        assert_eq!(store.pub_rows().len(), 1);
        assert_eq!(store.data_row_count(), 1);
        assert_eq!(store.commit_count(), 2);
    }

    fn schema_guids(store: &InMemoryStore) -> Vec<u64> {
        store
            .rows()
            .iter()
            .filter_map(|r| match r {
                Row::Data(d) => Some(d.guid),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_replaced_slot_gets_schema_row() {
        let table = PubTable::new();
        let mut store = InMemoryStore::new();
        let (entry, _) = table.get_or_create(5);
        let task = SyncTask {
            pub_guid: 5,
            msg_type: MsgType::Announce,
            entry: entry.clone(),
        };
        entry.lock().pub_.apply_schema(0, 10, "x", ValType::Int);
        persist_batch(&mut store, std::slice::from_ref(&task)).unwrap();
        assert_eq!(schema_guids(&store), vec![10]);

        // Re-announce puts a different element in slot 0.
        {
            let mut e = entry.lock();
            e.pub_.apply_schema(0, 11, "x", ValType::Int);
            if let Some(elem) = e.pub_.element_mut(0) {
                elem.set_value(Value::Int(3), ValState::Clean);
            }
            let snap = ValueSnapshot::capture(&e.pub_, 0, 1).unwrap();
            e.snaps.push(snap);
        }
        let outcome = persist_batch(&mut store, &[task]).unwrap();
        assert_eq!(outcome.schema_rows, 1);
        assert_eq!(outcome.values, 1);
        assert_eq!(schema_guids(&store), vec![10, 11]);
        assert_eq!(store.value_rows_for(5)[0].guid, 11);
        assert!(!entry.lock().needs_schema());
    }

    #[test]
    fn test_nothing_to_write_skips_transaction() {
        let table = PubTable::new();
        let mut store = InMemoryStore::new();
        let task = task_with_values(&table, 1, &[]);
        persist_batch(&mut store, std::slice::from_ref(&task)).unwrap();
        let outcome = persist_batch(&mut store, &[task]).unwrap();
        assert_eq!(outcome.total(), 0);
        assert_eq!(store.commit_count(), 1);
    }

    struct FailingInsert(InMemoryStore);

    impl Store for FailingInsert {
        fn begin_transaction(&mut self) -> Result<(), StoreError> {
            self.0.begin_transaction()
        }
        fn commit_transaction(&mut self) -> Result<(), StoreError> {
            self.0.commit_transaction()
        }
        fn rollback_transaction(&mut self) -> Result<(), StoreError> {
            self.0.rollback_transaction()
        }
        fn insert_pub(&mut self, p: &Pub) -> Result<(), StoreError> {
            self.0.insert_pub(p)
        }
        fn insert_data_schema(&mut self, p: &Pub) -> Result<usize, StoreError> {
            self.0.insert_data_schema(p)
        }
        fn insert_value_snapshot(
            &mut self,
            _p: &Pub,
            snap: &ValueSnapshot,
        ) -> Result<(), StoreError> {
            if snap.value == Value::Int(13) {
                return Err(StoreError::DiskFull);
            }
            Ok(())
        }
    }

    #[test]
    fn test_failed_insert_rolls_back_whole_batch() {
        let table = PubTable::new();
        let inner = InMemoryStore::new();
        let mut store = FailingInsert(inner.clone());
        let tasks = vec![
            task_with_values(&table, 1, &[1]),
            task_with_values(&table, 2, &[13]),
        ];
        assert!(matches!(
            persist_batch(&mut store, &tasks),
            Err(StoreError::DiskFull)
        ));
        assert_eq!(inner.commit_count(), 0);
        assert_eq!(inner.rollback_count(), 1);
        assert!(inner.pub_rows().is_empty());
        assert!(!tasks[0].entry.lock().persisted);
    }
}
