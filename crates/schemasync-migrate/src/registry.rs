use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};

use schemasync_db::Database;
use tracing::{debug, warn};

/// Temp tables created during extraction that have not been dropped yet,
/// plus the in-process counter that feeds temp-table names.
///
/// One registry belongs to one extractor; nothing is shared process-wide.
#[derive(Debug, Default)]
pub struct TempTableRegistry {
    pending: Mutex<BTreeSet<String>>,
    sequence: AtomicU64,
}

impl TempTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next value of the monotonic name counter.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// The set of pending names. A poisoned lock is logged and recovered so
    /// no name drops out of the sweep.
    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.pending.lock().unwrap_or_else(|poisoned| {
            warn!("temp table registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn register(&self, table: &str) {
        self.lock().insert(table.to_string());
    }

    pub fn release(&self, table: &str) {
        self.lock().remove(table);
    }

    pub fn pending(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Drop every pending table, keeping the names whose drop failed.
    /// Returns how many tables were dropped.
    pub fn sweep(&self, db: &dyn Database) -> usize {
        let mut dropped = 0;
        for table in self.pending() {
            match db.drop_table_if_exists(&table) {
                Ok(()) => {
                    debug!(table = %table, "swept leftover temp table");
                    self.release(&table);
                    dropped += 1;
                }
                Err(e) => warn!(table = %table, "failed to sweep temp table: {e}"),
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemasync_db::{Blueprint, SqliteDatabase};

    #[test]
    fn sequence_is_monotonic() {
        let registry = TempTableRegistry::new();
        let a = registry.next_sequence();
        let b = registry.next_sequence();
        assert!(b > a);
    }

    #[test]
    fn register_and_release() {
        let registry = TempTableRegistry::new();
        registry.register("tmp_a");
        registry.register("tmp_b");
        registry.release("tmp_a");
        assert_eq!(registry.pending(), vec!["tmp_b".to_string()]);
    }

    #[test]
    fn poisoned_lock_still_tracks_tables() {
        let registry = std::sync::Arc::new(TempTableRegistry::new());
        registry.register("tmp_a");

        let holder = registry.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.pending.lock().unwrap();
            panic!("worker died while holding the registry");
        })
        .join();
        assert!(registry.pending.is_poisoned());

        registry.register("tmp_b");
        registry.release("tmp_a");
        assert_eq!(registry.pending(), vec!["tmp_b".to_string()]);
    }

    #[test]
    fn sweep_drops_pending_tables() {
        let db = SqliteDatabase::in_memory().unwrap();
        let mut table = Blueprint::new("tmp_leftover");
        table.increments("id");
        db.create_table(&table).unwrap();

        let registry = TempTableRegistry::new();
        registry.register("tmp_leftover");
        registry.register("tmp_never_created");

        assert_eq!(registry.sweep(&db), 2);
        assert!(registry.pending().is_empty());
        assert!(!db.table_exists("tmp_leftover").unwrap());
    }
}
