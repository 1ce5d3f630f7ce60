use std::collections::HashSet;
use std::sync::Arc;

/// Callback run when a store operation happens.
type Hook = Arc<dyn Fn() + Send + Sync>;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::Mutex;

use keel_core::error::{KeelError, Result};

use crate::migrations::{AppliedRecord, ChangeSet, MigrationPhase, MigrationStore, RecordMode};
use crate::seed::SeedTarget;

/// In-memory [`MigrationStore`] and [`SeedTarget`].
///
/// Clones share state, so a test can hand one clone to the executor and
/// inspect the other afterwards. Apply is all-or-nothing like a database
/// transaction: a failed change-set leaves no trace in either the execution
/// log or the tracker.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    tracker_exists: bool,
    records: Vec<AppliedRecord>,
    /// Recorded, but written after any snapshot a run could have taken.
    hidden: HashSet<String>,
    executed: Vec<String>,
    failing: HashSet<String>,
    locked: bool,
    lock_count: usize,
    on_snapshot: Option<Hook>,
}

impl MemoryState {
    fn is_recorded(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name == name)
    }

    fn record(&mut self, name: &str) {
        self.records.push(AppliedRecord {
            name: name.to_string(),
            executed_at: Utc::now(),
        });
    }

    fn require_tracker(&self) -> Result<()> {
        if self.tracker_exists {
            Ok(())
        } else {
            Err(KeelError::Schema(
                "relation \"migrations\" does not exist".into(),
            ))
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make executing `name` fail, as if its statements were invalid.
    pub async fn fail_on(&self, name: &str) {
        self.state.lock().await.failing.insert(name.to_string());
    }

    /// Run `hook` each time the applied snapshot is taken, i.e. after
    /// discovery and before the first change-set is read.
    pub async fn on_snapshot(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.state.lock().await.on_snapshot = Some(Arc::new(hook));
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failing.clear();
    }

    /// Record `name` without it showing up in `load_applied`, simulating a
    /// concurrent writer racing the snapshot.
    pub async fn record_behind_snapshot(&self, name: &str) {
        let mut state = self.state.lock().await;
        state.tracker_exists = true;
        state.record(name);
        state.hidden.insert(name.to_string());
    }

    /// Names executed successfully, in order, including repeats.
    pub async fn executed(&self) -> Vec<String> {
        self.state.lock().await.executed.clone()
    }

    /// Names in the tracker, in insertion order.
    pub async fn recorded(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    pub async fn tracker_exists(&self) -> bool {
        self.state.lock().await.tracker_exists
    }

    pub async fn is_locked(&self) -> bool {
        self.state.lock().await.locked
    }

    /// How many times the lock has been taken.
    pub async fn lock_count(&self) -> usize {
        self.state.lock().await.lock_count
    }
}

impl MigrationStore for MemoryStore {
    fn acquire_lock(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.locked {
                return Err(KeelError::InvalidState("migration lock already held".into()));
            }
            state.locked = true;
            state.lock_count += 1;
            Ok(())
        })
    }

    fn release_lock(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.state.lock().await.locked = false;
            Ok(())
        })
    }

    fn ensure_tracker_exists(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.state.lock().await.tracker_exists = true;
            Ok(())
        })
    }

    fn load_applied(&mut self) -> BoxFuture<'_, Result<HashSet<String>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.require_tracker()?;
            if let Some(hook) = &state.on_snapshot {
                hook();
            }
            Ok(state
                .records
                .iter()
                .filter(|r| !state.hidden.contains(&r.name))
                .map(|r| r.name.clone())
                .collect())
        })
    }

    fn list_applied(&mut self) -> BoxFuture<'_, Result<Vec<AppliedRecord>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.require_tracker()?;
            Ok(state.records.clone())
        })
    }

    fn apply<'a>(
        &'a mut self,
        change_set: &'a ChangeSet,
        mode: RecordMode,
        phase: &'a mut MigrationPhase,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.require_tracker()?;

            let name = change_set.name.as_str();
            if state.failing.contains(name) {
                return Err(KeelError::execution(name, "injected failure"));
            }

            phase.advance(MigrationPhase::Recording)?;
            match mode {
                RecordMode::Strict if state.is_recorded(name) => {
                    return Err(KeelError::Conflict(name.to_string()));
                }
                RecordMode::IfAbsent if state.is_recorded(name) => {}
                _ => state.record(name),
            }

            state.executed.push(name.to_string());
            Ok(())
        })
    }
}

impl SeedTarget for MemoryStore {
    fn execute_script<'a>(&'a self, name: &'a str, _sql: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.failing.contains(name) {
                return Err(KeelError::execution(name, "injected failure"));
            }
            state.executed.push(name.to_string());
            Ok(())
        })
    }
}
