// # Transactional Committer
//
// Applies a commit plan atomically: files are placed into managed storage,
// then all catalog rows for the plan land inside a single database
// transaction. Any failure (or the commit deadline elapsing) reverses every
// file placement made so far and records a rollback in the audit log.
//
// Commits are serialized per system so the (system, digest) uniqueness
// check and insert cannot interleave across workers.

use crate::db::{AuditAction, Database, DbAuditEntry};
use crate::grouping::CommitPlan;
use crate::package::PackageEnvelope;
use crate::storage::{StorageError, StorageManager};
use crate::systems::SystemId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("commit deadline elapsed")]
    Timeout,
}

/// What a successful commit produced: one entry id per input item, plus the
/// parent entry id for multi-part plans.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    /// `(item_id, entry_id)` in plan order.
    pub entries: Vec<(String, String)>,
    pub parent_id: Option<String>,
}

pub struct Committer {
    db: Database,
    storage: StorageManager,
    commit_timeout: Duration,
    system_locks: std::sync::Mutex<HashMap<SystemId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Committer {
    pub fn new(db: Database, storage: StorageManager, commit_timeout: Duration) -> Self {
        Committer {
            db,
            storage,
            commit_timeout,
            system_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, system: SystemId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.system_locks.lock().unwrap();
        locks
            .entry(system)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Commit a whole plan or nothing. Runs under the per-system locks and
    /// the commit deadline; on failure all placed files are removed and a
    /// rollback audit row is written.
    pub async fn commit(&self, plan: &CommitPlan) -> Result<CommitReceipt, CommitError> {
        // Take every member system's lock in a stable order so two
        // mixed-system plans cannot deadlock against each other
        let mut systems: Vec<SystemId> = plan.files.iter().map(|f| f.entry.system_id).collect();
        systems.sort_by_key(|s| s.as_str());
        systems.dedup();
        let locks: Vec<_> = systems.iter().map(|&s| self.lock_for(s)).collect();
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.lock().await);
        }

        let needed: u64 = plan.files.iter().map(|f| f.entry.size_bytes as u64).sum();
        let available = self.storage.available_space()?;
        if needed > available {
            return Err(CommitError::Storage(StorageError::InsufficientSpace {
                needed,
                available,
            }));
        }

        // Shared with the timed future so placements made before a timeout
        // are still visible to the rollback path
        let placed: Arc<tokio::sync::Mutex<Vec<PathBuf>>> =
            Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let attempt = self.apply_plan(plan, placed.clone());
        let result = match tokio::time::timeout(self.commit_timeout, attempt).await {
            Ok(inner) => inner,
            Err(_) => Err(CommitError::Timeout),
        };

        match result {
            Ok(receipt) => {
                info!(
                    "Committed {} entr{} for {}",
                    receipt.entries.len(),
                    if receipt.entries.len() == 1 { "y" } else { "ies" },
                    systems[0].as_str()
                );
                Ok(receipt)
            }
            Err(err) => {
                self.rollback_placements(plan, &placed, &err).await;
                Err(err)
            }
        }
    }

    async fn apply_plan(
        &self,
        plan: &CommitPlan,
        placed: Arc<tokio::sync::Mutex<Vec<PathBuf>>>,
    ) -> Result<CommitReceipt, CommitError> {
        for file in &plan.files {
            let relative_dest = PathBuf::from(&file.entry.primary_file);
            self.storage.place(&file.source_path, &relative_dest).await?;
            placed.lock().await.push(relative_dest);
        }

        let mut tx = self.db.begin().await?;

        if let Some(parent) = &plan.parent {
            Database::insert_entry_tx(&mut tx, parent).await?;
        }
        for file in &plan.files {
            Database::insert_entry_tx(&mut tx, &file.entry).await?;
        }

        let subject = plan
            .parent
            .as_ref()
            .map(|p| p.id.clone())
            .unwrap_or_else(|| plan.files[0].entry.id.clone());
        let audit = DbAuditEntry::new(
            AuditAction::Commit,
            Some(subject),
            &format!("committed {} file(s)", plan.files.len()),
        );
        Database::insert_audit_tx(&mut tx, &audit).await?;

        tx.commit().await?;

        Ok(CommitReceipt {
            entries: plan
                .files
                .iter()
                .map(|f| (f.item_id.clone(), f.entry.id.clone()))
                .collect(),
            parent_id: plan.parent.as_ref().map(|p| p.id.clone()),
        })
    }

    /// Reverse file placements after a failed or timed-out commit. The
    /// database transaction never landed (drop rolls it back), so only the
    /// filesystem needs undoing.
    async fn rollback_placements(
        &self,
        plan: &CommitPlan,
        placed: &Arc<tokio::sync::Mutex<Vec<PathBuf>>>,
        cause: &CommitError,
    ) {
        let placed = placed.lock().await;
        for relative_dest in placed.iter() {
            if let Err(err) = self.storage.remove(relative_dest).await {
                warn!(
                    "Rollback could not remove {}: {}",
                    relative_dest.display(),
                    err
                );
            }
        }

        let subject = plan
            .parent
            .as_ref()
            .map(|p| p.id.clone())
            .unwrap_or_else(|| plan.files[0].entry.id.clone());
        let audit = DbAuditEntry::new(
            AuditAction::Rollback,
            Some(subject),
            &format!("rolled back {} placement(s): {}", placed.len(), cause),
        );
        if let Err(err) = self.db.insert_audit(&audit).await {
            warn!("Could not record rollback audit row: {}", err);
        }
    }

    /// Record that an item duplicated an already-committed entry.
    pub async fn record_duplicate(
        &self,
        item_id: &str,
        existing_entry_id: &str,
    ) -> Result<(), CommitError> {
        let audit = DbAuditEntry::new(
            AuditAction::Duplicate,
            Some(existing_entry_id.to_string()),
            &format!("item {} matched existing entry", item_id),
        );
        self.db.insert_audit(&audit).await?;
        Ok(())
    }

    /// Persist a package envelope (save state, config) transactionally.
    pub async fn commit_package(&self, envelope: PackageEnvelope) -> Result<String, CommitError> {
        let row = envelope.into_row();
        let id = row.id.clone();

        let mut tx = self.db.begin().await?;
        Database::insert_package_tx(&mut tx, &row).await?;
        let audit = DbAuditEntry::new(
            AuditAction::PackageCommit,
            Some(id.clone()),
            &format!("stored {} package", row.kind.as_str()),
        );
        Database::insert_audit_tx(&mut tx, &audit).await?;
        tx.commit().await?;

        Ok(id)
    }
}

impl std::fmt::Debug for Committer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Committer")
            .field("commit_timeout", &self.commit_timeout)
            .finish()
    }
}
