//! Journal-backed durable report store.
//!
//! Every mutation appends one newline-delimited JSON entry carrying the
//! full post-mutation record; opening the store replays the journal to
//! rebuild the working set. A crash between an in-memory mutation and its
//! journal line loses only that mutation: readers see the prior state
//! until the operation is replayed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use vigil_primitives::{
    AgentAddress, Clock, MarketplaceSnapshot, MissingReport, MonitorError, MonitorResult,
    ReportDraft, ReportFilter, ReportPage, ReportStats,
};

use crate::memory::MemoryReportStore;
use crate::reports::ReportStore;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum JournalEntry {
    Upsert { report: MissingReport },
    Remove { ids: Vec<String> },
}

/// Report store persisting to a newline-delimited JSON journal.
pub struct JournalReportStore {
    memory: MemoryReportStore,
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JournalReportStore {
    /// Opens (or creates) the journal at `path` and replays its entries.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::StoreUnavailable`] when the journal cannot
    /// be read or created.
    pub async fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> MonitorResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(store_err)?;
        }

        let memory = MemoryReportStore::new(clock);
        let mut replayed = 0_usize;
        match fs::read(&path).await {
            Ok(data) => {
                for chunk in data.split(|byte| *byte == b'\n').filter(|c| !c.is_empty()) {
                    match serde_json::from_slice::<JournalEntry>(chunk) {
                        Ok(JournalEntry::Upsert { report }) => {
                            memory.restore(report).await;
                            replayed += 1;
                        }
                        Ok(JournalEntry::Remove { ids }) => {
                            memory.forget(&ids).await;
                            replayed += 1;
                        }
                        Err(err) => {
                            // A torn tail line from a crash mid-append is
                            // expected; anything else is worth a warning.
                            warn!(?err, path = %path.display(), "skipping unreadable journal line");
                        }
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(store_err(err)),
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(store_err)?;
        if replayed > 0 {
            info!(replayed, path = %path.display(), "report journal replayed");
        }

        Ok(Self {
            memory,
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &JournalEntry) -> MonitorResult<()> {
        let line = serde_json::to_vec(entry).map_err(store_err)?;
        let mut guard = self.file.lock().await;
        guard.write_all(&line).await.map_err(store_err)?;
        guard.write_u8(b'\n').await.map_err(store_err)?;
        guard.flush().await.map_err(store_err)?;
        Ok(())
    }

    /// Rewrites the journal to one `Upsert` per retained record, dropping
    /// superseded lines.
    async fn compact(&self) -> MonitorResult<()> {
        let records = self.memory.dump().await;
        let mut buffer = Vec::new();
        for report in records {
            let entry = JournalEntry::Upsert { report };
            buffer.extend(serde_json::to_vec(&entry).map_err(store_err)?);
            buffer.push(b'\n');
        }
        let mut guard = self.file.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
            .map_err(store_err)?;
        file.write_all(&buffer).await.map_err(store_err)?;
        file.flush().await.map_err(store_err)?;
        *guard = file;
        Ok(())
    }
}

fn store_err(err: impl std::fmt::Display) -> MonitorError {
    MonitorError::store_unavailable(err.to_string())
}

#[async_trait]
impl ReportStore for JournalReportStore {
    async fn create(&self, draft: ReportDraft) -> MonitorResult<MissingReport> {
        let report = self.memory.create(draft).await?;
        self.append(&JournalEntry::Upsert {
            report: report.clone(),
        })
        .await?;
        Ok(report)
    }

    async fn get(&self, id: &str) -> MonitorResult<Option<MissingReport>> {
        self.memory.get(id).await
    }

    async fn open_for_agent(&self, address: AgentAddress) -> MonitorResult<Option<MissingReport>> {
        self.memory.open_for_agent(address).await
    }

    async fn list_by_agent(&self, address: AgentAddress) -> MonitorResult<Vec<MissingReport>> {
        self.memory.list_by_agent(address).await
    }

    async fn list(&self, filter: &ReportFilter) -> MonitorResult<ReportPage> {
        self.memory.list(filter).await
    }

    async fn acknowledge(&self, id: &str, actor: &str) -> MonitorResult<MissingReport> {
        let report = self.memory.acknowledge(id, actor).await?;
        self.append(&JournalEntry::Upsert {
            report: report.clone(),
        })
        .await?;
        Ok(report)
    }

    async fn resolve(&self, id: &str, resolution: &str) -> MonitorResult<MissingReport> {
        let report = self.memory.resolve(id, resolution).await?;
        self.append(&JournalEntry::Upsert {
            report: report.clone(),
        })
        .await?;
        Ok(report)
    }

    async fn attach_marketplace(
        &self,
        id: &str,
        snapshot: MarketplaceSnapshot,
    ) -> MonitorResult<MissingReport> {
        let report = self.memory.attach_marketplace(id, snapshot).await?;
        self.append(&JournalEntry::Upsert {
            report: report.clone(),
        })
        .await?;
        Ok(report)
    }

    async fn stats(&self) -> MonitorResult<ReportStats> {
        self.memory.stats().await
    }

    async fn garbage_collect(&self, older_than_days: u64) -> MonitorResult<usize> {
        let removed = self.memory.collect_expired(older_than_days).await;
        if removed.is_empty() {
            return Ok(0);
        }
        self.compact().await?;
        Ok(removed.len())
    }
}
