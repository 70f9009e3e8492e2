//! Durable workflow state.
//!
//! A [`StateStore`] holds exactly one [`WorkflowState`] per task id. Writes go
//! through [`StateStore::compare_and_swap`] keyed on `version`, so a writer
//! working from a stale snapshot never overwrites a newer one.
//!
//! [`StateStore::list_active`] is what periodic work (the timeout sweep,
//! recovery) iterates, so stores keep it from scaling with finished history.

use af_protocol::workflow_models::WorkflowState;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Task already exists: {0}")]
    AlreadyExists(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("State I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state document {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, task_id: &str) -> Result<Option<WorkflowState>, StoreError>;

    /// Store a new task. Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, state: &WorkflowState) -> Result<(), StoreError>;

    /// Replace the stored state if its version is still `expected_version`.
    /// Returns `false` when another writer got there first.
    async fn compare_and_swap(&self, expected_version: u64, state: &WorkflowState) -> Result<bool, StoreError>;

    /// All stored states, oldest first.
    async fn list(&self) -> Result<Vec<WorkflowState>, StoreError>;

    /// Stored states that are not terminal, oldest first.
    async fn list_active(&self) -> Result<Vec<WorkflowState>, StoreError> {
        let mut states = self.list().await?;
        states.retain(|s| !s.is_terminal());
        Ok(states)
    }
}

fn sort_oldest_first(states: &mut [WorkflowState]) {
    states.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.task_id.cmp(&b.task_id)));
}

#[derive(Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<String, WorkflowState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, task_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        Ok(self
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned())
    }

    async fn insert(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        if states.contains_key(&state.task_id) {
            return Err(StoreError::AlreadyExists(state.task_id.clone()));
        }
        states.insert(state.task_id.clone(), state.clone());
        Ok(())
    }

    async fn compare_and_swap(&self, expected_version: u64, state: &WorkflowState) -> Result<bool, StoreError> {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let current = states
            .get_mut(&state.task_id)
            .ok_or_else(|| StoreError::NotFound(state.task_id.clone()))?;
        if current.version != expected_version {
            return Ok(false);
        }
        *current = state.clone();
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<WorkflowState>, StoreError> {
        let mut states: Vec<WorkflowState> = self
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sort_oldest_first(&mut states);
        Ok(states)
    }
}

/// One pretty-printed JSON document per task under a directory.
///
/// Live tasks sit directly in the directory. A task written in a terminal
/// state moves to `archive/`, so [`StateStore::list_active`] never reads
/// finished history. Terminal states are final, which makes the archived
/// copy authoritative if a crash leaves both files behind.
///
/// Documents are written to a temp file in the same directory and renamed
/// into place. The compare-and-swap is atomic within one process only.
pub struct FileStore {
    dir: PathBuf,
    archive: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let archive = dir.join("archive");
        tokio::fs::create_dir_all(&archive)
            .await
            .map_err(|source| StoreError::Io {
                path: archive.clone(),
                source,
            })?;
        Ok(Self {
            dir,
            archive,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where documents of terminal tasks live.
    pub fn archive_dir(&self) -> &Path {
        &self.archive
    }

    fn path_for(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }

    fn archived_path_for(&self, task_id: &str) -> PathBuf {
        self.archive.join(format!("{task_id}.json"))
    }

    async fn read(&self, path: &Path) -> Result<Option<WorkflowState>, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn read_task(&self, task_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        match self.read(&self.archived_path_for(task_id)).await? {
            Some(state) => Ok(Some(state)),
            None => self.read(&self.path_for(task_id)).await,
        }
    }

    async fn write(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let (dir, path) = if state.is_terminal() {
            (self.archive.clone(), self.archived_path_for(&state.task_id))
        } else {
            (self.dir.clone(), self.path_for(&state.task_id))
        };
        let json = serde_json::to_vec_pretty(state).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        let target = path.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = NamedTempFile::new_in(&dir)?;
            file.write_all(&json)?;
            file.as_file().sync_all()?;
            file.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io {
            path: path.clone(),
            source: std::io::Error::other(e),
        })?
        .map_err(|source| StoreError::Io { path, source })?;

        if state.is_terminal() {
            let live = self.path_for(&state.task_id);
            match tokio::fs::remove_file(&live).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(StoreError::Io { path: live, source }),
            }
        }
        Ok(())
    }

    /// Every readable document directly inside `dir`.
    async fn read_all(&self, dir: &Path) -> Result<Vec<WorkflowState>, StoreError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;

        let mut states = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(StoreError::Io {
                        path: dir.to_path_buf(),
                        source,
                    })
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable state document"),
            }
        }
        Ok(states)
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn get(&self, task_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        self.read_task(task_id).await
    }

    async fn insert(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.read_task(&state.task_id).await?.is_some() {
            return Err(StoreError::AlreadyExists(state.task_id.clone()));
        }
        self.write(state).await
    }

    async fn compare_and_swap(&self, expected_version: u64, state: &WorkflowState) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .read_task(&state.task_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(state.task_id.clone()))?;
        if current.version != expected_version {
            return Ok(false);
        }
        self.write(state).await?;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<WorkflowState>, StoreError> {
        let mut states = self.read_all(&self.archive).await?;
        let archived: HashSet<String> = states.iter().map(|s| s.task_id.clone()).collect();
        states.extend(
            self.read_all(&self.dir)
                .await?
                .into_iter()
                .filter(|s| !archived.contains(&s.task_id)),
        );
        sort_oldest_first(&mut states);
        Ok(states)
    }

    async fn list_active(&self) -> Result<Vec<WorkflowState>, StoreError> {
        let mut states = Vec::new();
        for state in self.read_all(&self.dir).await? {
            if state.is_terminal() {
                continue;
            }
            // Leftover of a move into the archive that did not finish.
            let archived = self.archived_path_for(&state.task_id);
            if tokio::fs::try_exists(&archived).await.unwrap_or(false) {
                continue;
            }
            states.push(state);
        }
        sort_oldest_first(&mut states);
        Ok(states)
    }
}
