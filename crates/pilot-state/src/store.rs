//! JSON-document state store with serialized mutation.
//!
//! The record is a single pretty-printed JSON object. Writes go to a
//! sibling `.tmp` file which is fsynced and renamed over the record, so a
//! crash mid-write leaves either the old or the new document, never a mix.
//!
//! Mutations are serialized through an async mutex. Readers use
//! [`StateStore::snapshot`], which returns the last successfully persisted
//! record and never waits on an in-flight mutation.

use crate::error::{StateError, StateResult};
use chrono::Utc;
use parking_lot::RwLock;
use pilot_core::{BotState, RetryPolicy};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// How the record was obtained at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Persisted record parsed successfully.
    Loaded,
    /// No record existed; the default state was written.
    Fresh,
    /// Record was unreadable; it was moved aside and the default state written.
    Recovered {
        reason: String,
        quarantined_to: Option<PathBuf>,
    },
}

/// Durable owner of the bot's `BotState`.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    /// Authoritative record; holding the lock is the only way to mutate.
    current: Mutex<BotState>,
    /// Last persisted record, for lock-free consistent reads.
    snapshot: RwLock<BotState>,
}

impl StateStore {
    /// Read and parse the record at `path`.
    ///
    /// Returns `Ok(None)` when no record exists and `StateError::Corrupt`
    /// when the document cannot be parsed.
    pub fn load(path: &Path) -> StateResult<Option<BotState>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::Io(e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StateError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Open the store, recovering from a corrupt record.
    ///
    /// `default_state` is written when the record is missing or corrupt.
    /// I/O failures (permissions, unreadable disk) are returned as errors.
    pub fn open(
        path: impl Into<PathBuf>,
        default_state: BotState,
    ) -> StateResult<(Self, LoadOutcome)> {
        let path = path.into();

        let (state, outcome) = match Self::load(&path) {
            Ok(Some(state)) => (state, LoadOutcome::Loaded),
            Ok(None) => {
                info!(path = %path.display(), "No state record found, starting fresh");
                (default_state, LoadOutcome::Fresh)
            }
            Err(StateError::Corrupt { reason, .. }) => {
                let quarantined_to = quarantine(&path);
                warn!(
                    path = %path.display(),
                    %reason,
                    quarantined_to = ?quarantined_to,
                    "State record corrupt, recovering with default state"
                );
                (
                    default_state,
                    LoadOutcome::Recovered {
                        reason,
                        quarantined_to,
                    },
                )
            }
            Err(e) => return Err(e),
        };

        if outcome != LoadOutcome::Loaded {
            write_atomic(&path, &state)?;
        }

        Ok((
            Self {
                path,
                snapshot: RwLock::new(state.clone()),
                current: Mutex::new(state),
            },
            outcome,
        ))
    }

    /// Open the store, retrying I/O failures with exponential backoff.
    pub async fn open_with_retry(
        path: impl Into<PathBuf>,
        default_state: BotState,
        policy: RetryPolicy,
    ) -> StateResult<(Self, LoadOutcome)> {
        let path = path.into();
        let mut retry = 0u32;

        loop {
            let attempt = {
                let path = path.clone();
                let default_state = default_state.clone();
                tokio::task::spawn_blocking(move || Self::open(path, default_state))
                    .await
                    .map_err(join_error)?
            };
            match attempt {
                Ok(opened) => return Ok(opened),
                Err(e) if retry < policy.max_retries => {
                    retry += 1;
                    let delay = policy.delay_for(retry);
                    warn!(
                        ?e,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        "State open failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(StateError::Unavailable {
                        attempts: retry + 1,
                        last_error: e.to_string(),
                    })
                }
            }
        }
    }

    /// Path of the persisted record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consistent copy of the last persisted state.
    pub fn snapshot(&self) -> BotState {
        self.snapshot.read().clone()
    }

    /// Acquire exclusive mutation rights.
    ///
    /// Other `lock`/`mutate` callers wait until the guard is dropped.
    pub async fn lock(&self) -> StateGuard<'_> {
        StateGuard {
            store: self,
            guard: self.current.lock().await,
        }
    }

    /// Atomic read-modify-write-persist.
    ///
    /// Returns the new state once it is durably written. On a write failure
    /// the in-memory record is left unchanged.
    pub async fn mutate<F>(&self, f: F) -> StateResult<BotState>
    where
        F: FnOnce(&mut BotState),
    {
        let mut guard = self.lock().await;
        let mut next = guard.state().clone();
        f(&mut next);
        guard.commit(next).await
    }

    /// Write `state` on the blocking pool, then publish it to readers.
    async fn persist(&self, state: &BotState) -> StateResult<()> {
        let json = serde_json::to_string_pretty(state)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_json(&path, &json))
            .await
            .map_err(join_error)??;
        *self.snapshot.write() = state.clone();
        Ok(())
    }
}

/// Exclusive handle on the state record.
///
/// Lets a caller read the state, perform async work, and commit a new
/// record without another mutation interleaving.
pub struct StateGuard<'a> {
    store: &'a StateStore,
    guard: MutexGuard<'a, BotState>,
}

impl StateGuard<'_> {
    /// Current authoritative state.
    pub fn state(&self) -> &BotState {
        &self.guard
    }

    /// Persist `next` and make it current.
    ///
    /// On a write failure the current state is left as it was.
    pub async fn commit(&mut self, next: BotState) -> StateResult<BotState> {
        self.store.persist(&next).await?;
        *self.guard = next;
        debug!(path = %self.store.path.display(), "State persisted");
        Ok(self.guard.clone())
    }
}

/// Write `state` to `path` via a fsynced temp file and rename.
fn write_atomic(path: &Path, state: &BotState) -> StateResult<()> {
    let json = serde_json::to_string_pretty(state)?;
    write_json(path, &json)
}

fn write_json(path: &Path, json: &str) -> StateResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(path);
    {
        let mut file: File = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn join_error(e: tokio::task::JoinError) -> StateError {
    StateError::Io(std::io::Error::other(e))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Move an unreadable record aside; returns where it went.
fn quarantine(path: &Path) -> Option<PathBuf> {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".corrupt-{}", Utc::now().timestamp_millis()));
    let target = PathBuf::from(name);

    match fs::rename(path, &target) {
        Ok(()) => Some(target),
        Err(e) => {
            warn!(?e, path = %path.display(), "Failed to quarantine corrupt state record");
            None
        }
    }
}
