//! PID controller state persistence
//!
//! One `{premium, i}` snapshot per asset. A missing snapshot is a cold start.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use pricefeed_core::{DeriveError, DeriveResult, PidState};

/// Per-asset controller state storage
pub trait ControllerStore: Send + Sync {
    fn load(&self, symbol: &str) -> DeriveResult<Option<PidState>>;

    /// Replace the stored snapshot of `symbol`
    fn save(&self, symbol: &str, state: PidState) -> DeriveResult<()>;
}

/// In-process store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryControllerStore {
    states: DashMap<String, PidState>,
}

impl MemoryControllerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl ControllerStore for MemoryControllerStore {
    fn load(&self, symbol: &str) -> DeriveResult<Option<PidState>> {
        Ok(self.states.get(symbol).map(|entry| *entry.value()))
    }

    fn save(&self, symbol: &str, state: PidState) -> DeriveResult<()> {
        self.states.insert(symbol.to_string(), state);
        Ok(())
    }
}

/// One JSON file per asset under a state directory.
///
/// Writes go to a `.tmp` sibling that is renamed over the snapshot.
#[derive(Debug)]
pub struct JsonControllerStore {
    dir: PathBuf,
    // one writer at a time per store; the tmp path is shared
    write_lock: Mutex<()>,
}

impl JsonControllerStore {
    pub fn new(dir: impl Into<PathBuf>) -> DeriveResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| state_error(&dir, e))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("pid_{}.json", symbol))
    }
}

impl ControllerStore for JsonControllerStore {
    fn load(&self, symbol: &str) -> DeriveResult<Option<PidState>> {
        let path = self.path_for(symbol);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(state_error(&path, e)),
        };
        let state = serde_json::from_str(&json).map_err(|e| state_error(&path, e))?;
        debug!("Loaded controller state for {} from {}", symbol, path.display());
        Ok(Some(state))
    }

    fn save(&self, symbol: &str, state: PidState) -> DeriveResult<()> {
        let path = self.path_for(symbol);
        let tmp_path = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(&state).map_err(|e| state_error(&path, e))?;
        let _guard = self.write_lock.lock();
        fs::write(&tmp_path, json).map_err(|e| state_error(&tmp_path, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| state_error(&path, e))?;

        debug!("Saved controller state for {} to {}", symbol, path.display());
        Ok(())
    }
}

fn state_error(path: &Path, err: impl std::fmt::Display) -> DeriveError {
    DeriveError::ControllerState(format!("{}: {}", path.display(), err))
}
