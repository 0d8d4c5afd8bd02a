//! JSON file store.
//!
//! Layout under the data directory:
//! - `positions.json`: open positions keyed by symbol, rewritten atomically
//! - `history.jsonl`: one closed position per line, append only
//! - `blacklist.json`: blacklist entries keyed by symbol, rewritten atomically
//!
//! Files are loaded once at open; the in-memory copy is authoritative for
//! reads and every mutation is written to disk before it is committed.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use carry_core::{
    BlacklistEntry, ClosedPosition, MonitorCounters, Position, Symbol, TradeStatistics,
};
use carry_position::{BlacklistStore, PositionStore, StoreError, StoreResult};

use crate::error::PersistenceResult;

const POSITIONS_FILE: &str = "positions.json";
const HISTORY_FILE: &str = "history.jsonl";
const BLACKLIST_FILE: &str = "blacklist.json";

#[derive(Debug, Default)]
struct StoreState {
    open: BTreeMap<Symbol, Position>,
    closed: Vec<ClosedPosition>,
    blacklist: BTreeMap<Symbol, BlacklistEntry>,
}

/// File-backed [`PositionStore`] and [`BlacklistStore`].
pub struct JsonStore {
    dir: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonStore {
    /// Open (creating if needed) the store in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> PersistenceResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let open: BTreeMap<Symbol, Position> = read_json(&dir.join(POSITIONS_FILE))?;
        let blacklist: BTreeMap<Symbol, BlacklistEntry> = read_json(&dir.join(BLACKLIST_FILE))?;
        let closed = read_history(&dir.join(HISTORY_FILE))?;

        info!(
            dir = %dir.display(),
            open = open.len(),
            closed = closed.len(),
            blacklisted = blacklist.len(),
            "JSON store opened"
        );
        Ok(Self {
            dir,
            state: Mutex::new(StoreState {
                open,
                closed,
                blacklist,
            }),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl PositionStore for JsonStore {
    fn create(&self, position: &Position) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.open.contains_key(&position.symbol) {
            return Err(StoreError::Duplicate(position.symbol.to_string()));
        }
        let mut next = state.open.clone();
        next.insert(position.symbol.clone(), position.clone());
        write_json_atomic(&self.path(POSITIONS_FILE), &next)?;
        state.open = next;
        debug!(symbol = %position.symbol, "Position stored");
        Ok(())
    }

    fn get_by_open_symbol(&self, symbol: &Symbol) -> StoreResult<Option<Position>> {
        Ok(self.state.lock().open.get(symbol).cloned())
    }

    fn list_open(&self) -> StoreResult<Vec<Position>> {
        let mut open: Vec<_> = self.state.lock().open.values().cloned().collect();
        open.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        Ok(open)
    }

    fn update_counters(&self, symbol: &Symbol, counters: MonitorCounters) -> StoreResult<()> {
        let mut state = self.state.lock();
        let mut next = state.open.clone();
        let position = next
            .get_mut(symbol)
            .ok_or_else(|| StoreError::NotFound(symbol.to_string()))?;
        position.counters = counters;
        write_json_atomic(&self.path(POSITIONS_FILE), &next)?;
        state.open = next;
        Ok(())
    }

    fn delete(&self, symbol: &Symbol) -> StoreResult<()> {
        let mut state = self.state.lock();
        let mut next = state.open.clone();
        if next.remove(symbol).is_none() {
            return Err(StoreError::NotFound(symbol.to_string()));
        }
        write_json_atomic(&self.path(POSITIONS_FILE), &next)?;
        state.open = next;
        Ok(())
    }

    fn save_closed(&self, record: &ClosedPosition) -> StoreResult<()> {
        let mut state = self.state.lock();
        append_json_line(&self.path(HISTORY_FILE), record)?;
        state.closed.push(record.clone());
        Ok(())
    }

    fn list_recent_closed(&self, limit: usize) -> StoreResult<Vec<ClosedPosition>> {
        Ok(self
            .state
            .lock()
            .closed
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn compute_statistics(&self) -> StoreResult<TradeStatistics> {
        Ok(TradeStatistics::from_records(&self.state.lock().closed))
    }
}

impl BlacklistStore for JsonStore {
    fn add(
        &self,
        symbol: &Symbol,
        reason: &str,
        code: Option<i64>,
    ) -> StoreResult<BlacklistEntry> {
        let mut state = self.state.lock();
        if let Some(existing) = state.blacklist.get(symbol) {
            return Ok(existing.clone());
        }
        let entry = BlacklistEntry {
            symbol: symbol.clone(),
            reason: reason.to_string(),
            error_code: code,
            added_at: Utc::now(),
        };
        let mut next = state.blacklist.clone();
        next.insert(symbol.clone(), entry.clone());
        write_json_atomic(&self.path(BLACKLIST_FILE), &next)?;
        state.blacklist = next;
        Ok(entry)
    }

    fn remove(&self, symbol: &Symbol) -> StoreResult<bool> {
        let mut state = self.state.lock();
        if !state.blacklist.contains_key(symbol) {
            return Ok(false);
        }
        let mut next = state.blacklist.clone();
        next.remove(symbol);
        write_json_atomic(&self.path(BLACKLIST_FILE), &next)?;
        state.blacklist = next;
        Ok(true)
    }

    fn is_member(&self, symbol: &Symbol) -> StoreResult<bool> {
        Ok(self.state.lock().blacklist.contains_key(symbol))
    }

    fn list_all(&self) -> StoreResult<Vec<BlacklistEntry>> {
        Ok(self.state.lock().blacklist.values().cloned().collect())
    }
}

// ============================================================================
// File helpers
// ============================================================================

/// Read a JSON document, or the default when the file does not exist.
fn read_json<T: DeserializeOwned + Default>(path: &Path) -> PersistenceResult<T> {
    match File::open(path) {
        Ok(file) => Ok(serde_json::from_reader(BufReader::new(file))?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write to a sibling temp file, then rename over `path`.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> PersistenceResult<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> PersistenceResult<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.sync_data()?;
    Ok(())
}

/// Load history, skipping lines that fail to parse.
fn read_history(path: &Path) -> PersistenceResult<Vec<ClosedPosition>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(line = index + 1, error = %e, "Skipping corrupt history line"),
        }
    }
    Ok(records)
}
