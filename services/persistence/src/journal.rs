//! Journal Bar Repository
//!
//! Append-only bar journal with checksums.
//!
//! Every `put` appends one record; the latest record for a key wins. The
//! in-memory index is rebuilt by scanning the file on open.
//!
//! # Binary Format (per record)
//! ```text
//! [body_len:    u32]
//! [sequence:    u64]
//! [payload_len: u32][payload: bincode(Bar)]
//! [checksum:    u32]  // CRC32C over sequence ++ payload
//! ```
//!
//! Recovery on open:
//! - an incomplete or checksum-failing *last* record is a torn write; the
//!   file is truncated to the last good record and a warning is logged
//! - any bad record before the tail is corruption and fails the open with
//!   the byte offset of the offending record

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crc32c::crc32c;
use tracing::{error, info, warn};
use types::bar::{Bar, BarKey};
use types::timeframe::Timeframe;

use crate::error::StoreError;
use crate::repository::{series_bounds, BarRepository};

/// Journal file name inside the configured directory.
pub const JOURNAL_FILE: &str = "bars.journal";

/// Upper bound on a single record body; larger lengths mean corruption.
const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// sequence + payload_len + checksum
const BODY_OVERHEAD: usize = 8 + 4 + 4;

// ── Record codec ────────────────────────────────────────────────────

fn checksum(sequence: u64, payload: &[u8]) -> u32 {
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(payload);
    crc32c(&buf)
}

fn encode_record(sequence: u64, payload: &[u8]) -> Vec<u8> {
    let body_len = (BODY_OVERHEAD + payload.len()) as u32;
    let mut buf = Vec::with_capacity(4 + body_len as usize);
    buf.extend_from_slice(&body_len.to_le_bytes());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&checksum(sequence, payload).to_le_bytes());
    buf
}

enum RecordError {
    /// Ran out of bytes mid-record.
    Incomplete,
    /// Structurally invalid or failed its checksum.
    Invalid(String),
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
}

/// Decode one record at the start of `data`.
///
/// Returns `(sequence, payload, bytes_consumed)`.
fn decode_record(data: &[u8]) -> Result<(u64, &[u8], usize), RecordError> {
    let body_len = read_u32(data, 0).ok_or(RecordError::Incomplete)? as usize;
    if !(BODY_OVERHEAD..=MAX_BODY_LEN).contains(&body_len) {
        return Err(RecordError::Invalid(format!("implausible body length {body_len}")));
    }
    let total = 4 + body_len;
    if data.len() < total {
        return Err(RecordError::Incomplete);
    }

    let sequence = read_u64(data, 4).ok_or(RecordError::Incomplete)?;
    let payload_len = read_u32(data, 12).ok_or(RecordError::Incomplete)? as usize;
    if BODY_OVERHEAD + payload_len != body_len {
        return Err(RecordError::Invalid(format!(
            "payload length {payload_len} disagrees with body length {body_len}"
        )));
    }
    let payload = &data[16..16 + payload_len];
    let stored = read_u32(data, 16 + payload_len).ok_or(RecordError::Incomplete)?;
    let expected = checksum(sequence, payload);
    if stored != expected {
        return Err(RecordError::Invalid(format!(
            "checksum mismatch (stored {stored:#010x}, computed {expected:#010x})"
        )));
    }
    Ok((sequence, payload, total))
}

/// Result of scanning a journal file.
struct Scan {
    index: BTreeMap<BarKey, Bar>,
    records: u64,
    last_sequence: Option<u64>,
    /// Length of the valid prefix; anything after it is a torn tail.
    valid_len: usize,
}

fn scan(path: &Path, data: &[u8]) -> Result<Scan, StoreError> {
    let mut scan = Scan {
        index: BTreeMap::new(),
        records: 0,
        last_sequence: None,
        valid_len: 0,
    };
    let corrupt = |offset: usize, detail: String| {
        error!(path = %path.display(), offset, detail = %detail, "Journal corruption");
        StoreError::Corrupt {
            path: path.to_path_buf(),
            offset: offset as u64,
            detail,
        }
    };

    let mut offset = 0usize;
    while offset < data.len() {
        let rest = &data[offset..];
        let (sequence, payload, consumed) = match decode_record(rest) {
            Ok(record) => record,
            Err(RecordError::Incomplete) => break,
            Err(RecordError::Invalid(detail)) => {
                // Only the final record may be torn.
                let record_end = read_u32(rest, 0).map(|len| offset + 4 + len as usize);
                if record_end.map_or(true, |end| end >= data.len()) {
                    break;
                }
                return Err(corrupt(offset, detail));
            }
        };

        if let Some(last) = scan.last_sequence {
            if sequence <= last {
                return Err(corrupt(
                    offset,
                    format!("sequence {sequence} does not follow {last}"),
                ));
            }
        }
        let bar: Bar = bincode::deserialize(payload)
            .map_err(|e| corrupt(offset, format!("undecodable bar payload: {e}")))?;

        scan.index.insert(bar.key(), bar);
        scan.last_sequence = Some(sequence);
        scan.records += 1;
        offset += consumed;
        scan.valid_len = offset;
    }
    Ok(scan)
}

// ── Configuration ───────────────────────────────────────────────────

/// Controls when `fsync` is called after appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync after every write.
    EveryWrite,
    /// Fsync every N writes.
    EveryN(usize),
    /// Leave durability to the OS (data is still flushed per write).
    Never,
}

#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory holding the journal file.
    pub dir: PathBuf,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }

    pub fn with_fsync_policy(mut self, policy: FsyncPolicy) -> Self {
        self.fsync_policy = policy;
        self
    }
}

// ── Repository ──────────────────────────────────────────────────────

struct JournalState {
    writer: BufWriter<File>,
    index: BTreeMap<BarKey, Bar>,
    next_sequence: u64,
    writes_since_fsync: usize,
}

pub struct JournalBarRepository {
    path: PathBuf,
    config: JournalConfig,
    state: Mutex<JournalState>,
}

impl JournalBarRepository {
    /// Open (or create) the journal, rebuilding the index from disk.
    pub fn open(config: JournalConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.dir)?;
        let path = config.dir.join(JOURNAL_FILE);

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let scan = scan(&path, &data)?;

        if scan.valid_len < data.len() {
            warn!(
                path = %path.display(),
                valid_len = scan.valid_len,
                file_len = data.len(),
                "Truncating torn journal tail"
            );
            OpenOptions::new()
                .write(true)
                .open(&path)?
                .set_len(scan.valid_len as u64)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(
            path = %path.display(),
            records = scan.records,
            bars = scan.index.len(),
            "Bar journal opened"
        );

        Ok(Self {
            path,
            config,
            state: Mutex::new(JournalState {
                writer: BufWriter::new(file),
                index: scan.index,
                next_sequence: scan.last_sequence.map_or(0, |s| s + 1),
                writes_since_fsync: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, JournalState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::LockPoisoned("bar journal"))
    }

    /// Force flush + fsync.
    pub fn sync(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.writer.flush()?;
        state.writer.get_ref().sync_all()?;
        state.writes_since_fsync = 0;
        Ok(())
    }

    /// Rewrite the journal with one record per stored bar.
    ///
    /// Returns the number of records written.
    pub fn compact(&self) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        state.writer.flush()?;

        let tmp = self.path.with_extension("journal.compact");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for (sequence, bar) in state.index.values().enumerate() {
                let payload = bincode::serialize(bar)?;
                out.write_all(&encode_record(sequence as u64, &payload))?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        let records = state.index.len();
        state.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        state.next_sequence = records as u64;
        state.writes_since_fsync = 0;
        info!(path = %self.path.display(), records, "Bar journal compacted");
        Ok(records)
    }
}

impl BarRepository for JournalBarRepository {
    fn put(&self, bar: &Bar) -> Result<(), StoreError> {
        let payload = bincode::serialize(bar)?;
        let mut state = self.lock()?;

        let sequence = state.next_sequence;
        state.writer.write_all(&encode_record(sequence, &payload))?;
        state.writer.flush()?;
        state.writes_since_fsync += 1;

        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => state.writes_since_fsync >= n.max(1),
            FsyncPolicy::Never => false,
        };
        if should_fsync {
            state.writer.get_ref().sync_data()?;
            state.writes_since_fsync = 0;
        }

        state.next_sequence = sequence + 1;
        state.index.insert(bar.key(), bar.clone());
        Ok(())
    }

    fn get(&self, key: &BarKey) -> Result<Option<Bar>, StoreError> {
        Ok(self.lock()?.index.get(key).cloned())
    }

    fn series(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>, StoreError> {
        let state = self.lock()?;
        let (lo, hi) = series_bounds(symbol, timeframe);
        Ok(state.index.range(lo..=hi).map(|(_, bar)| bar.clone()).collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.index.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use types::bar::BarState;
    use types::tick::{CanonicalTick, TickSourceKind};

    fn bar(index: i64, price: f64) -> Bar {
        let start = index * 60_000;
        let mut bar = Bar::new("AAPL", Timeframe::M1, index, start, start + 60_000);
        bar.apply(&CanonicalTick::new(TickSourceKind::Mock, "AAPL", start, price, 5.0))
            .unwrap();
        bar.confirm().unwrap();
        bar
    }

    fn open(dir: &TempDir) -> JournalBarRepository {
        JournalBarRepository::open(JournalConfig::new(dir.path())).unwrap()
    }

    fn journal_bytes(dir: &TempDir) -> Vec<u8> {
        fs::read(dir.path().join(JOURNAL_FILE)).unwrap()
    }

    #[test]
    fn test_record_roundtrip() {
        let bytes = encode_record(42, b"payload");
        let (sequence, payload, consumed) = match decode_record(&bytes) {
            Ok(r) => r,
            Err(_) => panic!("record should decode"),
        };
        assert_eq!(sequence, 42);
        assert_eq!(payload, b"payload");
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_reopen_restores_index() {
        let dir = TempDir::new().unwrap();
        {
            let repo = open(&dir);
            for i in 0..5 {
                repo.put(&bar(i, 100.0 + i as f64)).unwrap();
            }
        }
        let repo = open(&dir);
        assert_eq!(repo.len().unwrap(), 5);
        let restored = repo.get(&BarKey::new("AAPL", Timeframe::M1, 3)).unwrap().unwrap();
        assert_eq!(restored.hash(), bar(3, 103.0).hash());
    }

    #[test]
    fn test_latest_record_wins() {
        let dir = TempDir::new().unwrap();
        {
            let repo = open(&dir);
            let mut b = bar(1, 10.0);
            repo.put(&b).unwrap();
            b.to_historical().unwrap();
            repo.put(&b).unwrap();
        }
        let repo = open(&dir);
        let b = repo.get(&BarKey::new("AAPL", Timeframe::M1, 1)).unwrap().unwrap();
        assert_eq!(b.state(), BarState::Historical);
        assert_eq!(repo.len().unwrap(), 1);
    }

    #[test]
    fn test_torn_tail_truncated() {
        let dir = TempDir::new().unwrap();
        {
            let repo = open(&dir);
            repo.put(&bar(1, 10.0)).unwrap();
            repo.put(&bar(2, 11.0)).unwrap();
        }
        let good_len = journal_bytes(&dir).len();
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join(JOURNAL_FILE))
                .unwrap();
            // half a record: length prefix plus a few bytes
            file.write_all(&[64, 0, 0, 0, 1, 2, 3]).unwrap();
        }

        let repo = open(&dir);
        assert_eq!(repo.len().unwrap(), 2);
        assert_eq!(journal_bytes(&dir).len(), good_len);

        // appends continue cleanly after truncation
        repo.put(&bar(3, 12.0)).unwrap();
        drop(repo);
        assert_eq!(open(&dir).len().unwrap(), 3);
    }

    #[test]
    fn test_bad_checksum_on_last_record_is_torn() {
        let dir = TempDir::new().unwrap();
        {
            let repo = open(&dir);
            repo.put(&bar(1, 10.0)).unwrap();
            repo.put(&bar(2, 11.0)).unwrap();
        }
        let mut bytes = journal_bytes(&dir);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(dir.path().join(JOURNAL_FILE), &bytes).unwrap();

        let repo = open(&dir);
        assert_eq!(repo.len().unwrap(), 1);
    }

    #[test]
    fn test_corruption_before_tail_is_error() {
        let dir = TempDir::new().unwrap();
        {
            let repo = open(&dir);
            repo.put(&bar(1, 10.0)).unwrap();
            repo.put(&bar(2, 11.0)).unwrap();
        }
        let mut bytes = journal_bytes(&dir);
        bytes[16] ^= 0xFF; // first payload byte of the first record
        fs::write(dir.path().join(JOURNAL_FILE), &bytes).unwrap();

        match JournalBarRepository::open(JournalConfig::new(dir.path())) {
            Err(StoreError::Corrupt { offset, .. }) => assert_eq!(offset, 0),
            Err(other) => panic!("expected Corrupt, got {other:?}"),
            Ok(_) => panic!("expected Corrupt, got Ok"),
        }
    }

    #[test]
    fn test_compact_keeps_latest_state() {
        let dir = TempDir::new().unwrap();
        let repo = JournalBarRepository::open(
            JournalConfig::new(dir.path()).with_fsync_policy(FsyncPolicy::Never),
        )
        .unwrap();
        for i in 0..4 {
            let mut b = bar(i, 10.0);
            repo.put(&b).unwrap();
            b.to_historical().unwrap();
            repo.put(&b).unwrap();
        }
        let before = journal_bytes(&dir).len();
        assert_eq!(repo.compact().unwrap(), 4);
        assert!(journal_bytes(&dir).len() < before);

        repo.put(&bar(9, 1.0)).unwrap();
        drop(repo);

        let repo = open(&dir);
        assert_eq!(repo.len().unwrap(), 5);
        let states: Vec<BarState> = repo
            .series("AAPL", Timeframe::M1)
            .unwrap()
            .iter()
            .map(Bar::state)
            .collect();
        assert_eq!(states[..4], [BarState::Historical; 4]);
    }
}
