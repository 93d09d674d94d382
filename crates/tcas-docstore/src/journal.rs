use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DocStoreError, DocStoreResult};

/// Flush/sync strategy for the journal.
#[derive(Clone, Debug, Default)]
pub enum SyncMode {
    /// `fsync` after every append (safest, highest latency).
    #[default]
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    OsDefault,
}

/// Configuration for a [`Journal`].
#[derive(Clone, Debug, Default)]
pub struct JournalConfig {
    pub sync_mode: SyncMode,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct JournalWriter {
    file: File,
    /// Current end of valid data.
    offset: u64,
}

impl JournalWriter {
    /// Write one complete frame at the end of the file.
    ///
    /// On failure the file is cut back to `offset`, so a frame the caller saw
    /// fail can never resurface at the next replay.
    fn write_frame(&mut self, frame: &[u8], sync: bool) -> io::Result<()> {
        let written = self.file.write_all(frame).and_then(|()| {
            if sync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            self.rollback()?;
            return Err(e);
        }
        self.offset += frame.len() as u64;
        Ok(())
    }

    fn rollback(&mut self) -> io::Result<()> {
        self.file.set_len(self.offset)?;
        self.file.sync_data()
    }
}

/// Outcome of reading a journal front-to-back.
pub struct Recovered<T> {
    pub records: Vec<T>,
    /// End of the last complete entry. Anything after it is a torn tail.
    pub valid_len: u64,
}

/// Crash-recoverable append-only journal.
///
/// On-disk format, per entry:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized record)]
/// ```
///
/// Entries failing the CRC check are skipped. A truncated or zero-length
/// entry ends recovery; [`Journal::discard_tail`] drops it so later appends
/// are not hidden behind garbage.
pub struct Journal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
    config: JournalConfig,
}

impl Journal {
    /// Open (or create) a journal file at the given path.
    pub fn open(path: &Path, config: JournalConfig) -> DocStoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let (file, offset) = open_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(JournalWriter { file, offset }),
            config,
        })
    }

    /// Append one record. Returns the byte offset of the entry.
    pub fn append<T: Serialize>(&self, record: &T) -> DocStoreResult<u64> {
        let payload =
            bincode::serialize(record).map_err(|e| DocStoreError::Serialization(e.to_string()))?;
        let frame = encode_frame(&payload);

        let mut w = self.lock_writer()?;
        let entry_offset = w.offset;
        w.write_frame(&frame, matches!(self.config.sync_mode, SyncMode::EveryWrite))?;
        debug!(offset = entry_offset, len = payload.len(), "journal append");
        Ok(entry_offset)
    }

    /// Read every valid record, front-to-back.
    pub fn recover<T: DeserializeOwned>(&self) -> DocStoreResult<Recovered<T>> {
        Self::replay(&self.path)
    }

    /// Read the journal at `path` without opening it for writing.
    ///
    /// A missing file reads as empty. A torn tail is ignored, never truncated,
    /// so this is safe while another process owns the journal.
    pub fn replay<T: DeserializeOwned>(path: &Path) -> DocStoreResult<Recovered<T>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Recovered {
                    records: Vec::new(),
                    valid_len: 0,
                })
            }
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        let mut file = BufReader::new(file);
        let mut records = Vec::new();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(offset))?;

            let mut header = [0u8; HEADER_SIZE];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
                warn!(path = %path.display(), offset, length, file_len, "torn journal entry; stopping recovery");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            file.read_exact(&mut payload)?;
            let next = offset + HEADER_SIZE as u64 + length as u64;

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(
                    path = %path.display(),
                    offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "journal CRC mismatch; skipping entry"
                );
                offset = next;
                continue;
            }

            match bincode::deserialize::<T>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), offset, error = %e, "undecodable journal entry; skipping")
                }
            }
            offset = next;
        }

        debug!(path = %path.display(), recovered = records.len(), "journal recovery complete");
        Ok(Recovered {
            records,
            valid_len: offset,
        })
    }

    /// Drop everything after `valid_len` (a torn tail from a crash).
    pub fn discard_tail(&self, valid_len: u64) -> DocStoreResult<()> {
        let mut w = self.lock_writer()?;
        if valid_len >= w.offset {
            return Ok(());
        }
        w.file.set_len(valid_len)?;
        w.file.sync_all()?;
        warn!(path = %self.path.display(), dropped = w.offset - valid_len, "discarded torn journal tail");
        w.offset = valid_len;
        Ok(())
    }

    /// Atomically replace the journal content with `records`.
    ///
    /// The new journal is written to a sibling file, synced, then renamed over
    /// the old one, so a crash leaves either the old or the new journal.
    pub fn rewrite<T: Serialize>(&self, records: &[T]) -> DocStoreResult<()> {
        let mut w = self.lock_writer()?;
        let tmp_path = self.path.with_extension("compact");
        {
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            for record in records {
                let payload = bincode::serialize(record)
                    .map_err(|e| DocStoreError::Serialization(e.to_string()))?;
                out.write_all(&encode_frame(&payload))?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            // Persist the rename itself.
            File::open(parent)?.sync_all()?;
        }

        let (file, offset) = open_append(&self.path)?;
        w.file = file;
        w.offset = offset;
        debug!(path = %self.path.display(), records = records.len(), "journal rewritten");
        Ok(())
    }

    /// Current write offset (journal length in bytes).
    pub fn offset(&self) -> DocStoreResult<u64> {
        Ok(self.lock_writer()?.offset)
    }

    /// Path to the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_writer(&self) -> DocStoreResult<std::sync::MutexGuard<'_, JournalWriter>> {
        self.writer
            .lock()
            .map_err(|_| DocStoreError::LockPoisoned(self.path.display().to_string()))
    }
}

fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    let offset = file.metadata()?.len();
    Ok((file, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Rec {
        seq: u32,
        name: String,
    }

    fn rec(seq: u32) -> Rec {
        Rec {
            seq,
            name: format!("record-{seq}"),
        }
    }

    #[test]
    fn append_and_recover_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(&dir.path().join("a.journal"), JournalConfig::default()).unwrap();

        journal.append(&rec(1)).unwrap();
        journal.append(&rec(2)).unwrap();
        journal.append(&rec(3)).unwrap();

        let recovered = journal.recover::<Rec>().unwrap();
        assert_eq!(recovered.records, vec![rec(1), rec(2), rec(3)]);
        assert_eq!(recovered.valid_len, journal.offset().unwrap());
    }

    #[test]
    fn replay_reads_without_a_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.journal");
        assert!(Journal::replay::<Rec>(&path).unwrap().records.is_empty());
        assert!(!path.exists());

        let journal = Journal::open(&path, JournalConfig::default()).unwrap();
        journal.append(&rec(1)).unwrap();
        journal.append(&rec(2)).unwrap();
        let total = journal.offset().unwrap();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(total - 3).unwrap();

        let replayed = Journal::replay::<Rec>(&path).unwrap();
        assert_eq!(replayed.records, vec![rec(1)]);
        // The torn tail belongs to the owner; replay leaves it alone.
        assert_eq!(fs::metadata(&path).unwrap().len(), total - 3);
    }

    #[test]
    fn recover_empty_journal() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(&dir.path().join("empty.journal"), JournalConfig::default()).unwrap();
        let recovered = journal.recover::<Rec>().unwrap();
        assert!(recovered.records.is_empty());
        assert_eq!(recovered.valid_len, 0);
    }

    #[test]
    fn crc_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.journal");
        let journal = Journal::open(&path, JournalConfig::default()).unwrap();
        journal.append(&rec(1)).unwrap();
        journal.append(&rec(2)).unwrap();
        drop(journal);

        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            file.write_all(&buf).unwrap();
            file.sync_all().unwrap();
        }

        let journal = Journal::open(&path, JournalConfig::default()).unwrap();
        let recovered = journal.recover::<Rec>().unwrap();
        assert_eq!(recovered.records, vec![rec(2)]);
    }

    #[test]
    fn torn_tail_is_discarded_before_new_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.journal");
        let journal = Journal::open(&path, JournalConfig::default()).unwrap();
        journal.append(&rec(1)).unwrap();
        journal.append(&rec(2)).unwrap();
        let total = journal.offset().unwrap();
        drop(journal);

        OpenOptions::new().write(true).open(&path).unwrap().set_len(total - 3).unwrap();

        let journal = Journal::open(&path, JournalConfig::default()).unwrap();
        let recovered = journal.recover::<Rec>().unwrap();
        assert_eq!(recovered.records, vec![rec(1)]);

        journal.discard_tail(recovered.valid_len).unwrap();
        journal.append(&rec(3)).unwrap();

        let recovered = journal.recover::<Rec>().unwrap();
        assert_eq!(recovered.records, vec![rec(1), rec(3)]);
    }

    #[test]
    fn rewrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(&dir.path().join("rw.journal"), JournalConfig::default()).unwrap();
        for i in 0..10 {
            journal.append(&rec(i)).unwrap();
        }
        let before = journal.offset().unwrap();

        journal.rewrite(&[rec(9)]).unwrap();
        assert!(journal.offset().unwrap() < before);

        journal.append(&rec(10)).unwrap();
        let recovered = journal.recover::<Rec>().unwrap();
        assert_eq!(recovered.records, vec![rec(9), rec(10)]);
    }

    #[test]
    fn rollback_drops_a_partially_written_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.journal");
        let journal = Journal::open(&path, JournalConfig::default()).unwrap();
        journal.append(&rec(1)).unwrap();
        let committed = journal.offset().unwrap();

        {
            // A write that died halfway through the frame of rec(2).
            let mut w = journal.lock_writer().unwrap();
            let frame = encode_frame(&bincode::serialize(&rec(2)).unwrap());
            w.file.write_all(&frame[..frame.len() - 2]).unwrap();
            w.rollback().unwrap();
        }
        assert_eq!(fs::metadata(&path).unwrap().len(), committed);

        journal.append(&rec(3)).unwrap();
        let recovered = journal.recover::<Rec>().unwrap();
        assert_eq!(recovered.records, vec![rec(1), rec(3)]);
        assert_eq!(recovered.valid_len, journal.offset().unwrap());
    }

    #[test]
    fn failed_write_leaves_offset_and_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.journal");
        let journal = Journal::open(&path, JournalConfig::default()).unwrap();
        journal.append(&rec(1)).unwrap();
        let committed = journal.offset().unwrap();

        {
            // Swap in a read-only handle so the write itself fails.
            let mut w = journal.lock_writer().unwrap();
            w.file = File::open(&path).unwrap();
            let frame = encode_frame(&bincode::serialize(&rec(2)).unwrap());
            assert!(w.write_frame(&frame, true).is_err());
            assert_eq!(w.offset, committed);
            w.file = open_append(&path).unwrap().0;
        }

        journal.append(&rec(3)).unwrap();
        let recovered = journal.recover::<Rec>().unwrap();
        assert_eq!(recovered.records, vec![rec(1), rec(3)]);
    }

    #[test]
    fn append_returns_increasing_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(
            &dir.path().join("offsets.journal"),
            JournalConfig {
                sync_mode: SyncMode::OsDefault,
            },
        )
        .unwrap();

        let off1 = journal.append(&rec(1)).unwrap();
        let off2 = journal.append(&rec(2)).unwrap();
        assert_eq!(off1, 0);
        assert!(off2 > off1);
    }
}
