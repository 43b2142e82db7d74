use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use objreg_types::{Sequence, StorageKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::record::Record;

/// One entry in the repository log.
///
/// On-disk format of each frame:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized LogEntry)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    /// A new latest version of a key.
    Put(Record),
    /// Removal of a key's live record.
    Delete { key: StorageKey },
    /// Lowest value the sequence counter may resume from. Written by
    /// compaction so that sequences of deleted keys are never reissued.
    Watermark { sequence: Sequence },
}

/// Flush/sync strategy for the log.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Header size: 4 bytes length + 4 bytes CRC.
pub const HEADER_SIZE: usize = 8;

/// Serialize an entry into a complete frame.
pub fn encode_frame(entry: &LogEntry) -> StoreResult<Vec<u8>> {
    let payload =
        bincode::serialize(entry).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| StoreError::Serialization(format!("entry too large: {} bytes", payload.len())))?;
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Appending writer over the log file.
pub(crate) struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    sync_mode: SyncMode,
}

impl LogWriter {
    pub(crate) fn open(path: &Path, sync_mode: SyncMode) -> StoreResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::with_file(path, file, sync_mode)
    }

    /// Wrap an append-mode handle to the file that is (or will be) at `path`.
    pub(crate) fn with_file(path: &Path, file: File, sync_mode: SyncMode) -> StoreResult<Self> {
        let offset = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            offset,
            sync_mode,
        })
    }

    /// Append one entry. Returns the byte offset the frame starts at.
    ///
    /// A failed append truncates the file back to the previous offset so a
    /// partial frame never precedes later entries.
    pub(crate) fn append(&mut self, entry: &LogEntry) -> StoreResult<u64> {
        let frame = encode_frame(entry)?;
        let entry_offset = self.offset;

        if let Err(e) = self.write_frame(&frame) {
            warn!(offset = entry_offset, error = %e, "log append failed; rolling back");
            self.reset_to(entry_offset)?;
            return Err(e.into());
        }

        self.offset += frame.len() as u64;
        debug!(offset = entry_offset, len = frame.len(), "log append");
        Ok(entry_offset)
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.writer.write_all(frame)?;
        self.writer.flush()?;
        if self.sync_mode == SyncMode::EveryWrite {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    fn reset_to(&mut self, offset: u64) -> StoreResult<()> {
        let fresh = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(fresh));
        // Drop the half-written frame still in the buffer; flushing it would
        // land after the truncation below.
        let (_file, _unflushed) = stale.into_parts();
        OpenOptions::new().write(true).open(&self.path)?.set_len(offset)?;
        self.offset = offset;
        Ok(())
    }
}

/// Result of reading a log front to back.
#[derive(Debug, Default)]
pub struct Replay {
    /// Valid entries with the byte offset of their frame.
    pub entries: Vec<(u64, LogEntry)>,
    /// Length of the prefix of the file made of valid frames. Everything
    /// after it is damaged tail.
    pub valid_len: u64,
    /// Damaged frames found in the tail.
    pub skipped: usize,
}

/// Read every valid entry from the log at `path`.
///
/// Damage is only recoverable at the tail: a truncated frame, or frames that
/// fail the CRC check or do not deserialize with no valid frame after them.
/// `valid_len` then points at the first damaged frame. A damaged frame
/// followed by a valid one is [`StoreError::Corrupt`], since dropping it
/// would silently lose a committed write.
pub fn replay(path: &Path) -> StoreResult<Replay> {
    let mut file = BufReader::new(File::open(path)?);
    let file_len = file.get_ref().metadata()?.len();
    let mut replay = Replay::default();
    let mut offset: u64 = 0;
    // First damaged frame and why, while looking for valid frames after it.
    let mut damaged: Option<(u64, String)> = None;

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header = [0u8; HEADER_SIZE];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
            warn!(offset, length, file_len, "invalid log frame length; stopping replay");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        match file.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(offset, "truncated log frame; stopping replay");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let frame_end = offset + HEADER_SIZE as u64 + length as u64;
        let actual_crc = crc32fast::hash(&payload);
        let decoded = if actual_crc != expected_crc {
            Err(format!("CRC mismatch: expected {expected_crc:#010x}, found {actual_crc:#010x}"))
        } else {
            bincode::deserialize::<LogEntry>(&payload).map_err(|e| e.to_string())
        };

        match decoded {
            Ok(entry) => {
                if let Some((bad_offset, reason)) = damaged.take() {
                    return Err(StoreError::Corrupt {
                        path: path.to_path_buf(),
                        offset: bad_offset,
                        reason: format!("{reason}; valid frame follows at offset {offset}"),
                    });
                }
                replay.entries.push((offset, entry));
                replay.valid_len = frame_end;
            }
            Err(reason) => {
                warn!(offset, %reason, "damaged log frame");
                replay.skipped += 1;
                damaged.get_or_insert((offset, reason));
            }
        }

        offset = frame_end;
    }

    debug!(entries = replay.entries.len(), skipped = replay.skipped, "log replay complete");
    Ok(replay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    fn put(name: &str, seq: u64) -> LogEntry {
        LogEntry::Put(Record::new(
            StorageKey::new("default", "pod", name),
            Sequence::new(seq),
            format!("{{\"n\":{seq}}}").into_bytes(),
        ))
    }

    fn temp_log() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objreg.log");
        (dir, path)
    }

    #[test]
    fn append_and_replay_roundtrip() {
        let (_dir, path) = temp_log();
        let mut writer = LogWriter::open(&path, SyncMode::default()).unwrap();
        let entries = vec![
            put("a", 1),
            LogEntry::Delete { key: StorageKey::new("default", "pod", "a") },
            LogEntry::Watermark { sequence: Sequence::new(1) },
        ];
        for entry in &entries {
            writer.append(entry).unwrap();
        }

        let replay = replay(&path).unwrap();
        let recovered: Vec<LogEntry> = replay.entries.into_iter().map(|(_, e)| e).collect();
        assert_eq!(recovered, entries);
        assert_eq!(replay.valid_len, writer.offset());
        assert_eq!(replay.skipped, 0);
    }

    #[test]
    fn replay_empty_log() {
        let (_dir, path) = temp_log();
        LogWriter::open(&path, SyncMode::default()).unwrap();
        let replay = replay(&path).unwrap();
        assert!(replay.entries.is_empty());
        assert_eq!(replay.valid_len, 0);
    }

    #[test]
    fn append_returns_increasing_offsets() {
        let (_dir, path) = temp_log();
        let mut writer = LogWriter::open(&path, SyncMode::EveryWrite).unwrap();
        let off1 = writer.append(&put("a", 1)).unwrap();
        let off2 = writer.append(&put("b", 2)).unwrap();
        assert_eq!(off1, 0);
        assert!(off2 > off1);
    }

    #[test]
    fn reopen_continues_at_end() {
        let (_dir, path) = temp_log();
        let end = {
            let mut writer = LogWriter::open(&path, SyncMode::default()).unwrap();
            writer.append(&put("a", 1)).unwrap();
            writer.offset()
        };
        let mut writer = LogWriter::open(&path, SyncMode::default()).unwrap();
        assert_eq!(writer.offset(), end);
        assert_eq!(writer.append(&put("b", 2)).unwrap(), end);
        assert_eq!(replay(&path).unwrap().entries.len(), 2);
    }

    fn flip_byte(path: &Path, at: u64) {
        let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(at)).unwrap();
        let mut buf = [0u8; 1];
        file.read_exact(&mut buf).unwrap();
        buf[0] ^= 0xFF;
        file.seek(SeekFrom::Start(at)).unwrap();
        file.write_all(&buf).unwrap();
        file.sync_all().unwrap();
    }

    #[test]
    fn damaged_frame_before_valid_one_is_corrupt() {
        let (_dir, path) = temp_log();
        {
            let mut writer = LogWriter::open(&path, SyncMode::default()).unwrap();
            writer.append(&put("a", 1)).unwrap();
            writer.append(&put("b", 2)).unwrap();
        }
        flip_byte(&path, HEADER_SIZE as u64);

        match replay(&path) {
            Err(StoreError::Corrupt { offset, .. }) => assert_eq!(offset, 0),
            other => panic!("expected corrupt log, got {other:?}"),
        }
    }

    #[test]
    fn damaged_last_frame_is_tail() {
        let (_dir, path) = temp_log();
        let second = {
            let mut writer = LogWriter::open(&path, SyncMode::default()).unwrap();
            writer.append(&put("a", 1)).unwrap();
            writer.append(&put("b", 2)).unwrap()
        };
        flip_byte(&path, second + HEADER_SIZE as u64);

        let replay = replay(&path).unwrap();
        assert_eq!(replay.skipped, 1);
        assert_eq!(replay.entries.len(), 1);
        assert_eq!(replay.entries[0].1, put("a", 1));
        assert_eq!(replay.valid_len, second);
    }

    #[test]
    fn several_damaged_frames_at_tail_are_all_dropped() {
        let (_dir, path) = temp_log();
        let (second, third) = {
            let mut writer = LogWriter::open(&path, SyncMode::default()).unwrap();
            writer.append(&put("a", 1)).unwrap();
            let second = writer.append(&put("b", 2)).unwrap();
            let third = writer.append(&put("c", 3)).unwrap();
            (second, third)
        };
        flip_byte(&path, second + HEADER_SIZE as u64);
        flip_byte(&path, third + HEADER_SIZE as u64);

        let replay = replay(&path).unwrap();
        assert_eq!(replay.skipped, 2);
        assert_eq!(replay.entries.len(), 1);
        assert_eq!(replay.valid_len, second);
    }

    #[test]
    fn truncated_tail_stops_replay() {
        let (_dir, path) = temp_log();
        let (first_end, total) = {
            let mut writer = LogWriter::open(&path, SyncMode::default()).unwrap();
            writer.append(&put("a", 1)).unwrap();
            let first_end = writer.offset();
            writer.append(&put("b", 2)).unwrap();
            (first_end, writer.offset())
        };
        {
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.set_len(total - 3).unwrap();
        }

        let replay = replay(&path).unwrap();
        assert_eq!(replay.entries.len(), 1);
        assert_eq!(replay.valid_len, first_end);
    }

    #[test]
    fn rollback_discards_buffered_bytes() {
        let (_dir, path) = temp_log();
        let mut writer = LogWriter::open(&path, SyncMode::default()).unwrap();
        writer.append(&put("a", 1)).unwrap();
        let end = writer.offset();

        // Half a frame sits in the buffer, as after a failed write.
        let frame = encode_frame(&put("b", 2)).unwrap();
        writer.writer.write_all(&frame[..5]).unwrap();
        writer.reset_to(end).unwrap();
        drop(writer);

        assert_eq!(std::fs::metadata(&path).unwrap().len(), end);
        let replay = replay(&path).unwrap();
        assert_eq!(replay.entries.len(), 1);
        assert_eq!(replay.skipped, 0);
    }

    #[test]
    fn frame_layout() {
        let frame = encode_frame(&put("a", 1)).unwrap();
        let length = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let crc = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        assert_eq!(frame.len(), HEADER_SIZE + length);
        assert_eq!(crc, crc32fast::hash(&frame[HEADER_SIZE..]));
    }
}
