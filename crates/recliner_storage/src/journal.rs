//! Append-only journal of checksummed CBOR frames.
//!
//! ```text
//! +----------+----------+----------------------+
//! | len: u32 | crc: u32 | payload (len bytes)  |
//! +----------+----------+----------------------+
//! ```
//!
//! Both header fields are little-endian; `crc` is the IEEE CRC32 of the
//! payload. A frame cut short by a crash, or whose checksum does not
//! match, ends the journal: replay truncates the file there.

use crate::batch::WriteBatch;
use crate::error::{StorageError, StorageResult};
use crate::schema::SchemaChange;
use recliner_codec::{from_cbor, to_cbor};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_SIZE: usize = 8;

/// One durable journal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum JournalEntry {
    /// A schema upgrade that produced `version`.
    Schema {
        version: u64,
        changes: Vec<SchemaChange>,
    },
    /// A committed write batch.
    Batch(WriteBatch),
}

/// Computes the IEEE CRC32 of `data`.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

fn encode_frame(entry: &JournalEntry) -> StorageResult<Vec<u8>> {
    let payload = to_cbor(entry)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StorageError::Corrupted("journal frame exceeds 4 GiB".into()))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc32(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// An open journal file.
#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    sync_on_commit: bool,
}

impl Journal {
    /// Opens (creating if needed) and replays the journal at `path`.
    ///
    /// Returns the journal positioned for appends and every intact entry.
    pub(crate) fn open(
        path: &Path,
        sync_on_commit: bool,
    ) -> StorageResult<(Self, Vec<JournalEntry>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut entries = Vec::new();
        let mut offset = 0usize;
        while offset < bytes.len() {
            match Self::read_frame(&bytes[offset..]) {
                Some((entry, used)) => {
                    entries.push(entry);
                    offset += used;
                }
                None => {
                    tracing::warn!(
                        path = %path.display(),
                        offset,
                        discarded = bytes.len() - offset,
                        "truncating torn journal tail"
                    );
                    file.set_len(offset as u64)?;
                    file.sync_all()?;
                    break;
                }
            }
        }
        file.seek(SeekFrom::End(0))?;

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                sync_on_commit,
            },
            entries,
        ))
    }

    fn read_frame(bytes: &[u8]) -> Option<(JournalEntry, usize)> {
        let header = bytes.get(..HEADER_SIZE)?;
        let len = u32::from_le_bytes(header[0..4].try_into().ok()?) as usize;
        let crc = u32::from_le_bytes(header[4..8].try_into().ok()?);
        let payload = bytes.get(HEADER_SIZE..HEADER_SIZE + len)?;
        if crc32(payload) != crc {
            return None;
        }
        let entry = from_cbor(payload).ok()?;
        Some((entry, HEADER_SIZE + len))
    }

    /// Appends one entry and makes it durable according to the sync policy.
    pub(crate) fn append(&mut self, entry: &JournalEntry) -> StorageResult<()> {
        let frame = encode_frame(entry)?;
        self.file.write_all(&frame)?;
        self.file.flush()?;
        if self.sync_on_commit {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Atomically replaces the journal with `entries`.
    pub(crate) fn rewrite(&mut self, entries: &[JournalEntry]) -> StorageResult<()> {
        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            for entry in entries {
                tmp.write_all(&encode_frame(entry)?)?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        Ok(())
    }

    /// Returns the journal's size in bytes.
    pub(crate) fn size(&self) -> StorageResult<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StoreSpec;
    use recliner_codec::value;
    use tempfile::tempdir;

    #[test]
    fn crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    fn sample_batch() -> JournalEntry {
        let mut batch = WriteBatch::new();
        batch.put("docs", value!({"_id": "a", "n": 1}));
        JournalEntry::Batch(batch)
    }

    #[test]
    fn append_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.journal");
        let schema = JournalEntry::Schema {
            version: 1,
            changes: vec![SchemaChange::CreateStore(StoreSpec::new("docs", "_id"))],
        };
        {
            let (mut journal, entries) = Journal::open(&path, false).unwrap();
            assert!(entries.is_empty());
            journal.append(&schema).unwrap();
            journal.append(&sample_batch()).unwrap();
        }
        let (_, entries) = Journal::open(&path, false).unwrap();
        assert_eq!(entries, vec![schema, sample_batch()]);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.journal");
        {
            let (mut journal, _) = Journal::open(&path, false).unwrap();
            journal.append(&sample_batch()).unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[42, 0, 0, 0, 1, 2]).unwrap();
        }
        let (journal, entries) = Journal::open(&path, false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(journal.size().unwrap(), good_len);
    }

    #[test]
    fn corrupted_frame_stops_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.journal");
        {
            let (mut journal, _) = Journal::open(&path, false).unwrap();
            journal.append(&sample_batch()).unwrap();
            journal.append(&sample_batch()).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        let (_, entries) = Journal::open(&path, false).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.journal");
        let (mut journal, _) = Journal::open(&path, false).unwrap();
        for _ in 0..5 {
            journal.append(&sample_batch()).unwrap();
        }
        let before = journal.size().unwrap();
        journal.rewrite(&[sample_batch()]).unwrap();
        assert!(journal.size().unwrap() < before);
        journal.append(&sample_batch()).unwrap();
        drop(journal);
        let (_, entries) = Journal::open(&path, false).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
