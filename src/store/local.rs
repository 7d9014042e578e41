//! Local file store: one append-only file of CRC-checked JSON lines
//!
//! Line format: `<crc32 as 8 hex digits> <json row>\n`. Rows are staged in
//! memory and written in one `write_all` + `sync_all` on commit. A commit
//! that fails part way truncates the file back to its last committed length.

use super::{PubRow, Row, Staging, Store, StoreError, ValueRow};
use crate::pubs::{Pub, ValueSnapshot};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct LocalFileStore {
    path: PathBuf,
    file: File,
    /// Length of the file up to the last successful commit
    committed_len: u64,
    staging: Staging,
    commits: u64,
}

impl std::fmt::Debug for LocalFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileStore")
            .field("path", &self.path)
            .field("committed_len", &self.committed_len)
            .field("commits", &self.commits)
            .finish()
    }
}

impl LocalFileStore {
    /// Open or create the store at `path`. Existing rows are verified; a
    /// torn final line left by a crash is cut off.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let data = std::fs::read(&path)?;
        let (rows, good_len) = parse_rows(&data)?;
        if (good_len as usize) < data.len() {
            warn!(
                path = %path.display(),
                dropped = data.len() - good_len as usize,
                "truncating torn tail of store file"
            );
            file.set_len(good_len)?;
            file.sync_all()?;
        }

        let schema = rows.iter().filter_map(|r| match r {
            Row::Data(d) => Some(d.guid),
            _ => None,
        });
        let staging = Staging::with_persisted(schema);
        debug!(path = %path.display(), rows = rows.len(), "opened store");

        Ok(LocalFileStore {
            path,
            file,
            committed_len: good_len,
            staging,
            commits: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commits made through this handle.
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    fn write_pending(&mut self) -> Result<(), StoreError> {
        let mut out = Vec::new();
        for row in self.staging.pending()? {
            encode_line(row, &mut out)?;
        }
        if out.is_empty() {
            return Ok(());
        }
        self.file.write_all(&out)?;
        self.file
            .sync_all()
            .map_err(|e| StoreError::CommitFailed(format!("fsync: {}", e)))?;
        self.committed_len += out.len() as u64;
        Ok(())
    }
}

impl Store for LocalFileStore {
    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        self.staging.begin()
    }

    fn commit_transaction(&mut self) -> Result<(), StoreError> {
        if let Err(e) = self.write_pending() {
            if let Err(trunc) = self.file.set_len(self.committed_len) {
                warn!(error = %trunc, "could not truncate store after failed commit");
            }
            self.staging.rollback();
            return Err(e);
        }
        let rows = self.staging.finish_commit();
        self.commits += 1;
        debug!(rows = rows.len(), "committed");
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), StoreError> {
        self.staging.rollback();
        Ok(())
    }

    fn insert_pub(&mut self, pub_: &Pub) -> Result<(), StoreError> {
        self.staging.push(Row::Pub(PubRow::from_pub(pub_)))
    }

    fn insert_data_schema(&mut self, pub_: &Pub) -> Result<usize, StoreError> {
        self.staging.push_schema(pub_)
    }

    fn insert_value_snapshot(
        &mut self,
        pub_: &Pub,
        snap: &ValueSnapshot,
    ) -> Result<(), StoreError> {
        self.staging
            .push(Row::Value(ValueRow::from_snapshot(pub_.guid, snap)))
    }
}

fn encode_line(row: &Row, out: &mut Vec<u8>) -> Result<(), StoreError> {
    let json = serde_json::to_vec(row)?;
    let crc = crc32fast::hash(&json);
    out.extend_from_slice(format!("{:08x} ", crc).as_bytes());
    out.extend_from_slice(&json);
    out.push(b'\n');
    Ok(())
}

/// Parse complete lines. Returns the rows and the byte length they cover;
/// an unterminated final line is not counted.
fn parse_rows(data: &[u8]) -> Result<(Vec<Row>, u64), StoreError> {
    let mut rows = Vec::new();
    let mut pos = 0usize;
    while let Some(nl) = data[pos..].iter().position(|&b| b == b'\n') {
        let line = &data[pos..pos + nl];
        rows.push(decode_line(line, rows.len())?);
        pos += nl + 1;
    }
    Ok((rows, pos as u64))
}

fn decode_line(line: &[u8], index: usize) -> Result<Row, StoreError> {
    if line.len() < 10 || line[8] != b' ' {
        return Err(StoreError::Corruption(format!("line {} malformed", index)));
    }
    let crc_hex = std::str::from_utf8(&line[..8])
        .map_err(|_| StoreError::Corruption(format!("line {} bad checksum field", index)))?;
    let expected = u32::from_str_radix(crc_hex, 16)
        .map_err(|_| StoreError::Corruption(format!("line {} bad checksum field", index)))?;
    let json = &line[9..];
    let actual = crc32fast::hash(json);
    if actual != expected {
        return Err(StoreError::Corruption(format!(
            "line {} checksum mismatch: expected {:08x}, got {:08x}",
            index, expected, actual
        )));
    }
    serde_json::from_slice(json)
        .map_err(|e| StoreError::Corruption(format!("line {}: {}", index, e)))
}

/// Read and verify every committed row in the file at `path`.
pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<Row>, StoreError> {
    let data = std::fs::read(path)?;
    Ok(parse_rows(&data)?.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::GuidAllocator;

    fn sample() -> (Pub, ValueSnapshot) {
        let ids = GuidAllocator::new(1, 100);
        let mut p = Pub::new("T");
        p.guid = 9;
        p.pack(&ids, "x", 42).unwrap();
        let snap = ValueSnapshot::capture(&p, 0, 1).unwrap();
        (p, snap)
    }

    fn write_batch(store: &mut LocalFileStore, p: &Pub, snap: &ValueSnapshot) {
        store.begin_transaction().unwrap();
        store.insert_pub(p).unwrap();
        store.insert_data_schema(p).unwrap();
        store.insert_value_snapshot(p, snap).unwrap();
        store.commit_transaction().unwrap();
    }

    #[test]
    fn test_commit_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sos.jsonl");
        let (p, snap) = sample();

        {
            let mut store = LocalFileStore::open(&path).unwrap();
            write_batch(&mut store, &p, &snap);
            assert_eq!(store.commit_count(), 1);
        }

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(matches!(&rows[2], Row::Value(v) if v.val == "42" && v.pub_guid == 9));

        let mut store = LocalFileStore::open(&path).unwrap();
        store.begin_transaction().unwrap();
        assert_eq!(store.insert_data_schema(&p).unwrap(), 0);
        store.rollback_transaction().unwrap();
    }

    #[test]
    fn test_rollback_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sos.jsonl");
        let (p, snap) = sample();
        let mut store = LocalFileStore::open(&path).unwrap();
        store.begin_transaction().unwrap();
        store.insert_value_snapshot(&p, &snap).unwrap();
        store.rollback_transaction().unwrap();
        assert!(read_rows(&path).unwrap().is_empty());
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sos.jsonl");
        let (p, snap) = sample();
        {
            let mut store = LocalFileStore::open(&path).unwrap();
            write_batch(&mut store, &p, &snap);
        }
        let good = std::fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"0000abcd {\"table\":\"va").unwrap();
        }

        let store = LocalFileStore::open(&path).unwrap();
        assert_eq!(std::fs::metadata(store.path()).unwrap().len(), good);
        assert_eq!(read_rows(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sos.jsonl");
        let (p, snap) = sample();
        {
            let mut store = LocalFileStore::open(&path).unwrap();
            write_batch(&mut store, &p, &snap);
        }
        let mut data = std::fs::read(&path).unwrap();
        let flip = data.iter().position(|&b| b == b'T').unwrap();
        data[flip] = b'U';
        std::fs::write(&path, data).unwrap();

        assert!(matches!(
            LocalFileStore::open(&path),
            Err(StoreError::Corruption(_))
        ));
    }
}
