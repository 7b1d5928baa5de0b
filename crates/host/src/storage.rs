//! Local SQLite database
//!
//! Three tables back the node:
//! - `blocks`: one row per produced block, pruned once anchored on chain
//! - `tx_pool`: signed transactions waiting for a block
//! - `settings`: key/value pairs, including the sequence counters
//!
//! The connection sits behind a mutex and every write runs in its own
//! transaction, so readers never see half-written rows.

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use purchase_core::{BlockHeight, BlockRecord, Hash, Sequence};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StorageError;

/// Settings key of the last sequence admitted into the pool
pub const LAST_RECEIVED_KEY: &str = "last_receive_sequence";

/// Settings key of the last sequence handed out by the allocator
pub const LAST_ISSUED_KEY: &str = "last_issued_sequence";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS blocks (
        height      INTEGER PRIMARY KEY,
        cur_block   TEXT NOT NULL,
        prev_block  TEXT NOT NULL,
        merkle_root TEXT NOT NULL,
        timestamp   INTEGER NOT NULL,
        blob_id     TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS tx_pool (
        hash     TEXT PRIMARY KEY,
        sequence INTEGER NOT NULL,
        contents TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS tx_pool_sequence ON tx_pool (sequence);
    CREATE TABLE IF NOT EXISTS settings (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );";

/// A pooled transaction row, contents kept as serialized JSON
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolRow {
    pub hash: Hash,
    pub sequence: Sequence,
    pub contents: String,
}

#[derive(Debug)]
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open (or create) the database at `path`; `:memory:` opens a private in-memory database.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            let conn = Connection::open(path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
            conn
        };
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path, "Database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    // ---- blocks ----

    /// Insert a block row. Fails on an empty blob id or an already stored height.
    pub fn insert_block(&self, record: &BlockRecord) -> Result<(), StorageError> {
        if record.blob_id.is_empty() {
            return Err(StorageError::EmptyBlobId);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM blocks WHERE height = ?1",
                params![to_sql(record.height)?],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            return Err(StorageError::DuplicateHeight(record.height));
        }
        tx.execute(
            "INSERT INTO blocks (height, cur_block, prev_block, merkle_root, timestamp, blob_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                to_sql(record.height)?,
                record.cur_block.to_string(),
                record.prev_block.to_string(),
                record.merkle_root.to_string(),
                to_sql(record.timestamp)?,
                record.blob_id,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Delete every block row with `height <= up_to`, returning the number removed
    pub fn delete_blocks_up_to(&self, up_to: BlockHeight) -> Result<usize, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM blocks WHERE height <= ?1",
            params![to_sql(up_to.min(i64::MAX as u64))?],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    pub fn block_by_height(&self, height: BlockHeight) -> Result<Option<BlockRecord>, StorageError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT height, cur_block, prev_block, merkle_root, timestamp, blob_id
                 FROM blocks WHERE height = ?1",
                params![to_sql(height)?],
                read_block_row,
            )
            .optional()?;
        row.map(BlockRow::into_record).transpose()
    }

    /// Highest stored height, `None` when the table is empty
    pub fn last_height(&self) -> Result<Option<BlockHeight>, StorageError> {
        let conn = self.conn()?;
        let height: Option<i64> =
            conn.query_row("SELECT MAX(height) FROM blocks", [], |row| row.get(0))?;
        height.map(from_sql).transpose()
    }

    pub fn block_count(&self) -> Result<u64, StorageError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
        from_sql(count)
    }

    pub fn clear_blocks(&self) -> Result<(), StorageError> {
        self.conn()?.execute("DELETE FROM blocks", [])?;
        Ok(())
    }

    // ---- transaction pool ----

    /// Insert or replace pool rows, all in one transaction
    pub fn pool_upsert(&self, rows: &[PoolRow]) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO tx_pool (hash, sequence, contents) VALUES (?1, ?2, ?3)",
            )?;
            for row in rows {
                stmt.execute(params![row.hash.to_string(), to_sql(row.sequence)?, row.contents])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert a pool row only if it carries the sequence right after the last
    /// admitted one, advancing the received counter in the same transaction.
    pub fn pool_admit(&self, row: &PoolRow) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let expected = read_counter(&tx, LAST_RECEIVED_KEY)?.map_or(0, |last| last + 1);
        if row.sequence != expected {
            return Err(StorageError::SequenceMismatch {
                expected,
                got: row.sequence,
            });
        }
        tx.execute(
            "INSERT OR REPLACE INTO tx_pool (hash, sequence, contents) VALUES (?1, ?2, ?3)",
            params![row.hash.to_string(), to_sql(row.sequence)?, row.contents],
        )?;
        write_counter(&tx, LAST_RECEIVED_KEY, row.sequence)?;
        tx.commit()?;
        Ok(())
    }

    pub fn pool_delete(&self, hashes: &[Hash]) -> Result<usize, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM tx_pool WHERE hash = ?1")?;
            for hash in hashes {
                removed += stmt.execute(params![hash.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Up to `limit` rows in ascending sequence order
    pub fn pool_select(&self, limit: usize) -> Result<Vec<PoolRow>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT hash, sequence, contents FROM tx_pool ORDER BY sequence ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![to_sql(limit as u64)?], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (hash, sequence, contents) = row?;
            result.push(PoolRow {
                hash: parse_hash(&hash)?,
                sequence: from_sql(sequence)?,
                contents,
            });
        }
        Ok(result)
    }

    pub fn pool_count(&self) -> Result<u64, StorageError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tx_pool", [], |row| row.get(0))?;
        from_sql(count)
    }

    pub fn pool_clear(&self) -> Result<(), StorageError> {
        self.conn()?.execute("DELETE FROM tx_pool", [])?;
        Ok(())
    }

    // ---- settings ----

    /// Reserve the next sequence number and return it.
    ///
    /// Continues after whichever is higher of the last issued and the last
    /// admitted sequence, so a reservation never repeats an admitted value.
    pub fn next_sequence(&self) -> Result<Sequence, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let issued = read_counter(&tx, LAST_ISSUED_KEY)?;
        let received = read_counter(&tx, LAST_RECEIVED_KEY)?;
        let next = issued.max(received).map_or(0, |last| last + 1);
        write_counter(&tx, LAST_ISSUED_KEY, next)?;
        tx.commit()?;
        Ok(next)
    }

    /// Last reserved sequence, `None` before the first reservation
    pub fn last_issued_sequence(&self) -> Result<Option<Sequence>, StorageError> {
        read_counter(&*self.conn()?, LAST_ISSUED_KEY)
    }

    /// Last admitted sequence, `None` before the first admission
    pub fn last_received_sequence(&self) -> Result<Option<Sequence>, StorageError> {
        read_counter(&*self.conn()?, LAST_RECEIVED_KEY)
    }
}

/// Sequence counters are stored as text and start at -1, read as `None`
fn read_counter(conn: &Connection, key: &str) -> Result<Option<Sequence>, StorageError> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?;
    let Some(value) = value else {
        return Ok(None);
    };
    let value: i64 = value
        .trim()
        .parse()
        .map_err(|_| StorageError::Corrupt(format!("{key}={value}")))?;
    if value < 0 {
        Ok(None)
    } else {
        from_sql(value).map(Some)
    }
}

fn write_counter(conn: &Connection, key: &str, value: Sequence) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, to_sql(value)?.to_string()],
    )?;
    Ok(())
}

struct BlockRow {
    height: i64,
    cur_block: String,
    prev_block: String,
    merkle_root: String,
    timestamp: i64,
    blob_id: String,
}

impl BlockRow {
    fn into_record(self) -> Result<BlockRecord, StorageError> {
        Ok(BlockRecord {
            height: from_sql(self.height)?,
            cur_block: parse_hash(&self.cur_block)?,
            prev_block: parse_hash(&self.prev_block)?,
            merkle_root: parse_hash(&self.merkle_root)?,
            timestamp: from_sql(self.timestamp)?,
            blob_id: self.blob_id,
        })
    }
}

fn read_block_row(row: &Row<'_>) -> rusqlite::Result<BlockRow> {
    Ok(BlockRow {
        height: row.get(0)?,
        cur_block: row.get(1)?,
        prev_block: row.get(2)?,
        merkle_root: row.get(3)?,
        timestamp: row.get(4)?,
        blob_id: row.get(5)?,
    })
}

fn to_sql(value: u64) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::Corrupt(format!("{value} exceeds INTEGER range")))
}

fn from_sql(value: i64) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::Corrupt(format!("negative value {value}")))
}

fn parse_hash(value: &str) -> Result<Hash, StorageError> {
    Hash::from_str(value).map_err(|_| StorageError::Corrupt(format!("bad hash {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(height: BlockHeight) -> BlockRecord {
        BlockRecord {
            height,
            cur_block: Hash::repeat_byte(height as u8),
            prev_block: Hash::repeat_byte(height.saturating_sub(1) as u8),
            merkle_root: Hash::repeat_byte(0xee),
            timestamp: 1_700_000_000 + height,
            blob_id: format!("blob-{height}"),
        }
    }

    #[test]
    fn test_block_rows() {
        let storage = Storage::in_memory().unwrap();
        assert_eq!(storage.last_height().unwrap(), None);

        for h in 1..=3 {
            storage.insert_block(&record(h)).unwrap();
        }
        assert_eq!(storage.last_height().unwrap(), Some(3));
        assert_eq!(storage.block_by_height(2).unwrap(), Some(record(2)));
        assert_eq!(storage.block_by_height(9).unwrap(), None);
    }

    #[test]
    fn test_insert_rejects_duplicates_and_empty_blob() {
        let storage = Storage::in_memory().unwrap();
        storage.insert_block(&record(1)).unwrap();
        assert!(matches!(
            storage.insert_block(&record(1)),
            Err(StorageError::DuplicateHeight(1))
        ));

        let mut empty = record(2);
        empty.blob_id.clear();
        assert!(matches!(storage.insert_block(&empty), Err(StorageError::EmptyBlobId)));
        assert_eq!(storage.block_count().unwrap(), 1);
    }

    #[test]
    fn test_delete_up_to_is_inclusive() {
        let storage = Storage::in_memory().unwrap();
        for h in 1..=5 {
            storage.insert_block(&record(h)).unwrap();
        }
        assert_eq!(storage.delete_blocks_up_to(3).unwrap(), 3);
        assert_eq!(storage.block_by_height(3).unwrap(), None);
        assert!(storage.block_by_height(4).unwrap().is_some());
        assert_eq!(storage.block_count().unwrap(), 2);

        storage.clear_blocks().unwrap();
        assert_eq!(storage.last_height().unwrap(), None);
    }

    #[test]
    fn test_pool_rows() {
        let storage = Storage::in_memory().unwrap();
        let rows: Vec<PoolRow> = [5u64, 1, 3]
            .into_iter()
            .map(|seq| PoolRow {
                hash: Hash::repeat_byte(seq as u8),
                sequence: seq,
                contents: format!("{{\"seq\":{seq}}}"),
            })
            .collect();
        storage.pool_upsert(&rows).unwrap();
        storage.pool_upsert(&rows[..1]).unwrap();
        assert_eq!(storage.pool_count().unwrap(), 3);

        let selected = storage.pool_select(2).unwrap();
        assert_eq!(
            selected.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![1, 3]
        );

        assert_eq!(storage.pool_delete(&[Hash::repeat_byte(1)]).unwrap(), 1);
        assert_eq!(storage.pool_count().unwrap(), 2);
        storage.pool_clear().unwrap();
        assert_eq!(storage.pool_count().unwrap(), 0);
    }

    #[test]
    fn test_sequence_counters() {
        let storage = Storage::in_memory().unwrap();
        assert_eq!(storage.last_issued_sequence().unwrap(), None);
        assert_eq!(storage.next_sequence().unwrap(), 0);
        assert_eq!(storage.next_sequence().unwrap(), 1);
        assert_eq!(storage.last_issued_sequence().unwrap(), Some(1));
        assert_eq!(storage.last_received_sequence().unwrap(), None);

        write_counter(&storage.conn().unwrap(), LAST_RECEIVED_KEY, 4).unwrap();
        assert_eq!(storage.next_sequence().unwrap(), 5);

        storage
            .conn()
            .unwrap()
            .execute(
                "UPDATE settings SET value = 'x' WHERE key = ?1",
                params![LAST_ISSUED_KEY],
            )
            .unwrap();
        assert!(matches!(
            storage.last_issued_sequence(),
            Err(StorageError::Corrupt(_))
        ));
    }

    fn pool_row(sequence: Sequence, byte: u8) -> PoolRow {
        PoolRow {
            hash: Hash::repeat_byte(byte),
            sequence,
            contents: format!("{{\"seq\":{sequence}}}"),
        }
    }

    #[test]
    fn test_pool_admit_enforces_next_sequence() {
        let storage = Storage::in_memory().unwrap();
        assert!(matches!(
            storage.pool_admit(&pool_row(1, 1)),
            Err(StorageError::SequenceMismatch { expected: 0, got: 1 })
        ));

        storage.pool_admit(&pool_row(0, 1)).unwrap();
        storage.pool_admit(&pool_row(1, 2)).unwrap();
        assert_eq!(storage.last_received_sequence().unwrap(), Some(1));

        // a repeated sequence with other content is refused
        assert!(matches!(
            storage.pool_admit(&pool_row(1, 3)),
            Err(StorageError::SequenceMismatch { expected: 2, got: 1 })
        ));
        assert_eq!(storage.pool_count().unwrap(), 2);
        assert_eq!(storage.last_received_sequence().unwrap(), Some(1));
    }

    #[test]
    fn test_reservations_skip_admitted_sequences() {
        let storage = Storage::in_memory().unwrap();
        for sequence in 0..3 {
            storage.pool_admit(&pool_row(sequence, sequence as u8 + 1)).unwrap();
        }
        assert_eq!(storage.next_sequence().unwrap(), 3);
        assert_eq!(storage.next_sequence().unwrap(), 4);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.db");
        let path = path.to_str().unwrap();
        {
            let storage = Storage::open(path).unwrap();
            storage.insert_block(&record(1)).unwrap();
            storage.next_sequence().unwrap();
            storage.pool_admit(&pool_row(0, 1)).unwrap();
        }
        let storage = Arc::new(Storage::open(path).unwrap());
        assert_eq!(storage.last_height().unwrap(), Some(1));
        assert_eq!(storage.last_issued_sequence().unwrap(), Some(0));
        assert_eq!(storage.last_received_sequence().unwrap(), Some(0));
        assert_eq!(storage.pool_count().unwrap(), 1);
    }
}
