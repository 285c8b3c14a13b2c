//! Storage Module
//!
//! Adapter over the ordered storage engine (RocksDB).
//!
//! ## Responsibilities
//! - Open the engine with the configured tuning
//! - Point lookups returning pinned value views
//! - Total-order iterators for forward and range scans
//! - No-sync single writes (WAL bypass is a compile-time switch)
//! - Bulk ingestion of externally built sorted table files
//!
//! One `Store` exists per process, shared across all workers behind an
//! `Arc`; the engine handles concurrent readers and writers internally.
//! Iterators and pinned views borrow the store and never outlive the
//! handler call that created them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rocksdb::{
    DBPinnableSlice, DBRawIterator, IngestExternalFileOptions, Options, ReadOptions,
    SstFileWriter, WriteOptions, DB,
};

use crate::config::Config;
use crate::error::Result;

/// Distinguishes concurrent bulk-load files created in the same clock tick
static BULK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Handle to the shared storage engine
pub struct Store {
    db: DB,

    /// Engine options, kept alive for sorted-file writers
    opts: Options,
}

impl Store {
    /// Open or create the engine at the configured path
    pub fn open(config: &Config) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_db_write_buffer_size(config.write_buffer_size);
        opts.set_max_open_files(config.max_open_files);
        opts.set_max_background_jobs(4);

        let db = DB::open(&opts, &config.db_path)?;
        Ok(Store { db, opts })
    }

    /// Point lookup
    ///
    /// Returns a pinned view into engine memory; the view is valid until
    /// the next call into the store on the same worker. Reads skip the
    /// block cache: point-get workloads here are one-shot.
    pub fn get(&self, key: &[u8]) -> Result<Option<DBPinnableSlice<'_>>> {
        let mut read_opts = ReadOptions::default();
        read_opts.fill_cache(false);
        read_opts.set_pin_data(true);
        Ok(self.db.get_pinned_opt(key, &read_opts)?)
    }

    /// Single write, never synced; the WAL is bypassed when the
    /// `disable-wal` feature is enabled
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(false);
        write_opts.disable_wal(cfg!(feature = "disable-wal"));
        Ok(self.db.put_opt(key, value, &write_opts)?)
    }

    /// Snapshot iterator for forward and range scans
    ///
    /// Total-order seek so scans observe engine order regardless of any
    /// prefix extractor; pinned data so entry slices stay valid between
    /// `next` calls.
    pub fn scan_iterator(&self) -> DBRawIterator<'_> {
        let mut read_opts = ReadOptions::default();
        read_opts.fill_cache(false);
        read_opts.set_total_order_seek(true);
        read_opts.set_pin_data(true);
        self.db.raw_iterator_opt(read_opts)
    }

    /// Start a bulk load targeting a fresh sorted table file in the system
    /// temp directory
    pub fn bulk_load(&self) -> Result<BulkLoad<'_>> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = BULK_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("hearthkv-bulk-{stamp}-{seq}.sst"));

        let mut writer = SstFileWriter::create(&self.opts);
        writer.open(&path)?;

        Ok(BulkLoad {
            store: self,
            writer,
            path,
            entries: 0,
            armed: true,
        })
    }

    /// Atomically merge a finished sorted table file into the keyspace
    ///
    /// The engine takes ownership of the file on success.
    fn ingest_sorted_file(&self, path: &Path) -> Result<()> {
        let mut ingest_opts = IngestExternalFileOptions::default();
        ingest_opts.set_move_files(true);
        Ok(self.db.ingest_external_file_opts(&ingest_opts, vec![path])?)
    }
}

/// In-progress bulk load: a sorted table file under construction
///
/// Keys must be added in strictly ascending order; the engine's writer
/// rejects violations. The temp file is removed on drop unless the engine
/// took ownership of it, so every failure path (including an abandoned
/// handler) cleans up.
pub struct BulkLoad<'a> {
    store: &'a Store,
    writer: SstFileWriter<'a>,
    path: PathBuf,
    entries: u64,

    /// Still responsible for the file on disk
    armed: bool,
}

impl BulkLoad<'_> {
    /// Append one entry; keys must arrive in strictly ascending order
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writer.put(key, value)?;
        self.entries += 1;
        Ok(())
    }

    /// Number of entries appended so far
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Finalize the file and ingest it into the engine
    ///
    /// An empty load ingests nothing and succeeds: the engine rejects
    /// entry-less sorted tables, so none is created. On any error the
    /// file is removed when the load drops.
    pub fn finish(mut self) -> Result<()> {
        if self.entries == 0 {
            return Ok(());
        }
        self.writer.finish()?;
        self.store.ingest_sorted_file(&self.path)?;
        self.armed = false;
        Ok(())
    }

    /// Abandon the load; the partial file is removed on drop
    pub fn discard(self) {}
}

impl Drop for BulkLoad<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> Store {
        let config = Config::builder()
            .db_path(dir.path().join("db"))
            .socket_path(dir.path().join("sock"))
            .write_buffer_size(8 << 20)
            .build()
            .unwrap();
        Store::open(&config).unwrap()
    }

    #[test]
    fn test_put_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"alpha", b"1").unwrap();
        let value = store.get(b"alpha").unwrap().unwrap();
        assert_eq!(&*value, b"1");
    }

    #[test]
    fn test_get_miss_is_none() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.get(b"missing").unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"k", b"old").unwrap();
        store.put(b"k", b"new").unwrap();
        assert_eq!(&*store.get(b"k").unwrap().unwrap(), b"new");
    }

    #[test]
    fn test_scan_iterator_in_key_order() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"b", b"2").unwrap();
        store.put(b"a", b"1").unwrap();
        store.put(b"c", b"3").unwrap();

        let mut iter = store.scan_iterator();
        iter.seek(b"a");
        let mut seen = Vec::new();
        while iter.valid() {
            seen.push((iter.key().unwrap().to_vec(), iter.value().unwrap().to_vec()));
            iter.next();
        }
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_seek_lands_on_next_key() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"b", b"2").unwrap();
        store.put(b"d", b"4").unwrap();

        let mut iter = store.scan_iterator();
        iter.seek(b"c");
        assert!(iter.valid());
        assert_eq!(iter.key().unwrap(), b"d");
    }

    #[test]
    fn test_bulk_load_visible_after_finish() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut bulk = store.bulk_load().unwrap();
        bulk.add(b"a", b"1").unwrap();
        bulk.add(b"b", b"2").unwrap();
        bulk.add(b"c", b"3").unwrap();
        bulk.finish().unwrap();

        assert_eq!(&*store.get(b"a").unwrap().unwrap(), b"1");
        assert_eq!(&*store.get(b"b").unwrap().unwrap(), b"2");
        assert_eq!(&*store.get(b"c").unwrap().unwrap(), b"3");
    }

    #[test]
    fn test_bulk_load_rejects_out_of_order() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut bulk = store.bulk_load().unwrap();
        bulk.add(b"b", b"2").unwrap();
        assert!(bulk.add(b"a", b"1").is_err());
        bulk.discard();

        assert!(store.get(b"a").unwrap().is_none());
        assert!(store.get(b"b").unwrap().is_none());
    }

    #[test]
    fn test_empty_bulk_load_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let bulk = store.bulk_load().unwrap();
        bulk.finish().unwrap();
    }

    #[test]
    fn test_empty_key_is_storable() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"", b"empty").unwrap();
        assert_eq!(&*store.get(b"").unwrap().unwrap(), b"empty");
    }
}
