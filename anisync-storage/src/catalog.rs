//! Catalog persisted as one JSON file per record kind.

use crate::error::StorageError;
use anisync_core::{CatalogRecord, CatalogStore, CoreError, MemoryCatalog, RecordKind};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// `CatalogStore` kept in memory and written to `<dir>/<kind>.json` on
/// `flush()`.
pub struct JsonCatalogStore {
    dir: PathBuf,
    records: MemoryCatalog,
    dirty: AtomicBool,
    flush_lock: Mutex<()>,
}

impl JsonCatalogStore {
    /// Opens or creates a catalog at the given directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let store = Self {
            dir,
            records: MemoryCatalog::new(),
            dirty: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
        };
        for kind in RecordKind::ALL {
            store.load_kind(kind)?;
        }

        tracing::info!(
            "Loaded catalog from {} ({} records)",
            store.dir.display(),
            store.records.len()
        );
        Ok(store)
    }

    fn kind_path(&self, kind: RecordKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind))
    }

    fn load_kind(&self, kind: RecordKind) -> Result<(), StorageError> {
        let path = self.kind_path(kind);
        if !path.exists() {
            return Ok(());
        }

        let reader = BufReader::new(File::open(&path)?);
        let records: Vec<CatalogRecord> = serde_json::from_reader(reader)?;
        for record in records {
            if record.kind() != kind {
                return Err(StorageError::Corruption(format!(
                    "{} holds a {} record",
                    path.display(),
                    record.kind()
                )));
            }
            self.records
                .upsert(record)
                .map_err(|e| StorageError::Corruption(e.to_string()))?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether records changed since the last flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Records of one kind, ordered by id.
    pub fn records_of(&self, kind: RecordKind) -> Vec<CatalogRecord> {
        self.records.records_of(kind)
    }

    /// Writes every kind to disk if anything changed. Returns the number of
    /// records written.
    pub fn flush(&self) -> Result<usize, StorageError> {
        let _guard = self.flush_lock.lock();
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(0);
        }

        let result = self.write_all();
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }

    fn write_all(&self) -> Result<usize, StorageError> {
        let mut written = 0;
        for kind in RecordKind::ALL {
            let records = self.records.records_of(kind);
            let path = self.kind_path(kind);
            if records.is_empty() && !path.exists() {
                continue;
            }

            let tmp_path = self.dir.join(format!("{}.json.tmp", kind));
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer_pretty(&mut writer, &records)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)?;

            written += records.len();
        }

        tracing::debug!("Flushed {} catalog records", written);
        Ok(written)
    }
}

impl CatalogStore for JsonCatalogStore {
    fn upsert(&self, record: CatalogRecord) -> Result<(), CoreError> {
        self.records.upsert(record)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn exists(&self, kind: RecordKind, id: u64) -> bool {
        self.records.exists(kind, id)
    }

    fn get(&self, kind: RecordKind, id: u64) -> Option<CatalogRecord> {
        self.records.get(kind, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anisync_core::{AnimeInfo, EpisodeInfo};
    use anisync_protocol::FieldBag;
    use tempfile::TempDir;

    fn anime(aid: u64, field: &str, value: &str) -> CatalogRecord {
        let mut fields = FieldBag::new();
        fields.insert(field.to_string(), value.to_string());
        CatalogRecord::Anime(AnimeInfo::new(aid, fields))
    }

    fn episode(eid: u64) -> CatalogRecord {
        CatalogRecord::Episode(EpisodeInfo {
            eid,
            aid: Some(1),
            ..Default::default()
        })
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonCatalogStore::open(dir.path()).unwrap();
            store.upsert(anime(1, "year", "1998")).unwrap();
            store.upsert(anime(1, "episodes", "26")).unwrap();
            store.upsert(episode(10)).unwrap();
            assert!(store.is_dirty());
            assert_eq!(store.flush().unwrap(), 2);
            assert!(!store.is_dirty());
        }
        assert!(dir.path().join("anime.json").exists());
        assert!(dir.path().join("episode.json").exists());
        assert!(!dir.path().join("group.json").exists());

        let store = JsonCatalogStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.exists(RecordKind::Episode, 10));
        let known = store.known_fields(RecordKind::Anime, 1).unwrap();
        assert_eq!(known.to_hex(), "20008000000000");
    }

    #[test]
    fn test_flush_without_changes_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = JsonCatalogStore::open(dir.path()).unwrap();
        assert_eq!(store.flush().unwrap(), 0);
        assert!(!dir.path().join("anime.json").exists());
    }

    #[test]
    fn test_misfiled_record_is_corruption() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonCatalogStore::open(dir.path()).unwrap();
            store.upsert(episode(3)).unwrap();
            store.flush().unwrap();
        }
        fs::rename(
            dir.path().join("episode.json"),
            dir.path().join("group.json"),
        )
        .unwrap();

        assert!(matches!(
            JsonCatalogStore::open(dir.path()),
            Err(StorageError::Corruption(_))
        ));
    }
}
