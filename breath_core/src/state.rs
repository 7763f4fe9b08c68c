//! Safety registry persistence with file locking.
//!
//! The registry is stored as a single JSON object keyed by pattern id. Reads
//! never fail on bad data: a missing or unreadable file yields an empty
//! registry and a warning.

use crate::{Error, Result, SafetyRegistry};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// File-backed home of the [`SafetyRegistry`]
#[derive(Clone, Debug)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the registry with a shared lock
    ///
    /// Returns an empty registry if the file is missing or corrupted.
    pub fn load(&self) -> Result<SafetyRegistry> {
        let path = &self.path;
        if !path.exists() {
            tracing::info!("No safety registry at {:?}, starting empty", path);
            return Ok(SafetyRegistry::new());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open registry {:?}: {}. Starting empty.", path, e);
                return Ok(SafetyRegistry::new());
            }
        };

        if let Err(e) = file.lock_shared() {
            tracing::warn!("Unable to lock registry {:?}: {}. Starting empty.", path, e);
            return Ok(SafetyRegistry::new());
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!("Failed to read registry {:?}: {}. Starting empty.", path, e);
            return Ok(SafetyRegistry::new());
        }

        file.unlock()?;

        match serde_json::from_str::<SafetyRegistry>(&contents) {
            Ok(registry) => {
                tracing::debug!("Loaded {} safety profiles from {:?}", registry.len(), path);
                Ok(registry)
            }
            Err(e) => {
                tracing::warn!("Failed to parse registry {:?}: {}. Starting empty.", path, e);
                Ok(SafetyRegistry::new())
            }
        }
    }

    /// Replace the stored registry atomically
    ///
    /// Writes a locked temp file in the same directory, syncs it, then
    /// renames it over the old file.
    pub fn save(&self, registry: &SafetyRegistry) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| Error::Other(format!("registry path {:?} has no parent", self.path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, registry)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved {} safety profiles to {:?}", registry.len(), self.path);
        Ok(())
    }

    /// Sidecar file whose exclusive lock serializes [`RegistryStore::update`]
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Load, modify and save back as one read-modify-write
    ///
    /// The sidecar lock is held from the load until the new file is in place,
    /// so concurrent updates from other processes are applied in turn.
    pub fn update<F>(&self, f: F) -> Result<SafetyRegistry>
    where
        F: FnOnce(&SafetyRegistry) -> Result<SafetyRegistry>,
    {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        lock.lock_exclusive()?;

        let result = self.load().and_then(|current| {
            let next = f(&current)?;
            self.save(&next)?;
            Ok(next)
        });

        lock.unlock()?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SafetyProfile;

    fn store_in(dir: &tempfile::TempDir) -> RegistryStore {
        RegistryStore::new(dir.path().join("safety_registry.json"))
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store_in(&temp_dir);

        let mut registry = SafetyRegistry::new();
        let mut profile = SafetyProfile {
            cumulative_stress_score: 3,
            last_incident_timestamp: 1_700_000_000.5,
            ..SafetyProfile::default()
        };
        profile.push_resonance(1.0);
        profile.push_resonance(0.0);
        registry.insert("4-7-8", profile);

        store.save(&registry).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, registry);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let registry = store_in(&temp_dir).load().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_corrupted_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store_in(&temp_dir);
        std::fs::write(store.path(), "{ \"box\": [not json").unwrap();

        let registry = store.load().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_applies_change() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store_in(&temp_dir);

        store
            .update(|current| {
                let mut next = current.clone();
                next.entry("box").push_resonance(1.0);
                Ok(next)
            })
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.get("box").unwrap().perfect_sessions(), 1);
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store_in(&temp_dir);
        store.save(&SafetyRegistry::new()).unwrap();
        store.save(&SafetyRegistry::new()).unwrap();

        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "safety_registry.json")
            .collect();
        assert!(extras.is_empty(), "unexpected files: {:?}", extras);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store_in(&temp_dir);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .update(|current| {
                            let mut next = current.clone();
                            next.entry("calm").cumulative_stress_score += 1;
                            Ok(next)
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = store.load().unwrap();
        assert_eq!(loaded.get("calm").unwrap().cumulative_stress_score, 8);
    }

    #[test]
    fn test_failed_update_keeps_file_and_releases_lock() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store_in(&temp_dir);
        store.save(&SafetyRegistry::new()).unwrap();

        let result = store.update(|_| Err(Error::Other("refused".into())));
        assert!(result.is_err());
        assert!(store.load().unwrap().is_empty());

        // A second update does not block on a leftover lock
        store.update(|current| Ok(current.clone())).unwrap();
        assert!(store.lock_path().exists());
    }
}
