use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context as _, anyhow};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{trace, warn};

pub(crate) const LICENSE_KEY: &str = "contentOptimizerLicense";
pub(crate) const TRACKING_LOG_KEY: &str = "coTrackingData";
pub(crate) const VIOLATION_REPORT_KEY: &str = "coViolationReport";
pub(crate) const USAGE_COUNT_KEY: &str = "usageCount";
pub(crate) const FEATURE_USAGE_KEY: &str = "featureUsage";
pub(crate) const ANALYSIS_HISTORY_KEY: &str = "analysisHistory";
pub(crate) const LICENSE_VIOLATIONS_KEY: &str = "licenseViolations";

/// Read-modify-write callback for [`KeyValueStore::update`].
///
/// Receives the current value (if any) and returns the value to store, or
/// `None` to remove the key.
pub(crate) type UpdateFn<'a> = &'a mut dyn FnMut(Option<String>) -> Option<String>;

/// Origin-scoped string key/value store.
///
/// `update` must run its callback and persist the result as one step, with no
/// other writer able to interleave between the read and the write.
pub(crate) trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
    fn update(&self, key: &str, f: UpdateFn<'_>) -> anyhow::Result<()>;
}

/// Keys are stored as one file each, under a directory named after the origin.
#[derive(Debug)]
pub(crate) struct FileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub(crate) fn open(base_dir: &Path, origin: &str) -> anyhow::Result<Self> {
        let dir = base_dir.join(sanitize_path_component(origin));

        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create store directory {}", dir.display()))?;

        trace!(dir = %dir.display(), "Opened origin store");

        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_path_component(key)))
    }

    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(anyhow!(err).context(format!("Failed to read store key file {}", path.display())))
            }
        }
    }

    fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");

        fs::write(&tmp_path, value)
            .with_context(|| format!("Failed to write store key file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to replace store key file {}", path.display()))
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(anyhow!(err)
                .context(format!("Failed to remove store key file {}", path.display()))),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken state.
        self.lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let _guard = self.guard();
        self.read(key)
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let _guard = self.guard();
        self.write(key, value)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let _guard = self.guard();
        self.delete(key)
    }

    fn update(&self, key: &str, f: UpdateFn<'_>) -> anyhow::Result<()> {
        let _guard = self.guard();
        match f(self.read(key)?) {
            Some(value) => self.write(key, &value),
            None => self.delete(key),
        }
    }
}

fn sanitize_path_component(value: &str) -> String {
    let sanitized = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "_".to_owned()
    } else {
        sanitized
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.values().remove(key);
        Ok(())
    }

    fn update(&self, key: &str, f: UpdateFn<'_>) -> anyhow::Result<()> {
        let mut values = self.values();
        match f(values.get(key).cloned()) {
            Some(value) => values.insert(key.to_owned(), value),
            None => values.remove(key),
        };
        Ok(())
    }
}

/// Reads a JSON array stored under `key`, treating a missing or unparseable
/// value as empty.
pub(crate) fn read_sequence<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Vec<T> {
    match store.get(key) {
        Ok(Some(raw)) => parse_sequence(key, &raw),
        Ok(None) => vec![],
        Err(err) => {
            warn!(key, ?err, "Failed to read stored sequence, treating as empty");
            vec![]
        }
    }
}

fn parse_sequence<T: DeserializeOwned>(key: &str, raw: &str) -> Vec<T> {
    serde_json::from_str(raw).unwrap_or_else(|err| {
        warn!(key, %err, "Stored sequence is malformed, treating as empty");
        vec![]
    })
}

/// Appends `entry` to the JSON array under `key` and keeps only the newest
/// `cap` entries. The read, eviction and write happen inside one store update.
pub(crate) fn append_capped<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    entry: &T,
    cap: usize,
) -> anyhow::Result<usize> {
    let entry = serde_json::to_value(entry).context("Failed to serialize sequence entry")?;
    let mut entry = Some(entry);
    let mut retained = 0;
    let mut serialize_error = None;

    store.update(key, &mut |current| {
        let mut entries: Vec<serde_json::Value> = current
            .as_deref()
            .map(|raw| parse_sequence(key, raw))
            .unwrap_or_default();

        entries.extend(entry.take());

        if entries.len() > cap {
            entries.drain(..entries.len() - cap);
        }

        retained = entries.len();

        match serde_json::to_string(&entries) {
            Ok(serialized) => Some(serialized),
            Err(err) => {
                serialize_error = Some(err);
                current
            }
        }
    })?;

    if let Some(err) = serialize_error {
        return Err(anyhow!(err).context(format!("Failed to serialize sequence {key}")));
    }

    Ok(retained)
}
