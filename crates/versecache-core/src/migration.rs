//! One-time import of the legacy unencrypted store.
//!
//! Legacy values were all plain strings. Each one is classified (boolean,
//! number for numeric-looking keys, or text/JSON) and written typed into the
//! encrypted store. A completion flag keeps the import from running twice.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::{is_sentinel, Storage};

/// Set once the import has run to the end.
pub const MIGRATION_FLAG_KEY: &str = "__migration_v1_complete";

/// Key segments that mark a value as numeric.
const NUMERIC_KEY_HINTS: &[&str] = &[
    "count", "size", "index", "position", "last", "id", "number", "timestamp", "version", "progress",
];

/// Why a single legacy key was not imported.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MigrationItemError {
    #[error("Legacy store has no readable value")]
    Unreadable,

    #[error("Legacy value is a corruption sentinel")]
    Sentinel,

    #[error("Failed to write value: {0}")]
    Write(String),
}

impl From<StoreError> for MigrationItemError {
    fn from(e: StoreError) -> Self {
        MigrationItemError::Write(e.to_string())
    }
}

/// The legacy store could not be enumerated at all.
#[derive(Error, Debug)]
#[error("Failed to enumerate legacy store: {0}")]
pub struct MigrationError(pub String);

/// Read access to the legacy store.
pub trait LegacySource {
    fn keys(&self) -> Result<Vec<String>, MigrationError>;

    fn read(&self, key: &str) -> Option<String>;
}

impl LegacySource for BTreeMap<String, String> {
    fn keys(&self) -> Result<Vec<String>, MigrationError> {
        Ok(self.keys().cloned().collect())
    }

    fn read(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Plaintext JSON object dump of the legacy store. Non-string values are
/// kept as their JSON text.
pub struct JsonFileLegacySource {
    values: BTreeMap<String, serde_json::Value>,
}

impl JsonFileLegacySource {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read legacy store {}", path.display()))?;
        let values = serde_json::from_str(&contents)
            .with_context(|| format!("Legacy store {} is not a JSON object", path.display()))?;
        Ok(Self { values })
    }
}

impl LegacySource for JsonFileLegacySource {
    fn keys(&self) -> Result<Vec<String>, MigrationError> {
        Ok(self.values.keys().cloned().collect())
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// A legacy string after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

fn has_numeric_hint(key: &str) -> bool {
    key.split(|c: char| matches!(c, '-' | '_' | '.' | ':'))
        .map(str::to_lowercase)
        .any(|segment| {
            NUMERIC_KEY_HINTS
                .iter()
                .any(|hint| segment == *hint || segment.ends_with(hint))
        })
}

pub fn classify(key: &str, raw: &str) -> LegacyValue {
    match raw {
        "true" => return LegacyValue::Bool(true),
        "false" => return LegacyValue::Bool(false),
        _ => {}
    }
    if has_numeric_hint(key) {
        if let Ok(number) = raw.trim().parse::<f64>() {
            if number.is_finite() {
                return LegacyValue::Number(number);
            }
        }
    }
    LegacyValue::Text(raw.to_string())
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MigrationReport {
    pub migrated: usize,
    pub failed: Vec<(String, MigrationItemError)>,
    /// Keys left alone because the new store already had them.
    pub already_present: usize,
    /// True when the flag showed the import had already run.
    pub skipped: bool,
}

pub fn is_migrated(storage: &Storage) -> bool {
    storage.get_bool(MIGRATION_FLAG_KEY).unwrap_or(false)
}

/// Import every legacy key not yet present in `storage`, then set the flag.
///
/// Per-key failures are collected in the report and do not stop the run.
pub fn migrate_legacy(legacy: &dyn LegacySource, storage: &Storage) -> Result<MigrationReport, MigrationError> {
    if is_migrated(storage) {
        debug!("Legacy migration already complete");
        return Ok(MigrationReport {
            skipped: true,
            ..MigrationReport::default()
        });
    }

    let keys = legacy.keys()?;
    info!(count = keys.len(), "Starting legacy migration");

    let mut report = MigrationReport::default();
    for key in keys {
        if key == MIGRATION_FLAG_KEY {
            continue;
        }
        if storage.contains(&key) {
            report.already_present += 1;
            continue;
        }
        match migrate_one(legacy, storage, &key) {
            Ok(()) => report.migrated += 1,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to migrate key");
                report.failed.push((key, e));
            }
        }
    }

    if let Err(e) = storage.set_bool(MIGRATION_FLAG_KEY, true) {
        warn!(error = %e, "Failed to record migration flag");
    }
    info!(
        migrated = report.migrated,
        failed = report.failed.len(),
        already_present = report.already_present,
        "Legacy migration complete"
    );
    Ok(report)
}

fn migrate_one(legacy: &dyn LegacySource, storage: &Storage, key: &str) -> Result<(), MigrationItemError> {
    let raw = legacy.read(key).ok_or(MigrationItemError::Unreadable)?;
    if is_sentinel(&raw) {
        return Err(MigrationItemError::Sentinel);
    }
    match classify(key, &raw) {
        LegacyValue::Bool(value) => storage.set_bool(key, value)?,
        LegacyValue::Number(value) => storage.set_number(key, value)?,
        LegacyValue::Text(value) => storage.set_string(key, &value)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn legacy(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    struct BrokenSource;

    impl LegacySource for BrokenSource {
        fn keys(&self) -> Result<Vec<String>, MigrationError> {
            Err(MigrationError("storage unavailable".to_string()))
        }

        fn read(&self, _key: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("nightMode", "true"), LegacyValue::Bool(true));
        assert_eq!(classify("lastReadSurah", "18"), LegacyValue::Text("18".to_string()));
        assert_eq!(classify("last-read-surah", "18"), LegacyValue::Number(18.0));
        assert_eq!(classify("font_size", "1.5"), LegacyValue::Number(1.5));
        assert_eq!(classify("reader.position", "NaN"), LegacyValue::Text("NaN".to_string()));
        assert_eq!(classify("bookmarkCount", "3"), LegacyValue::Number(3.0));
        assert_eq!(classify("username", "42"), LegacyValue::Text("42".to_string()));
    }

    #[test]
    fn test_migrates_typed_values_and_sets_flag() {
        let storage = Storage::in_memory();
        let source = legacy(&[
            ("dark_mode", "false"),
            ("last_surah", "36"),
            ("bookmarks", r#"[{"surah":2,"verse":255}]"#),
        ]);

        let report = migrate_legacy(&source, &storage).unwrap();
        assert_eq!(report.migrated, 3);
        assert!(report.failed.is_empty());

        assert_eq!(storage.get_bool("dark_mode"), Some(false));
        assert_eq!(storage.get_number("last_surah"), Some(36.0));
        assert_eq!(
            storage.get_json::<serde_json::Value>("bookmarks"),
            Some(serde_json::json!([{"surah": 2, "verse": 255}]))
        );
        assert!(is_migrated(&storage));
    }

    #[test]
    fn test_runs_only_once() {
        let storage = Storage::in_memory();
        migrate_legacy(&legacy(&[("a", "1")]), &storage).unwrap();

        let report = migrate_legacy(&legacy(&[("b", "2")]), &storage).unwrap();
        assert!(report.skipped);
        assert!(!storage.contains("b"));
    }

    #[test]
    fn test_existing_keys_are_not_overwritten() {
        let storage = Storage::in_memory();
        storage.set_string("edition", "english").unwrap();

        let report = migrate_legacy(&legacy(&[("edition", "arabic")]), &storage).unwrap();
        assert_eq!(report.already_present, 1);
        assert_eq!(storage.get_string("edition").as_deref(), Some("english"));
    }

    #[test]
    fn test_bad_items_are_reported_and_run_completes() {
        let storage = Storage::in_memory();
        let source = legacy(&[("broken", "undefined"), ("theme", "sepia")]);

        let report = migrate_legacy(&source, &storage).unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed, vec![("broken".to_string(), MigrationItemError::Sentinel)]);
        assert!(!storage.contains("broken"));
        assert!(is_migrated(&storage));
    }

    #[test]
    fn test_enumeration_failure_leaves_flag_unset() {
        let storage = Storage::in_memory();
        assert!(migrate_legacy(&BrokenSource, &storage).is_err());
        assert!(!is_migrated(&storage));
    }

    #[test]
    fn test_json_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"reciter":"alafasy","audio_volume":0.8,"autoplay":true,"gone":null}}"#).unwrap();

        let source = JsonFileLegacySource::load(file.path()).unwrap();
        assert_eq!(source.read("reciter").as_deref(), Some("alafasy"));
        assert_eq!(source.read("autoplay").as_deref(), Some("true"));
        assert_eq!(source.read("gone"), None);

        let storage = Storage::in_memory();
        let report = migrate_legacy(&source, &storage).unwrap();
        assert_eq!(report.migrated, 3);
        assert_eq!(report.failed, vec![("gone".to_string(), MigrationItemError::Unreadable)]);
        assert_eq!(storage.get_bool("autoplay"), Some(true));
        assert_eq!(storage.get_string("reciter").as_deref(), Some("alafasy"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(JsonFileLegacySource::load(Path::new("/nonexistent/legacy.json")).is_err());
    }
}
