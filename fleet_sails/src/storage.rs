//! Key-value persistence for declarations.
//!
//! Each hull's declaration is one JSON document stored under
//! `storage_prefix + hull`. Backends only need string get/set and key listing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::Config;
use crate::declaration::DeclarationRecord;
use crate::records::compare_hulls;
use crate::SailError;

pub const SAVE_NEEDS_HULL: &str = "Please enter a hull number before saving.";
pub const LOAD_NEEDS_HULL: &str = "Please enter a hull number to load data.";

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, SailError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), SailError>;
    fn keys(&self) -> Result<Vec<String>, SailError>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SailError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SailError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, SailError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStore;

#[cfg(not(target_arch = "wasm32"))]
mod file {
    use std::fs;
    use std::io::ErrorKind;
    use std::path::{Path, PathBuf};

    use super::KeyValueStore;
    use crate::SailError;

    /// One `<key>.json` file per entry in a directory.
    #[derive(Clone, Debug)]
    pub struct FileStore {
        dir: PathBuf,
    }

    impl FileStore {
        pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SailError> {
            let dir = dir.into();
            fs::create_dir_all(&dir)
                .map_err(|e| SailError::Storage(format!("{}: {e}", dir.display())))?;
            Ok(Self { dir })
        }

        pub fn dir(&self) -> &Path {
            &self.dir
        }

        fn path_for(&self, key: &str) -> PathBuf {
            self.dir.join(format!("{}.json", encode_key(key)))
        }
    }

    impl KeyValueStore for FileStore {
        fn get(&self, key: &str) -> Result<Option<String>, SailError> {
            let path = self.path_for(key);
            match fs::read_to_string(&path) {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(SailError::Storage(format!("{}: {e}", path.display()))),
            }
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), SailError> {
            let path = self.path_for(key);
            fs::write(&path, value)
                .map_err(|e| SailError::Storage(format!("{}: {e}", path.display())))
        }

        fn keys(&self) -> Result<Vec<String>, SailError> {
            let entries = fs::read_dir(&self.dir)
                .map_err(|e| SailError::Storage(format!("{}: {e}", self.dir.display())))?;
            let mut keys = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| SailError::Storage(e.to_string()))?;
                let name = entry.file_name();
                let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                    continue;
                };
                if let Some(key) = decode_key(stem) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        }
    }

    // Percent-encode anything that is not safe in a file name.
    fn encode_key(key: &str) -> String {
        let mut out = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
                out.push(byte as char);
            } else {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
        out
    }

    fn decode_key(stem: &str) -> Option<String> {
        let bytes = stem.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' {
                let hex = stem.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            } else {
                out.push(bytes[i]);
                i += 1;
            }
        }
        String::from_utf8(out).ok()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn key_encoding_is_reversible() {
            for key in ["sailDeclaration_12", "sailDeclaration_12 B", "a/b%c", "hull\u{e9}"] {
                let encoded = encode_key(key);
                assert!(!encoded.contains('/') && !encoded.contains(' '));
                assert_eq!(decode_key(&encoded).as_deref(), Some(key));
            }
            assert_eq!(decode_key("bad%2"), None);
        }

        #[test]
        fn file_store_round_trip() {
            let tmp = tempfile::tempdir().unwrap();
            let mut store = FileStore::open(tmp.path().join("decl")).unwrap();
            assert_eq!(store.get("k 1").unwrap(), None);
            store.set("k 1", "{\"a\":1}").unwrap();
            store.set("k2", "x").unwrap();
            std::fs::write(store.dir().join("notes.txt"), "ignored").unwrap();
            assert_eq!(store.get("k 1").unwrap().as_deref(), Some("{\"a\":1}"));
            assert_eq!(store.keys().unwrap(), vec!["k 1", "k2"]);
        }
    }
}

/// Declaration persistence over any [`KeyValueStore`].
#[derive(Clone, Debug)]
pub struct DeclarationStore<S> {
    backend: S,
    prefix: String,
    version: String,
}

impl<S: KeyValueStore> DeclarationStore<S> {
    pub fn new(backend: S, config: &Config) -> Self {
        Self {
            backend,
            prefix: config.storage_prefix.clone(),
            version: config.schema_version.clone(),
        }
    }

    pub fn key_for(&self, hull: &str) -> String {
        format!("{}{}", self.prefix, hull.trim())
    }

    pub fn save(&mut self, record: &DeclarationRecord) -> Result<DeclarationRecord, SailError> {
        self.save_at(record, Utc::now())
    }

    /// Persist `record`, stamped with `saved_at` and the schema version.
    /// Returns the stored form. Nothing is written without a hull number.
    pub fn save_at(
        &mut self,
        record: &DeclarationRecord,
        saved_at: DateTime<Utc>,
    ) -> Result<DeclarationRecord, SailError> {
        let hull = record.hull_number.trim();
        if hull.is_empty() {
            return Err(SailError::validation(SAVE_NEEDS_HULL));
        }
        let stored = DeclarationRecord {
            hull_number: hull.to_string(),
            saved_at: Some(saved_at),
            version: Some(self.version.clone()),
            ..record.clone()
        };
        let json =
            serde_json::to_string(&stored).map_err(|e| SailError::Storage(e.to_string()))?;
        let key = self.key_for(hull);
        self.backend.set(&key, &json)?;
        info!(hull, key = key.as_str(), "declaration saved");
        Ok(stored)
    }

    /// `Ok(None)` when nothing has been saved for `hull`.
    pub fn load(&self, hull: &str) -> Result<Option<DeclarationRecord>, SailError> {
        let hull = hull.trim();
        if hull.is_empty() {
            return Err(SailError::validation(LOAD_NEEDS_HULL));
        }
        let key = self.key_for(hull);
        let Some(text) = self.backend.get(&key)? else {
            debug!(key = key.as_str(), "no saved declaration");
            return Ok(None);
        };
        let record = serde_json::from_str(&text)
            .map_err(|e| SailError::CorruptDeclaration(format!("{key}: {e}")))?;
        Ok(Some(record))
    }

    /// Hulls with a saved declaration, numeric hulls first.
    pub fn saved_hulls(&self) -> Result<Vec<String>, SailError> {
        let mut hulls: Vec<String> = self
            .backend
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(self.prefix.as_str()).map(str::to_string))
            .filter(|h| !h.is_empty())
            .collect();
        hulls.sort_by(|a, b| compare_hulls(a, b));
        Ok(hulls)
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn filled(hull: &str) -> DeclarationRecord {
        let mut record: DeclarationRecord = serde_json::from_value(serde_json::json!({
            "hullNumber": hull,
            "owner": "Pat Doe",
            "boatName": "Blue Note",
            "email": "pat@example.com",
            "mobile": "555-0100",
            "jib1Cert": "C100",
            "spinnaker2Cert": "S1",
            "spinnaker2Color": "Red",
        }))
        .unwrap();
        record.saved_at = None;
        record
    }

    fn store() -> DeclarationStore<MemoryStore> {
        DeclarationStore::new(MemoryStore::new(), &Config::default())
    }

    #[test]
    fn save_then_load_round_trips_user_fields() {
        let mut store = store();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let record = filled("12");
        let stored = store.save_at(&record, at).unwrap();
        assert_eq!(stored.version.as_deref(), Some("2.0"));

        let loaded = store.load("12").unwrap().unwrap();
        assert_eq!(loaded.without_metadata(), record);
        assert_eq!(loaded.saved_at, Some(at));
        assert_eq!(loaded.version.as_deref(), Some("2.0"));

        let raw = store.backend().get("sailDeclaration_12").unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["savedAt"], "2024-05-01T12:00:00Z");
        assert_eq!(json["jib1Cert"], "C100");
    }

    #[test]
    fn empty_hull_writes_nothing() {
        let mut store = store();
        store.save(&filled("7")).unwrap();
        store
            .backend_mut()
            .set("sailDeclaration_", "{\"hullNumber\":\"\"}")
            .unwrap();
        let before = store.backend().keys().unwrap();
        let err = store.save(&filled("  ")).unwrap_err();
        assert_eq!(err.to_string(), SAVE_NEEDS_HULL);
        assert_eq!(store.backend().keys().unwrap(), before);
        assert_eq!(
            store.backend().get("sailDeclaration_").unwrap().as_deref(),
            Some("{\"hullNumber\":\"\"}")
        );
        assert_eq!(store.load("").unwrap_err().to_string(), LOAD_NEEDS_HULL);
    }

    #[test]
    fn missing_entry_is_not_an_error() {
        assert!(store().load("404").unwrap().is_none());
    }

    #[test]
    fn corrupt_entry_is_reported() {
        let mut store = store();
        store
            .backend_mut()
            .set("sailDeclaration_9", "{not json")
            .unwrap();
        assert!(matches!(
            store.load("9"),
            Err(SailError::CorruptDeclaration(_))
        ));
    }

    #[test]
    fn last_write_wins_and_hulls_are_listed() {
        let mut store = store();
        store.save(&filled("12")).unwrap();
        let mut second = filled("12");
        second.owner = "New Owner".into();
        store.save(&second).unwrap();
        store.save(&filled(" 3 ")).unwrap();
        store.backend_mut().set("unrelated", "x").unwrap();

        assert_eq!(store.load("12").unwrap().unwrap().owner, "New Owner");
        assert_eq!(store.saved_hulls().unwrap(), vec!["3", "12"]);
    }

    #[test]
    fn prefix_comes_from_config() {
        let config = Config {
            storage_prefix: "decl/".into(),
            ..Config::default()
        };
        let mut store = DeclarationStore::new(MemoryStore::new(), &config);
        store.save(&filled("5")).unwrap();
        assert!(store.backend().get("decl/5").unwrap().is_some());
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn declarations_persist_across_file_store_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let backend = FileStore::open(tmp.path()).unwrap();
            let mut store = DeclarationStore::new(backend, &Config::default());
            store.save(&filled("105")).unwrap();
        }
        let backend = FileStore::open(tmp.path()).unwrap();
        let store = DeclarationStore::new(backend, &Config::default());
        assert_eq!(store.saved_hulls().unwrap(), vec!["105"]);
        assert_eq!(
            store.load("105").unwrap().unwrap().without_metadata(),
            filled("105")
        );
    }
}
