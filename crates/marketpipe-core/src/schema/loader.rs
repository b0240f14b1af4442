//! Versioned schema-file loading.
//!
//! Schema files live under `<schema_dir>/<type>/v<N>.avsc`; the highest
//! numeric version wins. A file that exists but fails structural validation
//! is reported as a warning and the caller falls back to the derived schema;
//! the parse error never propagates out of [`SchemaStore::schema_for`].

use std::path::{Path, PathBuf};

use marketpipe_types::{RecordType, SchemaError};

use super::WireSchema;

#[derive(Debug, Clone)]
pub struct SchemaStore {
    schema_dir: PathBuf,
}

impl SchemaStore {
    pub fn new(schema_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: schema_dir.into(),
        }
    }

    /// Resolve the wire schema for a record type.
    ///
    /// With `prefer_file`, the latest versioned schema file is used when it
    /// exists and validates; any failure falls back to the derived schema
    /// with a warning.
    pub fn schema_for(&self, record_type: RecordType, prefer_file: bool) -> WireSchema {
        if prefer_file {
            match self.load_latest(record_type) {
                Ok(schema) => {
                    tracing::debug!(record_type = %record_type, "Loaded schema from file");
                    return schema;
                }
                Err(e) => {
                    tracing::warn!(
                        record_type = %record_type,
                        error = %e,
                        "Schema file unavailable or invalid, deriving schema from record descriptors"
                    );
                }
            }
        }
        WireSchema::derive(record_type)
    }

    /// Load and validate the highest-versioned schema file for a type.
    pub fn load_latest(&self, record_type: RecordType) -> Result<WireSchema, SchemaError> {
        let path = self.latest_schema_path(record_type)?;
        let display = path.display().to_string();

        let raw = std::fs::read_to_string(&path).map_err(|e| SchemaError::Io {
            path: display.clone(),
            source: e,
        })?;
        let doc: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| SchemaError::Json {
                path: display.clone(),
                source: e,
            })?;

        WireSchema::from_json(&doc, &display)
    }

    /// Find `v<N>.avsc` with the largest `N` under the type's directory.
    fn latest_schema_path(&self, record_type: RecordType) -> Result<PathBuf, SchemaError> {
        let dir = self.schema_dir.join(record_type.as_str());
        if !dir.is_dir() {
            return Err(SchemaError::DirNotFound(dir.display().to_string()));
        }

        let mut best: Option<(u32, PathBuf)> = None;
        let entries = std::fs::read_dir(&dir).map_err(|e| SchemaError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if let Some(version) = parse_version(&path) {
                if best.as_ref().map_or(true, |(v, _)| version > *v) {
                    best = Some((version, path));
                }
            }
        }

        best.map(|(_, path)| path)
            .ok_or_else(|| SchemaError::FileNotFound(record_type.as_str().to_string()))
    }
}

/// Extract `N` from a `v<N>.avsc` file name.
fn parse_version(path: &Path) -> Option<u32> {
    if path.extension()? != "avsc" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix('v')?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_schema(dir: &Path, record_type: &str, file: &str, body: &str) {
        let type_dir = dir.join(record_type);
        fs::create_dir_all(&type_dir).unwrap();
        fs::write(type_dir.join(file), body).unwrap();
    }

    const VALID_INDEX: &str = r#"{
        "namespace": "com.marketpipe.avro",
        "type": "record",
        "name": "Index",
        "fields": [
            { "name": "index_name", "type": "string" },
            { "name": "price", "type": "double" },
            { "name": "timestamp", "type": "double" }
        ]
    }"#;

    #[test]
    fn picks_highest_numeric_version() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "index", "v1.avsc", r#"{"type":"record","name":"Old","fields":[{"name":"x","type":"string"}]}"#);
        write_schema(dir.path(), "index", "v2.avsc", VALID_INDEX);
        write_schema(dir.path(), "index", "v10.avsc", VALID_INDEX);
        write_schema(dir.path(), "index", "notes.txt", "ignored");

        let store = SchemaStore::new(dir.path());
        let path = store.latest_schema_path(RecordType::Index).unwrap();
        assert!(path.ends_with("v10.avsc"));
    }

    #[test]
    fn valid_file_wins_over_derivation() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "index", "v1.avsc", VALID_INDEX);

        let store = SchemaStore::new(dir.path());
        let schema = store.schema_for(RecordType::Index, true);
        assert_eq!(schema.name, "Index");
        assert_eq!(schema.fields.len(), 3);
    }

    #[test]
    fn invalid_file_falls_back_to_derived_schema() {
        let dir = tempfile::tempdir().unwrap();
        // missing type:"record"
        write_schema(
            dir.path(),
            "ack",
            "v1.avsc",
            r#"{"name":"Ack","fields":[{"name":"x","type":"string"}]}"#,
        );

        let store = SchemaStore::new(dir.path());
        let err = store.load_latest(RecordType::Ack).unwrap_err();
        assert!(matches!(err, SchemaError::NotARecord { .. }));

        // schema_for never propagates the error
        let schema = store.schema_for(RecordType::Ack, true);
        assert_eq!(schema, WireSchema::derive(RecordType::Ack));
    }

    #[test]
    fn missing_directory_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SchemaStore::new(dir.path());
        let schema = store.schema_for(RecordType::Ticker, true);
        assert_eq!(schema, WireSchema::derive(RecordType::Ticker));
    }

    #[test]
    fn prefer_file_false_always_derives() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "index", "v1.avsc", VALID_INDEX);
        let store = SchemaStore::new(dir.path());
        let schema = store.schema_for(RecordType::Index, false);
        assert_eq!(schema, WireSchema::derive(RecordType::Index));
    }
}
