//! The manifest: what the database says about itself.
//!
//! Written atomically on every schema change (index or vector index
//! created or dropped). Reopen reads it before touching the logs so the
//! projection registries exist when recovery replays into them.

use crate::dir;
use crate::error::{EngineError, EngineResult};
use crate::index::IndexDefinition;
use crate::vector::VectorIndexConfig;
use facetdb_codec::{decode_value, encode_value, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// On-disk format version this build reads and writes.
pub(crate) const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default)]
pub(crate) struct Manifest {
    pub(crate) indexes: Vec<IndexDefinition>,
    pub(crate) vectors: Vec<VectorIndexConfig>,
}

impl Manifest {
    fn to_bytes(&self) -> Vec<u8> {
        let mut map = BTreeMap::new();
        map.insert(
            "format_version".to_string(),
            Value::Int(i64::from(FORMAT_VERSION)),
        );
        map.insert(
            "indexes".to_string(),
            Value::Array(self.indexes.iter().map(IndexDefinition::to_value).collect()),
        );
        map.insert(
            "vectors".to_string(),
            Value::Array(self.vectors.iter().map(VectorIndexConfig::to_value).collect()),
        );
        encode_value(&Value::Map(map))
    }

    fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        let value = decode_value(bytes)?;
        let version = value
            .get("format_version")
            .and_then(Value::as_int)
            .unwrap_or(0);
        if version != i64::from(FORMAT_VERSION) {
            return Err(EngineError::InvalidFormat {
                expected: FORMAT_VERSION,
                actual: version.max(0) as u32,
            });
        }
        let bad = || EngineError::invalid_operation("manifest is malformed");
        let mut indexes = Vec::new();
        for raw in value.get("indexes").and_then(Value::as_array).ok_or_else(bad)? {
            indexes.push(IndexDefinition::from_value(raw)?);
        }
        let mut vectors = Vec::new();
        for raw in value.get("vectors").and_then(Value::as_array).ok_or_else(bad)? {
            vectors.push(VectorIndexConfig::from_value(raw)?);
        }
        Ok(Self { indexes, vectors })
    }

    /// Loads the manifest; a missing file is an empty manifest.
    pub(crate) fn load(dir: &Path) -> EngineResult<Self> {
        match dir::read_file(dir, dir::MANIFEST_FILE)? {
            None => Ok(Self::default()),
            Some(bytes) => Self::from_bytes(&bytes),
        }
    }

    /// Persists the manifest atomically.
    pub(crate) fn save(&self, dir: &Path) -> EngineResult<()> {
        dir::write_atomic(dir, dir::MANIFEST_FILE, &self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::DistanceMetric;
    use facetdb_codec::ValueKind;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let manifest = Manifest {
            indexes: vec![
                IndexDefinition::range("users_age", "users", "age", ValueKind::Int),
                IndexDefinition::fulltext("notes_body", "notes", "body"),
            ],
            vectors: vec![VectorIndexConfig::new(
                "docs_vec",
                "docs",
                "embedding",
                4,
                DistanceMetric::Cosine,
            )],
        };
        manifest.save(dir.path()).unwrap();
        let back = Manifest::load(dir.path()).unwrap();
        assert_eq!(back.indexes, manifest.indexes);
        assert_eq!(back.vectors, manifest.vectors);
    }

    #[test]
    fn missing_manifest_is_empty() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::load(dir.path()).unwrap();
        assert!(manifest.indexes.is_empty());
        assert!(manifest.vectors.is_empty());
    }

    #[test]
    fn future_format_version_is_refused() {
        let mut map = BTreeMap::new();
        map.insert("format_version".to_string(), Value::Int(99));
        map.insert("indexes".to_string(), Value::Array(Vec::new()));
        map.insert("vectors".to_string(), Value::Array(Vec::new()));
        let dir = tempdir().unwrap();
        crate::dir::write_atomic(dir.path(), crate::dir::MANIFEST_FILE, &encode_value(&Value::Map(map)))
            .unwrap();
        let err = Manifest::load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidFormat {
                expected: FORMAT_VERSION,
                actual: 99
            }
        ));
    }
}
