//! Descriptor table: the persisted reference set of (descriptor, name) pairs.
//!
//! On disk the table is a JSON document with two parallel, index-aligned
//! lists: `{"encodings": [[...], ...], "names": [...]}`.

use crate::types::{Descriptor, DESCRIPTOR_DIM};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("descriptor table not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid descriptor table document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("descriptor table has {encodings} encodings but {names} names")]
    LengthMismatch { encodings: usize, names: usize },
    #[error("descriptor {index} has {len} values, expected {}", DESCRIPTOR_DIM)]
    BadDimension { index: usize, len: usize },
    #[error("descriptor {index} contains a non-finite value")]
    NonFinite { index: usize },
}

/// One reference exemplar.
#[derive(Debug, Clone, PartialEq)]
pub struct TableEntry {
    pub name: String,
    pub descriptor: Descriptor,
}

/// Serialized layout, kept separate so the in-memory form stays row-oriented.
#[derive(Serialize, Deserialize, Default)]
struct TableDocument {
    #[serde(default)]
    encodings: Vec<Descriptor>,
    #[serde(default)]
    names: Vec<String>,
}

/// Ordered collection of reference descriptors. Order is the tie-break order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorTable {
    entries: Vec<TableEntry>,
}

impl DescriptorTable {
    pub fn push(&mut self, name: impl Into<String>, descriptor: Descriptor) {
        self.entries.push(TableEntry {
            name: name.into(),
            descriptor,
        });
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct identity names in the table.
    pub fn identity_count(&self) -> usize {
        let mut names: Vec<&str> = self.entries.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }

    /// Parse and validate a serialized table.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TableError> {
        let doc: TableDocument = serde_json::from_slice(bytes)?;

        if doc.encodings.len() != doc.names.len() {
            return Err(TableError::LengthMismatch {
                encodings: doc.encodings.len(),
                names: doc.names.len(),
            });
        }

        for (index, d) in doc.encodings.iter().enumerate() {
            if d.is_well_formed() {
                continue;
            }
            return Err(if d.len() != DESCRIPTOR_DIM {
                TableError::BadDimension { index, len: d.len() }
            } else {
                TableError::NonFinite { index }
            });
        }

        let entries = doc
            .encodings
            .into_iter()
            .zip(doc.names)
            .map(|(descriptor, name)| TableEntry { name, descriptor })
            .collect();

        Ok(Self { entries })
    }

    pub fn to_json(&self) -> Result<Vec<u8>, TableError> {
        let doc = TableDocument {
            encodings: self.entries.iter().map(|e| e.descriptor.clone()).collect(),
            names: self.entries.iter().map(|e| e.name.clone()).collect(),
        };
        Ok(serde_json::to_vec(&doc)?)
    }

    /// Load a table from disk, failing on any read or validation error.
    pub fn load(path: &Path) -> Result<Self, TableError> {
        if !path.exists() {
            return Err(TableError::NotFound(path.display().to_string()));
        }
        let bytes = fs::read(path)?;
        Self::from_json(&bytes)
    }

    /// Load a table, degrading to an empty table when it is missing or malformed.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(table) => {
                tracing::info!(
                    path = %path.display(),
                    descriptors = table.len(),
                    identities = table.identity_count(),
                    "loaded descriptor table"
                );
                table
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "could not load descriptor table; continuing with no known faces"
                );
                Self::default()
            }
        }
    }

    /// Overwrite the table at `path`.
    ///
    /// Writes a sibling temp file and renames it into place so readers never
    /// observe a partial table.
    pub fn save(&self, path: &Path) -> Result<(), TableError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let bytes = self.to_json()?;
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        tracing::info!(
            path = %path.display(),
            descriptors = self.len(),
            "saved descriptor table"
        );
        Ok(())
    }
}
