//! Descriptor loading
//!
//! Reads resolved descriptor documents (one JSON file, or every `*.json` under
//! a directory) and builds a validated [`SchemaSnapshot`]. Parsing `.proto`
//! source is someone else's job; by the time a document reaches us every type
//! reference is already fully qualified.
//!
//! ```json
//! {
//!   "package": "acme.v1",
//!   "syntax": "proto3",
//!   "version": "1.4.0",
//!   "messages": [
//!     { "name": "User",
//!       "fields": [ { "number": 1, "name": "id", "type": "int64" },
//!                   { "number": 3, "name": "status", "type": { "enum": "acme.v1.Status" } } ],
//!       "reserved": { "ranges": [2], "names": ["email"] } }
//!   ],
//!   "enums": [
//!     { "name": "Status", "values": [ { "number": 0, "name": "STATUS_UNSPECIFIED" } ] }
//!   ]
//! }
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{CompatError, Result};
use crate::schema::{
    EnumType, EnumValueDef, FieldDef, FieldType, MessageType, Reservations, SchemaSnapshot,
    SnapshotBuilder, Syntax, TypeDef,
};
use crate::version::SchemaVersion;

/// One descriptor document
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DescriptorFile {
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub syntax: Syntax,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub messages: Vec<MessageDescriptor>,
    #[serde(default)]
    pub enums: Vec<EnumDescriptor>,
}

/// A message as written in a descriptor document; `name` is package-relative
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageDescriptor {
    pub name: String,
    #[serde(default)]
    pub syntax: Option<Syntax>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub reserved: Reservations,
}

/// An enum as written in a descriptor document; `name` is package-relative
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumDescriptor {
    pub name: String,
    #[serde(default)]
    pub syntax: Option<Syntax>,
    #[serde(default)]
    pub values: Vec<EnumValueDef>,
    #[serde(default)]
    pub reserved: Reservations,
}

impl DescriptorFile {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    fn qualify(&self, name: &str) -> String {
        if self.package.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.package, name)
        }
    }

    /// Resolve package-relative names into model types
    pub fn into_types(self) -> Vec<TypeDef> {
        let mut types = Vec::with_capacity(self.messages.len() + self.enums.len());

        for message in &self.messages {
            let fields = message
                .fields
                .iter()
                .cloned()
                .map(|mut field| {
                    field.field_type = normalize_reference(field.field_type);
                    field
                })
                .collect();
            types.push(TypeDef::Message(MessageType {
                name: self.qualify(&message.name),
                syntax: message.syntax.unwrap_or(self.syntax),
                fields,
                reserved: message.reserved.clone(),
            }));
        }

        for enum_type in &self.enums {
            types.push(TypeDef::Enum(EnumType {
                name: self.qualify(&enum_type.name),
                syntax: enum_type.syntax.unwrap_or(self.syntax),
                values: enum_type.values.clone(),
                reserved: enum_type.reserved.clone(),
            }));
        }

        types
    }
}

/// Accept protoc-style leading dots on references
fn normalize_reference(field_type: FieldType) -> FieldType {
    fn strip(name: String) -> String {
        name.strip_prefix('.').map(str::to_string).unwrap_or(name)
    }
    match field_type {
        FieldType::Message(name) => FieldType::Message(strip(name)),
        FieldType::Enum(name) => FieldType::Enum(strip(name)),
        FieldType::Group(name) => FieldType::Group(strip(name)),
        other => other,
    }
}

/// Collect descriptor files for a path, sorted for deterministic loading.
///
/// Symlinks are followed; an entry the walk cannot read fails the load.
fn descriptor_paths(label: &str, path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut paths = Vec::new();
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry.map_err(|e| CompatError::invalid(label, format!("walking descriptors: {}", e)))?;
        let path = entry.path();
        if path.is_file() && path.extension().map(|x| x == "json").unwrap_or(false) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load a snapshot from a descriptor file or a directory of them
pub fn load_snapshot(path: &Path) -> Result<SchemaSnapshot> {
    let label = path.display().to_string();
    if !path.exists() {
        return Err(CompatError::invalid(&label, "path does not exist"));
    }

    let paths = descriptor_paths(&label, path)?;
    if paths.is_empty() {
        return Err(CompatError::invalid(&label, "no descriptor files found"));
    }

    let mut builder = SnapshotBuilder::new(label.clone());
    let mut version: Option<(SchemaVersion, PathBuf)> = None;

    for file in paths {
        debug!(path = %file.display(), "loading descriptor");
        let content = fs::read_to_string(&file)?;
        let descriptor = DescriptorFile::parse(&content).map_err(|e| {
            CompatError::invalid(&label, format!("{}: {}", file.display(), e))
        })?;

        if let Some(raw) = &descriptor.version {
            let parsed = SchemaVersion::parse(raw)?;
            match &version {
                Some((existing, origin)) if *existing != parsed => {
                    return Err(CompatError::invalid(
                        &label,
                        format!(
                            "{} declares version {} but {} declares {}",
                            file.display(),
                            parsed,
                            origin.display(),
                            existing
                        ),
                    ));
                }
                Some(_) => {}
                None => version = Some((parsed, file.clone())),
            }
        }

        for def in descriptor.into_types() {
            builder.push(def);
        }
    }

    if let Some((v, _)) = version {
        builder.set_version(v);
    }
    builder.build()
}
