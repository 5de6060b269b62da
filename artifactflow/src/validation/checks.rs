//! Role-specific structural checks.
//!
//! Checks are declared per role in the registry definition as
//! [`ArtifactCheck`] values and compiled into [`StructuralCheck`] trait
//! objects. Custom checks implement the trait directly and are attached to a
//! validator with [`crate::validation::ArtifactValidator::with_check`].

use super::npz;
use crate::core::ReasonCode;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A failed structural check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    /// The reason code reported on the artifact record.
    pub reason: ReasonCode,
    /// Human-readable detail.
    pub detail: String,
}

impl CheckFailure {
    /// Creates a new check failure.
    #[must_use]
    pub fn new(reason: ReasonCode, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// A pluggable structural check run against an existing, non-empty artifact.
pub trait StructuralCheck: Send + Sync + Debug {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Inspects the artifact at `path` whose size is `size_bytes`.
    ///
    /// # Errors
    ///
    /// Returns a [`CheckFailure`] describing the first violated property.
    fn check(&self, path: &Path, size_bytes: u64) -> Result<(), CheckFailure>;
}

/// A known alternate encoding that must be reported as the wrong format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownVariant {
    /// Name of the variant, e.g. "ASCII FBX".
    pub name: String,
    /// Leading bytes that identify it.
    pub signature: String,
}

impl KnownVariant {
    /// Creates a new known variant.
    #[must_use]
    pub fn new(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
        }
    }
}

/// Declarative check attached to a role in the registry definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactCheck {
    /// The file must start with `signature` (matched as raw bytes).
    Magic {
        /// Expected leading bytes.
        signature: String,
        /// Alternate encodings reported as [`ReasonCode::WrongFormat`].
        #[serde(default)]
        wrong_variants: Vec<KnownVariant>,
    },
    /// The file is an `.npz` archive holding every listed array.
    NpzFields {
        /// Required array names (without the `.npy` suffix).
        fields: Vec<String>,
    },
    /// The file is a JSON object holding every listed key.
    JsonFields {
        /// Required top-level keys.
        fields: Vec<String>,
    },
    /// The file size must fall within the bounds.
    Size {
        /// Minimum size in bytes.
        #[serde(default)]
        min_bytes: Option<u64>,
        /// Maximum size in bytes.
        #[serde(default)]
        max_bytes: Option<u64>,
    },
}

impl ArtifactCheck {
    /// Creates a magic signature check without wrong variants.
    #[must_use]
    pub fn magic(signature: impl Into<String>) -> Self {
        Self::Magic {
            signature: signature.into(),
            wrong_variants: Vec::new(),
        }
    }

    /// Creates an npz field check.
    #[must_use]
    pub fn npz_fields(fields: &[&str]) -> Self {
        Self::NpzFields {
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    /// Creates a JSON field check.
    #[must_use]
    pub fn json_fields(fields: &[&str]) -> Self {
        Self::JsonFields {
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    /// Compiles the declaration into a runnable check.
    #[must_use]
    pub fn compile(&self) -> Box<dyn StructuralCheck> {
        match self {
            Self::Magic {
                signature,
                wrong_variants,
            } => Box::new(MagicCheck {
                signature: signature.as_bytes().to_vec(),
                wrong_variants: wrong_variants
                    .iter()
                    .map(|v| (v.name.clone(), v.signature.as_bytes().to_vec()))
                    .collect(),
            }),
            Self::NpzFields { fields } => Box::new(NpzFieldsCheck {
                fields: fields.clone(),
            }),
            Self::JsonFields { fields } => Box::new(JsonFieldsCheck {
                fields: fields.clone(),
            }),
            Self::Size {
                min_bytes,
                max_bytes,
            } => Box::new(SizeCheck {
                min_bytes: *min_bytes,
                max_bytes: *max_bytes,
            }),
        }
    }
}

fn read_prefix(path: &Path, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len);
    File::open(path)?.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Verifies a header signature instead of trusting the file extension.
#[derive(Debug, Clone)]
pub struct MagicCheck {
    signature: Vec<u8>,
    wrong_variants: Vec<(String, Vec<u8>)>,
}

impl StructuralCheck for MagicCheck {
    fn name(&self) -> &str {
        "magic"
    }

    fn check(&self, path: &Path, _size_bytes: u64) -> Result<(), CheckFailure> {
        let longest = self
            .wrong_variants
            .iter()
            .map(|(_, sig)| sig.len())
            .chain(std::iter::once(self.signature.len()))
            .max()
            .unwrap_or(0);

        let header = read_prefix(path, longest)
            .map_err(|e| CheckFailure::new(ReasonCode::Unreadable, e.to_string()))?;

        if header.starts_with(&self.signature) {
            return Ok(());
        }

        if let Some((name, _)) = self
            .wrong_variants
            .iter()
            .find(|(_, sig)| header.starts_with(sig))
        {
            return Err(CheckFailure::new(
                ReasonCode::WrongFormat,
                format!("header identifies {name}, not the required encoding"),
            ));
        }

        let shown = &header[..header.len().min(self.signature.len())];
        Err(CheckFailure::new(
            ReasonCode::BadSignature,
            format!(
                "expected header {}, found {}",
                hex::encode(&self.signature),
                hex::encode(shown)
            ),
        ))
    }
}

/// Verifies the presence of named arrays in an `.npz` archive.
#[derive(Debug, Clone)]
pub struct NpzFieldsCheck {
    fields: Vec<String>,
}

impl StructuralCheck for NpzFieldsCheck {
    fn name(&self) -> &str {
        "npz_fields"
    }

    fn check(&self, path: &Path, _size_bytes: u64) -> Result<(), CheckFailure> {
        let present = npz::field_names(path).map_err(|e| match e {
            npz::NpzError::Io(err) => CheckFailure::new(ReasonCode::Unreadable, err.to_string()),
            npz::NpzError::Malformed(_) => CheckFailure::new(ReasonCode::Unparseable, e.to_string()),
        })?;

        missing_fields(&self.fields, |field| present.iter().any(|p| p == field))
    }
}

/// Verifies the presence of top-level keys in a JSON object.
#[derive(Debug, Clone)]
pub struct JsonFieldsCheck {
    fields: Vec<String>,
}

impl StructuralCheck for JsonFieldsCheck {
    fn name(&self) -> &str {
        "json_fields"
    }

    fn check(&self, path: &Path, _size_bytes: u64) -> Result<(), CheckFailure> {
        let bytes = std::fs::read(path)
            .map_err(|e| CheckFailure::new(ReasonCode::Unreadable, e.to_string()))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| CheckFailure::new(ReasonCode::Unparseable, format!("invalid JSON: {e}")))?;
        let object = value.as_object().ok_or_else(|| {
            CheckFailure::new(ReasonCode::Unparseable, "top-level JSON value is not an object")
        })?;

        missing_fields(&self.fields, |field| object.contains_key(field))
    }
}

fn missing_fields(required: &[String], has: impl Fn(&str) -> bool) -> Result<(), CheckFailure> {
    let missing: Vec<&str> = required
        .iter()
        .map(String::as_str)
        .filter(|field| !has(field))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CheckFailure::new(
            ReasonCode::MissingFields,
            format!("missing required fields: {}", missing.join(", ")),
        ))
    }
}

/// Verifies size bounds.
#[derive(Debug, Clone)]
pub struct SizeCheck {
    min_bytes: Option<u64>,
    max_bytes: Option<u64>,
}

impl StructuralCheck for SizeCheck {
    fn name(&self) -> &str {
        "size"
    }

    fn check(&self, _path: &Path, size_bytes: u64) -> Result<(), CheckFailure> {
        if let Some(min) = self.min_bytes {
            if size_bytes < min {
                return Err(CheckFailure::new(
                    ReasonCode::TooSmall,
                    format!("{size_bytes} bytes is below the minimum of {min}"),
                ));
            }
        }
        if let Some(max) = self.max_bytes {
            if size_bytes > max {
                return Err(CheckFailure::new(
                    ReasonCode::TooLarge,
                    format!("{size_bytes} bytes exceeds the maximum of {max}"),
                ));
            }
        }
        Ok(())
    }
}
