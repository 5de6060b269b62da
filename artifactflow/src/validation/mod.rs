//! Artifact validation.
//!
//! This module provides:
//! - The baseline existence/size validator
//! - Declarative, role-specific structural checks (magic bytes, npz and JSON
//!   fields, size bounds)
//! - A pluggable trait for custom checks

mod checks;
mod npz;
mod validator;

pub use checks::{
    ArtifactCheck, CheckFailure, JsonFieldsCheck, KnownVariant, MagicCheck, NpzFieldsCheck,
    SizeCheck, StructuralCheck,
};
pub use npz::{field_names as npz_field_names, NpzError};
pub use validator::{sha256_file, ArtifactValidator};

