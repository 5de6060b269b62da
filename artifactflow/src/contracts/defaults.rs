//! The built-in 3D rigging pipeline.

use super::definition::RegistryDefinition;
use super::registry::StageContractRegistry;
use crate::errors::ConfigurationError;

const RIGGING_DEFINITION: &str = include_str!("rigging.json");

/// Returns the definition of the built-in rigging pipeline.
///
/// Five stages turn a binary glTF source asset into a rigged binary glTF:
/// mesh extraction, skeleton prediction, skinning prediction, structure merge
/// and final integration. Workers are expected on `PATH` as
/// `artifactflow-<stage>` executables; load a JSON definition to point the
/// stages elsewhere.
///
/// # Errors
///
/// Returns a configuration error if the embedded definition does not parse.
pub fn rigging_definition() -> Result<RegistryDefinition, ConfigurationError> {
    RegistryDefinition::from_json(RIGGING_DEFINITION)
}

impl StageContractRegistry {
    /// Loads the built-in rigging pipeline.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the embedded definition is inconsistent.
    pub fn rigging() -> Result<Self, ConfigurationError> {
        Self::load(rigging_definition()?)
    }
}
