//! Stage contracts: declarations, the checked registry and canonical paths.

mod defaults;
mod definition;
mod registry;
mod resolver;

pub use defaults::rigging_definition;
pub use definition::{RegistryDefinition, RoleSpec, StageDefinition};
pub use registry::{RoleOwner, StageContractRegistry};
pub use resolver::{ArtifactPathResolver, JobRoot, SEED_DIR};
