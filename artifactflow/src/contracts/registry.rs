//! The stage contract registry.

use super::definition::{RegistryDefinition, RoleSpec, StageDefinition};
use super::resolver::{ArtifactPathResolver, SEED_DIR};
use crate::core::{ArtifactRole, StageId};
use crate::errors::{codes, ConfigurationError, ContractErrorInfo, CycleDetectedError, ResolveError};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Who supplies a role's artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOwner {
    /// The job supplies it at intake.
    Seed,
    /// A stage produces it.
    Stage(StageId),
}

#[derive(Debug, Clone)]
struct RoleEntry {
    spec: RoleSpec,
    owner: RoleOwner,
}

fn contract_error(
    code: &str,
    summary: &str,
    message: String,
    stages: Vec<String>,
    roles: Vec<String>,
) -> ConfigurationError {
    ConfigurationError::new(message)
        .with_stages(stages)
        .with_roles(roles)
        .with_error_info(ContractErrorInfo::new(code, summary))
}

fn check_file_name(owner: &str, spec: &RoleSpec) -> Result<(), ConfigurationError> {
    let name = spec.file_name.as_str();
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name().is_some_and(|f| f == name);
    if plain {
        return Ok(());
    }
    Err(contract_error(
        codes::INVALID_NAME,
        "File name is not a plain name",
        format!(
            "Role '{}' of '{owner}' has file name '{name}'; use a plain file name without separators",
            spec.role
        ),
        vec![owner.to_string()],
        vec![spec.role.to_string()],
    ))
}

/// The immutable set of stage contracts for one pipeline.
///
/// Built once with [`StageContractRegistry::load`], which refuses any
/// inconsistent definition. After that it is shared read-only (typically
/// behind an `Arc`) and every lookup is infallible for registered names.
#[derive(Debug, Clone)]
pub struct StageContractRegistry {
    name: String,
    stages: HashMap<StageId, StageDefinition>,
    order: Vec<StageId>,
    roles: HashMap<ArtifactRole, RoleEntry>,
    seeds: Vec<ArtifactRole>,
}

impl StageContractRegistry {
    /// Loads and checks a registry definition.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] carrying a contract code for the first
    /// inconsistency found: no stages, duplicate ids or ordinals, a zero
    /// timeout, a malformed file name, an unknown predecessor, a dependency
    /// cycle, a role with two owners, two roles sharing a path, an input with
    /// no upstream producer, a critical stage fed by a non-critical one, or an
    /// invalid command template.
    #[allow(clippy::too_many_lines)]
    pub fn load(definition: RegistryDefinition) -> Result<Self, ConfigurationError> {
        let RegistryDefinition {
            name,
            seeds: seed_specs,
            stages: stage_list,
        } = definition;

        if stage_list.is_empty() {
            return Err(contract_error(
                codes::EMPTY,
                "Registry has no stages",
                format!("Registry '{name}' declares no stages"),
                Vec::new(),
                Vec::new(),
            ));
        }

        let mut stages: HashMap<StageId, StageDefinition> = HashMap::new();
        let mut ordinals: HashMap<u8, StageId> = HashMap::new();
        let mut declared = Vec::with_capacity(stage_list.len());

        for stage in stage_list {
            if stages.contains_key(&stage.id) {
                return Err(contract_error(
                    codes::DUPLICATE_STAGE,
                    "Duplicate stage id",
                    format!("Stage '{}' is declared more than once", stage.id),
                    vec![stage.id.to_string()],
                    Vec::new(),
                ));
            }
            if stage.ordinal == 0 {
                return Err(contract_error(
                    codes::DUPLICATE_STAGE,
                    "Reserved ordinal",
                    format!(
                        "Stage '{}' uses ordinal 0, which is reserved for {SEED_DIR}",
                        stage.id
                    ),
                    vec![stage.id.to_string()],
                    Vec::new(),
                ));
            }
            if let Some(other) = ordinals.get(&stage.ordinal) {
                return Err(contract_error(
                    codes::DUPLICATE_STAGE,
                    "Duplicate stage ordinal",
                    format!(
                        "Stages '{other}' and '{}' share ordinal {:02}",
                        stage.id, stage.ordinal
                    ),
                    vec![other.to_string(), stage.id.to_string()],
                    Vec::new(),
                ));
            }
            if stage.checked_timeout().is_none() {
                return Err(contract_error(
                    codes::INVALID_TIMEOUT,
                    "Stage timeout must be positive",
                    format!(
                        "Stage '{}' has timeout {} s; every stage needs a positive, bounded timeout",
                        stage.id, stage.timeout_seconds
                    ),
                    vec![stage.id.to_string()],
                    Vec::new(),
                ));
            }
            if stage.outputs.is_empty() {
                return Err(contract_error(
                    codes::EMPTY,
                    "Stage declares no outputs",
                    format!("Stage '{}' declares no output roles", stage.id),
                    vec![stage.id.to_string()],
                    Vec::new(),
                ));
            }
            ordinals.insert(stage.ordinal, stage.id.clone());
            declared.push(stage.id.clone());
            stages.insert(stage.id.clone(), stage);
        }

        for id in &declared {
            let stage = &stages[id];
            for pred in &stage.predecessors {
                if !stages.contains_key(pred) {
                    return Err(contract_error(
                        codes::MISSING_DEP,
                        "Missing predecessor",
                        format!("Stage '{id}' depends on '{pred}' which does not exist"),
                        vec![id.to_string(), pred.to_string()],
                        Vec::new(),
                    ));
                }
            }
        }

        if let Some(cycle) = detect_cycle(&declared, &stages) {
            return Err(CycleDetectedError::new(cycle).into());
        }

        let mut roles: HashMap<ArtifactRole, RoleEntry> = HashMap::new();
        let mut owned: Vec<(RoleSpec, RoleOwner)> = seed_specs
            .iter()
            .cloned()
            .map(|spec| (spec, RoleOwner::Seed))
            .collect();
        for id in &declared {
            owned.extend(
                stages[id]
                    .outputs
                    .iter()
                    .cloned()
                    .map(|spec| (spec, RoleOwner::Stage(id.clone()))),
            );
        }

        let mut paths: HashMap<String, ArtifactRole> = HashMap::new();
        for (spec, owner) in owned {
            let (owner_name, dir) = match &owner {
                RoleOwner::Seed => ("seed".to_string(), SEED_DIR.to_string()),
                RoleOwner::Stage(id) => (id.to_string(), stages[id].dir_name()),
            };
            check_file_name(&owner_name, &spec)?;

            if let Some(existing) = roles.get(&spec.role) {
                let first = match &existing.owner {
                    RoleOwner::Seed => "seed".to_string(),
                    RoleOwner::Stage(id) => id.to_string(),
                };
                return Err(contract_error(
                    codes::AMBIGUOUS_OWNER,
                    "Role has more than one owner",
                    format!(
                        "Role '{}' is declared by both '{first}' and '{owner_name}'",
                        spec.role
                    ),
                    vec![first, owner_name],
                    vec![spec.role.to_string()],
                ));
            }

            let relative = format!("{dir}/{}", spec.file_name).to_lowercase();
            if let Some(other) = paths.get(&relative) {
                return Err(contract_error(
                    codes::PATH_COLLISION,
                    "Two roles resolve to the same path",
                    format!(
                        "Roles '{other}' and '{}' both resolve to '{relative}'",
                        spec.role
                    ),
                    vec![owner_name],
                    vec![other.to_string(), spec.role.to_string()],
                ));
            }
            paths.insert(relative, spec.role.clone());
            roles.insert(spec.role.clone(), RoleEntry { spec, owner });
        }

        let ancestors = ancestors(&declared, &stages);
        for id in &declared {
            let stage = &stages[id];
            for input in &stage.inputs {
                let producer = match roles.get(input).map(|entry| &entry.owner) {
                    Some(RoleOwner::Seed) => continue,
                    Some(RoleOwner::Stage(producer)) if ancestors[id].contains(producer) => producer,
                    other => {
                        let detail = match other {
                            Some(RoleOwner::Stage(producer)) => {
                                format!("its producer '{producer}' is not an upstream stage")
                            }
                            _ => "no stage produces it and it is not a seed role".to_string(),
                        };
                        return Err(contract_error(
                            codes::UNPRODUCED_INPUT,
                            "Input has no upstream producer",
                            format!("Stage '{id}' requires role '{input}' but {detail}"),
                            vec![id.to_string()],
                            vec![input.to_string()],
                        ));
                    }
                };
                if stage.critical && !stages[producer].critical {
                    return Err(contract_error(
                        codes::OPTIONAL_DEPENDENCY,
                        "Critical stage depends on an optional stage",
                        format!(
                            "Critical stage '{id}' requires role '{input}' from non-critical stage '{producer}'"
                        ),
                        vec![id.to_string(), producer.to_string()],
                        vec![input.to_string()],
                    ));
                }
            }
            stage.command.validate_for(stage)?;
        }

        let order = topological_order(&declared, &stages);
        let seeds = seed_specs.into_iter().map(|spec| spec.role).collect();

        info!(
            registry = %name,
            stages = order.len(),
            roles = roles.len(),
            "Loaded stage contract registry"
        );
        debug!(order = ?order, "Execution order");

        Ok(Self {
            name,
            stages,
            order,
            roles,
            seeds,
        })
    }

    /// Loads a registry from a JSON definition file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read, parsed or
    /// checked.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        Self::load(RegistryDefinition::from_file(path)?)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the registry has no stages. A loaded registry never does.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stages in execution order: dependencies first, ties broken by ordinal.
    #[must_use]
    pub fn execution_order(&self) -> &[StageId] {
        &self.order
    }

    /// Returns the definition of a stage.
    #[must_use]
    pub fn definition(&self, stage: &StageId) -> Option<&StageDefinition> {
        self.stages.get(stage)
    }

    fn require(&self, stage: &StageId) -> Result<&StageDefinition, ResolveError> {
        self.definition(stage).ok_or_else(|| ResolveError::UnknownStage {
            stage: stage.to_string(),
        })
    }

    /// Ordered predecessors of a stage.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownStage`] for an unregistered stage.
    pub fn predecessors_of(&self, stage: &StageId) -> Result<&[StageId], ResolveError> {
        Ok(&self.require(stage)?.predecessors)
    }

    /// Roles a stage requires.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownStage`] for an unregistered stage.
    pub fn required_inputs_of(&self, stage: &StageId) -> Result<&[ArtifactRole], ResolveError> {
        Ok(&self.require(stage)?.inputs)
    }

    /// Roles a stage produces.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownStage`] for an unregistered stage.
    pub fn produced_outputs_of(&self, stage: &StageId) -> Result<&[RoleSpec], ResolveError> {
        Ok(&self.require(stage)?.outputs)
    }

    /// Looks up a role by name.
    #[must_use]
    pub fn role(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.get(name).map(|entry| &entry.spec)
    }

    /// Returns the owner of a role.
    #[must_use]
    pub fn owner_of(&self, role: &ArtifactRole) -> Option<&RoleOwner> {
        self.roles.get(role).map(|entry| &entry.owner)
    }

    /// Iterates over every registered role.
    pub fn role_specs(&self) -> impl Iterator<Item = &RoleSpec> {
        self.roles.values().map(|entry| &entry.spec)
    }

    /// Iterates over the seed roles in declaration order.
    pub fn seed_roles(&self) -> impl Iterator<Item = &RoleSpec> {
        self.seeds.iter().filter_map(|role| self.role(role.as_str()))
    }

    /// Returns a path resolver for this registry.
    #[must_use]
    pub fn resolver(&self) -> ArtifactPathResolver<'_> {
        ArtifactPathResolver::new(self)
    }
}

fn detect_cycle(
    declared: &[StageId],
    stages: &HashMap<StageId, StageDefinition>,
) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for id in declared {
        if !visited.contains(id) {
            if let Some(cycle) = dfs_cycle(id, stages, &mut visited, &mut rec_stack, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_cycle<'a>(
    node: &'a StageId,
    stages: &'a HashMap<StageId, StageDefinition>,
    visited: &mut HashSet<&'a StageId>,
    rec_stack: &mut HashSet<&'a StageId>,
    path: &mut Vec<&'a StageId>,
) -> Option<Vec<String>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(stage) = stages.get(node) {
        for pred in &stage.predecessors {
            if !visited.contains(pred) {
                if let Some(cycle) = dfs_cycle(pred, stages, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(pred) {
                let start = path.iter().position(|n| *n == pred).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
                cycle.push(pred.to_string());
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(node);
    None
}

fn ancestors(
    declared: &[StageId],
    stages: &HashMap<StageId, StageDefinition>,
) -> HashMap<StageId, HashSet<StageId>> {
    let mut result = HashMap::new();
    for id in declared {
        let mut seen = HashSet::new();
        let mut stack: Vec<&StageId> = stages[id].predecessors.iter().collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(stages[next].predecessors.iter());
            }
        }
        result.insert(id.clone(), seen);
    }
    result
}

fn topological_order(
    declared: &[StageId],
    stages: &HashMap<StageId, StageDefinition>,
) -> Vec<StageId> {
    let mut remaining: HashMap<&StageId, usize> = declared
        .iter()
        .map(|id| {
            let unique: HashSet<&StageId> = stages[id].predecessors.iter().collect();
            (id, unique.len())
        })
        .collect();
    let mut ready: BTreeSet<(u8, &StageId)> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| (stages[*id].ordinal, *id))
        .collect();

    let mut order = Vec::with_capacity(declared.len());
    while let Some((_, id)) = ready.pop_first() {
        order.push(id.clone());
        for candidate in declared {
            if stages[candidate].predecessors.contains(id) {
                if let Some(count) = remaining.get_mut(candidate) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert((stages[candidate].ordinal, candidate));
                    }
                }
            }
        }
    }
    order
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
