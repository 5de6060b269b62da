use super::*;
use crate::supervisor::CommandTemplate;
use crate::testing::{role, sid, toy_definition, toy_registry};
use pretty_assertions::assert_eq;

fn stage(id: &str, ordinal: u8) -> StageDefinition {
    StageDefinition::new(sid(id), ordinal, CommandTemplate::new("true"))
        .with_output(RoleSpec::new(role(&format!("{id}-out")), format!("{id}.bin")))
}

fn load_err(def: RegistryDefinition) -> ConfigurationError {
    StageContractRegistry::load(def).unwrap_err()
}

#[test]
fn test_load_toy_registry() {
    let registry = toy_registry(&["a", "b", "c"]);
    assert_eq!(registry.len(), 3);
    assert_eq!(registry.execution_order(), &[sid("a"), sid("b"), sid("c")]);
    assert_eq!(registry.predecessors_of(&sid("c")).unwrap(), &[sid("b")]);
    assert_eq!(registry.required_inputs_of(&sid("b")).unwrap(), &[role("a-out")]);
    assert_eq!(
        registry.produced_outputs_of(&sid("c")).unwrap()[0].file_name,
        "c-out.bin"
    );
    assert_eq!(registry.owner_of(&role("seed")), Some(&RoleOwner::Seed));
    assert_eq!(
        registry.owner_of(&role("b-out")),
        Some(&RoleOwner::Stage(sid("b")))
    );
    assert_eq!(registry.seed_roles().count(), 1);
    assert_eq!(registry.role_specs().count(), 4);
}

#[test]
fn test_unknown_stage_lookup() {
    let registry = toy_registry(&["a"]);
    assert!(matches!(
        registry.predecessors_of(&sid("zzz")),
        Err(ResolveError::UnknownStage { .. })
    ));
}

#[test]
fn test_empty_registry() {
    let err = load_err(RegistryDefinition::new("empty"));
    assert_eq!(err.code(), Some(codes::EMPTY));
}

#[test]
fn test_stage_without_outputs() {
    let def = RegistryDefinition::new("p").with_stage(StageDefinition::new(
        sid("a"),
        1,
        CommandTemplate::new("true"),
    ));
    assert_eq!(load_err(def).code(), Some(codes::EMPTY));
}

#[test]
fn test_duplicate_stage_id_and_ordinal() {
    let def = RegistryDefinition::new("p")
        .with_stage(stage("a", 1))
        .with_stage(stage("a", 2));
    assert_eq!(load_err(def).code(), Some(codes::DUPLICATE_STAGE));

    let def = RegistryDefinition::new("p")
        .with_stage(stage("a", 1))
        .with_stage(stage("b", 1));
    let err = load_err(def);
    assert_eq!(err.code(), Some(codes::DUPLICATE_STAGE));
    assert_eq!(err.stages, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_reserved_ordinal() {
    let def = RegistryDefinition::new("p").with_stage(stage("a", 0));
    assert_eq!(load_err(def).code(), Some(codes::DUPLICATE_STAGE));
}

#[test]
fn test_zero_timeout() {
    let def = RegistryDefinition::new("p")
        .with_stage(stage("a", 1).with_timeout(std::time::Duration::ZERO));
    assert_eq!(load_err(def).code(), Some(codes::INVALID_TIMEOUT));
}

#[test]
fn test_unrepresentable_timeouts() {
    for seconds in [1e20, f64::INFINITY, f64::NAN, -1.0, 1e-12] {
        let mut a = stage("a", 1);
        a.timeout_seconds = seconds;
        let def = RegistryDefinition::new("p").with_stage(a);
        assert_eq!(load_err(def).code(), Some(codes::INVALID_TIMEOUT), "{seconds}");
    }
}

#[test]
fn test_loaded_timeout_is_never_zero() {
    let mut a = stage("a", 1);
    a.timeout_seconds = 86_400.0 * 365.0;
    let registry = StageContractRegistry::load(RegistryDefinition::new("p").with_stage(a)).unwrap();
    let timeout = registry.definition(&sid("a")).unwrap().timeout();
    assert_eq!(timeout, std::time::Duration::from_secs(86_400 * 365));
}

#[test]
fn test_missing_predecessor() {
    let def = RegistryDefinition::new("p").with_stage(stage("a", 1).with_predecessor(sid("ghost")));
    let err = load_err(def);
    assert_eq!(err.code(), Some(codes::MISSING_DEP));
    assert!(err.message.contains("ghost"));
}

#[test]
fn test_cycle_detected() {
    let def = RegistryDefinition::new("p")
        .with_stage(stage("a", 1).with_predecessor(sid("c")))
        .with_stage(stage("b", 2).with_predecessor(sid("a")))
        .with_stage(stage("c", 3).with_predecessor(sid("b")));
    let err = load_err(def);
    assert_eq!(err.code(), Some(codes::CYCLE));
    assert_eq!(err.stages.first(), err.stages.last());
    assert_eq!(err.stages.len(), 4);
}

#[test]
fn test_self_dependency_is_cycle() {
    let def = RegistryDefinition::new("p").with_stage(stage("a", 1).with_predecessor(sid("a")));
    assert_eq!(load_err(def).code(), Some(codes::CYCLE));
}

#[test]
fn test_ambiguous_owner() {
    let def = RegistryDefinition::new("p")
        .with_stage(stage("a", 1))
        .with_stage(
            StageDefinition::new(sid("b"), 2, CommandTemplate::new("true"))
                .with_output(RoleSpec::new(role("a-out"), "other.bin")),
        );
    let err = load_err(def);
    assert_eq!(err.code(), Some(codes::AMBIGUOUS_OWNER));
    assert_eq!(err.roles, vec!["a-out".to_string()]);
}

#[test]
fn test_stage_redeclaring_seed_role() {
    let def = RegistryDefinition::new("p")
        .with_seed(RoleSpec::new(role("a-out"), "seed.bin"))
        .with_stage(stage("a", 1));
    assert_eq!(load_err(def).code(), Some(codes::AMBIGUOUS_OWNER));
}

#[test]
fn test_colliding_templates_fail() {
    let def = RegistryDefinition::new("p").with_stage(
        StageDefinition::new(sid("a"), 1, CommandTemplate::new("true"))
            .with_output(RoleSpec::new(role("first"), "data.bin"))
            .with_output(RoleSpec::new(role("second"), "DATA.bin")),
    );
    let err = load_err(def);
    assert_eq!(err.code(), Some(codes::PATH_COLLISION));
    assert_eq!(err.roles, vec!["first".to_string(), "second".to_string()]);
}

#[test]
fn test_bad_file_names() {
    for bad in ["", ".", "..", "sub/file.bin", "..\\up.bin"] {
        let def = RegistryDefinition::new("p").with_stage(
            StageDefinition::new(sid("a"), 1, CommandTemplate::new("true"))
                .with_output(RoleSpec::new(role("out"), bad)),
        );
        assert_eq!(load_err(def).code(), Some(codes::INVALID_NAME), "{bad:?}");
    }
}

#[test]
fn test_unproduced_input() {
    let def = RegistryDefinition::new("p").with_stage(stage("a", 1).with_input(role("nowhere")));
    assert_eq!(load_err(def).code(), Some(codes::UNPRODUCED_INPUT));
}

#[test]
fn test_input_from_non_ancestor() {
    // b reads a's output but does not list a as a predecessor.
    let def = RegistryDefinition::new("p")
        .with_stage(stage("a", 1))
        .with_stage(stage("b", 2).with_input(role("a-out")));
    let err = load_err(def);
    assert_eq!(err.code(), Some(codes::UNPRODUCED_INPUT));
    assert!(err.message.contains("not an upstream stage"));
}

#[test]
fn test_transitive_producer_allowed() {
    let def = RegistryDefinition::new("p")
        .with_stage(stage("a", 1))
        .with_stage(stage("b", 2).with_predecessor(sid("a")))
        .with_stage(
            stage("c", 3)
                .with_predecessor(sid("b"))
                .with_input(role("a-out")),
        );
    assert!(StageContractRegistry::load(def).is_ok());
}

#[test]
fn test_critical_stage_fed_by_optional_stage() {
    let def = RegistryDefinition::new("p")
        .with_stage(stage("a", 1).with_critical(false))
        .with_stage(
            stage("b", 2)
                .with_predecessor(sid("a"))
                .with_input(role("a-out")),
        );
    assert_eq!(load_err(def).code(), Some(codes::OPTIONAL_DEPENDENCY));

    let def = RegistryDefinition::new("p")
        .with_stage(stage("a", 1).with_critical(false))
        .with_stage(
            stage("b", 2)
                .with_predecessor(sid("a"))
                .with_input(role("a-out"))
                .with_critical(false),
        );
    assert!(StageContractRegistry::load(def).is_ok());
}

#[test]
fn test_template_referencing_undeclared_role() {
    let mut def = toy_definition(&["a", "b"]);
    def.stages[1].command = CommandTemplate::new("tool").with_arg("{output:a-out}");
    let err = load_err(def);
    assert_eq!(err.code(), Some(codes::INVALID_TEMPLATE));
    assert_eq!(err.stages, vec!["b".to_string()]);

    let mut def = toy_definition(&["a"]);
    def.stages[0].command = CommandTemplate::new("tool").with_arg("{workdir}");
    assert_eq!(load_err(def).code(), Some(codes::INVALID_TEMPLATE));
}

#[test]
fn test_execution_order_respects_dependencies_then_ordinal() {
    // Diamond: a -> {b, c} -> d, with c declared before b.
    let def = RegistryDefinition::new("p")
        .with_stage(stage("d", 4).with_predecessor(sid("b")).with_predecessor(sid("c")))
        .with_stage(stage("c", 3).with_predecessor(sid("a")))
        .with_stage(stage("b", 2).with_predecessor(sid("a")))
        .with_stage(stage("a", 1));
    let registry = StageContractRegistry::load(def).unwrap();
    assert_eq!(
        registry.execution_order(),
        &[sid("a"), sid("b"), sid("c"), sid("d")]
    );
}

#[test]
fn test_duplicate_predecessor_entries() {
    let def = RegistryDefinition::new("p")
        .with_stage(stage("a", 1))
        .with_stage(stage("b", 2).with_predecessor(sid("a")).with_predecessor(sid("a")));
    let registry = StageContractRegistry::load(def).unwrap();
    assert_eq!(registry.execution_order(), &[sid("a"), sid("b")]);
}

#[test]
fn test_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");
    let json = serde_json::to_string_pretty(&toy_definition(&["a", "b"])).unwrap();
    std::fs::write(&path, json).unwrap();

    let registry = StageContractRegistry::from_file(&path).unwrap();
    assert_eq!(registry.execution_order(), &[sid("a"), sid("b")]);

    let err = StageContractRegistry::from_file(&dir.path().join("missing.json")).unwrap_err();
    assert_eq!(err.code(), Some(codes::CONFIG_LOAD));
}
