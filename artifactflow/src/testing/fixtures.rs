//! Fixture builders.

use crate::contracts::{RegistryDefinition, RoleSpec, StageContractRegistry, StageDefinition};
use crate::core::{ArtifactRole, StageId};
use crate::supervisor::CommandTemplate;
use std::path::Path;
use std::time::Duration;

/// Builds a stage id.
///
/// # Panics
///
/// Panics if the id is malformed.
#[must_use]
pub fn sid(id: &str) -> StageId {
    StageId::new(id).expect("fixture stage id is valid")
}

/// Builds an artifact role.
///
/// # Panics
///
/// Panics if the name is malformed.
#[must_use]
pub fn role(name: &str) -> ArtifactRole {
    ArtifactRole::new(name).expect("fixture role is valid")
}

/// A linear pipeline over `names`.
///
/// The job supplies seed role `seed` (`seed.bin`). Stage *i* has ordinal
/// *i + 1*, depends on stage *i - 1*, reads its output (or the seed), and
/// produces `{name}-out` as `{name}-out.bin`. Commands run `true`.
#[must_use]
pub fn toy_definition(names: &[&str]) -> RegistryDefinition {
    let mut def = RegistryDefinition::new("toy").with_seed(RoleSpec::new(role("seed"), "seed.bin"));
    let mut previous: Option<&str> = None;

    for (index, name) in names.iter().copied().enumerate() {
        let input = previous.map_or_else(|| role("seed"), |p| role(&format!("{p}-out")));
        let output = role(&format!("{name}-out"));
        let command = CommandTemplate::new("true").with_args([
            format!("{{input:{input}}}"),
            format!("{{output:{output}}}"),
        ]);
        let ordinal = u8::try_from(index + 1).expect("fixture has fewer than 256 stages");

        let mut stage = StageDefinition::new(sid(name), ordinal, command)
            .with_input(input)
            .with_output(RoleSpec::new(output, format!("{name}-out.bin")))
            .with_timeout(Duration::from_secs(10));
        if let Some(p) = previous {
            stage = stage.with_predecessor(sid(p));
        }
        def = def.with_stage(stage);
        previous = Some(name);
    }
    def
}

/// Loads [`toy_definition`].
///
/// # Panics
///
/// Panics if the definition does not load.
#[must_use]
pub fn toy_registry(names: &[&str]) -> StageContractRegistry {
    StageContractRegistry::load(toy_definition(names)).expect("toy registry loads")
}

/// Writes a file, creating parent directories.
///
/// # Panics
///
/// Panics on I/O failure.
pub fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create fixture directory");
    }
    std::fs::write(path, bytes).expect("write fixture file");
}

/// A minimal binary glTF header followed by padding.
#[must_use]
pub fn glb_bytes() -> Vec<u8> {
    let mut bytes = b"glTF".to_vec();
    bytes.extend_from_slice(&2u32.to_le_bytes());
    bytes.extend_from_slice(&20u32.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 8]);
    bytes
}

/// A glTF JSON document (the text variant of glTF).
#[must_use]
pub fn gltf_json_bytes() -> Vec<u8> {
    br#"{"asset": {"version": "2.0"}}"#.to_vec()
}

/// A binary FBX header followed by padding.
#[must_use]
pub fn binary_fbx_bytes() -> Vec<u8> {
    let mut bytes = b"Kaydara FBX Binary  \x00".to_vec();
    bytes.extend_from_slice(&[0x1a, 0x00]);
    bytes.extend_from_slice(&7400u32.to_le_bytes());
    bytes
}

/// An ASCII FBX document.
#[must_use]
pub fn ascii_fbx_bytes() -> Vec<u8> {
    b"; FBX 7.4.0 project file\n; ----------------------------------------------------\n".to_vec()
}

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// A stored (uncompressed) zip archive with one small member per name.
///
/// # Panics
///
/// Panics if the archive would exceed the classic zip limits.
#[must_use]
pub fn npz_archive(members: &[&str]) -> Vec<u8> {
    let payload = b"\x93NUMPY";
    let payload_len = u32::try_from(payload.len()).expect("payload fits");
    let mut out = Vec::new();
    let mut central = Vec::new();

    for name in members {
        let offset = u32::try_from(out.len()).expect("archive fits in 4 GiB");
        let name_len = u16::try_from(name.len()).expect("member name fits");

        push_u32(&mut out, 0x0403_4b50);
        push_u16(&mut out, 20);
        push_u16(&mut out, 0);
        push_u16(&mut out, 0);
        push_u32(&mut out, 0);
        push_u32(&mut out, 0);
        push_u32(&mut out, payload_len);
        push_u32(&mut out, payload_len);
        push_u16(&mut out, name_len);
        push_u16(&mut out, 0);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(payload);

        push_u32(&mut central, 0x0201_4b50);
        push_u16(&mut central, 20);
        push_u16(&mut central, 20);
        push_u16(&mut central, 0);
        push_u16(&mut central, 0);
        push_u32(&mut central, 0);
        push_u32(&mut central, 0);
        push_u32(&mut central, payload_len);
        push_u32(&mut central, payload_len);
        push_u16(&mut central, name_len);
        push_u16(&mut central, 0);
        push_u16(&mut central, 0);
        push_u16(&mut central, 0);
        push_u16(&mut central, 0);
        push_u32(&mut central, 0);
        push_u32(&mut central, offset);
        central.extend_from_slice(name.as_bytes());
    }

    let count = u16::try_from(members.len()).expect("member count fits");
    let cd_offset = u32::try_from(out.len()).expect("archive fits in 4 GiB");
    let cd_size = u32::try_from(central.len()).expect("directory fits");
    out.extend_from_slice(&central);
    push_u32(&mut out, 0x0605_4b50);
    push_u16(&mut out, 0);
    push_u16(&mut out, 0);
    push_u16(&mut out, count);
    push_u16(&mut out, count);
    push_u32(&mut out, cd_size);
    push_u32(&mut out, cd_offset);
    push_u16(&mut out, 0);
    out
}
