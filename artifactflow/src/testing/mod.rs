//! Test support for code driving artifactflow pipelines.
//!
//! This module provides:
//! - Name helpers and small registry fixtures
//! - Byte fixtures for the rigging formats (GLB, FBX, NPZ)
//! - A recording supervisor stub that never spawns processes

mod fixtures;
mod recording;

pub use fixtures::{
    ascii_fbx_bytes, binary_fbx_bytes, glb_bytes, gltf_json_bytes, npz_archive, role, sid,
    toy_definition, toy_registry, write_file,
};
pub use recording::{RecordingSupervisor, StubAction};
