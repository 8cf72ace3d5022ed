// SPDX-License-Identifier: CEPL-1.0
use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use portable_atomic::{AtomicU32, Ordering};

static NEXT_SHADER_ID: AtomicU32 = AtomicU32::new(0);

/// Process-wide shader identity, assigned once per `Shader::new`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(u32);

impl ShaderId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shader#{}", self.0)
    }
}

/// A vertex/fragment pair, named by the identifiers a `ShaderSource` resolves.
#[derive(Clone, Debug)]
pub struct Shader {
    id: ShaderId,
    vertex: String,
    fragment: String,
}

impl Shader {
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        let id = ShaderId(NEXT_SHADER_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            id,
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }

    pub fn id(&self) -> ShaderId {
        self.id
    }
    pub fn vertex(&self) -> &str {
        &self.vertex
    }
    pub fn fragment(&self) -> &str {
        &self.fragment
    }
}

/// Supplies compiled bytecode for a shader identifier. Never compiles text.
pub trait ShaderSource {
    fn load_bytecode(&self, name: &str) -> Result<Vec<u8>>;
}

/// Reads `<dir>/<name>.spv`.
#[derive(Clone, Debug)]
pub struct SpirvDir {
    dir: PathBuf,
}

impl SpirvDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.spv"))
    }
}

impl ShaderSource for SpirvDir {
    fn load_bytecode(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name);
        std::fs::read(&path).with_context(|| format!("read {}", path.display()))
    }
}
