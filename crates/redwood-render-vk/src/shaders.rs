// SPDX-License-Identifier: CEPL-1.0
use anyhow::{bail, Result};
use redwood_render::ShaderSource;

/// SPIR-V compiled from `shaders/` by the build script and baked into the binary.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbeddedShaders;

impl EmbeddedShaders {
    pub const NAMES: [&'static str; 2] = ["triangle.vert", "triangle.frag"];
}

impl ShaderSource for EmbeddedShaders {
    fn load_bytecode(&self, name: &str) -> Result<Vec<u8>> {
        let bytes: &[u8] = match name {
            "triangle.vert" => include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv")),
            "triangle.frag" => include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv")),
            other => bail!("no embedded shader named '{other}'"),
        };
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_blobs_are_spirv() {
        for name in EmbeddedShaders::NAMES {
            let code = EmbeddedShaders.load_bytecode(name).unwrap();
            let words = ash::util::read_spv(&mut std::io::Cursor::new(&code)).unwrap();
            assert_eq!(words[0], 0x0723_0203, "{name} lacks the SPIR-V magic");
        }
        assert!(EmbeddedShaders.load_bytecode("nope.frag").is_err());
    }
}
