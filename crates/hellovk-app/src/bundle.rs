// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;

use hellovk_platform::DirAssetSource;
use hellovk_render::{AssetError, AssetSource};

const VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/shader.vert.spv"));
const FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/shader.frag.spv"));

/// Files on disk win; anything missing there is served from the binary.
pub struct BundledAssets {
    disk: DirAssetSource,
    embedded: HashMap<String, &'static [u8]>,
}

impl BundledAssets {
    pub fn new(disk: DirAssetSource) -> Self {
        Self {
            disk,
            embedded: HashMap::new(),
        }
    }

    /// Build-time compiled shaders under their logical paths.
    pub fn with_shaders(disk: DirAssetSource, vertex_path: &str, fragment_path: &str) -> Self {
        Self::new(disk)
            .embed(vertex_path, VERT_SPV)
            .embed(fragment_path, FRAG_SPV)
    }

    pub fn embed(mut self, path: &str, bytes: &'static [u8]) -> Self {
        self.embedded.insert(path.to_owned(), bytes);
        self
    }
}

impl AssetSource for BundledAssets {
    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        match self.disk.read(path) {
            Err(AssetError::NotFound(_)) => self
                .embedded
                .get(path)
                .map(|b| b.to_vec())
                .ok_or_else(|| AssetError::NotFound(path.to_owned())),
            other => other,
        }
    }
}
