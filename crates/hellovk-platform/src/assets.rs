// SPDX-License-Identifier: CEPL-1.0
use std::{
    fs,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use hellovk_render::{AssetError, AssetSource};
use tracing::debug;

/// Serves assets from a directory; logical paths use `/` and may not escape the root.
#[derive(Clone, Debug)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, logical: &str) -> Option<PathBuf> {
        let rel = Path::new(logical);
        let clean = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        clean.then(|| self.root.join(rel))
    }
}

impl AssetSource for DirAssetSource {
    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        let full = self
            .resolve(path)
            .ok_or_else(|| AssetError::NotFound(path.to_owned()))?;
        debug!("asset {} -> {}", path, full.display());
        fs::read(&full).map_err(|source| match source.kind() {
            ErrorKind::NotFound => AssetError::NotFound(path.to_owned()),
            _ => AssetError::Io {
                path: path.to_owned(),
                source,
            },
        })
    }
}
