//! Downloadable module manifest.
//!
//! ```json
//! {
//!   "artifact": { "url": "https://cdn.example.com/home.zst", "sha256digest": "9f86d0…" },
//!   "assets": [
//!     { "device_density": 2.0, "artifact": { "url": "https://cdn.example.com/home@2x.zst", "sha256digest": "…" } }
//!   ],
//!   "dependencies": ["core"]
//! }
//! ```

use crate::density::DensityResolver;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub url: String,
    /// Hex-encoded SHA-256 of the artifact. Empty when unknown.
    #[serde(default, rename = "sha256digest", alias = "sha256")]
    pub sha256: String,
}

impl Artifact {
    pub fn new(url: impl Into<String>, sha256: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sha256: sha256.into(),
        }
    }
}

/// Resources built for one device density.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetVariant {
    pub device_density: f64,
    pub artifact: Artifact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub artifact: Artifact,
    #[serde(default)]
    pub assets: Vec<AssetVariant>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Manifest {
    pub fn new(artifact: Artifact) -> Self {
        Self {
            artifact,
            assets: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_asset(mut self, device_density: f64, artifact: Artifact) -> Self {
        self.assets.push(AssetVariant { device_density, artifact });
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).or_raise(|| ErrorKind::InvalidManifest("malformed manifest JSON".to_string()))
    }

    pub fn from_slice(json: &[u8]) -> Result<Self> {
        serde_json::from_slice(json).or_raise(|| ErrorKind::InvalidManifest("malformed manifest JSON".to_string()))
    }

    /// The asset variant closest to `device_density`.
    pub fn best_asset(&self, device_density: f64) -> Option<&AssetVariant> {
        let mut resolver = DensityResolver::with_capacity(self.assets.len());
        for asset in &self.assets {
            resolver.append_density(asset.device_density);
        }
        resolver.select(device_density).map(|index| &self.assets[index])
    }
}
