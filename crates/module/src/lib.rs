//! Modules and their resources, described by downloadable manifests.
//!
//! A module is an archive downloaded once and kept compressed in the disk
//! cache. Its resources come in one archive per device density; the closest
//! variant is downloaded and extracted into individual files so they can be
//! served by `file://` URL.

mod density;
pub mod error;
mod handlers;
mod manager;
mod manifest;

pub use crate::density::DensityResolver;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::handlers::{ModuleResources, sanitize_asset_filename};
pub use crate::manager::{MODULE_PREFIX, ModuleManager, RESOURCES_PREFIX};
pub use crate::manifest::{Artifact, AssetVariant, Manifest};
