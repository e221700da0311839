use derive_more::Display;

/// Identifies an asset.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetKey {
    /// Loaded straight from a URL.
    #[display("{_0}")]
    Url(String),
    /// Shipped with a module, either in its downloadable resources or locally.
    #[display("{module}:{path}")]
    Bundle { module: String, path: String },
    /// Bytes handed to [`AssetsManager::create_asset_with_bytes`](crate::AssetsManager::create_asset_with_bytes).
    #[display("bytes://{_0}")]
    Bytes(u64),
}

impl AssetKey {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn bundle(module: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Bundle {
            module: module.into(),
            path: path.into(),
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, Self::Url(_))
    }

    /// Location of keys that need no resolving.
    pub(crate) fn direct_location(&self) -> Option<AssetLocation> {
        match self {
            Self::Url(url) => Some(AssetLocation::new(url.clone(), false)),
            Self::Bytes(_) => Some(AssetLocation::new(self.to_string(), true)),
            Self::Bundle { .. } => None,
        }
    }
}

/// Where an asset can be loaded from.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
#[display("{url}")]
pub struct AssetLocation {
    pub url: String,
    /// Served from the device rather than fetched remotely.
    pub is_local: bool,
}

impl AssetLocation {
    pub fn new(url: impl Into<String>, is_local: bool) -> Self {
        Self {
            url: url.into(),
            is_local,
        }
    }

    /// Scheme of the URL: `https` for `https://…`, `data` for `data:…`.
    pub fn scheme(&self) -> &str {
        match self.url.split_once(':') {
            Some((scheme, _)) => scheme,
            None => "",
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputType {
    #[display("bytes")]
    Bytes,
    #[display("image")]
    Image,
    #[display("video")]
    Video,
    #[display("animation")]
    Animation,
}

/// What a consumer wants an asset rendered as. Consumers with equal specs on
/// the same location share one load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadSpecs {
    pub output_type: OutputType,
    pub width: u32,
    pub height: u32,
    pub filter: Option<String>,
}

impl LoadSpecs {
    pub fn new(output_type: OutputType) -> Self {
        Self {
            output_type,
            width: 0,
            height: 0,
            filter: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}
