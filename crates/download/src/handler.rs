use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::any::Any;
use std::sync::Arc;

/// Type-erased value held by the in-memory item cache.
pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

/// Turns downloaded bytes into a value.
///
/// `preprocess` runs once on freshly downloaded bytes and its output is what
/// gets written to the disk cache. `transform` runs on every load that is not
/// served from memory, including disk cache hits.
#[async_trait]
pub trait ItemHandler: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    /// Short label used in logs and error messages.
    fn description(&self) -> &str;

    async fn preprocess(&self, local_filename: &str, data: Bytes) -> Result<Bytes> {
        let _ = local_filename;
        Ok(data)
    }

    async fn transform(&self, local_filename: &str, data: Bytes) -> Result<Self::Output>;
}

/// Serves the downloaded bytes unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesHandler;

#[async_trait]
impl ItemHandler for BytesHandler {
    type Output = Bytes;

    fn description(&self) -> &str {
        "bytes"
    }

    async fn transform(&self, _local_filename: &str, data: Bytes) -> Result<Bytes> {
        Ok(data)
    }
}

#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    fn description(&self) -> &str;
    async fn preprocess(&self, local_filename: &str, data: Bytes) -> Result<Bytes>;
    async fn transform(&self, local_filename: &str, data: Bytes) -> Result<AnyValue>;
}

pub(crate) struct Erased<H>(pub(crate) Arc<H>);

#[async_trait]
impl<H: ItemHandler> ErasedHandler for Erased<H> {
    fn description(&self) -> &str {
        self.0.description()
    }

    async fn preprocess(&self, local_filename: &str, data: Bytes) -> Result<Bytes> {
        self.0.preprocess(local_filename, data).await
    }

    async fn transform(&self, local_filename: &str, data: Bytes) -> Result<AnyValue> {
        let value = self.0.transform(local_filename, data).await?;
        Ok(Arc::new(value))
    }
}
