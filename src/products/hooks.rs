use tracing::debug;

/// A committed write to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductChange {
    Saved(i64),
    Deleted(i64),
}

impl ProductChange {
    pub fn product_id(self) -> i64 {
        match self {
            Self::Saved(id) | Self::Deleted(id) => id,
        }
    }
}

/// Observer notified synchronously after a product write commits.
/// Implementations must not fail the request.
pub trait ProductHook: Send + Sync {
    fn on_change(&self, change: ProductChange);
}

/// Default hook; there is no product cache to invalidate yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProductHook;

impl ProductHook for NoopProductHook {
    fn on_change(&self, change: ProductChange) {
        debug!(product_id = change.product_id(), ?change, "product cache invalidation (noop)");
    }
}
