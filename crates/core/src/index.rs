use std::collections::HashSet;

/// Read-only view of the local store: which media items are already tracked.
///
/// Implementations must tolerate concurrent queries without coordination.
#[async_trait::async_trait]
pub trait LocalItemIndex: Send + Sync {
    async fn exists(&self, native_id: &str) -> Result<bool, IndexError>;
}

#[derive(Debug, thiserror::Error)]
#[error("local index lookup failed: {0}")]
pub struct IndexError(pub String);

/// Fixed in-memory index, for tests and for running without a store.
#[derive(Debug, Clone, Default)]
pub struct StaticItemIndex {
    ids: HashSet<String>,
}

impl StaticItemIndex {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait::async_trait]
impl LocalItemIndex for StaticItemIndex {
    async fn exists(&self, native_id: &str) -> Result<bool, IndexError> {
        Ok(self.ids.contains(native_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_index_answers_membership() {
        let index = StaticItemIndex::new(["101", "202"]);
        assert!(index.exists("101").await.unwrap());
        assert!(!index.exists("303").await.unwrap());
    }
}
