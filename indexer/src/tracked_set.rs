/// Tracked-contract set (spec §3, §4.4.2, §5 shared-resource policy).
/// Read-heavy, reader/writer locked: many concurrent `Process` calls check
/// membership, deployments and cache-warming rarely insert.
use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

#[derive(Clone)]
pub struct TrackedSet {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl TrackedSet {
    pub fn new(seed: impl IntoIterator<Item = String>) -> Self {
        TrackedSet { inner: Arc::new(RwLock::new(seed.into_iter().collect())) }
    }

    pub async fn contains(&self, contract_id: &str) -> bool {
        self.inner.read().await.contains(contract_id)
    }

    /// Returns `true` if this was a new insertion (spec §4.4.3 cache
    /// warming on a Repository-backed hit).
    pub async fn insert(&self, contract_id: String) -> bool {
        self.inner.write().await.insert(contract_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_membership_is_visible_immediately() {
        let set = TrackedSet::new(vec!["C1".to_string()]);
        assert!(set.contains("C1").await);
        assert!(!set.contains("C2").await);
    }

    #[tokio::test]
    async fn insert_reports_whether_it_was_new() {
        let set = TrackedSet::new(Vec::new());
        assert!(set.insert("C1".to_string()).await);
        assert!(!set.insert("C1".to_string()).await);
        assert_eq!(set.len().await, 1);
    }

    #[tokio::test]
    async fn clones_share_the_same_underlying_set() {
        let set = TrackedSet::new(Vec::new());
        let clone = set.clone();
        clone.insert("C1".to_string()).await;
        assert!(set.contains("C1").await);
    }
}
