//! Policy Cache - the one piece of state shared across loops
//!
//! Holds exactly one constraint set. The synchronizer replaces it wholesale;
//! validators take a snapshot (an `Arc` clone under a read lock) and evaluate
//! against that, so a pass never holds the lock and never sees a set that
//! mixes two sync cycles.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::grpc::pb::Constraint;
use crate::metrics::POLICY_CONSTRAINTS;

/// An immutable view of the installed constraint set
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    /// Bumped on every replace; 0 means nothing installed yet
    pub generation: u64,
    pub constraints: Arc<Vec<Constraint>>,
}

/// Thread-safe holder of the current constraint set
#[derive(Debug, Default)]
pub struct PolicyCache {
    current: RwLock<PolicySnapshot>,
}

impl PolicyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new constraint set, replacing the previous one atomically
    ///
    /// An empty set is a legitimate policy and clears whatever was there.
    pub async fn set(&self, constraints: Vec<Constraint>) {
        let count = constraints.len();
        let constraints = Arc::new(constraints);

        let mut current = self.current.write().await;
        current.generation += 1;
        current.constraints = constraints;
        drop(current);

        POLICY_CONSTRAINTS.set(count as f64);
    }

    /// The currently installed constraints
    pub async fn get(&self) -> Arc<Vec<Constraint>> {
        Arc::clone(&self.current.read().await.constraints)
    }

    /// Constraints plus the generation they were installed as
    pub async fn snapshot(&self) -> PolicySnapshot {
        self.current.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraint(name: &str) -> Constraint {
        Constraint {
            kind: "PodConstraint".to_string(),
            namespace: "default".to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_by_default() {
        let cache = PolicyCache::new();
        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.generation, 0);
        assert!(snapshot.constraints.is_empty());
    }

    #[tokio::test]
    async fn test_set_replaces_wholesale() {
        let cache = PolicyCache::new();
        cache.set(vec![constraint("a"), constraint("b")]).await;
        cache.set(vec![constraint("c")]).await;

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.generation, 2);
        assert_eq!(snapshot.constraints.len(), 1);
        assert_eq!(snapshot.constraints[0].name, "c");
    }

    #[tokio::test]
    async fn test_empty_set_clears_policy() {
        let cache = PolicyCache::new();
        cache.set(vec![constraint("a")]).await;
        cache.set(Vec::new()).await;

        assert!(cache.get().await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_survives_replace() {
        let cache = PolicyCache::new();
        cache.set(vec![constraint("old")]).await;

        let held = cache.snapshot().await;
        cache.set(vec![constraint("new")]).await;

        assert_eq!(held.constraints[0].name, "old");
        assert_eq!(cache.get().await[0].name, "new");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_mixed_generations() {
        let cache = Arc::new(PolicyCache::new());
        cache.set(vec![constraint("0-a"), constraint("0-b"), constraint("0-c")]).await;

        let writer = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for cycle in 1..200 {
                    let set = ["a", "b", "c"]
                        .iter()
                        .map(|suffix| constraint(&format!("{}-{}", cycle, suffix)))
                        .collect();
                    cache.set(set).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            readers.push(tokio::spawn(async move {
                for _ in 0..500 {
                    let constraints = cache.get().await;
                    let cycle = constraints[0].name.split('-').next().unwrap().to_string();
                    assert_eq!(constraints.len(), 3);
                    assert!(constraints
                        .iter()
                        .all(|c| c.name.starts_with(&format!("{}-", cycle))));
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
