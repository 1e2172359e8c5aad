use super::Store;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, Score>,
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn insert(&mut self, score: f64, member: &str) {
        if let Some(previous) = self.scores.insert(member.to_string(), Score(score)) {
            self.ordered.remove(&(previous, member.to_string()));
        }
        self.ordered.insert((Score(score), member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => self.ordered.remove(&(score, member.to_string())),
            None => false,
        }
    }

    fn pop_min(&mut self) -> Option<String> {
        let (_, member) = self.ordered.pop_first()?;
        self.scores.remove(&member);
        Some(member)
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    sorted: HashMap<String, SortedSet>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// In-process store for single-process deployments and tests.
///
/// Clones share the same data. Sorted sets order equal scores by member,
/// the same way Redis does, so both backends dispatch in the same order.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn scored_insert(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let mut state = self.lock()?;
        state
            .sorted
            .entry(key.to_string())
            .or_default()
            .insert(score, member);
        Ok(())
    }

    async fn scored_pop_min(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.lock()?;
        Ok(state.sorted.get_mut(key).and_then(SortedSet::pop_min))
    }

    async fn scored_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        let state = self.lock()?;
        let Some(set) = state.sorted.get(key) else {
            return Ok(Vec::new());
        };
        Ok(set
            .ordered
            .iter()
            .filter(|(score, _)| score.0 >= min && score.0 <= max)
            .map(|(_, member)| member.clone())
            .collect())
    }

    async fn scored_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(state
            .sorted
            .get_mut(key)
            .map(|set| set.remove(member))
            .unwrap_or(false))
    }

    async fn scored_cardinality(&self, key: &str) -> Result<usize> {
        let state = self.lock()?;
        Ok(state.sorted.get(key).map(SortedSet::len).unwrap_or(0))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut state = self.lock()?;
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let state = self.lock()?;
        Ok(state
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(state
            .hashes
            .get_mut(key)
            .map(|hash| hash.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let state = self.lock()?;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hash_length(&self, key: &str) -> Result<usize> {
        let state = self.lock()?;
        Ok(state.hashes.get(key).map(HashMap::len).unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.sorted.remove(key);
        state.hashes.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pops_lowest_score_then_member_order() {
        let store = MemoryStore::new();
        store.scored_insert("z", 0.0, "b").await.unwrap();
        store.scored_insert("z", -5.0, "c").await.unwrap();
        store.scored_insert("z", 0.0, "a").await.unwrap();

        assert_eq!(store.scored_pop_min("z").await.unwrap().as_deref(), Some("c"));
        assert_eq!(store.scored_pop_min("z").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.scored_pop_min("z").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.scored_pop_min("z").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reinsert_updates_score() {
        let store = MemoryStore::new();
        store.scored_insert("z", 10.0, "a").await.unwrap();
        store.scored_insert("z", 1.0, "a").await.unwrap();
        assert_eq!(store.scored_cardinality("z").await.unwrap(), 1);
        assert_eq!(
            store.scored_range_by_score("z", 0.0, 5.0).await.unwrap(),
            vec!["a".to_string()]
        );
    }

    #[tokio::test]
    async fn range_is_inclusive_and_accepts_infinities() {
        let store = MemoryStore::new();
        for (score, member) in [(1.0, "a"), (2.0, "b"), (3.0, "c")] {
            store.scored_insert("z", score, member).await.unwrap();
        }
        assert_eq!(
            store.scored_range_by_score("z", 1.0, 2.0).await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            store
                .scored_range_by_score("z", f64::NEG_INFINITY, f64::INFINITY)
                .await
                .unwrap()
                .len(),
            3
        );
        assert!(store.scored_remove("z", "b").await.unwrap());
        assert!(!store.scored_remove("z", "b").await.unwrap());
    }

    #[tokio::test]
    async fn hash_operations() {
        let store = MemoryStore::new();
        store.hash_set("h", "1", "one").await.unwrap();
        store.hash_set("h", "2", "two").await.unwrap();
        assert_eq!(store.hash_length("h").await.unwrap(), 2);
        assert_eq!(store.hash_get("h", "1").await.unwrap().as_deref(), Some("one"));
        assert!(store.hash_delete("h", "1").await.unwrap());
        assert!(!store.hash_delete("h", "1").await.unwrap());
        assert_eq!(store.hash_get_all("h").await.unwrap().len(), 1);

        store.delete("h").await.unwrap();
        assert_eq!(store.hash_length("h").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.hash_set("h", "1", "one").await.unwrap();
        assert_eq!(other.hash_length("h").await.unwrap(), 1);
    }
}
