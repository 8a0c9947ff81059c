use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::Mutex;

/// A keyed map behind an async mutex.
pub struct GenericMemoryStore<K, V> {
    store: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for GenericMemoryStore<K, V> {
    fn default() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> GenericMemoryStore<K, V>
where
    K: Eq + Hash + Send,
    V: Clone + Send,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.store.lock().await.get(key).cloned()
    }

    /// Replaces the value with `f(current)` under one lock. `None` from `f` leaves it unchanged.
    pub async fn update<F>(&self, key: K, f: F)
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let mut store = self.store.lock().await;
        if let Some(value) = f(store.get(&key)) {
            store.insert(key, value);
        }
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }
}
