use scc::HashMap;
use scc::hash_map::Entry;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Slot<V> {
    value: V,
    /// `None` once the entry has been made permanent.
    expires_at: Option<Instant>,
}

impl<V> Slot<V> {
    fn live_at(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Concurrent map whose entries expire unless refreshed or made permanent.
///
/// The cache never acts on expiry by itself. `evict_expired` removes lapsed
/// entries and hands them back, so whatever cleanup they need runs outside
/// the map's bucket locks. Until then a lapsed entry is invisible to lookups
/// and can't be refreshed or made permanent.
pub struct TtlCache<K, V> {
    entries: HashMap<K, Slot<V>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or overwrite with a fresh TTL. Returns the displaced value.
    pub async fn insert(&self, key: K, value: V, now: Instant) -> Option<V> {
        let slot = Slot {
            value,
            expires_at: Some(now + self.ttl),
        };
        match self.entries.entry_async(key).await {
            Entry::Occupied(mut occupied) => {
                Some(std::mem::replace(occupied.get_mut(), slot).value)
            }
            Entry::Vacant(vacant) => {
                vacant.insert_entry(slot);
                None
            }
        }
    }

    /// Insert with a fresh TTL only if the key is absent.
    pub async fn insert_new(&self, key: K, value: V, now: Instant) -> Result<(), V> {
        self.entries
            .insert_async(
                key,
                Slot {
                    value,
                    expires_at: Some(now + self.ttl),
                },
            )
            .await
            .map_err(|(_, slot)| slot.value)
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .read_async(key, |_, slot| slot.live_at(now).then(|| slot.value.clone()))
            .await
            .flatten()
    }

    pub async fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.entries
            .read_async(key, |_, slot| slot.live_at(now))
            .await
            .unwrap_or(false)
    }

    /// Extend the TTL of a live, non-permanent entry. Never resurrects, not
    /// even an entry that lapsed and wasn't evicted yet.
    pub async fn touch(&self, key: &K, now: Instant) -> bool {
        let ttl = self.ttl;
        self.entries
            .update_async(key, |_, slot| {
                if !slot.live_at(now) {
                    return false;
                }
                if slot.expires_at.is_some() {
                    slot.expires_at = Some(now + ttl);
                }
                true
            })
            .await
            .unwrap_or(false)
    }

    /// Drop the TTL of a live entry if `pred` accepts its value, so it only
    /// leaves the cache through `remove`.
    pub async fn persist_if<F>(&self, key: &K, pred: F) -> bool
    where
        F: FnOnce(&V) -> bool,
    {
        let now = Instant::now();
        self.entries
            .update_async(key, |_, slot| {
                let accepted = slot.live_at(now) && pred(&slot.value);
                if accepted {
                    slot.expires_at = None;
                }
                accepted
            })
            .await
            .unwrap_or(false)
    }

    /// Remove the entry if its TTL lapsed at `now`, ahead of the next sweep.
    pub async fn take_expired(&self, key: K, now: Instant) -> Option<V> {
        match self.entries.entry_async(key).await {
            Entry::Occupied(occupied) => {
                if occupied.get().live_at(now) {
                    None
                } else {
                    Some(occupied.remove_entry().1.value)
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        self.entries
            .remove_async(key)
            .await
            .map(|(_, slot)| slot.value)
    }

    /// Remove the entry only when `pred` accepts the current value.
    pub async fn remove_if<F>(&self, key: K, pred: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        match self.entries.entry_async(key).await {
            Entry::Occupied(occupied) => {
                if pred(&occupied.get().value) {
                    Some(occupied.remove_entry().1.value)
                } else {
                    None
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Remove every entry whose TTL lapsed at `now` and return them.
    pub async fn evict_expired(&self, now: Instant) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        self.entries
            .retain_async(|key, slot| {
                if slot.live_at(now) {
                    return true;
                }
                evicted.push((key.clone(), slot.value.clone()));
                false
            })
            .await;
        evicted
    }

    /// Remove everything, permanent entries included.
    pub async fn drain(&self) -> Vec<(K, V)> {
        let mut drained = Vec::new();
        self.entries
            .retain_async(|key, slot| {
                drained.push((key.clone(), slot.value.clone()));
                false
            })
            .await;
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
