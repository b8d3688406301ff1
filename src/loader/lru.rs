//! A bounded in-memory cache of decoded tiles with single-flight loads.
//!
//! One mutex guards the recency list, the byte accounting and the in-flight map;
//! the upstream load itself always runs outside of it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::Error;
use crate::image::ImageBuffer;
use crate::layout::Layout;
use crate::loader::{Flight, TileLoader};

type TileKey = (i64, i64, u32);

pub struct LruCached {
    inner: Box<TileLoader>,
    max_entries: Option<usize>,
    max_bytes: Option<usize>,
    state: Mutex<CacheState>,
}

struct CacheState {
    entries: lru::LruCache<TileKey, ImageBuffer>,
    bytes: usize,
    inflight: HashMap<TileKey, Arc<Flight<ImageBuffer>>>,
}

enum Role {
    Hit(ImageBuffer),
    Wait(Arc<Flight<ImageBuffer>>),
    Compute(Arc<Flight<ImageBuffer>>),
}

impl LruCached {
    /// Bounds the cache by entry count, by total raster bytes, or both.
    pub fn new(
        inner: TileLoader,
        max_entries: Option<usize>,
        max_bytes: Option<usize>,
    ) -> Result<LruCached, Error> {
        if max_entries.is_none() && max_bytes.is_none() {
            return Err(Error::InvalidArgument(
                "an LRU cache needs max_entries and/or max_bytes".to_string(),
            ));
        }
        Ok(LruCached {
            inner: Box::new(inner),
            max_entries,
            max_bytes,
            state: Mutex::new(CacheState {
                entries: lru::LruCache::unbounded(),
                bytes: 0,
                inflight: HashMap::new(),
            }),
        })
    }

    pub fn layout(&self) -> &Layout {
        self.inner.layout()
    }

    pub(crate) fn inner(&self) -> &TileLoader {
        &self.inner
    }

    /// Number of cached tiles.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a tile is currently cached, without touching recency.
    pub fn contains(&self, x: i64, y: i64, zoom: u32) -> bool {
        self.state.lock().unwrap().entries.contains(&(x, y, zoom))
    }

    pub fn load(&self, x: i64, y: i64, zoom: u32) -> Result<ImageBuffer, Error> {
        let key = (x, y, zoom);
        let role = {
            let mut state = self.state.lock().unwrap();
            if let Some(img) = state.entries.get(&key) {
                Role::Hit(img.clone())
            } else if let Some(flight) = state.inflight.get(&key) {
                Role::Wait(flight.clone())
            } else {
                let flight = Arc::new(Flight::new());
                state.inflight.insert(key, flight.clone());
                Role::Compute(flight)
            }
        };

        match role {
            Role::Hit(img) => Ok(img),
            Role::Wait(flight) => flight.wait(),
            Role::Compute(flight) => {
                let result = self.inner.load(x, y, zoom);
                {
                    let mut state = self.state.lock().unwrap();
                    if let Ok(img) = &result {
                        if let Some(old) = state.entries.put(key, img.clone()) {
                            state.bytes -= old.num_bytes();
                        }
                        state.bytes += img.num_bytes();
                        self.evict(&mut state);
                    }
                    state.inflight.remove(&key);
                }
                flight.publish(result.clone());
                result
            }
        }
    }

    fn evict(&self, state: &mut CacheState) {
        loop {
            let over_entries = self.max_entries.is_some_and(|m| state.entries.len() > m);
            let over_bytes = self.max_bytes.is_some_and(|m| state.bytes > m);
            if !over_entries && !over_bytes {
                return;
            }
            match state.entries.pop_lru() {
                Some((key, img)) => {
                    state.bytes -= img.num_bytes();
                    log::trace!("evicting tile {:?} ({} bytes)", key, img.num_bytes());
                }
                None => return,
            }
        }
    }
}

impl std::fmt::Debug for LruCached {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCached")
            .field("max_entries", &self.max_entries)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::loader::MemoryLoader;

    fn counting_loader(counter: Arc<AtomicUsize>) -> TileLoader {
        let layout = Layout::xyz((4, 4)).unwrap();
        MemoryLoader::new(layout, move |x, y, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ImageBuffer::filled(4, 4, [x as u8, y as u8, 0]))
        })
        .into()
    }

    #[test]
    fn test_hit_skips_upstream() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cache = LruCached::new(counting_loader(counter.clone()), Some(8), None).unwrap();
        let a = cache.load(1, 2, 4).unwrap();
        let b = cache.load(1, 2, 4).unwrap();
        assert_eq!(a, b);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_eviction_by_entries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cache = LruCached::new(counting_loader(counter.clone()), Some(3), None).unwrap();
        for x in 1..=10 {
            cache.load(x, 0, 4).unwrap();
        }
        assert_eq!(cache.len(), 3);
        for x in 8..=10 {
            assert!(cache.contains(x, 0, 4), "tile {} should be cached", x);
        }

        // Touch 8 so it becomes most recent, then insert 11: 9 gets evicted
        cache.load(8, 0, 4).unwrap();
        cache.load(11, 0, 4).unwrap();
        assert!(cache.contains(8, 0, 4));
        assert!(cache.contains(10, 0, 4));
        assert!(cache.contains(11, 0, 4));
        assert!(!cache.contains(9, 0, 4));
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_eviction_by_bytes() {
        // 4x4 RGB tiles are 48 bytes each
        let counter = Arc::new(AtomicUsize::new(0));
        let cache = LruCached::new(counting_loader(counter), None, Some(100)).unwrap();
        cache.load(0, 0, 4).unwrap();
        cache.load(1, 0, 4).unwrap();
        assert_eq!(cache.len(), 2);
        cache.load(2, 0, 4).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(0, 0, 4));
    }

    #[test]
    fn test_errors_are_not_cached() {
        let layout = Layout::xyz((4, 4)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        let failing = MemoryLoader::new(layout, move |x, y, zoom| {
            counter2.fetch_add(1, Ordering::SeqCst);
            Err(Error::not_found(x, y, zoom))
        });
        let cache = LruCached::new(failing.into(), Some(8), None).unwrap();
        assert!(cache.load(0, 0, 4).is_err());
        assert!(cache.load(0, 0, 4).is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_single_flight() {
        let layout = Layout::xyz((4, 4)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        let slow = MemoryLoader::new(layout, move |x, y, _| {
            counter2.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(ImageBuffer::filled(4, 4, [x as u8, y as u8, 7]))
        });
        let cache = LruCached::new(slow.into(), Some(8), None).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let img = cache.load(3, 1, 4).unwrap();
                    assert_eq!(img.get(0, 0), [3, 1, 7]);
                });
            }
        });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
