//! Pipelines keyed by the content hash of their inputs.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tracing::{debug, info};

use vp_rhi::RhiResult;
use vp_rhi::device::Device;
use vp_rhi::pipeline::{Pipeline, PipelineDesc, PipelineKey};

/// Map from key to value that builds each value at most once.
#[derive(Debug)]
pub struct KeyedCache<V> {
    entries: HashMap<PipelineKey, V>,
}

impl<V> KeyedCache<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Returns the value for `key`, calling `build` only on a miss. A failed
    /// build leaves the cache unchanged.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: PipelineKey,
        build: impl FnOnce() -> Result<V, E>,
    ) -> Result<&V, E> {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(build()?)),
        }
    }

    pub fn get(&self, key: PipelineKey) -> Option<&V> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: PipelineKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for KeyedCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Graphics pipelines built on demand.
pub struct PipelineCache {
    device: Arc<Device>,
    pipelines: KeyedCache<Pipeline>,
}

impl PipelineCache {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            pipelines: KeyedCache::new(),
        }
    }

    /// Returns the pipeline for `desc`, building it on first use.
    pub fn get_or_build(&mut self, desc: &PipelineDesc<'_>) -> RhiResult<&Pipeline> {
        let key = desc.key();
        if self.pipelines.contains(key) {
            debug!("Pipeline cache hit for {}", key);
        }

        let device = &self.device;
        let pipeline = self.pipelines.get_or_try_insert_with(key, || -> RhiResult<Pipeline> {
            let pipeline = Pipeline::build(device.clone(), desc)?;
            info!("Pipeline {} built ({:?})", key, desc.state.polygon_mode);
            Ok(pipeline)
        })?;
        Ok(pipeline)
    }

    pub fn get(&self, key: PipelineKey) -> Option<&Pipeline> {
        self.pipelines.get(key)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_hit_does_not_build() {
        let builds = Cell::new(0);
        let mut cache: KeyedCache<String> = KeyedCache::new();
        let build = || -> Result<String, ()> {
            builds.set(builds.get() + 1);
            Ok("filled".to_string())
        };

        let first = cache.get_or_try_insert_with(PipelineKey(7), build).cloned();
        let second = cache.get_or_try_insert_with(PipelineKey(7), build).cloned();

        assert_eq!(first, Ok("filled".to_string()));
        assert_eq!(first, second);
        assert_eq!(builds.get(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_keys_build_separately() {
        let mut cache: KeyedCache<u32> = KeyedCache::new();
        cache
            .get_or_try_insert_with(PipelineKey(1), || Ok::<_, ()>(1))
            .unwrap();
        cache
            .get_or_try_insert_with(PipelineKey(2), || Ok::<_, ()>(2))
            .unwrap();
        assert_eq!(cache.get(PipelineKey(2)), Some(&2));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let mut cache: KeyedCache<u32> = KeyedCache::new();
        let err = cache.get_or_try_insert_with(PipelineKey(3), || Err("link error"));
        assert_eq!(err, Err("link error"));
        assert!(!cache.contains(PipelineKey(3)));

        let ok = cache.get_or_try_insert_with(PipelineKey(3), || Ok::<_, &str>(9));
        assert_eq!(ok, Ok(&9));
    }
}
