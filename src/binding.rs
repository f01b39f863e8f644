use smallvec::SmallVec;

use crate::buffer::BufferKey;

/// Remembers what is bound on the device so redundant binds can be skipped.
#[derive(Debug, Default, Clone)]
pub struct DeviceBindingCache {
    vertex_streams: SmallVec<[Option<BufferKey>; 4]>,
    index: Option<BufferKey>,
    suppressed: u64,
}

impl DeviceBindingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the device bind call has to be issued.
    pub fn bind_vertex(&mut self, stream: usize, key: BufferKey) -> bool {
        if self.vertex_streams.len() <= stream {
            self.vertex_streams.resize(stream + 1, None);
        }
        if self.vertex_streams[stream] == Some(key) {
            self.suppressed += 1;
            return false;
        }
        self.vertex_streams[stream] = Some(key);
        true
    }

    pub fn bind_index(&mut self, key: BufferKey) -> bool {
        if self.index == Some(key) {
            self.suppressed += 1;
            return false;
        }
        self.index = Some(key);
        true
    }

    pub fn vertex_stream(&self, stream: usize) -> Option<BufferKey> {
        self.vertex_streams.get(stream).copied().flatten()
    }

    pub fn index_buffer(&self) -> Option<BufferKey> {
        self.index
    }

    /// Drops `key` from every slot. Returns whether it was bound anywhere.
    pub fn unbind(&mut self, key: BufferKey) -> bool {
        let mut was_bound = false;
        for slot in self.vertex_streams.iter_mut().filter(|slot| **slot == Some(key)) {
            *slot = None;
            was_bound = true;
        }
        if self.index == Some(key) {
            self.index = None;
            was_bound = true;
        }
        was_bound
    }

    /// Every distinct buffer currently bound.
    pub fn bound_keys(&self) -> SmallVec<[BufferKey; 5]> {
        let mut keys: SmallVec<[BufferKey; 5]> = SmallVec::new();
        for key in self.vertex_streams.iter().flatten().chain(self.index.iter()) {
            if !keys.contains(key) {
                keys.push(*key);
            }
        }
        keys
    }

    pub fn suppressed_rebinds(&self) -> u64 {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    fn keys(n: usize) -> Vec<BufferKey> {
        let mut map: SlotMap<BufferKey, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn repeated_binds_are_suppressed() {
        let k = keys(2);
        let mut cache = DeviceBindingCache::new();

        assert!(cache.bind_vertex(0, k[0]));
        assert!(!cache.bind_vertex(0, k[0]));
        assert!(cache.bind_vertex(2, k[0]));
        assert!(cache.bind_index(k[1]));
        assert!(!cache.bind_index(k[1]));

        assert_eq!(cache.suppressed_rebinds(), 2);
        assert_eq!(cache.vertex_stream(1), None);
        assert_eq!(cache.index_buffer(), Some(k[1]));
        assert_eq!(cache.bound_keys().as_slice(), &[k[0], k[1]]);
    }

    #[test]
    fn unbind_clears_every_slot() {
        let k = keys(2);
        let mut cache = DeviceBindingCache::new();
        cache.bind_vertex(0, k[0]);
        cache.bind_vertex(1, k[0]);
        cache.bind_index(k[1]);

        assert!(cache.unbind(k[0]));
        assert!(!cache.unbind(k[0]));
        assert_eq!(cache.bound_keys().as_slice(), &[k[1]]);
        assert!(cache.unbind(k[1]));
        assert_eq!(cache.index_buffer(), None);
        assert!(cache.bind_vertex(0, k[0]));
    }
}
