use std::fmt;
use std::time::Duration;

/// Static buffers are filled once; dynamic buffers are streamed into every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Which side reclaims memory the consumer has finished reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// The storage object's discard/no-overwrite primitives do the reclamation.
    Delegated,
    /// The ring tracks in-flight regions against the fence timeline itself.
    SelfManaged,
}

/// What a self-managed ring does when it would stall on the open sub-pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubPassPolicy {
    /// End the sub-pass so its work reaches the consumer, then wait.
    EndEarly,
    /// Always wait on the fence.
    AlwaysWait,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RingConfig {
    pub alignment: usize,
    pub ledger_capacity: usize,
    pub stall_threshold: Duration,
    pub sub_pass_policy: SubPassPolicy,
    pub assert_on_misuse: bool,
}

pub const MIN_LEDGER_CAPACITY: usize = 4;

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            alignment: 4,
            ledger_capacity: 256,
            stall_threshold: Duration::from_millis(2),
            sub_pass_policy: SubPassPolicy::EndEarly,
            assert_on_misuse: cfg!(debug_assertions),
        }
    }
}

impl RingConfig {
    pub fn alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment.max(1);
        self
    }

    pub fn ledger_capacity(mut self, capacity: usize) -> Self {
        self.ledger_capacity = capacity.max(MIN_LEDGER_CAPACITY);
        self
    }

    pub fn stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }

    pub fn sub_pass_policy(mut self, policy: SubPassPolicy) -> Self {
        self.sub_pass_policy = policy;
        self
    }

    pub fn assert_on_misuse(mut self, assert: bool) -> Self {
        self.assert_on_misuse = assert;
        self
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BufferSpec {
    pub element_size: usize,
    pub capacity_elements: usize,
    pub usage: BufferUsage,
    pub kind: BufferKind,
    pub backend: BackendKind,
    pub ring: RingConfig,
    pub debug_name: Option<String>,
}

impl BufferSpec {
    pub fn new(kind: BufferKind, element_size: usize, capacity_elements: usize) -> Self {
        assert!(element_size > 0, "element size must be non-zero");
        assert!(capacity_elements > 0, "capacity must be non-zero");
        Self {
            element_size,
            capacity_elements,
            usage: BufferUsage::Dynamic,
            kind,
            backend: BackendKind::Delegated,
            ring: RingConfig::default(),
            debug_name: None,
        }
    }

    pub fn vertices(stride: usize, count: usize) -> Self {
        Self::new(BufferKind::Vertex, stride, count)
    }

    pub fn indices(index_size: usize, count: usize) -> Self {
        Self::new(BufferKind::Index, index_size, count)
    }

    pub fn usage(mut self, usage: BufferUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn ring(mut self, ring: RingConfig) -> Self {
        self.ring = ring;
        self
    }

    pub fn debug_name(mut self, debug_name: impl AsRef<str>) -> Self {
        self.debug_name = Some(debug_name.as_ref().to_owned());
        self
    }

    pub fn capacity_bytes(&self) -> usize {
        self.element_size * self.capacity_elements
    }

    pub fn is_dynamic(&self) -> bool {
        self.usage == BufferUsage::Dynamic
    }

    pub fn name(&self) -> &str {
        self.debug_name.as_deref().unwrap_or("unnamed buffer")
    }
}

impl fmt::Display for BufferSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BufferSpec(kind={:?}, elementSize={}, capacity={}, usage={:?}, backend={:?}, alignment={}, debugName={})",
            self.kind,
            self.element_size,
            self.capacity_elements,
            self.usage,
            self.backend,
            self.ring.alignment,
            self.name(),
        )
    }
}

impl fmt::Debug for BufferSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let spec = BufferSpec::vertices(32, 1024).debug_name("dynamic vb");
        assert_eq!(spec.capacity_bytes(), 32 * 1024);
        assert!(spec.is_dynamic());
        assert_eq!(spec.backend, BackendKind::Delegated);
        assert_eq!(spec.name(), "dynamic vb");
    }

    #[test]
    fn ledger_capacity_has_a_floor() {
        let ring = RingConfig::default().ledger_capacity(1);
        assert_eq!(ring.ledger_capacity, MIN_LEDGER_CAPACITY);
    }

    #[test]
    fn display_names_the_buffer() {
        let spec = BufferSpec::indices(2, 16)
            .usage(BufferUsage::Static)
            .backend(BackendKind::SelfManaged);
        let text = spec.to_string();
        assert!(text.contains("Index"));
        assert!(text.contains("SelfManaged"));
        assert!(text.contains("unnamed buffer"));
    }
}
