//! Device configuration.

/// Default size of the blocks the pooled allocator carves allocations from.
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// Which driver to bring up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// The real driver compiled in; its failure is returned, never replaced
    /// by the dummy driver.
    #[default]
    Auto,
    Vulkan,
    Dummy,
}

/// How device memory is obtained from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocatorStrategy {
    /// One native allocation per request.
    Direct,
    /// Sub-allocate from per-memory-type blocks of `block_size` bytes.
    Pooled { block_size: u64 },
}

impl AllocatorStrategy {
    /// Pooled strategy with the default block size.
    pub fn pooled() -> Self {
        Self::Pooled {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl Default for AllocatorStrategy {
    fn default() -> Self {
        Self::pooled()
    }
}

/// Parameters used when creating a [`Device`](crate::Device).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub backend: BackendKind,
    /// Enable driver validation layers.
    pub validation: bool,
    /// Most verbose validation message forwarded to `log`.
    pub validation_log_level: log::LevelFilter,
    pub allocator: AllocatorStrategy,
    pub application_name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            validation: cfg!(debug_assertions),
            validation_log_level: log::LevelFilter::Debug,
            allocator: AllocatorStrategy::default(),
            application_name: "RedLilium".to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_validation_log_level(mut self, level: log::LevelFilter) -> Self {
        self.validation_log_level = level;
        self
    }

    pub fn with_allocator(mut self, allocator: AllocatorStrategy) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }
}
