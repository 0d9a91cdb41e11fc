//! Queue families and command pool kinds.

use bitflags::bitflags;

bitflags! {
    /// Capabilities of a queue family.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct QueueFlags: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
        const SPARSE_BINDING = 1 << 3;
    }
}

/// Opaque identifier of a queue family on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueFamilyId(pub u32);

impl QueueFamilyId {
    /// The driver-side family index.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Properties of one queue family as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueFamilyProperties {
    pub flags: QueueFlags,
    /// Number of hardware queues in the family.
    pub queue_count: u32,
    /// Whether queues of this family can present to the device's surface.
    pub supports_present: bool,
}

impl QueueFamilyProperties {
    pub fn new(flags: QueueFlags, queue_count: u32) -> Self {
        Self {
            flags,
            queue_count,
            supports_present: flags.contains(QueueFlags::GRAPHICS),
        }
    }

    pub fn with_present(mut self, supports_present: bool) -> Self {
        self.supports_present = supports_present;
        self
    }

    /// Graphics and compute queues implicitly support transfer operations.
    pub fn supports_transfer(&self) -> bool {
        self.flags
            .intersects(QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER)
    }
}

/// Kind of work a queue or command pool is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [QueueKind::Graphics, QueueKind::Compute, QueueKind::Transfer];

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

/// Reset behaviour of a command pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandPoolPolicy {
    /// Buffers can be reset individually.
    #[default]
    Default,
    /// Buffers are short-lived and re-recorded often.
    Transient,
    /// Buffers cannot be reset individually; only the whole pool can.
    NonResettable,
}

impl CommandPoolPolicy {
    pub const ALL: [CommandPoolPolicy; 3] = [
        CommandPoolPolicy::Default,
        CommandPoolPolicy::Transient,
        CommandPoolPolicy::NonResettable,
    ];

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}
