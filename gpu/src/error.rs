//! GPU error types.
//!
//! Driver failures carry the native result code so callers can inspect or log
//! exactly what the driver reported. Expected non-error outcomes (a fence that
//! is not ready yet, a swapchain that went out of date while acquiring) are not
//! errors and are reported through explicit status values instead.

use std::fmt;

use crate::types::{MemoryPropertyFlags, QueueKind};

/// Result code reported by a driver call.
///
/// Numeric values match `VkResult`, so codes coming from a real Vulkan driver
/// round-trip through [`DriverResult::from_code`] unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverResult {
    NotReady,
    Timeout,
    Suboptimal,
    OutOfHostMemory,
    OutOfDeviceMemory,
    InitializationFailed,
    DeviceLost,
    MemoryMapFailed,
    LayerNotPresent,
    ExtensionNotPresent,
    FeatureNotPresent,
    TooManyObjects,
    FormatNotSupported,
    SurfaceLost,
    OutOfDate,
    /// Any code not covered above.
    Other(i32),
}

impl DriverResult {
    /// Map a raw result code onto a known variant.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::NotReady,
            2 => Self::Timeout,
            1_000_001_003 => Self::Suboptimal,
            -1 => Self::OutOfHostMemory,
            -2 => Self::OutOfDeviceMemory,
            -3 => Self::InitializationFailed,
            -4 => Self::DeviceLost,
            -5 => Self::MemoryMapFailed,
            -6 => Self::LayerNotPresent,
            -7 => Self::ExtensionNotPresent,
            -8 => Self::FeatureNotPresent,
            -10 => Self::TooManyObjects,
            -11 => Self::FormatNotSupported,
            -1_000_000_000 => Self::SurfaceLost,
            -1_000_001_004 => Self::OutOfDate,
            other => Self::Other(other),
        }
    }

    /// The raw result code.
    pub fn code(self) -> i32 {
        match self {
            Self::NotReady => 1,
            Self::Timeout => 2,
            Self::Suboptimal => 1_000_001_003,
            Self::OutOfHostMemory => -1,
            Self::OutOfDeviceMemory => -2,
            Self::InitializationFailed => -3,
            Self::DeviceLost => -4,
            Self::MemoryMapFailed => -5,
            Self::LayerNotPresent => -6,
            Self::ExtensionNotPresent => -7,
            Self::FeatureNotPresent => -8,
            Self::TooManyObjects => -10,
            Self::FormatNotSupported => -11,
            Self::SurfaceLost => -1_000_000_000,
            Self::OutOfDate => -1_000_001_004,
            Self::Other(code) => code,
        }
    }

    /// Whether the code is a failure (negative) rather than a status.
    pub fn is_failure(self) -> bool {
        self.code() < 0
    }
}

impl fmt::Display for DriverResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "not ready"),
            Self::Timeout => write!(f, "timeout"),
            Self::Suboptimal => write!(f, "suboptimal"),
            Self::OutOfHostMemory => write!(f, "out of host memory"),
            Self::OutOfDeviceMemory => write!(f, "out of device memory"),
            Self::InitializationFailed => write!(f, "initialization failed"),
            Self::DeviceLost => write!(f, "device lost"),
            Self::MemoryMapFailed => write!(f, "memory map failed"),
            Self::LayerNotPresent => write!(f, "layer not present"),
            Self::ExtensionNotPresent => write!(f, "extension not present"),
            Self::FeatureNotPresent => write!(f, "feature not present"),
            Self::TooManyObjects => write!(f, "too many objects"),
            Self::FormatNotSupported => write!(f, "format not supported"),
            Self::SurfaceLost => write!(f, "surface lost"),
            Self::OutOfDate => write!(f, "out of date"),
            Self::Other(code) => write!(f, "driver result {code}"),
        }
    }
}

/// Errors that can occur while talking to the GPU.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpuError {
    /// A driver call failed.
    #[error("{operation} failed: {result} ({code})", code = .result.code())]
    Driver {
        operation: &'static str,
        result: DriverResult,
    },
    /// No memory type satisfies both the resource's type mask and the
    /// requested property flags.
    #[error("no memory type matches type bits {type_bits:#b} with properties {required:?}")]
    NoMatchingMemoryType {
        type_bits: u32,
        required: MemoryPropertyFlags,
    },
    /// The device exposes no queue family able to serve the kind.
    #[error("no queue family supports {0:?} work")]
    NoQueueFamily(QueueKind),
    /// The backend could not be brought up.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
}

impl GpuError {
    /// Shorthand for a failed driver call.
    pub fn driver(operation: &'static str, result: DriverResult) -> Self {
        Self::Driver { operation, result }
    }

    /// The driver result carried by this error, if it came from a driver call.
    pub fn result(&self) -> Option<DriverResult> {
        match self {
            Self::Driver { result, .. } => Some(*result),
            _ => None,
        }
    }

    /// The raw driver result code, if any.
    pub fn code(&self) -> Option<i32> {
        self.result().map(DriverResult::code)
    }

    pub fn is_device_lost(&self) -> bool {
        self.result() == Some(DriverResult::DeviceLost)
    }

    pub fn is_out_of_date(&self) -> bool {
        self.result() == Some(DriverResult::OutOfDate)
    }
}

/// Result alias used across the crate.
pub type GpuResult<T> = Result<T, GpuError>;
