//! Surface capabilities and presentation modes.

use super::{Extent2D, ImageFormat, ImageUsage};

/// Presentation mode of a swapchain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PresentMode {
    /// Present immediately, may tear.
    Immediate = 0,
    /// Replace the queued image, no tearing, lowest latency.
    Mailbox = 1,
    /// Wait for vertical blank. Always supported.
    #[default]
    Fifo = 2,
    /// Like FIFO but presents late images immediately.
    FifoRelaxed = 3,
}

impl PresentMode {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Self::Immediate,
            1 => Self::Mailbox,
            2 => Self::Fifo,
            3 => Self::FifoRelaxed,
            _ => return None,
        })
    }
}

/// Color space of a surface format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    #[default]
    SrgbNonlinear,
}

/// A format/color-space pair supported by a surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SurfaceFormat {
    pub format: ImageFormat,
    pub color_space: ColorSpace,
}

impl SurfaceFormat {
    pub const fn new(format: ImageFormat) -> Self {
        Self {
            format,
            color_space: ColorSpace::SrgbNonlinear,
        }
    }
}

/// What a surface supports, queried before creating a swapchain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SurfaceCapabilities {
    pub min_image_count: u32,
    /// Zero means no upper bound.
    pub max_image_count: u32,
    /// `None` when the surface size is decided by the swapchain extent.
    pub current_extent: Option<Extent2D>,
    pub min_extent: Extent2D,
    pub max_extent: Extent2D,
    pub supported_usage: ImageUsage,
    pub formats: Vec<SurfaceFormat>,
    pub present_modes: Vec<PresentMode>,
}
