//! Buffer and image descriptors.

use bitflags::bitflags;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be copied from.
        const TRANSFER_SRC = 1 << 0;
        /// Buffer can be copied to.
        const TRANSFER_DST = 1 << 1;
        const UNIFORM_TEXEL = 1 << 2;
        const STORAGE_TEXEL = 1 << 3;
        /// Buffer can be used as a uniform buffer.
        const UNIFORM = 1 << 4;
        /// Buffer can be used as a storage buffer.
        const STORAGE = 1 << 5;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 6;
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 7;
        /// Buffer can be used as an indirect buffer.
        const INDIRECT = 1 << 8;
    }
}

bitflags! {
    /// Usage flags for images.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
        const TRANSIENT_ATTACHMENT = 1 << 6;
        const INPUT_ATTACHMENT = 1 << 7;
    }
}

/// Two-dimensional extent in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clamp each dimension into `[min, max]`.
    pub fn clamp(self, min: Extent2D, max: Extent2D) -> Self {
        Self {
            width: self.width.clamp(min.width, max.width.max(min.width)),
            height: self.height.clamp(min.height, max.height.max(min.height)),
        }
    }
}

/// Image formats understood by the crate.
///
/// Discriminants are the native format values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ImageFormat {
    #[default]
    Undefined = 0,
    Rgba8Unorm = 37,
    Rgba8Srgb = 43,
    Bgra8Unorm = 44,
    Bgra8Srgb = 50,
    Rgba16Float = 97,
    R32Float = 100,
    Depth32Float = 126,
    Depth24UnormStencil8 = 129,
}

impl ImageFormat {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Self::Undefined,
            37 => Self::Rgba8Unorm,
            43 => Self::Rgba8Srgb,
            44 => Self::Bgra8Unorm,
            50 => Self::Bgra8Srgb,
            97 => Self::Rgba16Float,
            100 => Self::R32Float,
            126 => Self::Depth32Float,
            129 => Self::Depth24UnormStencil8,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24UnormStencil8)
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Undefined => 0,
            Self::Rgba16Float => 8,
            _ => 4,
        }
    }
}

/// Image layouts used by barriers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ImageLayout {
    #[default]
    Undefined = 0,
    General = 1,
    ColorAttachment = 2,
    DepthStencilAttachment = 3,
    ShaderReadOnly = 5,
    TransferSrc = 6,
    TransferDst = 7,
    PresentSrc = 1_000_001_002,
}

impl ImageLayout {
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Descriptor for creating a two-dimensional image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ImageDescriptor {
    pub label: Option<String>,
    pub extent: Extent2D,
    pub format: ImageFormat,
    pub usage: ImageUsage,
    pub mip_levels: u32,
}

impl ImageDescriptor {
    pub fn new(extent: Extent2D, format: ImageFormat, usage: ImageUsage) -> Self {
        Self {
            label: None,
            extent,
            format,
            usage,
            mip_levels: 1,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    /// Size of the base level in bytes, ignoring tiling.
    pub fn base_level_size(&self) -> u64 {
        self.extent.width as u64 * self.extent.height as u64 * self.format.bytes_per_pixel() as u64
    }
}
