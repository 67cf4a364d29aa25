//! Frame geometry and GPU texture value types shared across crates.

use serde::{Deserialize, Serialize};

/// 2D extent of a frame or texture, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The 1×1 placeholder extent used for preallocated render targets.
    pub const MIN: Size = Size::new(1, 1);

    #[inline]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// `true` if either dimension is zero; such a frame is never processed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The smaller of the two dimensions.
    #[inline]
    pub fn short_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel format of a host-owned GPU texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA color, the capture and input format.
    Rgba8,
    /// 8-bit single-channel alpha, the mask output format.
    Alpha8,
}

/// Opaque handle to a host-owned GPU texture.
///
/// The host compositor mints these; the core never dereferences the id, it
/// only passes handles back across the [`crate::host::HostCompositor`]
/// boundary.  Equality is identity of the underlying GPU object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    pub id: u64,
    pub size: Size,
    pub format: TextureFormat,
}

/// Role of a buffer inside the GPU resource pool.
///
/// Each role has at most one live buffer per pipeline instance; no two roles
/// ever alias the same backing memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Incoming captured frame, as handed to the provider.
    Input,
    /// Provider-side source representation the input is transferred into.
    WorkingInput,
    /// Provider-side destination the effect writes into.
    WorkingOutput,
    /// Final mask/result read back out of the provider.
    Output,
}

impl BufferRole {
    /// All roles, in allocation order.
    pub const ALL: [BufferRole; 4] = [
        BufferRole::Input,
        BufferRole::WorkingInput,
        BufferRole::WorkingOutput,
        BufferRole::Output,
    ];

    /// Texture format backing this role.
    pub fn format(self) -> TextureFormat {
        match self {
            BufferRole::Input | BufferRole::WorkingInput => TextureFormat::Rgba8,
            BufferRole::WorkingOutput | BufferRole::Output => TextureFormat::Alpha8,
        }
    }
}

/// Destination rectangle for presenting the composited frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Full-frame rectangle at the origin.
    pub const fn full(size: Size) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.width,
            height: size.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BufferRole, Size, TextureFormat};

    #[test]
    fn empty_sizes_are_detected() {
        assert!(Size::new(0, 720).is_empty());
        assert!(Size::new(1280, 0).is_empty());
        assert!(!Size::new(1, 1).is_empty());
    }

    #[test]
    fn role_formats_split_color_and_mask() {
        assert_eq!(BufferRole::Input.format(), TextureFormat::Rgba8);
        assert_eq!(BufferRole::Output.format(), TextureFormat::Alpha8);
    }

    #[test]
    fn short_side_picks_the_smaller_dimension() {
        assert_eq!(Size::new(4000, 30).short_side(), 30);
        assert_eq!(Size::new(30, 4000).short_side(), 30);
    }
}
