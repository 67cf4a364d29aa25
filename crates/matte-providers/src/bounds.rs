//! Working-size constraints a provider imposes on its inputs.

use matte_core::Size;

/// Inclusive clamp on the short side of a provider's working resolution.
///
/// The long side follows proportionally with round-to-nearest, so aspect
/// ratio is preserved as closely as integer dimensions allow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeBounds {
    pub short_min: u32,
    pub short_max: u32,
}

impl Default for SizeBounds {
    fn default() -> Self {
        Self {
            short_min: 80,
            short_max: 1080,
        }
    }
}

impl SizeBounds {
    /// Constrain `size` so its short side lies within the bounds.
    pub fn constrain(&self, size: Size) -> Size {
        if size.is_empty() {
            return Size::MIN;
        }
        let short = size.short_side();
        let clamped = short.clamp(self.short_min, self.short_max);
        if clamped == short {
            return size;
        }
        let scale = |side: u32| -> u32 {
            let scaled = (u64::from(side) * u64::from(clamped) + u64::from(short) / 2)
                / u64::from(short);
            (scaled as u32).max(1)
        };
        Size::new(scale(size.width), scale(size.height))
    }
}
