//! Colour representation and the predefined colour cycle.
//!
//! Shape colours travel as a packed 32-bit value with alpha in the top
//! byte. The predefined cycle gives instrumentation code a cheap way to
//! pick visually distinct colours by index (typically a shape or category
//! id); it is an immutable process-wide constant.

/// An RGBA colour with 8-bit channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Colour {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
    /// Alpha channel; 255 is opaque.
    pub a: u8,
}

impl Colour {
    /// Opaque white.
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    /// Opaque black.
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    /// An opaque colour from RGB channels.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// A colour from all four channels.
    #[must_use]
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Decode from the packed wire form (alpha in the top byte).
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        Self {
            a: (value >> 24) as u8,
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
        }
    }

    /// Encode to the packed wire form (alpha in the top byte).
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        ((self.a as u32) << 24) | ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    /// Linear blend from `self` to `other` with `t` in `[0, 1]`.
    #[must_use]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        let channel = |from: u8, to: u8| (f64::from(from) + (f64::from(to) - f64::from(from)) * t)
            .round() as u8;
        Self {
            r: channel(self.r, other.r),
            g: channel(self.g, other.g),
            b: channel(self.b, other.b),
            a: channel(self.a, other.a),
        }
    }

    /// A colour from the predefined cycle by index (wraps).
    #[must_use]
    pub fn cycle(index: u32) -> Self {
        COLOUR_CYCLE[index as usize % COLOUR_CYCLE.len()]
    }
}

impl From<u32> for Colour {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl From<Colour> for u32 {
    fn from(colour: Colour) -> Self {
        colour.to_u32()
    }
}

/// Visually distinct colours for auto-assignment by id.
///
/// Chosen for mutual contrast on both light and dark backgrounds; the
/// sequence deliberately avoids near-greys so axis colouring and category
/// tints stay distinguishable from uncoloured geometry.
pub const COLOUR_CYCLE: [Colour; 16] = [
    Colour::rgb(230, 25, 75),   // red
    Colour::rgb(60, 180, 75),   // green
    Colour::rgb(255, 225, 25),  // yellow
    Colour::rgb(0, 130, 200),   // blue
    Colour::rgb(245, 130, 48),  // orange
    Colour::rgb(145, 30, 180),  // purple
    Colour::rgb(70, 240, 240),  // cyan
    Colour::rgb(240, 50, 230),  // magenta
    Colour::rgb(210, 245, 60),  // lime
    Colour::rgb(250, 190, 212), // pink
    Colour::rgb(0, 128, 128),   // teal
    Colour::rgb(220, 190, 255), // lavender
    Colour::rgb(170, 110, 40),  // brown
    Colour::rgb(128, 0, 0),     // maroon
    Colour::rgb(170, 255, 195), // mint
    Colour::rgb(128, 128, 0),   // olive
];
