//! RGB color model shared by the filter/threshold evaluation layer.
//!
//! Colors travel through the system as 24-bit RGB. User-editable JSON blobs
//! carry them as hex strings (`"#RRGGBB"` or `"RRGGBB"`); the display layer
//! receives them pre-scaled by the global color-brightness setting.

use serde::{Deserialize, Serialize};

/// A 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Neutral color shown for an empty or placeholder filter slot.
pub const NEUTRAL: Rgb = Rgb::new(0x80, 0x80, 0x80);

pub const WHITE: Rgb = Rgb::new(0xFF, 0xFF, 0xFF);
pub const BLACK: Rgb = Rgb::new(0x00, 0x00, 0x00);
pub const RED: Rgb = Rgb::new(0xFF, 0x00, 0x00);
pub const GREEN: Rgb = Rgb::new(0x00, 0xFF, 0x00);
pub const BLUE: Rgb = Rgb::new(0x00, 0x00, 0xFF);
pub const YELLOW: Rgb = Rgb::new(0xFF, 0xFF, 0x00);
pub const CHARTREUSE: Rgb = Rgb::new(0x7F, 0xFF, 0x00);
pub const MAGENTA: Rgb = Rgb::new(0xFF, 0x00, 0xFF);
pub const CYAN: Rgb = Rgb::new(0x00, 0xFF, 0xFF);

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse a hex color string, with or without a leading `#`.
    ///
    /// Returns `None` for anything that is not exactly six hex digits.
    pub fn parse_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 {
            return None;
        }
        let value = u32::from_str_radix(hex, 16).ok()?;
        Some(Self {
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
        })
    }

    /// Format as `#RRGGBB`.
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Scale each channel by `brightness / 100` with integer division.
    ///
    /// `brightness >= 100` returns the color unchanged; `0` returns black.
    pub fn scale(self, brightness: u8) -> Self {
        if brightness >= 100 {
            return self;
        }
        if brightness == 0 {
            return BLACK;
        }
        let b = brightness as u16;
        Self {
            r: (self.r as u16 * b / 100) as u8,
            g: (self.g as u16 * b / 100) as u8,
            b: (self.b as u16 * b / 100) as u8,
        }
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Built-in default color for a filter name.
///
/// Known monochrome-imaging filters get conventional colors; anything else
/// is white. The lookup is case-insensitive.
pub fn default_filter_color(name: &str) -> Rgb {
    match name.to_ascii_lowercase().as_str() {
        "l" | "lum" | "luminance" => WHITE,
        "r" | "red" => RED,
        "g" | "green" => GREEN,
        "b" | "blue" => BLUE,
        "ha" | "h-alpha" | "halpha" => CHARTREUSE,
        "sii" | "s2" => MAGENTA,
        "oiii" | "o3" => CYAN,
        _ => WHITE,
    }
}
