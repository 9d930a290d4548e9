//! Color filter array description.

use std::fmt;
use std::str::FromStr;

/// Color of one filter cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CfaColor {
    Red,
    Green,
    Blue,
    Cyan,
    Magenta,
    Yellow,
    White,
    FujiGreen,
    #[default]
    Unknown,
}

impl CfaColor {
    /// Color for an EXIF/DNG `CFAPattern` code.
    pub fn from_exif(code: u8) -> Self {
        match code {
            0 => CfaColor::Red,
            1 => CfaColor::Green,
            2 => CfaColor::Blue,
            3 => CfaColor::Cyan,
            4 => CfaColor::Magenta,
            5 => CfaColor::Yellow,
            6 => CfaColor::White,
            _ => CfaColor::Unknown,
        }
    }

    /// Two-bit color index used by dcraw's `filters` word.
    pub fn dcraw_index(self) -> u32 {
        match self {
            CfaColor::Red => 0,
            CfaColor::Green | CfaColor::FujiGreen => 1,
            CfaColor::Blue => 2,
            _ => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CfaColor::Red => "RED",
            CfaColor::Green => "GREEN",
            CfaColor::Blue => "BLUE",
            CfaColor::Cyan => "CYAN",
            CfaColor::Magenta => "MAGENTA",
            CfaColor::Yellow => "YELLOW",
            CfaColor::White => "WHITE",
            CfaColor::FujiGreen => "FUJIGREEN",
            CfaColor::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for CfaColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CfaColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RED" => Ok(CfaColor::Red),
            "GREEN" => Ok(CfaColor::Green),
            "BLUE" => Ok(CfaColor::Blue),
            "CYAN" => Ok(CfaColor::Cyan),
            "MAGENTA" => Ok(CfaColor::Magenta),
            "YELLOW" => Ok(CfaColor::Yellow),
            "WHITE" => Ok(CfaColor::White),
            "FUJIGREEN" | "FUJI_GREEN" => Ok(CfaColor::FujiGreen),
            other => Err(format!("unknown CFA color '{other}'")),
        }
    }
}

/// A repeating `width` x `height` pattern of filter colors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColorFilterArray {
    width: usize,
    height: usize,
    colors: Vec<CfaColor>,
}

impl ColorFilterArray {
    /// An all-unknown pattern of the given size.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            colors: vec![CfaColor::Unknown; width * height],
        }
    }

    /// A 2x2 pattern given in row-major order.
    pub fn new_2x2(c0: CfaColor, c1: CfaColor, c2: CfaColor, c3: CfaColor) -> Self {
        Self {
            width: 2,
            height: 2,
            colors: vec![c0, c1, c2, c3],
        }
    }

    /// Build from row-major colors. Returns `None` if the count does not match.
    pub fn from_colors(width: usize, height: usize, colors: Vec<CfaColor>) -> Option<Self> {
        (width * height == colors.len()).then_some(Self {
            width,
            height,
            colors,
        })
    }

    /// Parse an `RGGB`-style string of single-letter colors.
    pub fn from_pattern(width: usize, height: usize, pattern: &str) -> Option<Self> {
        let colors = pattern
            .chars()
            .map(|c| match c.to_ascii_uppercase() {
                'R' => Some(CfaColor::Red),
                'G' => Some(CfaColor::Green),
                'B' => Some(CfaColor::Blue),
                'C' => Some(CfaColor::Cyan),
                'M' => Some(CfaColor::Magenta),
                'Y' => Some(CfaColor::Yellow),
                'W' => Some(CfaColor::White),
                'F' => Some(CfaColor::FujiGreen),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Self::from_colors(width, height, colors)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Number of cells in one repetition.
    pub fn area(&self) -> usize {
        self.colors.len()
    }

    /// Color at image position (x, y); the pattern repeats.
    pub fn color_at(&self, x: usize, y: usize) -> CfaColor {
        if self.colors.is_empty() {
            return CfaColor::Unknown;
        }
        self.colors[(y % self.height) * self.width + (x % self.width)]
    }

    pub fn set_color_at(&mut self, x: usize, y: usize, color: CfaColor) {
        if x < self.width && y < self.height {
            self.colors[y * self.width + x] = color;
        }
    }

    /// Shift the pattern so that column `n` becomes column 0.
    pub fn shift_left(&mut self, n: usize) {
        if self.colors.is_empty() {
            return;
        }
        let old = self.colors.clone();
        for y in 0..self.height {
            for x in 0..self.width {
                self.colors[y * self.width + x] = old[y * self.width + (x + n) % self.width];
            }
        }
    }

    /// Shift the pattern so that row `n` becomes row 0.
    pub fn shift_down(&mut self, n: usize) {
        if self.colors.is_empty() {
            return;
        }
        let old = self.colors.clone();
        for y in 0..self.height {
            for x in 0..self.width {
                self.colors[y * self.width + x] = old[((y + n) % self.height) * self.width + x];
            }
        }
    }

    /// The dcraw `filters` word: two bits per cell for an 8-row x 2-column tile.
    ///
    /// Returns 9 for the 6x6 X-Trans layout and 1 for patterns dcraw cannot
    /// express this way.
    pub fn dcraw_filters(&self) -> u32 {
        if self.width == 6 && self.height == 6 {
            return 9;
        }
        if self.colors.is_empty()
            || self.width > 2
            || self.height > 8
            || !self.width.is_power_of_two()
            || !self.height.is_power_of_two()
        {
            return 1;
        }
        let mut filters = 0u32;
        for row in 0..8 {
            for col in 0..2 {
                let color = self.color_at(col, row).dcraw_index();
                filters |= color << (((row & 7) * 2 + (col & 1)) * 2);
            }
        }
        filters
    }

    /// Row-major color names, as stored in the camera database.
    pub fn describe(&self) -> String {
        self.colors
            .iter()
            .map(|c| c.name().chars().next().unwrap_or('?'))
            .collect()
    }
}
