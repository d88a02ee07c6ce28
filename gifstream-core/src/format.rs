/// Maximum number of palette entries (an index must fit in one byte).
pub const MAX_PALETTE_LEN: usize = 256;

pub const SIGNATURE: &[u8; 6] = b"GIF89a";
pub const HEADER_SIZE: usize = 13;

pub const EXTENSION_INTRODUCER: u8 = 0x21;
pub const GRAPHIC_CONTROL_LABEL: u8 = 0xF9;
pub const IMAGE_SEPARATOR: u8 = 0x2C;
pub const BLOCK_TERMINATOR: u8 = 0x00;

/// Disposal method 1: leave the frame in place.
pub const DISPOSAL_LEAVE: u8 = 1;

/// Flag bit marking a local color table in the image descriptor.
pub const LOCAL_TABLE_FLAG: u8 = 0x80;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("palette must contain at least one color")]
    EmptyPalette,
    #[error("palette has {0} colors, at most 256 are addressable")]
    PaletteTooLarge(usize),
    #[error("bounds must have non-zero width and height, got {width}x{height}")]
    EmptyBounds { width: u16, height: u16 },
    #[error("bounds at ({x}, {y}) with size {width}x{height} exceed the 16-bit canvas")]
    BoundsOverflow { x: u16, y: u16, width: u16, height: u16 },
    #[error("pixel buffer has {actual} entries, bounds need {expected}")]
    PixelCount { expected: usize, actual: usize },
    #[error("pixel {position} uses index {index} but the palette has {len} colors")]
    IndexOutOfRange { position: usize, index: u8, len: usize },
    #[error("frame at {frame:?} does not fit the {screen_width}x{screen_height} logical screen")]
    OutsideScreen { frame: Bounds, screen_width: u16, screen_height: u16 },
}

/// An 8-bit RGBA color. Alpha is carried for callers but never reaches the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn to_rgb_bytes(&self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    fn distance_sq(&self, other: &Color) -> u32 {
        let d = |a: u8, b: u8| {
            let v = a.abs_diff(b) as u32;
            v * v
        };
        d(self.r, other.r) + d(self.g, other.g) + d(self.b, other.b) + d(self.a, other.a)
    }
}

/// Ordered color table addressed by pixel index. Holds 1..=256 colors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Color>,
}

impl Palette {
    pub fn new(colors: Vec<Color>) -> Result<Self, FormatError> {
        if colors.is_empty() {
            return Err(FormatError::EmptyPalette);
        }
        if colors.len() > MAX_PALETTE_LEN {
            return Err(FormatError::PaletteTooLarge(colors.len()));
        }
        Ok(Self { colors })
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    /// Always false; a palette holds at least one color.
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    /// Index of the entry closest to `color`. Ties go to the lowest index.
    pub fn nearest(&self, color: Color) -> u8 {
        let mut best = 0usize;
        let mut best_dist = u32::MAX;
        for (i, c) in self.colors.iter().enumerate() {
            let dist = c.distance_sq(&color);
            if dist < best_dist {
                best = i;
                best_dist = dist;
                if dist == 0 {
                    break;
                }
            }
        }
        best as u8
    }

    /// Exponent `n` of the declared table size `2^(n+1)`, i.e. the 3-bit
    /// size field of the image descriptor.
    pub fn table_size_field(&self) -> u8 {
        let mut n = 0u8;
        while (2usize << n) < self.colors.len() {
            n += 1;
        }
        n
    }

    /// Number of entries the color table declares on the wire.
    pub fn padded_len(&self) -> usize {
        2usize << self.table_size_field()
    }
}

/// Spatial bounds of a frame: origin plus a non-empty extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Bounds {
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Result<Self, FormatError> {
        if width == 0 || height == 0 {
            return Err(FormatError::EmptyBounds { width, height });
        }
        if x.checked_add(width).is_none() || y.checked_add(height).is_none() {
            return Err(FormatError::BoundsOverflow { x, y, width, height });
        }
        Ok(Self { x, y, width, height })
    }

    /// Bounds anchored at the origin.
    pub fn sized(width: u16, height: u16) -> Result<Self, FormatError> {
        Self::new(0, 0, width, height)
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bounds from the origin to the far corner of `self`.
    pub fn extent(&self) -> Bounds {
        Bounds {
            x: 0,
            y: 0,
            width: self.x.saturating_add(self.width),
            height: self.y.saturating_add(self.height),
        }
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Bounds) -> bool {
        let right = |b: &Bounds| b.x as u32 + b.width as u32;
        let bottom = |b: &Bounds| b.y as u32 + b.height as u32;
        other.x >= self.x && other.y >= self.y && right(other) <= right(self) && bottom(other) <= bottom(self)
    }
}

/// One immutable raster snapshot: palette indices in row-major order plus
/// the palette that interprets them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    bounds: Bounds,
    palette: Palette,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(bounds: Bounds, palette: Palette, pixels: Vec<u8>) -> Result<Self, FormatError> {
        if pixels.len() != bounds.area() {
            return Err(FormatError::PixelCount {
                expected: bounds.area(),
                actual: pixels.len(),
            });
        }
        let len = palette.len();
        if let Some(position) = pixels.iter().position(|&i| i as usize >= len) {
            return Err(FormatError::IndexOutOfRange {
                position,
                index: pixels[position],
                len,
            });
        }
        Ok(Self {
            bounds,
            palette,
            pixels,
        })
    }

    /// A frame with every pixel set to `index`.
    pub fn filled(bounds: Bounds, palette: Palette, index: u8) -> Result<Self, FormatError> {
        Self::new(bounds, palette, vec![index; bounds.area()])
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Palette index at frame-local coordinates.
    pub fn index_at(&self, x: u16, y: u16) -> Option<u8> {
        if x >= self.bounds.width || y >= self.bounds.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.bounds.width as usize + x as usize)
            .copied()
    }
}
