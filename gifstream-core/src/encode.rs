use std::io::Write;
use std::time::Duration;

use crate::compress;
use crate::format::*;

/// Convert a display delay into the 1/100 s units of the graphic control
/// extension, saturating at the 16-bit field limit.
pub fn delay_hundredths(delay: Duration) -> u16 {
    (delay.as_millis() / 10).min(u16::MAX as u128) as u16
}

/// Serializes an endless animation onto a byte sink, one frame block at a
/// time. Output is staged in memory and only handed to the sink on
/// [`flush`](StreamEncoder::flush), so a failed flush never leaves half a
/// frame block behind the bytes that were already delivered.
pub struct StreamEncoder<W: Write> {
    writer: W,
    buf: Vec<u8>,
    /// Logical screen negotiated by the header, once written.
    screen: Option<Bounds>,
}

impl<W: Write> StreamEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: Vec::with_capacity(64 * 1024),
            screen: None,
        }
    }

    /// Stage the stream header. Only the first call per encoder emits bytes.
    /// The logical screen spans from the origin to the far corner of `bounds`.
    pub fn write_header(&mut self, bounds: Bounds) {
        if self.screen.is_some() {
            return;
        }
        let screen = bounds.extent();
        self.buf.extend_from_slice(SIGNATURE);
        self.buf.extend_from_slice(&screen.width.to_le_bytes());
        self.buf.extend_from_slice(&screen.height.to_le_bytes());
        // No global color table; every frame carries its own.
        self.buf.push(0x00);
        // Background color index, pixel aspect ratio.
        self.buf.push(0x00);
        self.buf.push(0x00);
        self.screen = Some(screen);
    }

    /// Stage one self-contained frame block: graphic control extension,
    /// image descriptor, local color table and chunked LZW pixel data.
    ///
    /// Fails without staging anything if the frame does not fit the logical
    /// screen announced by the header.
    pub fn write_frame_block(&mut self, frame: &Frame, delay: u16) -> Result<(), FormatError> {
        let bounds = frame.bounds();
        self.write_header(bounds);
        if let Some(screen) = self.screen.filter(|s| !s.contains(&bounds)) {
            return Err(FormatError::OutsideScreen {
                frame: bounds,
                screen_width: screen.width,
                screen_height: screen.height,
            });
        }

        // Graphic control extension: leave in place, no transparency.
        self.buf.extend_from_slice(&[EXTENSION_INTRODUCER, GRAPHIC_CONTROL_LABEL, 0x04]);
        self.buf.push(DISPOSAL_LEAVE << 2);
        self.buf.extend_from_slice(&delay.to_le_bytes());
        self.buf.push(0x00);
        self.buf.push(BLOCK_TERMINATOR);

        let palette = frame.palette();
        let size_field = palette.table_size_field();

        self.buf.push(IMAGE_SEPARATOR);
        self.buf.extend_from_slice(&bounds.x.to_le_bytes());
        self.buf.extend_from_slice(&bounds.y.to_le_bytes());
        self.buf.extend_from_slice(&bounds.width.to_le_bytes());
        self.buf.extend_from_slice(&bounds.height.to_le_bytes());
        self.buf.push(LOCAL_TABLE_FLAG | size_field);

        for color in palette.colors() {
            self.buf.extend_from_slice(&color.to_rgb_bytes());
        }
        // Filler entries up to the declared table size are black.
        let filler = palette.padded_len() - palette.len();
        self.buf.extend(std::iter::repeat(0u8).take(filler * 3));

        let code_size = compress::min_code_size(size_field);
        self.buf.push(code_size);
        let data = compress::compress(code_size, frame.pixels());
        compress::write_sub_blocks(&mut self.buf, &data);

        log::debug!(
            "encoded {}x{} frame: {} colors, {} compressed bytes",
            bounds.width,
            bounds.height,
            palette.len(),
            data.len()
        );
        Ok(())
    }

    /// Push every staged byte through the sink and flush it. On failure the
    /// staged bytes are dropped; the stream cannot be resumed mid-block.
    pub fn flush(&mut self) -> std::io::Result<()> {
        let result = self
            .writer
            .write_all(&self.buf)
            .and_then(|()| self.writer.flush());
        self.buf.clear();
        result
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
