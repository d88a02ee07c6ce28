use std::collections::HashMap;

use crate::format::BLOCK_TERMINATOR;

/// Largest code the dictionary may hand out before it is reset.
const MAX_CODE: u16 = 4095;

/// Longest payload a single sub-block can carry.
pub const MAX_SUB_BLOCK: usize = 255;

/// Initial LZW code size for a palette: the bits needed to address every
/// declared table entry, never below 2.
pub fn min_code_size(table_size_field: u8) -> u8 {
    (table_size_field + 1).max(2)
}

/// Packs variable-width codes least-significant-bit first.
#[derive(Default)]
struct BitWriter {
    out: Vec<u8>,
    bits: u32,
    n_bits: u32,
}

impl BitWriter {
    fn write(&mut self, code: u16, width: u8) {
        self.bits |= (code as u32) << self.n_bits;
        self.n_bits += width as u32;
        while self.n_bits >= 8 {
            self.out.push(self.bits as u8);
            self.bits >>= 8;
            self.n_bits -= 8;
        }
    }

    /// Emit the trailing partial byte, zero-padded.
    fn finish(mut self) -> Vec<u8> {
        if self.n_bits > 0 {
            self.out.push(self.bits as u8);
        }
        self.out
    }
}

/// Dictionary coder state: current code width, next implied code, and the
/// `(prefix, literal) -> code` table.
struct Lzw {
    min_code_size: u8,
    width: u8,
    next: u16,
    overflow: u16,
    table: HashMap<(u16, u8), u16>,
    bits: BitWriter,
}

impl Lzw {
    fn new(min_code_size: u8) -> Self {
        let mut lzw = Self {
            min_code_size,
            width: 0,
            next: 0,
            overflow: 0,
            table: HashMap::new(),
            bits: BitWriter::default(),
        };
        lzw.reset();
        lzw
    }

    fn clear_code(&self) -> u16 {
        1 << self.min_code_size
    }

    fn end_code(&self) -> u16 {
        self.clear_code() + 1
    }

    fn reset(&mut self) {
        self.width = self.min_code_size + 1;
        self.next = self.end_code();
        self.overflow = 1 << self.width;
        self.table.clear();
    }

    /// Advance the next implied code. Returns false when the dictionary was
    /// full and has been cleared, in which case nothing may be inserted.
    fn bump(&mut self) -> bool {
        self.next += 1;
        if self.next == self.overflow {
            self.width += 1;
            self.overflow <<= 1;
        }
        if self.next == MAX_CODE {
            let clear = self.clear_code();
            self.bits.write(clear, self.width);
            self.reset();
            return false;
        }
        true
    }
}

/// LZW-compress a stream of palette indices with the variable code width
/// scheme of the image data block. The output starts with a clear code, ends
/// with the end-of-information code and is padded to a whole byte.
pub fn compress(min_code_size: u8, data: &[u8]) -> Vec<u8> {
    let mut lzw = Lzw::new(min_code_size);
    let (clear, end) = (lzw.clear_code(), lzw.end_code());
    lzw.bits.write(clear, lzw.width);

    let Some((&first, rest)) = data.split_first() else {
        lzw.bits.write(end, lzw.width);
        return lzw.bits.finish();
    };

    let mut code = first as u16;
    for &literal in rest {
        if let Some(&hit) = lzw.table.get(&(code, literal)) {
            code = hit;
            continue;
        }
        lzw.bits.write(code, lzw.width);
        let prefix = code;
        code = literal as u16;
        if lzw.bump() {
            lzw.table.insert((prefix, literal), lzw.next);
        }
    }

    lzw.bits.write(code, lzw.width);
    lzw.bump();
    lzw.bits.write(end, lzw.width);
    lzw.bits.finish()
}

/// Append `data` as length-prefixed sub-blocks of at most 255 bytes, followed
/// by the zero-length terminator.
pub fn write_sub_blocks(out: &mut Vec<u8>, data: &[u8]) {
    for chunk in data.chunks(MAX_SUB_BLOCK) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    out.push(BLOCK_TERMINATOR);
}
