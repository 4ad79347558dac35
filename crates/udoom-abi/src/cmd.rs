//! Front-end command packets.
//!
//! The driver never looks inside a command stream; this module exists for whoever produces one
//! (tests, the CLI workload) and for the device model that consumes it. Every packet is five
//! little-endian words:
//!
//! | word | meaning |
//! |------|---------|
//! | 0 | header: opcode in bits 7:0, 8-bit color in bits 15:8 |
//! | 1 | destination surface VA |
//! | 2 | destination pitch in bytes |
//! | 3 | `x | y << 16` of the first point |
//! | 4 | second point (`DRAW_LINE`) or `width | height << 16` (`FILL_RECT`) |

pub const CMD_WORDS: usize = 5;
pub const CMD_SIZE_BYTES: u32 = (CMD_WORDS * 4) as u32;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CmdOpcode {
    FillRect = 1,
    DrawLine = 2,
}

impl CmdOpcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::FillRect),
            2 => Some(Self::DrawLine),
            _ => None,
        }
    }
}

#[inline]
pub const fn header(opcode: CmdOpcode, color: u8) -> u32 {
    (opcode as u32) | ((color as u32) << 8)
}

#[inline]
pub const fn pack_xy(x: u16, y: u16) -> u32 {
    (x as u32) | ((y as u32) << 16)
}

#[inline]
pub const fn unpack_xy(word: u32) -> (u16, u16) {
    (word as u16, (word >> 16) as u16)
}

/// Decoded view of a packet header word.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CmdHeader {
    pub opcode: u8,
    pub color: u8,
}

impl CmdHeader {
    pub fn decode(word: u32) -> Self {
        Self {
            opcode: word as u8,
            color: (word >> 8) as u8,
        }
    }
}

/// Builds a command stream one packet at a time.
#[derive(Debug, Default, Clone)]
pub struct CmdWriter {
    words: Vec<u32>,
}

impl CmdWriter {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn draw_line(&mut self, color: u8, dst: u32, pitch: u32, x0: u16, y0: u16, x1: u16, y1: u16) {
        self.words.extend_from_slice(&[
            header(CmdOpcode::DrawLine, color),
            dst,
            pitch,
            pack_xy(x0, y0),
            pack_xy(x1, y1),
        ]);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn fill_rect(&mut self, color: u8, dst: u32, pitch: u32, x: u16, y: u16, width: u16, height: u16) {
        self.words.extend_from_slice(&[
            header(CmdOpcode::FillRect, color),
            dst,
            pitch,
            pack_xy(x, y),
            pack_xy(width, height),
        ]);
    }

    /// Appends an arbitrary word; used to build malformed streams.
    pub fn raw(&mut self, word: u32) {
        self.words.push(word);
    }

    pub fn len_bytes(&self) -> u32 {
        (self.words.len() * 4) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}
