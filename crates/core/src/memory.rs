//! Console memory image access
//!
//! Recompiled game code addresses RDRAM through KSEG0 virtual addresses
//! (`0x80000000`-relative). Patches never hold raw pointers into the image;
//! they go through [`ConsoleMemory`], which centralizes the virtual-to-physical
//! translation and the single physical-range validity check.
//!
//! # Layout
//!
//! ```text
//! 0x80000000 - 0x807FFFFF   base RDRAM (8 MB, Expansion Pak)
//! 0x80800000 - ...          extended region (host-side only, never seen by the game)
//! ```
//!
//! The console is big-endian, so every multi-byte access is big-endian.

use thiserror::Error;

/// Base of the KSEG0 segment that game pointers live in
pub const KSEG0_BASE: u32 = 0x8000_0000;

/// Size of the base RDRAM the game itself can address (Expansion Pak)
pub const RDRAM_SIZE_BYTES: u32 = 0x0080_0000;

/// Default size of an image that also covers the extended region
pub const EXTENDED_IMAGE_SIZE: usize = 0x0100_0000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Memory image too small: {size:#X} bytes, need at least {required:#X}")]
    ImageTooSmall { size: usize, required: usize },
    #[error("Address range {addr:#010X}+{len:#X} is not mapped")]
    Unmapped { addr: u32, len: u32 },
}

/// Translate a KSEG0 virtual address to a physical offset
///
/// Uses wrapping arithmetic so addresses below `KSEG0_BASE` land far outside
/// any real image and fail the range check.
#[inline]
pub fn virtual_to_physical(addr: u32) -> u32 {
    addr.wrapping_sub(KSEG0_BASE)
}

/// Typed access to the console memory image
///
/// Implementors must return 0 for unmapped reads and drop unmapped writes,
/// mirroring open-bus behavior. Callers that need to know whether an access is
/// valid check [`ConsoleMemory::is_mapped`] first.
pub trait ConsoleMemory {
    /// Read a byte at a virtual address
    fn read_u8(&self, addr: u32) -> u8;

    /// Read a big-endian halfword at a virtual address
    fn read_u16(&self, addr: u32) -> u16;

    /// Read a big-endian word at a virtual address
    fn read_u32(&self, addr: u32) -> u32;

    /// Write a byte at a virtual address
    fn write_u8(&mut self, addr: u32, val: u8);

    /// Write a big-endian halfword at a virtual address
    fn write_u16(&mut self, addr: u32, val: u16);

    /// Write a big-endian word at a virtual address
    fn write_u32(&mut self, addr: u32, val: u32);

    /// Whether `len` bytes starting at `addr` are backed by the image
    fn is_mapped(&self, addr: u32, len: u32) -> bool;

    fn read_i16(&self, addr: u32) -> i16 {
        self.read_u16(addr) as i16
    }

    fn read_i32(&self, addr: u32) -> i32 {
        self.read_u32(addr) as i32
    }

    /// Reinterpret the word at `addr` as an IEEE-754 single
    fn read_f32(&self, addr: u32) -> f32 {
        f32::from_bits(self.read_u32(addr))
    }

    fn write_f32(&mut self, addr: u32, val: f32) {
        self.write_u32(addr, val.to_bits());
    }
}

/// Flat RDRAM image backed by a byte vector
pub struct Rdram {
    data: Vec<u8>,
}

impl Rdram {
    /// Create a zeroed image of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    /// Create an image covering base RDRAM plus the extended region
    pub fn extended() -> Self {
        Self::new(EXTENDED_IMAGE_SIZE)
    }

    /// Size of the image in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow `len` bytes starting at a virtual address
    pub fn slice(&self, addr: u32, len: u32) -> Result<&[u8], MemoryError> {
        let start = self
            .offset(addr, len)
            .ok_or(MemoryError::Unmapped { addr, len })?;
        Ok(&self.data[start..start + len as usize])
    }

    /// Fail unless the image reaches at least `addr + len`
    pub fn require(&self, addr: u32, len: u32) -> Result<(), MemoryError> {
        if self.is_mapped(addr, len) {
            Ok(())
        } else {
            Err(MemoryError::ImageTooSmall {
                size: self.data.len(),
                required: virtual_to_physical(addr) as usize + len as usize,
            })
        }
    }

    #[inline]
    fn offset(&self, addr: u32, len: u32) -> Option<usize> {
        let phys = virtual_to_physical(addr) as usize;
        let end = phys.checked_add(len as usize)?;
        if end <= self.data.len() {
            Some(phys)
        } else {
            None
        }
    }
}

impl ConsoleMemory for Rdram {
    fn read_u8(&self, addr: u32) -> u8 {
        match self.offset(addr, 1) {
            Some(i) => self.data[i],
            None => 0,
        }
    }

    fn read_u16(&self, addr: u32) -> u16 {
        match self.offset(addr, 2) {
            Some(i) => u16::from_be_bytes([self.data[i], self.data[i + 1]]),
            None => 0,
        }
    }

    fn read_u32(&self, addr: u32) -> u32 {
        match self.offset(addr, 4) {
            Some(i) => u32::from_be_bytes([
                self.data[i],
                self.data[i + 1],
                self.data[i + 2],
                self.data[i + 3],
            ]),
            None => 0,
        }
    }

    fn write_u8(&mut self, addr: u32, val: u8) {
        if let Some(i) = self.offset(addr, 1) {
            self.data[i] = val;
        }
    }

    fn write_u16(&mut self, addr: u32, val: u16) {
        if let Some(i) = self.offset(addr, 2) {
            self.data[i..i + 2].copy_from_slice(&val.to_be_bytes());
        }
    }

    fn write_u32(&mut self, addr: u32, val: u32) {
        if let Some(i) = self.offset(addr, 4) {
            self.data[i..i + 4].copy_from_slice(&val.to_be_bytes());
        }
    }

    fn is_mapped(&self, addr: u32, len: u32) -> bool {
        self.offset(addr, len).is_some()
    }
}
