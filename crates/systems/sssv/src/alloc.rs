//! Frame-scoped scratch allocator in extended RDRAM
//!
//! The game's own vertex pool is small and shared with other data, so
//! billboard matrices and vertices come from a dedicated pool above the 8 MB
//! the game can see. Allocation is a bump pointer in fixed-size slots; the
//! whole pool is released when the frame token changes.
//!
//! The allocator also carries per-frame caches that live exactly as long as
//! the pool contents: the addresses of the shared ortho/identity matrices and
//! the game's view-projection matrix.

use recomp_core::graphics::Mat4;
use recomp_core::logging::{log, LogCategory, LogLevel};
use thiserror::Error;

/// Default pool placement and size: 8192 slots x 16 bytes = 128 KB
pub const DEFAULT_POOL_BASE: u32 = 0x8090_0000;
pub const DEFAULT_POOL_SLOTS: u32 = 8192;
pub const DEFAULT_SLOT_BYTES: u32 = 16;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("Scratch pool exhausted: need {needed} slots, {available} free")]
    Exhausted { needed: u32, available: u32 },
    #[error("Scratch pool of {slots} x {slot_bytes} bytes at {base:#010X} overflows the address space")]
    Overflow { base: u32, slots: u32, slot_bytes: u32 },
}

/// Ortho projection and identity view matrices shared by every billboard
/// drawn in one frame at one screen size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedMatrices {
    pub proj_addr: u32,
    pub view_addr: u32,
    pub screen_w: i16,
    pub screen_h: i16,
}

#[derive(Debug, Clone)]
pub struct ScratchAllocator {
    base: u32,
    capacity_slots: u32,
    slot_bytes: u32,
    frame_token: u32,
    used_slots: u32,
    matrices: Option<SharedMatrices>,
    view_projection: Option<Mat4>,
}

impl ScratchAllocator {
    pub fn new(base: u32, capacity_slots: u32, slot_bytes: u32) -> Self {
        Self {
            base,
            capacity_slots,
            slot_bytes: slot_bytes.max(1),
            frame_token: 0,
            used_slots: 0,
            matrices: None,
            view_projection: None,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn capacity_slots(&self) -> u32 {
        self.capacity_slots
    }

    pub fn used_slots(&self) -> u32 {
        self.used_slots
    }

    /// Pool size in bytes, `None` if it does not fit in 32 bits
    pub fn pool_bytes(&self) -> Option<u32> {
        self.capacity_slots.checked_mul(self.slot_bytes)
    }

    /// Check the whole pool is addressable and return its size in bytes
    pub fn validate(&self) -> Result<u32, AllocError> {
        self.pool_bytes()
            .filter(|&bytes| self.base.checked_add(bytes).is_some())
            .ok_or(self.overflow())
    }

    fn overflow(&self) -> AllocError {
        AllocError::Overflow {
            base: self.base,
            slots: self.capacity_slots,
            slot_bytes: self.slot_bytes,
        }
    }

    fn slot_address(&self, slot: u32) -> Option<u32> {
        slot.checked_mul(self.slot_bytes)
            .and_then(|offset| self.base.checked_add(offset))
    }

    pub fn frame_token(&self) -> u32 {
        self.frame_token
    }

    /// Reset the pool and per-frame caches if `token` differs from the last one
    ///
    /// Returns true when a new frame was detected.
    pub fn detect_new_frame(&mut self, token: u32) -> bool {
        if token == self.frame_token {
            return false;
        }
        log(LogCategory::Alloc, LogLevel::Trace, || {
            format!(
                "new frame token {:08X} (was {:08X}), releasing {} slots",
                token, self.frame_token, self.used_slots
            )
        });
        self.frame_token = token;
        self.used_slots = 0;
        self.matrices = None;
        self.view_projection = None;
        true
    }

    /// Address the next allocation would return
    pub fn next_address(&self) -> Option<u32> {
        self.slot_address(self.used_slots)
    }

    /// Slots needed for `bytes`, rounded up
    pub fn slots_for(&self, bytes: u32) -> u32 {
        bytes.div_ceil(self.slot_bytes)
    }

    pub fn can_allocate(&self, bytes: u32) -> bool {
        self.used_slots
            .checked_add(self.slots_for(bytes))
            .is_some_and(|end| end <= self.capacity_slots)
    }

    /// Reserve `bytes` and return the virtual address of the range
    ///
    /// On failure nothing is reserved.
    pub fn allocate(&mut self, bytes: u32) -> Result<u32, AllocError> {
        let needed = self.slots_for(bytes);
        if !self.can_allocate(bytes) {
            log(LogCategory::Alloc, LogLevel::Debug, || {
                format!(
                    "pool exhausted: {} bytes requested, {}/{} slots used",
                    bytes, self.used_slots, self.capacity_slots
                )
            });
            return Err(AllocError::Exhausted {
                needed,
                available: self.capacity_slots - self.used_slots,
            });
        }
        let end = self.used_slots + needed;
        let addr = match (self.next_address(), self.slot_address(end)) {
            (Some(addr), Some(_)) => addr,
            _ => return Err(self.overflow()),
        };
        self.used_slots = end;
        Ok(addr)
    }

    /// Shared matrices written earlier this frame for the same screen size
    pub fn matrices_for(&self, screen_w: i16, screen_h: i16) -> Option<SharedMatrices> {
        self.matrices
            .filter(|m| m.screen_w == screen_w && m.screen_h == screen_h)
    }

    pub fn cache_matrices(&mut self, matrices: SharedMatrices) {
        self.matrices = Some(matrices);
    }

    pub fn matrices_cached(&self) -> bool {
        self.matrices.is_some()
    }

    pub fn view_projection(&self) -> Option<&Mat4> {
        self.view_projection.as_ref()
    }

    pub fn cache_view_projection(&mut self, matrix: Mat4) {
        self.view_projection = Some(matrix);
    }
}

impl Default for ScratchAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_BASE, DEFAULT_POOL_SLOTS, DEFAULT_SLOT_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recomp_core::graphics::identity;

    #[test]
    fn test_allocations_are_contiguous_and_rounded() {
        let mut alloc = ScratchAllocator::default();
        alloc.detect_new_frame(0x8030_0000);

        assert_eq!(alloc.allocate(96), Ok(DEFAULT_POOL_BASE));
        assert_eq!(alloc.used_slots(), 6);
        assert_eq!(alloc.allocate(1), Ok(DEFAULT_POOL_BASE + 96));
        assert_eq!(alloc.used_slots(), 7);
        assert_eq!(alloc.allocate(224), Ok(DEFAULT_POOL_BASE + 112));
        assert_eq!(alloc.used_slots(), 21);
    }

    #[test]
    fn test_used_slots_monotonic_and_bounded() {
        let mut alloc = ScratchAllocator::new(0x8090_0000, 10, 16);
        let requests = [16, 40, 0, 33, 64, 16, 200, 5, 16];
        let mut last = 0;
        for bytes in requests {
            let before = alloc.used_slots();
            let result = alloc.allocate(bytes);
            assert!(alloc.used_slots() >= last);
            assert!(alloc.used_slots() <= alloc.capacity_slots());
            if result.is_err() {
                assert_eq!(alloc.used_slots(), before);
            }
            last = alloc.used_slots();
        }
    }

    #[test]
    fn test_exhaustion_leaves_state_untouched() {
        let mut alloc = ScratchAllocator::new(0x8090_0000, 4, 16);
        assert!(alloc.allocate(48).is_ok());
        assert!(!alloc.can_allocate(32));
        assert_eq!(
            alloc.allocate(32),
            Err(AllocError::Exhausted {
                needed: 2,
                available: 1
            })
        );
        assert_eq!(alloc.used_slots(), 3);
        // The remaining slot is still usable
        assert_eq!(alloc.allocate(16), Ok(0x8090_0030));
    }

    #[test]
    fn test_oversized_layout_is_rejected() {
        let alloc = ScratchAllocator::default();
        assert_eq!(alloc.validate(), Ok(0x2_0000));

        // 0x1000_0000 slots x 16 bytes does not fit in 32 bits
        let alloc = ScratchAllocator::new(DEFAULT_POOL_BASE, 0x1000_0000, 16);
        assert_eq!(alloc.pool_bytes(), None);
        assert!(matches!(alloc.validate(), Err(AllocError::Overflow { .. })));

        // Fits in 32 bits but runs past the top of the address space
        let alloc = ScratchAllocator::new(0xFFFF_0000, 0x2000, 16);
        assert_eq!(alloc.pool_bytes(), Some(0x2_0000));
        assert!(matches!(alloc.validate(), Err(AllocError::Overflow { .. })));
    }

    #[test]
    fn test_allocation_past_address_space_fails_cleanly() {
        let mut alloc = ScratchAllocator::new(0xFFFF_FF00, 64, 16);
        assert_eq!(alloc.allocate(0xF0), Ok(0xFFFF_FF00));
        assert_eq!(alloc.used_slots(), 15);
        assert_eq!(alloc.next_address(), Some(0xFFFF_FFF0));

        // The last slot would end exactly at 2^32
        assert!(matches!(alloc.allocate(16), Err(AllocError::Overflow { .. })));
        assert_eq!(alloc.used_slots(), 15);

        // Slot counts near u32::MAX do not wrap
        let mut alloc = ScratchAllocator::new(0, u32::MAX, 1);
        assert_eq!(alloc.allocate(0xFFFF_FFF0), Ok(0));
        assert!(!alloc.can_allocate(u32::MAX));
        assert_eq!(
            alloc.allocate(16),
            Err(AllocError::Exhausted {
                needed: 16,
                available: 15
            })
        );
    }

    #[test]
    fn test_frame_reset_is_idempotent() {
        let mut alloc = ScratchAllocator::default();
        assert!(alloc.detect_new_frame(0x8030_0000));
        alloc.allocate(224).unwrap();
        alloc.cache_matrices(SharedMatrices {
            proj_addr: DEFAULT_POOL_BASE,
            view_addr: DEFAULT_POOL_BASE + 64,
            screen_w: 320,
            screen_h: 240,
        });
        alloc.cache_view_projection(identity());

        // Same token: nothing changes
        assert!(!alloc.detect_new_frame(0x8030_0000));
        assert_eq!(alloc.used_slots(), 14);
        assert!(alloc.matrices_cached());
        assert!(alloc.view_projection().is_some());

        // New token: pool and both caches reset
        assert!(alloc.detect_new_frame(0x8034_0000));
        assert_eq!(alloc.used_slots(), 0);
        assert!(!alloc.matrices_cached());
        assert!(alloc.view_projection().is_none());
        assert_eq!(alloc.frame_token(), 0x8034_0000);
    }

    #[test]
    fn test_matrix_cache_requires_same_screen_size() {
        let mut alloc = ScratchAllocator::default();
        let shared = SharedMatrices {
            proj_addr: DEFAULT_POOL_BASE,
            view_addr: DEFAULT_POOL_BASE + 64,
            screen_w: 320,
            screen_h: 240,
        };
        alloc.cache_matrices(shared);
        assert_eq!(alloc.matrices_for(320, 240), Some(shared));
        assert_eq!(alloc.matrices_for(424, 240), None);
    }
}
