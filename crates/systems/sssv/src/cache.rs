//! Sprite identity and previous-quad cache
//!
//! The renderer interpolates a quad between its previous and current screen
//! position when both frames tag it with the same group ID. Sprites have no
//! persistent ID in game memory, so one is derived from what the draw call
//! carries: world position (quantized), extents, scale and a per-site salt.

use std::collections::HashMap;

use recomp_core::logging::{log, LogCategory, LogLevel};

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Largest usable quantization shift for a 32-bit coordinate
pub const MAX_COORD_SHIFT: u32 = 31;

#[inline]
fn mix(hash: u32, value: u32) -> u32 {
    (hash ^ value).wrapping_mul(FNV_PRIME)
}

/// Right-shift a 16.16 world coordinate onto a coarser grid
#[inline]
pub fn quantize(world: i32, shift: u32) -> i32 {
    world >> shift.min(MAX_COORD_SHIFT)
}

/// FNV-1a over the identity fields, then salted
///
/// Extents are mixed as 16-bit values. Never returns 0.
pub fn compute_identity(
    qx: i32,
    qy: i32,
    qz: i32,
    half_w: i16,
    half_h: i16,
    scale: i32,
    salt: u32,
) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    hash = mix(hash, qx as u32);
    hash = mix(hash, qy as u32);
    hash = mix(hash, qz as u32);
    hash = mix(hash, half_w as u16 as u32);
    hash = mix(hash, half_h as u16 as u32);
    hash = mix(hash, scale as u32);
    hash ^= salt;
    if hash == 0 {
        1
    } else {
        hash
    }
}

/// Screen-space corners in vertex order: top-left, top-right, bottom-left,
/// bottom-right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuadCorners {
    pub x: [i16; 4],
    pub y: [i16; 4],
}

impl QuadCorners {
    pub fn from_rect(xl: i16, yl: i16, xh: i16, yh: i16) -> Self {
        Self {
            x: [xl, xh, xl, xh],
            y: [yl, yl, yh, yh],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    corners: QuadCorners,
    signature: [i32; 3],
    stamp: u64,
}

#[derive(Debug, Clone)]
pub struct IdentityCache {
    entries: HashMap<u32, CacheEntry>,
    stamp: u64,
    recency_window: u64,
    max_entries: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl IdentityCache {
    pub const DEFAULT_RECENCY_WINDOW: u64 = 300;
    pub const DEFAULT_MAX_ENTRIES: usize = 4096;

    pub fn new(recency_window: u64, max_entries: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_entries.min(1024)),
            stamp: 0,
            recency_window,
            max_entries: max_entries.max(1),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Advance the sequence counter without touching any entry
    pub fn advance(&mut self, ticks: u64) {
        self.stamp += ticks;
    }

    /// Return the corners to interpolate from, then store `current`
    ///
    /// The stored corners are returned only when the entry's signature
    /// matches `signature` and it was refreshed within the recency window;
    /// otherwise `current` comes back unchanged.
    pub fn lookup_and_update(
        &mut self,
        id: u32,
        current: QuadCorners,
        signature: [i32; 3],
    ) -> QuadCorners {
        self.stamp += 1;

        let previous = match self.entries.get(&id) {
            Some(entry)
                if self.stamp - entry.stamp <= self.recency_window
                    && entry.signature == signature =>
            {
                self.hits += 1;
                entry.corners
            }
            _ => {
                self.misses += 1;
                current
            }
        };

        if !self.entries.contains_key(&id) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            id,
            CacheEntry {
                corners: current,
                signature,
                stamp: self.stamp,
            },
        );

        previous
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.stamp)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            self.entries.remove(&id);
            self.evictions += 1;
            log(LogCategory::Cache, LogLevel::Debug, || {
                format!("evicted identity {:08X} ({} entries)", id, self.entries.len())
            });
        }
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RECENCY_WINDOW, Self::DEFAULT_MAX_ENTRIES)
    }
}
