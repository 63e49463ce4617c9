//! The allocation table: an in-RAM working copy of the sector map,
//! CRC-protected, persisted as two redundant on-disk copies.

use crate::crc;

/// 12-bit all-ones. Serves double duty as both the EOF marker for a
/// finished chain and the "not yet linked" marker on a freshly allocated
/// sector: a sector reads as "end of chain" until a later write gives it a
/// real link. See DESIGN.md for the resolution of this naming overlap.
pub const UNLINKED: u16 = 0x0FFF;

/// One table copy per the redundancy factor (two on-disk regions).
pub const TABLE_COUNT: u32 = 2;

/// A single sector's metadata, packed into 16 bits: bits 0..11 `next`, bit
/// 12 `sof`, bit 13 `available`, bit 14 `written`, bit 15 unused. Packed
/// and unpacked explicitly rather than via a compiler bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectorDescriptor {
    raw: u16,
}

const NEXT_MASK: u16 = 0x0FFF;
const SOF_BIT: u16 = 1 << 12;
const AVAILABLE_BIT: u16 = 1 << 13;
const WRITTEN_BIT: u16 = 1 << 14;

impl SectorDescriptor {
    pub fn from_raw(raw: u16) -> Self {
        SectorDescriptor { raw }
    }

    pub fn to_raw(self) -> u16 {
        self.raw
    }

    pub fn next(self) -> u16 {
        self.raw & NEXT_MASK
    }

    pub fn set_next(&mut self, next: u16) {
        debug_assert!(next <= NEXT_MASK);
        self.raw = (self.raw & !NEXT_MASK) | (next & NEXT_MASK);
    }

    pub fn sof(self) -> bool {
        self.raw & SOF_BIT != 0
    }

    pub fn set_sof(&mut self, sof: bool) {
        self.set_bit(SOF_BIT, sof);
    }

    pub fn available(self) -> bool {
        self.raw & AVAILABLE_BIT != 0
    }

    pub fn set_available(&mut self, available: bool) {
        self.set_bit(AVAILABLE_BIT, available);
    }

    pub fn written(self) -> bool {
        self.raw & WRITTEN_BIT != 0
    }

    pub fn set_written(&mut self, written: bool) {
        self.set_bit(WRITTEN_BIT, written);
    }

    fn set_bit(&mut self, bit: u16, value: bool) {
        if value {
            self.raw |= bit;
        } else {
            self.raw &= !bit;
        }
    }

    /// A descriptor reset to "unallocated, unlinked, not a chain start, not
    /// committed": the state of every data sector right after `format` and
    /// the state every freed sector returns to.
    pub fn free() -> Self {
        let mut d = SectorDescriptor::default();
        d.set_available(true);
        d.set_next(UNLINKED);
        d
    }

    /// A descriptor reset to "reserved metadata region": `available=0`,
    /// `next=0`, never `sof`, never linked.
    pub fn reserved() -> Self {
        SectorDescriptor::default()
    }

    /// True when a descriptor is neither free nor committed: an orphan
    /// from an allocation whose close never landed.
    pub fn is_orphan(self) -> bool {
        !self.written() && !self.available()
    }
}

/// The in-RAM working copy of the sector map: one descriptor per sector,
/// CRC-protected as a unit. Persisted on-disk as a 4-byte little-endian CRC
/// followed by the packed descriptor array.
#[derive(Debug, Clone)]
pub struct Table {
    sectors: Vec<SectorDescriptor>,
}

impl Table {
    /// Build a freshly formatted table: the leading `reserved` descriptors
    /// (covering the table's own on-disk footprint, both redundant copies)
    /// are locked down; everything after is free.
    pub fn formatted(sector_count: u32, reserved: u32) -> Self {
        let mut sectors = Vec::with_capacity(sector_count as usize);
        for i in 0..sector_count {
            sectors.push(if i < reserved {
                SectorDescriptor::reserved()
            } else {
                SectorDescriptor::free()
            });
        }
        Table { sectors }
    }

    pub fn len(&self) -> u32 {
        self.sectors.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    pub fn get(&self, index: u32) -> SectorDescriptor {
        self.sectors[index as usize]
    }

    pub fn set(&mut self, index: u32, descriptor: SectorDescriptor) {
        self.sectors[index as usize] = descriptor;
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, SectorDescriptor)> + '_ {
        self.sectors.iter().enumerate().map(|(i, d)| (i as u32, *d))
    }

    /// Decode a table from its on-disk byte image: 4-byte LE CRC followed by
    /// 2 bytes per descriptor, `sector_count` of them.
    pub fn decode(bytes: &[u8], sector_count: u32) -> Option<(Self, u32)> {
        let needed = 4 + sector_count as usize * 2;
        if bytes.len() < needed {
            return None;
        }
        let stored_crc = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let body = &bytes[4..needed];
        let mut sectors = Vec::with_capacity(sector_count as usize);
        for chunk in body.chunks_exact(2) {
            let raw = u16::from_le_bytes([chunk[0], chunk[1]]);
            sectors.push(SectorDescriptor::from_raw(raw));
        }
        Some((Table { sectors }, stored_crc))
    }

    /// Encode the table to its on-disk byte image, including a freshly
    /// computed CRC over the descriptor bytes. Recomputing the CRC is
    /// always the last step before a commit's writes land.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.sectors.len() * 2);
        for d in &self.sectors {
            body.extend_from_slice(&d.to_raw().to_le_bytes());
        }
        let computed = crc::crc32(&body, 0xFFFF_FFFF);
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&computed.to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// The CRC that `encode` would stamp on this table right now, without
    /// paying for the full encode (recovery needs this to classify a
    /// loaded copy before deciding whether to keep it).
    pub fn computed_crc(&self) -> u32 {
        let mut body = Vec::with_capacity(self.sectors.len() * 2);
        for d in &self.sectors {
            body.extend_from_slice(&d.to_raw().to_le_bytes());
        }
        crc::crc32(&body, 0xFFFF_FFFF)
    }

    /// Reset every orphaned sector (allocated but never committed) back to
    /// free. Returns how many were reclaimed: zero means the table was
    /// already clean and mount must not touch the disk.
    pub fn reclaim_orphans(&mut self, reserved: u32) -> u32 {
        let mut reclaimed = 0;
        for i in reserved..self.len() {
            let d = self.get(i);
            if d.is_orphan() {
                log::debug!("sector {i} recovered: orphaned allocation reclaimed");
                self.set(i, SectorDescriptor::free());
                reclaimed += 1;
            }
        }
        reclaimed
    }
}
