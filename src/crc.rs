//! The CRC-32 variant used throughout this crate: AUTODIN-II / Ethernet
//! polynomial `0x04C11DB7`, seed `0xFFFFFFFF`, MSB-first (no reflection),
//! no final XOR. Parameter for parameter this is the algorithm the CRC
//! catalog calls CRC-32/MPEG-2, so the `crc` crate's named constant is used
//! directly rather than hand-assembling the table.

use crc::{Crc, CRC_32_MPEG_2};

const UFAT_CRC32: crc::Algorithm<u32> = CRC_32_MPEG_2;

/// A running CRC-32 computation that can be fed chunks incrementally, the
/// way a per-file CRC folds each write/read chunk into the previous
/// result.
pub struct Digest {
    crc: u32,
    engine: &'static Crc<u32>,
}

static ENGINE: Crc<u32> = Crc::<u32>::new(&UFAT_CRC32);

impl Digest {
    /// Start a new running CRC with the standard seed.
    pub fn new() -> Self {
        Digest { crc: UFAT_CRC32.init, engine: &ENGINE }
    }

    /// Resume a running CRC from a previously folded value (used when a
    /// stream handle already carries one forward across calls).
    pub fn resume(seed: u32) -> Self {
        Digest { crc: seed, engine: &ENGINE }
    }

    /// Fold another chunk of bytes into the running value.
    pub fn update(&mut self, bytes: &[u8]) {
        let mut digest = self.engine.digest_with_initial(self.crc);
        digest.update(bytes);
        self.crc = digest.finalize();
    }

    /// The CRC value as of the last `update`.
    pub fn value(&self) -> u32 {
        self.crc
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot CRC over a full byte range with the given seed, used for the
/// allocation table (whose CRC is always recomputed over the whole
/// descriptor array at once rather than incrementally).
pub fn crc32(bytes: &[u8], seed: u32) -> u32 {
    let mut d = Digest::resume(seed);
    d.update(bytes);
    d.value()
}
