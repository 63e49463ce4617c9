//! The sector allocator: randomized-start linear scan for free sectors.
//! The randomized start is the sole wear-spreading mechanism; no erase
//! counters are kept.

use crate::error::{Error, Result};
use crate::table::Table;
use rand::RngCore;

/// Find and tentatively allocate one free sector, starting from a
/// pseudo-random index and wrapping around the data region.
///
/// "Tentative" means only `available` is cleared here; the caller is
/// responsible for setting `sof`/`next`/`written` as the write path
/// progresses.
pub fn allocate(table: &mut Table, reserved: u32, rng: &mut dyn RngCore) -> Result<u32> {
    let total = table.len();
    if reserved >= total {
        return Err(Error::Full);
    }
    // Drawn over the full sector range, not `[reserved, total)`. A draw
    // landing inside the reserved region is pushed to the midpoint rather
    // than re-rolled.
    let mut start = rng.next_u32() % total;
    if start < reserved {
        start = total / 2;
    }

    for i in start..total {
        let mut d = table.get(i);
        if d.available() {
            d.set_available(false);
            table.set(i, d);
            return Ok(i);
        }
    }
    for i in reserved..start {
        let mut d = table.get(i);
        if d.available() {
            d.set_available(false);
            table.set(i, d);
            return Ok(i);
        }
    }
    Err(Error::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn allocates_a_free_sector_and_marks_it_unavailable() {
        let mut t = Table::formatted(16, 4);
        let mut rng = StepRng::new(0, 1);
        let sector = allocate(&mut t, 4, &mut rng).unwrap();
        assert!(sector >= 4);
        assert!(!t.get(sector).available());
    }

    #[test]
    fn wraps_around_when_start_lands_past_remaining_free_sectors() {
        let mut t = Table::formatted(8, 2);
        // Free only sector 2; point the "random" start well past it.
        for i in 2..8 {
            let mut d = t.get(i);
            d.set_available(i == 2);
            t.set(i, d);
        }
        let mut rng = StepRng::new(u32::MAX as u64, 0);
        let sector = allocate(&mut t, 2, &mut rng).unwrap();
        assert_eq!(sector, 2);
    }

    #[test]
    fn returns_full_when_no_sector_is_available() {
        let mut t = Table::formatted(6, 2);
        for i in 2..6 {
            let mut d = t.get(i);
            d.set_available(false);
            t.set(i, d);
        }
        let mut rng = StepRng::new(0, 1);
        assert_eq!(allocate(&mut t, 2, &mut rng), Err(Error::Full));
    }

    #[test]
    fn a_start_inside_the_reserved_region_is_pushed_to_the_midpoint() {
        let mut t = Table::formatted(20, 10);
        // every rng draw lands on 0, which is inside the reserved region
        let mut rng = StepRng::new(0, 0);
        let sector = allocate(&mut t, 10, &mut rng).unwrap();
        assert!(sector >= 10);
    }
}
