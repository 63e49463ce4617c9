//! The recovery engine: mount-time inspection of the two table copies,
//! classification, repair, and orphan-sector reclaim.

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::table::{Table, TABLE_COUNT};

/// A single table copy's classification, before cross-checking against its
/// peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawState {
    Good(u32),
    Bad,
}

/// The classification the mount repair logic is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classified {
    Good,
    Old,
    Bad,
}

fn classify_raw<D: BlockDevice>(
    device: &mut D,
    address_start: u32,
    table_bytes: u32,
    copy_index: u32,
    sector_count: u32,
) -> Result<RawState> {
    let mut buf = vec![0u8; table_bytes as usize];
    device.read_at(address_start + table_bytes * copy_index, &mut buf)?;
    match Table::decode(&buf, sector_count) {
        Some((table, stored_crc)) if table.computed_crc() == stored_crc => Ok(RawState::Good(stored_crc)),
        _ => Ok(RawState::Bad),
    }
}

/// Copy one on-disk table region verbatim onto another: the "copy the good
/// copy over the bad one" repair step.
fn copy_region<D: BlockDevice>(
    device: &mut D,
    address_start: u32,
    table_bytes: u32,
    from: u32,
    to: u32,
) -> Result<()> {
    let mut buf = vec![0u8; table_bytes as usize];
    device.read_at(address_start + table_bytes * from, &mut buf)?;
    device.write_at(address_start + table_bytes * to, &buf)?;
    Ok(())
}

fn load<D: BlockDevice>(
    device: &mut D,
    address_start: u32,
    table_bytes: u32,
    copy_index: u32,
    sector_count: u32,
) -> Result<Table> {
    let mut buf = vec![0u8; table_bytes as usize];
    device.read_at(address_start + table_bytes * copy_index, &mut buf)?;
    match Table::decode(&buf, sector_count) {
        Some((table, stored_crc)) if table.computed_crc() == stored_crc => Ok(table),
        _ => Err(Error::Crc),
    }
}

/// Outcome of [`mount`]: the adopted, orphan-reclaimed working table, plus
/// whether the disk needed a re-commit (informational, for logging/tests).
pub struct Mounted {
    pub table: Table,
    pub repaired: bool,
}

/// Run the full mount-time recovery sequence: classify both copies, repair
/// whichever side needs it, reclaim orphans, and (only if something was
/// reclaimed) recommit both copies before returning.
pub fn mount<D: BlockDevice>(
    device: &mut D,
    address_start: u32,
    table_bytes: u32,
    sector_count: u32,
    reserved: u32,
) -> Result<Mounted> {
    let raw0 = classify_raw(device, address_start, table_bytes, 0, sector_count)?;
    let raw1 = classify_raw(device, address_start, table_bytes, 1, sector_count)?;

    let (state0, state1) = match (raw0, raw1) {
        (RawState::Good(crc0), RawState::Good(crc1)) if crc0 == crc1 => (Classified::Good, Classified::Good),
        (RawState::Good(_), RawState::Good(_)) => (Classified::Good, Classified::Old),
        (RawState::Good(_), RawState::Bad) => (Classified::Good, Classified::Bad),
        (RawState::Bad, RawState::Good(_)) => (Classified::Bad, Classified::Good),
        (RawState::Bad, RawState::Bad) => (Classified::Bad, Classified::Bad),
    };
    log::debug!("mount: table 0 = {state0:?}, table 1 = {state1:?}");

    let table = match (state0, state1) {
        (Classified::Good, Classified::Good) => load(device, address_start, table_bytes, 0, sector_count)?,
        (Classified::Bad, Classified::Good) => {
            copy_region(device, address_start, table_bytes, 1, 0)?;
            load(device, address_start, table_bytes, 1, sector_count)?
        }
        (Classified::Good, Classified::Old) | (Classified::Good, Classified::Bad) => {
            copy_region(device, address_start, table_bytes, 0, 1)?;
            load(device, address_start, table_bytes, 0, sector_count)?
        }
        (Classified::Bad, Classified::Bad) => return Err(Error::Empty),
        // Good/Good-different-CRC is folded into Good/Old above; nothing
        // else is reachable.
        (Classified::Old, _) | (_, Classified::Old) => unreachable!("only table 1 is ever classified Old"),
    };

    let mut table = table;
    let reclaimed = table.reclaim_orphans(reserved);
    let repaired = reclaimed > 0;
    if repaired {
        log::info!("mount: {reclaimed} orphaned sector(s) reclaimed, recommitting table");
        commit(device, address_start, table_bytes, &table)?;
    }

    Ok(Mounted { table, repaired })
}

/// Persist the working table to both redundant copies, in order (T0 then
/// T1). A crash between the two leaves T0 good/new and T1 old, which the
/// next mount repairs forward rather than backward.
pub fn commit<D: BlockDevice>(device: &mut D, address_start: u32, table_bytes: u32, table: &Table) -> Result<()> {
    let bytes = table.encode();
    for copy in 0..TABLE_COUNT {
        device.write_at(address_start + table_bytes * copy, &bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;

    const SECTORS: u32 = 16;
    const SECTOR_SIZE: u32 = 64;
    const TABLE_SECTORS: u32 = 2;
    const RESERVED: u32 = TABLE_SECTORS * TABLE_COUNT;

    fn table_bytes() -> u32 {
        TABLE_SECTORS * SECTOR_SIZE
    }

    fn formatted_device() -> MemoryDevice {
        let mut dev = MemoryDevice::new((SECTORS * SECTOR_SIZE) as usize);
        let table = Table::formatted(SECTORS, RESERVED);
        commit(&mut dev, 0, table_bytes(), &table).unwrap();
        dev
    }

    #[test]
    fn mounts_a_freshly_formatted_device() {
        let mut dev = formatted_device();
        let mounted = mount(&mut dev, 0, table_bytes(), SECTORS, RESERVED).unwrap();
        assert!(!mounted.repaired);
        assert_eq!(mounted.table.len(), SECTORS);
    }

    #[test]
    fn empty_device_is_rejected() {
        let mut dev = MemoryDevice::new((SECTORS * SECTOR_SIZE) as usize);
        let err = mount(&mut dev, 0, table_bytes(), SECTORS, RESERVED).unwrap_err();
        assert_eq!(err, Error::Empty);
    }

    #[test]
    fn bad_copy_zero_is_repaired_from_good_copy_one() {
        let mut dev = formatted_device();
        // Corrupt copy 0 only.
        let mut garbage = vec![0xAAu8; table_bytes() as usize];
        garbage[0] = 0x01; // mismatched CRC prefix
        dev.write_at(0, &garbage).unwrap();

        let mounted = mount(&mut dev, 0, table_bytes(), SECTORS, RESERVED).unwrap();
        assert_eq!(mounted.table.len(), SECTORS);

        // copy 0 on disk should now equal copy 1.
        let mut c0 = vec![0u8; table_bytes() as usize];
        let mut c1 = vec![0u8; table_bytes() as usize];
        dev.read_at(0, &mut c0).unwrap();
        dev.read_at(table_bytes(), &mut c1).unwrap();
        assert_eq!(c0, c1);
    }

    #[test]
    fn stale_copy_one_is_overwritten_by_good_copy_zero() {
        let mut dev = formatted_device();
        let mut table = Table::formatted(SECTORS, RESERVED);
        let mut d = table.get(RESERVED);
        d.set_available(false);
        d.set_sof(true);
        d.set_written(true);
        table.set(RESERVED, d);
        // Only copy 0 reflects the "new" state; copy 1 is the old good copy.
        let bytes = table.encode();
        dev.write_at(0, &bytes).unwrap();

        let mounted = mount(&mut dev, 0, table_bytes(), SECTORS, RESERVED).unwrap();
        assert!(mounted.table.get(RESERVED).written());

        let mut c1 = vec![0u8; table_bytes() as usize];
        dev.read_at(table_bytes(), &mut c1).unwrap();
        assert_eq!(c1, bytes);
    }

    #[test]
    fn both_bad_is_empty() {
        let mut dev = formatted_device();
        let garbage = vec![0x55u8; table_bytes() as usize];
        dev.write_at(0, &garbage).unwrap();
        dev.write_at(table_bytes(), &garbage).unwrap();
        let err = mount(&mut dev, 0, table_bytes(), SECTORS, RESERVED).unwrap_err();
        assert_eq!(err, Error::Empty);
    }

    #[test]
    fn orphaned_sector_is_reclaimed_and_recommitted() {
        let mut dev = formatted_device();
        let mut table = Table::formatted(SECTORS, RESERVED);
        let mut d = table.get(RESERVED);
        d.set_available(false); // allocated, never committed: orphan
        table.set(RESERVED, d);
        commit(&mut dev, 0, table_bytes(), &table).unwrap();

        let mounted = mount(&mut dev, 0, table_bytes(), SECTORS, RESERVED).unwrap();
        assert!(mounted.repaired);
        assert!(mounted.table.get(RESERVED).available());

        // A second mount of the now-clean device makes no further changes.
        let second = mount(&mut dev, 0, table_bytes(), SECTORS, RESERVED).unwrap();
        assert!(!second.repaired);
    }
}
