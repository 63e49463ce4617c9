//! The file locator: a linear scan over sectors flagged `sof`, comparing
//! the stored name against the target.

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::header::{FileHeader, HEADER_LEN};
use crate::table::Table;

/// Find the `sof` sector of the chain named `name`, if one exists.
///
/// Propagates I/O errors as `Error::Io`; the caller is responsible for
/// latching them onto the filesystem's sticky `last_error`.
pub fn find<D: BlockDevice>(
    device: &mut D,
    table: &Table,
    reserved: u32,
    sector_size: u32,
    address_start: u32,
    name: &[u8],
) -> Result<Option<(u32, FileHeader)>> {
    let key = FileHeader::pad_name(name).ok_or(Error::NameTooLong)?;
    let mut buf = [0u8; HEADER_LEN];
    for sector in reserved..table.len() {
        if !table.get(sector).sof() {
            continue;
        }
        let address = address_start + sector * sector_size;
        device.read_at(address, &mut buf)?;
        let header = FileHeader::decode(&buf).ok_or(Error::Corrupt)?;
        if header.raw_name() == &key {
            return Ok(Some((sector, header)));
        }
    }
    Ok(None)
}
