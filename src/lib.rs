//! A flat, power-fail-tolerant filesystem for block-erasable storage: NOR
//! flash, EEPROM, FRAM, or anything else exposed as a fixed-page-size,
//! byte-addressable device via [`BlockDevice`].
//!
//! There is no directory hierarchy and no CLI: every file lives at the top
//! level, addressed by a short fixed-width name, and the only way in is the
//! [`Filesystem`] API. Crash safety comes from a redundant, CRC-protected
//! allocation table and a fixed commit order (payload, then header, then
//! both table copies) rather than a journal or write-ahead log. See
//! [`recovery`] for the mount-time repair this buys.

mod allocator;
mod crc;
mod device;
mod error;
mod fs;
mod handle;
mod header;
mod locator;
mod recovery;
mod table;

pub use device::{BlockDevice, MemoryDevice};
pub use error::{errstr, Error, Result};
pub use fs::{FileInfo, Filesystem, FsConfig, FsInfo};
pub use handle::{ferror, flength, FileHandle, Mode};

/// Fixed name capacity in bytes, including no terminator requirement for a
/// name that fills it exactly.
pub use header::NAMELEN;
