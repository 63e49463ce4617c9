//! Per-open-file state: the caller-owned, transient handle that
//! read/write/close mutate. Not `Clone`, not `Sync`: a handle is never
//! shared.

use crate::error::Error;
use crate::header::FileHeader;

/// Sentinel for "no sector allocated yet" on a fresh write handle's
/// `start_sector`/`current_sector`. Distinct from [`crate::table::UNLINKED`]
/// (the 12-bit in-table EOF/not-yet-linked value): this one lives in a
/// handle's plain `u32` cursor fields and never touches the wire.
pub(crate) const INVALID_SECTOR: u32 = 0xFFFF;

/// Which direction a handle was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

/// Write-side progress: fresh, then writing, then committed or errored.
/// `Read` handles don't need this: a read handle's only state is its
/// cursor, tracked on [`FileHandle`] directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteState {
    /// No byte has been written yet; no sector is allocated.
    Fresh,
    /// At least one byte landed; `start_sector` is valid.
    Writing,
    /// A write call failed; future writes are no-ops and close must roll
    /// the tentative chain back. Carries the failure kind so close knows
    /// whether the last link was ever set.
    Errored(Error),
}

pub struct FileHandle {
    pub(crate) mode: Mode,
    /// Whether CRC verification is enabled for this read handle, chosen at
    /// open time rather than a crate-wide compile-time flag.
    pub(crate) crc_check: bool,
    pub(crate) start_sector: u32,
    pub(crate) current_sector: u32,
    pub(crate) position: u32,
    pub(crate) pos_in_sector: u32,
    pub(crate) header: FileHeader,
    /// The sector of a same-named file this write is superseding, unlinked
    /// atomically with the new chain's commit.
    pub(crate) old_version_start: Option<u32>,
    pub(crate) running_crc: u32,
    pub(crate) write_state: WriteState,
}

impl FileHandle {
    pub(crate) fn new_read(start_sector: u32, header: FileHeader, crc_check: bool) -> Self {
        FileHandle {
            mode: Mode::Read,
            crc_check,
            start_sector,
            current_sector: start_sector,
            position: 0,
            pos_in_sector: crate::header::HEADER_LEN as u32,
            header,
            old_version_start: None,
            running_crc: 0xFFFF_FFFF,
            write_state: WriteState::Fresh,
        }
    }

    pub(crate) fn new_write(header: FileHeader, old_version_start: Option<u32>) -> Self {
        FileHandle {
            mode: Mode::Write,
            crc_check: false,
            start_sector: INVALID_SECTOR,
            current_sector: INVALID_SECTOR,
            position: 0,
            pos_in_sector: 0,
            header,
            old_version_start,
            running_crc: 0xFFFF_FFFF,
            write_state: WriteState::Fresh,
        }
    }

    /// The declared length of the file this handle refers to: for a read
    /// handle, the length recorded in the header at `open` time; for a
    /// write handle, the number of bytes written so far.
    pub fn length(&self) -> u32 {
        match self.mode {
            Mode::Read => self.header.len as u32,
            Mode::Write => self.position,
        }
    }

    /// True once a write handle has latched an error.
    pub fn errored(&self) -> bool {
        matches!(self.write_state, WriteState::Errored(_))
    }
}

/// Free-function form of [`FileHandle::length`], for callers that prefer
/// a standalone accessor over a method.
pub fn flength(handle: &FileHandle) -> u32 {
    handle.length()
}

/// Free-function form of [`FileHandle::errored`].
pub fn ferror(handle: &FileHandle) -> bool {
    handle.errored()
}
