//! The filesystem engine: format, mount, and the file operations (open,
//! read, write, close, remove, exists, fsinfo), wired together over the
//! allocator, table, recovery engine, and locator.

use std::fmt;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::allocator;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::handle::{FileHandle, Mode, WriteState, INVALID_SECTOR};
use crate::header::{FileHeader, HEADER_LEN};
use crate::locator;
use crate::recovery;
use crate::table::{Table, TABLE_COUNT, UNLINKED};

/// Configuration fixed at construction: address base, sector geometry, and
/// table redundancy width.
#[derive(Debug, Clone, Copy)]
pub struct FsConfig {
    /// Byte offset of this filesystem's region on the device.
    pub address_start: u32,
    /// Total sector count, including the reserved table region. Must be
    /// less than `0x0FFF`: the 12-bit `next` field can't address more.
    pub sectors: u32,
    /// Bytes per sector.
    pub sector_size: u32,
    /// Sectors per table copy. `table_sectors * sector_size` must be large
    /// enough to hold the CRC plus one packed descriptor per sector.
    pub table_sectors: u32,
}

impl FsConfig {
    fn reserved_sectors(&self) -> u32 {
        self.table_sectors * TABLE_COUNT
    }

    fn table_bytes(&self) -> u32 {
        self.table_sectors * self.sector_size
    }

    /// Reject a geometry the allocator or table codec could never satisfy.
    /// A caller's config usually comes from its own device datasheet, not
    /// user input, but it's still data the library didn't produce, so it
    /// gets a `Result` instead of a panic.
    fn validate(&self) -> Result<()> {
        if self.sectors >= 0x0FFF {
            return Err(Error::Unsupported);
        }
        if self.reserved_sectors() >= self.sectors {
            return Err(Error::Unsupported);
        }
        let required = 4 + 2 * self.sectors;
        if self.table_bytes() < required {
            return Err(Error::Unsupported);
        }
        Ok(())
    }
}

/// A mounted (or mountable) filesystem over a [`BlockDevice`].
pub struct Filesystem<D: BlockDevice> {
    config: FsConfig,
    device: D,
    table: Table,
    mounted: bool,
    /// Sticky until the next successful `mount`.
    last_error: Option<Error>,
    rng: StdRng,
}

impl<D: BlockDevice> Filesystem<D> {
    pub fn new(config: FsConfig, device: D) -> Result<Self> {
        config.validate()?;
        Ok(Filesystem {
            config,
            device,
            table: Table::formatted(0, 0),
            mounted: false,
            last_error: None,
            rng: StdRng::from_entropy(),
        })
    }

    /// Construct with an explicit allocator RNG seed, for reproducible
    /// crash-fuzz tests.
    pub fn with_seed(config: FsConfig, device: D, seed: u64) -> Result<Self> {
        config.validate()?;
        Ok(Filesystem {
            config,
            device,
            table: Table::formatted(0, 0),
            mounted: false,
            last_error: None,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// The sticky I/O error latch.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    /// Hand the underlying device back to the caller, e.g. to power it down
    /// or reopen it under a different configuration. Mirrors
    /// `BufWriter::into_inner`'s shape.
    pub fn into_device(self) -> D {
        self.device
    }

    /// Borrow the underlying device, e.g. to inject test faults or inspect
    /// raw bytes out of band. Mirrors `BufWriter::get_mut`'s shape.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    fn io_latched(&self) -> Result<()> {
        match self.last_error {
            Some(Error::Io) => Err(Error::Io),
            _ => Ok(()),
        }
    }

    /// Write a fresh, empty table to both redundant copies.
    pub fn format(&mut self) -> Result<()> {
        let table = Table::formatted(self.config.sectors, self.config.reserved_sectors());
        recovery::commit(&mut self.device, self.config.address_start, self.config.table_bytes(), &table)?;
        self.table = table;
        self.last_error = None;
        log::info!("volume formatted: {} sectors", self.config.sectors);
        Ok(())
    }

    /// Recover the on-disk table pair into a single working copy.
    /// Idempotent: an already-clean device is left untouched.
    pub fn mount(&mut self) -> Result<()> {
        self.last_error = None;
        let mounted = recovery::mount(
            &mut self.device,
            self.config.address_start,
            self.config.table_bytes(),
            self.config.sectors,
            self.config.reserved_sectors(),
        )
        .map_err(|e| {
            if e == Error::Io {
                self.last_error = Some(Error::Io);
            }
            e
        })?;
        self.table = mounted.table;
        self.mounted = true;
        log::info!("volume mounted (repaired = {})", mounted.repaired);
        Ok(())
    }

    fn find(&mut self, name: &[u8]) -> Result<Option<(u32, FileHeader)>> {
        locator::find(
            &mut self.device,
            &self.table,
            self.config.reserved_sectors(),
            self.config.sector_size,
            self.config.address_start,
            name,
        )
        .map_err(|e| {
            if e == Error::Io {
                self.last_error = Some(Error::Io);
            }
            e
        })
    }

    /// Open `name` for reading or writing. CRC verification on read is
    /// requested per-open via [`Filesystem::open_with_crc_check`] rather
    /// than a crate-wide compile-time flag.
    pub fn open(&mut self, name: &str, mode: Mode) -> Result<FileHandle> {
        self.open_impl(name, mode, false)
    }

    /// As [`Filesystem::open`], but a read handle verifies the file's CRC
    /// as the final read reaches the declared length.
    pub fn open_with_crc_check(&mut self, name: &str, mode: Mode) -> Result<FileHandle> {
        self.open_impl(name, mode, true)
    }

    fn open_impl(&mut self, name: &str, mode: Mode, crc_check: bool) -> Result<FileHandle> {
        debug_assert!(self.mounted, "open called before a successful mount");
        self.io_latched()?;
        let found = self.find(name.as_bytes())?;
        match mode {
            Mode::Read => match found {
                Some((sector, header)) => {
                    log::debug!("{name} opened for reading at sector {sector}");
                    Ok(FileHandle::new_read(sector, header, crc_check))
                }
                None => Err(Error::FileNotFound),
            },
            Mode::Write => {
                let header = FileHeader::named(name.as_bytes()).ok_or(Error::NameTooLong)?;
                let old_version_start = found.map(|(sector, _)| sector);
                if let Some(sector) = old_version_start {
                    log::debug!("{name} opened for writing; sector {sector} marked for removal on close");
                } else {
                    log::debug!("{name} opened for writing as a new file");
                }
                Ok(FileHandle::new_write(header, old_version_start))
            }
        }
    }

    /// Append `buf` to an open write handle.
    pub fn write(&mut self, handle: &mut FileHandle, buf: &[u8]) -> Result<usize> {
        debug_assert!(self.mounted, "write called before a successful mount");
        debug_assert!(handle.mode == Mode::Write, "write called on a read handle");
        self.io_latched()?;

        if let WriteState::Errored(kind) = handle.write_state {
            return Err(kind);
        }

        if handle.write_state == WriteState::Fresh {
            let sector = match allocator::allocate(&mut self.table, self.config.reserved_sectors(), &mut self.rng) {
                Ok(s) => s,
                Err(e) => {
                    handle.write_state = WriteState::Errored(e);
                    return Err(e);
                }
            };
            let mut d = self.table.get(sector);
            d.set_sof(true);
            self.table.set(sector, d);
            handle.start_sector = sector;
            handle.current_sector = sector;
            handle.pos_in_sector = HEADER_LEN as u32;
            handle.running_crc = 0xFFFF_FFFF;
            handle.write_state = WriteState::Writing;
            log::debug!("new file chain starts at sector {sector}");
        }

        let mut remaining = buf;
        let mut written = 0usize;
        while !remaining.is_empty() {
            let mut writeable = self.config.sector_size - handle.pos_in_sector;
            if writeable == 0 {
                let next = match allocator::allocate(&mut self.table, self.config.reserved_sectors(), &mut self.rng) {
                    Ok(s) => s,
                    Err(e) => {
                        handle.write_state = WriteState::Errored(e);
                        return Err(e);
                    }
                };
                let mut current_descriptor = self.table.get(handle.current_sector);
                current_descriptor.set_next(next as u16);
                self.table.set(handle.current_sector, current_descriptor);
                let mut next_descriptor = self.table.get(next);
                next_descriptor.set_sof(false);
                self.table.set(next, next_descriptor);
                log::debug!("chain extended: sector {} -> {next}", handle.current_sector);
                handle.current_sector = next;
                handle.pos_in_sector = 0;
                writeable = self.config.sector_size;
            }

            let chunk_len = remaining.len().min(writeable as usize);
            let (chunk, rest) = remaining.split_at(chunk_len);
            let address = self.config.address_start + handle.current_sector * self.config.sector_size + handle.pos_in_sector;
            if let Err(e) = self.device.write_at(address, chunk) {
                self.last_error = Some(e);
                handle.write_state = WriteState::Errored(e);
                return Err(e);
            }
            handle.running_crc = crate::crc::crc32(chunk, handle.running_crc);
            handle.position += chunk_len as u32;
            handle.pos_in_sector += chunk_len as u32;
            written += chunk_len;
            remaining = rest;
        }
        Ok(written)
    }

    /// Read up to `buf.len()` bytes from an open read handle.
    pub fn read(&mut self, handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize> {
        debug_assert!(self.mounted, "read called before a successful mount");
        debug_assert!(handle.mode == Mode::Read, "read called on a write handle");
        self.io_latched()?;

        let mut filled = 0usize;
        while filled < buf.len() {
            let remaining_file = handle.header.len as u32 - handle.position;
            if remaining_file == 0 {
                break;
            }
            let mut readable = self.config.sector_size - handle.pos_in_sector;
            if readable == 0 {
                let next = self.table.get(handle.current_sector).next();
                if next == UNLINKED {
                    break;
                }
                handle.current_sector = next as u32;
                handle.pos_in_sector = 0;
                readable = self.config.sector_size;
            }

            let want = (buf.len() - filled) as u32;
            let chunk_len = want.min(readable).min(remaining_file) as usize;
            let address = self.config.address_start + handle.current_sector * self.config.sector_size + handle.pos_in_sector;
            if let Err(e) = self.device.read_at(address, &mut buf[filled..filled + chunk_len]) {
                self.last_error = Some(e);
                return Err(e);
            }
            if handle.crc_check {
                handle.running_crc = crate::crc::crc32(&buf[filled..filled + chunk_len], handle.running_crc);
            }
            handle.position += chunk_len as u32;
            handle.pos_in_sector += chunk_len as u32;
            filled += chunk_len;
        }

        if handle.crc_check && handle.position == handle.header.len as u32 && handle.running_crc != handle.header.crc {
            return Err(Error::FileCrc);
        }
        Ok(filled)
    }

    /// Walk a chain starting at `start`, applying `reset` to every
    /// descriptor until (and including) the EOF sentinel, erroring on a
    /// structurally impossible `next`.
    fn walk_and_reset(&mut self, start: u32) -> Result<()> {
        let reserved = self.config.reserved_sectors();
        let mut current = start;
        let mut hops_remaining = self.config.sectors;
        loop {
            let mut d = self.table.get(current);
            let next = d.next();
            d.set_available(true);
            d.set_sof(false);
            d.set_written(false);
            d.set_next(UNLINKED);
            self.table.set(current, d);
            if next == UNLINKED {
                break;
            }
            if (next as u32) < reserved || next as u32 >= self.config.sectors {
                return Err(Error::Corrupt);
            }
            current = next as u32;
            hops_remaining = hops_remaining.checked_sub(1).ok_or(Error::Corrupt)?;
            if hops_remaining == 0 {
                return Err(Error::Corrupt);
            }
        }
        Ok(())
    }

    /// Mark every descriptor in the chain starting at `start` as `written`,
    /// stopping at EOF.
    fn mark_written(&mut self, start: u32) -> Result<()> {
        let reserved = self.config.reserved_sectors();
        let mut current = start;
        let mut hops_remaining = self.config.sectors;
        loop {
            let mut d = self.table.get(current);
            d.set_written(true);
            let next = d.next();
            self.table.set(current, d);
            if next == UNLINKED {
                break;
            }
            if (next as u32) < reserved || next as u32 >= self.config.sectors {
                return Err(Error::Corrupt);
            }
            current = next as u32;
            hops_remaining = hops_remaining.checked_sub(1).ok_or(Error::Corrupt)?;
            if hops_remaining == 0 {
                return Err(Error::Corrupt);
            }
        }
        Ok(())
    }

    /// The atomic commit. Read handles are a no-op; write handles either
    /// roll back a tentative chain (errored case) or finalize the header,
    /// mark the new chain `written`, free the superseded version, and
    /// persist both table copies, in that order.
    pub fn close(&mut self, mut handle: FileHandle) -> Result<()> {
        debug_assert!(self.mounted, "close called before a successful mount");

        if handle.mode == Mode::Read {
            return Ok(());
        }

        if self.last_error == Some(Error::Io) {
            return Err(Error::Io);
        }

        if let WriteState::Errored(kind) = handle.write_state {
            // An I/O-triggered error already short-circuited above (it sets
            // `self.last_error` at the same time it latches on the
            // handle), so only a non-IO failure (FULL) reaches here. Its
            // tentative chain is rolled back eagerly, in RAM only, with no
            // table commit, so the freed sectors are available again
            // within this same mount without waiting for the next one's
            // orphan reclaim.
            if handle.start_sector != INVALID_SECTOR {
                self.walk_and_reset(handle.start_sector)?;
            }
            let _ = kind;
            return Ok(());
        }

        if handle.start_sector != INVALID_SECTOR {
            handle.header.len = handle.position as u16;
            handle.header.timestamp = now();
            handle.header.crc = handle.running_crc;
            let bytes = handle.header.encode();
            let address = self.config.address_start + handle.start_sector * self.config.sector_size;
            self.device.write_at(address, &bytes)?;
            self.mark_written(handle.start_sector)?;
        }

        if let Some(old_start) = handle.old_version_start {
            self.walk_and_reset(old_start)?;
        }

        recovery::commit(&mut self.device, self.config.address_start, self.config.table_bytes(), &self.table)?;
        log::debug!("{:?} committed", handle.header.name_bytes());
        Ok(())
    }

    /// Idempotently delete `name`: freeing it if present, succeeding
    /// quietly if not.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        debug_assert!(self.mounted, "remove called before a successful mount");
        self.io_latched()?;
        let Some((sector, _)) = self.find(name.as_bytes())? else {
            return Ok(());
        };
        self.walk_and_reset(sector)?;
        recovery::commit(&mut self.device, self.config.address_start, self.config.table_bytes(), &self.table)?;
        Ok(())
    }

    /// The length of `name` if it exists, `None` otherwise.
    pub fn exists(&mut self, name: &str) -> Result<Option<u32>> {
        debug_assert!(self.mounted, "exists called before a successful mount");
        self.io_latched()?;
        Ok(self.find(name.as_bytes())?.map(|(_, header)| header.len as u32))
    }

    /// A summary of capacity, usage, and every file present.
    pub fn fsinfo(&mut self) -> Result<FsInfo> {
        debug_assert!(self.mounted, "fsinfo called before a successful mount");
        let reserved = self.config.reserved_sectors();
        let table_overhead = reserved * self.config.sector_size;
        let capacity_bytes = self.config.sectors * self.config.sector_size - table_overhead;

        let mut files = Vec::new();
        let mut bytes_used = 0u32;
        let mut bytes_free = 0u32;
        let mut buf = [0u8; HEADER_LEN];
        for sector in reserved..self.table.len() {
            let d = self.table.get(sector);
            if d.sof() {
                let address = self.config.address_start + sector * self.config.sector_size;
                self.device.read_at(address, &mut buf)?;
                let header = FileHeader::decode(&buf).ok_or(Error::Corrupt)?;
                bytes_used += header.len as u32;
                files.push(FileInfo {
                    name: String::from_utf8_lossy(header.name_bytes()).into_owned(),
                    len: header.len as u32,
                    timestamp: header.timestamp,
                });
            } else if d.available() {
                bytes_free += self.config.sector_size;
            }
        }

        Ok(FsInfo { capacity_bytes, files, bytes_used, bytes_free })
    }
}

fn now() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}

/// Per-file metadata, one entry per `FsInfo::files`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub len: u32,
    pub timestamp: u32,
}

/// Volume summary returned by [`Filesystem::fsinfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsInfo {
    pub capacity_bytes: u32,
    pub files: Vec<FileInfo>,
    pub bytes_used: u32,
    pub bytes_free: u32,
}

impl FsInfo {
    /// The volume report as a single formatted string, for callers that
    /// want the literal text instead of the structured fields.
    pub fn fsinfo_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Volume info: capacity {:9} B", self.capacity_bytes)?;
        for file in &self.files {
            writeln!(f, "{:9} {}", file.len, file.name)?;
        }
        writeln!(f, "     Files    {:9}", self.files.len())?;
        writeln!(f, "     Used     {:9}", self.bytes_used)?;
        write!(f, "     Free     {:9}", self.bytes_free)
    }
}
