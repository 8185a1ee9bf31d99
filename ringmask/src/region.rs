//! The shared region: a fixed header plus a fixed-capacity ring of records,
//! mapped `MAP_SHARED` so every participant sees the same bytes.
//!
//! Every field in [`Header`] is mutated only while the caller holds the
//! `control` semaphore (see [`crate::sync::ControlGuard`]); there is
//! deliberately no atomic type anywhere in this module — the mutual-exclusion
//! discipline is the only thing that makes concurrent access to this region
//! safe.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::unix::io::{ AsRawFd, FromRawFd };

use crate::error::{ RingMaskError, Result };
use crate::naming::Names;

const MAGIC: u64 = 0x52494e474d41534b; // "RINGMASK" in ASCII, as a u64
const VERSION: u32 = 1;

/// Longest source path the header can store (bytes, not including NUL).
pub const SOURCE_PATH_CAP: usize = 255;

/// Fixed-size header at the start of the shared region.
#[repr(C, align(8))]
pub struct Header {
    magic: u64,
    version: u32,
    capacity: u32,

    write_index: u32,
    read_index: u32,

    file_read_offset: u64,
    file_write_offset: u64,
    next_turn_offset: u64,

    total_produced: u64,
    total_consumed: u64,

    producers_total: u32,
    producers_active: u32,
    consumers_total: u32,
    consumers_active: u32,

    shutdown_flag: u32,
    mask_byte: u8,

    source_path_len: u32,
    source_path: [u8; SOURCE_PATH_CAP],
}

impl Header {
    fn reset(&mut self, capacity: u32, mask_byte: u8, source_path: &str) -> Result<()> {
        let bytes = source_path.as_bytes();
        if bytes.len() > SOURCE_PATH_CAP {
            return Err(RingMaskError::ConfigError {
                message: format!(
                    "source path longer than {SOURCE_PATH_CAP} bytes: {source_path}"
                ),
            });
        }

        self.magic = MAGIC;
        self.version = VERSION;
        self.capacity = capacity;
        self.write_index = 0;
        self.read_index = 0;
        self.file_read_offset = 0;
        self.file_write_offset = 0;
        self.next_turn_offset = 0;
        self.total_produced = 0;
        self.total_consumed = 0;
        self.producers_total = 0;
        self.producers_active = 0;
        self.consumers_total = 0;
        self.consumers_active = 0;
        self.shutdown_flag = 0;
        self.mask_byte = mask_byte;
        self.source_path = [0u8; SOURCE_PATH_CAP];
        self.source_path[..bytes.len()].copy_from_slice(bytes);
        self.source_path_len = bytes.len() as u32;
        Ok(())
    }

    /// Number of ring slots, fixed at creation.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Mask byte XORed into each byte on production / out on consumption.
    pub fn mask_byte(&self) -> u8 {
        self.mask_byte
    }

    /// Path to the input file, as configured at initialization.
    pub fn source_path(&self) -> &str {
        let len = self.source_path_len as usize;
        std::str::from_utf8(&self.source_path[..len]).unwrap_or("")
    }

    /// `true` once the finalizer has raised shutdown; monotonic.
    pub fn shutdown_flag(&self) -> bool {
        self.shutdown_flag != 0
    }

    /// Raise the shutdown flag. Idempotent.
    pub fn set_shutdown(&mut self) {
        self.shutdown_flag = 1;
    }

    /// Next byte offset a producer should read from the source file, and
    /// advance it by one.
    pub fn take_read_offset(&mut self) -> u64 {
        let offset = self.file_read_offset;
        self.file_read_offset += 1;
        offset
    }

    /// The `file_read_offset` ticket currently allowed to resolve into the
    /// ring, preserving production order across concurrent producers: ring
    /// insertion order must match the order producers acquired their
    /// `file_read_offset`.
    pub fn current_turn(&self) -> u64 {
        self.next_turn_offset
    }

    /// Resolve the current ticket (whether it ended up skipped, inserted, or
    /// abandoned to shutdown) so the next producer in line can proceed.
    pub fn advance_turn(&mut self) {
        self.next_turn_offset += 1;
    }

    /// Next byte offset a consumer should write to the output file, and
    /// advance it by one.
    pub fn take_write_offset(&mut self) -> u64 {
        let offset = self.file_write_offset;
        self.file_write_offset += 1;
        offset
    }

    /// Reserve the current `write_index` slot and advance it, mod capacity.
    pub fn take_write_slot(&mut self) -> u32 {
        let slot = self.write_index;
        self.write_index = (slot + 1) % self.capacity;
        self.total_produced += 1;
        slot
    }

    /// Reserve the current `read_index` slot and advance it, mod capacity.
    pub fn take_read_slot(&mut self) -> u32 {
        let slot = self.read_index;
        self.read_index = (slot + 1) % self.capacity;
        self.total_consumed += 1;
        slot
    }

    /// Register a new producer: bump both lifecycle counters under one
    /// critical section.
    pub fn register_producer(&mut self) {
        self.producers_total += 1;
        self.producers_active += 1;
    }

    /// Register `n` producers on behalf of a launcher, which is permitted to
    /// pre-increment `producers_total` before forking its workers.
    pub fn register_producers_total(&mut self, n: u32) {
        self.producers_total += n;
    }

    /// A single worker joining after the launcher already bumped the total.
    pub fn register_producer_active_only(&mut self) {
        self.producers_active += 1;
    }

    /// Symmetric to [`Header::register_producer`] for consumers.
    pub fn register_consumer(&mut self) {
        self.consumers_total += 1;
        self.consumers_active += 1;
    }

    /// Symmetric to [`Header::register_producers_total`].
    pub fn register_consumers_total(&mut self, n: u32) {
        self.consumers_total += n;
    }

    /// Symmetric to [`Header::register_producer_active_only`].
    pub fn register_consumer_active_only(&mut self) {
        self.consumers_active += 1;
    }

    /// Decrement `producers_active`, returning `(producers_active,
    /// consumers_active)` for the last-leaver check.
    pub fn unregister_producer(&mut self) -> (u32, u32) {
        self.producers_active -= 1;
        (self.producers_active, self.consumers_active)
    }

    /// Symmetric to [`Header::unregister_producer`].
    pub fn unregister_consumer(&mut self) -> (u32, u32) {
        self.consumers_active -= 1;
        (self.producers_active, self.consumers_active)
    }

    /// `producers_total + consumers_total`, the number of posts the
    /// finalizer must broadcast on each of `empty`/`full`.
    pub fn total_workers(&self) -> u32 {
        self.producers_total + self.consumers_total
    }

    /// Snapshot of every counter the finalizer's report prints.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            total_produced: self.total_produced,
            total_consumed: self.total_consumed,
            producers_active: self.producers_active,
            producers_total: self.producers_total,
            consumers_active: self.consumers_active,
            consumers_total: self.consumers_total,
        }
    }

    /// Validate the indices and counters are internally consistent. Caller
    /// must hold `control`.
    pub fn check_invariants(&self) -> Result<()> {
        if self.write_index >= self.capacity || self.read_index >= self.capacity {
            return Err(RingMaskError::CorruptState {
                message: format!(
                    "index out of range: write={}, read={}, capacity={}",
                    self.write_index,
                    self.read_index,
                    self.capacity
                ),
            });
        }
        if self.total_produced < self.total_consumed {
            return Err(RingMaskError::CorruptState {
                message: format!(
                    "total_consumed ({}) exceeds total_produced ({})",
                    self.total_consumed,
                    self.total_produced
                ),
            });
        }
        Ok(())
    }
}

/// Plain-data snapshot of the header's counters, taken under `control`, used
/// for the finalizer's report and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot {
    pub total_produced: u64,
    pub total_consumed: u64,
    pub producers_active: u32,
    pub producers_total: u32,
    pub consumers_active: u32,
    pub consumers_total: u32,
}

/// One ring slot.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct Record {
    pub masked_byte: u8,
    pub slot_index: u32,
    pub insert_time: i64,
}

const HEADER_SIZE: usize = std::mem::size_of::<Header>();
const RECORD_SIZE: usize = std::mem::size_of::<Record>();

/// The mapped shared region: header + ring, reachable from any process that
/// opens the same name.
pub struct SharedRegion {
    mmap_ptr: *mut u8,
    mmap_len: usize,
    capacity: usize,
    _file: File,
}

// The mapping is backed by a kernel object shared across processes; moving
// the handle between threads in one process is sound.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    fn region_size(capacity: usize) -> usize {
        HEADER_SIZE + capacity * RECORD_SIZE
    }

    /// Create the region fresh. `names` must already have had stale objects
    /// unlinked by the caller.
    pub fn create(names: &Names, capacity: usize, mask_byte: u8, source_path: &str) -> Result<Self> {
        if capacity == 0 {
            return Err(RingMaskError::ConfigError {
                message: "capacity must be greater than 0".into(),
            });
        }

        let path = names.shm_path();
        let cpath = to_cstring(&path)?;

        let fd = unsafe {
            libc::shm_open(cpath.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o666u32)
        };
        if fd == -1 {
            return Err(RingMaskError::ResourceError {
                message: format!("shm_open(create {path}): {}", io::Error::last_os_error()),
            });
        }
        let file = unsafe { File::from_raw_fd(fd) };

        let existing_size = file.metadata()?.len() as usize;
        let size = Self::region_size(capacity);

        if existing_size != 0 {
            // A prior region survived the best-effort unlink.
            let region = Self::map_existing(file, existing_size)?;
            let existing_capacity = region.header().capacity() as usize;
            if existing_capacity != capacity {
                return Err(RingMaskError::ConfigMismatch {
                    message: format!(
                        "existing region '{}' has capacity {existing_capacity}, requested {capacity}",
                        names.region
                    ),
                });
            }
            let mut region = region;
            region.header_mut().reset(capacity as u32, mask_byte, source_path)?;
            unsafe {
                std::ptr::write_bytes(region.mmap_ptr.add(HEADER_SIZE), 0, capacity * RECORD_SIZE);
            }
            return Ok(region);
        }

        if unsafe { libc::ftruncate(file.as_raw_fd(), size as libc::off_t) } == -1 {
            return Err(RingMaskError::ResourceError {
                message: format!("ftruncate: {}", io::Error::last_os_error()),
            });
        }

        let mut region = Self::map(file, size, capacity)?;
        region.header_mut().reset(capacity as u32, mask_byte, source_path)?;
        unsafe {
            std::ptr::write_bytes(region.mmap_ptr.add(HEADER_SIZE), 0, capacity * RECORD_SIZE);
        }
        Ok(region)
    }

    /// Attach to an existing region by name (producer/consumer/finalizer).
    pub fn open(names: &Names) -> Result<Self> {
        let path = names.shm_path();
        let cpath = to_cstring(&path)?;

        let fd = unsafe { libc::shm_open(cpath.as_ptr(), libc::O_RDWR, 0o666u32) };
        if fd == -1 {
            return Err(RingMaskError::ResourceError {
                message: format!("shm_open(open {path}): {}", io::Error::last_os_error()),
            });
        }
        let file = unsafe { File::from_raw_fd(fd) };
        let size = file.metadata()?.len() as usize;
        Self::map_existing(file, size)
    }

    fn map_existing(file: File, size: usize) -> Result<Self> {
        if size < HEADER_SIZE {
            return Err(RingMaskError::ResourceError {
                message: "shared region is smaller than the header".into(),
            });
        }
        let mut region = Self::map(file, size, 0)?;
        let header = region.header();
        if header.magic != MAGIC {
            return Err(RingMaskError::ResourceError {
                message: "shared region has an unrecognized magic number".into(),
            });
        }
        if header.version != VERSION {
            return Err(RingMaskError::ResourceError {
                message: format!(
                    "shared region version mismatch: expected {VERSION}, got {}",
                    header.version
                ),
            });
        }
        region.capacity = header.capacity as usize;
        Ok(region)
    }

    fn map(file: File, size: usize, capacity: usize) -> Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(RingMaskError::ResourceError {
                message: format!("mmap: {}", io::Error::last_os_error()),
            });
        }
        Ok(Self {
            mmap_ptr: ptr as *mut u8,
            mmap_len: size,
            capacity,
            _file: file,
        })
    }

    /// Immutable view of the header. Caller must hold `control` (except for
    /// one-shot structural checks right after `open`/`create`).
    pub fn header(&self) -> &Header {
        unsafe { &*(self.mmap_ptr as *const Header) }
    }

    /// Mutable view of the header. Caller must hold `control`.
    pub fn header_mut(&mut self) -> &mut Header {
        unsafe { &mut *(self.mmap_ptr as *mut Header) }
    }

    /// Total size in bytes of the mapped region, for the finalizer's report.
    pub fn total_bytes(&self) -> usize {
        self.mmap_len
    }

    /// Read the record at `slot`. Caller must hold `control`.
    pub fn read_record(&self, slot: u32) -> Record {
        debug_assert!((slot as usize) < self.capacity);
        let offset = HEADER_SIZE + (slot as usize) * RECORD_SIZE;
        unsafe { *(self.mmap_ptr.add(offset) as *const Record) }
    }

    /// Write `record` at `slot`. Caller must hold `control`.
    pub fn write_record(&mut self, slot: u32, record: Record) {
        debug_assert!((slot as usize) < self.capacity);
        let offset = HEADER_SIZE + (slot as usize) * RECORD_SIZE;
        unsafe {
            *(self.mmap_ptr.add(offset) as *mut Record) = record;
        }
    }

    /// Unlink the shared-memory object by name (finalizer only).
    pub fn unlink(names: &Names) {
        let path = names.shm_path();
        if let Ok(cpath) = to_cstring(&path) {
            unsafe {
                libc::shm_unlink(cpath.as_ptr());
            }
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.mmap_ptr as *mut _, self.mmap_len);
        }
    }
}

fn to_cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| RingMaskError::ConfigError {
        message: format!("name '{s}' contains an interior NUL byte"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::Names;

    fn unique_base(tag: &str) -> String {
        format!("ringmask-test-{tag}-{}", std::process::id())
    }

    #[test]
    fn create_then_open_round_trips_header() {
        let base = unique_base("region-basic");
        let names = Names::derive(&base).unwrap();
        crate::sync::SyncObjects::unlink_all(&names);
        SharedRegion::unlink(&names);

        {
            let region = SharedRegion::create(&names, 8, 0x5a, "/tmp/in.txt").unwrap();
            assert_eq!(region.header().capacity(), 8);
            assert_eq!(region.header().mask_byte(), 0x5a);
            assert_eq!(region.header().source_path(), "/tmp/in.txt");
            assert!(!region.header().shutdown_flag());
        }

        {
            let opened = SharedRegion::open(&names).unwrap();
            assert_eq!(opened.header().capacity(), 8);
            assert_eq!(opened.header().mask_byte(), 0x5a);
        }

        SharedRegion::unlink(&names);
    }

    #[test]
    fn mismatched_capacity_on_stale_region_is_config_mismatch() {
        let base = unique_base("region-mismatch");
        let names = Names::derive(&base).unwrap();
        SharedRegion::unlink(&names);

        let _first = SharedRegion::create(&names, 4, 0, "/tmp/a").unwrap();
        let second = SharedRegion::create(&names, 8, 0, "/tmp/a");
        assert!(matches!(second, Err(RingMaskError::ConfigMismatch { .. })));

        SharedRegion::unlink(&names);
    }

    #[test]
    fn check_invariants_catches_out_of_range_index() {
        let base = unique_base("region-invariant");
        let names = Names::derive(&base).unwrap();
        SharedRegion::unlink(&names);

        let mut region = SharedRegion::create(&names, 4, 0, "/tmp/a").unwrap();
        assert!(region.header().check_invariants().is_ok());

        region.header_mut().write_index = 9;
        assert!(matches!(
            region.header().check_invariants(),
            Err(RingMaskError::CorruptState { .. })
        ));

        SharedRegion::unlink(&names);
    }

    #[test]
    fn ring_write_read_round_trip() {
        let base = unique_base("region-ring");
        let names = Names::derive(&base).unwrap();
        SharedRegion::unlink(&names);

        let mut region = SharedRegion::create(&names, 4, 0, "/tmp/a").unwrap();
        region.write_record(2, Record { masked_byte: 0x42, slot_index: 2, insert_time: 7 });
        let record = region.read_record(2);
        assert_eq!(record.masked_byte, 0x42);
        assert_eq!(record.insert_time, 7);

        SharedRegion::unlink(&names);
    }
}
