//! Memory-mapped persistent log of fixed-size records.
//!
//! A log is a pair of files: `<base>.dat`, a pre-allocated array of
//! records, and `<base>.meta`, a 4096-byte header whose first eight bytes
//! are the little-endian monotonic `write_cursor` and the next eight the
//! little-endian `capacity` (the rest is zero padding against false
//! sharing). The layout is bit-exact across the recorder, the engine, and
//! the read tools.
//!
//! Writers publish a record with a release fence before advancing the
//! cursor, so any reader that observes cursor `n` sees all record bytes at
//! indices below `n`. Readers tail a live log with a local cursor and a
//! cached copy of the write cursor to keep atomic reloads off the hot
//! path. On close the writer truncates the data file down to the written
//! prefix, releasing the unused pre-allocation.

#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};
use std::sync::atomic::{fence, AtomicU64, Ordering};

use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::{info, warn};

use sirocco_core::data::{CandleRecord, TickRecord};
use sirocco_core::error::StorageError;

/// Byte length of the `<base>.meta` header.
pub const META_HEADER_LEN: u64 = 4096;

const CURSOR_OFFSET: usize = 0;
const CAPACITY_OFFSET: usize = 8;

/// Marker for records that may be persisted byte-for-byte.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain no pointers or other
/// indirection, and remain valid for every bit pattern (so a record read
/// back from disk is always representable).
pub unsafe trait PlainRecord: Copy + Default + 'static {}

// Safety: repr(C) structs of integers and floats; every bit pattern is a
// valid value.
unsafe impl PlainRecord for TickRecord {}
unsafe impl PlainRecord for CandleRecord {}

fn dat_path(base: &Path) -> PathBuf {
    PathBuf::from(format!("{}.dat", base.display()))
}

fn meta_path(base: &Path) -> PathBuf {
    PathBuf::from(format!("{}.meta", base.display()))
}

fn open_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Open {
        path: path.display().to_string(),
        source,
    }
}

fn map_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Map {
        path: path.display().to_string(),
        source,
    }
}

#[inline]
fn prefetch<T>(ptr: *const T) {
    #[cfg(target_arch = "x86_64")]
    // Safety: prefetch has no side effects; an invalid address is ignored.
    unsafe {
        core::arch::x86_64::_mm_prefetch(ptr.cast::<i8>(), core::arch::x86_64::_MM_HINT_T0);
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = ptr;
}

/// Single-writer side of a mmap log.
pub struct LogWriter<T: PlainRecord> {
    base: PathBuf,
    capacity: u64,
    data: ManuallyDrop<MmapMut>,
    meta: ManuallyDrop<MmapMut>,
    dropped: u64,
    _marker: PhantomData<T>,
}

impl<T: PlainRecord> LogWriter<T> {
    /// Opens (or creates) a log pre-allocated for `capacity` records.
    ///
    /// Re-opening an existing log resumes appending at its cursor; a
    /// capacity mismatch against the stored header is refused.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when a file cannot be created, grown, or
    /// mapped, or when the existing header disagrees with `capacity`.
    pub fn create<P: AsRef<Path>>(base: P, capacity: u64) -> Result<Self, StorageError> {
        let base = base.as_ref().to_path_buf();
        let dat = dat_path(&base);
        let meta = meta_path(&base);

        if let Some(parent) = dat.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| open_err(&dat, e))?;
            }
        }

        let dat_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&dat)
            .map_err(|e| open_err(&dat, e))?;
        dat_file
            .set_len(capacity * std::mem::size_of::<T>() as u64)
            .map_err(|e| open_err(&dat, e))?;
        // Safety: the file stays open for the lifetime of the map and only
        // this writer mutates it.
        let data_map = unsafe { MmapOptions::new().map_mut(&dat_file) }.map_err(|e| map_err(&dat, e))?;

        let meta_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&meta)
            .map_err(|e| open_err(&meta, e))?;
        meta_file
            .set_len(META_HEADER_LEN)
            .map_err(|e| open_err(&meta, e))?;
        // Safety: as above.
        let mut meta_map =
            unsafe { MmapOptions::new().map_mut(&meta_file) }.map_err(|e| map_err(&meta, e))?;

        let stored_capacity = u64::from_le_bytes(
            meta_map[CAPACITY_OFFSET..CAPACITY_OFFSET + 8]
                .try_into()
                .expect("meta header slice"),
        );
        if stored_capacity == 0 {
            meta_map[CAPACITY_OFFSET..CAPACITY_OFFSET + 8]
                .copy_from_slice(&capacity.to_le_bytes());
        } else if stored_capacity != capacity {
            return Err(StorageError::BadMeta {
                path: meta.display().to_string(),
                reason: format!("capacity mismatch: header {stored_capacity}, requested {capacity}"),
            });
        }

        let stored_cursor = u64::from_le_bytes(
            meta_map[CURSOR_OFFSET..CURSOR_OFFSET + 8]
                .try_into()
                .expect("meta header slice"),
        );
        if stored_cursor > capacity {
            return Err(StorageError::BadMeta {
                path: meta.display().to_string(),
                reason: format!("cursor {stored_cursor} beyond capacity {capacity}"),
            });
        }

        Ok(Self {
            base,
            capacity,
            data: ManuallyDrop::new(data_map),
            meta: ManuallyDrop::new(meta_map),
            dropped: 0,
            _marker: PhantomData,
        })
    }

    /// The monotonic write cursor, shared with readers through the mapping.
    ///
    /// The on-disk field is little-endian; in-place atomic access assumes a
    /// little-endian host, as every tool sharing these files does.
    fn cursor(&self) -> &AtomicU64 {
        // Safety: the meta map is 4096 bytes, page aligned, and outlives
        // self; offset 0 is the cursor field.
        unsafe { &*self.meta.as_ptr().add(CURSOR_OFFSET).cast::<AtomicU64>() }
    }

    /// Appends one record. Returns false (and counts a drop) when the
    /// pre-allocated capacity is exhausted.
    pub fn append(&mut self, record: &T) -> bool {
        let cursor = self.cursor().load(Ordering::Relaxed);
        if cursor >= self.capacity {
            if self.dropped == 0 {
                warn!(base = %self.base.display(), "mmap log full; dropping records");
            }
            self.dropped += 1;
            return false;
        }

        let offset = cursor as usize * std::mem::size_of::<T>();
        // Safety: cursor < capacity bounds the write inside the mapping;
        // no reader touches this index until the cursor advances.
        unsafe {
            std::ptr::copy_nonoverlapping(
                (record as *const T).cast::<u8>(),
                self.data.as_mut_ptr().add(offset),
                std::mem::size_of::<T>(),
            );
        }

        // Record bytes must be visible before the cursor that publishes them.
        fence(Ordering::Release);
        self.cursor().fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Number of records written so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.cursor().load(Ordering::Acquire)
    }

    /// Pre-allocated capacity in records.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Records dropped because the log was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl<T: PlainRecord> Drop for LogWriter<T> {
    fn drop(&mut self) {
        let written = self.cursor().load(Ordering::Acquire);
        let _ = self.data.flush();
        let _ = self.meta.flush();

        // Safety: drop exactly once, then never touch the maps again; the
        // data file must be unmapped before it is truncated below.
        unsafe {
            ManuallyDrop::drop(&mut self.data);
            ManuallyDrop::drop(&mut self.meta);
        }

        let dat = dat_path(&self.base);
        let target = written * std::mem::size_of::<T>() as u64;
        match std::fs::OpenOptions::new().write(true).open(&dat) {
            Ok(file) => {
                if let Err(e) = file.set_len(target) {
                    warn!(path = %dat.display(), error = %e, "log truncate failed");
                } else {
                    info!(path = %dat.display(), records = written, "log truncated to written prefix");
                }
            }
            Err(e) => warn!(path = %dat.display(), error = %e, "log truncate failed"),
        }
    }
}

/// Tailing reader side of a mmap log.
pub struct LogReader<T: PlainRecord> {
    data: Mmap,
    meta: Mmap,
    capacity: u64,
    cursor: u64,
    cached_write_cursor: u64,
    _marker: PhantomData<T>,
}

impl<T: PlainRecord> LogReader<T> {
    /// Opens a log, sizing the mapping from the writer-advertised capacity
    /// in the meta header.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when a file cannot be opened or mapped, or
    /// when the header is malformed.
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self, StorageError> {
        Self::open_with_capacity(base, 0)
    }

    /// Opens a log with a caller-imposed capacity bound (in records),
    /// supporting tailing while the writer is still appending. Zero means
    /// "use the header capacity".
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when a file cannot be opened or mapped, or
    /// when the header is malformed.
    pub fn open_with_capacity<P: AsRef<Path>>(
        base: P,
        max_records: u64,
    ) -> Result<Self, StorageError> {
        let base = base.as_ref();
        let dat = dat_path(base);
        let meta = meta_path(base);

        let meta_file = std::fs::File::open(&meta).map_err(|e| open_err(&meta, e))?;
        let meta_len = meta_file.metadata().map_err(|e| open_err(&meta, e))?.len();
        if meta_len < META_HEADER_LEN {
            return Err(StorageError::BadMeta {
                path: meta.display().to_string(),
                reason: format!("header too short: {meta_len} bytes"),
            });
        }
        // Safety: read-only map of a header the writer only appends to.
        let meta_map = unsafe { MmapOptions::new().len(META_HEADER_LEN as usize).map(&meta_file) }
            .map_err(|e| map_err(&meta, e))?;

        let header_capacity = u64::from_le_bytes(
            meta_map[CAPACITY_OFFSET..CAPACITY_OFFSET + 8]
                .try_into()
                .expect("meta header slice"),
        );
        let capacity = if max_records > 0 { max_records } else { header_capacity };
        if capacity == 0 {
            return Err(StorageError::BadMeta {
                path: meta.display().to_string(),
                reason: "zero capacity".to_string(),
            });
        }

        let dat_file = std::fs::File::open(&dat).map_err(|e| open_err(&dat, e))?;
        // The mapping may extend past the (truncated) file end; reads never
        // go past the write cursor, which always lies inside the file.
        // Safety: read-only map.
        let data_map = unsafe {
            MmapOptions::new()
                .len(capacity as usize * std::mem::size_of::<T>())
                .map(&dat_file)
        }
        .map_err(|e| map_err(&dat, e))?;

        let mut reader = Self {
            data: data_map,
            meta: meta_map,
            capacity,
            cursor: 0,
            cached_write_cursor: 0,
            _marker: PhantomData,
        };
        reader.cached_write_cursor = reader.total_count();
        Ok(reader)
    }

    fn write_cursor(&self) -> &AtomicU64 {
        // Safety: the meta map is 4096 bytes, page aligned, and outlives
        // self; offset 0 is the cursor field.
        unsafe { &*self.meta.as_ptr().add(CURSOR_OFFSET).cast::<AtomicU64>() }
    }

    #[inline]
    fn record_ptr(&self, index: u64) -> *const T {
        // Safety: callers bound index by the write cursor, which the writer
        // keeps within the mapped capacity.
        unsafe {
            self.data
                .as_ptr()
                .add(index as usize * std::mem::size_of::<T>())
                .cast::<T>()
        }
    }

    #[inline]
    fn refresh(&mut self) -> bool {
        if self.cursor < self.cached_write_cursor {
            return true;
        }
        self.cached_write_cursor = self.write_cursor().load(Ordering::Acquire);
        self.cursor < self.cached_write_cursor
    }

    /// Reads the next record by copy, or `None` at the tail.
    pub fn read(&mut self) -> Option<T> {
        if !self.refresh() {
            return None;
        }
        // Safety: cursor < write_cursor; the record is published.
        let record = unsafe { std::ptr::read(self.record_ptr(self.cursor)) };
        self.cursor += 1;
        Some(record)
    }

    /// Returns a zero-copy reference to the next record, valid until the
    /// next call on this reader, or `None` at the tail.
    pub fn read_ptr(&mut self) -> Option<&T> {
        if !self.refresh() {
            return None;
        }
        let index = self.cursor;
        self.cursor += 1;
        if self.cursor + 1 < self.cached_write_cursor {
            prefetch(self.record_ptr(self.cursor + 1));
        }
        // Safety: index < write_cursor; the record is published and the
        // writer never rewrites indices below the cursor.
        Some(unsafe { &*self.record_ptr(index) })
    }

    /// Reads up to `max` contiguous records without copying, advancing the
    /// cursor past them. Returns an empty slice at the tail.
    pub fn read_batch(&mut self, max: usize) -> &[T] {
        if !self.refresh() {
            return &[];
        }
        let available = (self.cached_write_cursor - self.cursor) as usize;
        let count = available.min(max);

        if self.cursor + count as u64 + 8 < self.cached_write_cursor {
            prefetch(self.record_ptr(self.cursor + count as u64 + 4));
        }

        let start = self.record_ptr(self.cursor);
        self.cursor += count as u64;
        // Safety: all `count` records lie below the write cursor.
        unsafe { std::slice::from_raw_parts(start, count) }
    }

    /// Moves the cursor to `pos`, clamped to the written count.
    pub fn seek(&mut self, pos: u64) {
        let total = self.total_count();
        self.cursor = pos.min(total);
        self.cached_write_cursor = total;
    }

    /// Rewinds to the first record.
    pub fn seek_to_start(&mut self) {
        self.seek(0);
    }

    /// Skips to the current end of the log (subsequent reads tail new
    /// records only).
    pub fn seek_to_end(&mut self) {
        let total = self.total_count();
        self.cursor = total;
        self.cached_write_cursor = total;
    }

    /// Total records the writer has published.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.write_cursor().load(Ordering::Acquire)
    }

    /// Capacity of the mapping in records.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}
