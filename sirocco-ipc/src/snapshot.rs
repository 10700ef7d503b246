//! Seqlock-based per-instrument market snapshot.
//!
//! A snapshot is a fixed array of slots, one per instrument id, each a
//! 32-bit sequence counter plus a tick copy. The single writer per id
//! bumps the sequence odd, copies the tick, and bumps it even; readers
//! retry a bounded number of times and never block the writer. A sequence
//! of zero means "never written".
//!
//! Two backings share the protocol behind [`MarketSnapshot`]:
//!
//! - [`LocalSnapshot`] — slot array in process heap, the instrument id is
//!   the direct slot index.
//! - [`ShmSnapshot`] — a named shared-memory region with a magic number,
//!   an id → slot indirection table, and lazy slot assignment, so
//!   cooperating processes share one writer's view.
//!
//! The read retry bound is deliberately finite so a writer process dying
//! mid-update cannot livelock its readers.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{fence, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;

use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::{info, warn};

use sirocco_core::data::TickRecord;
use sirocco_core::error::SnapshotError;

/// Number of snapshot slots (instruments) per region.
pub const SNAPSHOT_SLOTS: usize = 2048;

/// Magic number identifying a shared snapshot region ("SNAPSHOT").
pub const SNAPSHOT_MAGIC: u64 = 0x534E_4150_5348_4F54;

/// Default bound on seqlock read retries before reporting "no data".
pub const DEFAULT_READ_RETRIES: u32 = 16;

/// Instrument ids in shared regions are offset by this base before
/// indexing the indirection table.
const SHM_ID_BASE: u64 = 10_000_000;

/// Entries in the shared-region indirection table.
const SHM_TABLE_LEN: usize = 65536;

/// One seqlock slot: even sequence = stable, odd = write in progress,
/// zero = never written.
#[repr(C)]
pub struct SnapshotSlot {
    seq: AtomicU32,
    tick: UnsafeCell<TickRecord>,
}

// Safety: `tick` is only written between the odd/even sequence stores by
// the single writer, and readers validate the sequence around their copy.
unsafe impl Sync for SnapshotSlot {}

impl SnapshotSlot {
    fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            tick: UnsafeCell::new(TickRecord::default()),
        }
    }

    fn write(&self, tick: &TickRecord) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Release);
        fence(Ordering::Release);
        // Safety: single writer per slot; readers reject this window via
        // the odd sequence.
        unsafe { std::ptr::write(self.tick.get(), *tick) };
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    fn read(&self, max_retries: u32) -> Option<TickRecord> {
        let mut retries = 0u32;
        loop {
            let s1 = self.seq.load(Ordering::Acquire);
            if s1 & 1 == 1 {
                retries += 1;
                if retries > max_retries {
                    return None;
                }
                std::hint::spin_loop();
                continue;
            }

            // Safety: volatile keeps the compiler from assuming the copy
            // is race-free; the sequence check below rejects torn copies.
            let tick = unsafe { std::ptr::read_volatile(self.tick.get()) };
            fence(Ordering::Acquire);
            let s2 = self.seq.load(Ordering::Acquire);

            if s1 == s2 {
                return (s1 != 0).then_some(tick);
            }
            retries += 1;
            if retries > max_retries {
                return None;
            }
            std::hint::spin_loop();
        }
    }

    fn reset(&self) {
        self.seq.store(0, Ordering::Release);
    }
}

/// In-heap snapshot; the instrument id is the direct slot index.
pub struct LocalSnapshot {
    slots: Box<[SnapshotSlot]>,
    max_retries: u32,
}

impl Default for LocalSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSnapshot {
    /// Creates a snapshot with [`SNAPSHOT_SLOTS`] empty slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retries(DEFAULT_READ_RETRIES)
    }

    /// Creates a snapshot with a custom (finite) read retry bound.
    #[must_use]
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            slots: (0..SNAPSHOT_SLOTS).map(|_| SnapshotSlot::new()).collect(),
            max_retries,
        }
    }

    /// Stores the latest tick for its instrument id. Out-of-range ids are
    /// dropped silently.
    pub fn update(&self, tick: &TickRecord) {
        let id = tick.instrument_id as usize;
        if id >= SNAPSHOT_SLOTS {
            return;
        }
        self.slots[id].write(tick);
    }

    /// Returns the latest tick for an id, or `None` when the slot was
    /// never written, the id is out of range, or the retry bound was hit.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<TickRecord> {
        let index = id as usize;
        if index >= SNAPSHOT_SLOTS {
            return None;
        }
        self.slots[index].read(self.max_retries)
    }

    /// Marks every slot as never written.
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            slot.reset();
        }
    }
}

/// Fixed layout of a shared snapshot region.
#[repr(C)]
struct ShmLayout {
    magic: AtomicU64,
    capacity: AtomicU64,
    /// `table[id - SHM_ID_BASE]` maps an instrument id to its slot, -1
    /// when the id has never been seen.
    table: [AtomicI32; SHM_TABLE_LEN],
    slots: [SnapshotSlot; SNAPSHOT_SLOTS],
    slot_count: AtomicU32,
}

enum Region {
    Writer(MmapMut),
    Reader(Mmap),
}

impl Region {
    fn as_ptr(&self) -> *const u8 {
        match self {
            Self::Writer(map) => map.as_ptr(),
            Self::Reader(map) => map.as_ptr(),
        }
    }
}

/// Shared-memory snapshot over a named region.
///
/// Exactly one process opens the region as writer; it (re-)initialises the
/// layout and unlinks the region on drop. Readers open read-only and fail
/// fast on a magic mismatch.
pub struct ShmSnapshot {
    region: Region,
    path: PathBuf,
    is_writer: bool,
    max_retries: u32,
}

// Safety: all shared fields in the layout are atomics or seqlock-guarded
// slots; the region mapping itself is never remapped while alive.
unsafe impl Send for ShmSnapshot {}
unsafe impl Sync for ShmSnapshot {}

fn region_path(name: &str) -> PathBuf {
    // Bare names ("/hft_snapshot") live under /dev/shm like shm_open
    // segments; anything with interior slashes is used as a plain path.
    let trimmed = name.trim_start_matches('/');
    if trimmed.contains('/') {
        PathBuf::from(name)
    } else {
        Path::new("/dev/shm").join(trimmed)
    }
}

impl ShmSnapshot {
    /// Opens a named region as the single writer, creating and
    /// initialising it as needed. A region with a wrong magic is
    /// re-initialised.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] when the region cannot be created,
    /// grown, or mapped.
    pub fn create<P: AsRef<str>>(name: P) -> Result<Self, SnapshotError> {
        let path = region_path(name.as_ref());
        let size = std::mem::size_of::<ShmLayout>() as u64;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SnapshotError::Open {
                    path: path.display().to_string(),
                    source: e,
                })?;
            }
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| SnapshotError::Open {
                path: path.display().to_string(),
                source: e,
            })?;
        file.set_len(size).map_err(|e| SnapshotError::Open {
            path: path.display().to_string(),
            source: e,
        })?;

        // Safety: the mapping is kept for the lifetime of self.
        let mut map = unsafe { MmapOptions::new().map_mut(&file) }.map_err(|e| SnapshotError::Map {
            path: path.display().to_string(),
            source: e,
        })?;

        // Safety: the map is at least size_of::<ShmLayout>() and page
        // aligned.
        let layout = unsafe { &*(map.as_ptr().cast::<ShmLayout>()) };
        if layout.magic.load(Ordering::Acquire) != SNAPSHOT_MAGIC {
            map.fill(0);
            let layout = unsafe { &*(map.as_ptr().cast::<ShmLayout>()) };
            for entry in &layout.table {
                entry.store(-1, Ordering::Relaxed);
            }
            layout
                .capacity
                .store(SNAPSHOT_SLOTS as u64, Ordering::Relaxed);
            // Magic last: readers treat it as the region-valid flag.
            layout.magic.store(SNAPSHOT_MAGIC, Ordering::Release);
            info!(path = %path.display(), "shared snapshot region initialised");
        }

        Ok(Self {
            region: Region::Writer(map),
            path,
            is_writer: true,
            max_retries: DEFAULT_READ_RETRIES,
        })
    }

    /// Opens an existing named region read-only.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::BadMagic`] when the region exists but was
    /// not initialised by a writer, and I/O variants when it cannot be
    /// opened or mapped.
    pub fn open<P: AsRef<str>>(name: P) -> Result<Self, SnapshotError> {
        let path = region_path(name.as_ref());
        let size = std::mem::size_of::<ShmLayout>() as u64;

        let file = std::fs::File::open(&path).map_err(|e| SnapshotError::Open {
            path: path.display().to_string(),
            source: e,
        })?;
        let len = file
            .metadata()
            .map_err(|e| SnapshotError::Open {
                path: path.display().to_string(),
                source: e,
            })?
            .len();
        if len < size {
            return Err(SnapshotError::Truncated {
                path: path.display().to_string(),
                len,
                need: size,
            });
        }

        // Safety: the mapping is kept for the lifetime of self.
        let map = unsafe { MmapOptions::new().map(&file) }.map_err(|e| SnapshotError::Map {
            path: path.display().to_string(),
            source: e,
        })?;

        let snapshot = Self {
            region: Region::Reader(map),
            path: path.clone(),
            is_writer: false,
            max_retries: DEFAULT_READ_RETRIES,
        };

        let magic = snapshot.layout().magic.load(Ordering::Acquire);
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic {
                path: path.display().to_string(),
                found: magic,
            });
        }
        Ok(snapshot)
    }

    fn layout(&self) -> &ShmLayout {
        // Safety: both constructors guarantee the mapping covers ShmLayout
        // and is page aligned.
        unsafe { &*(self.region.as_ptr().cast::<ShmLayout>()) }
    }

    fn table_index(id: u64) -> Option<usize> {
        let offset = id.checked_sub(SHM_ID_BASE)?;
        (offset < SHM_TABLE_LEN as u64).then_some(offset as usize)
    }

    /// Stores the latest tick, lazily assigning a slot the first time an
    /// id is seen. Ids outside the table range and overflow beyond the
    /// slot capacity are dropped.
    pub fn update(&self, tick: &TickRecord) {
        if !self.is_writer {
            return;
        }
        let Some(index) = Self::table_index(tick.instrument_id) else {
            return;
        };

        let layout = self.layout();
        let mut slot_index = layout.table[index].load(Ordering::Acquire);
        if slot_index < 0 {
            let assigned = layout.slot_count.fetch_add(1, Ordering::Relaxed);
            if assigned as usize >= SNAPSHOT_SLOTS {
                warn!(id = tick.instrument_id, "snapshot slots exhausted; tick dropped");
                return;
            }
            slot_index = assigned as i32;
            layout.table[index].store(slot_index, Ordering::Release);
        }
        layout.slots[slot_index as usize].write(tick);
    }

    /// Returns the latest tick for an id, `None` for ids never seen by the
    /// writer or when the retry bound was hit.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<TickRecord> {
        let index = Self::table_index(id)?;
        let layout = self.layout();
        let slot_index = layout.table[index].load(Ordering::Acquire);
        if slot_index < 0 || slot_index as usize >= SNAPSHOT_SLOTS {
            return None;
        }
        layout.slots[slot_index as usize].read(self.max_retries)
    }

    /// Marks every assigned slot as never written (writer only).
    pub fn clear(&self) {
        if !self.is_writer {
            return;
        }
        for slot in &self.layout().slots {
            slot.reset();
        }
    }

    /// Number of assigned slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        (self.layout().slot_count.load(Ordering::Relaxed) as usize).min(SNAPSHOT_SLOTS)
    }
}

impl Drop for ShmSnapshot {
    fn drop(&mut self) {
        // The writer owns the region's lifetime and unlinks it on
        // shutdown; readers leave it alone.
        if self.is_writer {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "cannot unlink snapshot region");
            }
        }
    }
}

/// Snapshot backing chosen at boot.
pub enum MarketSnapshot {
    /// In-heap backing.
    Local(LocalSnapshot),
    /// Shared-memory backing.
    Shm(ShmSnapshot),
}

impl MarketSnapshot {
    /// Stores the latest tick for its instrument.
    pub fn update(&self, tick: &TickRecord) {
        match self {
            Self::Local(snapshot) => snapshot.update(tick),
            Self::Shm(snapshot) => snapshot.update(tick),
        }
    }

    /// Returns the latest tick for an id, or `None`.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<TickRecord> {
        match self {
            Self::Local(snapshot) => snapshot.get(id),
            Self::Shm(snapshot) => snapshot.get(id),
        }
    }

    /// Marks every slot as never written.
    pub fn clear(&self) {
        match self {
            Self::Local(snapshot) => snapshot.clear(),
            Self::Shm(snapshot) => snapshot.clear(),
        }
    }
}

static GLOBAL: OnceLock<MarketSnapshot> = OnceLock::new();

/// Publishes the process-wide snapshot chosen at boot. Returns false if
/// one was already installed.
pub fn install(snapshot: MarketSnapshot) -> bool {
    GLOBAL.set(snapshot).is_ok()
}

/// Returns the process-wide snapshot, if one was installed.
#[must_use]
pub fn global() -> Option<&'static MarketSnapshot> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(id: u64, price: f64) -> TickRecord {
        let mut tick = TickRecord {
            instrument_id: id,
            last_price: price,
            volume: 1,
            ..TickRecord::default()
        };
        tick.set_ticker("au2606");
        tick
    }

    #[test]
    fn test_local_update_get() {
        let snapshot = LocalSnapshot::new();
        assert!(snapshot.get(42).is_none());

        snapshot.update(&tick(42, 100.0));
        let out = snapshot.get(42).unwrap();
        assert_eq!(out.last_price, 100.0);
        assert_eq!(out.ticker_str(), "au2606");

        snapshot.update(&tick(42, 101.0));
        assert_eq!(snapshot.get(42).unwrap().last_price, 101.0);
    }

    #[test]
    fn test_local_out_of_range_dropped() {
        let snapshot = LocalSnapshot::new();
        snapshot.update(&tick(SNAPSHOT_SLOTS as u64 + 5, 1.0));
        assert!(snapshot.get(SNAPSHOT_SLOTS as u64 + 5).is_none());
    }

    #[test]
    fn test_local_clear() {
        let snapshot = LocalSnapshot::new();
        snapshot.update(&tick(7, 55.0));
        assert!(snapshot.get(7).is_some());
        snapshot.clear();
        assert!(snapshot.get(7).is_none());
    }

    /// Readers never observe a torn record while a writer cycles prices.
    #[test]
    fn test_seqlock_concurrent_read_write() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        const ITERATIONS: u64 = 200_000;
        let prices = [100.0f64, 101.0, 102.0];

        let snapshot = Arc::new(LocalSnapshot::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer_snapshot = Arc::clone(&snapshot);
        let writer_done = Arc::clone(&done);
        let writer = std::thread::spawn(move || {
            for i in 0..ITERATIONS {
                let price = prices[(i % 3) as usize];
                let mut record = tick(42, price);
                // Tie the volume to the price so tearing is detectable.
                record.volume = (price * 10.0) as i32;
                writer_snapshot.update(&record);
            }
            writer_done.store(true, Ordering::Release);
        });

        let mut observed = 0u64;
        while !done.load(Ordering::Acquire) || observed == 0 {
            if let Some(out) = snapshot.get(42) {
                assert!(
                    prices.contains(&out.last_price),
                    "torn read: {}",
                    out.last_price
                );
                assert_eq!(out.volume, (out.last_price * 10.0) as i32, "torn record");
                observed += 1;
            }
        }
        writer.join().unwrap();
        assert!(observed > 0);
    }

    fn shm_name(tag: &str) -> String {
        format!(
            "{}/sirocco_snap_{tag}_{}",
            std::env::temp_dir().display(),
            std::process::id()
        )
    }

    #[test]
    fn test_shm_roundtrip_and_indirection() {
        let name = shm_name("roundtrip");
        let writer = ShmSnapshot::create(&name).unwrap();

        writer.update(&tick(10_000_001, 500.0));
        writer.update(&tick(10_000_777, 600.0));
        assert_eq!(writer.slot_count(), 2);

        let reader = ShmSnapshot::open(&name).unwrap();
        assert_eq!(reader.get(10_000_001).unwrap().last_price, 500.0);
        assert_eq!(reader.get(10_000_777).unwrap().last_price, 600.0);
        // Never-seen id resolves through the table to "no data".
        assert!(reader.get(10_000_002).is_none());
        // Below the id base.
        assert!(reader.get(42).is_none());

        drop(reader);
        drop(writer);
    }

    #[test]
    fn test_shm_writer_unlinks_on_drop() {
        let name = shm_name("unlink");
        let path = region_path(&name);
        {
            let _writer = ShmSnapshot::create(&name).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_shm_reader_rejects_bad_magic() {
        let name = shm_name("badmagic");
        let path = region_path(&name);
        std::fs::write(&path, vec![0u8; std::mem::size_of::<ShmLayout>()]).unwrap();

        let result = ShmSnapshot::open(&name);
        assert!(matches!(result, Err(SnapshotError::BadMagic { .. })));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_shm_reader_rejects_truncated_region() {
        let name = shm_name("short");
        let path = region_path(&name);
        std::fs::write(&path, vec![0u8; 128]).unwrap();

        let result = ShmSnapshot::open(&name);
        assert!(matches!(result, Err(SnapshotError::Truncated { .. })));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_market_snapshot_dispatch() {
        let snapshot = MarketSnapshot::Local(LocalSnapshot::new());
        snapshot.update(&tick(9, 77.0));
        assert_eq!(snapshot.get(9).unwrap().last_price, 77.0);
        snapshot.clear();
        assert!(snapshot.get(9).is_none());
    }
}
