//! Host Platform
//!
//! An in-memory implementation of every collaborator the memory-failure
//! core consumes, for running the core on a development host. It models
//! just enough of a kernel to give frames realistic pin counts:
//!
//! | Holder                 | Pins | Map count |
//! |------------------------|------|-----------|
//! | Page cache             | 1    | -         |
//! | Swap cache             | 1    | -         |
//! | Page-table entry       | 1    | 1         |
//! | Kernel owner (slab...) | 1    | -         |
//! | Reclaim-list isolation | 1    | -         |
//!
//! Failures can be injected for unmapping, migration and signal delivery.
//!
//! # Locking
//!
//! Each piece of state sits behind its own spin lock. Traversals nest them
//! tasks, then mapping indexes, then page-table entries; no other method
//! holds two of those at once.

#![deny(missing_docs)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use spin::Mutex;

use super::{
    FrameAllocator, MigrateError, Migrator, PageCache, Platform, PunchError, ReverseMap,
    SignalDelivery,
};
use crate::arch::TrapContext;
use crate::memory::{
    AnonVmaId, Frame, FrameFlags, FrameMapping, MappingId, NodeId, Pfn, UnmapFlags, UnmapStatus,
    VirtualAddress, VirtualMemoryArea, PAGE_SIZE,
};
use crate::process::{EarlyKill, MmId, ProcessId, SignalError, SignalResult, Task};

#[derive(Debug)]
struct TaskInner {
    pid: ProcessId,
    name: String,
    mm: Option<MmId>,
    policy: EarlyKill,
}

/// A simulated process. Cloning pins it; [`HostTask::pins`] reports how
/// many handles are alive.
#[derive(Debug, Clone)]
pub struct HostTask(Arc<TaskInner>);

impl HostTask {
    /// User process running in address space `mm`
    pub fn new(pid: ProcessId, name: &str, mm: MmId) -> Self {
        Self(Arc::new(TaskInner {
            pid,
            name: name.into(),
            mm: Some(mm),
            policy: EarlyKill::Inherit,
        }))
    }

    /// Kernel thread without an address space
    pub fn kernel_thread(pid: ProcessId, name: &str) -> Self {
        Self(Arc::new(TaskInner {
            pid,
            name: name.into(),
            mm: None,
            policy: EarlyKill::Inherit,
        }))
    }

    /// Same task with an explicit early-notification policy
    #[must_use]
    pub fn with_policy(self, policy: EarlyKill) -> Self {
        Self(Arc::new(TaskInner {
            pid: self.0.pid,
            name: self.0.name.clone(),
            mm: self.0.mm,
            policy,
        }))
    }

    /// Number of live handles to this task
    pub fn pins(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl Task for HostTask {
    fn pid(&self) -> ProcessId {
        self.0.pid
    }

    fn name(&self) -> &str {
        &self.0.name
    }

    fn mm(&self) -> Option<MmId> {
        self.0.mm
    }

    fn early_kill(&self) -> EarlyKill {
        self.0.policy
    }
}

/// A delivered signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Catchable bus error
    Advisory {
        /// Corrupted address
        addr: VirtualAddress,
        /// Trap that reported the corruption
        trap: TrapContext,
    },
    /// Uncatchable kill
    ForcedFatal,
}

/// Signal log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalRecord {
    /// Receiving process
    pub pid: ProcessId,
    /// Signal delivered
    pub signal: Signal,
}

/// Behavior of the hole-punch operation of a file mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PunchMode {
    /// Frames are removed from the page cache
    #[default]
    Supported,
    /// The filesystem has no hole-punch operation
    Unsupported,
    /// The filesystem fails with the given error code
    Error(i32),
}

/// Activity counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostStats {
    /// Reclaim-list buffer drains
    pub lru_drains: usize,
    /// Free-frame buffer drains
    pub buffer_drains: usize,
    /// Slab shrinking passes
    pub shrink_passes: usize,
    /// Frames migrated
    pub migrations: usize,
    /// Calls to `try_to_unmap`
    pub unmap_attempts: usize,
}

#[derive(Debug, Clone, Copy)]
struct Pte {
    mm: MmId,
    addr: VirtualAddress,
    pfn: Pfn,
    dirty: bool,
}

#[derive(Debug, Default)]
struct AllocState {
    free: BTreeSet<Pfn>,
    isolated: BTreeSet<Pfn>,
    lru_buffer: BTreeSet<Pfn>,
    free_buffer: BTreeSet<Pfn>,
    shrink_results: VecDeque<usize>,
}

#[derive(Debug, Default)]
struct MappingState {
    punch: PunchMode,
    no_writeback: bool,
    io_error: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    page_cache: BTreeSet<Pfn>,
    swap_cache: BTreeSet<Pfn>,
    mappings: BTreeMap<MappingId, MappingState>,
    private_locked: bool,
}

#[derive(Debug, Default)]
struct Faults {
    unmap_again: usize,
    unmap_fail: bool,
    migrate: Option<MigrateError>,
    refused: BTreeSet<ProcessId>,
}

/// In-memory platform
#[derive(Debug)]
pub struct HostPlatform {
    frames: Vec<Frame>,
    alloc: Mutex<AllocState>,
    cache: Mutex<CacheState>,
    tasks: Mutex<Vec<HostTask>>,
    anon_vmas: Mutex<BTreeMap<AnonVmaId, Vec<VirtualMemoryArea>>>,
    file_vmas: Mutex<BTreeMap<MappingId, Vec<VirtualMemoryArea>>>,
    ptes: Mutex<Vec<Pte>>,
    markers: Mutex<Vec<(MmId, VirtualAddress)>>,
    signals: Mutex<Vec<SignalRecord>>,
    faults: Mutex<Faults>,
    stats: Mutex<HostStats>,
}

impl HostPlatform {
    /// Platform with `frames` free frames on node 0
    pub fn new(frames: usize) -> Self {
        Self::with_nodes(1, frames)
    }

    /// Platform with `nodes` nodes of `frames_per_node` free frames each,
    /// numbered node by node
    pub fn with_nodes(nodes: u16, frames_per_node: usize) -> Self {
        let frames: Vec<Frame> = (0..nodes)
            .flat_map(|node| (0..frames_per_node).map(move |_| NodeId::new(node)))
            .enumerate()
            .map(|(pfn, node)| Frame::new(Pfn::new(pfn as u64), node))
            .collect();
        let free = frames.iter().map(Frame::pfn).collect();

        Self {
            frames,
            alloc: Mutex::new(AllocState {
                free,
                ..AllocState::default()
            }),
            cache: Mutex::new(CacheState::default()),
            tasks: Mutex::new(Vec::new()),
            anon_vmas: Mutex::new(BTreeMap::new()),
            file_vmas: Mutex::new(BTreeMap::new()),
            ptes: Mutex::new(Vec::new()),
            markers: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
            stats: Mutex::new(HostStats::default()),
        }
    }

    fn frame_at(&self, pfn: Pfn) -> Option<&Frame> {
        usize::try_from(pfn.as_u64()).ok().and_then(|index| self.frames.get(index))
    }

    fn take_free(&self, pfn: Pfn) -> Option<&Frame> {
        let frame = self.frame_at(pfn)?;
        self.alloc.lock().free.remove(&pfn).then_some(frame)
    }

    // Scenario setup

    /// Allocate `pfn` as an anonymous reclaim-listed frame with no pins
    pub fn add_anon_page(&self, pfn: Pfn, anon_vma: AnonVmaId, index: u64) -> Option<&Frame> {
        let frame = self.take_free(pfn)?;
        frame.set_mapping(FrameMapping::Anon { anon_vma, index });
        frame.set_flags(FrameFlags::UPTODATE | FrameFlags::LRU | FrameFlags::SWAPBACKED);
        Some(frame)
    }

    /// Allocate `pfn` as a clean page-cache frame of `mapping`
    pub fn add_file_page(&self, pfn: Pfn, mapping: MappingId, index: u64) -> Option<&Frame> {
        let frame = self.take_free(pfn)?;
        frame.set_mapping(FrameMapping::File { mapping, index });
        frame.set_flags(FrameFlags::UPTODATE | FrameFlags::LRU);
        let mut cache = self.cache.lock();
        cache.page_cache.insert(pfn);
        cache.mappings.entry(mapping).or_default();
        frame.get();
        Some(frame)
    }

    /// Allocate `pfn` to the kernel with `flags`, pinned once by its owner
    pub fn add_kernel_page(&self, pfn: Pfn, flags: FrameFlags) -> Option<&Frame> {
        let frame = self.take_free(pfn)?;
        frame.set_flags(flags);
        frame.get();
        Some(frame)
    }

    /// Put frame `pfn` in the swap cache
    pub fn add_to_swap_cache(&self, pfn: Pfn) -> Option<&Frame> {
        let frame = self.frame_at(pfn)?;
        if self.cache.lock().swap_cache.insert(pfn) {
            frame.set_flags(FrameFlags::SWAPCACHE);
            frame.get();
        }
        Some(frame)
    }

    /// Add a task to the task list
    pub fn add_task(&self, task: HostTask) {
        self.tasks.lock().push(task);
    }

    /// Add a region of `pages` pages to anonymous mapping group `anon_vma`,
    /// returning its start address
    pub fn add_anon_vma(
        &self,
        anon_vma: AnonVmaId,
        mm: MmId,
        start: VirtualAddress,
        pages: usize,
        pgoff: u64,
    ) -> VirtualAddress {
        let vma = region(mm, start, pages, pgoff);
        self.anon_vmas.lock().entry(anon_vma).or_default().push(vma);
        start
    }

    /// Add a region of `pages` pages mapping `mapping` from offset `pgoff`,
    /// returning its start address
    pub fn add_file_vma(
        &self,
        mapping: MappingId,
        mm: MmId,
        start: VirtualAddress,
        pages: usize,
        pgoff: u64,
    ) -> VirtualAddress {
        let vma = region(mm, start, pages, pgoff);
        self.file_vmas.lock().entry(mapping).or_default().push(vma);
        start
    }

    /// Map frame `pfn` at `addr` in `mm`
    pub fn map_page(&self, pfn: Pfn, mm: MmId, addr: VirtualAddress, dirty: bool) {
        if let Some(frame) = self.frame_at(pfn) {
            self.ptes.lock().push(Pte { mm, addr, pfn, dirty });
            frame.inc_map_count();
            frame.get();
        }
    }

    /// Move frame `pfn` into a per-CPU buffer; it joins the reclaim list on
    /// the next reclaim-list drain
    pub fn park_on_lru_buffer(&self, pfn: Pfn) {
        if let Some(frame) = self.frame_at(pfn) {
            frame.clear_flags(FrameFlags::LRU);
            self.alloc.lock().lru_buffer.insert(pfn);
        }
    }

    /// Hand the pin of frame `pfn` to a per-CPU free buffer; the frame is
    /// freed on the next buffer drain
    pub fn park_on_free_buffer(&self, pfn: Pfn) {
        self.alloc.lock().free_buffer.insert(pfn);
    }

    /// Script the results of upcoming slab shrinking passes
    pub fn queue_shrink_results(&self, results: &[usize]) {
        self.alloc.lock().shrink_results.extend(results.iter().copied());
    }

    /// Configure the hole-punch operation of `mapping`
    pub fn set_punch_mode(&self, mapping: MappingId, mode: PunchMode) {
        self.cache.lock().mappings.entry(mapping).or_default().punch = mode;
    }

    /// Configure whether `mapping` can report dirty state
    pub fn set_writeback_capable(&self, mapping: MappingId, capable: bool) {
        self.cache.lock().mappings.entry(mapping).or_default().no_writeback = !capable;
    }

    /// Configure whether private filesystem metadata can be released
    pub fn set_private_releasable(&self, releasable: bool) {
        self.cache.lock().private_locked = !releasable;
    }

    // Failure injection

    /// Make the next `attempts` unmap calls fail transiently
    pub fn fail_unmap_attempts(&self, attempts: usize) {
        self.faults.lock().unmap_again = attempts;
    }

    /// Make every unmap call fail
    pub fn fail_unmap_always(&self) {
        self.faults.lock().unmap_fail = true;
    }

    /// Make every migration fail with `err`
    pub fn fail_migration(&self, err: MigrateError) {
        self.faults.lock().migrate = Some(err);
    }

    /// Refuse advisory signals for `pid`
    pub fn refuse_signals_for(&self, pid: ProcessId) {
        self.faults.lock().refused.insert(pid);
    }

    // Inspection

    /// Signals delivered so far, in order
    pub fn signals(&self) -> Vec<SignalRecord> {
        self.signals.lock().clone()
    }

    /// Page-table entries turned into poison markers by unmapping
    pub fn poison_markers(&self) -> Vec<(MmId, VirtualAddress)> {
        self.markers.lock().clone()
    }

    /// Activity counters
    pub fn stats(&self) -> HostStats {
        *self.stats.lock()
    }

    /// Whether `pfn` is excluded from allocation
    pub fn is_isolated(&self, pfn: Pfn) -> bool {
        self.alloc.lock().isolated.contains(&pfn)
    }

    /// Whether `pfn` is on the free lists
    pub fn is_free(&self, pfn: Pfn) -> bool {
        self.alloc.lock().free.contains(&pfn)
    }

    /// Whether `pfn` is in the page cache
    pub fn in_page_cache(&self, pfn: Pfn) -> bool {
        self.cache.lock().page_cache.contains(&pfn)
    }

    /// Whether `pfn` is in the swap cache
    pub fn in_swap_cache(&self, pfn: Pfn) -> bool {
        self.cache.lock().swap_cache.contains(&pfn)
    }

    /// Whether an I/O error was recorded on `mapping`
    pub fn mapping_has_io_error(&self, mapping: MappingId) -> bool {
        self.cache
            .lock()
            .mappings
            .get(&mapping)
            .is_some_and(|state| state.io_error)
    }

    /// Frame mapped at `addr` in `mm`
    pub fn pte_target(&self, mm: MmId, addr: VirtualAddress) -> Option<Pfn> {
        self.ptes
            .lock()
            .iter()
            .find(|pte| pte.mm == mm && pte.addr == addr)
            .map(|pte| pte.pfn)
    }

    fn putback(frame: &Frame) {
        frame.set_flags(FrameFlags::LRU);
        frame.put();
    }

    /// Move contents, mappings and cache membership of isolated `old` to
    /// freshly allocated `new`
    fn move_frame(&self, old: &Frame, new: &Frame) {
        let (from, to) = (old.pfn(), new.pfn());

        for pte in self.ptes.lock().iter_mut().filter(|pte| pte.pfn == from) {
            pte.pfn = to;
            new.get();
            new.inc_map_count();
            old.dec_map_count();
            old.put();
        }

        {
            let mut cache = self.cache.lock();
            if cache.page_cache.remove(&from) {
                cache.page_cache.insert(to);
                new.get();
                old.put();
            }
            if cache.swap_cache.remove(&from) {
                cache.swap_cache.insert(to);
                new.get();
                old.put();
            }
        }

        let carried = old
            .flags()
            .difference(FrameFlags::LOCKED | FrameFlags::HWPOISON | FrameFlags::LRU);
        new.set_flags(carried | FrameFlags::LRU);
        new.set_mapping(old.mapping());
        old.clear_flags(FrameFlags::all().difference(FrameFlags::HWPOISON));
        old.set_mapping(FrameMapping::Detached);

        // Allocation pin of the new frame and isolation pin of the old one
        new.put();
        if old.put() == 0 {
            self.alloc.lock().free.insert(from);
        }
    }
}

fn region(mm: MmId, start: VirtualAddress, pages: usize, pgoff: u64) -> VirtualMemoryArea {
    let end = VirtualAddress::new(start.as_usize() + pages * PAGE_SIZE);
    VirtualMemoryArea::new(mm, start, end, pgoff)
}

impl FrameAllocator for HostPlatform {
    fn frame(&self, pfn: Pfn) -> Option<&Frame> {
        self.frame_at(pfn)
    }

    fn is_frame_free(&self, frame: &Frame) -> bool {
        self.alloc.lock().free.contains(&frame.pfn())
    }

    fn exclude_from_allocation(&self, frame: &Frame) {
        self.alloc.lock().isolated.insert(frame.pfn());
    }

    fn restore(&self, frame: &Frame) {
        self.alloc.lock().isolated.remove(&frame.pfn());
    }

    fn allocate_replacement(&self, node: NodeId) -> Option<Pfn> {
        let mut alloc = self.alloc.lock();
        let pfn = alloc.free.iter().copied().find(|pfn| {
            !alloc.isolated.contains(pfn)
                && self
                    .frame_at(*pfn)
                    .is_some_and(|frame| frame.node() == node && !frame.is_poisoned())
        })?;
        alloc.free.remove(&pfn);
        if let Some(frame) = self.frame_at(pfn) {
            frame.get();
        }
        Some(pfn)
    }

    fn drain_lru_lists(&self) {
        self.stats.lock().lru_drains += 1;
        let drained = core::mem::take(&mut self.alloc.lock().lru_buffer);
        for frame in drained.into_iter().filter_map(|pfn| self.frame_at(pfn)) {
            frame.set_flags(FrameFlags::LRU);
        }
    }

    fn drain_frame_buffers(&self) {
        self.stats.lock().buffer_drains += 1;
        let mut alloc = self.alloc.lock();
        for pfn in core::mem::take(&mut alloc.free_buffer) {
            if let Some(frame) = self.frame_at(pfn) {
                frame.put();
                alloc.free.insert(pfn);
            }
        }
    }

    fn shrink_slab_caches(&self) -> usize {
        self.stats.lock().shrink_passes += 1;
        self.alloc.lock().shrink_results.pop_front().unwrap_or(0)
    }
}

impl PageCache for HostPlatform {
    fn isolate_lru(&self, frame: &Frame) -> bool {
        if !frame.test_and_clear(FrameFlags::LRU) {
            return false;
        }
        frame.get();
        true
    }

    fn punch_hole(&self, mapping: MappingId, frame: &Frame) -> Result<(), PunchError> {
        let mut cache = self.cache.lock();
        let mode = cache
            .mappings
            .get(&mapping)
            .map(|state| state.punch)
            .unwrap_or_default();

        match mode {
            PunchMode::Supported => {
                if cache.page_cache.remove(&frame.pfn()) {
                    frame.put();
                }
                frame.clear_flags(FrameFlags::DIRTY);
                frame.set_mapping(FrameMapping::Detached);
                Ok(())
            }
            PunchMode::Unsupported => Err(PunchError::Unsupported),
            PunchMode::Error(code) => Err(PunchError::Failed(code)),
        }
    }

    fn invalidate(&self, frame: &Frame) -> bool {
        let mut cache = self.cache.lock();
        if !cache.page_cache.contains(&frame.pfn())
            || frame.flags().intersects(FrameFlags::DIRTY | FrameFlags::WRITEBACK)
            || frame.is_mapped()
        {
            return false;
        }
        if frame.has_private() {
            if cache.private_locked {
                return false;
            }
            frame.clear_flags(FrameFlags::PRIVATE);
        }
        cache.page_cache.remove(&frame.pfn());
        frame.put();
        frame.set_mapping(FrameMapping::Detached);
        true
    }

    fn release_private_metadata(&self, frame: &Frame) -> bool {
        if self.cache.lock().private_locked {
            return false;
        }
        frame.clear_flags(FrameFlags::PRIVATE);
        true
    }

    fn mark_mapping_io_error(&self, mapping: MappingId) {
        self.cache.lock().mappings.entry(mapping).or_default().io_error = true;
    }

    fn can_writeback_dirty(&self, mapping: MappingId) -> bool {
        !self
            .cache
            .lock()
            .mappings
            .get(&mapping)
            .is_some_and(|state| state.no_writeback)
    }

    fn delete_from_swap_cache(&self, frame: &Frame) -> bool {
        if !self.cache.lock().swap_cache.remove(&frame.pfn()) {
            return false;
        }
        frame.clear_flags(FrameFlags::SWAPCACHE);
        frame.put();
        true
    }
}

impl ReverseMap for HostPlatform {
    type Task = HostTask;

    fn with_tasks(&self, f: &mut dyn FnMut(&[HostTask])) {
        let tasks = self.tasks.lock();
        f(&tasks);
    }

    fn with_anon_vmas(&self, anon_vma: AnonVmaId, f: &mut dyn FnMut(&[VirtualMemoryArea])) -> bool {
        let groups = self.anon_vmas.lock();
        match groups.get(&anon_vma) {
            Some(vmas) => {
                f(vmas);
                true
            }
            None => false,
        }
    }

    fn with_file_vmas(&self, mapping: MappingId, pgoff: u64, f: &mut dyn FnMut(&[VirtualMemoryArea])) {
        let index = self.file_vmas.lock();
        let hits: Vec<VirtualMemoryArea> = index
            .get(&mapping)
            .map(|vmas| vmas.iter().filter(|vma| vma.covers(pgoff)).copied().collect())
            .unwrap_or_default();
        f(&hits);
    }

    fn frame_mapped_in(&self, frame: &Frame, vma: &VirtualMemoryArea) -> bool {
        self.ptes.lock().iter().any(|pte| {
            pte.pfn == frame.pfn() && pte.mm == vma.mm && pte.addr >= vma.start && pte.addr < vma.end
        })
    }

    fn try_to_unmap(&self, frame: &Frame, flags: UnmapFlags) -> UnmapStatus {
        self.stats.lock().unmap_attempts += 1;

        {
            let mut faults = self.faults.lock();
            if faults.unmap_fail {
                return UnmapStatus::Fail;
            }
            if faults.unmap_again > 0 {
                faults.unmap_again -= 1;
                return UnmapStatus::Again;
            }
        }

        if frame.contains(FrameFlags::MLOCKED) && !flags.contains(UnmapFlags::IGNORE_MLOCK) {
            return UnmapStatus::Fail;
        }

        let mark = frame.is_poisoned() && !flags.contains(UnmapFlags::IGNORE_HWPOISON);
        let mut ptes = self.ptes.lock();
        let mut markers = self.markers.lock();
        ptes.retain(|pte| {
            if pte.pfn != frame.pfn() {
                return true;
            }
            if pte.dirty {
                frame.set_flags(FrameFlags::DIRTY);
            }
            if mark {
                markers.push((pte.mm, pte.addr));
            }
            frame.dec_map_count();
            frame.put();
            false
        });
        UnmapStatus::Success
    }

    fn mkclean(&self, frame: &Frame) -> bool {
        let mut dirty = false;
        for pte in self.ptes.lock().iter_mut().filter(|pte| pte.pfn == frame.pfn()) {
            dirty |= pte.dirty;
            pte.dirty = false;
        }
        dirty
    }
}

impl SignalDelivery<HostTask> for HostPlatform {
    fn send_advisory(&self, task: &HostTask, addr: VirtualAddress, trap: &TrapContext) -> SignalResult<()> {
        if self.faults.lock().refused.contains(&task.pid()) {
            return Err(SignalError::PermissionDenied);
        }
        self.signals.lock().push(SignalRecord {
            pid: task.pid(),
            signal: Signal::Advisory { addr, trap: *trap },
        });
        Ok(())
    }

    fn send_forced_fatal(&self, task: &HostTask) {
        self.signals.lock().push(SignalRecord {
            pid: task.pid(),
            signal: Signal::ForcedFatal,
        });
    }
}

impl Migrator for HostPlatform {
    fn migrate(
        &self,
        frames: &[&Frame],
        new_frame: &dyn Fn(&Frame) -> Option<Pfn>,
    ) -> Result<(), MigrateError> {
        let injected = self.faults.lock().migrate;
        if let Some(err) = injected {
            frames.iter().for_each(|frame| Self::putback(frame));
            return Err(err);
        }

        let mut left = 0;
        for &old in frames {
            match new_frame(old).and_then(|pfn| self.frame_at(pfn)) {
                Some(new) => {
                    self.move_frame(old, new);
                    self.stats.lock().migrations += 1;
                }
                None => {
                    Self::putback(old);
                    left += 1;
                }
            }
        }

        if left > 0 {
            Err(MigrateError::NotMigrated(left))
        } else {
            Ok(())
        }
    }
}

impl Platform for HostPlatform {
    type Task = HostTask;
    type Allocator = Self;
    type PageCache = Self;
    type ReverseMap = Self;
    type Signals = Self;
    type Migrator = Self;

    fn allocator(&self) -> &Self {
        self
    }

    fn page_cache(&self) -> &Self {
        self
    }

    fn reverse_map(&self) -> &Self {
        self
    }

    fn signals(&self) -> &Self {
        self
    }

    fn migrator(&self) -> &Self {
        self
    }
}
