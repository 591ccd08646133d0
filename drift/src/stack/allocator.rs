use {
    crate::STACK_ALIGN,
    os_ext::{MAP_ANON, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE, mmap, mprotect, munmap},
    scope_exit::ScopeExit,
    std::{alloc::{Layout, alloc, dealloc}, ptr::NonNull, sync::OnceLock},
    tracing::warn,
};

/// Source of memory for coroutine stacks.
///
/// # Safety
///
/// The region returned by [`allocate`][`Self::allocate`] must be
/// aligned to [`STACK_ALIGN`], at least `size` bytes long,
/// a multiple of [`STACK_ALIGN`] long, readable and writable,
/// and not used by anything else until it is deallocated.
///
/// Coroutine bodies are safe code, so nothing stops them from
/// running off the bottom of their stack. An implementation must make
/// that fault, typically with an inaccessible guard page below the region,
/// unless the way it is constructed makes the caller promise otherwise.
pub unsafe trait StackAllocator
{
    /// Allocate at least `size` bytes, or return [`None`] if that is impossible.
    ///
    /// `size` is always a non-zero multiple of [`STACK_ALIGN`].
    fn allocate(&self, size: usize) -> Option<NonNull<[u8]>>;

    /// Return memory to the allocator.
    ///
    /// # Safety
    ///
    /// `region` must have been returned by `allocate` on this allocator,
    /// and the memory must not be used afterwards.
    unsafe fn deallocate(&self, region: NonNull<[u8]>);
}

/// Allocate stacks from the global Rust allocator.
///
/// These stacks have no guard page.
/// Running off the end of one corrupts whatever lies below it.
#[derive(Clone, Copy, Debug)]
pub struct HeapAllocator
{
    _unguarded: (),
}

impl HeapAllocator
{
    /// Create an allocator for unguarded stacks.
    ///
    /// # Safety
    ///
    /// No coroutine whose stack comes from this allocator may ever
    /// use more stack than it was given, including while it panics.
    pub const unsafe fn new() -> Self
    {
        Self{_unguarded: ()}
    }
}

unsafe impl StackAllocator for HeapAllocator
{
    fn allocate(&self, size: usize) -> Option<NonNull<[u8]>>
    {
        let layout = Layout::from_size_align(size, STACK_ALIGN).ok()?;
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: The layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc(layout) })?;
        Some(NonNull::slice_from_raw_parts(ptr, size))
    }

    unsafe fn deallocate(&self, region: NonNull<[u8]>)
    {
        // Accepted by from_size_align when the memory was allocated.
        let layout = Layout::from_size_align_unchecked(region.len(), STACK_ALIGN);
        dealloc(region.cast().as_ptr(), layout);
    }
}

/// Address space reserved for a mapped stack unless more is asked for.
///
/// Pages are only backed by memory once they are touched,
/// so a small coroutine costs little more than it uses,
/// yet still has room to unwind a panic.
pub const MAPPED_STACK_RESERVE: usize = 256 * 1024;

/// Allocate stacks as anonymous memory mappings with a guard page.
///
/// Each mapping reserves at least the configured amount of address space,
/// rounded up to whole pages, and the caller gets all of it.
/// The page just below the usable stack is mapped inaccessible,
/// so running off the end of the stack faults instead of
/// overwriting unrelated memory.
#[derive(Clone, Copy, Debug)]
pub struct MappedAllocator
{
    reserve: usize,
}

impl MappedAllocator
{
    /// Reserve [`MAPPED_STACK_RESERVE`] bytes per stack at least.
    pub const fn new() -> Self
    {
        Self::with_reserve(MAPPED_STACK_RESERVE)
    }

    /// Reserve at least `reserve` bytes per stack.
    ///
    /// Zero maps only what is asked for, rounded up to whole pages.
    pub const fn with_reserve(reserve: usize) -> Self
    {
        Self{reserve}
    }

    /// Page size, the length of the mapping, and the usable length.
    fn geometry(&self, size: usize) -> Option<(usize, usize, usize)>
    {
        let page = page_size()?;
        let usable = size.max(self.reserve).checked_next_multiple_of(page)?;
        let length = usable.checked_add(page)?;
        Some((page, length, usable))
    }
}

impl Default for MappedAllocator
{
    fn default() -> Self
    {
        Self::new()
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const MAP_STACK: os_ext::c_int = os_ext::MAP_STACK;

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
const MAP_STACK: os_ext::c_int = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const MAP_NORESERVE: os_ext::c_int = os_ext::MAP_NORESERVE;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MAP_NORESERVE: os_ext::c_int = 0;

/// Page size, queried once.
fn page_size() -> Option<usize>
{
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    if let Some(&page) = PAGE_SIZE.get() {
        return Some(page);
    }
    match os_ext::page_size() {
        Ok(page) => Some(*PAGE_SIZE.get_or_init(|| page)),
        Err(err) => {
            warn!(%err, "Cannot query the page size");
            None
        },
    }
}

unsafe impl StackAllocator for MappedAllocator
{
    fn allocate(&self, size: usize) -> Option<NonNull<[u8]>>
    {
        let (page, length, usable) = self.geometry(size)?;

        let flags = MAP_PRIVATE | MAP_ANON | MAP_STACK | MAP_NORESERVE;
        let mapping = mmap(length, PROT_READ | PROT_WRITE, flags, None, 0)
            .map_err(|err| warn!(%err, length, "Cannot map a coroutine stack"))
            .ok()?;

        let unmap = ScopeExit::new(|| {
            // SAFETY: Nothing has seen the mapping yet.
            let _ = unsafe { munmap(mapping, length) };
        });

        // Guard page at the lowest address; stacks grow down into it.
        // SAFETY: Nothing has seen the mapping yet.
        unsafe { mprotect(mapping, page, PROT_NONE) }
            .map_err(|err| warn!(%err, "Cannot protect a stack guard page"))
            .ok()?;

        unmap.dismiss();

        // SAFETY: The guard page is within the mapping.
        let base = unsafe { mapping.cast::<u8>().add(page) };
        Some(NonNull::slice_from_raw_parts(base, usable))
    }

    unsafe fn deallocate(&self, region: NonNull<[u8]>)
    {
        // The page size was cached when the stack was allocated.
        let Some(page) = page_size() else { return };
        let length = region.len() + page;
        let mapping = region.cast::<u8>().sub(page).cast::<os_ext::c_void>();
        if let Err(err) = munmap(mapping, length) {
            warn!(%err, length, "Cannot unmap a coroutine stack");
        }
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    // SAFETY: No coroutine runs on these stacks.
    static HEAP: HeapAllocator = unsafe { HeapAllocator::new() };
    static EXACT: MappedAllocator = MappedAllocator::with_reserve(0);

    fn fill_and_release(allocator: &dyn StackAllocator, size: usize)
    {
        let region = allocator.allocate(size).unwrap();
        let (base, len) = (region.cast::<u8>().as_ptr(), region.len());
        assert!(len >= size);
        assert_eq!(base as usize % STACK_ALIGN, 0);
        assert_eq!(len % STACK_ALIGN, 0);
        // SAFETY: The allocator hands out len writable bytes.
        unsafe {
            base.write_bytes(0x5A, len);
            assert_eq!(*base, 0x5A);
            assert_eq!(*base.add(len - 1), 0x5A);
            allocator.deallocate(region);
        }
    }

    #[test]
    fn heap_allocator_rejects_impossible_sizes()
    {
        assert!(HEAP.allocate(0).is_none());
        assert!(HEAP.allocate(usize::MAX & !(STACK_ALIGN - 1)).is_none());
    }

    #[test]
    fn heap_allocator_gives_exactly_what_is_asked()
    {
        let region = HEAP.allocate(4096).unwrap();
        assert_eq!(region.len(), 4096);
        // SAFETY: Allocated above.
        unsafe { HEAP.deallocate(region); }
    }

    #[test]
    fn mapped_allocator_rejects_impossible_sizes()
    {
        assert!(EXACT.allocate(usize::MAX & !(STACK_ALIGN - 1)).is_none());
    }

    #[test]
    fn mapped_stack_spans_whole_pages()
    {
        let page = page_size().unwrap();
        let size = 3000 & !(STACK_ALIGN - 1);
        let region = EXACT.allocate(size).unwrap();
        let base = region.cast::<u8>().as_ptr() as usize;
        assert_eq!(base % page, 0);
        assert_eq!(region.len(), page.max(size.next_multiple_of(page)));
        // SAFETY: Allocated above.
        unsafe { EXACT.deallocate(region); }
    }

    #[test]
    fn mapped_stack_reserves_room()
    {
        let region = MappedAllocator::new().allocate(8192).unwrap();
        assert!(region.len() >= MAPPED_STACK_RESERVE);
        // SAFETY: Allocated above.
        unsafe { MappedAllocator::new().deallocate(region); }
    }

    proptest!
    {
        #[test]
        fn allocators_hand_out_aligned_writable_memory(
            units in 1usize ..= 4096,
        )
        {
            let size = units * STACK_ALIGN;
            fill_and_release(&HEAP, size);
            fill_and_release(&EXACT, size);
            fill_and_release(&MappedAllocator::new(), size);
        }
    }
}
