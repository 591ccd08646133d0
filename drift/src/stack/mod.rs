//! Coroutine stacks and the control blocks embedded in them.
//!
//! Each stack is a single allocation.
//! Its control block sits at the top, at the highest address
//! that leaves room for the control block and is aligned to [`STACK_ALIGN`].
//! The usable stack is everything below the control block,
//! so the control block address doubles as the initial stack pointer.
//! Stacks grow toward lower addresses on every supported architecture,
//! so stack growth never reaches the control block.
//!
//! ```text
//!  base                                          control block    base + size
//!  |<-------------- usable stack --------------->|<---------->|pad|
//!                                  grows downward <- stack top
//! ```

pub use self::allocator::*;

use {
    crate::{
        Error,
        MIN_STACK_SIZE,
        Result,
        STACK_ALIGN,
        context::Context,
        default_stack_size,
    },
    std::{
        mem::{align_of, size_of},
        ptr::{NonNull, addr_of},
    },
    tracing::trace,
};

mod allocator;

/// Requested size of a coroutine stack.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StackSize
{
    /// The process-wide [default stack size][`default_stack_size`]
    /// at the time the coroutine is created.
    Default,

    /// No private stack.
    ///
    /// The coroutine body runs directly on the stack of whoever resumes it,
    /// so it cannot yield.
    Unstacked,

    /// At least this many bytes.
    ///
    /// Allocators may hand out more; see [`Coroutine::stack_size`].
    ///
    /// [`Coroutine::stack_size`]: `crate::Coroutine::stack_size`
    Bytes(usize),
}

impl From<isize> for StackSize
{
    /// Zero selects the default, negative sizes select no stack.
    fn from(size: isize) -> Self
    {
        match size {
            0          => Self::Default,
            s if s < 0 => Self::Unstacked,
            s          => Self::Bytes(s as usize),
        }
    }
}

impl StackSize
{
    /// The size to allocate, or [`None`] if no stack is wanted.
    pub fn resolve(self) -> Result<Option<ArenaSize>>
    {
        let requested = match self {
            Self::Default    => default_stack_size(),
            Self::Unstacked  => return Ok(None),
            Self::Bytes(n)   => n,
        };
        ArenaSize::new(requested).map(Some)
    }
}

/// Size of a stack allocation.
///
/// Always at least [`MIN_STACK_SIZE`] and a multiple of [`STACK_ALIGN`].
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct ArenaSize(usize);

impl ArenaSize
{
    /// Clamp `size` up to the minimum, then round it up to the alignment.
    ///
    /// Rounding happens after clamping so it cannot undercut the minimum.
    /// Fails only if rounding overflows.
    pub fn new(size: usize) -> Result<Self>
    {
        let clamped = size.max(MIN_STACK_SIZE);
        clamped.checked_next_multiple_of(STACK_ALIGN)
            .map(Self)
            .ok_or(Error::OutOfMemory{size: clamped})
    }

    /// The size in bytes.
    pub fn get(self) -> usize
    {
        self.0
    }
}

/// Bookkeeping for one coroutine, stored at the top of its stack.
#[repr(C)]
pub struct ControlBlock
{
    /// Where the coroutine continues when resumed.
    pub own: Context,

    /// Where the coroutine's resumer continues when the coroutine suspends.
    pub back: Context,

    /// Number of arguments passed by the latest resume.
    pub nargs: usize,

    /// Identifier of the coroutine, for diagnostics.
    pub id: u64,

    base: NonNull<u8>,
    size: usize,
    allocator: &'static dyn StackAllocator,
}

const _: () = assert!(align_of::<ControlBlock>() <= STACK_ALIGN);
const _: () = assert!(size_of::<ControlBlock>() * 2 <= MIN_STACK_SIZE);

/// Owning pointer to a stack.
///
/// The memory is returned to its allocator when this is dropped.
pub struct Stack
{
    control: NonNull<ControlBlock>,
}

impl Stack
{
    /// Allocate a stack and initialize its control block.
    ///
    /// The stack spans whatever region the allocator hands out,
    /// which is at least `size` bytes.
    /// Both contexts in the control block start out empty.
    pub fn new(
        size:      ArenaSize,
        allocator: &'static dyn StackAllocator,
        id:        u64,
    ) -> Result<Self>
    {
        let region = allocator.allocate(size.get())
            .ok_or(Error::OutOfMemory{size: size.get()})?;

        let base = region.cast::<u8>();
        let size = region.len();

        debug_assert!(size >= MIN_STACK_SIZE);
        debug_assert_eq!(base.as_ptr() as usize % STACK_ALIGN, 0);

        let control = control_block_address(base, size);

        let control_block = ControlBlock{
            own: Context::empty(),
            back: Context::empty(),
            nargs: 0,
            id,
            base,
            size,
            allocator,
        };

        // SAFETY: The control block lies within the allocation and is aligned.
        unsafe { control.as_ptr().write(control_block); }

        trace!(id, size, "Allocated coroutine stack");

        Ok(Self{control})
    }

    /// Pointer to the control block.
    ///
    /// The control block is valid for as long as this stack exists.
    pub fn control(&self) -> NonNull<ControlBlock>
    {
        self.control
    }

    /// Initial stack pointer, just below the control block.
    pub fn top(&self) -> NonNull<u8>
    {
        self.control.cast()
    }

    /// Lowest address of the allocation.
    pub fn base(&self) -> NonNull<u8>
    {
        // SAFETY: The control block is initialized.
        unsafe { *addr_of!((*self.control.as_ptr()).base) }
    }

    /// Size of the allocation in bytes.
    pub fn size(&self) -> usize
    {
        // SAFETY: The control block is initialized.
        unsafe { *addr_of!((*self.control.as_ptr()).size) }
    }
}

impl Drop for Stack
{
    fn drop(&mut self)
    {
        // SAFETY: The control block is initialized.
        let (id, allocator) = unsafe {
            let control = self.control.as_ptr();
            (*addr_of!((*control).id), *addr_of!((*control).allocator))
        };
        let (base, size) = (self.base(), self.size());
        let region = NonNull::slice_from_raw_parts(base, size);

        // SAFETY: The stack owns this allocation, and nothing runs on it.
        unsafe { allocator.deallocate(region); }

        trace!(id, size, "Released coroutine stack");
    }
}

/// Highest address within the allocation that can hold a
/// control block and is aligned to [`STACK_ALIGN`].
fn control_block_address(base: NonNull<u8>, size: usize)
    -> NonNull<ControlBlock>
{
    let base_addr = base.as_ptr() as usize;
    let end = base_addr + size;
    let addr = (end - size_of::<ControlBlock>()) & !(STACK_ALIGN - 1);

    // SAFETY: addr - base_addr < size, since size exceeds the control block.
    unsafe { NonNull::new_unchecked(base.as_ptr().add(addr - base_addr).cast()) }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        proptest::{self as p, proptest},
        std::{mem::align_of, sync::atomic::{AtomicIsize, Ordering::SeqCst}},
    };

    // SAFETY: No coroutine runs on these stacks.
    static HEAP: HeapAllocator = unsafe { HeapAllocator::new() };

    /// Counts allocations that are still live.
    struct CountingAllocator
    {
        live: AtomicIsize,
    }

    unsafe impl StackAllocator for CountingAllocator
    {
        fn allocate(&self, size: usize) -> Option<NonNull<[u8]>>
        {
            self.live.fetch_add(1, SeqCst);
            HEAP.allocate(size)
        }

        unsafe fn deallocate(&self, region: NonNull<[u8]>)
        {
            self.live.fetch_sub(1, SeqCst);
            HEAP.deallocate(region);
        }
    }

    /// Never has any memory.
    struct ExhaustedAllocator;

    unsafe impl StackAllocator for ExhaustedAllocator
    {
        fn allocate(&self, _size: usize) -> Option<NonNull<[u8]>>
        {
            None
        }

        unsafe fn deallocate(&self, _region: NonNull<[u8]>)
        {
            unreachable!("Nothing was ever allocated");
        }
    }

    #[test]
    fn control_block_is_stack_aligned()
    {
        assert!(align_of::<ControlBlock>() <= STACK_ALIGN);
    }

    #[test]
    fn stack_size_from_host_integers()
    {
        assert_eq!(StackSize::from(0), StackSize::Default);
        assert_eq!(StackSize::from(-1), StackSize::Unstacked);
        assert_eq!(StackSize::from(isize::MIN), StackSize::Unstacked);
        assert_eq!(StackSize::from(4096), StackSize::Bytes(4096));
    }

    #[test]
    fn unstacked_resolves_to_nothing()
    {
        assert_eq!(StackSize::Unstacked.resolve().unwrap(), None);
    }

    #[test]
    fn small_sizes_are_clamped_not_rejected()
    {
        assert_eq!(ArenaSize::new(0).unwrap().get(), MIN_STACK_SIZE);
        assert_eq!(ArenaSize::new(1).unwrap().get(), MIN_STACK_SIZE);
        assert_eq!(ArenaSize::new(MIN_STACK_SIZE + 1).unwrap().get(),
                   MIN_STACK_SIZE + STACK_ALIGN);
    }

    #[test]
    fn overflowing_size_is_out_of_memory()
    {
        let err = ArenaSize::new(usize::MAX).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory{size: usize::MAX}));
    }

    #[test]
    fn allocation_failure_is_out_of_memory()
    {
        static EXHAUSTED: ExhaustedAllocator = ExhaustedAllocator;
        let size = ArenaSize::new(8192).unwrap();
        let err = Stack::new(size, &EXHAUSTED, 0).err().unwrap();
        assert!(matches!(err, Error::OutOfMemory{size: 8192}));
    }

    #[test]
    fn dropping_a_stack_releases_it_once()
    {
        static COUNTING: CountingAllocator =
            CountingAllocator{live: AtomicIsize::new(0)};
        let size = ArenaSize::new(4096).unwrap();
        let stack = Stack::new(size, &COUNTING, 7).unwrap();
        assert_eq!(COUNTING.live.load(SeqCst), 1);
        drop(stack);
        assert_eq!(COUNTING.live.load(SeqCst), 0);
    }

    #[test]
    fn usable_stack_survives_writes()
    {
        let size = ArenaSize::new(4096).unwrap();
        let stack = Stack::new(size, &HEAP, 3).unwrap();
        let usable = stack.top().as_ptr() as usize - stack.base().as_ptr() as usize;

        // Scribble over the whole usable stack; the control block is untouched.
        // SAFETY: Everything below the stack top is owned by the stack.
        unsafe { stack.base().as_ptr().write_bytes(0xCC, usable); }
        // SAFETY: The control block is initialized.
        assert_eq!(unsafe { (*stack.control().as_ptr()).id }, 3);
        assert_eq!(stack.size(), 4096);
    }

    #[test]
    fn stack_spans_the_whole_mapped_region()
    {
        static MAPPED: MappedAllocator = MappedAllocator::new();
        let size = ArenaSize::new(8192).unwrap();
        let stack = Stack::new(size, &MAPPED, 0).unwrap();

        assert!(stack.size() >= MAPPED_STACK_RESERVE);
        let end = stack.base().as_ptr() as usize + stack.size();
        let top = stack.top().as_ptr() as usize;
        assert!(end - (top + size_of::<ControlBlock>()) < STACK_ALIGN);
    }

    proptest!
    {
        #[test]
        fn arena_size_is_aligned_and_at_least_minimum(size in 0usize ..= 1 << 20)
        {
            let arena = ArenaSize::new(size).unwrap().get();
            p::prop_assert_eq!(arena % STACK_ALIGN, 0);
            p::prop_assert!(arena >= MIN_STACK_SIZE);
            p::prop_assert!(arena >= size);
            p::prop_assert!(arena - size.max(MIN_STACK_SIZE) < STACK_ALIGN);
        }

        #[test]
        fn control_block_fits_at_the_aligned_end(size in 0usize ..= 1 << 16)
        {
            let size = ArenaSize::new(size).unwrap();
            let stack = Stack::new(size, &HEAP, 0).unwrap();

            let base = stack.base().as_ptr() as usize;
            let top = stack.top().as_ptr() as usize;
            let end = base + stack.size();

            p::prop_assert_eq!(top % STACK_ALIGN, 0);
            p::prop_assert!(top + size_of::<ControlBlock>() <= end);
            p::prop_assert!(end - (top + size_of::<ControlBlock>()) < STACK_ALIGN);
        }
    }
}
