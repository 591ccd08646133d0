//! Coroutine handles and their state machine.
//!
//! ```text
//!             resume              suspend
//!   Ready ----------> Running -----------> Suspended
//!                      |   ^                  |
//!                      |   +------------------+
//!                      |          resume
//!                      v
//!                     Dead  <---- destroy (from any state but Running)
//! ```

use {
    self::trampoline::trampoline,
    crate::{
        Host,
        MappedAllocator,
        Misuse,
        Release,
        Result,
        context,
        host::relocate_arguments,
        release_policy,
        stack::{ControlBlock, Stack, StackAllocator, StackSize},
    },
    scope_exit::scope_exit,
    std::{
        any::Any,
        cell::{Cell, Ref, RefCell, RefMut},
        marker::PhantomPinned,
        panic::resume_unwind,
        pin::Pin,
        ptr::{NonNull, addr_of, addr_of_mut, null},
        sync::atomic::{AtomicU64, Ordering::Relaxed},
    },
    tracing::{debug, error, trace},
};

mod trampoline;

/// Where a coroutine is in its life.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status
{
    /// Created, not yet resumed.
    Ready,

    /// Resumed, and neither suspended nor finished since.
    Running,

    /// Suspended, waiting to be resumed.
    Suspended,

    /// Finished or destroyed.
    Dead,
}

/// How a dead coroutine finished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome
{
    /// The host logic returned successfully.
    Returned,

    /// The host logic failed and its error was materialized.
    Failed,

    /// The host logic panicked.
    /// The panic was resumed on the stack of the resumer.
    Panicked,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// The coroutine currently running on this thread, if any.
    static CURRENT: Cell<*const ()> = const { Cell::new(null()) };
}

/// Coroutine with its own stack.
///
/// Coroutines are always pinned,
/// because their stacks hold pointers to them.
pub struct Coroutine<H>
    where H: Host
{
    _pinned: PhantomPinned,

    id: u64,
    release: Release,

    status: Cell<Status>,
    outcome: Cell<Option<Outcome>>,
    panic: Cell<Option<Box<dyn Any + Send>>>,

    /// [`None`] for unstacked coroutines and released stacks.
    stack: RefCell<Option<Stack>>,

    host: RefCell<H>,
}

/// Where stacks come from unless the builder says otherwise.
static GUARDED: MappedAllocator = MappedAllocator::new();

/// Configuration for creating a coroutine.
#[derive(Clone, Copy)]
pub struct Builder
{
    stack_size: StackSize,
    release: Option<Release>,
    allocator: &'static dyn StackAllocator,
}

impl Builder
{
    /// Default stack size, default release policy,
    /// and a [mapped stack with a guard page][`MappedAllocator`].
    pub fn new() -> Self
    {
        Self{
            stack_size: StackSize::Default,
            release: None,
            allocator: &GUARDED,
        }
    }

    /// Set the size of the stack.
    pub fn stack_size(mut self, stack_size: StackSize) -> Self
    {
        self.stack_size = stack_size;
        self
    }

    /// Override the [process-wide release policy][`release_policy`].
    pub fn release(mut self, release: Release) -> Self
    {
        self.release = Some(release);
        self
    }

    /// Set where the stack comes from.
    ///
    /// Allocators without a guard page can only be constructed unsafely;
    /// see [`HeapAllocator::new`].
    ///
    /// [`HeapAllocator::new`]: `crate::HeapAllocator::new`
    pub fn allocator(mut self, allocator: &'static dyn StackAllocator) -> Self
    {
        self.allocator = allocator;
        self
    }

    /// Create a ready coroutine around the given host state.
    ///
    /// Fails only if the stack cannot be allocated,
    /// in which case nothing is left behind.
    pub fn spawn<H>(self, host: H) -> Result<Pin<Box<Coroutine<H>>>>
        where H: Host
    {
        let id = NEXT_ID.fetch_add(1, Relaxed);

        let stack = match self.stack_size.resolve()? {
            Some(size) => Some(Stack::new(size, self.allocator, id)?),
            None       => None,
        };

        let coroutine = Box::pin(Coroutine{
            _pinned: PhantomPinned,
            id,
            release: self.release.unwrap_or_else(release_policy),
            status: Cell::new(Status::Ready),
            outcome: Cell::new(None),
            panic: Cell::new(None),
            stack: RefCell::new(stack),
            host: RefCell::new(host),
        });

        if let Some(stack) = &*coroutine.stack.borrow() {
            let handle = &*coroutine as *const Coroutine<H> as usize;
            let control = stack.control().as_ptr();
            // SAFETY: The stack is fresh and owned by the coroutine,
            //         and the coroutine is pinned.
            unsafe {
                context::install(
                    addr_of_mut!((*control).own),
                    trampoline::<H>,
                    stack.top(),
                    handle,
                );
            }
        }

        debug!(
            id,
            size = ?coroutine.stack_size(),
            release = ?coroutine.release,
            "Created coroutine"
        );

        Ok(coroutine)
    }
}

impl Default for Builder
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl<H> Coroutine<H>
    where H: Host
{
    /// Create a ready coroutine with the given stack size
    /// and otherwise default settings.
    pub fn new(host: H, stack_size: StackSize) -> Result<Pin<Box<Self>>>
    {
        Builder::new().stack_size(stack_size).spawn(host)
    }

    /// Process-unique identifier, for diagnostics.
    pub fn id(&self) -> u64
    {
        self.id
    }

    /// Where the coroutine is in its life.
    pub fn status(&self) -> Status
    {
        self.status.get()
    }

    /// How the coroutine finished.
    ///
    /// [`None`] unless the coroutine ran to completion.
    pub fn outcome(&self) -> Option<Outcome>
    {
        self.outcome.get()
    }

    /// When the stack is released.
    pub fn release(&self) -> Release
    {
        self.release
    }

    /// Size of the stack allocation.
    ///
    /// At least the requested size; allocators may round it up.
    /// [`None`] if the coroutine has no stack or it was released.
    pub fn stack_size(&self) -> Option<usize>
    {
        self.stack.borrow().as_ref().map(Stack::size)
    }

    /// Whether this coroutine is the one running on this thread.
    pub fn is_current(&self) -> bool
    {
        CURRENT.with(Cell::get) == self.erased()
    }

    /// Borrow the host state.
    ///
    /// # Panics
    ///
    /// Panics if the host state is mutably borrowed.
    pub fn host(&self) -> Ref<'_, H>
    {
        self.host.borrow()
    }

    /// Mutably borrow the host state.
    ///
    /// Borrows must end before the coroutine is resumed or suspended.
    ///
    /// # Panics
    ///
    /// Panics if the host state is borrowed.
    pub fn host_mut(&self) -> RefMut<'_, H>
    {
        self.host.borrow_mut()
    }

    /// Run the coroutine until it suspends or finishes.
    ///
    /// The host pushes `nargs` arguments onto the coroutine's value stack
    /// before calling this. The first resume passes them to [`Host::call`];
    /// later resumes return them from [`suspend`][`Self::suspend`].
    ///
    /// Returns [`Status::Suspended`] or [`Status::Dead`].
    /// If the coroutine dies under [`Release::Eager`],
    /// its stack is released before this returns.
    ///
    /// # Panics
    ///
    /// If the host logic panics, the panic continues here.
    pub fn resume(&self, nargs: usize) -> Result<Status>
    {
        match self.status.get() {
            Status::Running => return Err(Misuse::ResumeRunning.into()),
            Status::Dead    => return Err(Misuse::ResumeDead.into()),
            Status::Ready | Status::Suspended => (),
        }

        if self.host.try_borrow_mut().is_err() {
            return Err(Misuse::HostBorrowed.into());
        }

        let previous = CURRENT.with(|c| c.replace(self.erased()));
        scope_exit! { CURRENT.with(|c| c.set(previous)); }

        self.status.set(Status::Running);
        trace!(id = self.id, nargs, "Resuming coroutine");

        match self.control() {
            Some(control) => {
                let control = control.as_ptr();
                // SAFETY: The stack is live because the coroutine is not dead,
                //         and its own context was filled by install or suspend.
                unsafe {
                    (*control).nargs = nargs;
                    context::switch(addr_of_mut!((*control).back), addr_of!((*control).own));
                }
            },
            None => self.activate(nargs),
        }

        let status = self.status.get();
        trace!(id = self.id, ?status, "Coroutine switched back");

        if status == Status::Dead {
            if self.release == Release::Eager {
                self.release_stack();
            }
            if let Some(payload) = self.panic.take() {
                resume_unwind(payload);
            }
        }

        Ok(status)
    }

    /// Switch back to the resumer until the coroutine is resumed again.
    ///
    /// Must be called by the host logic of this coroutine, while it runs.
    /// Returns the number of arguments passed to the resume,
    /// after they have been moved to the base of the current frame.
    pub fn suspend(&self) -> Result<usize>
    {
        if !self.is_current() {
            return Err(Misuse::YieldOutside.into());
        }

        let Some(control) = self.control() else {
            return Err(Misuse::YieldWithoutStack.into());
        };

        if self.host.try_borrow_mut().is_err() {
            return Err(Misuse::HostBorrowed.into());
        }

        self.status.set(Status::Suspended);
        trace!(id = self.id, "Suspending coroutine");

        let control = control.as_ptr();
        // SAFETY: The stack is live while the coroutine runs,
        //         and back was filled by the resume that is running it.
        let nargs = unsafe {
            context::switch(addr_of_mut!((*control).own), addr_of!((*control).back));
            (*control).nargs
        };

        relocate_arguments(&mut *self.host.borrow_mut(), nargs, self.id);

        Ok(nargs)
    }

    /// Kill the coroutine and release its stack.
    ///
    /// Destroying a suspended coroutine abandons its stack:
    /// values that live on it are never dropped.
    pub fn destroy(&self) -> Result<()>
    {
        if self.status.get() == Status::Running {
            return Err(Misuse::DestroyRunning.into());
        }

        self.status.set(Status::Dead);
        self.release_stack();

        debug!(id = self.id, "Destroyed coroutine");

        Ok(())
    }

    fn release_stack(&self)
    {
        if let Some(stack) = self.stack.borrow_mut().take() {
            let size = stack.size();
            drop(stack);
            debug!(id = self.id, size, "Released coroutine stack");
        }
    }

    fn control(&self) -> Option<NonNull<ControlBlock>>
    {
        self.stack.borrow().as_ref().map(Stack::control)
    }

    fn erased(&self) -> *const ()
    {
        self as *const Self as *const ()
    }
}

impl<H> Drop for Coroutine<H>
    where H: Host
{
    fn drop(&mut self)
    {
        if self.status.get() == Status::Running {
            // The host logic would continue on freed memory.
            error!(id = self.id, "Running coroutine was dropped");
            std::process::abort();
        }
        self.release_stack();
    }
}
