//! Entry point of every stacked coroutine.

use {
    super::{Coroutine, Outcome, Status},
    crate::{Host, context},
    std::{panic::{AssertUnwindSafe, catch_unwind}, ptr::{addr_of, addr_of_mut}},
    tracing::{debug, error},
};

impl<H> Coroutine<H>
    where H: Host
{
    /// Run the host logic to completion, or until it panics.
    ///
    /// This is the one activation of the coroutine.
    /// Suspensions happen inside it, through [`Coroutine::suspend`].
    /// Afterwards the coroutine is dead and its outcome is recorded.
    /// Nothing unwinds out of this function.
    pub(super) fn activate(&self, nargs: usize)
    {
        let result = catch_unwind(AssertUnwindSafe(|| {
            H::call(self, nargs)
                .map_err(|err| self.host.borrow_mut().materialize_error(err))
        }));

        let outcome = match result {
            Ok(Ok(()))   => Outcome::Returned,
            Ok(Err(()))  => Outcome::Failed,
            Err(payload) => {
                self.panic.set(Some(payload));
                Outcome::Panicked
            },
        };

        self.outcome.set(Some(outcome));
        self.status.set(Status::Dead);

        debug!(id = self.id, ?outcome, "Coroutine finished");
    }
}

/// Installed as the entry of every stacked coroutine.
///
/// `handle` is the address of the pinned coroutine.
/// The trampoline runs the single activation and then switches back
/// to whoever resumed the coroutine last.
/// Dead coroutines are never switched into again,
/// so control reaching past that switch is a bug in the engine.
pub(super) extern "C" fn trampoline<H>(handle: usize) -> !
    where H: Host
{
    // SAFETY: The coroutine is pinned and outlives its stack.
    let coroutine = unsafe { &*(handle as *const Coroutine<H>) };
    let id = coroutine.id;

    if let Some(control) = coroutine.control() {
        // SAFETY: The stack is live while the coroutine runs.
        let nargs = unsafe { (*control.as_ptr()).nargs };

        coroutine.activate(nargs);

        // SAFETY: Resumers only switch into coroutines that are not dead,
        //         so the stack stays allocated until this switch is done.
        unsafe {
            let control = control.as_ptr();
            context::switch(addr_of_mut!((*control).own), addr_of!((*control).back));
        }
    }

    error!(id, "Dead coroutine was entered again");
    std::process::abort();
}
