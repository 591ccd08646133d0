//! What coroutines need from the execution engine that hosts them.

use {crate::Coroutine, smallvec::SmallVec, tracing::trace};

/// Per-coroutine state of the host execution engine.
///
/// The host owns a value stack for each coroutine.
/// Arguments for a resume are pushed on top of that stack before resuming,
/// and the coroutine body finds them there.
pub trait Host: Sized
{
    /// Failure of the host logic running inside a coroutine.
    type Error;

    /// Run the host logic of a coroutine.
    ///
    /// Called once per coroutine, on the coroutine's own stack,
    /// with the number of arguments passed to the first resume.
    /// The logic may [suspend][`Coroutine::suspend`] the coroutine any number
    /// of times. Returning ends the coroutine; an error is passed to
    /// [`materialize_error`][`Self::materialize_error`] first.
    ///
    /// Panics are caught before they leave the coroutine's stack
    /// and are resumed on the stack of the resumer.
    fn call(coroutine: &Coroutine<Self>, nargs: usize)
        -> Result<(), Self::Error>;

    /// Turn a failure into a value on the coroutine's value stack,
    /// where the resumer can find it.
    fn materialize_error(&mut self, error: Self::Error);

    /// Index of the first slot of the current frame.
    fn base(&self) -> usize;

    /// Index one past the last used slot.
    fn top(&self) -> usize;

    /// Copy the value in slot `from` into slot `to`.
    fn copy_slot(&mut self, to: usize, from: usize);

    /// Discard or allocate slots so that [`top`][`Self::top`] becomes `top`.
    fn set_top(&mut self, top: usize);
}

/// Move the arguments of a resume to the base of the current frame.
///
/// The resumer pushes `nargs` arguments on top of whatever the coroutine
/// left on its stack when it suspended.
/// The coroutine expects them at the base of its frame instead.
pub(crate) fn relocate_arguments<H>(host: &mut H, nargs: usize, id: u64)
    where H: Host
{
    let top = host.top();
    let base = host.base();

    debug_assert!(nargs <= top, "More arguments than values on the stack");
    let args = top.saturating_sub(nargs);

    if base < args {
        trace!(id, nargs, from = args, to = base, "Relocating arguments");
        for i in 0 .. nargs {
            host.copy_slot(base + i, args + i);
        }
        host.set_top(base + nargs);
    }
}

/// Value stack with a movable frame base.
///
/// Hosts can embed this to implement the stack accessors of [`Host`].
#[derive(Clone, Debug, Default)]
pub struct ValueStack<V>
{
    values: SmallVec<[V; 8]>,
    base: usize,
}

impl<V> ValueStack<V>
{
    /// Create an empty stack with its base at zero.
    pub fn new() -> Self
    {
        Self{values: SmallVec::new(), base: 0}
    }

    /// Index of the first slot of the current frame.
    pub fn base(&self) -> usize
    {
        self.base
    }

    /// Move the frame base.
    ///
    /// # Panics
    ///
    /// Panics if `base` is past the top.
    pub fn set_base(&mut self, base: usize)
    {
        assert!(base <= self.values.len(), "Frame base past the top");
        self.base = base;
    }

    /// Index one past the last used slot.
    pub fn top(&self) -> usize
    {
        self.values.len()
    }

    /// Push a value.
    pub fn push(&mut self, value: V)
    {
        self.values.push(value);
    }

    /// Pop a value, but never from below the frame base.
    pub fn pop(&mut self) -> Option<V>
    {
        if self.values.len() > self.base {
            self.values.pop()
        } else {
            None
        }
    }

    /// The value in a slot.
    pub fn get(&self, index: usize) -> Option<&V>
    {
        self.values.get(index)
    }

    /// The values of the current frame.
    pub fn frame(&self) -> &[V]
    {
        &self.values[self.base ..]
    }

    /// The topmost `n` values.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `n` values are on the stack.
    pub fn top_n(&self, n: usize) -> &[V]
    {
        &self.values[self.values.len() - n ..]
    }
}

impl<V> ValueStack<V>
    where V: Clone + Default
{
    /// Copy the value in slot `from` into slot `to`.
    pub fn copy_slot(&mut self, to: usize, from: usize)
    {
        self.values[to] = self.values[from].clone();
    }

    /// Truncate the stack or extend it with default values.
    pub fn set_top(&mut self, top: usize)
    {
        self.values.resize(top, V::default());
        self.base = self.base.min(top);
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    /// Host that is only ever used for its value stack.
    struct Slots(ValueStack<i32>);

    impl Host for Slots
    {
        type Error = ();

        fn call(_: &Coroutine<Self>, _: usize) -> Result<(), ()>
        {
            unreachable!("Slots is never run")
        }

        fn materialize_error(&mut self, _: ())
        {
        }

        fn base(&self) -> usize { self.0.base() }
        fn top(&self) -> usize { self.0.top() }
        fn copy_slot(&mut self, to: usize, from: usize) { self.0.copy_slot(to, from) }
        fn set_top(&mut self, top: usize) { self.0.set_top(top) }
    }

    fn slots(values: &[i32], base: usize) -> Slots
    {
        let mut stack = ValueStack::new();
        values.iter().for_each(|&v| stack.push(v));
        stack.set_base(base);
        Slots(stack)
    }

    #[test]
    fn arguments_above_leftovers_move_down()
    {
        // Frame starts at 1; 9 and 8 are leftovers, 5 and 6 are new arguments.
        let mut host = slots(&[0, 9, 8, 5, 6], 1);
        relocate_arguments(&mut host, 2, 0);
        assert_eq!(host.0.frame(), &[5, 6]);
        assert_eq!(host.0.top(), 3);
    }

    #[test]
    fn arguments_at_base_stay_put()
    {
        let mut host = slots(&[0, 5, 6], 1);
        relocate_arguments(&mut host, 2, 0);
        assert_eq!(host.0.frame(), &[5, 6]);
        assert_eq!(host.0.top(), 3);
    }

    #[test]
    fn zero_arguments_drop_leftovers()
    {
        let mut host = slots(&[0, 9, 8], 1);
        relocate_arguments(&mut host, 0, 0);
        assert_eq!(host.0.frame(), &[] as &[i32]);
    }

    #[test]
    fn pop_stops_at_base()
    {
        let mut stack = slots(&[1, 2], 1).0;
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), None);
        assert_eq!(stack.top(), 1);
    }

    #[test]
    fn slots_are_readable_across_frames()
    {
        let stack = slots(&[7, 8, 9], 2).0;
        assert_eq!(stack.get(0), Some(&7));
        assert_eq!(stack.get(2), Some(&9));
        assert_eq!(stack.get(3), None);
        assert_eq!(stack.top_n(2), &[8, 9]);
        assert_eq!(stack.top_n(0), &[] as &[i32]);
    }

    #[test]
    #[should_panic]
    fn top_n_past_the_bottom_panics()
    {
        slots(&[1], 0).0.top_n(2);
    }

    #[test]
    fn set_top_extends_with_defaults()
    {
        let mut stack = slots(&[1], 0).0;
        stack.set_top(3);
        assert_eq!(stack.frame(), &[1, 0, 0]);
        stack.set_top(0);
        assert_eq!(stack.base(), 0);
    }
}
