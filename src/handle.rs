use crate::{Shareable, Upcast};
use alloc::boxed::Box;
use core::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::NonNull,
};

/// [`Ref<T>`] is an intrusive reference-counting pointer for single-threaded
/// use. The count is stored in the object itself, in the [`RefCount`] its
/// [`Shareable`] implementation exposes.
///
/// A handle is either *bound* to a real object or *void*. A void handle points
/// to the sentinel of `T` rather than to null, so cloning, assigning and
/// dropping count the sentinel like any other object. When the last handle to
/// a real object goes away, the object is dropped and its box freed.
///
/// Equality between handles is identity: two handles are equal when they
/// target the same object, or when both are void.
///
/// [`RefCount`]: crate::RefCount
pub struct Ref<T: ?Sized + Shareable> {
    ptr: NonNull<T>,
    phantom: PhantomData<Box<T>>,
}

impl<T: Shareable> Ref<T> {
    /// Moves `value` into a new box and binds a handle to it.
    ///
    /// # Examples
    ///
    /// ```
    /// use sentinel_rc::{shareable, Ref, RefCount};
    ///
    /// #[derive(Default)]
    /// struct Token {
    ///     rc: RefCount,
    /// }
    /// shareable!(Token, rc);
    ///
    /// let token = Ref::new(Token::default());
    /// assert!(token.is_bound());
    /// assert_eq!(Ref::count(&token), 1);
    /// ```
    #[inline]
    pub fn new(value: T) -> Ref<T> {
        Ref::from_box(Box::new(value))
    }
}

impl<T: ?Sized + Shareable> Ref<T> {
    /// Creates a handle that owns nothing.
    #[inline]
    pub fn void() -> Ref<T> {
        // SAFETY: the sentinel is never freed
        unsafe { Ref::bind(NonNull::from(T::sentinel())) }
    }

    /// Binds a handle to a boxed object.
    #[inline]
    pub fn from_box(object: Box<T>) -> Ref<T> {
        // SAFETY: box is always not null and is now owned through the count
        unsafe { Ref::bind(NonNull::new_unchecked(Box::into_raw(object))) }
    }

    /// Binds a handle to the object behind a raw pointer and increments its
    /// count. Other handles to the same object may already exist; the count
    /// lives in the object, so they all stay consistent.
    ///
    /// Panics with a precondition violation if `object` is null.
    ///
    /// # Safety
    ///
    /// A non-null `object` must either come from [`Box::into_raw`] and not be
    /// owned by anything else, or be the target of a live [`Ref<T>`], e.g. a
    /// pointer obtained from [`Ref::get`].
    #[inline]
    #[track_caller]
    pub unsafe fn from_raw(object: *mut T) -> Ref<T> {
        require!(!object.is_null(), "cannot bind a handle to a null object");
        Ref::bind(NonNull::new_unchecked(object))
    }

    /// Converting copy: a handle to the same object, seen as a `T`.
    ///
    /// A void `other` gives a void handle.
    #[inline]
    pub fn from_ref<S: ?Sized + Upcast<T>>(other: &Ref<S>) -> Ref<T> {
        // SAFETY: the target is kept alive by `other`
        unsafe { Ref::bind(Ref::converted(other)) }
    }

    /// Converting copy of this handle into a `Ref<U>`, see [`Ref::from_ref`].
    #[inline]
    pub fn upcast<U: ?Sized + Shareable>(&self) -> Ref<U>
    where
        T: Upcast<U>,
    {
        Ref::from_ref(self)
    }

    /// Makes this handle target the same object as `other`.
    ///
    /// The new target is counted before the old one is released, so
    /// assigning between handles that share a target never frees it.
    #[inline]
    pub fn assign(&mut self, other: &Ref<T>) {
        // SAFETY: the target is kept alive by `other`
        unsafe { self.rebind(other.ptr) }
    }

    /// Converting assignment, see [`Ref::assign`] and [`Ref::from_ref`].
    #[inline]
    pub fn assign_from<S: ?Sized + Upcast<T>>(&mut self, other: &Ref<S>) {
        let target = Ref::converted(other);
        // SAFETY: the target is kept alive by `other`
        unsafe { self.rebind(target) }
    }

    /// Releases the target and makes the handle void. Does nothing if the
    /// handle is already void.
    #[inline]
    pub fn reset(&mut self) {
        if self.is_bound() {
            // SAFETY: the sentinel is never freed
            unsafe { self.rebind(NonNull::from(T::sentinel())) }
        }
    }

    /// Returns `true` if the handle targets a real object.
    #[inline]
    #[must_use]
    pub fn is_bound(&self) -> bool {
        T::is_not_sentinel(self.ptr.as_ptr())
    }

    /// Returns `true` if the handle owns nothing.
    #[inline]
    #[must_use]
    pub fn is_void(&self) -> bool {
        T::is_sentinel(self.ptr.as_ptr())
    }

    /// Returns the target, or `None` for a void handle.
    #[inline]
    #[must_use]
    pub fn as_option(&self) -> Option<&T> {
        if self.is_bound() {
            Some(self.inner())
        } else {
            None
        }
    }

    /// Returns a pointer to the target, or `None` for a void handle.
    ///
    /// The pointer is not counted: it stays valid only while some handle
    /// keeps the object alive. Use [`Ref::from_raw`] to count it again.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<NonNull<T>> {
        if self.is_bound() {
            Some(self.ptr)
        } else {
            None
        }
    }

    /// Gives you the internal pointer, which is the sentinel for a void
    /// handle. The reference count stays the same.
    #[inline]
    #[must_use]
    pub fn as_ptr(this: &Self) -> *const T {
        this.ptr.as_ptr()
    }

    /// Gets the number of handles bound to the target. For a void handle this
    /// is the count of the sentinel, which includes its own pinned reference.
    ///
    /// # Examples
    ///
    /// ```
    /// use sentinel_rc::{shareable, Ref, RefCount};
    ///
    /// #[derive(Default)]
    /// struct Token {
    ///     rc: RefCount,
    /// }
    /// shareable!(Token, rc);
    ///
    /// let five = Ref::new(Token::default());
    /// let _also_five = five.clone();
    /// assert_eq!(2, Ref::count(&five));
    /// ```
    #[inline]
    #[must_use]
    pub fn count(this: &Self) -> usize {
        this.inner().ref_count().get()
    }

    /// Compares if two handles reference the same object, similar to
    /// [`ptr::eq`](core::ptr::eq).
    #[inline]
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr.as_ptr().cast::<()>() == other.ptr.as_ptr().cast::<()>()
    }

    #[inline(always)]
    fn inner(&self) -> &T {
        // SAFETY: the target is protected by the count, which includes this
        // handle; the sentinel is never freed.
        unsafe { self.ptr.as_ref() }
    }

    #[inline]
    fn address(&self) -> Option<NonNull<()>> {
        self.get().map(NonNull::cast::<()>)
    }

    #[inline]
    fn converted<S: ?Sized + Upcast<T>>(other: &Ref<S>) -> NonNull<T> {
        if other.is_void() {
            NonNull::from(T::sentinel())
        } else {
            S::upcast(other.ptr)
        }
    }

    #[inline]
    unsafe fn bind(object: NonNull<T>) -> Ref<T> {
        object.as_ref().ref_count().increment();
        Ref {
            ptr: object,
            phantom: PhantomData,
        }
    }

    /// Every assignment goes through here. The new target must be counted
    /// before the old one is released: they may be the same object, or the
    /// old one may own the only other reference to the new one.
    unsafe fn rebind(&mut self, object: NonNull<T>) {
        object.as_ref().ref_count().increment();
        let old = mem::replace(&mut self.ptr, object);
        Ref::release(old);
    }

    unsafe fn release(object: NonNull<T>) {
        if object.as_ref().ref_count().decrement() == 0 {
            verify!(
                T::is_not_sentinel(object.as_ptr()),
                "sentinel reference count dropped to zero"
            );
            T::destroy(object);
        }
    }
}

/// Binds the object behind `object` to a new handle.
///
/// # Safety
///
/// See [`Ref::from_raw`].
#[inline]
#[track_caller]
pub unsafe fn make_ref<T: ?Sized + Shareable>(object: *mut T) -> Ref<T> {
    Ref::from_raw(object)
}

impl<T: ?Sized + Shareable> Deref for Ref<T> {
    type Target = T;

    /// Panics with a precondition violation if the handle is void.
    #[inline(always)]
    #[track_caller]
    fn deref(&self) -> &T {
        require!(self.is_bound(), "cannot dereference a void handle");
        self.inner()
    }
}

impl<T: ?Sized + Shareable> Default for Ref<T> {
    #[inline]
    fn default() -> Ref<T> {
        Ref::void()
    }
}

impl<T: ?Sized + Shareable> Clone for Ref<T> {
    #[inline]
    fn clone(&self) -> Self {
        // SAFETY: the target is kept alive by `self`
        unsafe { Ref::bind(self.ptr) }
    }

    #[inline]
    fn clone_from(&mut self, source: &Self) {
        self.assign(source);
    }
}

impl<T: ?Sized + Shareable> Drop for Ref<T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: this handle holds one of the counted references
        unsafe { Ref::release(self.ptr) }
    }
}

impl<T: ?Sized + Shareable, U: ?Sized + Shareable> PartialEq<Ref<U>> for Ref<T> {
    #[inline]
    fn eq(&self, other: &Ref<U>) -> bool {
        self.address() == other.address()
    }
}

impl<T: ?Sized + Shareable> Eq for Ref<T> {}

impl<T: ?Sized + Shareable> Hash for Ref<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl<T: ?Sized + Shareable + fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_option() {
            Some(object) => fmt::Debug::fmt(object, f),
            None => f.write_str("Ref(void)"),
        }
    }
}

impl<T: ?Sized + Shareable> fmt::Pointer for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&Ref::as_ptr(self), f)
    }
}

impl<T: ?Sized + Shareable> Unpin for Ref<T> {}

#[cfg(test)]
mod tests {
    use super::Ref;
    use crate::{ucount, RefCount, Shareable};
    use crate::shareable::RefCounted;
    use core::ptr::NonNull;
    use std::{
        cell::Cell,
        panic::{self, AssertUnwindSafe},
        rc::Rc,
    };

    #[derive(Default)]
    struct Counted {
        rc: RefCount,
        drops: Rc<Cell<usize>>,
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    crate::shareable!(Counted, rc);

    fn counted() -> (Ref<Counted>, Rc<Cell<usize>>) {
        let drops = Rc::new(Cell::new(0));
        let object = Counted {
            rc: RefCount::new(),
            drops: drops.clone(),
        };
        (Ref::new(object), drops)
    }

    #[test]
    fn rebind_to_own_target() {
        let (mut a, drops) = counted();
        let target = a.ptr;
        unsafe { a.rebind(target) };
        assert!(a.is_bound());
        assert_eq!(Ref::count(&a), 1);
        assert_eq!(drops.get(), 0);
    }

    #[test]
    fn rebind_to_sentinel_releases_last_reference() {
        let (mut a, drops) = counted();
        let before = Ref::count(&Ref::<Counted>::void());
        a.reset();
        assert!(a.is_void());
        assert_eq!(drops.get(), 1);
        assert_eq!(Ref::count(&a), before);
    }

    #[test]
    fn sentinel_starts_pinned() {
        let void = Ref::<Counted>::void();
        // the pinned reference plus `void`
        assert_eq!(Ref::count(&void), 2);
        assert!(Ref::as_ptr(&void) == Ref::as_ptr(&Ref::<Counted>::void()));
    }

    #[test]
    fn overflowing_assign_leaves_handles_unchanged() {
        let (a, a_drops) = counted();
        let (mut b, b_drops) = counted();
        a.inner().ref_count().force(ucount::MAX);

        let result = panic::catch_unwind(AssertUnwindSafe(|| b.assign(&a)));
        assert!(result.is_err());
        assert!(b != a);
        assert_eq!(Ref::count(&a), ucount::MAX as usize);
        assert_eq!(Ref::count(&b), 1);
        assert_eq!(b_drops.get(), 0);

        a.inner().ref_count().force(1);
        drop(a);
        drop(b);
        assert_eq!(a_drops.get(), 1);
        assert_eq!(b_drops.get(), 1);
    }

    #[test]
    #[should_panic(expected = "invariant violated: cannot destroy the sentinel")]
    fn destroying_an_unpinned_sentinel() {
        let sentinel = Counted::sentinel();
        sentinel.ref_count().force(0);
        unsafe { Counted::destroy(NonNull::from(sentinel)) };
    }
}
