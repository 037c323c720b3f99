use crate::ucount;
use alloc::boxed::Box;
use branches::{assume, unlikely};
use core::{cell::Cell, fmt, ptr::NonNull};

/// The counter a type embeds to become shareable through [`Ref<T>`].
///
/// A fresh counter starts at zero, and cloning a counter yields a fresh one:
/// ownership belongs to handles, not to object values, so a cloned object
/// starts unowned. For the same reason `clone_from` keeps the destination's
/// count untouched.
///
/// [`Ref<T>`]: crate::Ref
pub struct RefCount {
    count: Cell<ucount>,
}

impl RefCount {
    /// Creates a counter for an object that no handle owns yet.
    #[inline]
    #[must_use]
    pub const fn new() -> RefCount {
        RefCount {
            count: Cell::new(0),
        }
    }

    /// Returns the number of handles currently bound to the owning object.
    #[inline]
    #[must_use]
    pub fn get(&self) -> usize {
        self.count.get() as usize
    }

    #[inline]
    pub(crate) fn increment(&self) {
        let value = self.count.get().wrapping_add(1);
        if unlikely(value == 0) {
            panic!("reference counter overflow");
        }
        self.count.set(value);
    }

    /// Returns the remaining count.
    #[inline]
    pub(crate) fn decrement(&self) -> ucount {
        let value = self.count.get();
        // SAFETY: only called for the target of a live handle, which holds one
        // of the counted references.
        unsafe { assume(value != 0) };
        let value = value - 1;
        self.count.set(value);
        value
    }

    fn pin(&self) {
        self.count.set(1);
    }

    #[cfg(test)]
    pub(crate) fn force(&self, value: ucount) {
        self.count.set(value);
    }
}

impl Default for RefCount {
    #[inline]
    fn default() -> RefCount {
        RefCount::new()
    }
}

impl Clone for RefCount {
    #[inline]
    fn clone(&self) -> RefCount {
        RefCount::new()
    }

    #[inline]
    fn clone_from(&mut self, _source: &RefCount) {}
}

impl fmt::Debug for RefCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefCount").field(&self.get()).finish()
    }
}

/// Access to the [`RefCount`] embedded in an object.
///
/// This half of the capability is object safe, so it can be a supertrait of
/// the traits a `Ref<dyn Trait>` is built over.
pub trait RefCounted {
    /// The object's embedded counter.
    fn ref_count(&self) -> &RefCount;
}

/// A type whose boxed values can be shared through [`Ref<T>`].
///
/// Usually implemented with the [`shareable!`](crate::shareable) macro.
///
/// # Safety
///
/// * [`RefCounted::ref_count`] must return the same counter for the whole
///   life of an object, and no two live objects may share a counter.
/// * [`Shareable::sentinel`] must return the same object on every call from a
///   given thread, with a count of at least one, and that object must never
///   be freed.
///
/// [`Ref<T>`]: crate::Ref
pub unsafe trait Shareable: RefCounted + 'static {
    /// The object standing in for "no object" in void handles.
    fn sentinel() -> &'static Self;

    /// Tests whether `object` is the sentinel. Only addresses are compared.
    #[inline]
    fn is_sentinel(object: *const Self) -> bool {
        object.cast::<()>() == (Self::sentinel() as *const Self).cast::<()>()
    }

    /// Tests whether `object` is a real object.
    #[inline]
    fn is_not_sentinel(object: *const Self) -> bool {
        !Self::is_sentinel(object)
    }

    /// Frees the storage of an object nobody references anymore.
    ///
    /// Panics if the count is not zero or if `object` is the sentinel. The
    /// sentinel's count is pinned at one or more, so destroying it normally
    /// fails the count check first.
    ///
    /// # Safety
    ///
    /// `object` must come from a [`Box`] and must not be used afterwards.
    #[track_caller]
    unsafe fn destroy(object: NonNull<Self>) {
        let count = object.as_ref().ref_count().get();
        require!(
            count == 0,
            "cannot destroy an object with {} live references",
            count
        );
        verify!(
            Self::is_not_sentinel(object.as_ptr()),
            "cannot destroy the sentinel"
        );
        log::trace!("destroying shared object at {:p}", object);
        drop(Box::from_raw(object.as_ptr()));
    }
}

/// Relation allowing a `Ref<Self>` to be converted into a `Ref<U>`.
///
/// Implemented with the [`upcast!`](crate::upcast) macro, typically to turn a
/// concrete type into a trait object it implements. Types without the
/// relation cannot be converted: the conversion does not compile.
///
/// ```compile_fail
/// use sentinel_rc::{shareable, Ref, RefCount};
///
/// #[derive(Default)]
/// struct Circle {
///     rc: RefCount,
/// }
/// #[derive(Default)]
/// struct Square {
///     rc: RefCount,
/// }
/// shareable!(Circle, rc);
/// shareable!(Square, rc);
///
/// let square = Ref::new(Square::default());
/// let circle: Ref<Circle> = Ref::from_ref(&square);
/// ```
///
/// Implementing the trait is not enough without the declared relation:
///
/// ```compile_fail
/// use sentinel_rc::{shareable, Ref, RefCount, RefCounted};
///
/// trait Shape: RefCounted {}
///
/// #[derive(Default)]
/// struct Circle {
///     rc: RefCount,
/// }
/// impl Shape for Circle {}
/// shareable!(Circle, rc);
/// shareable!(dyn Shape => Circle);
///
/// let circle = Ref::new(Circle::default());
/// let shape = circle.upcast::<dyn Shape>();
/// ```
///
/// # Safety
///
/// `upcast` must return a pointer to the same allocation, whose
/// [`RefCounted::ref_count`] is the same counter, and which can be released as
/// a `Box<U>`.
pub unsafe trait Upcast<U: ?Sized + Shareable>: Shareable {
    /// Converts the pointer, keeping the object's identity.
    fn upcast(object: NonNull<Self>) -> NonNull<U>;
}

/// Leaks `value` and pins its count at one, so that it can serve as a
/// sentinel that no handle churn can ever free.
///
/// Used by [`shareable!`](crate::shareable); call it only once per type and
/// thread.
pub fn leak_sentinel<T: RefCounted + 'static>(value: T) -> &'static T {
    let sentinel: &'static T = Box::leak(Box::new(value));
    sentinel.ref_count().pin();
    log::debug!(
        "created sentinel for {} at {:p}",
        core::any::type_name::<T>(),
        sentinel
    );
    sentinel
}

/// Implements [`RefCounted`] and [`Shareable`] for a type.
///
/// * `shareable!(Type, field)` uses the `RefCount` in `field` and builds the
///   sentinel with `Default`.
/// * `shareable!(Type, field, expr)` builds the sentinel from `expr`.
/// * `shareable!(dyn Trait => Type)` makes the trait object shareable, reusing
///   the sentinel of `Type`. `Trait` must have [`RefCounted`] as a
///   supertrait.
///
/// The sentinel is created lazily, once per thread, and lives until the
/// process exits. Its box is leaked, so every thread that touches the type
/// leaks one sentinel; programs that keep spawning threads grow accordingly.
/// The type must not be generic, and building the sentinel must not create
/// a `Ref` of the same type: use an empty collection rather than a void
/// handle for self-referencing fields.
///
/// ```
/// use sentinel_rc::{shareable, Ref, RefCount};
///
/// #[derive(Default)]
/// struct Node {
///     rc: RefCount,
///     weight: u32,
/// }
///
/// shareable!(Node, rc);
///
/// let node = Ref::new(Node { rc: RefCount::new(), weight: 3 });
/// assert_eq!(node.weight, 3);
/// assert!(Ref::<Node>::void().is_void());
/// ```
#[macro_export]
macro_rules! shareable {
    (dyn $trait_:path => $sentinel:ty) => {
        unsafe impl $crate::Shareable for dyn $trait_ {
            #[inline]
            fn sentinel() -> &'static Self {
                <$sentinel as $crate::Shareable>::sentinel()
            }
        }
    };
    ($ty:ty, $field:ident, $sentinel:expr) => {
        impl $crate::RefCounted for $ty {
            #[inline]
            fn ref_count(&self) -> &$crate::RefCount {
                &self.$field
            }
        }

        unsafe impl $crate::Shareable for $ty {
            fn sentinel() -> &'static Self {
                ::std::thread_local! {
                    static SENTINEL: &'static $ty = $crate::leak_sentinel($sentinel);
                }
                SENTINEL.with(|sentinel| *sentinel)
            }
        }
    };
    ($ty:ty, $field:ident) => {
        $crate::shareable!($ty, $field, <$ty as ::core::default::Default>::default());
    };
}

/// Implements [`Upcast`] for an unsizing conversion, e.g.
/// `upcast!(Circle => dyn Shape)`.
#[macro_export]
macro_rules! upcast {
    ($src:ty => $dst:ty) => {
        unsafe impl $crate::Upcast<$dst> for $src {
            #[inline]
            fn upcast(object: ::core::ptr::NonNull<Self>) -> ::core::ptr::NonNull<$dst> {
                object
            }
        }
    };
}
