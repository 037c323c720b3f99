#![no_std]
//! # sentinel-rc: intrusive reference counting without null
//!
//! sentinel-rc provides [`Ref<T>`], a single-threaded smart pointer whose
//! reference count lives inside the shared object itself. Any type becomes
//! shareable by embedding a [`RefCount`] and implementing [`Shareable`],
//! usually through the [`shareable!`] macro.
//!
//! A `Ref<T>` never holds a null pointer. A handle that owns nothing points to
//! a per-type *sentinel* object instead, whose count starts at one and which
//! is never freed. Cloning, assigning and dropping handles therefore never
//! branch on null: the sentinel is counted like any other object, and only
//! the address comparison against it tells a void handle from a bound one.
//!
//! ```
//! use sentinel_rc::{shareable, Ref, RefCount};
//!
//! #[derive(Default)]
//! struct Buffer {
//!     rc: RefCount,
//!     bytes: Vec<u8>,
//! }
//!
//! shareable!(Buffer, rc);
//!
//! let a = Ref::new(Buffer { rc: RefCount::new(), bytes: vec![1, 2, 3] });
//! let mut b: Ref<Buffer> = Ref::void();
//! assert!(b.is_void());
//!
//! b.assign(&a);
//! assert_eq!(Ref::count(&a), 2);
//! assert!(a == b);
//!
//! b.reset();
//! assert_eq!(Ref::count(&a), 1);
//! assert_eq!(a.bytes, [1, 2, 3]);
//! ```
//!
//! ## Trait objects
//!
//! Handles convert from a concrete type to a trait object it implements when
//! the [`Upcast`] relation is declared with [`upcast!`]. Both handles share
//! the object's single counter.
//!
//! ```
//! use sentinel_rc::{shareable, upcast, Ref, RefCount, RefCounted};
//!
//! trait Shape: RefCounted {
//!     fn area(&self) -> f64;
//! }
//!
//! #[derive(Default)]
//! struct Square {
//!     rc: RefCount,
//!     side: f64,
//! }
//!
//! impl Shape for Square {
//!     fn area(&self) -> f64 {
//!         self.side * self.side
//!     }
//! }
//!
//! shareable!(Square, rc);
//! shareable!(dyn Shape => Square);
//! upcast!(Square => dyn Shape);
//!
//! let square = Ref::new(Square { rc: RefCount::new(), side: 2.0 });
//! let shape: Ref<dyn Shape> = square.upcast();
//! assert!(shape == square);
//! assert_eq!(Ref::count(&shape), 2);
//! assert_eq!(shape.area(), 4.0);
//! ```
//!
//! ## Contract violations
//!
//! Misuse is not reported through `Result`. Dereferencing a void handle,
//! binding a handle to a null pointer or freeing an object that is still
//! referenced logs the failure and panics with a [`Violation`] message.
//!
//! ## Why not use sentinel-rc?
//!
//! - It is not thread safe: handles are neither `Send` nor `Sync`
//! - It does not provide weak references, and cycles leak
//! - Shareable types must embed a counter and be allocated in a `Box`
//!
//! The crate itself is `no_std` with `alloc`, but the sentinels created by
//! [`shareable!`] live in `std` thread locals.
//!
//! ### Features
//!
//! By default the counter is 32 bits wide on 64-bit systems and `usize` wide
//! elsewhere, with the `usize-for-small-platforms` feature enabled. Disabling
//! default features uses half-word counters on 32-bit and 16-bit platforms.

#![warn(missing_docs, missing_debug_implementations)]
extern crate alloc;
#[cfg(test)]
extern crate std;

// Counter definition

#[cfg(target_pointer_width = "64")]
pub(crate) use u32 as ucount;

#[cfg(all(
    not(target_pointer_width = "64"),
    feature = "usize-for-small-platforms"
))]
pub(crate) use usize as ucount;

#[cfg(all(
    target_pointer_width = "32",
    not(feature = "usize-for-small-platforms")
))]
pub(crate) use u16 as ucount;

#[cfg(all(
    target_pointer_width = "16",
    not(feature = "usize-for-small-platforms")
))]
pub(crate) use u8 as ucount;

#[cfg(all(target_pointer_width = "8", not(feature = "usize-for-small-platforms")))]
pub(crate) use usize as ucount;

#[macro_use]
mod contract;
mod handle;
mod shareable;

pub use contract::Violation;
pub use handle::*;
pub use shareable::*;
