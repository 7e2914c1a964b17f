//! Duplicate function call suppression.
//!
//! A [`Group`] makes sure that only one execution of a piece of work is in
//! flight for a given key at a time. Callers that ask for the same key while
//! it runs wait for that execution and receive a copy of its result, so a
//! burst of identical requests (a cache miss stampede, a fan-out of the same
//! lookup) costs a single call to the backend.
//!
//! ```
//! use std::io::ErrorKind;
//! use std::thread;
//!
//! use singleflight::Group;
//!
//! let group = Group::<u32, ErrorKind>::new();
//! thread::scope(|s| {
//!     for _ in 0..4 {
//!         s.spawn(|| {
//!             let v = group.work("user:42", || Ok(7));
//!             assert_eq!(v, Ok(7));
//!         });
//!     }
//! });
//! assert_eq!(group.in_flight(), 0);
//! ```
//!
//! Results are only shared while the work is in flight. Once it returns the
//! key is forgotten and the next caller runs the work again; there is no
//! caching, retry or timeout here, callers layer those on top.
//!
//! With the `async` feature (on by default) [`AsyncGroup`] offers the same
//! for futures.

mod call;
mod group;
mod types;

#[cfg(feature = "async")]
mod async_group;

#[cfg(feature = "async")]
pub use async_group::AsyncGroup;
pub use group::Group;
pub use types::Role;
