#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, doc(cfg_hide(docsrs, loom)))]
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs, missing_debug_implementations)]

#[cfg(any(feature = "alloc", test))]
extern crate alloc;

pub(crate) mod loom;

#[macro_use]
pub(crate) mod util;

pub mod cancel;
pub mod mutex;
#[cfg_attr(loom, allow(dead_code))]
pub(crate) mod spin;
pub(crate) mod wait_list;

#[doc(inline)]
pub use self::cancel::{CancelSignal, Cancellable};
#[doc(inline)]
pub use self::mutex::{AsyncMutex, ReleaseToken};
#[cfg(feature = "alloc")]
#[doc(inline)]
pub use self::mutex::OwnedReleaseToken;

/// An error indicating that acquiring an [`AsyncMutex`] (or running any other
/// future under a [`CancelSignal`]) was abandoned because the signal fired
/// first.
///
/// This error is returned by [`AsyncMutex::acquire_or_cancel`] and
/// [`CancelSignal::run_until_cancelled`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("the wait was cancelled before it completed")]
pub struct Cancelled(());

impl Cancelled {
    pub(crate) const fn new() -> Self {
        Self(())
    }
}
