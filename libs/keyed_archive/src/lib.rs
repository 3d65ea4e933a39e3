//! # Keyed object graph archives
//!
//! Archives graphs of shared, possibly cyclic objects into bytes and restores
//! them again, reporting every failure as an [`Error`] instead of panicking.
//!
//! Objects take part by implementing [`Archivable`], writing and reading
//! their own fields by key. Types that should be restorable also implement
//! [`ArchiveClass`] and are registered in a [`ClassRegistry`].
//!
//! ## Secure coding
//!
//! When secure coding is required:
//!
//! - every archived or unarchived object must [support secure
//!   coding](Archivable::supports_secure_coding),
//! - every field holding another object must declare the classes it may hold,
//! - every object in an archive must be of a class in the caller's
//!   [`AllowList`], no matter how deeply nested it is.
//!
//! Without secure coding, a non-empty allow-list is still enforced. An empty
//! one places no restriction on the registered classes.
//!
//! ## Identity
//!
//! Objects are held as [`ObjectRef`] or `Rc<RefCell<T>>`. An object referenced
//! from multiple places is archived once and restored as a single shared
//! instance. Cycles are restored as cycles. Neither archiving nor unarchiving
//! recurses into the graph, so the graph depth is not limited by the stack.
//!
//! Restored cycles are `Rc` cycles and leak unless the caller breaks them. When
//! unarchiving fails, the objects allocated for it are reset before returning,
//! so nothing from a failed call stays alive.
//!
//! ## Format
//!
//! The byte layout is an implementation detail and only guarantees that data
//! written by this version can be read by it. It is versioned so that other
//! versions reject it rather than misread it.

pub mod de;
pub mod ser;

mod class;
mod error;
mod limits;
mod object;
mod wire;


pub use class::{AllowList, ClassId, ClassRegistry};
pub use de::{Decoder, Unarchiver};
pub use error::{Error, ErrorKind, Result};
pub use limits::ArchiveLimits;
pub use object::{ArchiveClass, Archivable, ObjectRef};
pub use ser::{Archiver, Encoder};
pub use wire::FormatError;

/// Archives the object graph reachable from `root`.
///
/// This is a shorthand for [`Archiver::archive`].
///
/// # Errors
///
/// Returns `Err` if `requires_secure_coding` is set and an object violates
/// secure coding, if the archive would exceed the default [`ArchiveLimits`],
/// or if an object fails or panics while encoding.
pub fn archive(root: &ObjectRef, requires_secure_coding: bool) -> Result<Vec<u8>> {
    Archiver::new()
        .requires_secure_coding(requires_secure_coding)
        .archive(root)
}

/// Unarchives an object graph from `data`, returning its root.
///
/// Classes are instantiated from `registry`, but only if `allow_list` permits
/// them. This is a shorthand for [`Unarchiver::unarchive`].
///
/// # Errors
///
/// Returns `Err` if the data is malformed, contains a class that isn't
/// allowed or registered, violates secure coding, or if an object fails or
/// panics while decoding.
pub fn unarchive(
    data: &[u8],
    requires_secure_coding: bool,
    registry: &ClassRegistry,
    allow_list: &AllowList,
) -> Result<ObjectRef> {
    Unarchiver::new(registry)
        .requires_secure_coding(requires_secure_coding)
        .allow_list(allow_list)
        .unarchive(data)
}

/// Unarchives an object graph from `data` whose root is a `T`.
///
/// This is a shorthand for [`Unarchiver::unarchive_as`].
///
/// # Errors
///
/// Returns `Err` under the same conditions as [`unarchive`], or if the root
/// is not a `T`.
pub fn unarchive_as<T: ArchiveClass>(
    data: &[u8],
    requires_secure_coding: bool,
    registry: &ClassRegistry,
    allow_list: &AllowList,
) -> Result<std::rc::Rc<std::cell::RefCell<T>>> {
    Unarchiver::new(registry)
        .requires_secure_coding(requires_secure_coding)
        .allow_list(allow_list)
        .unarchive_as(data)
}
