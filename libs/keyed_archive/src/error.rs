//! Error handling types.
//!
//! Every failure while archiving or unarchiving ends up as an [`Error`]. Its
//! [`kind`](Error::kind) sorts it into one of four broad categories, which is
//! usually all a caller needs to branch on.

use std::any::Any;
use std::cell::{BorrowError, BorrowMutError};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::class::ClassId;
use crate::wire::FormatError;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An object violated the secure coding discipline.
    EncodingViolation,
    /// The archive contained a class the caller did not permit.
    DisallowedClass,
    /// The archive data was not valid.
    MalformedBuffer,
    /// Any other failure raised by an object or the object graph.
    UnderlyingFault,
}

/// Potential errors to encounter when archiving or unarchiving.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Secure coding was required but a class doesn't support it.
    #[error("class `{class}` does not support secure coding")]
    InsecureClass { class: ClassId },
    /// Secure coding was required but an object field was coded without
    /// declaring the classes it may hold.
    #[error("field `{key}` of class `{class}` does not declare which classes it may hold")]
    UndeclaredField { class: ClassId, key: String },
    /// An object field held an object of a class it didn't declare.
    #[error("field `{key}` of class `{class}` holds a `{found}`, which it does not declare")]
    UndeclaredClass {
        class: ClassId,
        key: String,
        found: ClassId,
    },
    /// The graph was too large to archive within the configured limits.
    #[error("graph exceeds the archive limits: {0}")]
    ExceedsLimits(FormatError),

    /// The archive contained an object whose class isn't allow-listed.
    #[error("class `{0}` is not allowed")]
    DisallowedClass(ClassId),
    /// An object field referenced an object of a class the field doesn't
    /// accept.
    #[error("field `{key}` of class `{class}` may not decode into a `{found}`")]
    FieldClassMismatch {
        class: ClassId,
        key: String,
        found: ClassId,
    },
    /// The root object wasn't of the requested class.
    #[error("root object is a `{found}`, expected a `{expected}`")]
    UnexpectedRoot { expected: ClassId, found: ClassId },

    /// The archive data didn't follow the container layout.
    #[error("malformed archive: {0}")]
    Malformed(#[from] FormatError),
    /// An object requested a field that isn't present in the archive.
    #[error("class `{class}` has no field `{key}`")]
    MissingField { class: ClassId, key: String },
    /// An object requested a field with a different type than was archived.
    #[error("field `{key}` of class `{class}` is {found}, expected {expected}")]
    FieldType {
        class: ClassId,
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The archive contained a class that isn't registered.
    #[error("class `{0}` is not registered")]
    UnknownClass(ClassId),
    /// An object in the graph was already mutably borrowed.
    #[error(transparent)]
    Borrow(#[from] BorrowError),
    /// An object in the graph was already borrowed.
    #[error(transparent)]
    BorrowMut(#[from] BorrowMutError),
    /// An object panicked while being coded.
    #[error("class `{class}` panicked: {message}")]
    Panicked { class: ClassId, message: String },
    /// Another reason provided by the object implementation.
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Creates an error with a custom message.
    ///
    /// Use this to fail archiving or unarchiving from within an object's
    /// [`Archivable`](crate::Archivable) implementation.
    pub fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }

    /// Gets the broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InsecureClass { .. }
            | Self::UndeclaredField { .. }
            | Self::UndeclaredClass { .. }
            | Self::ExceedsLimits(_) => ErrorKind::EncodingViolation,
            Self::DisallowedClass(_) | Self::FieldClassMismatch { .. } | Self::UnexpectedRoot { .. } => {
                ErrorKind::DisallowedClass
            },
            Self::Malformed(_) | Self::MissingField { .. } | Self::FieldType { .. } => {
                ErrorKind::MalformedBuffer
            },
            Self::UnknownClass(_)
            | Self::Borrow(_)
            | Self::BorrowMut(_)
            | Self::Panicked { .. }
            | Self::Custom(_) => ErrorKind::UnderlyingFault,
        }
    }

    /// Gets the class the error is about, if there is one.
    ///
    /// For errors concerning an object field, this is the class holding the
    /// field. Class mismatches instead report the class that was found, that
    /// is, the class of the field's value or of the root object.
    pub fn class(&self) -> Option<&ClassId> {
        match self {
            Self::InsecureClass { class }
            | Self::UndeclaredField { class, .. }
            | Self::MissingField { class, .. }
            | Self::FieldType { class, .. }
            | Self::Panicked { class, .. } => Some(class),
            Self::UndeclaredClass { found, .. }
            | Self::FieldClassMismatch { found, .. }
            | Self::UnexpectedRoot { found, .. } => Some(found),
            Self::DisallowedClass(class) | Self::UnknownClass(class) => Some(class),
            Self::ExceedsLimits(_)
            | Self::Malformed(_)
            | Self::Borrow(_)
            | Self::BorrowMut(_)
            | Self::Custom(_) => None,
        }
    }
}

/// Runs an object's coding function, turning panics into [`Error::Panicked`].
pub(crate) fn catch_fault<T>(class: &ClassId, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(res) => res,
        Err(payload) => {
            let message = panic_message(&*payload);
            log::error!("Class `{class}` panicked while coding: {message}");
            Err(Error::Panicked {
                class: class.clone(),
                message,
            })
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
