//! The object model: what it takes for a type to take part in archiving.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::class::ClassId;
use crate::de::Decoder;
use crate::error::Result;
use crate::ser::Encoder;

/// An object that can archive its own fields and restore them again.
///
/// Objects are stored as keyed fields. Plain values are written and read
/// directly. Fields holding other objects either declare the classes they may
/// hold, via the `*_of_classes` and `*_as` methods, or accept any class via
/// [`Encoder::encode_object`] and [`Decoder::decode_object`].
///
/// Under secure coding, only classes that [support secure
/// coding](Self::supports_secure_coding) may be archived or unarchived, and
/// no field may accept any class.
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// use keyed_archive::{ArchiveClass, Archivable, ClassId, Decoder, Encoder, Result};
///
/// #[derive(Default)]
/// struct Person {
///     name: String,
///     friend: Option<Rc<RefCell<Person>>>,
/// }
///
/// impl ArchiveClass for Person {
///     const CLASS: ClassId = ClassId::new("Person");
/// }
///
/// impl Archivable for Person {
///     fn class_id(&self) -> ClassId {
///         Self::CLASS
///     }
///
///     fn supports_secure_coding(&self) -> bool {
///         true
///     }
///
///     fn encode_with(&self, encoder: &mut Encoder<'_>) -> Result<()> {
///         encoder.encode_str("name", &self.name);
///         encoder.encode_object_as("friend", self.friend.as_ref())
///     }
///
///     fn init_with(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
///         self.name = decoder.decode_str("name")?.to_owned();
///         self.friend = decoder.decode_object_as("friend")?;
///         Ok(())
///     }
/// }
/// ```
pub trait Archivable: Any {
    /// The class this object is archived as.
    fn class_id(&self) -> ClassId;

    /// Whether this object may be archived and unarchived when secure coding
    /// is required.
    fn supports_secure_coding(&self) -> bool {
        false
    }

    /// Writes this object's fields.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a field cannot be encoded. Errors returned by the
    /// encoder should be propagated.
    fn encode_with(&self, encoder: &mut Encoder<'_>) -> Result<()>;

    /// Restores this object's fields.
    ///
    /// This is called on a blank instance. Objects referenced by this one are
    /// already allocated but may not have been restored yet, so their
    /// contents should not be relied upon here.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a field is missing or invalid. Errors returned by the
    /// decoder should be propagated.
    fn init_with(&mut self, decoder: &mut Decoder<'_>) -> Result<()>;
}

/// A concrete class that can be registered for unarchiving.
///
/// The [`Default`] implementation provides the blank instance that
/// [`Archivable::init_with`] is called on.
pub trait ArchiveClass: Archivable + Default {
    /// The class identifier written into archives.
    const CLASS: ClassId;
}

/// A shared reference to an object in an object graph.
///
/// Cloning this clones the reference, not the object. Two references are the
/// same object if [`ptr_eq`](Self::ptr_eq) says so, and archiving preserves
/// exactly that identity.
#[derive(Clone)]
pub struct ObjectRef {
    node: Rc<RefCell<dyn Archivable>>,
    // same allocation as `node`, used for downcasting
    any: Rc<dyn Any>,
}

impl ObjectRef {
    /// Moves a value into a new shared object.
    pub fn new<T: Archivable>(value: T) -> Self {
        Self::from_rc(Rc::new(RefCell::new(value)))
    }

    /// Wraps an existing shared object.
    pub fn from_rc<T: Archivable>(rc: Rc<RefCell<T>>) -> Self {
        let node: Rc<RefCell<dyn Archivable>> = Rc::<RefCell<T>>::clone(&rc);
        let any: Rc<dyn Any> = rc;
        Self { node, any }
    }

    /// Gets the typed shared object, if it is a `T`.
    pub fn downcast<T: Archivable>(&self) -> Option<Rc<RefCell<T>>> {
        Rc::clone(&self.any).downcast::<RefCell<T>>().ok()
    }

    /// Whether the object is a `T`.
    pub fn is<T: Archivable>(&self) -> bool {
        self.any.is::<RefCell<T>>()
    }

    /// Whether both references point to the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    /// Immutably borrows the object.
    ///
    /// # Panics
    ///
    /// Panics if the object is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, dyn Archivable> {
        self.node.borrow()
    }

    /// Mutably borrows the object.
    ///
    /// # Panics
    ///
    /// Panics if the object is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, dyn Archivable> {
        self.node.borrow_mut()
    }

    /// Gets the class the object is archived as.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the object is currently mutably borrowed.
    pub fn class_id(&self) -> Result<ClassId> {
        Ok(self.try_borrow()?.class_id())
    }

    pub(crate) fn try_borrow(&self) -> Result<Ref<'_, dyn Archivable>> {
        Ok(self.node.try_borrow()?)
    }

    pub(crate) fn try_borrow_mut(&self) -> Result<RefMut<'_, dyn Archivable>> {
        Ok(self.node.try_borrow_mut()?)
    }

    /// Address of the shared allocation, which identifies the object.
    pub(crate) fn addr(&self) -> *const () {
        Rc::as_ptr(&self.node).cast::<()>()
    }
}

impl<T: Archivable> From<Rc<RefCell<T>>> for ObjectRef {
    fn from(value: Rc<RefCell<T>>) -> Self {
        Self::from_rc(value)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("ObjectRef");
        f.field("addr", &self.addr());
        match self.node.try_borrow() {
            Ok(node) => f.field("class", &node.class_id()),
            Err(_) => f.field("class", &format_args!("<borrowed>")),
        };
        f.finish()
    }
}
