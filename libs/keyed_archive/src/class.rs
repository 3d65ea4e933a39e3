//! Class identifiers, allow-lists, and the registry of decodable classes.

use std::borrow::{Borrow, Cow};
use std::collections::{HashMap, HashSet};
use std::{fmt, mem};

use crate::error::Result;
use crate::object::{ArchiveClass, ObjectRef};

/// Stable name of a class that may appear in an archive.
///
/// This is what gets written into the archive, so it must not change between
/// the program writing an archive and the one reading it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(Cow<'static, str>);

impl ClassId {
    /// Stands in for the class of an object whose
    /// [`class_id`](crate::Archivable::class_id) failed.
    pub(crate) const UNNAMED: Self = Self::new("<unnamed>");

    /// Creates a class identifier from a static name.
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Gets the class identifier of `T`.
    pub const fn of<T: ArchiveClass>() -> Self {
        T::CLASS
    }

    /// Gets the class name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for ClassId {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ClassId {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl Borrow<str> for ClassId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for ClassId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of classes an [`Unarchiver`](crate::de::Unarchiver) may instantiate.
///
/// When secure coding is required, every object in an archive must be of a
/// class in this set. Being registered in the [`ClassRegistry`] isn't enough.
///
/// # Example
///
/// ```
/// # use keyed_archive::{AllowList, ClassId};
/// let list = AllowList::new()
///     .with_class("Person")
///     .with_class(ClassId::new("Address"));
///
/// assert!(list.contains("Person"));
/// assert!(!list.contains("Invoice"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    classes: HashSet<ClassId>,
}

impl AllowList {
    /// Creates an empty allow-list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the class of `T`.
    #[must_use]
    pub fn with<T: ArchiveClass>(self) -> Self {
        self.with_class(T::CLASS)
    }

    /// Adds a class by its identifier.
    #[must_use]
    pub fn with_class(mut self, class: impl Into<ClassId>) -> Self {
        self.insert(class);
        self
    }

    /// Adds a class by its identifier, returning whether it was newly added.
    pub fn insert(&mut self, class: impl Into<ClassId>) -> bool {
        self.classes.insert(class.into())
    }

    /// Whether the class is allowed.
    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    /// Whether no class is allowed.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// The number of allowed classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Iterates the allowed classes in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassId> {
        self.classes.iter()
    }
}

impl<C: Into<ClassId>> FromIterator<C> for AllowList {
    fn from_iter<T: IntoIterator<Item = C>>(iter: T) -> Self {
        Self {
            classes: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<C: Into<ClassId>> Extend<C> for AllowList {
    fn extend<T: IntoIterator<Item = C>>(&mut self, iter: T) {
        self.classes.extend(iter.into_iter().map(Into::into));
    }
}

impl<'a> IntoIterator for &'a AllowList {
    type Item = &'a ClassId;
    type IntoIter = std::collections::hash_set::Iter<'a, ClassId>;

    fn into_iter(self) -> Self::IntoIter {
        self.classes.iter()
    }
}

/// Allocates and clears instances of a registered class.
#[derive(Debug, Clone, Copy)]
struct Factory {
    allocate: fn() -> ObjectRef,
    clear: fn(&ObjectRef) -> Result<()>,
}

impl Factory {
    fn of<T: ArchiveClass>() -> Self {
        Self {
            allocate: allocate::<T>,
            clear: clear::<T>,
        }
    }
}

fn allocate<T: ArchiveClass>() -> ObjectRef {
    ObjectRef::new(T::default())
}

fn clear<T: ArchiveClass>(object: &ObjectRef) -> Result<()> {
    if let Some(rc) = object.downcast::<T>() {
        // the old value is dropped after the borrow ends
        let old = mem::take(&mut *rc.try_borrow_mut()?);
        drop(old);
    }

    Ok(())
}

/// The classes an [`Unarchiver`](crate::de::Unarchiver) knows how to
/// instantiate.
///
/// This is the runtime's view of decodable classes. Which of them an archive
/// may actually contain is decided by the [`AllowList`].
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    factories: HashMap<ClassId, Factory>,
}

impl ClassRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T`.
    #[must_use]
    pub fn with<T: ArchiveClass>(mut self) -> Self {
        self.register::<T>();
        self
    }

    /// Registers `T`, replacing any factory previously registered under the
    /// same class identifier.
    pub fn register<T: ArchiveClass>(&mut self) -> &mut Self {
        if self.factories.insert(T::CLASS, Factory::of::<T>()).is_some() {
            log::warn!("Class `{}` was registered twice.", T::CLASS);
        }

        self
    }

    /// Whether a class is registered.
    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Creates an allow-list containing every registered class.
    pub fn allow_list(&self) -> AllowList {
        self.factories.keys().cloned().collect()
    }

    /// Allocates a blank instance of a class.
    pub(crate) fn instantiate(&self, class: &str) -> Option<ObjectRef> {
        self.factories.get(class).map(|factory| (factory.allocate)())
    }

    /// Resets an instance of a class to a blank one, dropping the references
    /// it held.
    pub(crate) fn clear(&self, class: &str, object: &ObjectRef) -> Result<()> {
        match self.factories.get(class) {
            Some(factory) => (factory.clear)(object),
            None => Ok(()),
        }
    }
}
