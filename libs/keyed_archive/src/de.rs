//! Unarchiving bytes back into object graphs.

use std::cell::RefCell;
use std::rc::Rc;

use crate::class::{AllowList, ClassId, ClassRegistry};
use crate::error::{Error, Result, catch_fault};
use crate::limits::ArchiveLimits;
use crate::object::{ArchiveClass, ObjectRef};
use crate::wire::{self, RawArchive, Uid, Value};

/// Unarchives object graphs.
///
/// Unarchiving happens in phases, none of which recurse:
///
/// 1. The archive is parsed and validated.
/// 2. The class of every object is checked against the allow-list.
/// 3. Every object is allocated through the [`ClassRegistry`].
/// 4. Every object is restored, in reverse archive order, so objects are
///    usually restored before the objects referencing them.
///
/// Nothing is instantiated unless every class in the archive is allowed. If
/// restoring any object fails, every object allocated so far is reset to a
/// blank instance, so no partially restored cycles outlive the call.
///
/// # Allow-list policy
///
/// The allow-list is enforced when secure coding is required or when it isn't
/// empty. Without secure coding, an empty or missing allow-list means any
/// registered class may be instantiated.
#[derive(Debug, Clone, Copy)]
pub struct Unarchiver<'a> {
    registry: &'a ClassRegistry,
    allow_list: Option<&'a AllowList>,
    requires_secure_coding: bool,
    limits: ArchiveLimits,
}

impl<'a> Unarchiver<'a> {
    /// Creates an unarchiver that instantiates classes from `registry`.
    ///
    /// By default, secure coding is not required and no allow-list is set.
    pub fn new(registry: &'a ClassRegistry) -> Self {
        Self {
            registry,
            allow_list: None,
            requires_secure_coding: false,
            limits: ArchiveLimits::DEFAULT,
        }
    }

    /// Sets whether secure coding is required.
    #[must_use]
    pub fn requires_secure_coding(mut self, requires_secure_coding: bool) -> Self {
        self.requires_secure_coding = requires_secure_coding;
        self
    }

    /// Sets the classes an archive may contain.
    #[must_use]
    pub fn allow_list(mut self, allow_list: &'a AllowList) -> Self {
        self.allow_list = Some(allow_list);
        self
    }

    /// Sets the limits on the archive size.
    #[must_use]
    pub fn limits(mut self, limits: ArchiveLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Unarchives an object graph, returning its root.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the data is malformed, the archive contains a class
    /// that is not allowed or not registered, an object violates secure
    /// coding, or an object's [`init_with`](crate::Archivable::init_with)
    /// fails or panics.
    pub fn unarchive(&self, data: &[u8]) -> Result<ObjectRef> {
        self.unarchive_inner(data, None)
    }

    /// Unarchives an object graph whose root is a `T`.
    ///
    /// # Errors
    ///
    /// Returns `Err` under the same conditions as
    /// [`unarchive`](Self::unarchive), or if the root is not a `T`. The root
    /// class is checked before anything is instantiated.
    pub fn unarchive_as<T: ArchiveClass>(&self, data: &[u8]) -> Result<Rc<RefCell<T>>> {
        let root = self.unarchive_inner(data, Some(&T::CLASS))?;

        // only fails if another type is registered under the class of `T`
        root.downcast::<T>().ok_or(Error::UnexpectedRoot {
            expected: T::CLASS,
            found: T::CLASS,
        })
    }

    fn unarchive_inner(&self, data: &[u8], expected_root: Option<&ClassId>) -> Result<ObjectRef> {
        let archive = wire::decode(data, &self.limits)?;

        let root_class = archive.class_of(archive.root);
        if let Some(expected) = expected_root
            && root_class != expected
        {
            return Err(Error::UnexpectedRoot {
                expected: expected.clone(),
                found: root_class.clone(),
            });
        }

        // every object is checked before anything is instantiated
        for uid in 0..archive.objects.len() {
            self.check_allowed(archive.class_of(uid))?;
        }

        let objects = (0..archive.objects.len())
            .map(|uid| self.instantiate(archive.class_of(uid)))
            .collect::<Result<Vec<_>>>()?;

        for uid in (0..objects.len()).rev() {
            if let Err(err) = self.restore(&archive, &objects, uid) {
                self.discard(&archive, &objects);
                return Err(err);
            }
        }

        log::debug!(
            "Unarchived {} objects of {} classes from {} bytes.",
            objects.len(),
            archive.classes.len(),
            data.len()
        );

        Ok(objects[archive.root].clone())
    }

    fn check_allowed(&self, class: &ClassId) -> Result<()> {
        let allowed = match self.allow_list {
            Some(list) if list.contains(class.as_str()) => true,
            Some(list) => list.is_empty() && !self.requires_secure_coding,
            None => !self.requires_secure_coding,
        };

        if allowed {
            Ok(())
        } else {
            Err(Error::DisallowedClass(class.clone()))
        }
    }

    fn instantiate(&self, class: &ClassId) -> Result<ObjectRef> {
        let object = catch_fault(class, || {
            self.registry
                .instantiate(class.as_str())
                .ok_or_else(|| Error::UnknownClass(class.clone()))
        })?;

        if self.requires_secure_coding
            && !catch_fault(class, || Ok(object.try_borrow()?.supports_secure_coding()))?
        {
            return Err(Error::InsecureClass {
                class: class.clone(),
            });
        }

        Ok(object)
    }

    fn restore(&self, archive: &RawArchive, objects: &[ObjectRef], uid: Uid) -> Result<()> {
        let class = archive.class_of(uid);
        let mut node = objects[uid].try_borrow_mut()?;
        let mut decoder = Decoder {
            archive,
            objects,
            fields: &archive.objects[uid].fields,
            class,
            secure: self.requires_secure_coding,
        };

        catch_fault(class, || node.init_with(&mut decoder))
    }

    /// Resets every object after a failed restore, breaking any cycles
    /// between the objects restored so far.
    fn discard(&self, archive: &RawArchive, objects: &[ObjectRef]) {
        for (uid, object) in objects.iter().enumerate() {
            let class = archive.class_of(uid);
            if let Err(err) = catch_fault(class, || self.registry.clear(class.as_str(), object)) {
                log::warn!("Could not reset `{class}` after a failed unarchive: {err}");
            }
        }
    }
}

/// Reads the fields of a single object.
///
/// Passed to [`Archivable::init_with`](crate::Archivable::init_with).
#[derive(Debug)]
pub struct Decoder<'a> {
    archive: &'a RawArchive,
    objects: &'a [ObjectRef],
    fields: &'a [(String, Value)],
    class: &'a ClassId,
    secure: bool,
}

impl Decoder<'_> {
    /// Whether the archive requires secure coding.
    pub fn requires_secure_coding(&self) -> bool {
        self.secure
    }

    /// The class of the object being decoded.
    pub fn class(&self) -> &ClassId {
        self.class
    }

    /// Whether the archived object has a field with the given key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    fn field(&self, key: &str) -> Result<&Value> {
        self.fields
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
            .ok_or_else(|| Error::MissingField {
                class: self.class.clone(),
                key: key.to_owned(),
            })
    }

    fn mismatch(&self, key: &str, expected: &'static str, found: &Value) -> Error {
        Error::FieldType {
            class: self.class.clone(),
            key: key.to_owned(),
            expected,
            found: found.type_name(),
        }
    }

    /// # Errors
    ///
    /// Returns `Err` if the field is missing or not a bool.
    pub fn decode_bool(&self, key: &str) -> Result<bool> {
        match self.field(key)? {
            Value::Bool(b) => Ok(*b),
            other => Err(self.mismatch(key, "a bool", other)),
        }
    }

    /// # Errors
    ///
    /// Returns `Err` if the field is missing or not an integer.
    pub fn decode_i64(&self, key: &str) -> Result<i64> {
        match self.field(key)? {
            Value::Int(i) => Ok(*i),
            other => Err(self.mismatch(key, "an integer", other)),
        }
    }

    /// # Errors
    ///
    /// Returns `Err` if the field is missing or not a float.
    pub fn decode_f64(&self, key: &str) -> Result<f64> {
        match self.field(key)? {
            Value::Float(f) => Ok(*f),
            other => Err(self.mismatch(key, "a float", other)),
        }
    }

    /// # Errors
    ///
    /// Returns `Err` if the field is missing or not a string.
    pub fn decode_str(&self, key: &str) -> Result<&str> {
        match self.field(key)? {
            Value::Str(s) => Ok(s),
            other => Err(self.mismatch(key, "a string", other)),
        }
    }

    /// # Errors
    ///
    /// Returns `Err` if the field is missing or not bytes.
    pub fn decode_bytes(&self, key: &str) -> Result<&[u8]> {
        match self.field(key)? {
            Value::Bytes(b) => Ok(b),
            other => Err(self.mismatch(key, "bytes", other)),
        }
    }

    /// Decodes a field that may hold an object of any class.
    ///
    /// The referenced object is still subject to the allow-list.
    ///
    /// # Errors
    ///
    /// Returns `Err` if secure coding is required, since the field doesn't
    /// declare the classes it may hold, or if the field is missing or not an
    /// object reference.
    pub fn decode_object(&self, key: &str) -> Result<Option<ObjectRef>> {
        if self.secure {
            return Err(Error::UndeclaredField {
                class: self.class.clone(),
                key: key.to_owned(),
            });
        }

        let uid = self.resolve(key, self.field(key)?, &[])?;
        Ok(uid.map(|uid| self.objects[uid].clone()))
    }

    /// Decodes a field that may hold an object of one of `classes`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the field is missing or not an object reference, or if
    /// secure coding is required and the referenced object is not one of
    /// `classes`.
    pub fn decode_object_of_classes(
        &self,
        key: &str,
        classes: &[ClassId],
    ) -> Result<Option<ObjectRef>> {
        let uid = self.resolve(key, self.field(key)?, classes)?;
        Ok(uid.map(|uid| self.objects[uid].clone()))
    }

    /// Decodes a field that holds a `T`.
    ///
    /// # Errors
    ///
    /// Returns `Err` under the same conditions as
    /// [`decode_object_of_classes`](Self::decode_object_of_classes), or if the
    /// referenced object is not a `T`.
    pub fn decode_object_as<T: ArchiveClass>(&self, key: &str) -> Result<Option<Rc<RefCell<T>>>> {
        match self.resolve(key, self.field(key)?, &[T::CLASS])? {
            Some(uid) => self.downcast(key, uid).map(Some),
            None => Ok(None),
        }
    }

    /// Decodes a field holding a list of objects of one of `classes`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the field is missing or not a list of object
    /// references, or if secure coding is required and any referenced object
    /// is not one of `classes`.
    pub fn decode_array_of_classes(&self, key: &str, classes: &[ClassId]) -> Result<Vec<ObjectRef>> {
        let uids = self.resolve_array(key, classes)?;
        Ok(uids.into_iter().map(|uid| self.objects[uid].clone()).collect())
    }

    /// Decodes a field holding a list of `T`.
    ///
    /// # Errors
    ///
    /// Returns `Err` under the same conditions as
    /// [`decode_array_of_classes`](Self::decode_array_of_classes), or if any
    /// referenced object is not a `T`.
    pub fn decode_array_as<T: ArchiveClass>(&self, key: &str) -> Result<Vec<Rc<RefCell<T>>>> {
        self.resolve_array(key, &[T::CLASS])?
            .into_iter()
            .map(|uid| self.downcast(key, uid))
            .collect()
    }

    /// Resolves a reference value to its uid. `classes` is only checked under
    /// secure coding.
    fn resolve(&self, key: &str, value: &Value, classes: &[ClassId]) -> Result<Option<Uid>> {
        let uid = match value {
            Value::Null => return Ok(None),
            Value::Ref(uid) => *uid,
            other => return Err(self.mismatch(key, "an object reference", other)),
        };

        let found = self.archive.class_of(uid);
        if self.secure && !classes.contains(found) {
            return Err(self.class_mismatch(key, found));
        }

        Ok(Some(uid))
    }

    fn resolve_array(&self, key: &str, classes: &[ClassId]) -> Result<Vec<Uid>> {
        let items = match self.field(key)? {
            Value::Array(items) => items,
            other => return Err(self.mismatch(key, "an array", other)),
        };

        items
            .iter()
            .map(|item| match self.resolve(key, item, classes)? {
                Some(uid) => Ok(uid),
                None => Err(self.mismatch(key, "an object reference", item)),
            })
            .collect()
    }

    fn downcast<T: ArchiveClass>(&self, key: &str, uid: Uid) -> Result<Rc<RefCell<T>>> {
        self.objects[uid]
            .downcast::<T>()
            .ok_or_else(|| self.class_mismatch(key, self.archive.class_of(uid)))
    }

    fn class_mismatch(&self, key: &str, found: &ClassId) -> Error {
        Error::FieldClassMismatch {
            class: self.class.clone(),
            key: key.to_owned(),
            found: found.clone(),
        }
    }
}
