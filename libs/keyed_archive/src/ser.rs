//! Archiving object graphs into bytes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::class::ClassId;
use crate::error::{Error, Result, catch_fault};
use crate::limits::ArchiveLimits;
use crate::object::{ArchiveClass, ObjectRef};
use crate::wire::{self, FormatError, RawArchive, RawObject, Uid, Value};

/// Archives object graphs.
///
/// The graph is walked breadth-first from the root. Every distinct object is
/// archived exactly once, so shared references and cycles survive the round
/// trip. The graph is only ever borrowed immutably.
///
/// The same [`ArchiveLimits`] as for unarchiving apply, so that an archive
/// written with some limits can be read back with them.
#[derive(Debug, Default, Clone, Copy)]
pub struct Archiver {
    requires_secure_coding: bool,
    limits: ArchiveLimits,
}

impl Archiver {
    /// Creates an archiver that does not require secure coding and uses the
    /// default limits.
    pub const fn new() -> Self {
        Self {
            requires_secure_coding: false,
            limits: ArchiveLimits::DEFAULT,
        }
    }

    /// Sets whether secure coding is required.
    #[must_use]
    pub const fn requires_secure_coding(mut self, requires_secure_coding: bool) -> Self {
        self.requires_secure_coding = requires_secure_coding;
        self
    }

    /// Sets the limits the archive must stay within.
    #[must_use]
    pub const fn limits(mut self, limits: ArchiveLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Archives the graph reachable from `root`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if an object violates secure coding, the archive would
    /// exceed the limits, an object's code fails or panics, or an object is
    /// mutably borrowed while archiving.
    pub fn archive(&self, root: &ObjectRef) -> Result<Vec<u8>> {
        let mut walk = Walk::new(self.requires_secure_coding, self.limits);
        walk.intern(root)?;

        // `seen` grows while encoding as new objects are discovered
        let mut next = 0;
        while let Some(object) = walk.seen.get(next).cloned() {
            let raw = walk.encode_object(&object)?;
            walk.objects.push(raw);
            next += 1;
        }

        let archive = RawArchive {
            classes: walk.classes,
            objects: walk.objects,
            root: 0,
        };

        let buf = wire::encode(&archive);
        if buf.len() > self.limits.max_buffer_len {
            return Err(Error::ExceedsLimits(FormatError::TooLarge {
                len: buf.len(),
                max: self.limits.max_buffer_len,
            }));
        }

        log::debug!(
            "Archived {} objects of {} classes into {} bytes.",
            archive.objects.len(),
            archive.classes.len(),
            buf.len()
        );

        Ok(buf)
    }
}

/// State of a single graph walk.
#[derive(Debug)]
struct Walk {
    secure: bool,
    limits: ArchiveLimits,
    // indexed by uid. holding the references also keeps the addresses unique.
    seen: Vec<ObjectRef>,
    uids: HashMap<*const (), Uid>,
    classes: Vec<ClassId>,
    class_index: HashMap<ClassId, usize>,
    objects: Vec<RawObject>,
}

impl Walk {
    fn new(secure: bool, limits: ArchiveLimits) -> Self {
        Self {
            secure,
            limits,
            seen: Vec::new(),
            uids: HashMap::new(),
            classes: Vec::new(),
            class_index: HashMap::new(),
            objects: Vec::new(),
        }
    }

    /// Gets the uid of an object, queuing it for encoding if it's new.
    fn intern(&mut self, object: &ObjectRef) -> Result<Uid> {
        if let Some(&uid) = self.uids.get(&object.addr()) {
            return Ok(uid);
        }

        let uid = self.seen.len();
        check_limit("object", uid + 1, self.limits.max_objects)?;
        self.seen.push(object.clone());
        self.uids.insert(object.addr(), uid);
        Ok(uid)
    }

    fn intern_class(&mut self, class: ClassId) -> Result<usize> {
        if let Some(&index) = self.class_index.get(&class) {
            return Ok(index);
        }

        let index = self.classes.len();
        check_limit("class", index + 1, self.limits.max_classes)?;
        self.classes.push(class.clone());
        self.class_index.insert(class, index);
        Ok(index)
    }

    fn encode_object(&mut self, object: &ObjectRef) -> Result<RawObject> {
        let node = object.try_borrow()?;
        let class = catch_fault(&ClassId::UNNAMED, || Ok(node.class_id()))?;
        if self.secure && !catch_fault(&class, || Ok(node.supports_secure_coding()))? {
            return Err(Error::InsecureClass { class });
        }

        let mut encoder = Encoder {
            walk: self,
            class: &class,
            fields: Vec::new(),
        };

        catch_fault(&class, || node.encode_with(&mut encoder))?;

        let fields = encoder.fields;
        check_limit("field", fields.len(), self.limits.max_fields)?;
        Ok(RawObject {
            class: self.intern_class(class)?,
            fields,
        })
    }
}

fn check_limit(what: &'static str, count: usize, max: usize) -> Result<()> {
    if count > max {
        return Err(Error::ExceedsLimits(FormatError::LimitExceeded {
            what,
            count,
            max,
        }));
    }

    Ok(())
}

/// Writes the fields of a single object.
///
/// Passed to [`Archivable::encode_with`](crate::Archivable::encode_with).
/// Writing the same key twice replaces the earlier value.
#[derive(Debug)]
pub struct Encoder<'a> {
    walk: &'a mut Walk,
    class: &'a ClassId,
    fields: Vec<(String, Value)>,
}

impl Encoder<'_> {
    /// Whether the archive requires secure coding.
    pub fn requires_secure_coding(&self) -> bool {
        self.walk.secure
    }

    /// The class of the object being encoded.
    pub fn class(&self) -> &ClassId {
        self.class
    }

    fn put(&mut self, key: &str, value: Value) {
        if let Some((_, slot)) = self.fields.iter_mut().find(|(k, _)| k == key) {
            log::warn!(
                "Field `{key}` of class `{}` was encoded twice; keeping the later value.",
                self.class
            );
            *slot = value;
        } else {
            self.fields.push((key.to_owned(), value));
        }
    }

    pub fn encode_bool(&mut self, key: &str, value: bool) {
        self.put(key, Value::Bool(value));
    }

    pub fn encode_i64(&mut self, key: &str, value: i64) {
        self.put(key, Value::Int(value));
    }

    pub fn encode_f64(&mut self, key: &str, value: f64) {
        self.put(key, Value::Float(value));
    }

    pub fn encode_str(&mut self, key: &str, value: &str) {
        self.put(key, Value::Str(value.to_owned()));
    }

    pub fn encode_bytes(&mut self, key: &str, value: &[u8]) {
        self.put(key, Value::Bytes(value.to_vec()));
    }

    /// Encodes a field that may hold an object of any class.
    ///
    /// # Errors
    ///
    /// Returns `Err` if secure coding is required, since the field doesn't
    /// declare the classes it may hold.
    pub fn encode_object(&mut self, key: &str, object: Option<&ObjectRef>) -> Result<()> {
        if self.walk.secure {
            return Err(Error::UndeclaredField {
                class: self.class.clone(),
                key: key.to_owned(),
            });
        }

        let value = self.reference(object)?;
        self.put(key, value);
        Ok(())
    }

    /// Encodes a field that may hold an object of one of `classes`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if secure coding is required and the object's class is
    /// not one of `classes`.
    pub fn encode_object_of_classes(
        &mut self,
        key: &str,
        object: Option<&ObjectRef>,
        classes: &[ClassId],
    ) -> Result<()> {
        if let Some(object) = object {
            self.check_declared(key, object, classes)?;
        }

        let value = self.reference(object)?;
        self.put(key, value);
        Ok(())
    }

    /// Encodes a field that holds a `T`.
    ///
    /// # Errors
    ///
    /// Returns `Err` under the same conditions as
    /// [`encode_object_of_classes`](Self::encode_object_of_classes).
    pub fn encode_object_as<T: ArchiveClass>(
        &mut self,
        key: &str,
        object: Option<&Rc<RefCell<T>>>,
    ) -> Result<()> {
        let object = object.map(|rc| ObjectRef::from_rc(Rc::clone(rc)));
        self.encode_object_of_classes(key, object.as_ref(), &[T::CLASS])
    }

    /// Encodes a field holding a list of objects of one of `classes`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if secure coding is required and any object's class is
    /// not one of `classes`.
    pub fn encode_array_of_classes(
        &mut self,
        key: &str,
        objects: &[ObjectRef],
        classes: &[ClassId],
    ) -> Result<()> {
        let mut items = Vec::with_capacity(objects.len());
        for object in objects {
            self.check_declared(key, object, classes)?;
            items.push(Value::Ref(self.walk.intern(object)?));
        }

        self.put(key, Value::Array(items));
        Ok(())
    }

    /// Encodes a field holding a list of `T`.
    ///
    /// # Errors
    ///
    /// Returns `Err` under the same conditions as
    /// [`encode_array_of_classes`](Self::encode_array_of_classes).
    pub fn encode_array_as<T: ArchiveClass>(
        &mut self,
        key: &str,
        objects: &[Rc<RefCell<T>>],
    ) -> Result<()> {
        let objects: Vec<_> = objects
            .iter()
            .map(|rc| ObjectRef::from_rc(Rc::clone(rc)))
            .collect();
        self.encode_array_of_classes(key, &objects, &[T::CLASS])
    }

    fn reference(&mut self, object: Option<&ObjectRef>) -> Result<Value> {
        Ok(match object {
            Some(object) => Value::Ref(self.walk.intern(object)?),
            None => Value::Null,
        })
    }

    fn check_declared(&self, key: &str, object: &ObjectRef, classes: &[ClassId]) -> Result<()> {
        if !self.walk.secure {
            return Ok(());
        }

        let found = catch_fault(&ClassId::UNNAMED, || object.class_id())?;
        if classes.contains(&found) {
            Ok(())
        } else {
            Err(Error::UndeclaredClass {
                class: self.class.clone(),
                key: key.to_owned(),
                found,
            })
        }
    }
}
