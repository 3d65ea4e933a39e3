#![allow(unused_crate_dependencies)]
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use keyed_archive::{
    AllowList, ArchiveClass, ArchiveLimits, Archivable, Archiver, ClassId, ClassRegistry,
    Decoder, Encoder, ErrorKind, ObjectRef, Result, Unarchiver,
};

const ENTRY_CLASSES: &[ClassId] = &[Folder::CLASS, File::CLASS];

/// A folder whose children are folders and files, each pointing back at it.
#[derive(Default)]
struct Folder {
    name: String,
    parent: Option<Rc<RefCell<Folder>>>,
    children: Vec<ObjectRef>,
}

impl fmt::Debug for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Folder").field("name", &self.name).finish()
    }
}

impl ArchiveClass for Folder {
    const CLASS: ClassId = ClassId::new("Folder");
}

impl Archivable for Folder {
    fn class_id(&self) -> ClassId {
        Self::CLASS
    }

    fn supports_secure_coding(&self) -> bool {
        true
    }

    fn encode_with(&self, encoder: &mut Encoder<'_>) -> Result<()> {
        encoder.encode_str("name", &self.name);
        encoder.encode_object_as("parent", self.parent.as_ref())?;
        encoder.encode_array_of_classes("children", &self.children, ENTRY_CLASSES)
    }

    fn init_with(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        self.name = decoder.decode_str("name")?.to_owned();
        self.parent = decoder.decode_object_as("parent")?;
        self.children = decoder.decode_array_of_classes("children", ENTRY_CLASSES)?;
        Ok(())
    }
}

#[derive(Default)]
struct File {
    name: String,
    contents: Vec<u8>,
    parent: Option<Rc<RefCell<Folder>>>,
}

impl ArchiveClass for File {
    const CLASS: ClassId = ClassId::new("File");
}

impl Archivable for File {
    fn class_id(&self) -> ClassId {
        Self::CLASS
    }

    fn supports_secure_coding(&self) -> bool {
        true
    }

    fn encode_with(&self, encoder: &mut Encoder<'_>) -> Result<()> {
        encoder.encode_str("name", &self.name);
        encoder.encode_bytes("contents", &self.contents);
        encoder.encode_object_as("parent", self.parent.as_ref())
    }

    fn init_with(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        self.name = decoder.decode_str("name")?.to_owned();
        self.contents = decoder.decode_bytes("contents")?.to_vec();
        self.parent = decoder.decode_object_as("parent")?;
        Ok(())
    }
}

fn folder(name: &str, parent: Option<&Rc<RefCell<Folder>>>) -> Rc<RefCell<Folder>> {
    let folder = Rc::new(RefCell::new(Folder {
        name: name.to_owned(),
        parent: parent.map(Rc::clone),
        children: Vec::new(),
    }));

    if let Some(parent) = parent {
        parent
            .borrow_mut()
            .children
            .push(ObjectRef::from_rc(Rc::clone(&folder)));
    }

    folder
}

fn file(name: &str, contents: &[u8], parent: &Rc<RefCell<Folder>>) -> Rc<RefCell<File>> {
    let file = Rc::new(RefCell::new(File {
        name: name.to_owned(),
        contents: contents.to_vec(),
        parent: Some(Rc::clone(parent)),
    }));

    parent
        .borrow_mut()
        .children
        .push(ObjectRef::from_rc(Rc::clone(&file)));
    file
}

/// Builds:
///
/// ```text
/// /
/// ├── etc/
/// │   └── hosts
/// ├── home/
/// │   └── alice/
/// │       └── notes.txt
/// └── readme
/// ```
fn sample_tree() -> Rc<RefCell<Folder>> {
    let root = folder("/", None);
    let etc = folder("etc", Some(&root));
    file("hosts", b"127.0.0.1 localhost", &etc);
    let home = folder("home", Some(&root));
    let alice = folder("alice", Some(&home));
    file("notes.txt", b"buy milk", &alice);
    file("readme", b"", &root);
    root
}

/// Breaks the parent cycles so the tree can be dropped.
fn dismantle(root: &Rc<RefCell<Folder>>) {
    let mut pending = vec![Rc::clone(root)];
    while let Some(folder) = pending.pop() {
        let mut folder = folder.borrow_mut();
        folder.parent = None;
        for child in folder.children.drain(..) {
            if let Some(sub) = child.downcast::<Folder>() {
                pending.push(sub);
            } else if let Some(file) = child.downcast::<File>() {
                file.borrow_mut().parent = None;
            }
        }
    }
}

fn registry() -> ClassRegistry {
    ClassRegistry::new().with::<Folder>().with::<File>()
}

fn child_folder(parent: &Rc<RefCell<Folder>>, index: usize) -> Rc<RefCell<Folder>> {
    parent.borrow().children[index]
        .downcast::<Folder>()
        .expect("child must be a folder")
}

#[test]
fn tree_round_trip() {
    let tree = sample_tree();
    let registry = registry();
    let allow = registry.allow_list();

    let buf = Archiver::new()
        .requires_secure_coding(true)
        .archive(&ObjectRef::from_rc(Rc::clone(&tree)))
        .expect("must archive");
    dismantle(&tree);

    let rev = Unarchiver::new(&registry)
        .requires_secure_coding(true)
        .allow_list(&allow)
        .unarchive_as::<Folder>(&buf)
        .expect("must unarchive");

    assert_eq!(rev.borrow().name, "/", "root name");
    assert!(rev.borrow().parent.is_none(), "root has no parent");
    assert_eq!(rev.borrow().children.len(), 3, "root has three entries");

    let etc = child_folder(&rev, 0);
    let home = child_folder(&rev, 1);
    let alice = child_folder(&home, 0);
    assert_eq!(etc.borrow().name, "etc", "first child");
    assert_eq!(alice.borrow().name, "alice", "nested child");

    let etc_parent = etc.borrow().parent.clone().expect("etc has a parent");
    assert!(Rc::ptr_eq(&etc_parent, &rev), "parent links must point at the root");
    let alice_parent = alice.borrow().parent.clone().expect("alice has a parent");
    assert!(Rc::ptr_eq(&alice_parent, &home), "parent links must point at home");

    let notes = alice.borrow().children[0]
        .downcast::<File>()
        .expect("must be a file");
    assert_eq!(notes.borrow().name, "notes.txt", "file name");
    assert_eq!(notes.borrow().contents, b"buy milk", "file contents");
    let notes_parent = notes.borrow().parent.clone().expect("file has a parent");
    assert!(Rc::ptr_eq(&notes_parent, &alice), "file parent must be alice");

    let readme = rev.borrow().children[2].clone();
    assert!(readme.is::<File>(), "last root entry is a file");
    assert_eq!(readme.class_id().expect("not borrowed"), File::CLASS, "file class");

    dismantle(&rev);
}

#[test]
fn files_need_allowing() {
    let tree = sample_tree();
    let buf = keyed_archive::archive(&ObjectRef::from_rc(Rc::clone(&tree)), true)
        .expect("must archive");
    dismantle(&tree);

    let folders_only = AllowList::new().with::<Folder>();
    let err = keyed_archive::unarchive(&buf, true, &registry(), &folders_only)
        .expect_err("files are not allowed");
    assert_eq!(err.kind(), ErrorKind::DisallowedClass, "incorrect kind: {err:?}");
    assert_eq!(err.class(), Some(&File::CLASS), "must name the file class");
}

#[derive(Debug, serde::Deserialize)]
struct HostConfig {
    archive: ArchiveLimits,
}

#[test]
fn configured_limits() {
    let tree = sample_tree();
    let buf = keyed_archive::archive(&ObjectRef::from_rc(Rc::clone(&tree)), true)
        .expect("must archive");
    dismantle(&tree);

    let config: HostConfig = toml::from_str(
        r#"
        [archive]
        max_objects = 4
        "#,
    )
    .expect("valid config");

    let registry = registry();
    let err = Unarchiver::new(&registry)
        .limits(config.archive)
        .unarchive(&buf)
        .expect_err("seven objects exceed the limit");
    assert_eq!(err.kind(), ErrorKind::MalformedBuffer, "incorrect kind: {err:?}");

    let rev = Unarchiver::new(&registry)
        .limits(ArchiveLimits {
            max_objects: 7,
            ..config.archive
        })
        .unarchive_as::<Folder>(&buf)
        .expect("seven objects are fine");
    dismantle(&rev);
}
