//! The binary container that holds an archived object graph.
//!
//! The layout is as follows, with every integer as LEB128:
//!
//! - 4 magic bytes, `KARC`
//! - the format version
//! - the class table: a count followed by that many length-prefixed UTF-8 names
//! - the object table: a count followed by that many objects, each being a
//!   class table index and a count of key-value field pairs
//! - the UID of the root object, as an index into the object table
//!
//! Field keys are length-prefixed UTF-8 strings. Field values start with a
//! one byte tag, see [`tag`].
//!
//! Decoding validates every class index and object reference against the
//! table sizes, so code working with a [`RawArchive`] may index freely.

use crate::class::ClassId;
use crate::limits::ArchiveLimits;

mod leb128;
mod read;

use read::SliceRead;

const MAGIC: [u8; 4] = *b"KARC";
const VERSION: u64 = 1;

/// Never preallocate more than this many elements based on a length prefix.
const PREALLOC: usize = 0x400;

/// Value tags.
mod tag {
    pub const NULL: u8 = 0;
    pub const FALSE: u8 = 1;
    pub const TRUE: u8 = 2;
    pub const INT: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const STR: u8 = 5;
    pub const BYTES: u8 = 6;
    pub const REF: u8 = 7;
    pub const ARRAY: u8 = 8;
}

/// Index of an object within the object table.
pub type Uid = usize;

/// Errors for archive data that doesn't follow the container layout.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FormatError {
    /// The data ended in the middle of a value.
    #[error("unexpected end of archive data")]
    UnexpectedEof,
    /// The data doesn't start with the archive magic.
    #[error("data does not start with the archive magic")]
    BadMagic,
    /// The data was written by an unknown format version.
    #[error("unsupported archive format version {0}")]
    UnsupportedVersion(u64),
    /// While reading LEB128 integer data, the data overflowed the target type.
    #[error("LEB encoded integer overflows target type")]
    IntegerOverflow,
    /// A class name or string field contained invalid UTF-8.
    #[error("invalid utf-8 in data for string")]
    InvalidUtf8,
    /// A field value started with an unknown tag.
    #[error("invalid value tag {0:#04x}")]
    InvalidTag(u8),
    /// An array contained another array.
    #[error("arrays may not contain arrays")]
    NestedArray,
    /// An object reference or the root pointed past the object table.
    #[error("object reference {0} points past the object table")]
    DanglingReference(u64),
    /// An object's class index pointed past the class table.
    #[error("class index {0} points past the class table")]
    ClassOutOfRange(u64),
    /// An object contained the same field key twice.
    #[error("duplicate field key `{0}`")]
    DuplicateKey(String),
    /// Past the end of the archive were trailing bytes.
    #[error("trailing bytes past the end of the archive")]
    TrailingBytes,
    /// A table or object was larger than the configured limits allow.
    #[error("{what} count {count} exceeds the limit of {max}")]
    LimitExceeded {
        what: &'static str,
        count: usize,
        max: usize,
    },
    /// The data itself was larger than the configured limits allow.
    #[error("archive of {len} bytes exceeds the limit of {max} bytes")]
    TooLarge { len: usize, max: usize },
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Ref(Uid),
    Array(Vec<Value>),
}

impl Value {
    /// Human-readable name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "a bool",
            Self::Int(_) => "an integer",
            Self::Float(_) => "a float",
            Self::Str(_) => "a string",
            Self::Bytes(_) => "bytes",
            Self::Ref(_) => "an object reference",
            Self::Array(_) => "an array",
        }
    }
}

/// An archived object: its class and its keyed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObject {
    pub class: usize,
    pub fields: Vec<(String, Value)>,
}

/// The full contents of an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArchive {
    pub classes: Vec<ClassId>,
    pub objects: Vec<RawObject>,
    pub root: Uid,
}

impl RawArchive {
    /// Gets the class of the object with the given UID.
    pub fn class_of(&self, uid: Uid) -> &ClassId {
        &self.classes[self.objects[uid].class]
    }
}

fn len_u64(len: usize) -> u64 {
    // usize is at most 64 bits wide on every supported target
    u64::try_from(len).unwrap_or(u64::MAX)
}

fn write_len(buf: &mut Vec<u8>, len: usize) {
    leb128::write_u64(buf, len_u64(len));
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_len(buf, s.len());
    buf.extend_from_slice(s.as_bytes());
}

fn write_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(tag::NULL),
        Value::Bool(false) => buf.push(tag::FALSE),
        Value::Bool(true) => buf.push(tag::TRUE),
        Value::Int(i) => {
            buf.push(tag::INT);
            leb128::write_i64(buf, *i);
        },
        Value::Float(f) => {
            buf.push(tag::FLOAT);
            buf.extend_from_slice(&f.to_le_bytes());
        },
        Value::Str(s) => {
            buf.push(tag::STR);
            write_str(buf, s);
        },
        Value::Bytes(b) => {
            buf.push(tag::BYTES);
            write_len(buf, b.len());
            buf.extend_from_slice(b);
        },
        Value::Ref(uid) => {
            buf.push(tag::REF);
            write_len(buf, *uid);
        },
        Value::Array(items) => {
            buf.push(tag::ARRAY);
            write_len(buf, items.len());
            for item in items {
                debug_assert!(
                    !matches!(item, Value::Array(_)),
                    "encoder must not nest arrays"
                );
                write_value(buf, item);
            }
        },
    }
}

/// Writes an archive into a new buffer.
pub fn encode(archive: &RawArchive) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAGIC);
    leb128::write_u64(&mut buf, VERSION);

    write_len(&mut buf, archive.classes.len());
    for class in &archive.classes {
        write_str(&mut buf, class.as_str());
    }

    write_len(&mut buf, archive.objects.len());
    for object in &archive.objects {
        write_len(&mut buf, object.class);
        write_len(&mut buf, object.fields.len());
        for (key, value) in &object.fields {
            write_str(&mut buf, key);
            write_value(&mut buf, value);
        }
    }

    write_len(&mut buf, archive.root);
    buf
}

/// Reads and validates an archive.
pub fn decode(data: &[u8], limits: &ArchiveLimits) -> Result<RawArchive, FormatError> {
    if data.len() > limits.max_buffer_len {
        return Err(FormatError::TooLarge {
            len: data.len(),
            max: limits.max_buffer_len,
        });
    }

    let mut reader = SliceRead::new(data);
    if reader.read_array::<4>()? != MAGIC {
        return Err(FormatError::BadMagic);
    }

    let version = leb128::read_u64(&mut reader)?;
    if version != VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let class_count = read_count(&mut reader, "class", limits.max_classes)?;
    let mut classes = Vec::with_capacity(class_count.min(PREALLOC));
    for _ in 0..class_count {
        classes.push(ClassId::from(read_str(&mut reader)?.to_owned()));
    }

    let object_count = read_count(&mut reader, "object", limits.max_objects)?;
    let mut objects = Vec::with_capacity(object_count.min(PREALLOC));
    for _ in 0..object_count {
        let class = read_index(&mut reader, class_count, FormatError::ClassOutOfRange)?;
        let field_count = read_count(&mut reader, "field", limits.max_fields)?;
        let mut fields: Vec<(String, Value)> = Vec::with_capacity(field_count.min(PREALLOC));
        for _ in 0..field_count {
            let key = read_str(&mut reader)?;
            if fields.iter().any(|(k, _)| k == key) {
                return Err(FormatError::DuplicateKey(key.to_owned()));
            }

            let value = read_value(&mut reader, object_count, true)?;
            fields.push((key.to_owned(), value));
        }

        objects.push(RawObject { class, fields });
    }

    let root = read_index(&mut reader, object_count, FormatError::DanglingReference)?;
    if !reader.is_empty() {
        return Err(FormatError::TrailingBytes);
    }

    Ok(RawArchive {
        classes,
        objects,
        root,
    })
}

fn read_count(
    reader: &mut SliceRead<'_>,
    what: &'static str,
    max: usize,
) -> Result<usize, FormatError> {
    let count = leb128::read_usize(reader)?;
    if count > max {
        return Err(FormatError::LimitExceeded { what, count, max });
    }

    Ok(count)
}

fn read_index(
    reader: &mut SliceRead<'_>,
    len: usize,
    err: fn(u64) -> FormatError,
) -> Result<usize, FormatError> {
    let index = leb128::read_u64(reader)?;
    match usize::try_from(index) {
        Ok(index) if index < len => Ok(index),
        _ => Err(err(index)),
    }
}

fn read_str<'de>(reader: &mut SliceRead<'de>) -> Result<&'de str, FormatError> {
    let len = leb128::read_usize(reader)?;
    let bytes = reader.read_slice(len)?;
    std::str::from_utf8(bytes).map_err(|_| FormatError::InvalidUtf8)
}

fn read_value(
    reader: &mut SliceRead<'_>,
    object_count: usize,
    allow_array: bool,
) -> Result<Value, FormatError> {
    let value = match reader.read_byte()? {
        tag::NULL => Value::Null,
        tag::FALSE => Value::Bool(false),
        tag::TRUE => Value::Bool(true),
        tag::INT => Value::Int(leb128::read_i64(reader)?),
        tag::FLOAT => Value::Float(f64::from_le_bytes(reader.read_array()?)),
        tag::STR => Value::Str(read_str(reader)?.to_owned()),
        tag::BYTES => {
            let len = leb128::read_usize(reader)?;
            Value::Bytes(reader.read_slice(len)?.to_vec())
        },
        tag::REF => Value::Ref(read_index(
            reader,
            object_count,
            FormatError::DanglingReference,
        )?),
        tag::ARRAY if allow_array => {
            let len = leb128::read_usize(reader)?;
            let mut items = Vec::with_capacity(len.min(PREALLOC));
            for _ in 0..len {
                items.push(read_value(reader, object_count, false)?);
            }
            Value::Array(items)
        },
        tag::ARRAY => return Err(FormatError::NestedArray),
        other => return Err(FormatError::InvalidTag(other)),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawArchive {
        RawArchive {
            classes: vec![ClassId::new("Person"), ClassId::new("Note")],
            objects: vec![
                RawObject {
                    class: 0,
                    fields: vec![
                        ("name".to_owned(), Value::Str("Alice".to_owned())),
                        ("friend".to_owned(), Value::Ref(0)),
                        ("notes".to_owned(), Value::Array(vec![Value::Ref(1)])),
                    ],
                },
                RawObject {
                    class: 1,
                    fields: vec![
                        ("age".to_owned(), Value::Int(-42)),
                        ("score".to_owned(), Value::Float(0.5)),
                        ("pinned".to_owned(), Value::Bool(true)),
                        ("blob".to_owned(), Value::Bytes(vec![1, 2, 3])),
                        ("parent".to_owned(), Value::Null),
                    ],
                },
            ],
            root: 0,
        }
    }

    fn decode_default(data: &[u8]) -> Result<RawArchive, FormatError> {
        decode(data, &ArchiveLimits::default())
    }

    #[test]
    fn round_trip() {
        let archive = sample();
        let buf = encode(&archive);
        assert!(buf.starts_with(b"KARC\x01"), "magic and version lead");

        let rev = decode_default(&buf).expect("valid archive");
        assert_eq!(archive, rev, "archive must survive a round trip");
        assert_eq!(rev.class_of(1).as_str(), "Note", "class lookup by uid");
    }

    macro_rules! rejects {
        ($fn_name:ident, $data:expr, $pat:pat) => {
            #[test]
            fn $fn_name() {
                let data: Vec<u8> = $data;
                let err = decode_default(&data).expect_err("must be rejected");
                assert!(matches!(err, $pat), "incorrect error kind: {err:?}");
            }
        };
    }

    // magic, version, 1 class "A", 1 object of class 0 with 1 field "k"
    fn prefix() -> Vec<u8> {
        b"KARC\x01\x01\x01A\x01\x00\x01\x01k".to_vec()
    }

    fn with(mut base: Vec<u8>, tail: &[u8]) -> Vec<u8> {
        base.extend_from_slice(tail);
        base
    }

    rejects!(bad_magic, b"KARD\x01\x00\x00\x00".to_vec(), FormatError::BadMagic);
    rejects!(
        bad_version,
        b"KARC\x02\x00\x00\x00".to_vec(),
        FormatError::UnsupportedVersion(2)
    );
    rejects!(empty, Vec::new(), FormatError::UnexpectedEof);
    rejects!(
        no_objects,
        b"KARC\x01\x00\x00\x00".to_vec(),
        FormatError::DanglingReference(0)
    );
    rejects!(
        class_out_of_range,
        b"KARC\x01\x00\x01\x00\x00\x00".to_vec(),
        FormatError::ClassOutOfRange(0)
    );
    rejects!(
        dangling_ref,
        with(prefix(), &[tag::REF, 0x05, 0x00]),
        FormatError::DanglingReference(5)
    );
    rejects!(
        invalid_tag,
        with(prefix(), &[0x42, 0x00]),
        FormatError::InvalidTag(0x42)
    );
    rejects!(
        nested_array,
        with(prefix(), &[tag::ARRAY, 0x01, tag::ARRAY, 0x00, 0x00]),
        FormatError::NestedArray
    );
    rejects!(
        invalid_utf8,
        with(prefix(), &[tag::STR, 0x01, 0xFF, 0x00]),
        FormatError::InvalidUtf8
    );
    rejects!(
        trailing,
        with(prefix(), &[tag::NULL, 0x00, 0x00]),
        FormatError::TrailingBytes
    );
    rejects!(
        duplicate_key,
        b"KARC\x01\x01\x01A\x01\x00\x02\x01k\x00\x01k\x00\x00".to_vec(),
        FormatError::DuplicateKey(_)
    );

    #[test]
    fn minimal_archive() {
        let data = with(prefix(), &[tag::NULL, 0x00]);
        let archive = decode_default(&data).expect("valid archive");
        assert_eq!(archive.objects.len(), 1, "one object");
        assert_eq!(
            archive.objects[0].fields,
            [("k".to_owned(), Value::Null)],
            "one null field"
        );
    }

    #[test]
    fn every_prefix_is_rejected() {
        let buf = encode(&sample());
        for len in 0..buf.len() {
            decode_default(&buf[..len]).expect_err("truncated data must fail");
        }
    }

    #[test]
    fn limits_are_enforced() {
        let buf = encode(&sample());

        let limits = ArchiveLimits {
            max_objects: 1,
            ..ArchiveLimits::default()
        };
        let err = decode(&buf, &limits).expect_err("too many objects");
        assert!(
            matches!(
                err,
                FormatError::LimitExceeded {
                    what: "object",
                    count: 2,
                    max: 1
                }
            ),
            "incorrect error kind: {err:?}"
        );

        let limits = ArchiveLimits {
            max_buffer_len: 8,
            ..ArchiveLimits::default()
        };
        let err = decode(&buf, &limits).expect_err("too large");
        assert!(
            matches!(err, FormatError::TooLarge { max: 8, .. }),
            "incorrect error kind: {err:?}"
        );
    }

    #[test]
    fn huge_length_prefix_does_not_allocate() {
        // claims u32::MAX objects but has no data for them
        let data = b"KARC\x01\x00\xFF\xFF\xFF\xFF\x0F".to_vec();
        let limits = ArchiveLimits {
            max_objects: usize::MAX,
            ..ArchiveLimits::default()
        };
        let err = decode(&data, &limits).expect_err("no data");
        assert!(
            matches!(err, FormatError::UnexpectedEof),
            "incorrect error kind: {err:?}"
        );
    }
}
