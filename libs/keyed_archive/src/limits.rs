//! Resource limits applied while unarchiving.

/// Upper bounds on the size of archives accepted by an
/// [`Unarchiver`](crate::de::Unarchiver).
///
/// Archives exceeding any of these fail as malformed before any object is
/// instantiated. This can be embedded in a host's configuration; missing keys
/// fall back to the defaults:
///
/// ```toml
/// [archive]
/// max_objects = 4096
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct ArchiveLimits {
    /// Maximum length of the archive data in bytes.
    pub max_buffer_len: usize,
    /// Maximum number of entries in the class table.
    pub max_classes: usize,
    /// Maximum number of objects in the object table.
    pub max_objects: usize,
    /// Maximum number of fields per object.
    pub max_fields: usize,
}

impl ArchiveLimits {
    /// The default limits.
    pub const DEFAULT: Self = Self {
        max_buffer_len: 64 << 20,
        max_classes: 0x1000,
        max_objects: 1 << 20,
        max_fields: 0x400,
    };
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}
