use super::FormatError;

/// Cursor over the archive bytes.
///
/// Every read either consumes exactly the requested bytes or fails with
/// [`FormatError::UnexpectedEof`] without consuming anything.
#[derive(Debug)]
pub struct SliceRead<'de> {
    data: &'de [u8],
}

impl<'de> SliceRead<'de> {
    pub fn new(data: &'de [u8]) -> Self {
        Self { data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read_byte(&mut self) -> Result<u8, FormatError> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    /// Reads a constant size chunk of bytes.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let (out, rem) = self
            .data
            .split_first_chunk::<N>()
            .ok_or(FormatError::UnexpectedEof)?;
        self.data = rem;
        Ok(*out)
    }

    /// Reads a chunk of bytes borrowed from the underlying data.
    pub fn read_slice(&mut self, len: usize) -> Result<&'de [u8], FormatError> {
        let (out, rem) = self
            .data
            .split_at_checked(len)
            .ok_or(FormatError::UnexpectedEof)?;
        self.data = rem;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_in_order() {
        let mut reader = SliceRead::new(b"abcdef");
        assert_eq!(reader.read_byte().expect("has data"), b'a', "first byte");
        assert_eq!(reader.read_array::<2>().expect("has data"), *b"bc", "array");
        assert_eq!(reader.read_slice(3).expect("has data"), b"def", "slice");
        assert!(reader.is_empty(), "everything consumed");
    }

    #[test]
    fn short_read_keeps_position() {
        let mut reader = SliceRead::new(b"ab");
        let err = reader.read_slice(3).expect_err("too short");
        assert!(
            matches!(err, FormatError::UnexpectedEof),
            "expected eof, got {err:?}"
        );
        assert_eq!(reader.read_slice(2).expect("still there"), b"ab", "unchanged");
    }
}
