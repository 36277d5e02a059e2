//! Deduplicated, null-terminated string table construction for `.strtab`
//! and `.shstrtab`.

use std::collections::HashMap;

/// Builds a string table section. The table always starts with a null byte,
/// so offset 0 is the empty string, per format convention. Deduplication is
/// exact-string-match; offsets are assigned in insertion order.
#[derive(Debug, Clone)]
pub struct StrtabBuilder {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl StrtabBuilder {
    pub fn new() -> Self {
        StrtabBuilder {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }

    /// Add a string and return its offset. Empty strings map to offset 0;
    /// repeated insertions return the first offset.
    pub fn add(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(&offset) = self.offsets.get(s) {
            return offset;
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        self.offsets.insert(s.to_string(), offset);
        offset
    }

    /// Look up the offset of a previously-added string.
    pub fn offset_of(&self, s: &str) -> Option<u32> {
        if s.is_empty() {
            return Some(0);
        }
        self.offsets.get(s).copied()
    }

    /// The raw table bytes, including the leading null byte.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Size of the table in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if no string beyond the reserved empty one has been added.
    pub fn is_empty(&self) -> bool {
        self.data.len() == 1
    }
}

impl Default for StrtabBuilder {
    fn default() -> Self {
        StrtabBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_and_reserves_offset_zero() {
        let mut builder = StrtabBuilder::new();

        let a = builder.add("kmalloc");
        let b = builder.add("kfree");
        let c = builder.add("kmalloc");

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(builder.add(""), 0);
        assert_eq!(builder.as_bytes()[0], 0);
        assert_eq!(*builder.as_bytes().last().unwrap(), 0);
    }

    #[test]
    fn offsets_point_at_their_strings() {
        let mut builder = StrtabBuilder::new();
        let off = builder.add("vfs_read") as usize;
        let bytes = builder.as_bytes();
        assert_eq!(&bytes[off..off + 8], b"vfs_read");
        assert_eq!(bytes[off + 8], 0);
        assert_eq!(builder.offset_of("vfs_read"), Some(off as u32));
        assert_eq!(builder.offset_of("missing"), None);
    }

    #[test]
    fn empty_table_is_one_null_byte() {
        let builder = StrtabBuilder::new();
        assert!(builder.is_empty());
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.as_bytes(), &[0]);
    }
}
