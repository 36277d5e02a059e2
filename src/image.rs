//! The immutable product of one synthesis call.

use crate::container::ImageConfig;
use crate::encode;
use crate::error::Result;
use crate::layout;
use crate::section::SectionDescriptor;
use crate::set::{SnapshotToken, SymbolSnapshot};
use crate::validate;

/// A validated ELF image built from one snapshot. Built fresh per call and
/// never mutated afterwards; persisting the bytes or feeding them to a
/// debugger is the caller's concern.
#[derive(Debug, Clone)]
pub struct ElfImage {
    config: ImageConfig,
    sections: Vec<SectionDescriptor>,
    symbol_count: usize,
    token: SnapshotToken,
    bytes: Vec<u8>,
}

impl ElfImage {
    /// Plan, encode, and validate an image for `snapshot`. No partial
    /// buffer escapes: a layout conflict or a validation failure returns
    /// the error and nothing else.
    pub fn build(snapshot: &SymbolSnapshot, config: &ImageConfig) -> Result<ElfImage> {
        let ctx = config.ctx();
        let plan = layout::plan(snapshot, ctx)?;
        let bytes = encode::encode(snapshot, &plan, config.machine)?;
        validate::check(&bytes, ctx)?;
        Ok(ElfImage {
            config: *config,
            sections: plan.sections,
            symbol_count: snapshot.len(),
            token: snapshot.token(),
            bytes,
        })
    }

    /// The encoded image, ready for an external-symbol-file load.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the image, yielding the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The derived section descriptors, in header order.
    pub fn sections(&self) -> &[SectionDescriptor] {
        &self.sections
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Token of the snapshot this image was built from.
    pub fn token(&self) -> SnapshotToken {
        self.token
    }

    /// Number of records encoded, excluding the reserved null entry.
    pub fn symbol_count(&self) -> usize {
        self.symbol_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ELFMAG;
    use crate::set::SymbolSet;
    use crate::symbol::SymbolRecord;

    #[test]
    fn builds_and_exposes_metadata() {
        let mut set = SymbolSet::new();
        set.add(SymbolRecord::function("kmalloc", 0xffff_ffff_8101_2340, 64), false)
            .unwrap();

        let image = ElfImage::build(&set.snapshot(), &ImageConfig::default()).unwrap();
        assert_eq!(&image.as_bytes()[..4], &ELFMAG[..]);
        assert_eq!(image.symbol_count(), 1);
        assert_eq!(image.sections().len(), 1);
        assert_eq!(image.sections()[0].name, ".text");
        assert_eq!(image.token(), set.token());
    }

    #[test]
    fn empty_set_builds_a_minimal_image() {
        let set = SymbolSet::new();
        let image = ElfImage::build(&set.snapshot(), &ImageConfig::default()).unwrap();
        assert_eq!(image.symbol_count(), 0);
        assert!(image.sections().is_empty());
        assert!(!image.as_bytes().is_empty());
    }

    #[test]
    fn layout_conflicts_yield_no_image() {
        let mut set = SymbolSet::new();
        set.add(SymbolRecord::function("f", 0x1000, 0x100), false)
            .unwrap();
        set.add(
            SymbolRecord::object("g", 0x1010, 8).in_section(".conflicting"),
            false,
        )
        .unwrap();
        assert!(ElfImage::build(&set.snapshot(), &ImageConfig::default()).is_err());
    }
}
