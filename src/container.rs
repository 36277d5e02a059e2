//! Target configuration threaded through the layout planner and the
//! binary encoder: ELF class, byte order, and machine.

use crate::constants::{ELFCLASS32, ELFCLASS64, EM_X86_64};
use scroll::Endian;

/// The address width of an image.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Container {
    /// 32-bit.
    Little,
    /// 64-bit.
    Big,
}

impl Container {
    /// Is this a 64-bit container?
    #[inline]
    pub fn is_big(self) -> bool {
        self == Container::Big
    }

    /// The `EI_CLASS` byte for this container size.
    #[inline]
    pub fn class(self) -> u8 {
        if self.is_big() { ELFCLASS64 } else { ELFCLASS32 }
    }
}

impl Default for Container {
    fn default() -> Self {
        Container::Big
    }
}

/// The encoding context: container size plus byte order. Every field-width
/// decision in the encoder and validator flows from this one value.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ctx {
    pub container: Container,
    pub le: Endian,
}

impl Ctx {
    pub fn new(container: Container, le: Endian) -> Self {
        Ctx { container, le }
    }

    #[inline]
    pub fn is_big(&self) -> bool {
        self.container.is_big()
    }

    #[inline]
    pub fn is_little_endian(&self) -> bool {
        self.le.is_little()
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Ctx {
            container: Container::default(),
            le: Endian::Little,
        }
    }
}

/// Configuration for one synthesized image. The cross-architecture surface
/// is exactly this value; nothing else branches on the target.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ImageConfig {
    /// ELF class of the image.
    pub container: Container,
    /// Data encoding of the image.
    pub endian: Endian,
    /// `e_machine` constant, e.g. [`EM_X86_64`](crate::constants::EM_X86_64).
    pub machine: u16,
}

impl ImageConfig {
    pub fn new(container: Container, endian: Endian, machine: u16) -> Self {
        ImageConfig {
            container,
            endian,
            machine,
        }
    }

    /// The encoding context for this configuration.
    pub fn ctx(&self) -> Ctx {
        Ctx::new(self.container, self.endian)
    }
}

impl Default for ImageConfig {
    /// 64-bit little-endian x86-64.
    fn default() -> Self {
        ImageConfig {
            container: Container::Big,
            endian: Endian::Little,
            machine: EM_X86_64,
        }
    }
}
