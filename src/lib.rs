//! # symelf
//!
//! Synthesizes ELF object files from caller-supplied symbol facts, so a
//! debugger can load them through its external-symbol-file mechanism
//! (`add-symbol-file`) without touching the real binary. Kernel symbol
//! appliers and decompiler-sync tools feed their raw facts in; what comes
//! back is a byte buffer any conformant ELF reader accepts.
//!
//! Symbol addresses are live addresses from the process or binary under
//! inspection. They are never relocated: derived sections only describe
//! the ranges the symbols already occupy, as `SHT_NOBITS`, so the image
//! carries no bytes for address space it does not own and cannot collide
//! with the debuggee.
//!
//! ```
//! use symelf::{ElfImage, ImageConfig, SymbolRecord, SymbolSet};
//!
//! let mut set = SymbolSet::new();
//! set.add(SymbolRecord::function("kmalloc", 0xffff_ffff_8101_2340, 64), false)?;
//! set.add(SymbolRecord::object("jiffies", 0xffff_ffff_8200_0000, 8), false)?;
//!
//! let image = ElfImage::build(&set.snapshot(), &ImageConfig::default())?;
//! assert_eq!(&image.as_bytes()[..4], b"\x7fELF");
//! # Ok::<(), symelf::Error>(())
//! ```
//!
//! Repeated-call sync workflows go through [`SyncSession`], which retains
//! the previous snapshot and can emit delta images containing only the
//! changed subset:
//!
//! ```
//! use symelf::{ImageConfig, SymbolRecord, SymbolSet, SyncMode, SyncSession};
//!
//! let mut set = SymbolSet::new();
//! set.add(SymbolRecord::function("vfs_read", 0xffff_ffff_8130_0000, 128), false)?;
//!
//! let mut session = SyncSession::new(ImageConfig::default(), SyncMode::Delta);
//! let first = session.sync(&set, None)?;
//!
//! set.add(SymbolRecord::function("vfs_write", 0xffff_ffff_8130_1000, 128), false)?;
//! let delta = session.sync(&set, Some(first.token))?;
//! assert_eq!(delta.diff.added.len(), 1);
//! # Ok::<(), symelf::Error>(())
//! ```

pub mod constants;
pub mod container;
pub mod encode;
pub mod error;
pub mod image;
pub mod layout;
pub mod section;
pub mod set;
pub mod strtab;
pub mod symbol;
pub mod sync;
pub mod validate;

pub use crate::container::{Container, Ctx, ImageConfig};
pub use scroll::Endian;
pub use crate::error::{Error, Result};
pub use crate::image::ElfImage;
pub use crate::section::SectionDescriptor;
pub use crate::set::{SnapshotToken, SymbolKey, SymbolSet, SymbolSnapshot};
pub use crate::symbol::{SectionRef, SymbolBinding, SymbolKind, SymbolRecord};
pub use crate::sync::{SymbolDiff, SyncMode, SyncOutcome, SyncSession};
