//! Binary serialization of a planned layout.
//!
//! On-disk structs exist per class; the unified types dispatch on
//! [`Ctx`](crate::container::Ctx) so nothing outside this module branches
//! on field widths. The output buffer is zero-initialized up front, which
//! keeps every padding byte zero-filled.

use crate::constants::{
    EI_CLASS, EI_DATA, EI_OSABI, EI_VERSION, ELFDATA2LSB, ELFDATA2MSB, ELFMAG, ELFOSABI_NONE,
    ET_REL, EV_CURRENT, SHT_STRTAB, SHT_SYMTAB, SIZEOF_EHDR32, SIZEOF_EHDR64, SIZEOF_IDENT,
    SIZEOF_SHDR32, SIZEOF_SHDR64, SIZEOF_SYM32, SIZEOF_SYM64,
};
use crate::container::{Container, Ctx};
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::set::SymbolSnapshot;
use core::result;
use log::debug;
use scroll::{Pread, Pwrite, ctx};

pub mod elf32 {
    //! 32-bit on-disk table entries.
    use scroll::{Pread, Pwrite, SizeWith};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Pread, Pwrite, SizeWith)]
    pub struct Sym {
        pub st_name: u32,
        pub st_value: u32,
        pub st_size: u32,
        pub st_info: u8,
        pub st_other: u8,
        pub st_shndx: u16,
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Pread, Pwrite, SizeWith)]
    pub struct SectionHeader {
        pub sh_name: u32,
        pub sh_type: u32,
        pub sh_flags: u32,
        pub sh_addr: u32,
        pub sh_offset: u32,
        pub sh_size: u32,
        pub sh_link: u32,
        pub sh_info: u32,
        pub sh_addralign: u32,
        pub sh_entsize: u32,
    }
}

pub mod elf64 {
    //! 64-bit on-disk table entries.
    use scroll::{Pread, Pwrite, SizeWith};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Pread, Pwrite, SizeWith)]
    pub struct Sym {
        pub st_name: u32,
        pub st_info: u8,
        pub st_other: u8,
        pub st_shndx: u16,
        pub st_value: u64,
        pub st_size: u64,
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Pread, Pwrite, SizeWith)]
    pub struct SectionHeader {
        pub sh_name: u32,
        pub sh_type: u32,
        pub sh_flags: u64,
        pub sh_addr: u64,
        pub sh_offset: u64,
        pub sh_size: u64,
        pub sh_link: u32,
        pub sh_info: u32,
        pub sh_addralign: u64,
        pub sh_entsize: u64,
    }
}

/// A unified symbol table entry; encodes at the configured class width.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sym {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

impl Sym {
    /// Size of an encoded entry for the given container.
    pub fn size(container: Container) -> usize {
        match container {
            Container::Little => SIZEOF_SYM32,
            Container::Big => SIZEOF_SYM64,
        }
    }
}

impl From<Sym> for elf32::Sym {
    fn from(sym: Sym) -> Self {
        elf32::Sym {
            st_name: sym.st_name,
            st_value: sym.st_value as u32,
            st_size: sym.st_size as u32,
            st_info: sym.st_info,
            st_other: sym.st_other,
            st_shndx: sym.st_shndx,
        }
    }
}

impl From<elf32::Sym> for Sym {
    fn from(sym: elf32::Sym) -> Self {
        Sym {
            st_name: sym.st_name,
            st_info: sym.st_info,
            st_other: sym.st_other,
            st_shndx: sym.st_shndx,
            st_value: u64::from(sym.st_value),
            st_size: u64::from(sym.st_size),
        }
    }
}

impl From<Sym> for elf64::Sym {
    fn from(sym: Sym) -> Self {
        elf64::Sym {
            st_name: sym.st_name,
            st_info: sym.st_info,
            st_other: sym.st_other,
            st_shndx: sym.st_shndx,
            st_value: sym.st_value,
            st_size: sym.st_size,
        }
    }
}

impl From<elf64::Sym> for Sym {
    fn from(sym: elf64::Sym) -> Self {
        Sym {
            st_name: sym.st_name,
            st_info: sym.st_info,
            st_other: sym.st_other,
            st_shndx: sym.st_shndx,
            st_value: sym.st_value,
            st_size: sym.st_size,
        }
    }
}

impl<'a> ctx::TryFromCtx<'a, Ctx> for Sym {
    type Error = scroll::Error;
    fn try_from_ctx(bytes: &'a [u8], Ctx { container, le }: Ctx) -> result::Result<(Self, usize), Self::Error> {
        match container {
            Container::Little => {
                let sym = bytes.pread_with::<elf32::Sym>(0, le)?;
                Ok((sym.into(), SIZEOF_SYM32))
            }
            Container::Big => {
                let sym = bytes.pread_with::<elf64::Sym>(0, le)?;
                Ok((sym.into(), SIZEOF_SYM64))
            }
        }
    }
}

impl ctx::TryIntoCtx<Ctx> for Sym {
    type Error = scroll::Error;
    fn try_into_ctx(self, bytes: &mut [u8], Ctx { container, le }: Ctx) -> result::Result<usize, Self::Error> {
        match container {
            Container::Little => {
                let sym: elf32::Sym = self.into();
                bytes.pwrite_with(sym, 0, le)
            }
            Container::Big => {
                let sym: elf64::Sym = self.into();
                bytes.pwrite_with(sym, 0, le)
            }
        }
    }
}

/// A unified section header; encodes at the configured class width.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

impl SectionHeader {
    /// Size of an encoded header for the given container.
    pub fn size(container: Container) -> usize {
        match container {
            Container::Little => SIZEOF_SHDR32,
            Container::Big => SIZEOF_SHDR64,
        }
    }
}

impl From<SectionHeader> for elf32::SectionHeader {
    fn from(shdr: SectionHeader) -> Self {
        elf32::SectionHeader {
            sh_name: shdr.sh_name,
            sh_type: shdr.sh_type,
            sh_flags: shdr.sh_flags as u32,
            sh_addr: shdr.sh_addr as u32,
            sh_offset: shdr.sh_offset as u32,
            sh_size: shdr.sh_size as u32,
            sh_link: shdr.sh_link,
            sh_info: shdr.sh_info,
            sh_addralign: shdr.sh_addralign as u32,
            sh_entsize: shdr.sh_entsize as u32,
        }
    }
}

impl From<elf32::SectionHeader> for SectionHeader {
    fn from(shdr: elf32::SectionHeader) -> Self {
        SectionHeader {
            sh_name: shdr.sh_name,
            sh_type: shdr.sh_type,
            sh_flags: u64::from(shdr.sh_flags),
            sh_addr: u64::from(shdr.sh_addr),
            sh_offset: u64::from(shdr.sh_offset),
            sh_size: u64::from(shdr.sh_size),
            sh_link: shdr.sh_link,
            sh_info: shdr.sh_info,
            sh_addralign: u64::from(shdr.sh_addralign),
            sh_entsize: u64::from(shdr.sh_entsize),
        }
    }
}

impl From<SectionHeader> for elf64::SectionHeader {
    fn from(shdr: SectionHeader) -> Self {
        elf64::SectionHeader {
            sh_name: shdr.sh_name,
            sh_type: shdr.sh_type,
            sh_flags: shdr.sh_flags,
            sh_addr: shdr.sh_addr,
            sh_offset: shdr.sh_offset,
            sh_size: shdr.sh_size,
            sh_link: shdr.sh_link,
            sh_info: shdr.sh_info,
            sh_addralign: shdr.sh_addralign,
            sh_entsize: shdr.sh_entsize,
        }
    }
}

impl From<elf64::SectionHeader> for SectionHeader {
    fn from(shdr: elf64::SectionHeader) -> Self {
        SectionHeader {
            sh_name: shdr.sh_name,
            sh_type: shdr.sh_type,
            sh_flags: shdr.sh_flags,
            sh_addr: shdr.sh_addr,
            sh_offset: shdr.sh_offset,
            sh_size: shdr.sh_size,
            sh_link: shdr.sh_link,
            sh_info: shdr.sh_info,
            sh_addralign: shdr.sh_addralign,
            sh_entsize: shdr.sh_entsize,
        }
    }
}

impl<'a> ctx::TryFromCtx<'a, Ctx> for SectionHeader {
    type Error = scroll::Error;
    fn try_from_ctx(bytes: &'a [u8], Ctx { container, le }: Ctx) -> result::Result<(Self, usize), Self::Error> {
        match container {
            Container::Little => {
                let shdr = bytes.pread_with::<elf32::SectionHeader>(0, le)?;
                Ok((shdr.into(), SIZEOF_SHDR32))
            }
            Container::Big => {
                let shdr = bytes.pread_with::<elf64::SectionHeader>(0, le)?;
                Ok((shdr.into(), SIZEOF_SHDR64))
            }
        }
    }
}

impl ctx::TryIntoCtx<Ctx> for SectionHeader {
    type Error = scroll::Error;
    fn try_into_ctx(self, bytes: &mut [u8], Ctx { container, le }: Ctx) -> result::Result<usize, Self::Error> {
        match container {
            Container::Little => {
                let shdr: elf32::SectionHeader = self.into();
                bytes.pwrite_with(shdr, 0, le)
            }
            Container::Big => {
                let shdr: elf64::SectionHeader = self.into();
                bytes.pwrite_with(shdr, 0, le)
            }
        }
    }
}

/// A unified file header. Address-width fields hold 64 bits and narrow on
/// encode when the container is 32-bit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub e_ident: [u8; SIZEOF_IDENT],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl Header {
    /// A relocatable-file header for the given context and machine, with
    /// the section table fields left for the encoder to fill.
    pub fn new(ctx: Ctx, machine: u16) -> Self {
        let mut e_ident = [0u8; SIZEOF_IDENT];
        e_ident[..4].copy_from_slice(ELFMAG);
        e_ident[EI_CLASS] = ctx.container.class();
        e_ident[EI_DATA] = if ctx.is_little_endian() {
            ELFDATA2LSB
        } else {
            ELFDATA2MSB
        };
        e_ident[EI_VERSION] = EV_CURRENT;
        e_ident[EI_OSABI] = ELFOSABI_NONE;
        Header {
            e_ident,
            e_type: ET_REL,
            e_machine: machine,
            e_version: u32::from(EV_CURRENT),
            e_entry: 0,
            e_phoff: 0,
            e_shoff: 0,
            e_flags: 0,
            e_ehsize: Header::size(ctx.container) as u16,
            e_phentsize: 0,
            e_phnum: 0,
            e_shentsize: SectionHeader::size(ctx.container) as u16,
            e_shnum: 0,
            e_shstrndx: 0,
        }
    }

    /// Size of an encoded header for the given container.
    pub fn size(container: Container) -> usize {
        match container {
            Container::Little => SIZEOF_EHDR32,
            Container::Big => SIZEOF_EHDR64,
        }
    }
}

impl<'a> ctx::TryFromCtx<'a, Ctx> for Header {
    type Error = scroll::Error;
    fn try_from_ctx(bytes: &'a [u8], Ctx { container, le }: Ctx) -> result::Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let mut e_ident = [0u8; SIZEOF_IDENT];
        for byte in e_ident.iter_mut() {
            *byte = bytes.gread_with(offset, le)?;
        }
        let e_type = bytes.gread_with(offset, le)?;
        let e_machine = bytes.gread_with(offset, le)?;
        let e_version = bytes.gread_with(offset, le)?;
        let (e_entry, e_phoff, e_shoff) = match container {
            Container::Little => (
                u64::from(bytes.gread_with::<u32>(offset, le)?),
                u64::from(bytes.gread_with::<u32>(offset, le)?),
                u64::from(bytes.gread_with::<u32>(offset, le)?),
            ),
            Container::Big => (
                bytes.gread_with::<u64>(offset, le)?,
                bytes.gread_with::<u64>(offset, le)?,
                bytes.gread_with::<u64>(offset, le)?,
            ),
        };
        Ok((
            Header {
                e_ident,
                e_type,
                e_machine,
                e_version,
                e_entry,
                e_phoff,
                e_shoff,
                e_flags: bytes.gread_with(offset, le)?,
                e_ehsize: bytes.gread_with(offset, le)?,
                e_phentsize: bytes.gread_with(offset, le)?,
                e_phnum: bytes.gread_with(offset, le)?,
                e_shentsize: bytes.gread_with(offset, le)?,
                e_shnum: bytes.gread_with(offset, le)?,
                e_shstrndx: bytes.gread_with(offset, le)?,
            },
            *offset,
        ))
    }
}

impl ctx::TryIntoCtx<Ctx> for Header {
    type Error = scroll::Error;
    fn try_into_ctx(self, bytes: &mut [u8], Ctx { container, le }: Ctx) -> result::Result<usize, Self::Error> {
        let offset = &mut 0;
        for byte in &self.e_ident {
            bytes.gwrite_with(*byte, offset, le)?;
        }
        bytes.gwrite_with(self.e_type, offset, le)?;
        bytes.gwrite_with(self.e_machine, offset, le)?;
        bytes.gwrite_with(self.e_version, offset, le)?;
        match container {
            Container::Little => {
                bytes.gwrite_with(self.e_entry as u32, offset, le)?;
                bytes.gwrite_with(self.e_phoff as u32, offset, le)?;
                bytes.gwrite_with(self.e_shoff as u32, offset, le)?;
            }
            Container::Big => {
                bytes.gwrite_with(self.e_entry, offset, le)?;
                bytes.gwrite_with(self.e_phoff, offset, le)?;
                bytes.gwrite_with(self.e_shoff, offset, le)?;
            }
        }
        bytes.gwrite_with(self.e_flags, offset, le)?;
        bytes.gwrite_with(self.e_ehsize, offset, le)?;
        bytes.gwrite_with(self.e_phentsize, offset, le)?;
        bytes.gwrite_with(self.e_phnum, offset, le)?;
        bytes.gwrite_with(self.e_shentsize, offset, le)?;
        bytes.gwrite_with(self.e_shnum, offset, le)?;
        bytes.gwrite_with(self.e_shstrndx, offset, le)?;
        Ok(*offset)
    }
}

fn shstr_offset(layout: &Layout, name: &str) -> Result<u32> {
    layout.shstrtab.offset_of(name).ok_or_else(|| {
        Error::MalformedImage(format!("section name `{name}` missing from the name table"))
    })
}

/// Serialize the snapshot into one contiguous buffer per the planned
/// layout.
pub(crate) fn encode(snapshot: &SymbolSnapshot, layout: &Layout, machine: u16) -> Result<Vec<u8>> {
    let ctx = layout.ctx;
    let mut buf = vec![0u8; layout.file_size as usize];

    let mut header = Header::new(ctx, machine);
    header.e_shoff = layout.shoff;
    header.e_shnum = layout.shnum;
    header.e_shstrndx = layout.shstrndx;
    buf.pwrite_with(header, 0, ctx)?;

    // Symbol table. Entry 0 stays the reserved null symbol; the buffer is
    // already zeroed but the write keeps the entry explicit.
    let offset = &mut (layout.symtab_offset as usize);
    buf.gwrite_with(Sym::default(), offset, ctx)?;
    for (i, record) in snapshot.iter().enumerate() {
        let sym = Sym {
            st_name: layout.name_offsets[i],
            st_info: record.st_info(),
            st_other: 0,
            st_shndx: layout.shndx[i],
            st_value: record.value,
            st_size: record.size,
        };
        buf.gwrite_with(sym, offset, ctx)?;
    }

    let strtab_bytes = layout.strtab.as_bytes();
    buf[layout.strtab_offset as usize..][..strtab_bytes.len()].copy_from_slice(strtab_bytes);
    let shstrtab_bytes = layout.shstrtab.as_bytes();
    buf[layout.shstrtab_offset as usize..][..shstrtab_bytes.len()].copy_from_slice(shstrtab_bytes);

    // Section header table: null, derived sections, .symtab, .strtab,
    // .shstrtab.
    let offset = &mut (layout.shoff as usize);
    buf.gwrite_with(SectionHeader::default(), offset, ctx)?;
    for section in &layout.sections {
        let shdr = SectionHeader {
            sh_name: shstr_offset(layout, &section.name)?,
            sh_type: section.sh_type,
            sh_flags: section.flags,
            sh_addr: section.addr,
            sh_offset: section.offset,
            sh_size: section.size,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: section.addralign,
            sh_entsize: 0,
        };
        buf.gwrite_with(shdr, offset, ctx)?;
    }
    let table_align = if ctx.is_big() { 8 } else { 4 };
    buf.gwrite_with(
        SectionHeader {
            sh_name: shstr_offset(layout, ".symtab")?,
            sh_type: SHT_SYMTAB,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: layout.symtab_offset,
            sh_size: layout.symtab_size,
            sh_link: u32::from(layout.strtab_index()),
            sh_info: layout.first_nonlocal,
            sh_addralign: table_align,
            sh_entsize: Sym::size(ctx.container) as u64,
        },
        offset,
        ctx,
    )?;
    buf.gwrite_with(
        SectionHeader {
            sh_name: shstr_offset(layout, ".strtab")?,
            sh_type: SHT_STRTAB,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: layout.strtab_offset,
            sh_size: layout.strtab.len() as u64,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 1,
            sh_entsize: 0,
        },
        offset,
        ctx,
    )?;
    buf.gwrite_with(
        SectionHeader {
            sh_name: shstr_offset(layout, ".shstrtab")?,
            sh_type: SHT_STRTAB,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: layout.shstrtab_offset,
            sh_size: layout.shstrtab.len() as u64,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 1,
            sh_entsize: 0,
        },
        offset,
        ctx,
    )?;

    debug!(
        "encoded {} byte image, {} symbol table entries",
        buf.len(),
        snapshot.len() + 1
    );
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout;
    use crate::set::SymbolSet;
    use crate::symbol::SymbolRecord;
    use scroll::Endian;

    fn ctx64() -> Ctx {
        Ctx::new(Container::Big, Endian::Little)
    }

    fn ctx32() -> Ctx {
        Ctx::new(Container::Little, Endian::Little)
    }

    #[test]
    fn sym_round_trips_both_classes() {
        let sym = Sym {
            st_name: 7,
            st_info: 0x12,
            st_other: 0,
            st_shndx: 1,
            st_value: 0x1234_5678,
            st_size: 64,
        };
        for ctx in [ctx64(), ctx32()] {
            let mut buf = [0u8; SIZEOF_SYM64];
            let written = buf.pwrite_with(sym, 0, ctx).unwrap();
            assert_eq!(written, Sym::size(ctx.container));
            let back: Sym = buf.pread_with(0, ctx).unwrap();
            assert_eq!(back, sym);
        }
    }

    #[test]
    fn section_header_round_trips_big_endian() {
        let shdr = SectionHeader {
            sh_name: 1,
            sh_type: SHT_SYMTAB,
            sh_flags: 0,
            sh_addr: 0xffff_ffff_8100_0000,
            sh_offset: 0x40,
            sh_size: 0x180,
            sh_link: 3,
            sh_info: 1,
            sh_addralign: 8,
            sh_entsize: 24,
        };
        let ctx = Ctx::new(Container::Big, Endian::Big);
        let mut buf = [0u8; SIZEOF_SHDR64];
        buf.pwrite_with(shdr, 0, ctx).unwrap();
        let back: SectionHeader = buf.pread_with(0, ctx).unwrap();
        assert_eq!(back, shdr);
    }

    #[test]
    fn header_fields_land_where_the_format_says() {
        let mut header = Header::new(ctx64(), crate::constants::EM_X86_64);
        header.e_shoff = 0x200;
        header.e_shnum = 5;
        header.e_shstrndx = 4;

        let mut buf = [0u8; SIZEOF_EHDR64];
        let written = buf.pwrite_with(header, 0, ctx64()).unwrap();
        assert_eq!(written, SIZEOF_EHDR64);

        assert_eq!(&buf[..4], b"\x7fELF");
        assert_eq!(buf[EI_CLASS], 2);
        assert_eq!(buf[EI_DATA], 1);
        assert_eq!(buf[EI_VERSION], 1);
        // e_type at 0x10, e_machine at 0x12, e_shoff at 0x28.
        assert_eq!(u16::from_le_bytes([buf[0x10], buf[0x11]]), ET_REL);
        assert_eq!(u16::from_le_bytes([buf[0x12], buf[0x13]]), 62);
        assert_eq!(
            u64::from_le_bytes(buf[0x28..0x30].try_into().unwrap()),
            0x200
        );
        // e_shnum at 0x3c, e_shstrndx at 0x3e.
        assert_eq!(u16::from_le_bytes([buf[0x3c], buf[0x3d]]), 5);
        assert_eq!(u16::from_le_bytes([buf[0x3e], buf[0x3f]]), 4);

        let back: Header = buf.pread_with(0, ctx64()).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn encode_places_tables_at_planned_offsets() {
        let mut set = SymbolSet::new();
        set.add(SymbolRecord::function("kmalloc", 0xffff_ffff_8101_2340, 64), false)
            .unwrap();
        let snapshot = set.snapshot();
        let plan = layout::plan(&snapshot, ctx64()).unwrap();
        let buf = encode(&snapshot, &plan, crate::constants::EM_X86_64).unwrap();

        assert_eq!(buf.len() as u64, plan.file_size);
        // Null symbol entry is all zero.
        let null_start = plan.symtab_offset as usize;
        assert!(buf[null_start..null_start + SIZEOF_SYM64].iter().all(|&b| b == 0));
        // The record's name sits in the string table at its offset.
        let name_at = plan.strtab_offset as usize + plan.name_offsets[0] as usize;
        assert_eq!(&buf[name_at..name_at + 7], b"kmalloc");
        assert_eq!(buf[name_at + 7], 0);
    }

    #[test]
    fn encode_is_deterministic() {
        let mut set = SymbolSet::new();
        for (name, value) in [("alpha", 0x1000u64), ("beta", 0x1040), ("gamma", 0x1080)] {
            set.add(SymbolRecord::function(name, value, 0x20), false)
                .unwrap();
        }
        let snapshot = set.snapshot();
        let first = {
            let plan = layout::plan(&snapshot, ctx64()).unwrap();
            encode(&snapshot, &plan, crate::constants::EM_X86_64).unwrap()
        };
        let second = {
            let plan = layout::plan(&snapshot, ctx64()).unwrap();
            encode(&snapshot, &plan, crate::constants::EM_X86_64).unwrap()
        };
        assert_eq!(first, second);
    }
}
