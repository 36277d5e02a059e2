//! Groups symbols into section descriptors and fixes the file layout.
//!
//! Symbol addresses are caller-supplied live addresses from the process or
//! binary under inspection; the planner never relocates them. It only
//! derives which section covers each named group's contiguous address
//! range, and assigns file offsets and alignment around that immutable
//! address space once the string and symbol tables are sized.

use crate::constants::{
    SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE, SHN_ABS, SHN_LORESERVE, SHN_UNDEF, SHT_NOBITS,
};
use crate::container::Ctx;
use crate::encode::{Header, SectionHeader, Sym};
use crate::error::{Error, Result};
use crate::section::SectionDescriptor;
use crate::set::SymbolSnapshot;
use crate::strtab::StrtabBuilder;
use crate::symbol::{SectionRef, SymbolBinding, SymbolKind};
use log::debug;
use std::collections::HashMap;

/// A fully planned image: derived descriptors, per-symbol section indices,
/// sized name tables, and every table offset the encoder will honor.
#[derive(Debug)]
pub struct Layout {
    pub ctx: Ctx,
    /// Derived sections in first-appearance order of their hints.
    pub sections: Vec<SectionDescriptor>,
    /// `st_shndx` per snapshot record, parallel to the snapshot order.
    pub shndx: Vec<u16>,
    /// Symbol name offsets into `strtab`, parallel to the snapshot order.
    pub name_offsets: Vec<u32>,
    pub strtab: StrtabBuilder,
    pub shstrtab: StrtabBuilder,
    pub symtab_offset: u64,
    pub symtab_size: u64,
    pub strtab_offset: u64,
    pub shstrtab_offset: u64,
    /// Section header table offset.
    pub shoff: u64,
    pub shnum: u16,
    pub shstrndx: u16,
    /// `sh_info` of `.symtab`: one past the leading run of local symbols.
    pub first_nonlocal: u32,
    pub file_size: u64,
}

impl Layout {
    /// Section header index of `.symtab`.
    pub fn symtab_index(&self) -> u16 {
        self.sections.len() as u16 + 1
    }

    /// Section header index of `.strtab`.
    pub fn strtab_index(&self) -> u16 {
        self.sections.len() as u16 + 2
    }
}

struct Group {
    name: String,
    lo: u64,
    hi: u64,
    has_func: bool,
    has_data: bool,
}

fn align_up(offset: u64, align: u64) -> u64 {
    (offset + align - 1) & !(align - 1)
}

/// Plan the layout for one snapshot under the given encoding context.
pub fn plan(snapshot: &SymbolSnapshot, ctx: Ctx) -> Result<Layout> {
    // A 32-bit image cannot hold 64-bit values; catch that per record
    // rather than truncating silently in the encoder.
    if !ctx.is_big() {
        for record in snapshot.iter() {
            let value_fits = record.value <= u64::from(u32::MAX);
            let size_fits = record.size <= u64::from(u32::MAX);
            if !value_fits || !size_fits || record.value + record.size > 1 << 32 {
                return Err(Error::InvalidRecord {
                    name: record.name.clone(),
                    reason: "address range does not fit a 32-bit image".to_string(),
                });
            }
        }
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut group_of: HashMap<String, usize> = HashMap::new();
    let mut shndx = Vec::with_capacity(snapshot.len());
    let mut strtab = StrtabBuilder::new();
    let mut name_offsets = Vec::with_capacity(snapshot.len());

    for record in snapshot.iter() {
        name_offsets.push(strtab.add(&record.name));
        match &record.section {
            SectionRef::Named(name) => {
                let idx = match group_of.get(name) {
                    Some(&idx) => idx,
                    None => {
                        group_of.insert(name.clone(), groups.len());
                        groups.push(Group {
                            name: name.clone(),
                            lo: record.value,
                            hi: record.extent_end(),
                            has_func: false,
                            has_data: false,
                        });
                        groups.len() - 1
                    }
                };
                let group = &mut groups[idx];
                group.lo = group.lo.min(record.value);
                group.hi = group.hi.max(record.extent_end());
                match record.kind {
                    SymbolKind::Func => group.has_func = true,
                    SymbolKind::Object | SymbolKind::Common | SymbolKind::Tls => {
                        group.has_data = true
                    }
                    SymbolKind::NoType => {}
                }
                shndx.push(idx as u16 + 1);
            }
            SectionRef::Absolute => shndx.push(SHN_ABS),
            SectionRef::Undefined => shndx.push(SHN_UNDEF),
        }
    }

    if groups.len() + 4 >= SHN_LORESERVE as usize {
        return Err(Error::LayoutConflict(format!(
            "{} derived sections exceed the section index space",
            groups.len()
        )));
    }

    // Two caller-declared sections claiming the same addresses is a caller
    // contradiction, never resolved silently.
    let mut by_addr: Vec<&Group> = groups.iter().collect();
    by_addr.sort_by_key(|g| (g.lo, g.hi));
    for pair in by_addr.windows(2) {
        if pair[1].lo < pair[0].hi {
            return Err(Error::LayoutConflict(format!(
                "sections `{}` [{:#x}..{:#x}) and `{}` [{:#x}..{:#x}) overlap in address space",
                pair[0].name, pair[0].lo, pair[0].hi, pair[1].name, pair[1].lo, pair[1].hi,
            )));
        }
    }

    let mut shstrtab = StrtabBuilder::new();
    let mut sections = Vec::with_capacity(groups.len());
    for group in &groups {
        shstrtab.add(&group.name);
        let mut flags = SHF_ALLOC;
        if group.has_func {
            flags |= SHF_EXECINSTR;
        } else if group.has_data {
            flags |= SHF_WRITE;
        }
        sections.push(SectionDescriptor {
            name: group.name.clone(),
            addr: group.lo,
            size: group.hi - group.lo,
            sh_type: SHT_NOBITS,
            flags,
            addralign: 1,
            offset: 0,
        });
    }
    shstrtab.add(".symtab");
    shstrtab.add(".strtab");
    shstrtab.add(".shstrtab");

    if strtab.len() > u32::MAX as usize || shstrtab.len() > u32::MAX as usize {
        return Err(Error::LayoutConflict(
            "string table exceeds 32-bit offsets".to_string(),
        ));
    }

    let first_nonlocal = 1 + snapshot
        .iter()
        .take_while(|r| r.binding == SymbolBinding::Local)
        .count() as u32;

    // File offsets, computed now that both name tables and the symbol
    // table are sized: header, symbol table, string tables, section
    // positions, then the section header table.
    let table_align: u64 = if ctx.is_big() { 8 } else { 4 };
    let sym_size = Sym::size(ctx.container) as u64;

    let mut offset = align_up(Header::size(ctx.container) as u64, table_align);
    let symtab_offset = offset;
    let symtab_size = (snapshot.len() as u64 + 1) * sym_size;
    offset += symtab_size;
    let strtab_offset = offset;
    offset += strtab.len() as u64;
    let shstrtab_offset = offset;
    offset += shstrtab.len() as u64;

    // SHT_NOBITS sections carry no bytes; their offsets only mark where
    // content would sit.
    for section in &mut sections {
        section.offset = align_up(offset, section.addralign.max(1));
    }

    let shoff = align_up(offset, table_align);
    let shnum = (sections.len() + 4) as u16;
    let shstrndx = shnum - 1;
    let file_size = shoff + u64::from(shnum) * SectionHeader::size(ctx.container) as u64;

    debug!(
        "planned {} derived section(s) for {} symbol(s), {} byte image",
        sections.len(),
        snapshot.len(),
        file_size
    );

    Ok(Layout {
        ctx,
        sections,
        shndx,
        name_offsets,
        strtab,
        shstrtab,
        symtab_offset,
        symtab_size,
        strtab_offset,
        shstrtab_offset,
        shoff,
        shnum,
        shstrndx,
        first_nonlocal,
        file_size,
    })
}
