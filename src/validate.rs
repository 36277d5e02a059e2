//! Post-encode structural checks.
//!
//! The validator re-parses the buffer it is handed, with the same context
//! that produced it, and cross-checks every declared count, offset, and
//! index. A malformed image handed to a debugger can crash or hang it, so
//! any violation fails the whole call; nothing here is downgraded or
//! retried.

use crate::constants::{
    EI_CLASS, EI_DATA, EI_VERSION, ELFDATA2LSB, ELFDATA2MSB, ELFMAG, ET_REL, EV_CURRENT, SHF_ALLOC,
    SHN_ABS, SHN_COMMON, SHT_NOBITS, SHT_NULL, SHT_STRTAB, SHT_SYMTAB, sht_to_str,
};
use crate::container::Ctx;
use crate::encode::{Header, SectionHeader, Sym};
use crate::error::{Error, Result};
use crate::symbol::{SymbolBinding, SymbolKind};
use scroll::Pread;

fn malformed<T>(msg: String) -> Result<T> {
    Err(Error::MalformedImage(msg))
}

/// Validate an encoded image against the context that produced it.
pub fn check(bytes: &[u8], ctx: Ctx) -> Result<()> {
    let header: Header = bytes
        .pread_with(0, ctx)
        .map_err(|e| Error::MalformedImage(format!("unreadable header: {e}")))?;

    check_header(bytes, &header, ctx)?;
    let shdrs = read_section_headers(bytes, &header, ctx)?;
    check_null_section(&shdrs)?;
    check_name_tables(bytes, &header, &shdrs)?;
    check_symtab(bytes, &header, &shdrs, ctx)?;
    check_file_ranges(bytes, &header, &shdrs)?;
    check_addr_ranges(&shdrs)?;
    Ok(())
}

fn check_header(bytes: &[u8], header: &Header, ctx: Ctx) -> Result<()> {
    if &header.e_ident[..4] != ELFMAG {
        return malformed(format!("bad magic {:x?}", &header.e_ident[..4]));
    }
    if header.e_ident[EI_CLASS] != ctx.container.class() {
        return malformed(format!(
            "class byte {} does not match the configured container",
            header.e_ident[EI_CLASS]
        ));
    }
    let expected_data = if ctx.is_little_endian() {
        ELFDATA2LSB
    } else {
        ELFDATA2MSB
    };
    if header.e_ident[EI_DATA] != expected_data {
        return malformed(format!(
            "data encoding byte {} does not match the configured endianness",
            header.e_ident[EI_DATA]
        ));
    }
    if header.e_ident[EI_VERSION] != EV_CURRENT || header.e_version != u32::from(EV_CURRENT) {
        return malformed("unsupported version".to_string());
    }
    if header.e_type != ET_REL {
        return malformed(format!("expected a relocatable image, e_type {}", header.e_type));
    }
    if header.e_ehsize as usize != Header::size(ctx.container) {
        return malformed(format!("e_ehsize {} wrong for class", header.e_ehsize));
    }
    if header.e_shentsize as usize != SectionHeader::size(ctx.container) {
        return malformed(format!("e_shentsize {} wrong for class", header.e_shentsize));
    }
    if header.e_shnum < 4 {
        return malformed(format!(
            "{} sections cannot hold the mandatory tables",
            header.e_shnum
        ));
    }
    if header.e_shstrndx >= header.e_shnum {
        return malformed(format!(
            "e_shstrndx {} out of range ({} sections)",
            header.e_shstrndx, header.e_shnum
        ));
    }
    let table_len = header.e_shnum as usize * header.e_shentsize as usize;
    match (header.e_shoff as usize).checked_add(table_len) {
        Some(end) if end <= bytes.len() => Ok(()),
        _ => malformed(format!(
            "section header table at {:#x}+{:#x} exceeds the {:#x} byte image",
            header.e_shoff,
            table_len,
            bytes.len()
        )),
    }
}

fn read_section_headers(bytes: &[u8], header: &Header, ctx: Ctx) -> Result<Vec<SectionHeader>> {
    let mut shdrs = Vec::with_capacity(header.e_shnum as usize);
    let offset = &mut (header.e_shoff as usize);
    for i in 0..header.e_shnum {
        let shdr = bytes
            .gread_with(offset, ctx)
            .map_err(|e| Error::MalformedImage(format!("unreadable section header {i}: {e}")))?;
        shdrs.push(shdr);
    }
    Ok(shdrs)
}

fn check_null_section(shdrs: &[SectionHeader]) -> Result<()> {
    if shdrs[0] != SectionHeader::default() {
        return malformed("section 0 is not the reserved null section".to_string());
    }
    Ok(())
}

/// Checks that a section's `[sh_offset, sh_offset + sh_size)` range lies
/// inside the image and returns its bytes.
fn section_bytes<'a>(bytes: &'a [u8], shdr: &SectionHeader, what: &str) -> Result<&'a [u8]> {
    let start = shdr.sh_offset as usize;
    let end = start.checked_add(shdr.sh_size as usize);
    match end {
        Some(end) if end <= bytes.len() => Ok(&bytes[start..end]),
        _ => malformed(format!(
            "{what} range {:#x}+{:#x} exceeds the {:#x} byte image",
            shdr.sh_offset,
            shdr.sh_size,
            bytes.len()
        )),
    }
}

fn check_strtab(bytes: &[u8], shdr: &SectionHeader, what: &str) -> Result<()> {
    if shdr.sh_type != SHT_STRTAB {
        return malformed(format!(
            "{what} has type {}, expected SHT_STRTAB",
            sht_to_str(shdr.sh_type)
        ));
    }
    let table = section_bytes(bytes, shdr, what)?;
    if table.is_empty() || table[0] != 0 {
        return malformed(format!("{what} does not reserve offset 0 for the empty string"));
    }
    if *table.last().unwrap_or(&1) != 0 {
        return malformed(format!("{what} is not null-terminated"));
    }
    Ok(())
}

fn check_name_tables(bytes: &[u8], header: &Header, shdrs: &[SectionHeader]) -> Result<()> {
    let shstr = &shdrs[header.e_shstrndx as usize];
    check_strtab(bytes, shstr, "section name table")?;
    for (i, shdr) in shdrs.iter().enumerate().skip(1) {
        if u64::from(shdr.sh_name) >= shstr.sh_size {
            return malformed(format!(
                "section {i} name offset {} outside the name table",
                shdr.sh_name
            ));
        }
    }
    Ok(())
}

fn check_symtab(bytes: &[u8], header: &Header, shdrs: &[SectionHeader], ctx: Ctx) -> Result<()> {
    let mut symtabs = shdrs.iter().filter(|s| s.sh_type == SHT_SYMTAB);
    let symtab = match (symtabs.next(), symtabs.next()) {
        (Some(symtab), None) => symtab,
        (None, _) => return malformed("no symbol table".to_string()),
        (Some(_), Some(_)) => return malformed("more than one symbol table".to_string()),
    };

    let entsize = Sym::size(ctx.container) as u64;
    if symtab.sh_entsize != entsize {
        return malformed(format!(
            "symbol table entry size {} wrong for class",
            symtab.sh_entsize
        ));
    }
    if symtab.sh_size % entsize != 0 {
        return malformed(format!(
            "symbol table size {:#x} is not a multiple of its entry size",
            symtab.sh_size
        ));
    }
    let count = symtab.sh_size / entsize;
    if count == 0 {
        return malformed("symbol table lacks the reserved null entry".to_string());
    }
    if u64::from(symtab.sh_info) > count {
        return malformed(format!(
            "sh_info {} exceeds the {} symbol entries",
            symtab.sh_info, count
        ));
    }
    if symtab.sh_link as usize >= shdrs.len() {
        return malformed(format!("symbol table sh_link {} out of range", symtab.sh_link));
    }
    let strtab = &shdrs[symtab.sh_link as usize];
    check_strtab(bytes, strtab, "string table")?;

    let table = section_bytes(bytes, symtab, "symbol table")?;
    let offset = &mut 0usize;
    for i in 0..count {
        let sym: Sym = table
            .gread_with(offset, ctx)
            .map_err(|e| Error::MalformedImage(format!("unreadable symbol {i}: {e}")))?;
        if i == 0 {
            if sym != Sym::default() {
                return malformed("symbol 0 is not the reserved null entry".to_string());
            }
            continue;
        }
        let shndx = sym.st_shndx;
        let resolves = (shndx as usize) < shdrs.len() || shndx == SHN_ABS || shndx == SHN_COMMON;
        if !resolves {
            return malformed(format!(
                "symbol {i} references section {shndx:#x}, which does not resolve"
            ));
        }
        if (shndx as usize) < shdrs.len() && shdrs[shndx as usize].sh_type == SHT_NULL && shndx != 0
        {
            return malformed(format!("symbol {i} references a null section"));
        }
        if u64::from(sym.st_name) >= strtab.sh_size {
            return malformed(format!(
                "symbol {i} name offset {} outside the string table",
                sym.st_name
            ));
        }
        let kind = SymbolKind::from_st_type(sym.st_info & 0xf);
        let binding = SymbolBinding::from_st_bind(sym.st_info >> 4);
        if kind.is_none() || binding.is_none() {
            return malformed(format!(
                "symbol {i} carries an unrepresentable info field {:#x}",
                sym.st_info
            ));
        }
    }
    Ok(())
}

fn check_file_ranges(bytes: &[u8], header: &Header, shdrs: &[SectionHeader]) -> Result<()> {
    // Occupied file ranges: the header, the section header table, and
    // every section that owns bytes. SHT_NOBITS sections own none.
    let mut ranges: Vec<(u64, u64, String)> = vec![
        (0, header.e_ehsize as u64, "file header".to_string()),
        (
            header.e_shoff,
            header.e_shoff + header.e_shnum as u64 * header.e_shentsize as u64,
            "section header table".to_string(),
        ),
    ];
    for (i, shdr) in shdrs.iter().enumerate().skip(1) {
        if shdr.sh_type == SHT_NOBITS || shdr.sh_size == 0 {
            continue;
        }
        section_bytes(bytes, shdr, &format!("section {i}"))?;
        ranges.push((
            shdr.sh_offset,
            shdr.sh_offset + shdr.sh_size,
            format!("section {i}"),
        ));
    }
    ranges.sort_by_key(|r| (r.0, r.1));
    for pair in ranges.windows(2) {
        if pair[1].0 < pair[0].1 {
            return malformed(format!(
                "{} [{:#x}..{:#x}) overlaps {} [{:#x}..{:#x}) in the file",
                pair[0].2, pair[0].0, pair[0].1, pair[1].2, pair[1].0, pair[1].1
            ));
        }
    }
    Ok(())
}

fn check_addr_ranges(shdrs: &[SectionHeader]) -> Result<()> {
    let mut ranges: Vec<(u64, u64, usize)> = shdrs
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, s)| s.sh_flags & SHF_ALLOC != 0 && s.sh_size != 0)
        .map(|(i, s)| (s.sh_addr, s.sh_addr.saturating_add(s.sh_size), i))
        .collect();
    ranges.sort_by_key(|r| (r.0, r.1));
    for pair in ranges.windows(2) {
        if pair[1].0 < pair[0].1 {
            return malformed(format!(
                "sections {} and {} overlap in address space ([{:#x}..{:#x}) vs [{:#x}..{:#x}))",
                pair[0].2, pair[1].2, pair[0].0, pair[0].1, pair[1].0, pair[1].1
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{EM_X86_64, SIZEOF_SYM64};
    use crate::container::Container;
    use crate::encode;
    use crate::layout;
    use crate::set::{SymbolSet, SymbolSnapshot};
    use crate::symbol::SymbolRecord;
    use scroll::Endian;

    fn ctx64() -> Ctx {
        Ctx::new(Container::Big, Endian::Little)
    }

    fn build(set: &SymbolSet) -> (Vec<u8>, crate::layout::Layout, SymbolSnapshot) {
        let snapshot = set.snapshot();
        let plan = layout::plan(&snapshot, ctx64()).unwrap();
        let bytes = encode::encode(&snapshot, &plan, EM_X86_64).unwrap();
        (bytes, plan, snapshot)
    }

    #[test]
    fn accepts_a_freshly_encoded_image() {
        let mut set = SymbolSet::new();
        set.add(SymbolRecord::function("kmalloc", 0xffff_ffff_8101_2340, 64), false)
            .unwrap();
        set.add(SymbolRecord::object("jiffies", 0xffff_ffff_8200_0000, 8), false)
            .unwrap();
        let (bytes, _, _) = build(&set);
        check(&bytes, ctx64()).unwrap();
    }

    #[test]
    fn accepts_the_minimal_empty_image() {
        let (bytes, _, _) = build(&SymbolSet::new());
        check(&bytes, ctx64()).unwrap();
    }

    #[test]
    fn rejects_truncation() {
        let (bytes, _, _) = build(&SymbolSet::new());
        assert!(matches!(
            check(&bytes[..bytes.len() - 1], ctx64()),
            Err(Error::MalformedImage(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_shstrndx() {
        let (mut bytes, _, _) = build(&SymbolSet::new());
        // e_shstrndx lives at 0x3e in a 64-bit header.
        bytes[0x3e] = 0xff;
        assert!(matches!(
            check(&bytes, ctx64()),
            Err(Error::MalformedImage(_))
        ));
    }

    #[test]
    fn rejects_dangling_symbol_section_index() {
        let mut set = SymbolSet::new();
        set.add(SymbolRecord::function("f", 0x1000, 16), false)
            .unwrap();
        let (mut bytes, plan, _) = build(&set);
        // st_shndx of the first real entry sits 6 bytes into it.
        let pos = plan.symtab_offset as usize + SIZEOF_SYM64 + 6;
        bytes[pos] = 0x40;
        bytes[pos + 1] = 0x00;
        assert!(matches!(
            check(&bytes, ctx64()),
            Err(Error::MalformedImage(_))
        ));
    }

    #[test]
    fn rejects_unrepresentable_info_fields() {
        let mut set = SymbolSet::new();
        set.add(SymbolRecord::function("f", 0x1000, 16), false)
            .unwrap();
        let (mut bytes, plan, _) = build(&set);
        // st_info of the first real entry sits 4 bytes into it.
        bytes[plan.symtab_offset as usize + SIZEOF_SYM64 + 4] = 0xff;
        assert!(matches!(
            check(&bytes, ctx64()),
            Err(Error::MalformedImage(_))
        ));
    }

    #[test]
    fn rejects_unterminated_string_table() {
        let mut set = SymbolSet::new();
        set.add(SymbolRecord::function("f", 0x1000, 16), false)
            .unwrap();
        let (mut bytes, plan, _) = build(&set);
        let last = plan.strtab_offset as usize + plan.strtab.len() - 1;
        bytes[last] = b'x';
        assert!(matches!(
            check(&bytes, ctx64()),
            Err(Error::MalformedImage(_))
        ));
    }

    #[test]
    fn rejects_clobbered_null_symbol() {
        let mut set = SymbolSet::new();
        set.add(SymbolRecord::function("f", 0x1000, 16), false)
            .unwrap();
        let (mut bytes, plan, _) = build(&set);
        bytes[plan.symtab_offset as usize] = 1;
        assert!(matches!(
            check(&bytes, ctx64()),
            Err(Error::MalformedImage(_))
        ));
    }

    #[test]
    fn rejects_wrong_context() {
        let (bytes, _, _) = build(&SymbolSet::new());
        let be = Ctx::new(Container::Big, Endian::Big);
        assert!(matches!(check(&bytes, be), Err(Error::MalformedImage(_))));
    }
}
