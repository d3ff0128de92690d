// 磁盘 ELF 文件读取：按节名扫描重定位表，查找 .symtab 中的本地/未导出符号

use super::{RelocationSlot, RelocationTable, SlotKind};
use crate::demangle;
use crate::errno::Errno;
use crate::log;
use crate::runtime::MutexPoisonRecover;
use object::Endianness;
use object::elf;
use object::read::elf::{FileHeader, SectionHeader, Sym};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;
use std::sync::{Arc, Mutex};

type Header = elf::FileHeader64<Endianness>;

const RELOC_SECTIONS: [&str; 4] = [".rela.plt", ".rel.plt", ".rela.dyn", ".rel.dyn"];

// 符号表中一个已定义的函数符号，value 为未加 bias 的虚拟地址
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymtabEntry {
    pub name: String,
    pub value: u64,
    pub size: u64,
}

// 文件身份；同一路径被替换后身份改变，缓存随之失效
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
    len: u64,
    mtime: i64,
    mtime_nsec: i64,
}

impl FileIdentity {
    fn of(path: &str) -> Result<Self, Errno> {
        let meta = std::fs::metadata(path).map_err(|err| {
            log::warn(format_args!("stat {} failed: {}", path, err));
            Errno::ReadElf
        })?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
            len: meta.len(),
            mtime: meta.mtime(),
            mtime_nsec: meta.mtime_nsec(),
        })
    }
}

// 按路径缓存已解析的函数符号，命中要求文件身份一致
static SYMTAB_CACHE: Lazy<Mutex<HashMap<String, (FileIdentity, Arc<Vec<SymtabEntry>>)>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn read_file(path: &str) -> Result<Vec<u8>, Errno> {
    std::fs::read(path).map_err(|err| {
        log::warn(format_args!("read {} failed: {}", path, err));
        Errno::ReadElf
    })
}

fn format_err(err: object::read::Error) -> Errno {
    log::warn(format_args!("ELF parse failed: {}", err));
    Errno::Format
}

// 扫描 .rela.plt / .rel.plt / .rela.dyn / .rel.dyn，缺失的节区直接跳过
// 条目的符号通过 sh_link 指向的符号表解析，解析失败的条目跳过
pub fn read_relocations(path: &str) -> Result<RelocationTable, Errno> {
    let data = read_file(path)?;
    let data = data.as_slice();
    let header = Header::parse(data).map_err(format_err)?;
    let endian = header.endian().map_err(format_err)?;
    let sections = header.sections(endian, data).map_err(format_err)?;

    let mut table = RelocationTable::new();
    for section in sections.iter() {
        let Ok(name) = sections.section_name(endian, section) else {
            continue;
        };
        let Ok(name) = std::str::from_utf8(name) else {
            continue;
        };
        if !RELOC_SECTIONS.contains(&name) {
            continue;
        }
        let kind = SlotKind::of_section(name);

        let mut entries: Vec<(u64, u32, u32)> = Vec::new();
        let link = if let Some((relas, link)) = section.rela(endian, data).map_err(format_err)? {
            for rela in relas {
                entries.push((
                    rela.r_offset.get(endian),
                    rela.r_sym(endian, false),
                    rela.r_type(endian, false),
                ));
            }
            link
        } else if let Some((rels, link)) = section.rel(endian, data).map_err(format_err)? {
            for rel in rels {
                entries.push((rel.r_offset.get(endian), rel.r_sym(endian), rel.r_type(endian)));
            }
            link
        } else {
            continue;
        };

        let symbols = sections
            .symbol_table_by_index(endian, data, link)
            .map_err(format_err)?;
        let syms = symbols.symbols();
        for (r_offset, r_sym, r_type) in entries {
            if r_sym == 0 {
                continue;
            }
            let Some(sym) = syms.get(r_sym as usize) else {
                continue;
            };
            let Ok(sym_name) = sym.name(endian, symbols.strings()) else {
                continue;
            };
            if sym_name.is_empty() {
                continue;
            }
            table.insert(RelocationSlot {
                symbol: String::from_utf8_lossy(sym_name).into_owned(),
                slot_addr: r_offset as usize,
                kind,
                section: name.to_string(),
                r_type,
            });
        }
    }

    log::debug(format_args!("{}: {} relocation slots", path, table.len()));
    Ok(table)
}

// 读取 .symtab（缺失时退回 .dynsym）中的全部已定义函数符号
fn load_functions(path: &str) -> Result<Arc<Vec<SymtabEntry>>, Errno> {
    let identity = FileIdentity::of(path)?;
    if let Some((cached_identity, cached)) = SYMTAB_CACHE.lock_or_poison().get(path)
        && *cached_identity == identity
    {
        return Ok(Arc::clone(cached));
    }

    let data = read_file(path)?;
    let data = data.as_slice();
    let header = Header::parse(data).map_err(format_err)?;
    let endian = header.endian().map_err(format_err)?;
    let sections = header.sections(endian, data).map_err(format_err)?;

    let mut symbols = sections
        .symbols(endian, data, elf::SHT_SYMTAB)
        .map_err(format_err)?;
    if symbols.is_empty() {
        symbols = sections
            .symbols(endian, data, elf::SHT_DYNSYM)
            .map_err(format_err)?;
    }

    let mut out = Vec::new();
    for sym in symbols.symbols() {
        let st_type = sym.st_type();
        if st_type != elf::STT_FUNC && st_type != elf::STT_GNU_IFUNC && st_type != elf::STT_NOTYPE
        {
            continue;
        }
        if sym.st_shndx(endian) == elf::SHN_UNDEF || sym.st_value(endian) == 0 {
            continue;
        }
        let Ok(name) = sym.name(endian, symbols.strings()) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        out.push(SymtabEntry {
            name: String::from_utf8_lossy(name).into_owned(),
            value: sym.st_value(endian),
            size: sym.st_size(endian),
        });
    }

    let out = Arc::new(out);
    log::debug(format_args!("{}: {} function symbols", path, out.len()));
    SYMTAB_CACHE
        .lock_or_poison()
        .insert(path.to_string(), (identity, Arc::clone(&out)));
    Ok(out)
}

// 按原始名或解码名查找函数符号，原始名精确命中优先
pub fn find_symbol(path: &str, name: &str) -> Result<Option<SymtabEntry>, Errno> {
    let functions = load_functions(path)?;
    if let Some(entry) = functions.iter().find(|entry| entry.name == name) {
        return Ok(Some(entry.clone()));
    }
    Ok(functions
        .iter()
        .find(|entry| demangle::matches(&entry.name, name))
        .cloned())
}

// 查找包含虚拟地址 vaddr 的函数符号
pub fn find_containing(path: &str, vaddr: u64) -> Result<Option<SymtabEntry>, Errno> {
    let functions = load_functions(path)?;
    Ok(functions
        .iter()
        .filter(|entry| {
            if entry.size == 0 {
                entry.value == vaddr
            } else {
                vaddr >= entry.value && vaddr < entry.value + entry.size
            }
        })
        .max_by_key(|entry| entry.size)
        .cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_exe() -> String {
        std::fs::read_link("/proc/self/exe")
            .expect("self exe")
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn missing_file_is_read_error() {
        assert_eq!(
            read_relocations("/nonexistent/srx_mock.so").err(),
            Some(Errno::ReadElf)
        );
    }

    #[test]
    fn non_elf_file_is_format_error() {
        assert_eq!(read_relocations("/proc/self/cmdline").err(), Some(Errno::Format));
    }

    #[test]
    fn test_binary_imports_libc() {
        let table = read_relocations(&self_exe()).expect("relocations");
        assert!(!table.is_empty());
        let sections = table.sections_for("getppid");
        assert!(!sections.is_empty());
        assert!(sections.iter().all(|s| s.starts_with(".rel")));
    }

    #[test]
    fn symtab_lookup_by_name_and_address() {
        let path = self_exe();
        let entry = find_symbol(&path, "srx_mock_test_stomp_target")
            .expect("symtab")
            .expect("symbol present");
        assert!(entry.size > 0);
        let inner = find_containing(&path, entry.value + 1)
            .expect("symtab")
            .expect("containing symbol");
        assert_eq!(inner.name, entry.name);
    }

    #[test]
    fn replaced_file_is_parsed_again() {
        let libc_path = crate::runtime::resolve::Symbol::resolve("getppid")
            .expect("getppid")
            .module()
            .to_string();
        let path = std::env::temp_dir()
            .join(format!("srx_mock_symtab_{}", std::process::id()))
            .to_string_lossy()
            .into_owned();

        std::fs::copy(self_exe(), &path).expect("copy test binary");
        let found = find_symbol(&path, "srx_mock_test_stomp_target");
        std::fs::remove_file(&path).expect("remove copy");
        assert!(found.expect("symtab").is_some());

        std::fs::copy(&libc_path, &path).expect("copy libc");
        let stale = find_symbol(&path, "srx_mock_test_stomp_target");
        let fresh = find_symbol(&path, "getppid");
        let _ = std::fs::remove_file(&path);
        assert_eq!(stale, Ok(None));
        assert!(fresh.expect("symtab").is_some());
        assert_eq!(find_symbol(&path, "getppid").err(), Some(Errno::ReadElf));
    }
}
