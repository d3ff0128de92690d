// 符号解析：名字 -> 地址/大小/所属模块，以及地址 -> 符号
// 依次尝试动态符号 hash 查找、解码名线性扫描、磁盘 .symtab
use crate::demangle;
use crate::elf::{DefinedSym, Elf, file};
use crate::errno::Errno;
use crate::linux::modules::{self, ModuleInfo};
use crate::log;
use std::ffi::CString;

use super::rules;

// 一个已解析的函数符号
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    name: String,
    demangled: Option<String>,
    addr: usize,
    size: usize,
    module: String,
    bias: usize,
}

impl Symbol {
    // 在全部已加载模块中按加载顺序查找，主程序优先
    pub fn resolve(name: &str) -> Result<Self, Errno> {
        Self::lookup(None, name)
    }

    // 仅在匹配 module_rule 的模块中查找
    pub fn resolve_in(module_rule: &str, name: &str) -> Result<Self, Errno> {
        Self::lookup(Some(module_rule), name)
    }

    // 反查包含 addr 的函数符号
    pub fn at(addr: usize) -> Result<Self, Errno> {
        let module = modules::module_containing(addr).ok_or(Errno::NoSym)?;
        if let Ok(elf) = module.elf()
            && let Some((raw, def)) = elf.find_containing(addr)
        {
            return Ok(Self::from_defined(&module, &elf, &raw, def));
        }
        let vaddr = addr.wrapping_sub(module.bias) as u64;
        match file::find_containing(&module.pathname, vaddr) {
            Ok(Some(entry)) => Ok(Self::new(
                &module,
                &entry.name,
                module.bias + entry.value as usize,
                entry.size as usize,
            )),
            _ => Err(Errno::NoSym),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn demangled(&self) -> Option<&str> {
        self.demangled.as_deref()
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn bias(&self) -> usize {
        self.bias
    }

    fn new(module: &ModuleInfo, raw: &str, addr: usize, size: usize) -> Self {
        Self {
            name: raw.to_string(),
            demangled: demangle::demangle(raw),
            addr,
            size,
            module: module.pathname.clone(),
            bias: module.bias,
        }
    }

    // IFUNC 的 st_value 是解析器，真实实现地址交给动态链接器解析
    fn from_defined(module: &ModuleInfo, elf: &Elf, raw: &str, def: DefinedSym) -> Self {
        if !def.is_ifunc {
            return Self::new(module, raw, def.addr, def.size);
        }
        let Some(addr) = dlsym_default(raw) else {
            log::warn(format_args!("IFUNC {} not resolvable, using resolver", raw));
            return Self::new(module, raw, def.addr, def.size);
        };
        let size = containing_size(module, elf, addr);
        log::debug(format_args!(
            "IFUNC {} resolved to 0x{:x} size {}",
            raw, addr, size
        ));
        Self::new(module, raw, addr, size)
    }

    fn lookup(module_rule: Option<&str>, name: &str) -> Result<Self, Errno> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Errno::InvalidArg);
        }
        let candidates: Vec<ModuleInfo> = modules::loaded_modules()
            .into_iter()
            .filter(|module| !rules::should_ignore(&module.pathname))
            .filter(|module| {
                module_rule.is_none_or(|rule| rules::module_match(&module.pathname, module.bias, rule))
            })
            .collect();
        if candidates.is_empty() {
            log::debug(format_args!("no module matches {:?}", module_rule));
            return Err(Errno::NoSym);
        }

        if !demangle::needs_linear_search(name) {
            for module in &candidates {
                let Ok(elf) = module.elf() else {
                    continue;
                };
                if let Some(def) = elf.find_defined(name) {
                    return Ok(Self::from_defined(module, &elf, name, def));
                }
            }
        }

        for module in &candidates {
            let Ok(elf) = module.elf() else {
                continue;
            };
            if let Some((raw, def)) = elf.find_defined_demangled(name) {
                return Ok(Self::from_defined(module, &elf, &raw, def));
            }
        }

        // 未导出的函数只出现在磁盘 .symtab 中
        for module in &candidates {
            match file::find_symbol(&module.pathname, name) {
                Ok(Some(entry)) => {
                    return Ok(Self::new(
                        module,
                        &entry.name,
                        module.bias + entry.value as usize,
                        entry.size as usize,
                    ));
                }
                Ok(None) => {}
                Err(err) => log::debug(format_args!(
                    "symtab of {} unavailable: {}",
                    module.pathname, err
                )),
            }
        }

        log::debug(format_args!("symbol {} not found", name));
        Err(Errno::NoSym)
    }
}

fn dlsym_default(raw: &str) -> Option<usize> {
    let cname = CString::new(raw).ok()?;
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr()) } as usize;
    (addr != 0).then_some(addr)
}

// IFUNC 实现通常是模块内的本地符号，大小需从包含它的符号获取
fn containing_size(module: &ModuleInfo, elf: &Elf, addr: usize) -> usize {
    if let Some((_, def)) = elf.find_containing(addr)
        && !def.is_ifunc
        && def.addr == addr
    {
        return def.size;
    }
    let vaddr = addr.wrapping_sub(module.bias) as u64;
    match file::find_containing(&module.pathname, vaddr) {
        Ok(Some(entry)) if entry.value == vaddr => entry.size as usize,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn resolves_libc_export() {
        let sym = Symbol::resolve("getppid").expect("getppid");
        assert_eq!(sym.name(), "getppid");
        assert!(sym.module().contains("libc"));
        assert_eq!(sym.demangled(), None);
        let again = Symbol::at(sym.addr()).expect("reverse lookup");
        assert_eq!(again.addr(), sym.addr());
    }

    #[test]
    fn resolves_own_function_from_symtab() {
        let sym = Symbol::resolve("srx_mock_test_stomp_target").expect("fixture");
        assert_eq!(sym.addr(), testing::srx_mock_test_stomp_target as usize);
        assert!(sym.size() > 0);
        assert!(modules::module_containing(sym.addr()).is_some_and(|module| module.is_main));
    }

    #[test]
    fn resolves_cpp_name_by_demangled_form() {
        let by_short = Symbol::resolve("A::Cpp::Namespace::withAFunction").expect("short name");
        let by_full = Symbol::resolve("A::Cpp::Namespace::withAFunction(int, int)").expect("full name");
        assert_eq!(by_short.addr(), by_full.addr());
        assert_eq!(by_short.name(), testing::CPP_MANGLED);
        assert_eq!(
            by_short.demangled(),
            Some("A::Cpp::Namespace::withAFunction(int, int)")
        );
    }

    #[test]
    fn module_rule_restricts_search() {
        assert!(Symbol::resolve_in("libc.so.6", "getppid").is_ok());
        assert_eq!(
            Symbol::resolve_in("/nonexistent/libnothing.so", "getppid"),
            Err(Errno::NoSym)
        );
    }

    #[test]
    fn unknown_and_empty_names_fail() {
        assert_eq!(
            Symbol::resolve("srx_mock_no_such_function_anywhere"),
            Err(Errno::NoSym)
        );
        assert_eq!(Symbol::resolve("  "), Err(Errno::InvalidArg));
    }
}
