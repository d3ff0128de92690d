use crate::elf::RelocationTable;
use crate::errno::Errno;
use crate::linux::modules;
use crate::log;
use crate::runtime;
use crate::runtime::resolve::Symbol;
use std::ffi::c_void;

// mock 句柄的唯一标识，由运行时分配
pub type MockStub = u64;

// Got: 改写调用方的 GOT slot，只拦截跨模块的间接调用
// Stomp: 覆盖函数入口，拦截所有调用路径
// Pre: 替换调用方持有的函数指针
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Method {
    Got,
    Stomp,
    Pre,
}

impl Method {
    pub fn from_name(name: &str) -> Result<Self, Errno> {
        match name.to_ascii_lowercase().as_str() {
            "got" | "plt" => Ok(Self::Got),
            "stomp" => Ok(Self::Stomp),
            "pre" => Ok(Self::Pre),
            _ => Err(Errno::InvalidArg),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Got => "got",
            Self::Stomp => "stomp",
            Self::Pre => "pre",
        }
    }
}

pub fn get_version() -> String {
    crate::version::version_str_full()
}

pub fn get_debug() -> bool {
    runtime::get_debug()
}

pub fn set_debug(debug: bool) {
    runtime::set_debug(debug)
}

// 未显式指定方式时使用的补丁方式，None 表示自动选择
pub fn get_default_method() -> Option<Method> {
    runtime::get_default_method()
}

pub fn set_default_method(method: Option<Method>) -> Result<(), Errno> {
    runtime::set_default_method(method)
}

pub fn resolve(name: &str) -> Result<Symbol, Errno> {
    Symbol::resolve(name)
}

pub fn resolve_in(module_rule: &str, name: &str) -> Result<Symbol, Errno> {
    Symbol::resolve_in(module_rule, name)
}

pub fn resolve_addr(addr: usize) -> Result<Symbol, Errno> {
    Symbol::at(addr)
}

// 汇总已加载模块的重定位 slot；module_rule 为 None 时扫描全部模块
pub fn relocations(module_rule: Option<&str>) -> RelocationTable {
    let mut table = RelocationTable::new();
    for module in modules::loaded_modules() {
        if runtime::should_ignore(&module.pathname) {
            continue;
        }
        if module_rule.is_some_and(|rule| !runtime::module_match(&module.pathname, module.bias, rule)) {
            continue;
        }
        match module.elf() {
            Ok(elf) => table.merge(elf.relocation_table()),
            Err(err) => log::debug(format_args!("skip {}: {}", module.pathname, err)),
        }
    }
    table
}

// 读取磁盘上 ELF 文件的重定位 slot，slot_addr 为未加 bias 的虚拟地址
pub fn relocations_from_file(path: &str) -> Result<RelocationTable, Errno> {
    RelocationTable::from_file(path)
}

pub fn create(
    symbol_name: &str,
    replacement: *mut c_void,
    method: Option<Method>,
) -> Result<MockStub, Errno> {
    let symbol = Symbol::resolve(symbol_name)?;
    runtime::create(&symbol, replacement as usize, method, None)
}

// 只改写 caller_rule 匹配的调用方模块中的 slot
pub fn create_in(
    caller_rule: &str,
    symbol_name: &str,
    replacement: *mut c_void,
) -> Result<MockStub, Errno> {
    if caller_rule.is_empty() {
        return Err(Errno::InvalidArg);
    }
    let symbol = Symbol::resolve(symbol_name)?;
    runtime::create(&symbol, replacement as usize, Some(Method::Got), Some(caller_rule))
}

pub fn create_for(
    symbol: &Symbol,
    replacement: *mut c_void,
    method: Option<Method>,
) -> Result<MockStub, Errno> {
    runtime::create(symbol, replacement as usize, method, None)
}

// slot 为调用方保存函数指针的位置
pub fn create_pre(slot: *mut *mut c_void, replacement: *mut c_void) -> Result<MockStub, Errno> {
    runtime::create_pre(slot as usize, replacement as usize)
}

pub fn enable(stub: MockStub) -> Result<(), Errno> {
    runtime::enable(stub)
}

pub fn disable(stub: MockStub) -> Result<(), Errno> {
    runtime::disable(stub)
}

// 可重复调用，可按任意顺序销毁同一符号上的多个 mock
pub fn destroy(stub: MockStub) -> Result<(), Errno> {
    runtime::destroy(stub)
}

pub fn is_enabled(stub: MockStub) -> Result<bool, Errno> {
    runtime::is_enabled(stub)
}

// 以原始实现地址调用 f，始终到达未打补丁的原函数
pub fn with_real<R, F>(stub: MockStub, f: F) -> Result<R, Errno>
where
    F: FnOnce(*mut c_void) -> R,
{
    runtime::with_real(stub, |real| f(real as *mut c_void))
}

// 销毁所有 mock 并撤下全部补丁
pub fn clear() {
    runtime::clear()
}

// 作用域内的 mock：创建时处于禁用状态，Drop 时销毁
#[derive(Debug)]
pub struct Mock {
    stub: MockStub,
    method: Method,
    symbol: Option<Symbol>,
}

impl Mock {
    pub fn new(symbol_name: &str, replacement: *mut c_void) -> Result<Self, Errno> {
        Self::from_stub(create(symbol_name, replacement, None)?)
    }

    pub fn with_method(
        symbol_name: &str,
        replacement: *mut c_void,
        method: Method,
    ) -> Result<Self, Errno> {
        Self::from_stub(create(symbol_name, replacement, Some(method))?)
    }

    pub fn for_symbol(
        symbol: &Symbol,
        replacement: *mut c_void,
        method: Option<Method>,
    ) -> Result<Self, Errno> {
        Self::from_stub(create_for(symbol, replacement, method)?)
    }

    pub fn in_callers(
        caller_rule: &str,
        symbol_name: &str,
        replacement: *mut c_void,
    ) -> Result<Self, Errno> {
        Self::from_stub(create_in(caller_rule, symbol_name, replacement)?)
    }

    pub fn at_slot(slot: *mut *mut c_void, replacement: *mut c_void) -> Result<Self, Errno> {
        Self::from_stub(create_pre(slot, replacement)?)
    }

    fn from_stub(stub: MockStub) -> Result<Self, Errno> {
        let queried = runtime::method_of(stub).and_then(|method| {
            runtime::symbol_of(stub).map(|symbol| (method, symbol))
        });
        match queried {
            Ok((method, symbol)) => Ok(Self {
                stub,
                method,
                symbol,
            }),
            Err(err) => {
                let _ = runtime::destroy(stub);
                Err(err)
            }
        }
    }

    pub fn stub(&self) -> MockStub {
        self.stub
    }

    pub fn method(&self) -> Method {
        self.method
    }

    // PRE 方式没有目标符号
    pub fn symbol(&self) -> Option<&Symbol> {
        self.symbol.as_ref()
    }

    pub fn enable(&self) -> Result<(), Errno> {
        runtime::enable(self.stub)
    }

    pub fn disable(&self) -> Result<(), Errno> {
        runtime::disable(self.stub)
    }

    pub fn is_enabled(&self) -> Result<bool, Errno> {
        runtime::is_enabled(self.stub)
    }

    // 同一目标上仍存活的 mock 数量
    pub fn depth(&self) -> Result<usize, Errno> {
        runtime::depth_of(self.stub)
    }

    // 启用并返回守卫，守卫离开作用域时自动禁用
    pub fn enabled(&self) -> Result<MockGuard<'_>, Errno> {
        self.enable()?;
        Ok(MockGuard { mock: self })
    }

    pub fn real<R, F>(&self, f: F) -> Result<R, Errno>
    where
        F: FnOnce(*mut c_void) -> R,
    {
        with_real(self.stub, f)
    }

    // 原始实现地址；STOMP 方式下补丁生效期间不能直接调用，应使用 real
    pub fn original(&self) -> Result<*mut c_void, Errno> {
        runtime::original_of(self.stub).map(|addr| addr as *mut c_void)
    }

    // 显式销毁并取得结果；随后的 Drop 不再有副作用
    pub fn destroy(self) -> Result<(), Errno> {
        runtime::destroy(self.stub)
    }
}

impl Drop for Mock {
    fn drop(&mut self) {
        if let Err(err) = runtime::destroy(self.stub) {
            log::warn(format_args!("drop mock {} failed: {}", self.stub, err));
        }
    }
}

// Mock::enabled 返回的作用域守卫
pub struct MockGuard<'a> {
    mock: &'a Mock,
}

impl MockGuard<'_> {
    pub fn mock(&self) -> &Mock {
        self.mock
    }
}

impl Drop for MockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.mock.disable() {
            log::warn(format_args!("disable mock {} failed: {}", self.mock.stub, err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_parse_case_insensitively() {
        assert_eq!(Method::from_name("GOT"), Ok(Method::Got));
        assert_eq!(Method::from_name("plt"), Ok(Method::Got));
        assert_eq!(Method::from_name("Stomp"), Ok(Method::Stomp));
        assert_eq!(Method::from_name("pre"), Ok(Method::Pre));
        assert_eq!(Method::from_name("inline"), Err(Errno::InvalidArg));
        assert_eq!(Method::Stomp.name(), "stomp");
    }

    #[test]
    fn relocations_cover_test_binary_imports() {
        let table = relocations(None);
        assert!(!table.slots_for("getppid").is_empty());
        assert!(relocations(Some("/nonexistent/libnone.so")).is_empty());
    }

    #[test]
    fn version_is_reported() {
        assert!(get_version().starts_with("srx_mock"));
    }
}
