// 符号名解码：Rust (legacy/v0) 与 C++ Itanium，用于按源码名匹配符号

use once_cell::sync::Lazy;
use regex::Regex;

// Itanium C++ ABI 修饰名：_Z 开头
static RE_ITA_MANGLED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^_Z[a-zA-Z0-9_]+(\.[a-zA-Z0-9_.]+)?$").expect("valid itanium mangled regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFlavor {
    Rust,
    Itanium,
    Plain,
}

pub fn detect_flavor(raw: &str) -> SymbolFlavor {
    if rustc_demangle::try_demangle(raw).is_ok() {
        return SymbolFlavor::Rust;
    }
    if RE_ITA_MANGLED.is_match(raw) {
        return SymbolFlavor::Itanium;
    }
    SymbolFlavor::Plain
}

// 完整解码形式；无法解码时返回 None
pub fn demangle(raw: &str) -> Option<String> {
    match detect_flavor(raw) {
        SymbolFlavor::Rust => rustc_demangle::try_demangle(raw)
            .ok()
            .map(|dm| format!("{:#}", dm)),
        SymbolFlavor::Itanium => cpp_demangle::Symbol::new(raw)
            .ok()
            .map(|sym| sym.to_string()),
        SymbolFlavor::Plain => None,
    }
}

// 不含参数列表的解码形式，例如 "A::Cpp::Namespace::withAFunction"
fn demangle_no_params(raw: &str) -> Option<String> {
    match detect_flavor(raw) {
        SymbolFlavor::Rust => demangle(raw),
        SymbolFlavor::Itanium => {
            let sym = cpp_demangle::Symbol::new(raw).ok()?;
            let options = cpp_demangle::DemangleOptions::new().no_params().no_return_type();
            sym.demangle(&options).ok()
        }
        SymbolFlavor::Plain => None,
    }
}

// 判断原始符号名是否与请求的名字对应
// 请求名可以是原始修饰名、完整解码名或不带参数的限定名
pub fn matches(raw: &str, wanted: &str) -> bool {
    if raw == wanted {
        return true;
    }
    let wanted = wanted.trim();
    if detect_flavor(raw) == SymbolFlavor::Plain {
        return false;
    }
    if let Some(full) = demangle(raw)
        && normalize(&full) == normalize(wanted)
    {
        return true;
    }
    demangle_no_params(raw).is_some_and(|short| short == wanted)
}

// 去除空白差异，"f(int, int)" 与 "f(int,int)" 视为相同
fn normalize(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

// 请求名本身就是修饰名或普通 C 名时可直接走 hash 查找
pub fn needs_linear_search(wanted: &str) -> bool {
    wanted.contains("::") || wanted.contains('(')
}
