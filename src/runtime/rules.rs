// 模块路径匹配规则解析与判定
// 支持路径后缀 @base_addr 按加载基址精确限定

// 引擎改写内存时自身依赖的符号，mock 它们会让引擎在补丁过程中调用到替换函数
const RESERVED_SYMBOLS: [&str; 7] = [
    "mprotect",
    "sysconf",
    "syscall",
    "dl_iterate_phdr",
    "dlsym",
    "mmap",
    "munmap",
];

// 解析后的路径规则
struct ParsedPathRule<'a> {
    path_rule: &'a str,
    base_rule: Option<usize>,
}

// 模块匹配：路径 + 可选的 @base_addr，规则中未指定基址时视为通配
pub(super) fn module_match(pathname: &str, base_addr: usize, external_path: &str) -> bool {
    let Some(rule) = parse_path_rule(external_path) else {
        return false;
    };
    if !path_match_only(pathname, rule.path_rule) {
        return false;
    }
    !rule.base_rule.is_some_and(|base| base != base_addr)
}

// 空路径和 vDSO（以 '[' 开头）不参与补丁
pub(super) fn should_ignore(pathname: &str) -> bool {
    pathname.is_empty() || pathname.starts_with('[')
}

pub(super) fn is_reserved(symbol: &str) -> bool {
    RESERVED_SYMBOLS.contains(&symbol)
}

// 纯路径匹配：绝对路径要求完全相等，相对路径使用后缀匹配
fn path_match_only(pathname: &str, external_path: &str) -> bool {
    if external_path.is_empty() {
        return false;
    }

    if external_path.starts_with('/') {
        pathname == external_path
    } else {
        pathname.ends_with(external_path)
    }
}

fn parse_path_rule(external_path: &str) -> Option<ParsedPathRule<'_>> {
    if external_path.is_empty() {
        return None;
    }
    let (path_rule, base_rule) = split_base_rule(external_path)?;
    Some(ParsedPathRule {
        path_rule,
        base_rule,
    })
}

fn split_base_rule(path_and_base: &str) -> Option<(&str, Option<usize>)> {
    let Some((path_rule, base_rule)) = path_and_base.rsplit_once('@') else {
        return Some((path_and_base, None));
    };
    if path_rule.is_empty() {
        return None;
    }
    match parse_hex_usize(base_rule) {
        Some(base_addr) => Some((path_rule, Some(base_addr))),
        None => Some((path_and_base, None)),
    }
}

fn parse_hex_usize(rule: &str) -> Option<usize> {
    let value = rule
        .strip_prefix("0x")
        .or_else(|| rule.strip_prefix("0X"))
        .unwrap_or(rule);
    if value.is_empty() || !value.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return None;
    }
    usize::from_str_radix(value, 16).ok()
}
