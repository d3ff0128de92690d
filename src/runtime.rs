// runtime 模块入口，将内部子模块的功能统一暴露为 crate 级公共接口
use crate::api::{Method, MockStub};
use crate::errno::Errno;

mod hub;
mod lifecycle;
mod patch;
pub(crate) mod resolve;
mod rules;
mod state;

pub(crate) use hub::CounterTrampo;
pub(crate) use state::MutexPoisonRecover;

use resolve::Symbol;

pub(crate) fn create(
    symbol: &Symbol,
    replacement: usize,
    method: Option<Method>,
    caller_rule: Option<&str>,
) -> Result<MockStub, Errno> {
    lifecycle::create(symbol, replacement, method, caller_rule)
}

pub(crate) fn create_pre(slot_addr: usize, replacement: usize) -> Result<MockStub, Errno> {
    lifecycle::create_pre(slot_addr, replacement)
}

pub(crate) fn enable(stub: MockStub) -> Result<(), Errno> {
    lifecycle::enable(stub)
}

pub(crate) fn disable(stub: MockStub) -> Result<(), Errno> {
    lifecycle::disable(stub)
}

pub(crate) fn destroy(stub: MockStub) -> Result<(), Errno> {
    lifecycle::destroy(stub)
}

pub(crate) fn clear() {
    lifecycle::clear()
}

pub(crate) fn is_enabled(stub: MockStub) -> Result<bool, Errno> {
    lifecycle::is_enabled(stub)
}

pub(crate) fn method_of(stub: MockStub) -> Result<Method, Errno> {
    lifecycle::method_of(stub)
}

pub(crate) fn symbol_of(stub: MockStub) -> Result<Option<Symbol>, Errno> {
    lifecycle::symbol_of(stub)
}

pub(crate) fn depth_of(stub: MockStub) -> Result<usize, Errno> {
    lifecycle::depth_of(stub)
}

pub(crate) fn with_real<R, F>(stub: MockStub, f: F) -> Result<R, Errno>
where
    F: FnOnce(usize) -> R,
{
    lifecycle::with_real(stub, f)
}

pub(crate) fn original_of(stub: MockStub) -> Result<usize, Errno> {
    lifecycle::original_of(stub)
}

pub(crate) fn stack_original(key: usize) -> Option<usize> {
    lifecycle::stack_original(key)
}

pub(crate) fn get_debug() -> bool {
    lifecycle::get_debug()
}

pub(crate) fn set_debug(debug: bool) {
    lifecycle::set_debug(debug)
}

pub(crate) fn get_default_method() -> Option<Method> {
    lifecycle::get_default_method()
}

pub(crate) fn set_default_method(method: Option<Method>) -> Result<(), Errno> {
    lifecycle::set_default_method(method)
}

pub(crate) fn is_reserved(symbol: &str) -> bool {
    rules::is_reserved(symbol)
}

pub(crate) fn module_match(pathname: &str, base_addr: usize, rule: &str) -> bool {
    rules::module_match(pathname, base_addr, rule)
}

pub(crate) fn should_ignore(pathname: &str) -> bool {
    rules::should_ignore(pathname)
}

#[cfg(test)]
mod tests {
    use super::{get_debug, get_default_method, set_debug, set_default_method};
    use crate::api::Method;
    use crate::errno::Errno;

    #[test]
    fn debug_flag_round_trips() {
        let _guard = crate::test_lock();
        let before = get_debug();
        set_debug(true);
        assert!(get_debug());
        set_debug(before);
        assert_eq!(get_debug(), before);
    }

    #[test]
    fn default_method_rejects_pointer_substitution() {
        let _guard = crate::test_lock();
        let before = get_default_method();
        assert_eq!(set_default_method(Some(Method::Pre)), Err(Errno::InvalidArg));
        assert_eq!(set_default_method(Some(Method::Stomp)), Ok(()));
        assert_eq!(get_default_method(), Some(Method::Stomp));
        assert_eq!(set_default_method(before), Ok(()));
    }
}
