// 生命周期管理模块，作为 runtime 子模块的统一入口
// 将创建/状态迁移/原始调用/配置等操作分发到各子模块
use crate::api::{Method, MockStub};
use crate::errno::Errno;
use crate::runtime::resolve::Symbol;

mod entry_control;
mod entry_create;
mod proxy;
mod sync;

#[cfg(test)]
mod tests;

pub(super) fn create(
    symbol: &Symbol,
    replacement: usize,
    method: Option<Method>,
    caller_rule: Option<&str>,
) -> Result<MockStub, Errno> {
    entry_create::create(symbol, replacement, method, caller_rule)
}

pub(super) fn create_pre(slot_addr: usize, replacement: usize) -> Result<MockStub, Errno> {
    entry_create::create_pre(slot_addr, replacement)
}

pub(super) fn enable(stub: MockStub) -> Result<(), Errno> {
    entry_control::enable(stub)
}

pub(super) fn disable(stub: MockStub) -> Result<(), Errno> {
    entry_control::disable(stub)
}

pub(super) fn destroy(stub: MockStub) -> Result<(), Errno> {
    entry_control::destroy(stub)
}

pub(super) fn clear() {
    entry_control::clear()
}

pub(super) fn is_enabled(stub: MockStub) -> Result<bool, Errno> {
    entry_control::is_enabled(stub)
}

pub(super) fn method_of(stub: MockStub) -> Result<Method, Errno> {
    entry_control::method_of(stub)
}

pub(super) fn symbol_of(stub: MockStub) -> Result<Option<Symbol>, Errno> {
    entry_control::symbol_of(stub)
}

pub(super) fn depth_of(stub: MockStub) -> Result<usize, Errno> {
    entry_control::depth_of(stub)
}

pub(super) fn with_real<R, F>(stub: MockStub, f: F) -> Result<R, Errno>
where
    F: FnOnce(usize) -> R,
{
    proxy::with_real(stub, f)
}

pub(super) fn original_of(stub: MockStub) -> Result<usize, Errno> {
    proxy::original_of(stub)
}

pub(super) fn stack_original(key: usize) -> Option<usize> {
    proxy::stack_original(key)
}

pub(super) fn set_debug(debug: bool) {
    entry_control::set_debug(debug)
}

pub(super) fn get_debug() -> bool {
    entry_control::get_debug()
}

pub(super) fn set_default_method(method: Option<Method>) -> Result<(), Errno> {
    entry_control::set_default_method(method)
}

pub(super) fn get_default_method() -> Option<Method> {
    entry_control::get_default_method()
}
