// 句柄状态迁移：enable / disable / destroy，以及运行时配置
use crate::api::{Method, MockStub};
use crate::errno::Errno;
use crate::log;
use crate::runtime::MutexPoisonRecover;
use crate::runtime::hub;
use crate::runtime::resolve::Symbol;
use crate::runtime::state::{CoreState, GLOBAL, HandleState, SymbolMockStack};

use super::sync::sync_hardware;

// 取出句柄对应的栈；已销毁的句柄返回 InvalidState
fn live_stack(core: &mut CoreState, stub: MockStub) -> Result<&mut SymbolMockStack, Errno> {
    let key = core.handle(stub)?.key;
    core.stacks.get_mut(&key).ok_or(Errno::InvalidState)
}

pub(super) fn enable(stub: MockStub) -> Result<(), Errno> {
    switch(stub, true)
}

pub(super) fn disable(stub: MockStub) -> Result<(), Errno> {
    switch(stub, false)
}

// 硬件同步失败时层标记回滚、句柄状态不变，补丁与 hub 同步回失败前
fn switch(stub: MockStub, enabled: bool) -> Result<(), Errno> {
    let mut guard = GLOBAL.state.lock_or_poison();
    let core = &mut *guard;
    let entry = core.handle(stub)?;
    let wanted = if enabled {
        HandleState::Enabled
    } else {
        HandleState::Disabled
    };
    if entry.state == wanted {
        return Ok(());
    }
    let stack = core.stacks.get_mut(&entry.key).ok_or(Errno::InvalidState)?;
    stack.set_enabled(stub, enabled);
    if let Err(err) = sync_hardware(stack) {
        stack.set_enabled(stub, !enabled);
        if let Err(sync_err) = sync_hardware(stack) {
            log::error(format_args!("{} resync after {:?} failed: {}", stack.label, wanted, sync_err));
        }
        log::warn(format_args!("mock {} {:?} on {} failed: {}", stub, wanted, stack.label, err));
        return Err(err);
    }
    log::debug(format_args!("mock {} {:?} on {}", stub, wanted, stack.label));
    if let Some(entry) = core.handles.get_mut(&stub) {
        entry.state = wanted;
    }
    Ok(())
}

// 任意顺序销毁均可；栈空时撤下补丁并延迟回收 hub
pub(super) fn destroy(stub: MockStub) -> Result<(), Errno> {
    let mut guard = GLOBAL.state.lock_or_poison();
    destroy_locked(&mut guard, stub)
}

// 撤补丁成功后才移除句柄；失败时该层放回原位，句柄仍可再次销毁
fn destroy_locked(core: &mut CoreState, stub: MockStub) -> Result<(), Errno> {
    let entry = match core.handle(stub) {
        Ok(entry) => entry,
        Err(Errno::InvalidState) => return Ok(()),
        Err(err) => return Err(err),
    };
    let Some(stack) = core.stacks.get_mut(&entry.key) else {
        core.handles.remove(&stub);
        return Ok(());
    };
    let Some(pos) = stack.entries.iter().position(|layer| layer.stub == stub) else {
        core.handles.remove(&stub);
        return Ok(());
    };
    let layer = stack.entries.remove(pos);
    if let Err(err) = sync_hardware(stack) {
        stack.entries.insert(pos, layer);
        if let Err(sync_err) = sync_hardware(stack) {
            log::error(format_args!("{} resync after failed destroy: {}", stack.label, sync_err));
        }
        log::warn(format_args!("destroy mock {} on {} failed: {}", stub, stack.label, err));
        return Err(err);
    }
    log::debug(format_args!(
        "mock {} destroyed on {}, depth {}",
        stub,
        stack.label,
        stack.entries.len()
    ));
    let discard = stack.entries.is_empty() && stack.patch.is_none();
    core.handles.remove(&stub);
    if discard {
        let hub = core
            .stacks
            .remove(&entry.key)
            .and_then(|mut stack| stack.hub.take());
        if let Some(hub) = hub {
            hub::destroy_hub(hub, true);
        }
    }
    Ok(())
}

// 销毁全部 mock，按创建的逆序进行
pub(super) fn clear() {
    let mut guard = GLOBAL.state.lock_or_poison();
    let core = &mut *guard;
    let live: Vec<MockStub> = core.handles.keys().copied().collect();
    for stub in live.into_iter().rev() {
        if let Err(err) = destroy_locked(core, stub) {
            log::warn(format_args!("clear mock {} failed: {}", stub, err));
        }
    }
}

pub(super) fn is_enabled(stub: MockStub) -> Result<bool, Errno> {
    let guard = GLOBAL.state.lock_or_poison();
    guard
        .handle(stub)
        .map(|entry| entry.state == HandleState::Enabled)
}

pub(super) fn method_of(stub: MockStub) -> Result<Method, Errno> {
    let mut guard = GLOBAL.state.lock_or_poison();
    live_stack(&mut guard, stub).map(|stack| stack.method)
}

pub(super) fn symbol_of(stub: MockStub) -> Result<Option<Symbol>, Errno> {
    let mut guard = GLOBAL.state.lock_or_poison();
    live_stack(&mut guard, stub).map(|stack| stack.symbol.clone())
}

// 目标上仍存活的 mock 层数
pub(super) fn depth_of(stub: MockStub) -> Result<usize, Errno> {
    let mut guard = GLOBAL.state.lock_or_poison();
    live_stack(&mut guard, stub).map(|stack| stack.entries.len())
}

pub(super) fn set_debug(debug: bool) {
    let mut guard = GLOBAL.state.lock_or_poison();
    guard.config.debug = debug;
    log::set_debug_enabled(debug);
}

pub(super) fn get_debug() -> bool {
    GLOBAL.state.lock_or_poison().config.debug
}

pub(super) fn set_default_method(method: Option<Method>) -> Result<(), Errno> {
    if method == Some(Method::Pre) {
        return Err(Errno::InvalidArg);
    }
    GLOBAL.state.lock_or_poison().config.default_method = method;
    Ok(())
}

pub(super) fn get_default_method() -> Option<Method> {
    GLOBAL.state.lock_or_poison().config.default_method
}
