// mock 创建：定位目标栈（不存在则新建并确定补丁方式），压入新的禁用层
use crate::api::{Method, MockStub};
use crate::errno::Errno;
use crate::log;
use crate::runtime::MutexPoisonRecover;
use crate::runtime::patch::{got, stomp};
use crate::runtime::resolve::Symbol;
use crate::runtime::rules;
use crate::runtime::state::{
    CoreState, GLOBAL, HandleEntry, HandleState, StackEntry, SymbolMockStack,
};
use std::mem::size_of;
use std::ptr;

pub(super) fn create(
    symbol: &Symbol,
    replacement: usize,
    method: Option<Method>,
    caller_rule: Option<&str>,
) -> Result<MockStub, Errno> {
    if replacement == 0 || method == Some(Method::Pre) {
        return Err(Errno::InvalidArg);
    }
    if rules::is_reserved(symbol.name()) {
        log::warn(format_args!("refuse to mock reserved symbol {}", symbol.name()));
        return Err(Errno::Reserved);
    }

    let mut guard = GLOBAL.state.lock_or_poison();
    let core = &mut *guard;
    let key = symbol.addr();
    match core.stacks.get(&key) {
        Some(stack) => {
            let same_rule = stack.caller_rule.as_deref() == caller_rule;
            if method.is_some_and(|method| method != stack.method) || !same_rule {
                log::warn(format_args!(
                    "{} already mocked via {:?}",
                    stack.label, stack.method
                ));
                return Err(Errno::MethodConflict);
            }
        }
        None => {
            let method = choose_method(symbol, method.or(core.config.default_method), caller_rule)?;
            let mut stack = new_stack(
                core,
                key,
                symbol.name().to_string(),
                Some(symbol.clone()),
                method,
                symbol.addr(),
            );
            stack.caller_rule = caller_rule.map(str::to_string);
            core.stacks.insert(key, stack);
        }
    }
    Ok(push_entry(core, key, replacement))
}

// 按指针槽替换：slot_addr 处当前保存的函数指针即原始函数
pub(super) fn create_pre(slot_addr: usize, replacement: usize) -> Result<MockStub, Errno> {
    if slot_addr == 0 || replacement == 0 || slot_addr % size_of::<usize>() != 0 {
        return Err(Errno::InvalidArg);
    }

    let mut guard = GLOBAL.state.lock_or_poison();
    let core = &mut *guard;
    match core.stacks.get(&slot_addr) {
        Some(stack) if stack.method != Method::Pre => return Err(Errno::MethodConflict),
        Some(_) => {}
        None => {
            let original = unsafe { ptr::read_volatile(slot_addr as *const usize) };
            if original == 0 {
                return Err(Errno::InvalidArg);
            }
            let label = format!("pointer 0x{:x}", slot_addr);
            let stack = new_stack(core, slot_addr, label, None, Method::Pre, original);
            core.stacks.insert(slot_addr, stack);
        }
    }
    Ok(push_entry(core, slot_addr, replacement))
}

// 未指定方式时，有可改写 slot 走 GOT，否则走 STOMP；创建时就验证可行性
fn choose_method(
    symbol: &Symbol,
    method: Option<Method>,
    caller_rule: Option<&str>,
) -> Result<Method, Errno> {
    match method {
        Some(Method::Got) => {
            if got::collect_slots(symbol.name(), symbol.addr(), caller_rule).is_empty() {
                log::warn(format_args!("{} has no relocation slots", symbol.name()));
                return Err(Errno::NoSlots);
            }
            Ok(Method::Got)
        }
        Some(Method::Stomp) => {
            stomp::patch_site(symbol.addr(), symbol.size())?;
            Ok(Method::Stomp)
        }
        Some(Method::Pre) => Err(Errno::InvalidArg),
        None => {
            if !got::collect_slots(symbol.name(), symbol.addr(), caller_rule).is_empty() {
                return Ok(Method::Got);
            }
            stomp::patch_site(symbol.addr(), symbol.size())?;
            Ok(Method::Stomp)
        }
    }
}

fn new_stack(
    core: &mut CoreState,
    key: usize,
    label: String,
    symbol: Option<Symbol>,
    method: Method,
    original: usize,
) -> SymbolMockStack {
    let id = core.next_stack_id;
    core.next_stack_id += 1;
    log::debug(format_args!("new mock stack {} via {:?}", label, method));
    SymbolMockStack {
        id,
        key,
        label,
        symbol,
        method,
        caller_rule: None,
        original,
        entries: Vec::new(),
        hub: None,
        patch: None,
        suspended: 0,
    }
}

fn push_entry(core: &mut CoreState, key: usize, replacement: usize) -> MockStub {
    let stub = core.next_stub;
    core.next_stub += 1;
    if let Some(stack) = core.stacks.get_mut(&key) {
        stack.entries.push(StackEntry {
            stub,
            replacement,
            enabled: false,
        });
        log::debug(format_args!(
            "mock {} on {} depth {}",
            stub,
            stack.label,
            stack.entries.len()
        ));
    }
    core.handles.insert(
        stub,
        HandleEntry {
            key,
            state: HandleState::Disabled,
        },
    );
    stub
}
