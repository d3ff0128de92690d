// 调用原始实现：GOT/PRE 下原始入口从未被改写，直接调用即可
// STOMP 下原始入口就是补丁位置，调用期间临时撤下补丁，结束后由守卫恢复
use crate::api::{Method, MockStub};
use crate::errno::Errno;
use crate::log;
use crate::runtime::MutexPoisonRecover;
use crate::runtime::state::GLOBAL;

use super::sync::sync_hardware;

struct ResumeGuard {
    key: usize,
    stack_id: u64,
}

impl Drop for ResumeGuard {
    fn drop(&mut self) {
        let mut guard = GLOBAL.state.lock_or_poison();
        let Some(stack) = guard.stacks.get_mut(&self.key) else {
            return;
        };
        // 期间栈已被销毁重建，不属于本次暂停
        if stack.id != self.stack_id {
            return;
        }
        stack.suspended = stack.suspended.saturating_sub(1);
        if let Err(err) = sync_hardware(stack) {
            log::error(format_args!("{} re-patch after real call: {}", stack.label, err));
        }
    }
}

pub(super) fn with_real<R, F>(stub: MockStub, f: F) -> Result<R, Errno>
where
    F: FnOnce(usize) -> R,
{
    let (original, resume) = {
        let mut guard = GLOBAL.state.lock_or_poison();
        let entry = guard.handle(stub)?;
        let stack = guard.stacks.get_mut(&entry.key).ok_or(Errno::InvalidState)?;
        if stack.method != Method::Stomp {
            (stack.original, None)
        } else {
            stack.suspended += 1;
            if let Err(err) = sync_hardware(stack) {
                stack.suspended -= 1;
                return Err(err);
            }
            let resume = ResumeGuard {
                key: stack.key,
                stack_id: stack.id,
            };
            (stack.original, Some(resume))
        }
    };
    let result = f(original);
    drop(resume);
    Ok(result)
}

// 原始实现地址；STOMP 方式下该地址在补丁生效期间不可直接调用
pub(super) fn original_of(stub: MockStub) -> Result<usize, Errno> {
    let guard = GLOBAL.state.lock_or_poison();
    let entry = guard.handle(stub)?;
    guard
        .stacks
        .get(&entry.key)
        .map(|stack| stack.original)
        .ok_or(Errno::InvalidState)
}

// 已存在的栈保存的原始地址；目标尚未被 mock 时返回 None
pub(super) fn stack_original(key: usize) -> Option<usize> {
    let guard = GLOBAL.state.lock_or_poison();
    guard.stacks.get(&key).map(|stack| stack.original)
}
