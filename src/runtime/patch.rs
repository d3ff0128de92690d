// 补丁原语：GOT slot 改写、函数入口 STOMP、调用点指针替换
// 每种补丁都保存原始内容，revert 按位恢复
use crate::errno::Errno;
use crate::linux::memory;
use crate::log;
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(super) mod got;
pub(super) mod pre;
pub(super) mod stomp;

// 已安装的补丁
pub(crate) enum Patch {
    Got(got::GotPatch),
    Stomp(stomp::StompPatch),
    Pre(pre::PreSubstitution),
}

impl Patch {
    pub(crate) fn revert(&self) -> Result<(), Errno> {
        match self {
            Self::Got(patch) => patch.revert(),
            Self::Stomp(patch) => patch.revert(),
            Self::Pre(patch) => patch.revert(),
        }
    }
}

// 原子替换一个指针大小的槽位并返回旧值，写后读回校验
pub(super) unsafe fn swap_pointer(
    addr: usize,
    value: usize,
    pathname: Option<&str>,
) -> Result<usize, Errno> {
    if addr == 0 || addr % size_of::<usize>() != 0 {
        return Err(Errno::InvalidArg);
    }
    let slot = unsafe { &*(addr as *const AtomicUsize) };
    let old = unsafe {
        memory::with_writable(addr, size_of::<usize>(), pathname, || {
            slot.swap(value, Ordering::SeqCst)
        })?
    };
    memory::flush_instruction_cache(addr);
    if slot.load(Ordering::SeqCst) != value {
        log::error(format_args!("verify slot 0x{:x} failed", addr));
        return Err(Errno::SetGot);
    }
    Ok(old)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_pointer_rejects_misaligned_slot() {
        let mut cell = [0usize; 2];
        let addr = cell.as_mut_ptr() as usize + 1;
        assert_eq!(unsafe { swap_pointer(addr, 1, None) }, Err(Errno::InvalidArg));
        assert_eq!(unsafe { swap_pointer(0, 1, None) }, Err(Errno::InvalidArg));
    }

    #[test]
    fn swap_pointer_returns_previous_value() {
        let cell = Box::new(AtomicUsize::new(0x1111));
        let addr = &*cell as *const AtomicUsize as usize;
        assert_eq!(unsafe { swap_pointer(addr, 0x2222, None) }, Ok(0x1111));
        assert_eq!(cell.load(Ordering::SeqCst), 0x2222);
    }
}
