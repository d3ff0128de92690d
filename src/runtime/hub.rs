// 调度中心（Hub）
// 每个 mock 栈对应一个 Hub：补丁统一跳到 Hub 的 trampoline，
// trampoline 再经目标单元跳到当前生效的替换函数
use crate::errno::Errno;
use crate::log;
use crate::runtime::state::MutexPoisonRecover;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

mod trampoline;

use trampoline::Template;

// 延迟销毁等待时间，确保仍在 trampoline 中的线程安全离开
const HUB_DESTROY_DELAY_SEC: u64 = 10;

// orig_addr 为原始函数地址，trampo 为 trampoline 入口
// target 为堆上的目标单元，trampoline 持有它的地址
pub(crate) struct Hub {
    orig_addr: usize,
    trampo: usize,
    target: Box<AtomicUsize>,
}

impl Hub {
    pub(crate) fn trampo(&self) -> usize {
        self.trampo
    }

    #[cfg(test)]
    fn orig_addr(&self) -> usize {
        self.orig_addr
    }

    #[cfg(test)]
    fn target(&self) -> usize {
        self.target.load(Ordering::Acquire)
    }

    // 切换分发目标，对正在进行的调用无影响，后续调用立即生效
    pub(crate) fn set_target(&self, func: usize) {
        let old = self.target.swap(func, Ordering::AcqRel);
        if old != func {
            log::debug(format_args!(
                "hub 0x{:x} target 0x{:x} -> 0x{:x}",
                self.trampo, old, func
            ));
        }
    }
}

// 计数 trampoline：每次调用原子递增计数后转发到固定目标
pub(crate) struct CounterTrampo {
    trampo: usize,
    count: Box<AtomicUsize>,
}

impl CounterTrampo {
    pub(crate) fn new(forward_to: usize) -> Result<Self, Errno> {
        if forward_to == 0 {
            return Err(Errno::InvalidArg);
        }
        let count = Box::new(AtomicUsize::new(0));
        let count_ptr = &*count as *const AtomicUsize as usize;
        let trampo = trampoline::new_trampo(Template::Counter, &[count_ptr, forward_to])?;
        Ok(Self { trampo, count })
    }

    pub(crate) fn trampo(&self) -> usize {
        self.trampo
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

impl Drop for CounterTrampo {
    fn drop(&mut self) {
        // 计数单元随 trampoline 一起延迟回收
        let count = std::mem::replace(&mut self.count, Box::new(AtomicUsize::new(0)));
        retire(Retired::Counter {
            trampo: self.trampo,
            count,
        });
    }
}

// 待延迟销毁的记录
enum Retired {
    Hub(Box<Hub>),
    Counter {
        trampo: usize,
        count: Box<AtomicUsize>,
    },
}

struct RetiredItem {
    item: Retired,
    ts: u64,
}

static RETIRED: Lazy<Mutex<Vec<RetiredItem>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn now_sec() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn destroy_now(item: Retired) {
    match item {
        Retired::Hub(hub) => {
            if hub.trampo != 0 {
                trampoline::free_trampo(hub.trampo);
            }
            drop(hub);
        }
        Retired::Counter { trampo, count } => {
            trampoline::free_trampo(trampo);
            drop(count);
        }
    }
}

fn retire(item: Retired) {
    collect_retired();
    let mut retired = RETIRED.lock_or_poison();
    retired.push(RetiredItem { item, ts: now_sec() });
}

// 回收已过期的记录
fn collect_retired() {
    let now = now_sec();
    let mut ready = Vec::new();
    {
        let mut retired = RETIRED.lock_or_poison();
        let mut idx = 0;
        while idx < retired.len() {
            if now.saturating_sub(retired[idx].ts) >= HUB_DESTROY_DELAY_SEC {
                ready.push(retired.swap_remove(idx).item);
            } else {
                idx += 1;
            }
        }
    }
    for item in ready {
        destroy_now(item);
    }
}

// 创建 Hub：分配目标单元与 trampoline，初始目标为原始函数
pub(crate) fn create_hub(orig_addr: usize) -> Result<Box<Hub>, Errno> {
    collect_retired();

    let target = Box::new(AtomicUsize::new(orig_addr));
    let target_ptr = &*target as *const AtomicUsize as usize;
    let trampo = trampoline::new_trampo(Template::Dispatch, &[target_ptr])?;
    log::debug(format_args!(
        "hub created: trampo 0x{:x} orig 0x{:x}",
        trampo, orig_addr
    ));
    Ok(Box::new(Hub {
        orig_addr,
        trampo,
        target,
    }))
}

// 销毁 Hub；with_delay=true 时加入延迟回收队列
pub(crate) fn destroy_hub(hub: Box<Hub>, with_delay: bool) {
    // 仍在 trampoline 中的调用回落到原始函数
    hub.set_target(hub.orig_addr);
    if with_delay {
        retire(Retired::Hub(hub));
        return;
    }
    destroy_now(Retired::Hub(hub));
}
