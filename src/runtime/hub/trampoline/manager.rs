// Trampoline 内存页池
// 每个 trampoline 独占一页，改权限时不影响其他活跃 trampoline
// 释放的页经过冷却期才会复用或归还系统
use crate::errno::Errno;
use crate::linux::memory;
use crate::log;
use crate::runtime::state::MutexPoisonRecover;
use once_cell::sync::Lazy;
use std::ptr;
use std::sync::Mutex;

use super::{TRAMPO_DELAY_SEC, now_sec};

// 空闲页保留上限，超出且过了冷却期的页直接 munmap
const IDLE_PAGE_KEEP: usize = 4;

struct TrampoPage {
    ptr: usize,
    in_use: bool,
    // 最近一次释放的时间戳，0 表示从未释放
    freed_at: u64,
}

struct TrampoMgr {
    page_size: usize,
    pages: Vec<TrampoPage>,
}

impl TrampoMgr {
    fn new() -> Self {
        Self {
            page_size: memory::page_size(),
            pages: Vec::new(),
        }
    }

    // 优先复用冷却期已过的空闲页，无可用时 mmap 新页；返回的页为 RW
    fn alloc(&mut self, now: u64) -> Result<usize, Errno> {
        self.reclaim_idle_pages(now);

        for page in &mut self.pages {
            if page.in_use || now.saturating_sub(page.freed_at) <= TRAMPO_DELAY_SEC {
                continue;
            }
            let writable = memory::PROT_READ_FLAG | memory::PROT_WRITE_FLAG;
            if memory::set_mem_protect(page.ptr, self.page_size, writable).is_err() {
                continue;
            }
            page.in_use = true;
            unsafe {
                ptr::write_bytes(page.ptr as *mut u8, 0, self.page_size);
            }
            return Ok(page.ptr);
        }

        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                self.page_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            log::error(format_args!("mmap trampoline page failed"));
            return Err(Errno::NewTrampo);
        }

        self.pages.push(TrampoPage {
            ptr: raw as usize,
            in_use: true,
            freed_at: 0,
        });
        Ok(raw as usize)
    }

    fn free(&mut self, trampo: usize, now: u64) {
        let page_size = self.page_size;
        if let Some(page) = self
            .pages
            .iter_mut()
            .find(|page| trampo >= page.ptr && trampo < page.ptr + page_size)
        {
            page.in_use = false;
            page.freed_at = now;
        }
        self.reclaim_idle_pages(now);
    }

    // 空闲页超过保留数量时，归还冷却期已过的页
    fn reclaim_idle_pages(&mut self, now: u64) {
        let mut idle = self.pages.iter().filter(|page| !page.in_use).count();
        let mut idx = 0;
        while idx < self.pages.len() && idle > IDLE_PAGE_KEEP {
            let page = &self.pages[idx];
            let expired =
                !page.in_use && page.freed_at != 0 && now.saturating_sub(page.freed_at) > TRAMPO_DELAY_SEC;
            if expired {
                let page = self.pages.swap_remove(idx);
                unsafe {
                    libc::munmap(page.ptr as *mut libc::c_void, self.page_size);
                }
                idle -= 1;
                continue;
            }
            idx += 1;
        }
    }

    #[cfg(test)]
    fn in_use_count(&self) -> usize {
        self.pages.iter().filter(|page| page.in_use).count()
    }
}

static TRAMPO_MGR: Lazy<Mutex<TrampoMgr>> = Lazy::new(|| Mutex::new(TrampoMgr::new()));

pub(super) fn alloc_trampo() -> Result<usize, Errno> {
    let mut mgr = TRAMPO_MGR.lock_or_poison();
    mgr.alloc(now_sec())
}

pub(super) fn free_trampo(trampo: usize) {
    let mut mgr = TRAMPO_MGR.lock_or_poison();
    mgr.free(trampo, now_sec());
}
