// 内存页面保护属性的读取与修改，通过解析 /proc/self/maps 获取权限

use crate::errno::Errno;
use crate::log;
use std::ffi::CStr;
use std::sync::atomic::{Ordering, fence};

pub const PROT_READ_FLAG: u32 = 0x1;
pub const PROT_WRITE_FLAG: u32 = 0x2;
pub const PROT_EXEC_FLAG: u32 = 0x4;

// 查询指定地址范围的内存保护属性
// pathname 可选，用于加速 maps 行过滤；不匹配时回退纯地址查找
pub fn get_mem_protect(addr: usize, len: usize, pathname: Option<&str>) -> Result<u32, Errno> {
    if pathname.is_some()
        && let Ok(prot) = scan_maps_for_protect(addr, len, pathname)
    {
        return Ok(prot);
    }
    scan_maps_for_protect(addr, len, None)
}

// 逐行扫描 /proc/self/maps，收集覆盖 [addr, addr+len) 的所有段的权限
// 跨段时取权限交集；仅匹配私有映射（perm[3] == 'p'）
fn scan_maps_for_protect(addr: usize, len: usize, pathname: Option<&str>) -> Result<u32, Errno> {
    let maps = read_proc_file(c"/proc/self/maps").ok_or(Errno::BadMaps)?;
    let maps = String::from_utf8_lossy(&maps);
    protect_from_maps(maps.lines(), addr, len, pathname)
}

// 经 syscall 直接读取 proc 文件，不经过 GOT 中可能已被 mock 的 open/read/close
pub(crate) fn read_proc_file(path: &CStr) -> Option<Vec<u8>> {
    let fd = unsafe {
        libc::syscall(
            libc::SYS_openat,
            libc::AT_FDCWD,
            path.as_ptr(),
            libc::O_RDONLY | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return None;
    }
    let mut data = Vec::with_capacity(16 * 1024);
    let mut buf = [0u8; 4096];
    let complete = loop {
        let n = unsafe { libc::syscall(libc::SYS_read, fd, buf.as_mut_ptr(), buf.len()) };
        if n < 0 {
            if std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            break false;
        }
        if n == 0 {
            break true;
        }
        data.extend_from_slice(&buf[..n as usize]);
    };
    unsafe { libc::syscall(libc::SYS_close, fd) };
    complete.then_some(data)
}

pub(crate) fn protect_from_maps<'a, I>(
    lines: I,
    addr: usize,
    len: usize,
    pathname: Option<&str>,
) -> Result<u32, Errno>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut start_addr = addr;
    let end_addr = addr.saturating_add(len);
    let mut prot: u32 = 0;
    let mut load0 = true;
    let mut found_all = false;

    for line in lines {
        if let Some(path) = pathname
            && !line.contains(path)
        {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(range) = parts.next() else {
            continue;
        };
        let Some(perm) = parts.next() else {
            continue;
        };

        if perm.len() < 4 {
            continue;
        }
        let perm_bytes = perm.as_bytes();
        if perm_bytes[3] != b'p' {
            continue;
        }

        let Some((start_str, end_str)) = range.split_once('-') else {
            continue;
        };
        let start = usize::from_str_radix(start_str, 16).unwrap_or(0);
        let end = usize::from_str_radix(end_str, 16).unwrap_or(0);

        if start_addr < start || start_addr >= end {
            continue;
        }

        if load0 {
            if perm_bytes[0] == b'r' {
                prot |= PROT_READ_FLAG;
            }
            if perm_bytes[1] == b'w' {
                prot |= PROT_WRITE_FLAG;
            }
            if perm_bytes[2] == b'x' {
                prot |= PROT_EXEC_FLAG;
            }
            load0 = false;
        } else {
            if perm_bytes[0] != b'r' {
                prot &= !PROT_READ_FLAG;
            }
            if perm_bytes[1] != b'w' {
                prot &= !PROT_WRITE_FLAG;
            }
            if perm_bytes[2] != b'x' {
                prot &= !PROT_EXEC_FLAG;
            }
        }

        if end_addr <= end {
            found_all = true;
            break;
        }
        start_addr = end;
    }

    if !found_all {
        return Err(Errno::GetProt);
    }

    Ok(prot)
}

// 修改 [addr, addr+len) 覆盖的全部页面的保护属性
pub fn set_mem_protect(addr: usize, len: usize, prot: u32) -> Result<(), Errno> {
    let (start, len) = page_bounds(addr, len);
    let result = unsafe { libc::mprotect(start as *mut libc::c_void, len, prot as i32) };
    if result != 0 {
        let err = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        log::error(format_args!(
            "mprotect failed: {err} range=0x{start:x}+0x{len:x} prot={prot}"
        ));
        return Err(Errno::SetProt);
    }
    Ok(())
}

// 临时放开 [addr, addr+len) 的写权限执行 write，结束后恢复原权限
// 代码页使用 RWX，保证同页上正在执行的代码不受影响
pub unsafe fn with_writable<R, F>(
    addr: usize,
    len: usize,
    pathname: Option<&str>,
    write: F,
) -> Result<R, Errno>
where
    F: FnOnce() -> R,
{
    let old_prot = get_mem_protect(addr, len, pathname)?;
    let mut need_prot = old_prot | PROT_READ_FLAG | PROT_WRITE_FLAG;
    if old_prot & PROT_EXEC_FLAG != 0 {
        need_prot |= PROT_EXEC_FLAG;
    }
    if old_prot != need_prot {
        set_mem_protect(addr, len, need_prot)?;
    }

    let result = write();

    if old_prot != need_prot
        && let Err(err) = set_mem_protect(addr, len, old_prot)
    {
        log::warn(format_args!("restore addr prot failed: {:?}", err));
    }
    Ok(result)
}

// 单地址指令缓存刷新，仅发出内存屏障
pub fn flush_instruction_cache(addr: usize) {
    let _ = addr;
    fence(Ordering::SeqCst);
}

// 刷新指定地址范围的指令缓存
pub fn flush_instruction_cache_range(start: usize, end: usize) {
    if start >= end {
        return;
    }
    flush_instruction_cache_impl(start, end);
}

// aarch64: 逐行清理 dcache 再逐行无效化 icache，最后 dsb+isb 同步
// x86_64: 硬件保证缓存一致性，仅需内存屏障
fn flush_instruction_cache_impl(start: usize, end: usize) {
    #[cfg(target_arch = "aarch64")]
    {
        let (dcache_line, icache_line) = cache_line_size();
        let mut dcache_addr = align_down(start, dcache_line);
        while dcache_addr < end {
            unsafe {
                core::arch::asm!("dc cvau, {}", in(reg) dcache_addr, options(nostack, preserves_flags));
            }
            dcache_addr = dcache_addr.saturating_add(dcache_line);
        }
        unsafe {
            core::arch::asm!("dsb ish", options(nostack, preserves_flags));
        }

        let mut icache_addr = align_down(start, icache_line);
        while icache_addr < end {
            unsafe {
                core::arch::asm!("ic ivau, {}", in(reg) icache_addr, options(nostack, preserves_flags));
            }
            icache_addr = icache_addr.saturating_add(icache_line);
        }
        unsafe {
            core::arch::asm!("dsb ish", options(nostack, preserves_flags));
            core::arch::asm!("isb", options(nostack, preserves_flags));
        }
    }

    #[cfg(target_arch = "x86_64")]
    {
        let _ = (start, end);
        fence(Ordering::SeqCst);
    }
}

pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 { 4096 } else { size as usize }
}

// 计算 [addr, addr+len) 覆盖的页对齐起始地址和长度
fn page_bounds(addr: usize, len: usize) -> (usize, usize) {
    let page_size = page_size();
    let page_mask = !(page_size - 1);
    let start = addr & page_mask;
    let end = (addr + len.max(1) - 1) & page_mask;
    let end = end + page_size;
    (start, end - start)
}

// 读取 CTR_EL0 寄存器，返回 (dcache_line_size, icache_line_size)
#[cfg(target_arch = "aarch64")]
fn cache_line_size() -> (usize, usize) {
    let ctr_el0: usize;
    unsafe {
        core::arch::asm!("mrs {}, ctr_el0", out(reg) ctr_el0, options(nomem, nostack, preserves_flags));
    }

    let dcache_line = 4usize << ((ctr_el0 >> 16) & 0x0f);
    let icache_line = 4usize << (ctr_el0 & 0x0f);
    (dcache_line.max(4), icache_line.max(4))
}

#[cfg(target_arch = "aarch64")]
fn align_down(addr: usize, align: usize) -> usize {
    let mask = !(align.saturating_sub(1));
    addr & mask
}
