// 已加载模块枚举，基于 dl_iterate_phdr
use crate::elf::{Elf, ElfPhdr};
use crate::errno::Errno;
use std::ffi::{CStr, c_void};
use std::slice;

const PT_LOAD: u32 = 1;

// 一个已加载的 ELF 模块
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleInfo {
    // 主程序的 dlpi_name 为空，以 /proc/self/exe 的真实路径代替
    pub pathname: String,
    pub bias: usize,
    pub(crate) phdr: usize,
    pub(crate) phnum: usize,
    pub is_main: bool,
}

impl ModuleInfo {
    // 解析模块的动态段；模块在进程内保持加载期间结果有效
    pub fn elf(&self) -> Result<Elf, Errno> {
        unsafe {
            Elf::init(
                self.bias,
                self.phdr as *const ElfPhdr,
                self.phnum,
                &self.pathname,
            )
        }
    }

    fn phdrs(&self) -> &[ElfPhdr] {
        unsafe { slice::from_raw_parts(self.phdr as *const ElfPhdr, self.phnum) }
    }

    // 判断地址是否落在模块某个 PT_LOAD 段内
    pub fn contains(&self, addr: usize) -> bool {
        self.phdrs().iter().any(|ph| {
            if ph.p_type != PT_LOAD {
                return false;
            }
            let start = self.bias.wrapping_add(ph.p_vaddr as usize);
            let end = start.saturating_add(ph.p_memsz as usize);
            addr >= start && addr < end
        })
    }
}

// 补丁过程中会调用，经 syscall 绕开 GOT 中可能已被 mock 的 readlink
fn main_exe_path() -> String {
    let mut buf = [0u8; libc::PATH_MAX as usize];
    let n = unsafe {
        libc::syscall(
            libc::SYS_readlinkat,
            libc::AT_FDCWD,
            c"/proc/self/exe".as_ptr(),
            buf.as_mut_ptr(),
            buf.len(),
        )
    };
    if n <= 0 {
        return String::new();
    }
    String::from_utf8_lossy(&buf[..n as usize]).into_owned()
}

fn is_vdso(pathname: &str) -> bool {
    pathname.starts_with("linux-vdso") || pathname.starts_with("linux-gate") || pathname.starts_with('[')
}

// 枚举进程内所有已加载模块，跳过 vDSO
pub fn loaded_modules() -> Vec<ModuleInfo> {
    unsafe extern "C" fn iterate_cb(
        info: *mut libc::dl_phdr_info,
        _size: usize,
        data: *mut c_void,
    ) -> libc::c_int {
        let modules = unsafe { &mut *(data as *mut Vec<ModuleInfo>) };
        if info.is_null() {
            return 0;
        }
        let info = unsafe { &*info };
        if info.dlpi_phdr.is_null() || info.dlpi_phnum == 0 {
            return 0;
        }
        let name = if info.dlpi_name.is_null() {
            ""
        } else {
            unsafe { CStr::from_ptr(info.dlpi_name) }
                .to_str()
                .unwrap_or("")
        };
        if is_vdso(name) {
            return 0;
        }
        // 第一个条目是主程序
        let is_main = modules.is_empty() && name.is_empty();
        if name.is_empty() && !is_main {
            return 0;
        }
        modules.push(ModuleInfo {
            pathname: name.to_string(),
            bias: info.dlpi_addr as usize,
            phdr: info.dlpi_phdr as usize,
            phnum: info.dlpi_phnum as usize,
            is_main,
        });
        0
    }

    let mut modules = Vec::<ModuleInfo>::new();
    unsafe {
        libc::dl_iterate_phdr(Some(iterate_cb), &mut modules as *mut _ as *mut c_void);
    }
    if let Some(main) = modules.iter_mut().find(|module| module.is_main) {
        main.pathname = main_exe_path();
    }
    modules
}

// 查找包含 addr 的模块
pub fn module_containing(addr: usize) -> Option<ModuleInfo> {
    loaded_modules()
        .into_iter()
        .find(|module| module.contains(addr))
}
