#![allow(dead_code)]
#![allow(unsafe_op_in_unsafe_fn)]
#![allow(clippy::missing_safety_doc)]

#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("srx_mock supports Linux and Android only");

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
compile_error!("srx_mock supports only 64-bit architectures: aarch64 and x86_64");

// 公共 API 层，提供 mock 创建、启停、销毁及符号解析
mod api;
// 符号名解码
mod demangle;
// ELF 解析核心，处理动态段、符号表、重定位表
mod elf;
// 错误码定义
mod errno;
// 故障注入与调用计数
mod fault;
// 内存保护与模块枚举
mod linux;
// 日志输出，经 log 门面
mod log;
// 运行时状态管理：生命周期、补丁、hub
mod runtime;
// 版本信息
mod version;

pub use api::{
    Method, Mock, MockGuard, MockStub, clear, create, create_for, create_in, create_pre,
    destroy, disable, enable, get_debug, get_default_method, get_version, is_enabled,
    relocations, relocations_from_file, resolve, resolve_addr, resolve_in, set_debug,
    set_default_method, with_real,
};
pub use elf::{RelocationSlot, RelocationTable, SlotKind};
pub use errno::Errno as SrxMockErrno;
pub use fault::{FakeSyscall, Syscall, count_calls, fake_syscall, verify_calls};
pub use linux::modules::{ModuleInfo, loaded_modules};
pub use runtime::resolve::Symbol;

// 改写测试进程自身代码或 GOT 的测试串行执行
#[cfg(test)]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    use runtime::MutexPoisonRecover;
    static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    TEST_LOCK.lock_or_poison()
}

#[cfg(test)]
pub(crate) mod testing;
