// STOMP 方式：用绝对跳转覆盖函数入口，所有调用路径（包括同模块直接调用）都会被重定向
// 覆盖前保存原始字节，revert 时按字节恢复
use crate::errno::Errno;
use crate::linux::memory;
use crate::log;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

// movabs $target, %r11; jmpq *%r11
#[cfg(target_arch = "x86_64")]
pub(crate) const FOOTPRINT: usize = 13;
// ldr x16, #8; br x16; .quad target
#[cfg(target_arch = "aarch64")]
pub(crate) const FOOTPRINT: usize = 16;

// CET/BTI 落地指令保留在原位，补丁写在它之后
#[cfg(target_arch = "x86_64")]
const LANDING_PADS: [[u8; 4]; 1] = [[0xf3, 0x0f, 0x1e, 0xfa]];
#[cfg(target_arch = "aarch64")]
const LANDING_PADS: [[u8; 4]; 2] = [
    0xd503_245f_u32.to_le_bytes(),
    0xd503_24df_u32.to_le_bytes(),
];

// 已安装的入口补丁
pub(crate) struct StompPatch {
    patch_addr: usize,
    saved: [u8; FOOTPRINT],
    module: String,
}

impl StompPatch {
    pub(crate) fn patch_addr(&self) -> usize {
        self.patch_addr
    }

    pub(crate) fn revert(&self) -> Result<(), Errno> {
        unsafe { write_code(self.patch_addr, &self.saved, &self.module)? };
        log::info(format_args!(
            "SRX_MK_OK restore 0x{:x} {}",
            self.patch_addr, self.module
        ));
        Ok(())
    }
}

// 计算补丁写入位置；函数体不足以容纳跳转序列时返回 TooSmall
pub(crate) fn patch_site(addr: usize, size: usize) -> Result<usize, Errno> {
    if addr == 0 {
        return Err(Errno::InvalidArg);
    }
    let skip = landing_pad_len(addr, size);
    if size < skip + FOOTPRINT {
        log::warn(format_args!(
            "function 0x{:x} has {} bytes, {} needed",
            addr,
            size,
            skip + FOOTPRINT
        ));
        return Err(Errno::TooSmall);
    }
    Ok(addr + skip)
}

fn landing_pad_len(addr: usize, size: usize) -> usize {
    if size < 4 {
        return 0;
    }
    let mut head = [0u8; 4];
    unsafe { ptr::copy_nonoverlapping(addr as *const u8, head.as_mut_ptr(), 4) };
    if LANDING_PADS.contains(&head) { 4 } else { 0 }
}

#[cfg(target_arch = "x86_64")]
fn jump_bytes(target: usize) -> [u8; FOOTPRINT] {
    let mut code = [0u8; FOOTPRINT];
    code[0] = 0x49;
    code[1] = 0xbb;
    code[2..10].copy_from_slice(&(target as u64).to_le_bytes());
    code[10..13].copy_from_slice(&[0x41, 0xff, 0xe3]);
    code
}

#[cfg(target_arch = "aarch64")]
fn jump_bytes(target: usize) -> [u8; FOOTPRINT] {
    let mut code = [0u8; FOOTPRINT];
    code[0..4].copy_from_slice(&0x5800_0050_u32.to_le_bytes());
    code[4..8].copy_from_slice(&0xd61f_0200_u32.to_le_bytes());
    code[8..16].copy_from_slice(&(target as u64).to_le_bytes());
    code
}

// 在 [addr, addr+size) 的入口写入跳到 target 的补丁
pub(crate) fn install(
    addr: usize,
    size: usize,
    target: usize,
    module: &str,
) -> Result<StompPatch, Errno> {
    let patch_addr = patch_site(addr, size)?;
    let mut saved = [0u8; FOOTPRINT];
    unsafe { ptr::copy_nonoverlapping(patch_addr as *const u8, saved.as_mut_ptr(), FOOTPRINT) };
    unsafe { write_code(patch_addr, &jump_bytes(target), module)? };
    log::info(format_args!(
        "SRX_MK_OK stomp 0x{:x} -> 0x{:x} {}",
        patch_addr, target, module
    ));
    Ok(StompPatch {
        patch_addr,
        saved,
        module: module.to_string(),
    })
}

// 先写尾部再原子写入首个 8 字节，其他线程不会执行到半截的跳转
unsafe fn write_code(addr: usize, code: &[u8], module: &str) -> Result<(), Errno> {
    unsafe {
        memory::with_writable(addr, code.len(), Some(module), || store_code(addr, code))?;
    }
    memory::flush_instruction_cache_range(addr, addr + code.len());
    Ok(())
}

unsafe fn store_code(addr: usize, code: &[u8]) {
    if addr % 8 != 0 || code.len() < 8 {
        unsafe { ptr::copy_nonoverlapping(code.as_ptr(), addr as *mut u8, code.len()) };
        return;
    }
    let mut head = [0u8; 8];
    head.copy_from_slice(&code[..8]);
    unsafe {
        ptr::copy_nonoverlapping(code[8..].as_ptr(), (addr + 8) as *mut u8, code.len() - 8);
        (*(addr as *const AtomicU64)).store(u64::from_ne_bytes(head), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::hint::black_box;

    extern "C" fn forty_two(_x: i32) -> i32 {
        42
    }

    fn read_bytes(addr: usize, len: usize) -> Vec<u8> {
        unsafe { std::slice::from_raw_parts(addr as *const u8, len) }.to_vec()
    }

    #[test]
    fn stomp_round_trip_restores_bytes() {
        let _guard = crate::test_lock();
        let (addr, size) = testing::stomp_target();
        let module = testing::own_module();
        let before = read_bytes(addr, size);
        let call: unsafe extern "C" fn(i32) -> i32 = black_box(testing::srx_mock_test_stomp_target);
        assert_eq!(unsafe { call(5) }, 16);

        let patch = install(addr, size, forty_two as usize, &module).expect("stomp");
        assert!(patch.patch_addr() >= addr);
        assert_eq!(unsafe { call(5) }, 42);

        patch.revert().expect("revert");
        assert_eq!(read_bytes(addr, size), before);
        assert_eq!(unsafe { call(5) }, 16);
    }

    #[test]
    fn too_small_function_is_left_untouched() {
        let (addr, size) = testing::tiny_target();
        let before = read_bytes(addr, size);
        assert_eq!(
            install(addr, size, forty_two as usize, &testing::own_module()).err(),
            Some(Errno::TooSmall)
        );
        assert_eq!(read_bytes(addr, size), before);
    }

    #[test]
    fn jump_sequence_embeds_target() {
        let code = jump_bytes(0x1122_3344_5566_7788);
        #[cfg(target_arch = "x86_64")]
        assert_eq!(&code[2..10], &0x1122_3344_5566_7788_u64.to_le_bytes());
        #[cfg(target_arch = "aarch64")]
        assert_eq!(&code[8..16], &0x1122_3344_5566_7788_u64.to_le_bytes());
        assert_eq!(code.len(), FOOTPRINT);
    }

    #[test]
    fn landing_pad_stays_in_place_and_patch_follows_it() {
        let _guard = crate::test_lock();
        let (addr, size) = testing::landing_target();
        let module = testing::own_module();
        let before = read_bytes(addr, size);
        assert_eq!(landing_pad_len(addr, size), 4);
        let call: unsafe extern "C" fn(i32) -> i32 = black_box(testing::srx_mock_test_landing_target);
        assert_eq!(unsafe { call(5) }, 16);

        let patch = install(addr, size, forty_two as usize, &module).expect("stomp");
        assert_eq!(patch.patch_addr(), addr + 4);
        assert_eq!(read_bytes(addr, 4), before[..4]);
        assert_eq!(read_bytes(addr + 4, FOOTPRINT), jump_bytes(forty_two as usize));
        assert_eq!(unsafe { call(5) }, 42);

        patch.revert().expect("revert");
        assert_eq!(read_bytes(addr, size), before);
        assert_eq!(unsafe { call(5) }, 16);
    }

    #[test]
    fn landing_pad_counts_toward_required_size() {
        let (addr, size) = testing::landing_short();
        assert!(size >= FOOTPRINT);
        assert!(size < FOOTPRINT + 4);
        let before = read_bytes(addr, size);
        assert_eq!(patch_site(addr, size), Err(Errno::TooSmall));
        assert_eq!(
            install(addr, size, forty_two as usize, &testing::own_module()).err(),
            Some(Errno::TooSmall)
        );
        assert_eq!(read_bytes(addr, size), before);
    }
}
