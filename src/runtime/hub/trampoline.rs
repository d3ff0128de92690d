// Trampoline 代码生成
// 汇编模板在运行时复制到独立的可执行页，再填充尾部数据槽
use crate::errno::Errno;
use crate::linux::memory;
use std::mem::size_of;
use std::ptr;
use std::time::{SystemTime, UNIX_EPOCH};

// 释放后的冷却期，防止被立即复用时仍有线程停留在旧代码中
const TRAMPO_DELAY_SEC: u64 = 5;

mod manager;

// 分发模板：经数据槽中的指针读取当前目标并跳转，换目标只需原子写入目标单元
// 计数模板：原子递增计数器后跳转到固定目标
// 两者都只使用调用约定中的临时寄存器，参数寄存器保持不变
#[cfg(target_arch = "aarch64")]
std::arch::global_asm!(
    r#"
    .text
    .balign 16
    .global srx_mock_dispatch_template_start
    .global srx_mock_dispatch_template_data
    .type srx_mock_dispatch_template_start, %function
srx_mock_dispatch_template_start:
    ldr   x16, srx_mock_dispatch_cell
    ldr   x16, [x16]
    br    x16
    .balign 8
srx_mock_dispatch_template_data:
srx_mock_dispatch_cell:
    .quad 0

    .balign 16
    .global srx_mock_counter_template_start
    .global srx_mock_counter_template_data
    .type srx_mock_counter_template_start, %function
srx_mock_counter_template_start:
    ldr   x16, srx_mock_counter_cell
1:
    ldaxr x17, [x16]
    add   x17, x17, #1
    stlxr w9, x17, [x16]
    cbnz  w9, 1b
    ldr   x16, srx_mock_counter_target
    br    x16
    .balign 8
srx_mock_counter_template_data:
srx_mock_counter_cell:
    .quad 0
srx_mock_counter_target:
    .quad 0
"#
);

#[cfg(target_arch = "x86_64")]
std::arch::global_asm!(
    r#"
    .text
    .balign 16
    .global srx_mock_dispatch_template_start
    .global srx_mock_dispatch_template_data
    .type srx_mock_dispatch_template_start, @function
srx_mock_dispatch_template_start:
    endbr64
    movq    srx_mock_dispatch_cell(%rip), %r11
    jmpq    *(%r11)
    .balign 8
srx_mock_dispatch_template_data:
srx_mock_dispatch_cell:
    .quad 0

    .balign 16
    .global srx_mock_counter_template_start
    .global srx_mock_counter_template_data
    .type srx_mock_counter_template_start, @function
srx_mock_counter_template_start:
    endbr64
    movq    srx_mock_counter_cell(%rip), %r11
    lock incq (%r11)
    jmpq    *srx_mock_counter_target(%rip)
    .balign 8
srx_mock_counter_template_data:
srx_mock_counter_cell:
    .quad 0
srx_mock_counter_target:
    .quad 0
"#,
    options(att_syntax)
);

unsafe extern "C" {
    static srx_mock_dispatch_template_start: u8;
    static srx_mock_dispatch_template_data: u8;
    static srx_mock_counter_template_start: u8;
    static srx_mock_counter_template_data: u8;
}

// 模板种类：代码区间与数据槽数量
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Template {
    Dispatch,
    Counter,
}

impl Template {
    fn code_range(self) -> (usize, usize) {
        match self {
            Self::Dispatch => (
                ptr::addr_of!(srx_mock_dispatch_template_start) as usize,
                ptr::addr_of!(srx_mock_dispatch_template_data) as usize,
            ),
            Self::Counter => (
                ptr::addr_of!(srx_mock_counter_template_start) as usize,
                ptr::addr_of!(srx_mock_counter_template_data) as usize,
            ),
        }
    }

    fn data_slots(self) -> usize {
        match self {
            Self::Dispatch => 1,
            Self::Counter => 2,
        }
    }

    fn size(self) -> usize {
        let (start, data) = self.code_range();
        data.saturating_sub(start) + size_of::<usize>() * self.data_slots()
    }
}

fn now_sec() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

pub(super) fn free_trampo(trampo: usize) {
    manager::free_trampo(trampo);
}

// 生成 trampoline：分配独立页、复制模板代码、填充数据槽、刷新 icache、设置 RX 权限
pub(super) fn new_trampo(template: Template, data: &[usize]) -> Result<usize, Errno> {
    if data.len() != template.data_slots() {
        return Err(Errno::InvalidArg);
    }
    let (start, data_label) = template.code_range();
    let code_size = data_label.saturating_sub(start);
    if code_size == 0 || template.size() > memory::page_size() {
        return Err(Errno::NewTrampo);
    }

    let trampo = manager::alloc_trampo()?;
    unsafe {
        ptr::copy_nonoverlapping(start as *const u8, trampo as *mut u8, code_size);
        let data_ptr = (trampo + code_size) as *mut usize;
        for (idx, value) in data.iter().enumerate() {
            ptr::write(data_ptr.add(idx), *value);
        }
    }

    memory::flush_instruction_cache_range(trampo, trampo + template.size());
    let execute_prot = memory::PROT_READ_FLAG | memory::PROT_EXEC_FLAG;
    if memory::set_mem_protect(trampo, template.size(), execute_prot).is_err() {
        manager::free_trampo(trampo);
        return Err(Errno::NewTrampo);
    }
    Ok(trampo)
}
