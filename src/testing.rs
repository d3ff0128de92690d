// 测试用目标函数：用汇编固定函数体大小，避免被编译器优化改变
use crate::linux::modules;
use crate::runtime::resolve::Symbol;

pub(crate) const CPP_MANGLED: &str = "_ZN1A3Cpp9Namespace13withAFunctionEii";

// stomp_target(x) = 3x + 1，tiny_target(x) = x，cpp(a, b) = 10a + b
// landing_target 同 stomp_target 但以 ENDBR64 / BTI 开头；landing_short 去掉落地指令后放不下跳转
#[cfg(target_arch = "x86_64")]
std::arch::global_asm!(
    r#"
    .text
    .balign 16
    .globl srx_mock_test_stomp_target
    .type srx_mock_test_stomp_target, @function
srx_mock_test_stomp_target:
    leal    1(%rdi,%rdi,2), %eax
    .rept 24
    nop
    .endr
    ret
    .size srx_mock_test_stomp_target, .-srx_mock_test_stomp_target

    .balign 16
    .globl srx_mock_test_tiny_target
    .type srx_mock_test_tiny_target, @function
srx_mock_test_tiny_target:
    movl    %edi, %eax
    ret
    .size srx_mock_test_tiny_target, .-srx_mock_test_tiny_target

    .balign 16
    .globl _ZN1A3Cpp9Namespace13withAFunctionEii
    .type _ZN1A3Cpp9Namespace13withAFunctionEii, @function
_ZN1A3Cpp9Namespace13withAFunctionEii:
    imull   $10, %edi, %eax
    addl    %esi, %eax
    .rept 16
    nop
    .endr
    ret
    .size _ZN1A3Cpp9Namespace13withAFunctionEii, .-_ZN1A3Cpp9Namespace13withAFunctionEii

    .balign 16
    .globl srx_mock_test_landing_target
    .type srx_mock_test_landing_target, @function
srx_mock_test_landing_target:
    endbr64
    leal    1(%rdi,%rdi,2), %eax
    .rept 24
    nop
    .endr
    ret
    .size srx_mock_test_landing_target, .-srx_mock_test_landing_target

    .balign 16
    .globl srx_mock_test_landing_short
    .type srx_mock_test_landing_short, @function
srx_mock_test_landing_short:
    endbr64
    movl    %edi, %eax
    .rept 6
    nop
    .endr
    ret
    .size srx_mock_test_landing_short, .-srx_mock_test_landing_short
"#,
    options(att_syntax)
);

#[cfg(target_arch = "aarch64")]
std::arch::global_asm!(
    r#"
    .text
    .balign 16
    .globl srx_mock_test_stomp_target
    .type srx_mock_test_stomp_target, %function
srx_mock_test_stomp_target:
    add     w0, w0, w0, lsl #1
    add     w0, w0, #1
    .rept 6
    nop
    .endr
    ret
    .size srx_mock_test_stomp_target, .-srx_mock_test_stomp_target

    .balign 16
    .globl srx_mock_test_tiny_target
    .type srx_mock_test_tiny_target, %function
srx_mock_test_tiny_target:
    ret
    .size srx_mock_test_tiny_target, .-srx_mock_test_tiny_target

    .balign 16
    .globl _ZN1A3Cpp9Namespace13withAFunctionEii
    .type _ZN1A3Cpp9Namespace13withAFunctionEii, %function
_ZN1A3Cpp9Namespace13withAFunctionEii:
    mov     w2, #10
    madd    w0, w0, w2, w1
    .rept 4
    nop
    .endr
    ret
    .size _ZN1A3Cpp9Namespace13withAFunctionEii, .-_ZN1A3Cpp9Namespace13withAFunctionEii

    .balign 16
    .globl srx_mock_test_landing_target
    .type srx_mock_test_landing_target, %function
srx_mock_test_landing_target:
    hint    #34
    add     w0, w0, w0, lsl #1
    add     w0, w0, #1
    .rept 6
    nop
    .endr
    ret
    .size srx_mock_test_landing_target, .-srx_mock_test_landing_target

    .balign 16
    .globl srx_mock_test_landing_short
    .type srx_mock_test_landing_short, %function
srx_mock_test_landing_short:
    hint    #34
    nop
    nop
    ret
    .size srx_mock_test_landing_short, .-srx_mock_test_landing_short
"#
);

unsafe extern "C" {
    pub(crate) fn srx_mock_test_stomp_target(x: i32) -> i32;
    pub(crate) fn srx_mock_test_tiny_target(x: i32) -> i32;
    pub(crate) fn srx_mock_test_landing_target(x: i32) -> i32;
    pub(crate) fn srx_mock_test_landing_short(x: i32) -> i32;
    #[link_name = "_ZN1A3Cpp9Namespace13withAFunctionEii"]
    pub(crate) fn cpp_with_a_function(a: i32, b: i32) -> i32;
}

fn fixture(name: &str) -> (usize, usize) {
    let sym = Symbol::resolve(name).expect("fixture symbol");
    (sym.addr(), sym.size())
}

pub(crate) fn stomp_target() -> (usize, usize) {
    let (addr, size) = fixture("srx_mock_test_stomp_target");
    assert_eq!(addr, srx_mock_test_stomp_target as usize);
    (addr, size)
}

pub(crate) fn tiny_target() -> (usize, usize) {
    let (addr, size) = fixture("srx_mock_test_tiny_target");
    assert_eq!(addr, srx_mock_test_tiny_target as usize);
    (addr, size)
}

pub(crate) fn landing_target() -> (usize, usize) {
    let (addr, size) = fixture("srx_mock_test_landing_target");
    assert_eq!(addr, srx_mock_test_landing_target as usize);
    (addr, size)
}

pub(crate) fn landing_short() -> (usize, usize) {
    let (addr, size) = fixture("srx_mock_test_landing_short");
    assert_eq!(addr, srx_mock_test_landing_short as usize);
    (addr, size)
}

pub(crate) fn own_module() -> String {
    modules::loaded_modules()
        .into_iter()
        .find(|module| module.is_main)
        .map(|module| module.pathname)
        .expect("main module")
}
