use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use srx_mock::{SrxMockErrno, with_real};

pub static MOCK_A_COUNT: AtomicUsize = AtomicUsize::new(0);
pub static CHAIN_STUB: AtomicU64 = AtomicU64::new(0);
pub static CHECKSUM_STUB: AtomicU64 = AtomicU64::new(0);

pub type GetresuidFn =
    unsafe extern "C" fn(*mut libc::uid_t, *mut libc::uid_t, *mut libc::uid_t) -> libc::c_int;
pub type ChecksumFn = extern "C" fn(*const u8, usize) -> u32;

pub const FAKE_UID: libc::uid_t = 4242;

pub unsafe extern "C" fn mock_getresuid_a(
    ruid: *mut libc::uid_t,
    euid: *mut libc::uid_t,
    suid: *mut libc::uid_t,
) -> libc::c_int {
    MOCK_A_COUNT.fetch_add(1, Ordering::Relaxed);
    *ruid = FAKE_UID;
    *euid = FAKE_UID;
    *suid = FAKE_UID;
    7
}

pub unsafe extern "C" fn mock_getresuid_b(
    ruid: *mut libc::uid_t,
    euid: *mut libc::uid_t,
    suid: *mut libc::uid_t,
) -> libc::c_int {
    *ruid = FAKE_UID + 1;
    *euid = FAKE_UID + 1;
    *suid = FAKE_UID + 1;
    8
}

// 调用真实实现后把返回值加 100
pub unsafe extern "C" fn mock_getresuid_chain(
    ruid: *mut libc::uid_t,
    euid: *mut libc::uid_t,
    suid: *mut libc::uid_t,
) -> libc::c_int {
    let stub = CHAIN_STUB.load(Ordering::SeqCst);
    with_real(stub, |real| {
        let real: GetresuidFn = unsafe { std::mem::transmute(real) };
        unsafe { real(ruid, euid, suid) + 100 }
    })
    .unwrap_or(-1)
}

pub fn getresuid_now() -> (libc::c_int, libc::uid_t) {
    let (mut ruid, mut euid, mut suid) = (0, 0, 0);
    let rv = unsafe { libc::getresuid(&mut ruid, &mut euid, &mut suid) };
    (rv, ruid)
}

pub fn real_uid() -> libc::uid_t {
    unsafe { libc::getuid() }
}

// STOMP 目标：由本进程直接调用，不经过 GOT
#[unsafe(no_mangle)]
#[inline(never)]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn mock_test_checksum(data: *const u8, len: usize) -> u32 {
    let mut sum = 0x811c_9dc5u32;
    for i in 0..len {
        let byte = unsafe { *data.add(i) };
        sum = (sum ^ byte as u32).wrapping_mul(0x0100_0193).rotate_left(5);
    }
    sum
}

pub extern "C" fn mock_checksum_const(_data: *const u8, _len: usize) -> u32 {
    0xdead_beef
}

// 对真实结果取反
pub extern "C" fn mock_checksum_inverted(data: *const u8, len: usize) -> u32 {
    let stub = CHECKSUM_STUB.load(Ordering::SeqCst);
    with_real(stub, |real| {
        let real: ChecksumFn = unsafe { std::mem::transmute(real) };
        !real(data, len)
    })
    .unwrap_or(0)
}

pub fn checksum(data: &[u8]) -> u32 {
    let func = std::hint::black_box(mock_test_checksum as ChecksumFn);
    func(data.as_ptr(), data.len())
}

pub fn checksum_addr() -> *mut c_void {
    mock_test_checksum as *mut c_void
}

pub fn ensure_err<T: std::fmt::Debug>(result: Result<T, SrxMockErrno>, want: SrxMockErrno, op: &str) {
    match result {
        Err(err) => assert_eq!(err, want, "{op}: unexpected error"),
        Ok(value) => panic!("{op}: expected {want:?}, got Ok({value:?})"),
    }
}

pub fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

pub fn own_exe() -> String {
    std::env::current_exe()
        .expect("current_exe failed")
        .to_string_lossy()
        .into_owned()
}
