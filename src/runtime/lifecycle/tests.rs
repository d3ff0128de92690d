// mock 生命周期的单元测试：以测试进程自身的 GOT 和函数为目标
use super::{
    create, create_pre, depth_of, destroy, disable, enable, is_enabled, method_of, original_of,
    with_real,
};
use crate::api::{Method, MockStub};
use crate::errno::Errno;
use crate::fault;
use crate::runtime::MutexPoisonRecover;
use crate::runtime::resolve::Symbol;
use crate::runtime::state::GLOBAL;
use crate::testing;
use std::cell::Cell;
use std::ffi::{c_int, c_void};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

// 测试中途失败时也要撤下补丁，避免影响后续用例
struct Stubs(Vec<MockStub>);

impl Stubs {
    fn push(&mut self, stub: MockStub) -> MockStub {
        self.0.push(stub);
        stub
    }
}

impl Drop for Stubs {
    fn drop(&mut self) {
        for stub in self.0.drain(..).rev() {
            let _ = destroy(stub);
        }
    }
}

type GetresuidFn = unsafe extern "C" fn(*mut libc::uid_t, *mut libc::uid_t, *mut libc::uid_t) -> c_int;

extern "C" fn uid_a(ruid: *mut libc::uid_t, _e: *mut libc::uid_t, _s: *mut libc::uid_t) -> c_int {
    unsafe { *ruid = 1001 };
    7
}

extern "C" fn uid_b(ruid: *mut libc::uid_t, _e: *mut libc::uid_t, _s: *mut libc::uid_t) -> c_int {
    unsafe { *ruid = 1002 };
    8
}

static CHAIN_STUB: AtomicU64 = AtomicU64::new(0);

// 经 with_real 调用原始实现，返回值加 100 以便区分
extern "C" fn uid_chain(ruid: *mut libc::uid_t, euid: *mut libc::uid_t, suid: *mut libc::uid_t) -> c_int {
    let stub = CHAIN_STUB.load(Ordering::SeqCst);
    with_real(stub, |real| {
        let real: GetresuidFn = unsafe { std::mem::transmute(real) };
        unsafe { real(ruid, euid, suid) + 100 }
    })
    .unwrap_or(-1)
}

fn call_getresuid() -> (c_int, libc::uid_t) {
    let (mut ruid, mut euid, mut suid) = (0, 0, 0);
    let rv = unsafe { libc::getresuid(&mut ruid, &mut euid, &mut suid) };
    (rv, ruid)
}

fn real_uid() -> libc::uid_t {
    unsafe { libc::getuid() }
}

fn getresuid() -> Symbol {
    Symbol::resolve("getresuid").expect("getresuid")
}

extern "C" fn forty_two(_x: i32) -> i32 {
    42
}

static STOMP_CHAIN_STUB: AtomicU64 = AtomicU64::new(0);

extern "C" fn stomp_chain(x: i32) -> i32 {
    let stub = STOMP_CHAIN_STUB.load(Ordering::SeqCst);
    with_real(stub, |real| {
        let real: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(real) };
        real(x) * 10
    })
    .unwrap_or(-1)
}

fn stomp_symbol() -> Symbol {
    Symbol::resolve("srx_mock_test_stomp_target").expect("stomp fixture")
}

fn call_stomp_target(x: i32) -> i32 {
    let call: unsafe extern "C" fn(i32) -> i32 = black_box(testing::srx_mock_test_stomp_target);
    unsafe { call(x) }
}

#[test]
fn got_mock_changes_result_and_out_param_until_disabled() {
    let _guard = crate::test_lock();
    let mut stubs = Stubs(Vec::new());
    let stub = stubs.push(create(&getresuid(), uid_a as usize, None, None).expect("create"));
    assert_eq!(method_of(stub), Ok(Method::Got));
    assert_eq!(is_enabled(stub), Ok(false));
    assert_eq!(call_getresuid(), (0, real_uid()));

    enable(stub).expect("enable");
    assert_eq!(call_getresuid(), (7, 1001));

    disable(stub).expect("disable");
    assert_eq!(call_getresuid(), (0, real_uid()));
}

#[test]
fn top_enabled_handle_wins_and_lower_one_resumes() {
    let _guard = crate::test_lock();
    let sym = getresuid();
    let mut stubs = Stubs(Vec::new());
    let a = stubs.push(create(&sym, uid_a as usize, None, None).expect("a"));
    let b = stubs.push(create(&sym, uid_b as usize, None, None).expect("b"));
    assert_eq!(depth_of(a), Ok(2));

    enable(a).expect("enable a");
    enable(b).expect("enable b");
    assert_eq!(call_getresuid(), (8, 1002));

    disable(b).expect("disable b");
    assert_eq!(call_getresuid(), (7, 1001));

    // 禁用非栈顶的句柄不影响栈顶
    enable(b).expect("enable b");
    disable(a).expect("disable a");
    assert_eq!(call_getresuid(), (8, 1002));

    disable(b).expect("disable b");
    assert_eq!(call_getresuid(), (0, real_uid()));
}

#[test]
fn destroying_stale_handles_out_of_order_keeps_active_mock() {
    let _guard = crate::test_lock();
    let sym = getresuid();
    let mut stubs = Stubs(Vec::new());
    let replacements = [uid_a as usize, uid_b as usize];
    let mut previous: Option<MockStub> = None;

    for round in 0..6 {
        let stub = stubs.push(create(&sym, replacements[round % 2], None, None).expect("create"));
        enable(stub).expect("enable");
        let expected = if round % 2 == 0 { (7, 1001) } else { (8, 1002) };
        assert_eq!(call_getresuid(), expected);

        // 上一轮的句柄在本轮启用之后才被回收
        if let Some(stale) = previous.take() {
            destroy(stale).expect("destroy stale");
            assert_eq!(destroy(stale), Ok(()));
            assert_eq!(call_getresuid(), expected);
        }
        disable(stub).expect("disable");
        assert_eq!(call_getresuid(), (0, real_uid()));
        previous = Some(stub);
    }

    // 销毁仍处于启用状态的底层句柄，栈顶保持生效
    let bottom = stubs.push(create(&sym, uid_a as usize, None, None).expect("bottom"));
    let top = stubs.push(create(&sym, uid_b as usize, None, None).expect("top"));
    enable(bottom).expect("enable bottom");
    enable(top).expect("enable top");
    destroy(bottom).expect("destroy bottom");
    assert_eq!(call_getresuid(), (8, 1002));
    destroy(top).expect("destroy top");
    assert_eq!(call_getresuid(), (0, real_uid()));
}

#[test]
fn real_reaches_pristine_original_under_stacked_mocks() {
    let _guard = crate::test_lock();
    let sym = getresuid();
    let mut stubs = Stubs(Vec::new());
    let lower = stubs.push(create(&sym, uid_a as usize, None, None).expect("lower"));
    let chain = stubs.push(create(&sym, uid_chain as usize, None, None).expect("chain"));
    CHAIN_STUB.store(chain, Ordering::SeqCst);

    enable(lower).expect("enable lower");
    enable(chain).expect("enable chain");
    assert_eq!(call_getresuid(), (100, real_uid()));

    let direct = with_real(lower, |real| {
        let real: GetresuidFn = unsafe { std::mem::transmute(real) };
        let (mut ruid, mut euid, mut suid) = (0, 0, 0);
        unsafe { real(&mut ruid, &mut euid, &mut suid) }
    });
    assert_eq!(direct, Ok(0));
}

#[test]
fn stomp_toggle_loop_stays_consistent() {
    let _guard = crate::test_lock();
    let sym = stomp_symbol();
    let before = unsafe { std::slice::from_raw_parts(sym.addr() as *const u8, sym.size()) }.to_vec();

    for round in 0..16 {
        let mut stubs = Stubs(Vec::new());
        let stub = stubs.push(create(&sym, forty_two as usize, Some(Method::Stomp), None).expect("create"));
        assert_eq!(call_stomp_target(round), 3 * round + 1);
        enable(stub).expect("enable");
        assert_eq!(call_stomp_target(round), 42);
        if round % 2 == 0 {
            disable(stub).expect("disable");
            assert_eq!(call_stomp_target(round), 3 * round + 1);
        }
    }

    let after = unsafe { std::slice::from_raw_parts(sym.addr() as *const u8, sym.size()) }.to_vec();
    assert_eq!(before, after);
}

#[test]
fn stomp_real_runs_unpatched_code_and_repatches() {
    let _guard = crate::test_lock();
    let sym = stomp_symbol();
    let mut stubs = Stubs(Vec::new());
    let stub = stubs.push(create(&sym, stomp_chain as usize, Some(Method::Stomp), None).expect("create"));
    STOMP_CHAIN_STUB.store(stub, Ordering::SeqCst);
    enable(stub).expect("enable");

    assert_eq!(call_stomp_target(2), 70);
    assert_eq!(call_stomp_target(3), 100);
    let real = with_real(stub, |real| {
        let real: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(real) };
        real(4)
    });
    assert_eq!(real, Ok(13));
    assert_eq!(call_stomp_target(4), 130);
}

#[test]
fn demangled_cpp_symbol_is_mockable() {
    let _guard = crate::test_lock();
    let sym = Symbol::resolve("A::Cpp::Namespace::withAFunction(int, int)").expect("cpp");
    assert_eq!(sym.name(), testing::CPP_MANGLED);

    extern "C" fn fixed(_a: i32, _b: i32) -> i32 {
        -5
    }
    let call: unsafe extern "C" fn(i32, i32) -> i32 = black_box(testing::cpp_with_a_function);
    let mut stubs = Stubs(Vec::new());
    let stub = stubs.push(create(&sym, fixed as usize, None, None).expect("create"));
    assert_eq!(method_of(stub), Ok(Method::Stomp));
    assert_eq!(unsafe { call(4, 2) }, 42);
    enable(stub).expect("enable");
    assert_eq!(unsafe { call(4, 2) }, -5);
    disable(stub).expect("disable");
    assert_eq!(unsafe { call(4, 2) }, 42);
}

#[test]
fn refusals_are_distinct_errors() {
    let _guard = crate::test_lock();
    let (tiny_addr, tiny_size) = testing::tiny_target();
    let tiny = Symbol::at(tiny_addr).expect("tiny");
    assert_eq!(tiny.size(), tiny_size);
    assert_eq!(
        create(&tiny, forty_two as usize, None, None),
        Err(Errno::TooSmall)
    );
    assert_eq!(
        create(&stomp_symbol(), forty_two as usize, Some(Method::Got), None),
        Err(Errno::NoSlots)
    );
    let mprotect = Symbol::resolve("mprotect").expect("mprotect");
    assert_eq!(
        create(&mprotect, forty_two as usize, None, None),
        Err(Errno::Reserved)
    );
    assert_eq!(
        create(&getresuid(), 0, None, None),
        Err(Errno::InvalidArg)
    );
}

#[test]
fn method_conflict_and_handle_states() {
    let _guard = crate::test_lock();
    let sym = getresuid();
    let mut stubs = Stubs(Vec::new());
    let stub = stubs.push(create(&sym, uid_a as usize, Some(Method::Got), None).expect("got"));
    assert_eq!(
        create(&sym, uid_b as usize, Some(Method::Stomp), None),
        Err(Errno::MethodConflict)
    );
    assert_eq!(
        create(&sym, uid_b as usize, None, Some("libc.so.6")),
        Err(Errno::MethodConflict)
    );
    let same = stubs.push(create(&sym, uid_b as usize, None, None).expect("same method"));
    assert_eq!(method_of(same), Ok(Method::Got));

    enable(stub).expect("enable");
    enable(stub).expect("enable twice");
    disable(stub).expect("disable");
    disable(stub).expect("disable twice");

    destroy(stub).expect("destroy");
    assert_eq!(enable(stub), Err(Errno::InvalidState));
    assert_eq!(disable(stub), Err(Errno::InvalidState));
    assert_eq!(is_enabled(stub), Err(Errno::InvalidState));
    assert_eq!(with_real(stub, |_| ()), Err(Errno::InvalidState));
    assert_eq!(destroy(stub), Ok(()));
    assert_eq!(enable(u64::MAX), Err(Errno::NotFound));
}

#[test]
fn pointer_slot_substitution_affects_only_that_slot() {
    let _guard = crate::test_lock();
    extern "C" fn seven() -> i32 {
        7
    }
    extern "C" fn nine() -> i32 {
        9
    }
    let mut slot: extern "C" fn() -> i32 = seven;
    let other: extern "C" fn() -> i32 = seven;
    let slot_addr = &mut slot as *mut _ as usize;
    let read = || {
        let func = unsafe { std::ptr::read_volatile(slot_addr as *const extern "C" fn() -> i32) };
        func()
    };

    let mut stubs = Stubs(Vec::new());
    let stub = stubs.push(create_pre(slot_addr, nine as usize).expect("pre"));
    assert_eq!(method_of(stub), Ok(Method::Pre));
    enable(stub).expect("enable");
    assert_eq!(read(), 9);
    assert_eq!(black_box(other)(), 7);
    disable(stub).expect("disable");
    assert_eq!(read(), 7);
    assert_eq!(create_pre(slot_addr + 1, nine as usize), Err(Errno::InvalidArg));
}

type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, libc::size_t) -> libc::ssize_t;

static READ_ORIGINAL: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static FAIL_READS: Cell<bool> = const { Cell::new(false) };
}

// 仅在置位的线程上让 read 失败，其余线程照常转发
extern "C" fn failing_read(fd: c_int, buf: *mut c_void, count: libc::size_t) -> libc::ssize_t {
    if FAIL_READS.with(Cell::get) {
        fault::set_errno(libc::EIO);
        return -1;
    }
    let real: ReadFn = unsafe { std::mem::transmute(READ_ORIGINAL.load(Ordering::SeqCst)) };
    unsafe { real(fd, buf, count) }
}

struct FailReads;

impl FailReads {
    fn on() -> Self {
        FAIL_READS.with(|flag| flag.set(true));
        FailReads
    }
}

impl Drop for FailReads {
    fn drop(&mut self) {
        FAIL_READS.with(|flag| flag.set(false));
    }
}

// 写入一个字节再读出，返回 read 的结果
fn pipe_round_trip(fds: [c_int; 2]) -> libc::ssize_t {
    let byte = [0x5au8];
    assert_eq!(unsafe { libc::write(fds[1], byte.as_ptr().cast(), 1) }, 1);
    let mut buf = [0u8; 1];
    unsafe { libc::read(fds[0], buf.as_mut_ptr().cast(), 1) }
}

#[test]
fn failing_read_mock_can_be_disabled_and_destroyed() {
    let _guard = crate::test_lock();
    let read = Symbol::resolve("read").expect("read");
    let mut fds = [0 as c_int; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

    let mut stubs = Stubs(Vec::new());
    let stub = stubs.push(create(&read, failing_read as usize, Some(Method::Got), None).expect("create"));
    READ_ORIGINAL.store(original_of(stub).expect("original"), Ordering::SeqCst);
    enable(stub).expect("enable");
    {
        let _failing = FailReads::on();
        assert_eq!(pipe_round_trip(fds), -1);
        disable(stub).expect("disable while read fails");
        assert_eq!(is_enabled(stub), Ok(false));
        assert_eq!(pipe_round_trip(fds), 1);

        enable(stub).expect("enable while read fails");
        assert_eq!(pipe_round_trip(fds), -1);
        destroy(stub).expect("destroy while read fails");
        assert_eq!(is_enabled(stub), Err(Errno::InvalidState));
        assert_eq!(pipe_round_trip(fds), 1);
    }
    unsafe {
        libc::close(fds[0]);
        libc::close(fds[1]);
    }
}

fn handle_count() -> usize {
    GLOBAL.state.lock_or_poison().handles.len()
}

#[test]
fn destroyed_handles_leave_no_bookkeeping_behind() {
    let _guard = crate::test_lock();
    let sym = getresuid();
    let before = handle_count();
    let mut last = 0;
    for _ in 0..200 {
        let stub = create(&sym, uid_a as usize, Some(Method::Got), None).expect("create");
        enable(stub).expect("enable");
        destroy(stub).expect("destroy");
        last = stub;
    }
    assert_eq!(handle_count(), before);
    assert!(!GLOBAL.state.lock_or_poison().stacks.contains_key(&sym.addr()));
    assert_eq!(call_getresuid().0, 0);

    assert_eq!(is_enabled(last), Err(Errno::InvalidState));
    assert_eq!(destroy(last), Ok(()));
    assert_eq!(is_enabled(0), Err(Errno::NotFound));
    assert_eq!(enable(last + 1_000_000), Err(Errno::NotFound));
}

// 以同址 MAP_SHARED 映射替换 slot 所在页：地址不被他人占用，但改写保护会失败
unsafe fn remap_page(page: usize, page_size: usize, flags: c_int) {
    let addr = unsafe {
        libc::mmap(
            page as *mut c_void,
            page_size,
            libc::PROT_READ | libc::PROT_WRITE,
            flags | libc::MAP_ANONYMOUS | libc::MAP_FIXED,
            -1,
            0,
        )
    };
    assert_eq!(addr as usize, page);
}

#[test]
fn failed_hardware_sync_keeps_previous_state() {
    let _guard = crate::test_lock();
    extern "C" fn seven() -> i32 {
        7
    }
    extern "C" fn nine() -> i32 {
        9
    }
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    let page = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            page_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    assert_ne!(page, libc::MAP_FAILED);
    let page = page as usize;
    let slot = page as *mut usize;
    unsafe { slot.write_volatile(seven as usize) };

    let mut stubs = Stubs(Vec::new());
    let stub = stubs.push(create_pre(page, nine as usize).expect("pre"));
    enable(stub).expect("enable");
    assert_eq!(depth_of(stub), Ok(1));

    unsafe { remap_page(page, page_size, libc::MAP_SHARED) };
    assert!(disable(stub).is_err());
    assert_eq!(is_enabled(stub), Ok(true));
    assert!(destroy(stub).is_err());
    assert_eq!(is_enabled(stub), Ok(true));
    assert_eq!(depth_of(stub), Ok(1));

    unsafe { remap_page(page, page_size, libc::MAP_PRIVATE) };
    destroy(stub).expect("destroy after page is writable again");
    assert_eq!(is_enabled(stub), Err(Errno::InvalidState));
    assert_eq!(unsafe { slot.read_volatile() }, seven as usize);
    unsafe { libc::munmap(page as *mut c_void, page_size) };
}
