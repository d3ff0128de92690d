// 故障注入：在指定调用窗口内让系统调用返回给定值并设置 errno
// 以及基于 PRE 替换的调用次数统计
use crate::api::{Mock, MockStub};
use crate::errno::Errno;
use crate::log;
use crate::runtime::{self, CounterTrampo, MutexPoisonRecover};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::ptr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

// 支持注入故障的系统调用
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Syscall {
    Socket,
    Connect,
    Bind,
    Accept,
    Getsockopt,
    Setsockopt,
    Getsockname,
    Recv,
    Sendmsg,
}

impl Syscall {
    pub const ALL: [Syscall; 9] = [
        Self::Socket,
        Self::Connect,
        Self::Bind,
        Self::Accept,
        Self::Getsockopt,
        Self::Setsockopt,
        Self::Getsockname,
        Self::Recv,
        Self::Sendmsg,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Connect => "connect",
            Self::Bind => "bind",
            Self::Accept => "accept",
            Self::Getsockopt => "getsockopt",
            Self::Setsockopt => "setsockopt",
            Self::Getsockname => "getsockname",
            Self::Recv => "recv",
            Self::Sendmsg => "sendmsg",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn fake_entry(self) -> usize {
        match self {
            Self::Socket => fake_socket as usize,
            Self::Connect => fake_connect as usize,
            Self::Bind => fake_bind as usize,
            Self::Accept => fake_accept as usize,
            Self::Getsockopt => fake_getsockopt as usize,
            Self::Setsockopt => fake_setsockopt as usize,
            Self::Getsockname => fake_getsockname as usize,
            Self::Recv => fake_recv as usize,
            Self::Sendmsg => fake_sendmsg as usize,
        }
    }
}

struct FakeState {
    stub: MockStub,
    rv: isize,
    errno: i32,
    start_after: u64,
    count: u64,
    calls: u64,
    faked: u64,
}

static FAKES: Lazy<Mutex<BTreeMap<Syscall, FakeState>>> = Lazy::new(|| Mutex::new(BTreeMap::new()));

// 注入撤销后仍在途的调用经此回落到原始实现
static ORIGINALS: [AtomicUsize; Syscall::ALL.len()] = [const { AtomicUsize::new(0) }; Syscall::ALL.len()];

enum Decision {
    Fake { rv: isize, errno: i32 },
    Real { stub: Option<MockStub> },
}

// 前 start_after 次放行，随后 count 次注入，之后继续放行
fn decide(syscall: Syscall) -> Decision {
    let mut fakes = FAKES.lock_or_poison();
    let Some(state) = fakes.get_mut(&syscall) else {
        return Decision::Real { stub: None };
    };
    let nth = state.calls;
    state.calls += 1;
    if nth >= state.start_after && nth - state.start_after < state.count {
        state.faked += 1;
        return Decision::Fake {
            rv: state.rv,
            errno: state.errno,
        };
    }
    Decision::Real {
        stub: Some(state.stub),
    }
}

fn call_real<R, F>(syscall: Syscall, stub: Option<MockStub>, call: F) -> R
where
    F: Fn(usize) -> R,
{
    if let Some(stub) = stub
        && let Ok(value) = runtime::with_real(stub, &call)
    {
        return value;
    }
    call(ORIGINALS[syscall.index()].load(Ordering::Acquire))
}

pub(crate) fn set_errno(value: i32) {
    #[cfg(target_os = "android")]
    unsafe {
        *libc::__errno() = value;
    }
    #[cfg(not(target_os = "android"))]
    unsafe {
        *libc::__errno_location() = value;
    }
}

macro_rules! fake_entry {
    ($name:ident, $syscall:expr, fn($($arg:ident: $ty:ty),*) -> $ret:ty) => {
        unsafe extern "C" fn $name($($arg: $ty),*) -> $ret {
            match decide($syscall) {
                Decision::Fake { rv, errno } => {
                    set_errno(errno);
                    rv as $ret
                }
                Decision::Real { stub } => call_real($syscall, stub, |real| {
                    let real: unsafe extern "C" fn($($ty),*) -> $ret =
                        unsafe { std::mem::transmute(real) };
                    unsafe { real($($arg),*) }
                }),
            }
        }
    };
}

fake_entry!(fake_socket, Syscall::Socket,
    fn(domain: libc::c_int, ty: libc::c_int, protocol: libc::c_int) -> libc::c_int);
fake_entry!(fake_connect, Syscall::Connect,
    fn(fd: libc::c_int, addr: *const libc::sockaddr, len: libc::socklen_t) -> libc::c_int);
fake_entry!(fake_bind, Syscall::Bind,
    fn(fd: libc::c_int, addr: *const libc::sockaddr, len: libc::socklen_t) -> libc::c_int);
fake_entry!(fake_accept, Syscall::Accept,
    fn(fd: libc::c_int, addr: *mut libc::sockaddr, len: *mut libc::socklen_t) -> libc::c_int);
fake_entry!(fake_getsockopt, Syscall::Getsockopt,
    fn(fd: libc::c_int, level: libc::c_int, name: libc::c_int, value: *mut c_void,
       len: *mut libc::socklen_t) -> libc::c_int);
fake_entry!(fake_setsockopt, Syscall::Setsockopt,
    fn(fd: libc::c_int, level: libc::c_int, name: libc::c_int, value: *const c_void,
       len: libc::socklen_t) -> libc::c_int);
fake_entry!(fake_getsockname, Syscall::Getsockname,
    fn(fd: libc::c_int, addr: *mut libc::sockaddr, len: *mut libc::socklen_t) -> libc::c_int);
fake_entry!(fake_recv, Syscall::Recv,
    fn(fd: libc::c_int, buf: *mut c_void, n: libc::size_t, flags: libc::c_int) -> libc::ssize_t);
fake_entry!(fake_sendmsg, Syscall::Sendmsg,
    fn(fd: libc::c_int, msg: *const libc::msghdr, flags: libc::c_int) -> libc::ssize_t);

// 故障注入守卫，Drop 时撤销注入
#[derive(Debug)]
pub struct FakeSyscall {
    syscall: Syscall,
    mock: Mock,
}

impl FakeSyscall {
    pub fn syscall(&self) -> Syscall {
        self.syscall
    }

    // 经过注入入口的调用总数
    pub fn calls(&self) -> u64 {
        FAKES
            .lock_or_poison()
            .get(&self.syscall)
            .map_or(0, |state| state.calls)
    }

    // 被注入故障的调用次数
    pub fn faked(&self) -> u64 {
        FAKES
            .lock_or_poison()
            .get(&self.syscall)
            .map_or(0, |state| state.faked)
    }

    pub fn mock(&self) -> &Mock {
        &self.mock
    }
}

impl Drop for FakeSyscall {
    fn drop(&mut self) {
        // 先撤补丁，再移除注入状态
        if let Err(err) = runtime::destroy(self.mock.stub()) {
            log::warn(format_args!("remove fake {} failed: {}", self.syscall.name(), err));
        }
        FAKES.lock_or_poison().remove(&self.syscall);
    }
}

// 同一系统调用同时只能有一个注入
pub fn fake_syscall(
    syscall: Syscall,
    rv: isize,
    errno: i32,
    start_after: u64,
    count: u64,
) -> Result<FakeSyscall, Errno> {
    if FAKES.lock_or_poison().contains_key(&syscall) {
        log::warn(format_args!("{} is already faked", syscall.name()));
        return Err(Errno::InvalidState);
    }
    let mock = Mock::new(syscall.name(), syscall.fake_entry() as *mut c_void)?;
    let original = mock.original()? as usize;
    ORIGINALS[syscall.index()].store(original, Ordering::Release);
    FAKES.lock_or_poison().insert(
        syscall,
        FakeState {
            stub: mock.stub(),
            rv,
            errno,
            start_after,
            count,
            calls: 0,
            faked: 0,
        },
    );
    let fake = FakeSyscall { syscall, mock };
    fake.mock.enable()?;
    log::debug(format_args!(
        "fake {} via {:?}: rv {} errno {} window [{}, +{})",
        syscall.name(),
        fake.mock.method(),
        rv,
        errno,
        start_after,
        count
    ));
    Ok(fake)
}

// 替换 slot 处的函数指针为计数 trampoline，执行 body 后返回结果与调用次数
pub fn count_calls<R, F>(slot: *mut *mut c_void, body: F) -> Result<(R, usize), Errno>
where
    F: FnOnce() -> R,
{
    if slot.is_null() {
        return Err(Errno::InvalidArg);
    }
    let original = match runtime::stack_original(slot as usize) {
        Some(original) => original,
        None => unsafe { ptr::read_volatile(slot) as usize },
    };
    let counter = CounterTrampo::new(original)?;
    let mock = Mock::at_slot(slot, counter.trampo() as *mut c_void)?;
    let result = {
        let _enabled = mock.enabled()?;
        body()
    };
    drop(mock);
    let count = counter.count();
    Ok((result, count))
}

// 与 count_calls 相同，但调用次数不等于 expected 时返回 CallCount
pub fn verify_calls<R, F>(slot: *mut *mut c_void, expected: usize, body: F) -> Result<R, Errno>
where
    F: FnOnce() -> R,
{
    let (result, count) = count_calls(slot, body)?;
    if count != expected {
        log::warn(format_args!(
            "slot {:p}: expected {} calls, saw {}",
            slot, expected, count
        ));
        return Err(Errno::CallCount);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    extern "C" fn triple(x: i32) -> i32 {
        x * 3
    }

    fn call_through(slot: *mut *mut c_void, x: i32) -> i32 {
        let func: extern "C" fn(i32) -> i32 =
            unsafe { std::mem::transmute(ptr::read_volatile(slot)) };
        func(x)
    }

    #[test]
    fn connect_fails_in_window_then_reaches_real_syscall() {
        let _guard = crate::test_lock();
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener");
        let addr = listener.local_addr().expect("addr");

        let fake = fake_syscall(Syscall::Connect, -1, libc::ECONNREFUSED, 0, 3).expect("fake");
        for _ in 0..3 {
            let err = TcpStream::connect(addr).expect_err("faked connect");
            assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));
        }
        let stream = TcpStream::connect(addr).expect("real connect");
        assert_eq!(stream.peer_addr().expect("peer"), addr);
        assert_eq!(fake.calls(), 4);
        assert_eq!(fake.faked(), 3);

        assert_eq!(
            fake_syscall(Syscall::Connect, -1, libc::EINTR, 0, 1).err(),
            Some(Errno::InvalidState)
        );
        drop(fake);
        assert!(TcpStream::connect(addr).is_ok());
    }

    #[test]
    fn start_after_lets_early_calls_through() {
        let _guard = crate::test_lock();
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener");
        let addr = listener.local_addr().expect("addr");

        let fake = fake_syscall(Syscall::Connect, -1, libc::ETIMEDOUT, 1, 1).expect("fake");
        assert!(TcpStream::connect(addr).is_ok());
        let err = TcpStream::connect(addr).expect_err("faked connect");
        assert_eq!(err.raw_os_error(), Some(libc::ETIMEDOUT));
        assert!(TcpStream::connect(addr).is_ok());
        assert_eq!(fake.faked(), 1);
    }

    #[test]
    fn counts_calls_through_pointer_slot() {
        let _guard = crate::test_lock();
        let mut func: extern "C" fn(i32) -> i32 = triple;
        let slot = &mut func as *mut _ as *mut *mut c_void;

        let (sum, count) =
            count_calls(slot, || call_through(slot, 1) + call_through(slot, 2)).expect("count");
        assert_eq!(sum, 9);
        assert_eq!(count, 2);
        assert_eq!(unsafe { ptr::read_volatile(slot) } as usize, triple as usize);

        assert_eq!(verify_calls(slot, 1, || call_through(slot, 4)), Ok(12));
        assert_eq!(
            verify_calls(slot, 2, || call_through(slot, 4)),
            Err(Errno::CallCount)
        );
    }

    #[test]
    fn syscall_names_are_distinct() {
        let mut names: Vec<&str> = Syscall::ALL.iter().map(|sc| sc.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Syscall::ALL.len());
        assert_eq!(Syscall::Sendmsg.index(), 8);
    }
}
