use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};

use srx_mock::{SrxMockErrno, Syscall, fake_syscall};

use crate::test_ctx::ensure_err;

pub unsafe fn scenario_fake_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener failed");
    let addr = listener.local_addr().expect("listener addr failed");

    let fake = fake_syscall(Syscall::Connect, -1, libc::ECONNREFUSED, 0, 2)
        .expect("fake connect failed");
    ensure_err(
        fake_syscall(Syscall::Connect, -1, libc::EINTR, 0, 1),
        SrxMockErrno::InvalidState,
        "double fake",
    );
    for attempt in 0..2 {
        let err = TcpStream::connect(addr).expect_err("faked connect succeeded");
        assert_eq!(err.kind(), ErrorKind::ConnectionRefused, "attempt {attempt}");
    }
    let stream = TcpStream::connect(addr).expect("connect after window failed");
    assert_eq!(fake.calls(), 3);
    assert_eq!(fake.faked(), 2);
    drop(stream);
    drop(fake);

    TcpStream::connect(addr).expect("connect after fake removed failed");
}

fn open_socket() -> Result<libc::c_int, i32> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(0));
    }
    unsafe { libc::close(fd) };
    Ok(fd)
}

pub unsafe fn scenario_fake_socket_window() {
    let fake = fake_syscall(Syscall::Socket, -1, libc::EMFILE, 1, 1).expect("fake socket failed");
    assert!(open_socket().is_ok(), "first socket must pass through");
    assert_eq!(open_socket(), Err(libc::EMFILE));
    assert!(open_socket().is_ok(), "socket after window must pass through");
    assert_eq!((fake.calls(), fake.faked()), (3, 1));
}
