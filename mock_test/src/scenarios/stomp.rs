use std::sync::atomic::Ordering;

use srx_mock::{Method, Mock, resolve_addr};

use crate::test_ctx::{
    CHECKSUM_STUB, checksum, checksum_addr, mock_checksum_const, mock_checksum_inverted,
};

const INPUT: &[u8] = b"srx_mock stomp scenario";

pub unsafe fn scenario_stomp_by_address() {
    let expected = checksum(INPUT);
    let sym = resolve_addr(checksum_addr() as usize).expect("resolve checksum failed");
    let mock = Mock::for_symbol(&sym, mock_checksum_const as *mut std::ffi::c_void, None)
        .expect("mock checksum failed");
    // 进程内直接调用没有 GOT slot，只能改写入口
    assert_eq!(mock.method(), Method::Stomp);

    {
        let _enabled = mock.enabled().expect("enable checksum failed");
        assert_eq!(checksum(INPUT), 0xdead_beef);
    }
    assert_eq!(checksum(INPUT), expected);
}

pub unsafe fn scenario_stomp_real() {
    let expected = checksum(INPUT);
    let sym = resolve_addr(checksum_addr() as usize).expect("resolve checksum failed");
    let mock = Mock::for_symbol(
        &sym,
        mock_checksum_inverted as *mut std::ffi::c_void,
        Some(Method::Stomp),
    )
    .expect("mock checksum failed");
    CHECKSUM_STUB.store(mock.stub(), Ordering::SeqCst);
    mock.enable().expect("enable checksum failed");

    assert_eq!(checksum(INPUT), !expected);
    assert_eq!(checksum(INPUT), !expected, "patch not re-applied after real call");
    let direct = mock
        .real(|real| {
            let real: crate::test_ctx::ChecksumFn = unsafe { std::mem::transmute(real) };
            real(INPUT.as_ptr(), INPUT.len())
        })
        .expect("real checksum failed");
    assert_eq!(direct, expected);
}

pub unsafe fn scenario_stomp_toggle() {
    let expected = checksum(INPUT);
    let sym = resolve_addr(checksum_addr() as usize).expect("resolve checksum failed");
    let before = std::slice::from_raw_parts(sym.addr() as *const u8, sym.size()).to_vec();

    for round in 0..32 {
        let mock = Mock::for_symbol(&sym, mock_checksum_const as *mut std::ffi::c_void, None)
            .expect("mock checksum failed");
        mock.enable().expect("enable checksum failed");
        assert_eq!(checksum(INPUT), 0xdead_beef);
        if round % 2 == 0 {
            mock.disable().expect("disable checksum failed");
            assert_eq!(checksum(INPUT), expected);
        }
    }

    let after = std::slice::from_raw_parts(sym.addr() as *const u8, sym.size()).to_vec();
    assert_eq!(before, after, "checksum bytes differ after toggle loop");
}
