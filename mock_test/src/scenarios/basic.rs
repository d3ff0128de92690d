use std::ffi::c_void;
use std::sync::atomic::Ordering;

use srx_mock::{Method, Mock, SrxMockErrno, create, destroy, disable, enable, is_enabled};

use crate::test_ctx::{
    CHAIN_STUB, FAKE_UID, MOCK_A_COUNT, ensure_err, getresuid_now, mock_getresuid_a,
    mock_getresuid_b, mock_getresuid_chain, own_exe, real_uid,
};

pub unsafe fn scenario_got_single() {
    let mock = Mock::new("getresuid", mock_getresuid_a as *mut c_void).expect("mock getresuid failed");
    assert_eq!(mock.method(), Method::Got);
    assert_eq!(mock.is_enabled(), Ok(false));
    assert_eq!(getresuid_now(), (0, real_uid()));

    MOCK_A_COUNT.store(0, Ordering::Relaxed);
    {
        let _enabled = mock.enabled().expect("enable getresuid failed");
        assert_eq!(getresuid_now(), (7, FAKE_UID));
        assert_eq!(MOCK_A_COUNT.load(Ordering::Relaxed), 1);
    }
    assert_eq!(mock.is_enabled(), Ok(false));
    assert_eq!(getresuid_now(), (0, real_uid()));
    assert_eq!(MOCK_A_COUNT.load(Ordering::Relaxed), 1, "mock still hit after disable");

    mock.destroy().expect("destroy getresuid failed");
    assert_eq!(getresuid_now(), (0, real_uid()));
}

pub unsafe fn scenario_got_stacking() {
    let a = Mock::new("getresuid", mock_getresuid_a as *mut c_void).expect("mock A failed");
    let b = Mock::new("getresuid", mock_getresuid_b as *mut c_void).expect("mock B failed");
    assert_eq!(a.depth(), Ok(2));

    a.enable().expect("enable A failed");
    b.enable().expect("enable B failed");
    assert_eq!(getresuid_now(), (8, FAKE_UID + 1));

    b.disable().expect("disable B failed");
    assert_eq!(getresuid_now(), (7, FAKE_UID));

    drop(a);
    assert_eq!(getresuid_now(), (0, real_uid()));
    assert_eq!(b.depth(), Ok(1));
    b.enable().expect("re-enable B failed");
    assert_eq!(getresuid_now(), (8, FAKE_UID + 1));
}

pub unsafe fn scenario_got_real_chain() {
    let lower = Mock::new("getresuid", mock_getresuid_a as *mut c_void).expect("mock lower failed");
    let chain =
        Mock::new("getresuid", mock_getresuid_chain as *mut c_void).expect("mock chain failed");
    CHAIN_STUB.store(chain.stub(), Ordering::SeqCst);

    lower.enable().expect("enable lower failed");
    chain.enable().expect("enable chain failed");
    // 真实实现绕过下层 mock
    assert_eq!(getresuid_now(), (100, real_uid()));
}

pub unsafe fn scenario_got_stale_destroy() {
    let replacements = [mock_getresuid_a as *mut c_void, mock_getresuid_b as *mut c_void];
    let mut previous = None;
    for round in 0..8 {
        let stub = create("getresuid", replacements[round % 2], None).expect("create failed");
        enable(stub).expect("enable failed");
        let expected = if round % 2 == 0 { (7, FAKE_UID) } else { (8, FAKE_UID + 1) };
        assert_eq!(getresuid_now(), expected);
        if let Some(stale) = previous.take() {
            destroy(stale).expect("destroy stale failed");
            assert_eq!(getresuid_now(), expected, "stale destroy removed active mock");
        }
        disable(stub).expect("disable failed");
        assert_eq!(getresuid_now(), (0, real_uid()));
        previous = Some(stub);
    }
    if let Some(last) = previous {
        destroy(last).expect("destroy last failed");
        assert_eq!(destroy(last), Ok(()));
        ensure_err(is_enabled(last), SrxMockErrno::InvalidState, "is_enabled destroyed");
        ensure_err(enable(last), SrxMockErrno::InvalidState, "enable destroyed");
    }
}

pub unsafe fn scenario_got_caller_rule() {
    let exe = own_exe();
    let mock = Mock::in_callers(&exe, "getresuid", mock_getresuid_a as *mut c_void)
        .expect("mock in own callers failed");
    let _enabled = mock.enabled().expect("enable caller mock failed");
    assert_eq!(getresuid_now(), (7, FAKE_UID));

    ensure_err(
        Mock::in_callers("/nonexistent/libnone.so", "getresuid", mock_getresuid_b as *mut c_void),
        SrxMockErrno::MethodConflict,
        "second caller rule",
    );
}

pub unsafe fn scenario_refusals() {
    let replacement = mock_getresuid_a as *mut c_void;
    ensure_err(
        create("mock_test_no_such_symbol", replacement, None),
        SrxMockErrno::NoSym,
        "unknown symbol",
    );
    ensure_err(create("mprotect", replacement, None), SrxMockErrno::Reserved, "reserved symbol");
    ensure_err(
        create("getresuid", std::ptr::null_mut(), None),
        SrxMockErrno::InvalidArg,
        "null replacement",
    );
    ensure_err(
        create("getresuid", replacement, Some(Method::Pre)),
        SrxMockErrno::InvalidArg,
        "pre by name",
    );
    ensure_err(enable(u64::MAX), SrxMockErrno::NotFound, "unknown stub");
}
