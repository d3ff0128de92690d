use std::ffi::c_void;
use std::ptr;

use srx_mock::{Method, Mock, SrxMockErrno, count_calls, verify_calls};

use crate::test_ctx::ensure_err;

type EventFn = extern "C" fn(i32) -> i32;

// 调用方持有的回调表
#[repr(C)]
struct Callbacks {
    on_event: EventFn,
}

extern "C" fn double_it(x: i32) -> i32 {
    x * 2
}

extern "C" fn negate(x: i32) -> i32 {
    -x
}

fn fire(callbacks: &Callbacks, x: i32) -> i32 {
    let func = unsafe { ptr::read_volatile(&callbacks.on_event) };
    func(x)
}

fn slot_of(callbacks: &mut Callbacks) -> *mut *mut c_void {
    &mut callbacks.on_event as *mut EventFn as *mut *mut c_void
}

pub unsafe fn scenario_pre_slot() {
    let mut callbacks = Callbacks { on_event: double_it };
    let slot = slot_of(&mut callbacks);
    let mock = Mock::at_slot(slot, negate as *mut c_void).expect("mock slot failed");
    assert_eq!(mock.method(), Method::Pre);
    assert!(mock.symbol().is_none());
    assert_eq!(fire(&callbacks, 5), 10);

    mock.enable().expect("enable slot failed");
    assert_eq!(fire(&callbacks, 5), -5);
    mock.disable().expect("disable slot failed");
    assert_eq!(fire(&callbacks, 5), 10);

    mock.enable().expect("re-enable slot failed");
    drop(mock);
    assert_eq!(callbacks.on_event as usize, double_it as usize);
}

pub unsafe fn scenario_count_calls() {
    let mut callbacks = Callbacks { on_event: double_it };
    let slot = slot_of(&mut callbacks);

    let (sum, count) = count_calls(slot, || (1..=3).map(|x| fire(&callbacks, x)).sum::<i32>())
        .expect("count_calls failed");
    assert_eq!((sum, count), (12, 3));

    let value = verify_calls(slot, 1, || fire(&callbacks, 21)).expect("verify_calls failed");
    assert_eq!(value, 42);
    ensure_err(
        verify_calls(slot, 2, || fire(&callbacks, 1)),
        SrxMockErrno::CallCount,
        "verify mismatch",
    );
    assert_eq!(callbacks.on_event as usize, double_it as usize);
}
