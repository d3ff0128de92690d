use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use srx_mock::{Mock, create, destroy, enable};

use crate::test_ctx::{env_usize, getresuid_now, mock_getresuid_a, real_uid};

// 工作线程持续调用，主线程反复启停：每次调用只能看到完整的旧值或新值
pub unsafe fn scenario_got_concurrent() {
    let worker_count = env_usize("MOCK_TEST_CONCURRENT_WORKERS", 16);
    let toggle_rounds = env_usize("MOCK_TEST_CONCURRENT_ROUNDS", 200);

    let mock = Mock::new("getresuid", mock_getresuid_a as *mut c_void).expect("mock failed");
    let stop = Arc::new(AtomicBool::new(false));
    let start_barrier = Arc::new(Barrier::new(worker_count + 1));
    let uid = real_uid();
    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let barrier = Arc::clone(&start_barrier);
        let stop = Arc::clone(&stop);
        workers.push(std::thread::spawn(move || {
            barrier.wait();
            let mut calls = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let (rv, ruid) = getresuid_now();
                assert!(
                    (rv, ruid) == (0, uid) || rv == 7,
                    "torn call result rv {rv} ruid {ruid}"
                );
                calls += 1;
            }
            calls
        }));
    }

    start_barrier.wait();
    for _ in 0..toggle_rounds {
        mock.enable().expect("enable concurrent failed");
        std::thread::sleep(Duration::from_micros(200));
        mock.disable().expect("disable concurrent failed");
    }
    stop.store(true, Ordering::Relaxed);

    let mut total = 0;
    for worker in workers {
        total += worker.join().expect("concurrent worker panic");
    }
    log::info!("concurrent getresuid calls: {total}");
    assert_eq!(getresuid_now(), (0, uid));
}

pub unsafe fn scenario_churn_marathon() {
    let rounds = env_usize("MOCK_TEST_MARATHON_ROUNDS", 20_000);
    for round in 0..rounds {
        let stub = create("getresuid", mock_getresuid_a as *mut c_void, None).expect("create failed");
        enable(stub).expect("enable failed");
        assert_eq!(getresuid_now().0, 7);
        destroy(stub).expect("destroy failed");
        assert_eq!(getresuid_now(), (0, real_uid()), "round {round}");
    }
}
