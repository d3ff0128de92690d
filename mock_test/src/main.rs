#![allow(unsafe_op_in_unsafe_fn)]

mod scenarios;
mod test_ctx;

use srx_mock::{get_version, set_debug};

fn main() {
    env_logger::init();
    set_debug(true);
    log::info!("{}", get_version());
    unsafe {
        scenarios::run_all();
    }
    println!("mock_test all scenarios passed");
}
