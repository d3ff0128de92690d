mod basic;
mod fault;
mod pointer;
mod resolve;
mod stomp;
mod stress;

use srx_mock::clear;

use crate::test_ctx::env_flag;

pub unsafe fn run_all() {
    run("resolve-symbols", resolve::scenario_resolve_symbols);
    run("relocation-tables", resolve::scenario_relocation_tables);
    run("got-single", basic::scenario_got_single);
    run("got-stacking", basic::scenario_got_stacking);
    run("got-real-chain", basic::scenario_got_real_chain);
    run("got-stale-destroy", basic::scenario_got_stale_destroy);
    run("got-caller-rule", basic::scenario_got_caller_rule);
    run("refusals", basic::scenario_refusals);
    run("stomp-by-address", stomp::scenario_stomp_by_address);
    run("stomp-real", stomp::scenario_stomp_real);
    run("stomp-toggle", stomp::scenario_stomp_toggle);
    run("pre-slot", pointer::scenario_pre_slot);
    run("count-calls", pointer::scenario_count_calls);
    run("fake-connect", fault::scenario_fake_connect);
    run("fake-socket-window", fault::scenario_fake_socket_window);
    run("got-concurrent", stress::scenario_got_concurrent);
    if env_flag("MOCK_TEST_MARATHON") {
        run("churn-marathon", stress::scenario_churn_marathon);
    }
}

unsafe fn run(name: &str, scenario: unsafe fn()) {
    println!("scenario: {name}");
    scenario();
    clear();
}
