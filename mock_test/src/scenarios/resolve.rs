use srx_mock::{relocations, relocations_from_file, resolve, resolve_addr, resolve_in};

use crate::test_ctx::{checksum_addr, env_flag, own_exe};

pub unsafe fn scenario_resolve_symbols() {
    let libc_sym = resolve("getresuid").expect("resolve getresuid failed");
    assert!(libc_sym.module().contains("libc"), "getresuid found in {}", libc_sym.module());
    assert!(libc_sym.size() > 0);

    let scoped = resolve_in(libc_sym.module(), "getresuid").expect("resolve_in libc failed");
    assert_eq!(scoped.addr(), libc_sym.addr());

    let own = resolve_addr(checksum_addr() as usize).expect("resolve_addr checksum failed");
    assert_eq!(own.name(), "mock_test_checksum");
    assert_eq!(own.addr(), checksum_addr() as usize);
    assert_eq!(own.module(), own_exe());

    // Rust 符号按地址解析后带有解码名
    let rust_fn = resolve_addr(env_flag as usize).expect("resolve_addr env_flag failed");
    let demangled = rust_fn.demangled().expect("rust symbol not demangled");
    assert!(demangled.contains("env_flag"), "demangled as {demangled}");

    assert!(resolve("mock_test_no_such_symbol").is_err());
}

pub unsafe fn scenario_relocation_tables() {
    let exe = own_exe();
    let in_memory = relocations(Some(&exe));
    assert!(
        !in_memory.slots_for("getresuid").is_empty(),
        "no in-memory slot for getresuid"
    );

    let on_disk = relocations_from_file(&exe).expect("read relocations from disk failed");
    let sections = on_disk.sections_for("getresuid");
    assert!(
        sections.iter().any(|name| name.starts_with(".rel")),
        "getresuid sections: {sections:?}"
    );
    assert!(relocations(Some("/nonexistent/libnone.so")).is_empty());
}
