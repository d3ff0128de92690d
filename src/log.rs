// 日志输出，经 log 门面转发，由宿主决定具体的 logger
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

const LOG_TARGET: &str = "srx_mock";

const PRIORITY_DEBUG: u8 = 3;
const PRIORITY_INFO: u8 = 4;
const PRIORITY_WARN: u8 = 5;
const PRIORITY_ERROR: u8 = 6;

static LOG_PRIORITY: AtomicU8 = AtomicU8::new(PRIORITY_WARN);

// 设置日志级别，启用时输出 DEBUG 及以上，禁用时仅输出 WARN 及以上
pub fn set_debug_enabled(enabled: bool) {
    let priority = if enabled {
        PRIORITY_DEBUG
    } else {
        PRIORITY_WARN
    };
    LOG_PRIORITY.store(priority, Ordering::SeqCst);
}

fn enabled(priority: u8) -> bool {
    LOG_PRIORITY.load(Ordering::Relaxed) <= priority
}

fn write_log(priority: u8, args: fmt::Arguments) {
    if !enabled(priority) {
        return;
    }
    let level = match priority {
        PRIORITY_DEBUG => ::log::Level::Debug,
        PRIORITY_INFO => ::log::Level::Info,
        PRIORITY_WARN => ::log::Level::Warn,
        _ => ::log::Level::Error,
    };
    ::log::log!(target: LOG_TARGET, level, "{args}");
}

pub(crate) fn info(args: fmt::Arguments) {
    write_log(PRIORITY_INFO, args);
}

pub(crate) fn debug(args: fmt::Arguments) {
    write_log(PRIORITY_DEBUG, args);
}

pub(crate) fn warn(args: fmt::Arguments) {
    write_log(PRIORITY_WARN, args);
}

pub(crate) fn error(args: fmt::Arguments) {
    write_log(PRIORITY_ERROR, args);
}

#[cfg(test)]
mod tests {
    use super::{PRIORITY_DEBUG, PRIORITY_INFO, PRIORITY_WARN, enabled, set_debug_enabled};

    #[test]
    fn debug_switch_moves_priority_gate() {
        let _guard = crate::test_lock();
        set_debug_enabled(true);
        assert!(enabled(PRIORITY_DEBUG));
        set_debug_enabled(false);
        assert!(!enabled(PRIORITY_DEBUG));
        assert!(!enabled(PRIORITY_INFO));
        assert!(enabled(PRIORITY_WARN));
    }
}
