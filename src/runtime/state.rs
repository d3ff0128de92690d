// 运行时核心状态定义：mock 栈、句柄表、配置及全局同步原语
use crate::api::{Method, MockStub};
use crate::errno::Errno;
use crate::log;
use crate::runtime::hub::Hub;
use crate::runtime::patch::Patch;
use crate::runtime::resolve::Symbol;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

// 环境变量：调试日志开关与默认 mock 方式
const ENV_DEBUG: &str = "SRX_MOCK_DEBUG";
const ENV_METHOD: &str = "SRX_MOCK_METHOD";

// Mutex poison 恢复扩展，避免持锁线程 panic 后引发连锁 panic
pub(crate) trait MutexPoisonRecover<T> {
    fn lock_or_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexPoisonRecover<T> for Mutex<T> {
    fn lock_or_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// 句柄生命周期：Disabled <-> Enabled；销毁后从句柄表移除
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum HandleState {
    Disabled,
    Enabled,
}

// 句柄表条目
#[derive(Clone, Copy, Debug)]
pub(super) struct HandleEntry {
    pub(super) key: usize,
    pub(super) state: HandleState,
}

// mock 栈中的一层，按创建顺序排列，越靠后越优先
#[derive(Clone, Copy, Debug)]
pub(super) struct StackEntry {
    pub(super) stub: MockStub,
    pub(super) replacement: usize,
    pub(super) enabled: bool,
}

// 同一目标上的全部 mock；key 为符号地址，PRE 方式下为指针槽地址
pub(super) struct SymbolMockStack {
    pub(super) id: u64,
    pub(super) key: usize,
    pub(super) label: String,
    pub(super) symbol: Option<Symbol>,
    pub(super) method: Method,
    pub(super) caller_rule: Option<String>,
    // 打补丁前的原始地址，整个栈生命周期内不变
    pub(super) original: usize,
    pub(super) entries: Vec<StackEntry>,
    pub(super) hub: Option<Box<Hub>>,
    pub(super) patch: Option<Patch>,
    // with_real 嵌套深度，大于 0 时 STOMP 补丁暂时撤下
    pub(super) suspended: usize,
}

impl SymbolMockStack {
    // 栈顶（最后创建的）已启用替换函数
    pub(super) fn top_enabled(&self) -> Option<usize> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.enabled)
            .map(|entry| entry.replacement)
    }

    pub(super) fn set_enabled(&mut self, stub: MockStub, enabled: bool) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.stub == stub) {
            entry.enabled = enabled;
        }
    }
}

// 运行时配置
#[derive(Clone, Copy, Debug, Default)]
pub(super) struct Config {
    pub(super) debug: bool,
    pub(super) default_method: Option<Method>,
}

impl Config {
    fn from_env() -> Self {
        let debug = std::env::var(ENV_DEBUG)
            .map(|value| matches!(value.trim(), "1" | "true" | "on" | "yes"))
            .unwrap_or(false);
        let default_method = match std::env::var(ENV_METHOD) {
            Ok(value) => match Method::from_name(value.trim()) {
                Ok(method) => Some(method),
                Err(_) => {
                    log::warn(format_args!("ignore {}={}", ENV_METHOD, value));
                    None
                }
            },
            Err(_) => None,
        };
        if debug {
            log::set_debug_enabled(true);
        }
        Self {
            debug,
            default_method,
        }
    }
}

// 核心可变状态，由 GlobalState::state 互斥锁保护
#[derive(Default)]
pub(super) struct CoreState {
    pub(super) next_stub: MockStub,
    pub(super) next_stack_id: u64,
    pub(super) config: Config,
    pub(super) stacks: BTreeMap<usize, SymbolMockStack>,
    pub(super) handles: BTreeMap<MockStub, HandleEntry>,
}

impl CoreState {
    // stub 单调递增分配，已发放却不在表中的即为已销毁
    pub(super) fn handle(&self, stub: MockStub) -> Result<HandleEntry, Errno> {
        match self.handles.get(&stub) {
            Some(entry) => Ok(*entry),
            None if stub != 0 && stub < self.next_stub => Err(Errno::InvalidState),
            None => Err(Errno::NotFound),
        }
    }
}

// 全局同步容器；所有补丁写入都在 state 锁内完成
pub(super) struct GlobalState {
    pub(super) state: Mutex<CoreState>,
}

pub(super) static GLOBAL: Lazy<GlobalState> = Lazy::new(|| GlobalState {
    state: Mutex::new(CoreState {
        next_stub: 1,
        next_stack_id: 1,
        config: Config::from_env(),
        ..CoreState::default()
    }),
});
