// 硬件状态同步：让补丁与 hub 目标反映 mock 栈的当前状态
// 栈顶已启用的替换函数生效；没有已启用项或处于 with_real 期间时撤下补丁
use crate::api::Method;
use crate::errno::Errno;
use crate::log;
use crate::runtime::hub;
use crate::runtime::patch::{Patch, got, pre, stomp};
use crate::runtime::state::SymbolMockStack;

pub(super) fn sync_hardware(stack: &mut SymbolMockStack) -> Result<(), Errno> {
    let want = if stack.suspended > 0 {
        None
    } else {
        stack.top_enabled()
    };
    match want {
        Some(replacement) => install_for(stack, replacement),
        None => remove_patch(stack),
    }
}

fn install_for(stack: &mut SymbolMockStack, replacement: usize) -> Result<(), Errno> {
    if stack.hub.is_none() {
        stack.hub = Some(hub::create_hub(stack.original)?);
    }
    let Some(hub) = &stack.hub else {
        return Err(Errno::Unknown);
    };
    hub.set_target(replacement);
    let trampo = hub.trampo();
    if stack.patch.is_some() {
        return Ok(());
    }

    match install_patch(stack, trampo) {
        Ok(patch) => {
            log::debug(format_args!(
                "{} patched via {:?}: {}",
                stack.label,
                stack.method,
                describe(&patch)
            ));
            stack.patch = Some(patch);
            Ok(())
        }
        Err(err) => {
            if let Some(hub) = &stack.hub {
                hub.set_target(stack.original);
            }
            log::warn(format_args!(
                "{} patch via {:?} failed: {}",
                stack.label, stack.method, err
            ));
            Err(err)
        }
    }
}

// 先撤补丁再复位 hub；STOMP 下 hub 回落到原始入口时补丁必须已不存在
fn remove_patch(stack: &mut SymbolMockStack) -> Result<(), Errno> {
    if let Some(patch) = stack.patch.take() {
        if let Err(err) = patch.revert() {
            log::error(format_args!("{} revert failed: {}", stack.label, err));
            stack.patch = Some(patch);
            return Err(err);
        }
        log::debug(format_args!("{} restored", stack.label));
    }
    if let Some(hub) = &stack.hub {
        hub.set_target(stack.original);
    }
    Ok(())
}

fn install_patch(stack: &SymbolMockStack, trampo: usize) -> Result<Patch, Errno> {
    match stack.method {
        Method::Got => {
            let symbol = stack.symbol.as_ref().ok_or(Errno::InvalidArg)?;
            let slots = got::collect_slots(symbol.name(), stack.original, stack.caller_rule.as_deref());
            Ok(Patch::Got(got::install(&slots, trampo)?))
        }
        Method::Stomp => {
            let symbol = stack.symbol.as_ref().ok_or(Errno::InvalidArg)?;
            let patch = stomp::install(symbol.addr(), symbol.size(), trampo, symbol.module())?;
            Ok(Patch::Stomp(patch))
        }
        Method::Pre => Ok(Patch::Pre(pre::install(stack.key, trampo)?)),
    }
}

fn describe(patch: &Patch) -> String {
    match patch {
        Patch::Got(patch) => format!("{} slots", patch.slot_count()),
        Patch::Stomp(patch) => format!("entry 0x{:x}", patch.patch_addr()),
        Patch::Pre(_) => "pointer".to_string(),
    }
}
