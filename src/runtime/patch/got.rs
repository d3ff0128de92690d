// GOT 方式：改写所有调用方模块中指向目标的重定位 slot
// 只影响经 PLT/GOT 的间接调用，同模块内的直接调用不受影响
use crate::errno::Errno;
use crate::linux::modules;
use crate::log;
use crate::runtime::rules;
use std::collections::BTreeSet;

use super::swap_pointer;

// 一个可改写的 slot 及其所属模块
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct GotSlot {
    pub(crate) addr: usize,
    pub(crate) module: String,
}

#[derive(Clone, Debug)]
struct GotRecord {
    slot: GotSlot,
    original: usize,
}

// 已改写的 slot 集合，revert 时逐个写回原值
pub(crate) struct GotPatch {
    records: Vec<GotRecord>,
}

impl GotPatch {
    pub(crate) fn slot_count(&self) -> usize {
        self.records.len()
    }

    // 任一 slot 写回失败时，已写回的 slot 重新指向补丁值，补丁保持完整
    pub(crate) fn revert(&self) -> Result<(), Errno> {
        let mut restored = Vec::with_capacity(self.records.len());
        for record in self.records.iter().rev() {
            match unsafe { write_slot(&record.slot, record.original) } {
                Ok(patched) => restored.push((record, patched)),
                Err(err) => {
                    log::error(format_args!(
                        "restore GOT slot 0x{:x} in {} failed",
                        record.slot.addr, record.slot.module
                    ));
                    for (record, patched) in restored.into_iter().rev() {
                        let _ = unsafe { write_slot(&record.slot, patched) };
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

// 安装中途失败时尽力写回已改写的 slot
fn rollback(records: &[GotRecord]) {
    for record in records.iter().rev() {
        if unsafe { write_slot(&record.slot, record.original) }.is_err() {
            log::error(format_args!(
                "rollback GOT slot 0x{:x} in {} failed",
                record.slot.addr, record.slot.module
            ));
        }
    }
}

// 收集所有值等于 original 的 symbol 重定位 slot；caller_rule 限定调用方模块
pub(crate) fn collect_slots(
    symbol: &str,
    original: usize,
    caller_rule: Option<&str>,
) -> Vec<GotSlot> {
    let callee = BTreeSet::from([original]);
    let mut slots = Vec::new();
    for module in modules::loaded_modules() {
        if rules::should_ignore(&module.pathname) {
            continue;
        }
        if caller_rule.is_some_and(|rule| !rules::module_match(&module.pathname, module.bias, rule)) {
            continue;
        }
        let elf = match module.elf() {
            Ok(elf) => elf,
            Err(err) => {
                log::debug(format_args!("skip {}: {}", module.pathname, err));
                continue;
            }
        };
        match unsafe { elf.find_got_slots(symbol, Some(&callee)) } {
            Ok(addrs) => slots.extend(addrs.into_iter().map(|addr| GotSlot {
                addr,
                module: module.pathname.clone(),
            })),
            Err(err) => log::debug(format_args!(
                "scan {} in {} failed: {}",
                symbol, module.pathname, err
            )),
        }
    }
    slots
}

// 全部写入成功才算安装成功，中途失败时回滚已写入的 slot
pub(crate) fn install(slots: &[GotSlot], new_value: usize) -> Result<GotPatch, Errno> {
    if slots.is_empty() {
        return Err(Errno::NoSlots);
    }
    let mut records = Vec::with_capacity(slots.len());
    for slot in slots {
        match unsafe { write_slot(slot, new_value) } {
            Ok(original) => records.push(GotRecord {
                slot: slot.clone(),
                original,
            }),
            Err(err) => {
                rollback(&records);
                return Err(err);
            }
        }
    }
    Ok(GotPatch { records })
}

unsafe fn write_slot(slot: &GotSlot, value: usize) -> Result<usize, Errno> {
    let old = unsafe { swap_pointer(slot.addr, value, Some(&slot.module))? };
    log::info(format_args!(
        "SRX_MK_OK 0x{:x}: 0x{:x} -> 0x{:x} {}",
        slot.addr, old, value, slot.module
    ));
    Ok(old)
}
