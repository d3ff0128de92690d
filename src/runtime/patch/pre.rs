// PRE 方式：直接替换调用方持有的函数指针，只影响经该指针发起的调用
use crate::errno::Errno;
use crate::log;

use super::swap_pointer;

pub(crate) struct PreSubstitution {
    slot_addr: usize,
    original: usize,
}

impl PreSubstitution {
    pub(crate) fn revert(&self) -> Result<(), Errno> {
        unsafe { swap_pointer(self.slot_addr, self.original, None)? };
        log::info(format_args!(
            "SRX_MK_OK restore pointer 0x{:x} -> 0x{:x}",
            self.slot_addr, self.original
        ));
        Ok(())
    }
}

pub(crate) fn install(slot_addr: usize, new_value: usize) -> Result<PreSubstitution, Errno> {
    let original = unsafe { swap_pointer(slot_addr, new_value, None)? };
    log::info(format_args!(
        "SRX_MK_OK pointer 0x{:x}: 0x{:x} -> 0x{:x}",
        slot_addr, original, new_value
    ));
    Ok(PreSubstitution {
        slot_addr,
        original,
    })
}
