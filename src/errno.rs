// mock 操作错误码，0 表示成功
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Errno {
    #[error("ok")]
    Ok = 0, // 成功
    #[error("invalid argument")]
    InvalidArg = 11, // 参数无效
    #[error("symbol not found")]
    NoSym = 13, // 符号未找到
    #[error("get memory protection failed")]
    GetProt = 14, // 读取内存保护属性失败
    #[error("set memory protection failed")]
    SetProt = 15, // 设置内存保护属性失败
    #[error("write GOT slot failed")]
    SetGot = 16, // 写入 GOT 表项失败
    #[error("create trampoline failed")]
    NewTrampo = 17, // 创建 trampoline 失败
    #[error("read ELF file failed")]
    ReadElf = 21, // 读取磁盘 ELF 失败
    #[error("mock handle not found")]
    NotFound = 30, // 未找到目标
    #[error("symbol not indirectly called: no relocation slots")]
    NoSlots = 40, // GOT 方式下没有可改写的重定位 slot
    #[error("function too small to patch")]
    TooSmall = 41, // 函数体小于跳转序列长度，拒绝 STOMP
    #[error("invalid state transition")]
    InvalidState = 42, // 已销毁的句柄上执行操作
    #[error("symbol already mocked with a different method")]
    MethodConflict = 43, // 同一符号的 mock 栈已使用其他方式
    #[error("symbol is used by the mock engine itself")]
    Reserved = 44, // 引擎自身依赖的符号
    #[error("call count mismatch")]
    CallCount = 45, // 调用次数校验失败
    #[error("unknown error")]
    Unknown = 1001, // 未知错误
    #[error("/proc/self/maps parse failed")]
    BadMaps = 1006, // /proc/self/maps 解析失败
    #[error("ELF format error")]
    Format = 1007, // 格式错误
}

impl Errno {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<Errno> for i32 {
    fn from(value: Errno) -> Self {
        value as i32
    }
}

#[cfg(test)]
mod tests {
    use super::Errno;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Errno::Ok.as_i32(), 0);
        assert_eq!(i32::from(Errno::NoSym), 13);
        assert_eq!(Errno::TooSmall.as_i32(), 41);
        assert!(Errno::Ok.is_ok());
        assert!(!Errno::TooSmall.is_ok());
    }

    #[test]
    fn display_names_the_failure() {
        assert_eq!(Errno::TooSmall.to_string(), "function too small to patch");
        assert_eq!(
            Errno::NoSlots.to_string(),
            "symbol not indirectly called: no relocation slots"
        );
    }
}
