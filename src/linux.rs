// Linux 平台层：内存保护、指令缓存维护、已加载模块枚举
pub mod memory;
pub mod modules;
