// 重定位条目解析，以及符号名 -> 重定位 slot 集合的映射表

use super::{ElfXword, R_GENERIC_ABS, R_GENERIC_GLOB_DAT, R_GENERIC_JUMP_SLOT};
use crate::demangle;
use crate::errno::Errno;
use std::collections::{BTreeMap, BTreeSet};

// 提取高 32 位作为符号索引
pub(super) fn elf_r_sym(info: ElfXword) -> u32 {
    (info >> 32) as u32
}

// 提取低 32 位作为重定位类型
pub(super) fn elf_r_type(info: ElfXword) -> u32 {
    (info & 0xffff_ffff) as u32
}

// slot 来源的节区类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotKind {
    // .rel(a).plt
    Plt,
    // .rel(a).dyn
    Dynamic,
}

impl SlotKind {
    pub fn of_section(section: &str) -> Self {
        if section.ends_with(".plt") {
            Self::Plt
        } else {
            Self::Dynamic
        }
    }

    pub(super) fn section_name(self, is_rela: bool) -> &'static str {
        match (self, is_rela) {
            (Self::Plt, true) => ".rela.plt",
            (Self::Plt, false) => ".rel.plt",
            (Self::Dynamic, true) => ".rela.dyn",
            (Self::Dynamic, false) => ".rel.dyn",
        }
    }
}

// 一条引用某符号的重定位记录
// 内存映像中 slot_addr 为进程内绝对地址，磁盘文件中为 r_offset 虚拟地址
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelocationSlot {
    pub symbol: String,
    pub slot_addr: usize,
    pub kind: SlotKind,
    pub section: String,
    pub r_type: u32,
}

impl RelocationSlot {
    // 只有函数指针类的重定位可以被改写成替换函数
    pub fn is_patchable(&self) -> bool {
        match self.kind {
            SlotKind::Plt => self.r_type == R_GENERIC_JUMP_SLOT,
            SlotKind::Dynamic => {
                self.r_type == R_GENERIC_GLOB_DAT || self.r_type == R_GENERIC_ABS
            }
        }
    }
}

// 符号名 -> 引用它的重定位 slot 集合
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelocationTable {
    by_symbol: BTreeMap<String, BTreeSet<RelocationSlot>>,
}

impl RelocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    // 读取磁盘上的 ELF 文件，按节名扫描 .rel(a).plt / .rel(a).dyn
    pub fn from_file(path: &str) -> Result<Self, Errno> {
        super::file::read_relocations(path)
    }

    pub(crate) fn insert(&mut self, slot: RelocationSlot) {
        self.by_symbol
            .entry(slot.symbol.clone())
            .or_default()
            .insert(slot);
    }

    pub fn merge(&mut self, other: RelocationTable) {
        for (_, slots) in other.by_symbol {
            for slot in slots {
                self.insert(slot);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_symbol.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.by_symbol.keys().map(String::as_str)
    }

    // 精确按原始符号名查找
    pub fn slots(&self, symbol: &str) -> impl Iterator<Item = &RelocationSlot> {
        self.by_symbol.get(symbol).into_iter().flatten()
    }

    // 按原始名或解码名查找，C++ 符号可用 "ns::func" 形式
    pub fn slots_for(&self, name: &str) -> Vec<&RelocationSlot> {
        if let Some(slots) = self.by_symbol.get(name) {
            return slots.iter().collect();
        }
        self.by_symbol
            .iter()
            .filter(|(raw, _)| demangle::matches(raw, name))
            .flat_map(|(_, slots)| slots.iter())
            .collect()
    }

    // 引用该符号的重定位节名集合，例如 {".rela.plt"}
    pub fn sections_for(&self, name: &str) -> BTreeSet<String> {
        self.slots_for(name)
            .into_iter()
            .map(|slot| slot.section.clone())
            .collect()
    }

    pub fn kinds_for(&self, name: &str) -> BTreeSet<SlotKind> {
        self.slots_for(name)
            .into_iter()
            .map(|slot| slot.kind)
            .collect()
    }
}
