// 对外 API：已定义符号查找、重定位表构建、可改写 GOT slot 收集

impl Elf {
    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    pub fn bias(&self) -> usize {
        self.bias_addr
    }

    // 通过 hash 表按原始符号名查找已定义函数
    pub fn find_defined(&self, symbol: &str) -> Option<DefinedSym> {
        let symidx = self.find_symidx_by_name(symbol).ok()?;
        self.defined_at(symidx)
    }

    // 线性扫描动态符号表，按解码后的名字匹配已定义函数
    pub fn find_defined_demangled(&self, name: &str) -> Option<(String, DefinedSym)> {
        for idx in 1..self.sym_count() {
            let Some(def) = self.defined_at(idx) else {
                continue;
            };
            let Some(raw) = (unsafe { self.sym_name(idx) }) else {
                continue;
            };
            if demangle::matches(raw, name) {
                return Some((raw.to_string(), def));
            }
        }
        None
    }

    // 查找包含 addr 的已定义函数
    pub fn find_containing(&self, addr: usize) -> Option<(String, DefinedSym)> {
        for idx in 1..self.sym_count() {
            let Some(def) = self.defined_at(idx) else {
                continue;
            };
            let hit = if def.size == 0 {
                addr == def.addr
            } else {
                addr >= def.addr && addr < def.addr + def.size
            };
            if hit && let Some(raw) = unsafe { self.sym_name(idx) } {
                return Some((raw.to_string(), def));
            }
        }
        None
    }

    fn defined_at(&self, idx: u32) -> Option<DefinedSym> {
        let sym = unsafe { &*self.symtab.add(idx as usize) };
        if sym.st_shndx == SHN_UNDEF || sym.st_value == 0 {
            return None;
        }
        let kind = sym.st_info & 0xf;
        if kind != STT_FUNC && kind != STT_GNU_IFUNC && kind != STT_NOTYPE {
            return None;
        }
        Some(DefinedSym {
            addr: self.bias_addr + sym.st_value as usize,
            size: sym.st_size as usize,
            is_ifunc: kind == STT_GNU_IFUNC,
        })
    }

    // 扫描 .rel(a).plt 与 .rel(a).dyn，构建符号名 -> slot 映射
    // 符号索引为 0 或无法解析名字的条目直接跳过
    pub fn relocation_table(&self) -> RelocationTable {
        let mut table = RelocationTable::new();
        let sym_count = self.sym_count();
        for kind in [SlotKind::Plt, SlotKind::Dynamic] {
            let is_rela = match kind {
                SlotKind::Plt => self.is_plt_rela,
                SlotKind::Dynamic => self.is_dyn_rela,
            };
            for (r_offset, r_info) in unsafe { self.reloc_entries(kind) } {
                let r_sym = elf_r_sym(r_info);
                if r_sym == 0 || r_sym >= sym_count {
                    continue;
                }
                let Some(name) = (unsafe { self.sym_name(r_sym) }) else {
                    continue;
                };
                if name.is_empty() {
                    continue;
                }
                table.insert(RelocationSlot {
                    symbol: name.to_string(),
                    slot_addr: self.bias_addr + r_offset,
                    kind,
                    section: kind.section_name(is_rela).to_string(),
                    r_type: elf_r_type(r_info),
                });
            }
        }
        table
    }

    // 收集指定符号的所有可改写 GOT slot 地址，可选按 callee 地址过滤
    pub unsafe fn find_got_slots(
        &self,
        symbol: &str,
        callee_addrs: Option<&BTreeSet<usize>>,
    ) -> Result<Vec<usize>, Errno> {
        let symidx = match self.find_symidx_by_name(symbol) {
            Ok(value) => value,
            Err(Errno::NotFound) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut slots = BTreeSet::new();
        for kind in [SlotKind::Plt, SlotKind::Dynamic] {
            for (r_offset, r_info) in self.reloc_entries(kind) {
                self.collect_slot(&mut slots, kind, symidx, callee_addrs, r_offset, r_info)?;
            }
        }

        Ok(slots.into_iter().collect())
    }

    // 读取某一类重定位节的全部 (r_offset, r_info)
    unsafe fn reloc_entries(&self, kind: SlotKind) -> Vec<(usize, ElfXword)> {
        let (addr, size, is_rela) = match kind {
            SlotKind::Plt => (self.relplt, self.relplt_sz, self.is_plt_rela),
            SlotKind::Dynamic => (self.reldyn, self.reldyn_sz, self.is_dyn_rela),
        };
        if addr == 0 || size == 0 {
            return Vec::new();
        }
        if is_rela {
            let cnt = size / mem::size_of::<ElfRela>();
            slice::from_raw_parts(addr as *const ElfRela, cnt)
                .iter()
                .map(|rela| (rela.r_offset as usize, rela.r_info))
                .collect()
        } else {
            let cnt = size / mem::size_of::<ElfRel>();
            slice::from_raw_parts(addr as *const ElfRel, cnt)
                .iter()
                .map(|rel| (rel.r_offset as usize, rel.r_info))
                .collect()
        }
    }

    // 检查单条重定位条目是否匹配目标符号，匹配则将 GOT slot 地址加入集合
    fn collect_slot(
        &self,
        slots: &mut BTreeSet<usize>,
        kind: SlotKind,
        symidx: u32,
        callee_addrs: Option<&BTreeSet<usize>>,
        r_offset: usize,
        r_info: ElfXword,
    ) -> Result<(), Errno> {
        let r_sym = elf_r_sym(r_info);
        if r_sym != symidx {
            return Ok(());
        }

        let r_type = elf_r_type(r_info);
        let is_plt = kind == SlotKind::Plt;
        if is_plt && r_type != R_GENERIC_JUMP_SLOT {
            return Ok(());
        }
        if !is_plt && r_type != R_GENERIC_GLOB_DAT && r_type != R_GENERIC_ABS {
            return Ok(());
        }

        let addr = self.bias_addr + r_offset;
        if addr < self.base_addr {
            return Err(Errno::Format);
        }

        if let Some(expected_addrs) = callee_addrs {
            let value = unsafe { ptr::read(addr as *const usize) };
            let matched = expected_addrs.contains(&value);
            if !matched {
                // PLT lazy binding 场景：slot 尚未解析，值指向 LOAD 段内的 stub
                let may_lazy_match =
                    is_plt && expected_addrs.len() == 1 && self.is_addr_in_load_segments(value);
                if !may_lazy_match {
                    return Ok(());
                }
            }
        }

        slots.insert(addr);
        Ok(())
    }
}
