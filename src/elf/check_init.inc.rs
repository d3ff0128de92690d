// ELF header 校验与 Elf 结构体初始化，通过 include! 嵌入 elf.rs

// 校验内存中的 ELF header：magic、class、字节序、架构等
pub unsafe fn check_elf_header(base_addr: usize) -> Result<(), Errno> {
    let ehdr = &*(base_addr as *const ElfEhdr);
    if ehdr.e_ident[..SELFMAG] != ELFMAG {
        return Err(Errno::Format);
    }

    let class = ehdr.e_ident[EI_CLASS];
    if class != ELFCLASS64 {
        return Err(Errno::Format);
    }

    if ehdr.e_ident[EI_DATA] != ELFDATA2LSB {
        return Err(Errno::Format);
    }
    if ehdr.e_ident[EI_VERSION] != EV_CURRENT {
        return Err(Errno::Format);
    }
    if ehdr.e_type != ET_EXEC && ehdr.e_type != ET_DYN {
        return Err(Errno::Format);
    }
    if ehdr.e_machine != EXPECTED_MACHINE {
        return Err(Errno::Format);
    }
    if ehdr.e_version as u8 != EV_CURRENT {
        return Err(Errno::Format);
    }

    Ok(())
}

impl Elf {
    // 由 dl_iterate_phdr 提供的 bias 与程序头解析映像的动态段
    pub unsafe fn init(
        bias_addr: usize,
        phdr: *const ElfPhdr,
        phnum: usize,
        pathname: &str,
    ) -> Result<Self, Errno> {
        if phdr.is_null() || phnum == 0 {
            return Err(Errno::InvalidArg);
        }
        let phdrs = slice::from_raw_parts(phdr, phnum);

        // offset=0 的 PT_LOAD 段映射了 ELF header
        let phdr0 = phdrs
            .iter()
            .find(|ph| ph.p_type == PT_LOAD && ph.p_offset == 0)
            .ok_or(Errno::Format)?;
        let base_addr = bias_addr.wrapping_add(phdr0.p_vaddr as usize);
        check_elf_header(base_addr)?;

        let dhdr = phdrs
            .iter()
            .find(|ph| ph.p_type == PT_DYNAMIC)
            .ok_or(Errno::Format)?;

        let dyn_section = (bias_addr + dhdr.p_vaddr as usize) as *const ElfDyn;
        let dyn_sz = dhdr.p_memsz as usize;

        let mut elf = Elf {
            pathname: pathname.to_string(),
            base_addr,
            bias_addr,
            phdr,
            phnum,
            strtab: ptr::null(),
            strsz: 0,
            symtab: ptr::null(),
            relplt: 0,
            relplt_sz: 0,
            reldyn: 0,
            reldyn_sz: 0,
            bucket: ptr::null(),
            bucket_cnt: 0,
            chain: ptr::null(),
            chain_cnt: 0,
            bloom: ptr::null(),
            bloom_sz: 0,
            bloom_shift: 0,
            symoffset: 0,
            is_use_gnu_hash: false,
            is_plt_rela: false,
            is_dyn_rela: false,
        };

        // 遍历 dynamic section，提取各表地址和大小
        let dyn_cnt = dyn_sz / mem::size_of::<ElfDyn>();
        let dyn_entries = slice::from_raw_parts(dyn_section, dyn_cnt);
        for dyn_entry in dyn_entries {
            match dyn_entry.d_tag {
                DT_NULL => break,
                DT_STRTAB => {
                    elf.strtab = elf.dyn_ptr(dyn_entry.d_un)? as *const c_char;
                }
                DT_STRSZ => {
                    elf.strsz = dyn_entry.d_un as usize;
                }
                DT_SYMTAB => {
                    elf.symtab = elf.dyn_ptr(dyn_entry.d_un)? as *const ElfSym;
                }
                DT_PLTREL => {
                    elf.is_plt_rela = dyn_entry.d_un as i64 == DT_RELA;
                }
                DT_JMPREL => {
                    elf.relplt = elf.dyn_ptr(dyn_entry.d_un)?;
                }
                DT_PLTRELSZ => {
                    elf.relplt_sz = dyn_entry.d_un as usize;
                }
                DT_REL | DT_RELA => {
                    elf.reldyn = elf.dyn_ptr(dyn_entry.d_un)?;
                    elf.is_dyn_rela = dyn_entry.d_tag == DT_RELA;
                }
                DT_RELSZ | DT_RELASZ => {
                    elf.reldyn_sz = dyn_entry.d_un as usize;
                }
                DT_HASH => {
                    // 优先使用 GNU hash，已有则跳过 ELF hash
                    if elf.is_use_gnu_hash {
                        continue;
                    }
                    let raw = elf.dyn_ptr(dyn_entry.d_un)? as *const u32;
                    elf.bucket_cnt = *raw;
                    elf.chain_cnt = *raw.add(1);
                    elf.bucket = raw.add(2);
                    elf.chain = elf.bucket.add(elf.bucket_cnt as usize);
                }
                DT_GNU_HASH => {
                    // GNU hash 布局：nbuckets | symoffset | bloom_sz | bloom_shift | bloom[] | buckets[] | chains[]
                    let raw = elf.dyn_ptr(dyn_entry.d_un)? as *const u32;
                    elf.bucket_cnt = *raw;
                    elf.symoffset = *raw.add(1);
                    elf.bloom_sz = *raw.add(2);
                    elf.bloom_shift = *raw.add(3);
                    elf.bloom = raw.add(4) as *const usize;
                    elf.bucket = elf.bloom.add(elf.bloom_sz as usize) as *const u32;
                    elf.chain = elf.bucket.add(elf.bucket_cnt as usize);
                    elf.is_use_gnu_hash = true;
                }
                _ => {}
            }
        }

        elf.check()?;

        log::debug(format_args!(
            "init OK: {} (bias 0x{:x} {} PLT:{} DYN:{})",
            elf.pathname,
            elf.bias_addr,
            if elf.is_use_gnu_hash {
                "GNU_HASH"
            } else {
                "ELF_HASH"
            },
            elf.relplt_sz,
            elf.reldyn_sz
        ));

        Ok(elf)
    }

    // 动态段中的地址：glibc 加载后已加上 bias，其他加载器保留原始虚拟地址
    fn dyn_ptr(&self, d_ptr: ElfXword) -> Result<usize, Errno> {
        let value = d_ptr as usize;
        let addr = if value < self.bias_addr {
            self.bias_addr + value
        } else {
            value
        };
        if addr < self.base_addr {
            return Err(Errno::Format);
        }
        Ok(addr)
    }

    // 校验初始化后的关键字段是否均已正确填充
    fn check(&self) -> Result<(), Errno> {
        if self.base_addr == 0
            || self.phdr.is_null()
            || self.strtab.is_null()
            || self.symtab.is_null()
            || self.bucket.is_null()
            || self.chain.is_null()
        {
            return Err(Errno::Format);
        }
        if self.is_use_gnu_hash && self.bloom.is_null() {
            return Err(Errno::Format);
        }
        Ok(())
    }

    // 判断地址是否落在某个 PT_LOAD 段的虚拟地址范围内
    fn is_addr_in_load_segments(&self, addr: usize) -> bool {
        let phdrs = unsafe { slice::from_raw_parts(self.phdr, self.phnum) };
        for phdr in phdrs {
            if phdr.p_type != PT_LOAD {
                continue;
            }
            let start = self.bias_addr + phdr.p_vaddr as usize;
            let end = start.saturating_add(phdr.p_memsz as usize);
            if addr >= start && addr < end {
                return true;
            }
        }
        false
    }
}
