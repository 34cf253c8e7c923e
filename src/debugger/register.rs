use crate::debugger::error::Error;
use smallvec::{smallvec, SmallVec};
use strum_macros::Display;
use strum_macros::EnumString;

/// Architectural register names of an x86-64 guest VCPU, spelled the way
/// the hypervisor register context spells them.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rdi,
    Rsi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
    Rflags,
    Cs,
    Ss,
    Ds,
    Es,
    Fs,
    Gs,
    FsBase,
    GsBase,
}

/// One snapshot of a VCPU register file.
///
/// The snapshot is taken while the guest is paused, mutated locally and
/// written back as a whole, so a get-modify-set sequence is atomic from
/// the guest's point of view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterMap {
    rax: u64,
    rbx: u64,
    rcx: u64,
    rdx: u64,
    rdi: u64,
    rsi: u64,
    rbp: u64,
    rsp: u64,
    r8: u64,
    r9: u64,
    r10: u64,
    r11: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rip: u64,
    rflags: u64,
    cs: u64,
    ss: u64,
    ds: u64,
    es: u64,
    fs: u64,
    gs: u64,
    fs_base: u64,
    gs_base: u64,
}

impl RegisterMap {
    pub fn value(&self, register: impl Into<Register>) -> u64 {
        let register = register.into();
        match register {
            Register::Rax => self.rax,
            Register::Rbx => self.rbx,
            Register::Rcx => self.rcx,
            Register::Rdx => self.rdx,
            Register::Rdi => self.rdi,
            Register::Rsi => self.rsi,
            Register::Rbp => self.rbp,
            Register::Rsp => self.rsp,
            Register::R8 => self.r8,
            Register::R9 => self.r9,
            Register::R10 => self.r10,
            Register::R11 => self.r11,
            Register::R12 => self.r12,
            Register::R13 => self.r13,
            Register::R14 => self.r14,
            Register::R15 => self.r15,
            Register::Rip => self.rip,
            Register::Rflags => self.rflags,
            Register::Cs => self.cs,
            Register::Ss => self.ss,
            Register::Ds => self.ds,
            Register::Es => self.es,
            Register::Fs => self.fs,
            Register::Gs => self.gs,
            Register::FsBase => self.fs_base,
            Register::GsBase => self.gs_base,
        }
    }

    pub fn update(&mut self, register: impl Into<Register>, value: u64) {
        match register.into() {
            Register::Rax => self.rax = value,
            Register::Rbx => self.rbx = value,
            Register::Rcx => self.rcx = value,
            Register::Rdx => self.rdx = value,
            Register::Rdi => self.rdi = value,
            Register::Rsi => self.rsi = value,
            Register::Rbp => self.rbp = value,
            Register::Rsp => self.rsp = value,
            Register::R8 => self.r8 = value,
            Register::R9 => self.r9 = value,
            Register::R10 => self.r10 = value,
            Register::R11 => self.r11 = value,
            Register::R12 => self.r12 = value,
            Register::R13 => self.r13 = value,
            Register::R14 => self.r14 = value,
            Register::R15 => self.r15 = value,
            Register::Rip => self.rip = value,
            Register::Rflags => self.rflags = value,
            Register::Cs => self.cs = value,
            Register::Ss => self.ss = value,
            Register::Ds => self.ds = value,
            Register::Es => self.es = value,
            Register::Fs => self.fs = value,
            Register::Gs => self.gs = value,
            Register::FsBase => self.fs_base = value,
            Register::GsBase => self.gs_base = value,
        };
    }

    /// Value of a register addressed by its lowercase architectural name.
    pub fn value_by_name(&self, name: &str) -> Result<u64, Error> {
        let register: Register = name
            .parse()
            .map_err(|_| Error::RegisterNameNotFound(name.to_string()))?;
        Ok(self.value(register))
    }
}

#[derive(Debug)]
pub struct DwarfRegisterMap {
    registers: SmallVec<[Option<u64>; 0x80]>,
    frame_base: u64,
}

impl DwarfRegisterMap {
    pub fn value(&self, register: gimli::Register) -> Result<u64, Error> {
        self.registers
            .get(register.0 as usize)
            .copied()
            .flatten()
            .ok_or(Error::RegisterNotFound(register.0))
    }

    /// Frame base address for `DW_OP_fbreg` operations. By convention this
    /// is the base-pointer register of the innermost frame.
    pub fn frame_base(&self) -> u64 {
        self.frame_base
    }
}

/// Mapping dwarf registers to machine registers.
/// See https://docs.rs/gimli/0.13.0/gimli/struct.UnwindTableRow.html#method.register
impl From<&RegisterMap> for DwarfRegisterMap {
    fn from(map: &RegisterMap) -> Self {
        let mut dwarf_map: SmallVec<[Option<u64>; 0x80]> = smallvec![None; 0x80];
        dwarf_map[0] = Some(map.rax);
        dwarf_map[1] = Some(map.rdx);
        dwarf_map[2] = Some(map.rcx);
        dwarf_map[3] = Some(map.rbx);
        dwarf_map[4] = Some(map.rsi);
        dwarf_map[5] = Some(map.rdi);
        dwarf_map[6] = Some(map.rbp);
        dwarf_map[7] = Some(map.rsp);
        dwarf_map[8] = Some(map.r8);
        dwarf_map[9] = Some(map.r9);
        dwarf_map[10] = Some(map.r10);
        dwarf_map[11] = Some(map.r11);
        dwarf_map[12] = Some(map.r12);
        dwarf_map[13] = Some(map.r13);
        dwarf_map[14] = Some(map.r14);
        dwarf_map[15] = Some(map.r15);
        dwarf_map[49] = Some(map.rflags);
        dwarf_map[50] = Some(map.es);
        dwarf_map[51] = Some(map.cs);
        dwarf_map[52] = Some(map.ss);
        dwarf_map[53] = Some(map.ds);
        dwarf_map[54] = Some(map.fs);
        dwarf_map[55] = Some(map.gs);
        dwarf_map[58] = Some(map.fs_base);
        dwarf_map[59] = Some(map.gs_base);
        DwarfRegisterMap {
            registers: dwarf_map,
            frame_base: map.rbp,
        }
    }
}
