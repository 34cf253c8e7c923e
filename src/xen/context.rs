//! VCPU register context layout shared with the hypervisor, mirroring
//! `struct vcpu_guest_context` of the x86-64 public Xen ABI.

use crate::debugger::register::{Register, RegisterMap};

/// `struct cpu_user_regs` of the x86-64 Xen ABI.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct CpuUserRegs {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub error_code: u32,
    pub entry_vector: u32,
    pub rip: u64,
    pub cs: u16,
    _pad0: [u16; 1],
    pub saved_upcall_mask: u8,
    _pad1: [u8; 3],
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u16,
    _pad2: [u16; 3],
    pub es: u16,
    _pad3: [u16; 3],
    pub ds: u16,
    _pad4: [u16; 3],
    pub fs: u16,
    _pad5: [u16; 3],
    pub gs: u16,
    _pad6: [u16; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct TrapInfo {
    pub vector: u8,
    pub flags: u8,
    pub cs: u16,
    pub address: u64,
}

/// `struct vcpu_guest_context` of the x86-64 Xen ABI, as consumed by
/// `xc_vcpu_getcontext`/`xc_vcpu_setcontext`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct VcpuGuestContext {
    pub fpu_ctxt: [u8; 512],
    pub flags: u64,
    pub user_regs: CpuUserRegs,
    pub trap_ctxt: [TrapInfo; 256],
    pub ldt_base: u64,
    pub ldt_ents: u64,
    pub gdt_frames: [u64; 16],
    pub gdt_ents: u64,
    pub kernel_ss: u64,
    pub kernel_sp: u64,
    pub ctrlreg: [u64; 8],
    pub debugreg: [u64; 8],
    pub event_callback_eip: u64,
    pub failsafe_callback_eip: u64,
    pub syscall_callback_eip: u64,
    pub vm_assist: u64,
    pub fs_base: u64,
    pub gs_base_kernel: u64,
    pub gs_base_user: u64,
}

impl Default for VcpuGuestContext {
    fn default() -> Self {
        // all-zero is a valid value for every field of the C struct
        unsafe { std::mem::zeroed() }
    }
}

impl VcpuGuestContext {
    /// Projects the hypervisor context onto the engine's register
    /// snapshot.
    pub fn to_register_map(&self) -> RegisterMap {
        let regs = &self.user_regs;
        let mut map = RegisterMap::default();
        map.update(Register::Rax, regs.rax);
        map.update(Register::Rbx, regs.rbx);
        map.update(Register::Rcx, regs.rcx);
        map.update(Register::Rdx, regs.rdx);
        map.update(Register::Rdi, regs.rdi);
        map.update(Register::Rsi, regs.rsi);
        map.update(Register::Rbp, regs.rbp);
        map.update(Register::Rsp, regs.rsp);
        map.update(Register::R8, regs.r8);
        map.update(Register::R9, regs.r9);
        map.update(Register::R10, regs.r10);
        map.update(Register::R11, regs.r11);
        map.update(Register::R12, regs.r12);
        map.update(Register::R13, regs.r13);
        map.update(Register::R14, regs.r14);
        map.update(Register::R15, regs.r15);
        map.update(Register::Rip, regs.rip);
        map.update(Register::Rflags, regs.rflags);
        map.update(Register::Cs, u64::from(regs.cs));
        map.update(Register::Ss, u64::from(regs.ss));
        map.update(Register::Ds, u64::from(regs.ds));
        map.update(Register::Es, u64::from(regs.es));
        map.update(Register::Fs, u64::from(regs.fs));
        map.update(Register::Gs, u64::from(regs.gs));
        map.update(Register::FsBase, self.fs_base);
        map.update(Register::GsBase, self.gs_base_kernel);
        map
    }

    /// Writes a (possibly modified) register snapshot back into the
    /// context, leaving all non-register state untouched.
    pub fn apply_register_map(&mut self, map: &RegisterMap) {
        let regs = &mut self.user_regs;
        regs.rax = map.value(Register::Rax);
        regs.rbx = map.value(Register::Rbx);
        regs.rcx = map.value(Register::Rcx);
        regs.rdx = map.value(Register::Rdx);
        regs.rdi = map.value(Register::Rdi);
        regs.rsi = map.value(Register::Rsi);
        regs.rbp = map.value(Register::Rbp);
        regs.rsp = map.value(Register::Rsp);
        regs.r8 = map.value(Register::R8);
        regs.r9 = map.value(Register::R9);
        regs.r10 = map.value(Register::R10);
        regs.r11 = map.value(Register::R11);
        regs.r12 = map.value(Register::R12);
        regs.r13 = map.value(Register::R13);
        regs.r14 = map.value(Register::R14);
        regs.r15 = map.value(Register::R15);
        regs.rip = map.value(Register::Rip);
        regs.rflags = map.value(Register::Rflags);
        regs.cs = map.value(Register::Cs) as u16;
        regs.ss = map.value(Register::Ss) as u16;
        regs.ds = map.value(Register::Ds) as u16;
        regs.es = map.value(Register::Es) as u16;
        regs.fs = map.value(Register::Fs) as u16;
        regs.gs = map.value(Register::Gs) as u16;
        self.fs_base = map.value(Register::FsBase);
        self.gs_base_kernel = map.value(Register::GsBase);
    }
}
