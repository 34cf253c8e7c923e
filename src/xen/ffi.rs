//! Raw declarations from libxenctrl and libxenforeignmemory. Link
//! directives are emitted by build.rs when the `xen` feature is on.

#![allow(non_camel_case_types)]

use crate::xen::context::VcpuGuestContext;
use libc::{c_int, c_uint, c_void};

pub type xen_pfn_t = u64;

#[repr(C)]
pub struct xc_interface {
    _opaque: [u8; 0],
}

#[repr(C)]
pub struct xenforeignmemory_handle {
    _opaque: [u8; 0],
}

/// `xc_dominfo_t`, trimmed to the prefix the debugger reads. The trailing
/// padding keeps the Rust struct at least as large as the C one so
/// `xc_domain_getinfo` never writes out of bounds.
#[repr(C)]
pub struct xc_dominfo {
    pub domid: u32,
    pub ssidref: u32,
    /// GCC packs the C bitfield (dying, crashed, shutdown, paused, ...)
    /// LSB-first into this word.
    pub flags: u32,
    pub shutdown_reason: u32,
    _rest: [u64; 32],
}

/// Bit of [`xc_dominfo::flags`] holding the `paused` flag.
pub const DOMINFO_PAUSED_BIT: u32 = 3;

impl Default for xc_dominfo {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

extern "C" {
    pub fn xc_interface_open(
        logger: *mut c_void,
        dombuild_logger: *mut c_void,
        open_flags: c_uint,
    ) -> *mut xc_interface;
    pub fn xc_interface_close(xch: *mut xc_interface) -> c_int;

    pub fn xc_domain_pause(xch: *mut xc_interface, domid: u32) -> c_int;
    pub fn xc_domain_unpause(xch: *mut xc_interface, domid: u32) -> c_int;
    pub fn xc_domain_setdebugging(xch: *mut xc_interface, domid: u32, enable: c_uint) -> c_int;
    pub fn xc_domain_getinfo(
        xch: *mut xc_interface,
        first_domid: u32,
        max_doms: c_uint,
        info: *mut xc_dominfo,
    ) -> c_int;
    pub fn xc_domain_get_guest_width(
        xch: *mut xc_interface,
        domid: u32,
        guest_width: *mut c_uint,
    ) -> c_int;

    pub fn xc_vcpu_getcontext(
        xch: *mut xc_interface,
        domid: u32,
        vcpu: u32,
        ctxt: *mut VcpuGuestContext,
    ) -> c_int;
    pub fn xc_vcpu_setcontext(
        xch: *mut xc_interface,
        domid: u32,
        vcpu: u32,
        ctxt: *mut VcpuGuestContext,
    ) -> c_int;

    pub fn xc_translate_foreign_address(
        xch: *mut xc_interface,
        domid: u32,
        vcpu: c_int,
        virt: u64,
    ) -> xen_pfn_t;

    pub fn xenforeignmemory_open(
        logger: *mut c_void,
        open_flags: c_uint,
    ) -> *mut xenforeignmemory_handle;
    pub fn xenforeignmemory_close(fmem: *mut xenforeignmemory_handle) -> c_int;
    pub fn xenforeignmemory_map(
        fmem: *mut xenforeignmemory_handle,
        dom: u32,
        prot: c_int,
        pages: usize,
        arr: *const xen_pfn_t,
        err: *mut c_int,
    ) -> *mut c_void;
    pub fn xenforeignmemory_unmap(
        fmem: *mut xenforeignmemory_handle,
        addr: *mut c_void,
        pages: usize,
    ) -> c_int;
}
