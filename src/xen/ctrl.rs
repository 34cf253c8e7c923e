//! Domain control over libxenctrl: pause state, debug mode and VCPU
//! register contexts.

use crate::debugger::error::Error;
use crate::debugger::register::RegisterMap;
use crate::debugger::{GuestControl, RegisterHandler};
use crate::weak_error;
use crate::xen::context::VcpuGuestContext;
use crate::xen::ffi;
use bit_field::BitField;
use std::io;
use std::ptr;
use std::rc::Rc;

fn ffi_error(call: &'static str) -> Error {
    Error::Hypervisor {
        call,
        source: io::Error::last_os_error(),
    }
}

struct XcHandle {
    raw: *mut ffi::xc_interface,
}

impl Drop for XcHandle {
    fn drop(&mut self) {
        unsafe {
            ffi::xc_interface_close(self.raw);
        }
    }
}

/// Control-plane handle for one guest domain. Cloning shares the
/// underlying xenctrl interface; it is closed when the last clone drops.
#[derive(Clone)]
pub struct XenControl {
    handle: Rc<XcHandle>,
    pub(crate) domain: u32,
}

impl XenControl {
    /// Opens the xenctrl interface for `domain`. Fails on missing
    /// privileges or an unreachable hypervisor.
    pub fn attach(domain: u32) -> Result<Self, Error> {
        let raw = unsafe { ffi::xc_interface_open(ptr::null_mut(), ptr::null_mut(), 0) };
        if raw.is_null() {
            return Err(ffi_error("xc_interface_open"));
        }
        Ok(Self {
            handle: Rc::new(XcHandle { raw }),
            domain,
        })
    }

    pub(crate) fn raw(&self) -> *mut ffi::xc_interface {
        self.handle.raw
    }

    /// Enables (or disables) gdbsx debugging for the domain; required
    /// before breakpoint traps are reported to the toolstack.
    pub fn set_debugging(&self, enable: bool) -> Result<(), Error> {
        let rc = unsafe {
            ffi::xc_domain_setdebugging(self.raw(), self.domain, u32::from(enable))
        };
        if rc != 0 {
            return Err(ffi_error("xc_domain_setdebugging"));
        }
        Ok(())
    }

    /// Guest pointer width in bytes.
    pub fn word_size(&self) -> Result<usize, Error> {
        let mut width: libc::c_uint = 0;
        let rc = unsafe { ffi::xc_domain_get_guest_width(self.raw(), self.domain, &mut width) };
        if rc != 0 {
            return Err(ffi_error("xc_domain_get_guest_width"));
        }
        Ok(width as usize)
    }

    fn dominfo(&self) -> Result<ffi::xc_dominfo, Error> {
        let mut info = ffi::xc_dominfo::default();
        let rc = unsafe { ffi::xc_domain_getinfo(self.raw(), self.domain, 1, &mut info) };
        if rc != 1 || info.domid != self.domain {
            return Err(ffi_error("xc_domain_getinfo"));
        }
        Ok(info)
    }
}

impl GuestControl for XenControl {
    fn is_paused(&self) -> bool {
        weak_error!(self.dominfo(), "domain info unavailable:")
            .map(|info| info.flags.get_bit(ffi::DOMINFO_PAUSED_BIT as usize))
            .unwrap_or(false)
    }

    fn pause(&self) -> Result<(), Error> {
        let rc = unsafe { ffi::xc_domain_pause(self.raw(), self.domain) };
        if rc != 0 {
            return Err(ffi_error("xc_domain_pause"));
        }
        Ok(())
    }

    fn unpause(&self) -> Result<(), Error> {
        let rc = unsafe { ffi::xc_domain_unpause(self.raw(), self.domain) };
        if rc != 0 {
            return Err(ffi_error("xc_domain_unpause"));
        }
        Ok(())
    }
}

impl RegisterHandler for XenControl {
    fn get_registers(&self, vcpu: u32) -> Result<RegisterMap, Error> {
        let mut context = VcpuGuestContext::default();
        let rc = unsafe { ffi::xc_vcpu_getcontext(self.raw(), self.domain, vcpu, &mut context) };
        if rc != 0 {
            return Err(ffi_error("xc_vcpu_getcontext"));
        }
        Ok(context.to_register_map())
    }

    fn set_registers(&self, vcpu: u32, registers: &RegisterMap) -> Result<(), Error> {
        // read-modify-write keeps the fpu and control state intact
        let mut context = VcpuGuestContext::default();
        let rc = unsafe { ffi::xc_vcpu_getcontext(self.raw(), self.domain, vcpu, &mut context) };
        if rc != 0 {
            return Err(ffi_error("xc_vcpu_getcontext"));
        }
        context.apply_register_map(registers);
        let rc = unsafe { ffi::xc_vcpu_setcontext(self.raw(), self.domain, vcpu, &mut context) };
        if rc != 0 {
            return Err(ffi_error("xc_vcpu_setcontext"));
        }
        Ok(())
    }
}
