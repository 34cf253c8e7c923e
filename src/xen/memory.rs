//! Flat byte-addressable guest memory on top of per-page foreign
//! mappings.
//!
//! The hypervisor maps one guest page at a time; arbitrary-length reads
//! and writes are decomposed into page spans first. Mappings are cached
//! keyed by page-aligned guest virtual address and released when the
//! memory handle is dropped.

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// One in-page slice of a larger guest memory access.
#[derive(Debug, PartialEq, Eq)]
pub struct PageSpan {
    /// Page-aligned guest virtual address.
    pub page: u64,
    /// Byte offset of the span inside the page.
    pub offset: usize,
    pub len: usize,
}

/// Decomposes the access `[address, address + len)` into per-page spans.
pub fn page_spans(address: u64, len: usize) -> Vec<PageSpan> {
    let mut spans = Vec::new();
    let mut address = address;
    let mut remaining = len;
    while remaining > 0 {
        let page = address & !(PAGE_SIZE - 1);
        let offset = (address - page) as usize;
        let chunk = remaining.min(PAGE_SIZE as usize - offset);
        spans.push(PageSpan {
            page,
            offset,
            len: chunk,
        });
        address += chunk as u64;
        remaining -= chunk;
    }
    spans
}

#[cfg(feature = "xen")]
pub use self::foreign::VirtualMemory;

#[cfg(feature = "xen")]
mod foreign {
    use super::page_spans;
    use crate::debugger::error::Error;
    use crate::debugger::MemoryAccess;
    use crate::xen::ctrl::XenControl;
    use crate::xen::ffi;
    use bytes::{BufMut, Bytes, BytesMut};
    use log::debug;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::collections::hash_map::Entry;
    use std::io;
    use std::ptr;

    fn ffi_error(call: &'static str) -> Error {
        Error::Hypervisor {
            call,
            source: io::Error::last_os_error(),
        }
    }

    /// Guest memory of one domain, backed by cached foreign mappings.
    pub struct VirtualMemory {
        handle: *mut ffi::xenforeignmemory_handle,
        control: XenControl,
        mappings: RefCell<HashMap<u64, *mut u8>>,
    }

    impl VirtualMemory {
        pub fn open(control: XenControl) -> Result<Self, Error> {
            let handle = unsafe { ffi::xenforeignmemory_open(ptr::null_mut(), 0) };
            if handle.is_null() {
                return Err(ffi_error("xenforeignmemory_open"));
            }
            Ok(Self {
                handle,
                control,
                mappings: RefCell::new(HashMap::new()),
            })
        }

        /// Maps (or returns the cached mapping of) the guest page at the
        /// page-aligned virtual address `page`.
        fn mapping(&self, page: u64) -> Result<*mut u8, Error> {
            let mut mappings = self.mappings.borrow_mut();
            match mappings.entry(page) {
                Entry::Occupied(entry) => Ok(*entry.get()),
                Entry::Vacant(entry) => {
                    let domain = self.control.domain;
                    // translate returns the guest frame number directly
                    let frame = unsafe {
                        ffi::xc_translate_foreign_address(self.control.raw(), domain, 0, page)
                    };
                    if frame == 0 {
                        return Err(ffi_error("xc_translate_foreign_address"));
                    }
                    let mut errors: libc::c_int = 0;
                    let mapped = unsafe {
                        ffi::xenforeignmemory_map(
                            self.handle,
                            domain,
                            libc::PROT_READ | libc::PROT_WRITE,
                            1,
                            &frame,
                            &mut errors,
                        )
                    };
                    if mapped.is_null() || errors != 0 {
                        return Err(ffi_error("xenforeignmemory_map"));
                    }
                    debug!(target: "debugger", "mapped guest page {page:#x}");
                    Ok(*entry.insert(mapped.cast()))
                }
            }
        }
    }

    impl MemoryAccess for VirtualMemory {
        fn read(&self, address: u64, size: usize) -> Result<Bytes, Error> {
            let mut buffer = BytesMut::with_capacity(size);
            for span in page_spans(address, size) {
                let mapping = self.mapping(span.page)?;
                let slice = unsafe {
                    std::slice::from_raw_parts(mapping.add(span.offset), span.len)
                };
                buffer.put_slice(slice);
            }
            Ok(buffer.freeze())
        }

        fn write(&self, address: u64, data: &[u8]) -> Result<(), Error> {
            let mut written = 0;
            for span in page_spans(address, data.len()) {
                let mapping = self.mapping(span.page)?;
                unsafe {
                    ptr::copy_nonoverlapping(
                        data[written..].as_ptr(),
                        mapping.add(span.offset),
                        span.len,
                    );
                }
                written += span.len;
            }
            Ok(())
        }
    }

    impl Drop for VirtualMemory {
        fn drop(&mut self) {
            for mapping in self.mappings.borrow().values() {
                unsafe {
                    ffi::xenforeignmemory_unmap(self.handle, mapping.cast(), 1);
                }
            }
            unsafe {
                ffi::xenforeignmemory_close(self.handle);
            }
        }
    }
}
