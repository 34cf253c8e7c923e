//! Bindings to the Xen toolstack libraries (xenctrl and
//! xenforeignmemory) realizing the engine's collaborator contracts for a
//! real guest domain.
//!
//! The FFI-backed parts live behind the `xen` cargo feature so the engine
//! stays buildable and testable on hosts without a Xen toolstack; the
//! register-context layout and the page-span arithmetic are plain data and
//! compile everywhere.

pub mod context;
pub mod memory;

#[cfg(feature = "xen")]
pub mod ctrl;
#[cfg(feature = "xen")]
mod ffi;
