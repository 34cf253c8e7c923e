use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- precondition errors ---------------------------------------
    #[error("domain is not paused")]
    NotPaused,
    #[error("variable `{0}` is not a pointer")]
    NotPointer(String),
    #[error("breakpoint already at {0}")]
    AlreadyBreakpointSet(u64),
    #[error("no breakpoint at {0}")]
    BreakpointNotFound(u64),
    #[error("no symbol `{0}` in the current scope")]
    SymbolNotFound(String),
    #[error("no statement address for {0}:{1}")]
    InvalidSourceLocation(String, u64),

    // --------------------------------- format errors ---------------------------------------------
    #[error("malformed location expression")]
    MalformedExpression,
    #[error("invalid debug information: {0}")]
    InvalidDwarf(&'static str),
    #[error("value of {actual} byte(s) does not match type size of {expected}")]
    WrongSize { expected: usize, actual: usize },
    #[error("no type associated with variable")]
    NoAssociatedType,
    #[error("anonymous aggregate member")]
    AnonymousStruct,
    #[error("array type has no element boundary")]
    NoBoundary,
    #[error("array length is only known at runtime")]
    NeedParseLocation,
    #[error("address {0:#x} is not covered by line information")]
    UnknownAddress(u64),

    // --------------------------------- evaluator errors ------------------------------------------
    #[error("expression stack underflow")]
    StackUnderflow,
    #[error("unknown dwarf register {0}")]
    RegisterNotFound(u16),
    #[error("unknown register {0:?}")]
    RegisterNameNotFound(String),

    // --------------------------------- collaborator errors ---------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("memory read returned {actual} byte(s), {expected} requested")]
    TruncatedRead { expected: usize, actual: usize },
    #[error("dwarf parsing error: {0}")]
    DwarfParsing(#[from] gimli::Error),
    #[error("object file parsing error: {0}")]
    ObjParsing(#[from] object::Error),
    #[error("hypervisor call {call} failed: {source}")]
    Hypervisor {
        call: &'static str,
        source: io::Error,
    },
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}
