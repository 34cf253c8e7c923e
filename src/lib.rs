pub mod debugger;
pub mod ui;
pub mod xen;
