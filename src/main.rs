//! Debugger application entry point.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::process::exit;
use std::rc::Rc;
use xdb::debugger::dwarf::{DebugInformation, DwarfResolver};
use xdb::debugger::{Debugger, GuestControl};
use xdb::ui::console::TerminalApplication;
use xdb::xen::ctrl::XenControl;
use xdb::xen::memory::VirtualMemory;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Id of the guest domain to attach to
    domain: u32,

    /// Guest kernel image with DWARF debug information
    image: PathBuf,

    /// VCPU targeted by step and inspection commands
    #[arg(long, env = "XDB_VCPU", default_value_t = 0)]
    vcpu: u32,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let app = match bootstrap(&args) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit(1);
        }
    };

    if let Err(e) = app.run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn bootstrap(args: &Args) -> anyhow::Result<TerminalApplication> {
    let debug_info = DebugInformation::load(&args.image)
        .with_context(|| format!("load guest image {}", args.image.display()))?;
    let byte_order = debug_info.byte_order();
    let line_table = debug_info.line_table().context("build line table")?;

    let control = XenControl::attach(args.domain).context("open xenctrl interface")?;
    control
        .set_debugging(true)
        .context("enable domain debugging")?;
    if !control.is_paused() {
        bail!(
            "domain {} is not paused; pause it before attaching",
            args.domain
        );
    }

    // a 32-bit guest paired with a 64-bit image (or vice versa) would make
    // every pointer read garbage, refuse early
    let word_size = control.word_size().context("query guest word size")?;
    if let Some(pointer_width) = debug_info.pointer_width() {
        if word_size != pointer_width {
            bail!(
                "guest word size is {word_size} bytes but the image was built for {pointer_width}"
            );
        }
    }

    let resolver = DwarfResolver::new(debug_info);
    let memory = VirtualMemory::open(control.clone()).context("open foreign memory interface")?;

    let debugger = Debugger::new(
        Rc::new(memory),
        Box::new(control.clone()),
        Box::new(control),
        Box::new(line_table),
        Box::new(resolver),
    )
    .with_byte_order(byte_order);

    Ok(TerminalApplication::new(debugger, args.vcpu))
}
