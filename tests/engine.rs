//! End-to-end engine scenarios against recording collaborator doubles.

mod common;

use common::{
    int_variable, pointer_variable, CallLog, MockControl, MockLineInfo, MockMemory,
    MockRegisters, MockSymbols,
};
use std::rc::Rc;
use xdb::debugger::register::{Register, RegisterMap};
use xdb::debugger::{Debugger, Error, LineInformation};

struct TestBed {
    log: CallLog,
    memory: MockMemory,
    line_info: MockLineInfo,
    debugger: Debugger,
}

#[derive(Default)]
struct TestBedConfig<'a> {
    memory: &'a [(u64, &'a [u8])],
    registers: Option<RegisterMap>,
    addresses: &'a [(&'a str, u64, u64)],
    lines: &'a [(u64, &'a str, u64)],
    new_line_script: &'a [bool],
    variables: Vec<xdb::debugger::dwarf::symbol::Variable>,
    guest_running: bool,
}

fn bed(config: TestBedConfig) -> TestBed {
    let log = CallLog::new();
    let memory = MockMemory::new(&log, config.memory);
    let control = if config.guest_running {
        MockControl::running(&log)
    } else {
        MockControl::paused(&log)
    };
    let registers = MockRegisters::new(&log, config.registers.unwrap_or_default());
    let line_info = MockLineInfo::new(
        &log,
        config.addresses,
        config.lines,
        config.new_line_script,
    );
    let symbols = MockSymbols::new(&log, config.variables);

    let debugger = Debugger::new(
        Rc::new(memory.clone()),
        Box::new(control),
        Box::new(registers),
        Box::new(line_info.clone()),
        Box::new(symbols),
    );

    TestBed {
        log,
        memory,
        line_info,
        debugger,
    }
}

fn registers_with(values: &[(Register, u64)]) -> RegisterMap {
    let mut map = RegisterMap::default();
    for (register, value) in values {
        map.update(*register, *value);
    }
    map
}

// Checks that we can step through a program without issues (assumes we are
// not stepping through a breakpoint).
#[test]
fn test_step() {
    let mut bed = bed(TestBedConfig {
        registers: Some(registers_with(&[(Register::Rip, 0x1), (Register::Rflags, 0x0)])),
        lines: &[(0x1, "start.c", 2)],
        new_line_script: &[true],
        ..Default::default()
    });

    bed.debugger.step(0).unwrap();

    assert_eq!(
        bed.log.entries(),
        vec![
            "control.is_paused",
            "regs.get(0)",
            "regs.set(0, rip=0x1, rflags=0x100)",
            "control.is_paused",
            "regs.get(0)",
            "line.is_new_line(0x1)",
            "control.unpause",
        ]
    );
}

// After a successful step the reported source position has moved.
#[test]
fn test_step_advances_the_current_line() {
    let mut bed = bed(TestBedConfig {
        registers: Some(registers_with(&[(Register::Rip, 0x1)])),
        lines: &[(0x1, "start.c", 2)],
        new_line_script: &[true],
        ..Default::default()
    });

    let before = bed.line_info.current_line();
    bed.debugger.step(0).unwrap();
    assert_ne!(bed.line_info.current_line(), before);
    assert_eq!(bed.debugger.stop_location(), "start.c:2");
}

// A single step that lands on an armed breakpoint byte: the original
// instruction is restored, the pc rewound, and the breakpoint re-armed on
// the next suspend.
#[test]
fn test_step_through_breakpoint() {
    let mut bed = bed(TestBedConfig {
        memory: &[(0x21, &[0xaa])],
        registers: Some(registers_with(&[(Register::Rip, 0x21), (Register::Rflags, 0x0)])),
        addresses: &[("start.c", 3, 0x21)],
        lines: &[(0x21, "start.c", 3), (0x20, "start.c", 3)],
        new_line_script: &[false, true],
        ..Default::default()
    });

    bed.debugger.set_breakpoint("start.c", 3).unwrap();
    assert_eq!(bed.memory.byte(0x21), 0xcc);
    bed.log.clear();

    bed.debugger.step(0).unwrap();

    assert_eq!(
        bed.log.entries(),
        vec![
            "control.is_paused",
            "regs.get(0)",
            "regs.set(0, rip=0x21, rflags=0x100)",
            // first hardware step lands on the trap byte
            "control.is_paused",
            "regs.get(0)",
            "mem.write(0x21, [aa])",
            "regs.set(0, rip=0x20, rflags=0x100)",
            "line.is_new_line(0x20)",
            "control.unpause",
            // second iteration re-arms the breakpoint before anything else
            "control.is_paused",
            "regs.get(0)",
            "mem.read(0x21, 1)",
            "mem.write(0x21, [cc])",
            "line.is_new_line(0x20)",
            "control.unpause",
        ]
    );
    assert_eq!(bed.memory.byte(0x21), 0xcc);
}

// Tests we can add a breakpoint correctly.
#[test]
fn test_add_breakpoint() {
    let mut bed = bed(TestBedConfig {
        memory: &[(0x13, &[0x01])],
        addresses: &[("start.c", 3, 0x13)],
        ..Default::default()
    });

    bed.debugger.set_breakpoint("start.c", 3).unwrap();

    assert_eq!(
        bed.log.entries(),
        vec![
            "control.is_paused",
            "line.address(start.c, 3)",
            "mem.read(0x13, 1)",
            "mem.write(0x13, [cc])",
        ]
    );
    assert_eq!(bed.memory.byte(0x13), 0xcc);
}

// Tests we can remove a breakpoint correctly.
#[test]
fn test_remove_breakpoint() {
    let mut bed = bed(TestBedConfig {
        memory: &[(0x13, &[0x01])],
        addresses: &[("start.c", 3, 0x13)],
        ..Default::default()
    });

    bed.debugger.set_breakpoint("start.c", 3).unwrap();
    bed.log.clear();

    bed.debugger.remove_breakpoint("start.c", 3).unwrap();

    assert_eq!(
        bed.log.entries(),
        vec![
            "control.is_paused",
            "line.address(start.c, 3)",
            "mem.write(0x13, [01])",
        ]
    );
    assert_eq!(bed.memory.byte(0x13), 0x01);
}

// A second breakpoint on the same address fails and leaves memory alone.
#[test]
fn test_double_add_fails() {
    let mut bed = bed(TestBedConfig {
        memory: &[(0x1, &[0x25])],
        addresses: &[("start.c", 3, 0x1)],
        ..Default::default()
    });

    bed.debugger.set_breakpoint("start.c", 3).unwrap();
    let err = bed.debugger.set_breakpoint("start.c", 3).unwrap_err();
    assert_eq!(format!("Error: {err}"), "Error: breakpoint already at 1");

    let writes = bed
        .log
        .entries()
        .iter()
        .filter(|entry| entry.starts_with("mem.write"))
        .count();
    assert_eq!(writes, 1);
}

#[test]
fn test_unknown_source_location() {
    let mut bed = bed(TestBedConfig::default());

    let err = bed.debugger.set_breakpoint("start.c", 99).unwrap_err();
    assert!(matches!(err, Error::InvalidSourceLocation(_, 99)));
    assert!(!bed
        .log
        .entries()
        .iter()
        .any(|entry| entry.starts_with("mem.")));
}

// Tests we can continue correctly to the next breakpoint.
#[test]
fn test_continue() {
    let mut bed = bed(TestBedConfig {
        registers: Some(registers_with(&[(Register::Rip, 0x5), (Register::Rflags, 256)])),
        ..Default::default()
    });

    bed.debugger.continue_guest(0).unwrap();

    assert_eq!(
        bed.log.entries(),
        vec![
            "control.is_paused",
            "regs.get(0)",
            "regs.set(0, rip=0x5, rflags=0x0)",
            "control.unpause",
            "control.is_paused",
        ]
    );
}

// Every public operation is gated on the paused state and touches no other
// collaborator when the gate fails.
#[test]
fn test_operations_require_a_paused_domain() {
    let mut bed = bed(TestBedConfig {
        guest_running: true,
        ..Default::default()
    });

    assert!(matches!(
        bed.debugger.set_breakpoint("start.c", 3),
        Err(Error::NotPaused)
    ));
    assert!(matches!(
        bed.debugger.remove_breakpoint("start.c", 3),
        Err(Error::NotPaused)
    ));
    assert!(matches!(
        bed.debugger.list_breakpoints(),
        Err(Error::NotPaused)
    ));
    assert!(matches!(bed.debugger.step(0), Err(Error::NotPaused)));
    assert!(matches!(
        bed.debugger.continue_guest(0),
        Err(Error::NotPaused)
    ));
    assert!(matches!(
        bed.debugger.get_variable(0, "myvar"),
        Err(Error::NotPaused)
    ));
    assert!(matches!(
        bed.debugger.dereference(0, "myvar"),
        Err(Error::NotPaused)
    ));

    let entries = bed.log.entries();
    assert_eq!(entries.len(), 7);
    assert!(entries.iter().all(|entry| entry == "control.is_paused"));
}

// Reads a variable through a literal-address location expression.
#[test]
fn test_get_variable() {
    // DW_OP_addr with the big-endian encoding of 0x492384
    let location = [0x03, 0, 0, 0, 0, 0, 0x49, 0x23, 0x84];
    let mut bed = bed(TestBedConfig {
        memory: &[(0x492384, &[0x32, 0x00])],
        registers: Some(registers_with(&[(Register::Rip, 0x33)])),
        variables: vec![int_variable("myvar", &location, 2)],
        ..Default::default()
    });

    let rendered = bed.debugger.get_variable(0, "myvar").unwrap();
    assert_eq!(rendered, "myvar = 50");

    let entries = bed.log.entries();
    assert!(entries.contains(&"symbols.find(myvar, 0x33)".to_string()));
    assert!(entries.contains(&"mem.read(0x492384, 2)".to_string()));
}

// Reads a frame-base-relative variable.
#[test]
fn test_get_variable_frame_relative() {
    // DW_OP_fbreg with sleb128(-8)
    let location = [0x91, 0x78];
    let mut bed = bed(TestBedConfig {
        memory: &[(0xff8, &[0xff, 0xff, 0xff, 0xff])],
        registers: Some(registers_with(&[
            (Register::Rip, 0x33),
            (Register::Rbp, 0x1000),
        ])),
        variables: vec![int_variable("local", &location, 4)],
        ..Default::default()
    });

    let rendered = bed.debugger.get_variable(0, "local").unwrap();
    assert_eq!(rendered, "local = -1");
}

#[test]
fn test_get_variable_unknown_symbol() {
    let mut bed = bed(TestBedConfig {
        registers: Some(registers_with(&[(Register::Rip, 0x33)])),
        ..Default::default()
    });
    assert!(matches!(
        bed.debugger.get_variable(0, "ghost"),
        Err(Error::SymbolNotFound(_))
    ));
}

// Follows one pointer level.
#[test]
fn test_dereference() {
    // DW_OP_addr with the big-endian encoding of 0x1000
    let location = [0x03, 0, 0, 0, 0, 0, 0, 0x10, 0x00];
    let first_read = 2392u64.to_le_bytes();
    let second_read = 0x21241u64.to_le_bytes();
    let mut bed = bed(TestBedConfig {
        memory: &[(0x1000, &first_read), (2392, &second_read)],
        registers: Some(registers_with(&[(Register::Rip, 0x33)])),
        variables: vec![pointer_variable("myvar", &location, 8)],
        ..Default::default()
    });

    let rendered = bed.debugger.dereference(0, "myvar").unwrap();
    assert_eq!(rendered, "*myvar = 0x21241");

    let entries = bed.log.entries();
    assert!(entries.contains(&"mem.read(0x1000, 8)".to_string()));
    assert!(entries.contains(&"mem.read(0x958, 8)".to_string()));
}

#[test]
fn test_dereference_rejects_non_pointers() {
    let location = [0x03, 0, 0, 0, 0, 0, 0x49, 0x23, 0x84];
    let mut bed = bed(TestBedConfig {
        registers: Some(registers_with(&[(Register::Rip, 0x33)])),
        variables: vec![int_variable("myvar", &location, 2)],
        ..Default::default()
    });

    let err = bed.debugger.dereference(0, "myvar").unwrap_err();
    assert_eq!(err.to_string(), "variable `myvar` is not a pointer");
    // the location expression is never evaluated for non-pointers
    assert!(!bed
        .log
        .entries()
        .iter()
        .any(|entry| entry.starts_with("mem.")));
}

#[test]
fn test_list_breakpoints() {
    let mut bed = bed(TestBedConfig {
        memory: &[(0x13, &[0x01]), (0x21, &[0x02])],
        addresses: &[("start.c", 3, 0x13), ("start.c", 4, 0x21)],
        lines: &[(0x13, "/src/os/start.c", 3), (0x21, "/src/os/start.c", 4)],
        ..Default::default()
    });

    bed.debugger.set_breakpoint("start.c", 3).unwrap();
    bed.debugger.set_breakpoint("start.c", 4).unwrap();

    let listing = bed.debugger.list_breakpoints().unwrap();
    assert_eq!(listing, "0x13 /src/os/start.c:3\n0x21 /src/os/start.c:4\n");
}
