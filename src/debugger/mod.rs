//! Debugger engine: orchestrates guest control, breakpoints, source-line
//! stepping and variable inspection over a set of injected collaborator
//! capabilities.

pub mod breakpoint;
pub mod dwarf;
pub mod error;
pub mod register;

use crate::debugger::breakpoint::BreakpointRegistry;
use crate::debugger::dwarf::eval::ExpressionEvaluator;
use crate::debugger::dwarf::r#type::read_unsigned;
use crate::debugger::dwarf::symbol::Variable;
use crate::debugger::register::{DwarfRegisterMap, Register, RegisterMap};
use crate::weak_error;
use bit_field::BitField;
use bytes::Bytes;
use gimli::RunTimeEndian;
use log::debug;
use std::fmt::Write;
use std::rc::Rc;

pub use error::Error;

/// Bit of the flags register that makes the CPU trap after executing a
/// single instruction.
const TRAP_FLAG_BIT: usize = 8;

/// Flat byte-addressable view of guest memory. Implementations take care
/// of page mapping and page-boundary crossings.
pub trait MemoryAccess {
    fn read(&self, address: u64, size: usize) -> Result<Bytes, Error>;
    fn write(&self, address: u64, data: &[u8]) -> Result<(), Error>;
}

/// Pause-state control of the guest domain. `is_paused` must reflect the
/// actual domain state, not merely echo past `pause`/`unpause` calls; the
/// engine relies on it to observe breakpoint traps.
pub trait GuestControl {
    fn is_paused(&self) -> bool;
    fn pause(&self) -> Result<(), Error>;
    fn unpause(&self) -> Result<(), Error>;
}

/// VCPU register file access.
pub trait RegisterHandler {
    fn get_registers(&self, vcpu: u32) -> Result<RegisterMap, Error>;
    fn set_registers(&self, vcpu: u32, registers: &RegisterMap) -> Result<(), Error>;
}

/// Source-line oriented view of the guest image.
pub trait LineInformation {
    fn current_line(&self) -> (String, u64);
    /// Whether `pc` sits on a different source line than the last call
    /// observed. Updates the internal position.
    fn is_new_line(&mut self, pc: u64) -> bool;
    /// Statement address of `(file, line)`; `file` is a short filename.
    fn address(&self, file: &str, line: u64) -> Option<u64>;
    fn address_to_line(&self, address: u64) -> Result<(String, u64), Error>;
}

/// Symbol lookup and pointer interpretation over the guest's debug
/// information.
pub trait SymbolSource {
    fn find_symbol(&mut self, name: &str, pc: u64) -> Result<Variable, Error>;
    fn is_pointer(&self, variable: &Variable) -> bool;
    fn pointee_size(&self, variable: &Variable) -> Result<usize, Error>;
    fn parse_pointee(
        &self,
        variable: &Variable,
        data: &[u8],
        byte_order: RunTimeEndian,
    ) -> Result<String, Error>;
}

/// The debugger engine.
///
/// Every public operation requires the guest to be paused on entry and, on
/// success, leaves it in a well-defined state: still paused after
/// breakpoint and variable operations, paused at the next source line
/// after [`Debugger::step`], paused at the next trap after
/// [`Debugger::continue_guest`].
pub struct Debugger {
    memory: Rc<dyn MemoryAccess>,
    control: Box<dyn GuestControl>,
    registers: Box<dyn RegisterHandler>,
    line_info: Box<dyn LineInformation>,
    symbols: Box<dyn SymbolSource>,
    breakpoints: BreakpointRegistry,
    byte_order: RunTimeEndian,
}

impl Debugger {
    pub fn new(
        memory: Rc<dyn MemoryAccess>,
        control: Box<dyn GuestControl>,
        registers: Box<dyn RegisterHandler>,
        line_info: Box<dyn LineInformation>,
        symbols: Box<dyn SymbolSource>,
    ) -> Self {
        let breakpoints = BreakpointRegistry::new(Rc::clone(&memory));
        Self {
            memory,
            control,
            registers,
            line_info,
            symbols,
            breakpoints,
            byte_order: RunTimeEndian::Little,
        }
    }

    pub fn with_byte_order(mut self, byte_order: RunTimeEndian) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Arms a breakpoint at the statement address of `file:line`.
    pub fn set_breakpoint(&mut self, file: &str, line: u64) -> Result<(), Error> {
        self.ensure_paused()?;
        let address = self
            .line_info
            .address(file, line)
            .ok_or_else(|| Error::InvalidSourceLocation(file.to_string(), line))?;
        self.breakpoints.add(address)
    }

    pub fn remove_breakpoint(&mut self, file: &str, line: u64) -> Result<(), Error> {
        self.ensure_paused()?;
        let address = self
            .line_info
            .address(file, line)
            .ok_or_else(|| Error::InvalidSourceLocation(file.to_string(), line))?;
        self.breakpoints.remove(address)
    }

    /// Renders every armed breakpoint with its source position.
    pub fn list_breakpoints(&self) -> Result<String, Error> {
        self.ensure_paused()?;
        let mut out = String::new();
        for address in self.breakpoints.addresses() {
            let (file, line) = self.line_info.address_to_line(address)?;
            writeln!(out, "{address:#x} {file}:{line}").expect("infallible");
        }
        Ok(out)
    }

    /// Advances the guest by one source line, single-stepping on the
    /// instruction level until the line table reports a new line.
    ///
    /// A hardware step may land on an armed breakpoint byte. In that case
    /// the original instruction is restored, the program counter rewound
    /// over the trap byte, and the breakpoint re-armed on the next
    /// iteration once the instruction has been re-executed.
    pub fn step(&mut self, vcpu: u32) -> Result<(), Error> {
        self.ensure_paused()?;
        self.set_single_step(vcpu, true)?;
        loop {
            self.wait_paused();

            let mut registers = self.registers.get_registers(vcpu)?;
            let mut pc = registers.value(Register::Rip);
            debug!(target: "debugger", "single step trapped at {pc:#x}");

            // breakpoints disarmed on the previous iteration have been
            // stepped over by now and can hold their trap byte again
            self.breakpoints.restore_breakpoint()?;

            if self.breakpoints.is_breakpoint(pc) {
                self.breakpoints.restore_instruction(pc)?;
                pc -= 1;
                registers.update(Register::Rip, pc);
                if let Err(e) = self.registers.set_registers(vcpu, &registers) {
                    // a failed step must not leave the trap byte cleared
                    weak_error!(self.breakpoints.restore_breakpoint());
                    return Err(e);
                }
            }

            let new_line = self.line_info.is_new_line(pc);
            self.control.unpause()?;
            if new_line {
                return Ok(());
            }
        }
    }

    /// Resumes the guest until the next trap (usually a breakpoint).
    pub fn continue_guest(&mut self, vcpu: u32) -> Result<(), Error> {
        self.ensure_paused()?;
        self.set_single_step(vcpu, false)?;
        self.control.unpause()?;
        self.wait_paused();
        Ok(())
    }

    /// Reads and renders the variable visible as `name` at the current
    /// program counter.
    pub fn get_variable(&mut self, vcpu: u32, name: &str) -> Result<String, Error> {
        self.ensure_paused()?;
        let registers = self.registers.get_registers(vcpu)?;
        let pc = registers.value(Register::Rip);
        let variable = self.symbols.find_symbol(name, pc)?;

        let address = self.locate(&registers, &variable)?;
        let data = self.memory.read(address, variable.size())?;
        let value = variable.parse(&data, self.byte_order)?;
        Ok(format!("{} = {}", variable.name(), value))
    }

    /// Follows one pointer level of the variable `name` and renders the
    /// pointed-to value.
    pub fn dereference(&mut self, vcpu: u32, name: &str) -> Result<String, Error> {
        self.ensure_paused()?;
        let registers = self.registers.get_registers(vcpu)?;
        let pc = registers.value(Register::Rip);
        let variable = self.symbols.find_symbol(name, pc)?;
        if !self.symbols.is_pointer(&variable) {
            return Err(Error::NotPointer(name.to_string()));
        }

        let address = self.locate(&registers, &variable)?;
        let pointer_data = self.memory.read(address, variable.size())?;
        let target = read_unsigned(&pointer_data, self.byte_order);

        let size = self.symbols.pointee_size(&variable)?;
        let data = self.memory.read(target, size)?;
        let value = self
            .symbols
            .parse_pointee(&variable, &data, self.byte_order)?;
        Ok(format!("*{} = {}", variable.name(), value))
    }

    /// Source position of the most recent step target.
    pub fn stop_location(&self) -> String {
        let (file, line) = self.line_info.current_line();
        format!("{file}:{line}")
    }

    /// Evaluates a variable's location expression against a register
    /// snapshot.
    fn locate(&self, registers: &RegisterMap, variable: &Variable) -> Result<u64, Error> {
        let dwarf_registers = DwarfRegisterMap::from(registers);
        let evaluator = ExpressionEvaluator::new(&dwarf_registers);
        Ok(evaluator.evaluate(variable.location())?.as_unsigned())
    }

    fn ensure_paused(&self) -> Result<(), Error> {
        if !self.control.is_paused() {
            return Err(Error::NotPaused);
        }
        Ok(())
    }

    /// Busy-polls the rising edge of the pause state; the hardware trap is
    /// delivered one instruction after unpause.
    fn wait_paused(&self) {
        while !self.control.is_paused() {
            std::hint::spin_loop();
        }
    }

    fn set_single_step(&mut self, vcpu: u32, enable: bool) -> Result<(), Error> {
        let mut registers = self.registers.get_registers(vcpu)?;
        let mut flags = registers.value(Register::Rflags);
        flags.set_bit(TRAP_FLAG_BIT, enable);
        registers.update(Register::Rflags, flags);
        self.registers.set_registers(vcpu, &registers)
    }
}
