//! Hand-written recording doubles for the engine's collaborator
//! contracts. Every double shares one ordered call log so tests can
//! assert cross-collaborator call sequences.

use bytes::Bytes;
use gimli::RunTimeEndian;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use xdb::debugger::dwarf::r#type::{TypeDeclaration, TypeStore};
use xdb::debugger::dwarf::symbol::Variable;
use xdb::debugger::register::RegisterMap;
use xdb::debugger::{
    Error, GuestControl, LineInformation, MemoryAccess, RegisterHandler, SymbolSource,
};

#[derive(Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

// --------------------------------------- memory -------------------------------------------------

struct MemoryState {
    log: CallLog,
    cells: RefCell<HashMap<u64, u8>>,
}

#[derive(Clone)]
pub struct MockMemory {
    state: Rc<MemoryState>,
}

impl MockMemory {
    pub fn new(log: &CallLog, content: &[(u64, &[u8])]) -> Self {
        let mut cells = HashMap::new();
        for (address, data) in content {
            for (i, byte) in data.iter().enumerate() {
                cells.insert(address + i as u64, *byte);
            }
        }
        Self {
            state: Rc::new(MemoryState {
                log: log.clone(),
                cells: RefCell::new(cells),
            }),
        }
    }

    pub fn byte(&self, address: u64) -> u8 {
        self.state.cells.borrow().get(&address).copied().unwrap_or(0)
    }
}

impl MemoryAccess for MockMemory {
    fn read(&self, address: u64, size: usize) -> Result<Bytes, Error> {
        self.state.log.push(format!("mem.read({address:#x}, {size})"));
        let cells = self.state.cells.borrow();
        let data: Vec<u8> = (0..size as u64)
            .map(|i| cells.get(&(address + i)).copied().unwrap_or(0))
            .collect();
        Ok(Bytes::from(data))
    }

    fn write(&self, address: u64, data: &[u8]) -> Result<(), Error> {
        self.state
            .log
            .push(format!("mem.write({address:#x}, {data:02x?})"));
        let mut cells = self.state.cells.borrow_mut();
        for (i, byte) in data.iter().enumerate() {
            cells.insert(address + i as u64, *byte);
        }
        Ok(())
    }
}

// --------------------------------------- control ------------------------------------------------

struct ControlState {
    log: CallLog,
    script: RefCell<VecDeque<bool>>,
    default: bool,
}

#[derive(Clone)]
pub struct MockControl {
    state: Rc<ControlState>,
}

impl MockControl {
    /// The domain reports paused on every poll.
    pub fn paused(log: &CallLog) -> Self {
        Self::scripted(log, &[], true)
    }

    /// The domain reports running on every poll.
    pub fn running(log: &CallLog) -> Self {
        Self::scripted(log, &[], false)
    }

    pub fn scripted(log: &CallLog, script: &[bool], default: bool) -> Self {
        Self {
            state: Rc::new(ControlState {
                log: log.clone(),
                script: RefCell::new(script.iter().copied().collect()),
                default,
            }),
        }
    }
}

impl GuestControl for MockControl {
    fn is_paused(&self) -> bool {
        self.state.log.push("control.is_paused");
        self.state
            .script
            .borrow_mut()
            .pop_front()
            .unwrap_or(self.state.default)
    }

    fn pause(&self) -> Result<(), Error> {
        self.state.log.push("control.pause");
        Ok(())
    }

    fn unpause(&self) -> Result<(), Error> {
        self.state.log.push("control.unpause");
        Ok(())
    }
}

// --------------------------------------- registers ----------------------------------------------

struct RegistersState {
    log: CallLog,
    map: RefCell<RegisterMap>,
}

#[derive(Clone)]
pub struct MockRegisters {
    state: Rc<RegistersState>,
}

impl MockRegisters {
    pub fn new(log: &CallLog, map: RegisterMap) -> Self {
        Self {
            state: Rc::new(RegistersState {
                log: log.clone(),
                map: RefCell::new(map),
            }),
        }
    }

}

impl RegisterHandler for MockRegisters {
    fn get_registers(&self, vcpu: u32) -> Result<RegisterMap, Error> {
        self.state.log.push(format!("regs.get({vcpu})"));
        Ok(*self.state.map.borrow())
    }

    fn set_registers(&self, vcpu: u32, registers: &RegisterMap) -> Result<(), Error> {
        use xdb::debugger::register::Register;
        self.state.log.push(format!(
            "regs.set({vcpu}, rip={:#x}, rflags={:#x})",
            registers.value(Register::Rip),
            registers.value(Register::Rflags)
        ));
        *self.state.map.borrow_mut() = *registers;
        Ok(())
    }
}

// --------------------------------------- line information ---------------------------------------

struct LineState {
    log: CallLog,
    addresses: HashMap<(String, u64), u64>,
    lines: HashMap<u64, (String, u64)>,
    script: RefCell<VecDeque<bool>>,
    current: RefCell<(String, u64)>,
}

#[derive(Clone)]
pub struct MockLineInfo {
    state: Rc<LineState>,
}

impl MockLineInfo {
    pub fn new(
        log: &CallLog,
        addresses: &[(&str, u64, u64)],
        lines: &[(u64, &str, u64)],
        new_line_script: &[bool],
    ) -> Self {
        Self {
            state: Rc::new(LineState {
                log: log.clone(),
                addresses: addresses
                    .iter()
                    .map(|(file, line, address)| ((file.to_string(), *line), *address))
                    .collect(),
                lines: lines
                    .iter()
                    .map(|(address, file, line)| (*address, (file.to_string(), *line)))
                    .collect(),
                script: RefCell::new(new_line_script.iter().copied().collect()),
                current: RefCell::new((String::new(), 0)),
            }),
        }
    }
}

impl LineInformation for MockLineInfo {
    fn current_line(&self) -> (String, u64) {
        self.state.current.borrow().clone()
    }

    fn is_new_line(&mut self, pc: u64) -> bool {
        self.state.log.push(format!("line.is_new_line({pc:#x})"));
        if let Some(position) = self.state.lines.get(&pc) {
            *self.state.current.borrow_mut() = position.clone();
        }
        self.state.script.borrow_mut().pop_front().unwrap_or(true)
    }

    fn address(&self, file: &str, line: u64) -> Option<u64> {
        self.state.log.push(format!("line.address({file}, {line})"));
        self.state
            .addresses
            .get(&(file.to_string(), line))
            .copied()
    }

    fn address_to_line(&self, address: u64) -> Result<(String, u64), Error> {
        self.state
            .lines
            .get(&address)
            .cloned()
            .ok_or(Error::UnknownAddress(address))
    }
}

// --------------------------------------- symbols ------------------------------------------------

struct SymbolsState {
    log: CallLog,
    variables: HashMap<String, Variable>,
}

#[derive(Clone)]
pub struct MockSymbols {
    state: Rc<SymbolsState>,
}

impl MockSymbols {
    pub fn new(log: &CallLog, variables: Vec<Variable>) -> Self {
        Self {
            state: Rc::new(SymbolsState {
                log: log.clone(),
                variables: variables
                    .into_iter()
                    .map(|variable| (variable.name().to_string(), variable))
                    .collect(),
            }),
        }
    }
}

impl SymbolSource for MockSymbols {
    fn find_symbol(&mut self, name: &str, pc: u64) -> Result<Variable, Error> {
        self.state
            .log
            .push(format!("symbols.find({name}, {pc:#x})"));
        self.state
            .variables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::SymbolNotFound(name.to_string()))
    }

    fn is_pointer(&self, variable: &Variable) -> bool {
        variable.is_pointer()
    }

    fn pointee_size(&self, variable: &Variable) -> Result<usize, Error> {
        variable.pointee_size()
    }

    fn parse_pointee(
        &self,
        variable: &Variable,
        data: &[u8],
        byte_order: RunTimeEndian,
    ) -> Result<String, Error> {
        variable.parse_pointee(data, byte_order)
    }
}

// --------------------------------------- variables ----------------------------------------------

/// A variable of a signed integer type of the given width.
pub fn int_variable(name: &str, location: &[u8], size: usize) -> Variable {
    let mut store = TypeStore::new();
    let type_ref = store.add(TypeDeclaration::Base {
        name: "int".to_string(),
        byte_size: size,
        encoding: gimli::DW_ATE_signed,
    });
    Variable::new(
        name.to_string(),
        Bytes::copy_from_slice(location),
        type_ref,
        Rc::new(store),
    )
}

/// A pointer variable whose pointee is an address-rendered word of
/// `pointee_size` bytes.
pub fn pointer_variable(name: &str, location: &[u8], pointee_size: usize) -> Variable {
    let mut store = TypeStore::new();
    let pointee = store.add(TypeDeclaration::Base {
        name: "unsigned long".to_string(),
        byte_size: pointee_size,
        encoding: gimli::DW_ATE_address,
    });
    let pointer = store.add(TypeDeclaration::Pointer {
        pointer_size: 8,
        target: Some(pointee),
    });
    Variable::new(
        name.to_string(),
        Bytes::copy_from_slice(location),
        pointer,
        Rc::new(store),
    )
}
