use crate::debugger::error::Error;
use crate::debugger::MemoryAccess;
use log::debug;
use std::collections::HashMap;
use std::rc::Rc;

/// Single byte `int3` instruction.
pub const TRAP_OPCODE: u8 = 0xCC;

/// Software breakpoint bookkeeping over guest code memory.
///
/// Every armed address maps to the shadow byte that the trap opcode
/// overwrote. Addresses in `restore` currently hold their original byte
/// again so that the instruction can be re-executed exactly once; they are
/// re-armed by [`BreakpointRegistry::restore_breakpoint`].
pub struct BreakpointRegistry {
    memory: Rc<dyn MemoryAccess>,
    armed: HashMap<u64, u8>,
    restore: Vec<u64>,
}

impl BreakpointRegistry {
    pub fn new(memory: Rc<dyn MemoryAccess>) -> Self {
        Self {
            memory,
            armed: HashMap::new(),
            restore: Vec::new(),
        }
    }

    /// Writes the trap opcode at `address`, remembering the original byte.
    pub fn add(&mut self, address: u64) -> Result<(), Error> {
        if self.armed.contains_key(&address) {
            return Err(Error::AlreadyBreakpointSet(address));
        }
        let data = self.memory.read(address, 1)?;
        let original = *data.first().ok_or(Error::TruncatedRead {
            expected: 1,
            actual: data.len(),
        })?;
        self.armed.insert(address, original);
        if let Err(e) = self.memory.write(address, &[TRAP_OPCODE]) {
            self.armed.remove(&address);
            return Err(e);
        }
        debug!(target: "debugger", "breakpoint armed at {address:#x}");
        Ok(())
    }

    /// Puts the shadow byte back and forgets the breakpoint.
    pub fn remove(&mut self, address: u64) -> Result<(), Error> {
        let original = *self
            .armed
            .get(&address)
            .ok_or(Error::BreakpointNotFound(address))?;
        self.memory.write(address, &[original])?;
        self.armed.remove(&address);
        debug!(target: "debugger", "breakpoint removed from {address:#x}");
        Ok(())
    }

    /// Temporarily disarms the breakpoint at `address` so the overwritten
    /// instruction can execute once. The address joins the restore-set and
    /// must be re-armed with [`BreakpointRegistry::restore_breakpoint`].
    pub fn restore_instruction(&mut self, address: u64) -> Result<(), Error> {
        if !self.is_breakpoint(address) {
            return Err(Error::BreakpointNotFound(address));
        }
        self.remove(address)?;
        self.restore.push(address);
        Ok(())
    }

    /// Re-arms every address disarmed by
    /// [`BreakpointRegistry::restore_instruction`] (and only those, never
    /// addresses removed by the user).
    pub fn restore_breakpoint(&mut self) -> Result<(), Error> {
        let pending = std::mem::take(&mut self.restore);
        for address in pending {
            self.add(address)?;
        }
        Ok(())
    }

    pub fn is_breakpoint(&self, address: u64) -> bool {
        self.armed.contains_key(&address)
    }

    /// Currently armed addresses, in ascending order.
    pub fn addresses(&self) -> Vec<u64> {
        let mut addresses: Vec<u64> = self.armed.keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }
}
