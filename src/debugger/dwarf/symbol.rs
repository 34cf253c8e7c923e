//! Scoped symbol tables for one compile unit.
//!
//! Scopes form a tree rooted at the compile-unit scope: subprograms hang
//! off the root, lexical blocks off the nearest scope whose PC range
//! covers them. Lookup starts at the innermost scope containing the
//! program counter and walks towards the root.

use crate::debugger::dwarf::r#type::{TypeId, TypeStore};
use crate::debugger::dwarf::DieEntry;
use crate::debugger::error::Error;
use bytes::Bytes;
use gimli::{
    RunTimeEndian, DW_TAG_formal_parameter, DW_TAG_lexical_block, DW_TAG_subprogram,
    DW_TAG_variable,
};
use indexmap::IndexMap;
use log::debug;
use std::collections::HashMap;
use std::rc::Rc;

/// A named guest value: its type and the raw DWARF location expression
/// describing where it lives.
#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    location: Bytes,
    type_ref: TypeId,
    types: Rc<TypeStore>,
}

impl Variable {
    pub fn new(name: String, location: Bytes, type_ref: TypeId, types: Rc<TypeStore>) -> Self {
        Self {
            name,
            location,
            type_ref,
            types,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw DWARF location expression.
    pub fn location(&self) -> &[u8] {
        &self.location
    }

    /// Storage size of the variable itself. For pointer variables this is
    /// the pointer size, never the pointee size.
    pub fn size(&self) -> usize {
        self.types.size_of(self.type_ref)
    }

    pub fn parse(&self, data: &[u8], byte_order: RunTimeEndian) -> Result<String, Error> {
        self.types.parse_value(self.type_ref, data, byte_order)
    }

    pub fn is_pointer(&self) -> bool {
        self.types.pointer_target(self.type_ref).is_some()
    }

    /// Size of the pointed-to value of a pointer variable.
    pub fn pointee_size(&self) -> Result<usize, Error> {
        let (target, _) = self
            .types
            .pointer_target(self.type_ref)
            .ok_or_else(|| Error::NotPointer(self.name.clone()))?;
        let target = target.ok_or(Error::NoAssociatedType)?;
        Ok(self.types.size_of(target))
    }

    /// Renders the bytes behind a pointer variable as its pointee type.
    pub fn parse_pointee(&self, data: &[u8], byte_order: RunTimeEndian) -> Result<String, Error> {
        let (target, _) = self
            .types
            .pointer_target(self.type_ref)
            .ok_or_else(|| Error::NotPointer(self.name.clone()))?;
        let target = target.ok_or(Error::NoAssociatedType)?;
        self.types.parse_value(target, data, byte_order)
    }
}

#[derive(Debug)]
struct Scope {
    low_pc: u64,
    high_pc: u64,
    parent: Option<usize>,
    variables: IndexMap<String, Variable>,
}

impl Scope {
    fn contains(&self, pc: u64) -> bool {
        self.low_pc <= pc && pc <= self.high_pc
    }
}

/// Scope tree of one compile unit. Built once from the DIE stream,
/// immutable afterwards.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    current: usize,
}

impl SymbolTable {
    /// Creates the table with the compile-unit root scope.
    pub fn new(low_pc: u64, high_pc: u64) -> Self {
        Self {
            scopes: vec![Scope {
                low_pc,
                high_pc,
                parent: None,
                variables: IndexMap::new(),
            }],
            current: 0,
        }
    }

    /// Feeds the next entry of the compile unit's DIE stream. `offsets`
    /// translates DIE offsets of type entries into [`TypeId`]s.
    pub fn consume(
        &mut self,
        entry: &DieEntry,
        types: &Rc<TypeStore>,
        offsets: &HashMap<u64, TypeId>,
    ) {
        match entry.tag {
            DW_TAG_subprogram => {
                let (Some(low_pc), Some(high_pc)) = (entry.low_pc, entry.high_pc) else {
                    return;
                };
                self.scopes.push(Scope {
                    low_pc,
                    high_pc,
                    parent: Some(0),
                    variables: IndexMap::new(),
                });
                self.current = self.scopes.len() - 1;
            }
            DW_TAG_lexical_block => {
                let (Some(low_pc), Some(high_pc)) = (entry.low_pc, entry.high_pc) else {
                    return;
                };
                let parent = if self.scopes[self.current].contains(low_pc) {
                    self.current
                } else {
                    self.scopes[self.current].parent.unwrap_or(0)
                };
                self.scopes.push(Scope {
                    low_pc,
                    high_pc,
                    parent: Some(parent),
                    variables: IndexMap::new(),
                });
                self.current = self.scopes.len() - 1;
            }
            DW_TAG_variable | DW_TAG_formal_parameter => {
                // entries without a name, type or storage location are not
                // addressable from the shell and are skipped silently
                let (Some(name), Some(location), Some(type_offset)) =
                    (&entry.name, &entry.location, entry.type_ref)
                else {
                    return;
                };
                let Some(type_ref) = offsets.get(&type_offset).copied() else {
                    debug!(target: "debugger", "variable `{name}` references an unknown type");
                    return;
                };
                let variable = Variable::new(
                    name.clone(),
                    location.clone(),
                    type_ref,
                    Rc::clone(types),
                );
                self.scopes[self.current]
                    .variables
                    .insert(name.clone(), variable);
            }
            _ => {}
        }
    }

    /// Innermost scope containing `pc`, falling back to the root.
    fn innermost(&self, pc: u64) -> usize {
        self.scopes
            .iter()
            .enumerate()
            .filter(|(_, scope)| scope.contains(pc))
            .max_by_key(|(index, scope)| (scope.low_pc, *index))
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    /// Looks `name` up starting at the innermost scope containing `pc` and
    /// walking parent scopes up to the root.
    pub fn get(&self, name: &str, pc: u64) -> Result<&Variable, Error> {
        let mut scope = self.innermost(pc);
        loop {
            if let Some(variable) = self.scopes[scope].variables.get(name) {
                return Ok(variable);
            }
            match self.scopes[scope].parent {
                Some(parent) => scope = parent,
                None => return Err(Error::SymbolNotFound(name.to_string())),
            }
        }
    }
}
