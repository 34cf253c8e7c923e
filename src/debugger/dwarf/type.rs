//! Guest type universe reconstructed from the debugging-information
//! entries of one compile unit.
//!
//! Types are arena-allocated and addressed by [`TypeId`]. The on-disk
//! format references types by DIE offset, forwards as well as backwards;
//! unresolved references are tracked on a waiting list and patched as soon
//! as the referenced offset is published.

use crate::debugger::dwarf::DieEntry;
use crate::debugger::error::Error;
use gimli::{
    DwAte, RunTimeEndian, DW_ATE_address, DW_ATE_boolean, DW_ATE_float, DW_ATE_signed,
    DW_ATE_signed_char, DW_ATE_unsigned, DW_ATE_unsigned_char, DW_TAG_array_type,
    DW_TAG_base_type, DW_TAG_const_type, DW_TAG_member, DW_TAG_pointer_type,
    DW_TAG_structure_type, DW_TAG_subrange_type, DW_TAG_typedef, DW_TAG_union_type,
    DW_TAG_volatile_type,
};
use itertools::Itertools;
use std::collections::HashMap;

/// Index of a type node inside a [`TypeStore`].
pub type TypeId = usize;

/// Number of elements of an array type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayBound {
    Fixed(u64),
    /// The bound is an expression over the runtime state (VLA-style); such
    /// arrays cannot be parsed from a plain byte image.
    Runtime,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub offset: u64,
    pub type_ref: Option<TypeId>,
}

#[derive(Debug, Clone)]
pub enum TypeDeclaration {
    Base {
        name: String,
        byte_size: usize,
        encoding: DwAte,
    },
    TypeDef {
        name: String,
        base: Option<TypeId>,
    },
    Pointer {
        pointer_size: usize,
        /// `None` is a void pointer.
        target: Option<TypeId>,
    },
    Array {
        element: Option<TypeId>,
        count: Option<ArrayBound>,
    },
    Structure {
        name: Option<String>,
        byte_size: Option<u64>,
        members: Vec<Member>,
    },
    Union {
        name: Option<String>,
        byte_size: Option<u64>,
        members: Vec<Member>,
    },
    Const {
        inner: Option<TypeId>,
    },
    Volatile {
        inner: Option<TypeId>,
    },
}

/// Arena of type nodes for one compile unit. Immutable once built.
#[derive(Debug, Default)]
pub struct TypeStore {
    nodes: Vec<TypeDeclaration>,
}

impl TypeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, declaration: TypeDeclaration) -> TypeId {
        self.nodes.push(declaration);
        self.nodes.len() - 1
    }

    pub fn get(&self, id: TypeId) -> &TypeDeclaration {
        &self.nodes[id]
    }

    fn get_mut(&mut self, id: TypeId) -> &mut TypeDeclaration {
        &mut self.nodes[id]
    }

    /// Follows typedef and cv-qualifier chains down to the underlying type.
    pub fn strip_aliases(&self, id: TypeId) -> TypeId {
        let mut current = id;
        loop {
            match self.get(current) {
                TypeDeclaration::TypeDef { base: Some(inner), .. }
                | TypeDeclaration::Const { inner: Some(inner) }
                | TypeDeclaration::Volatile { inner: Some(inner) } => current = *inner,
                _ => return current,
            }
        }
    }

    /// Pointer target and pointer width, if the type is (an alias of) a
    /// pointer.
    pub fn pointer_target(&self, id: TypeId) -> Option<(Option<TypeId>, usize)> {
        match self.get(self.strip_aliases(id)) {
            TypeDeclaration::Pointer {
                pointer_size,
                target,
            } => Some((*target, *pointer_size)),
            _ => None,
        }
    }

    /// Size of a value of this type in bytes. Unresolvable sizes are
    /// reported as zero; parsing surfaces the precise error.
    pub fn size_of(&self, id: TypeId) -> usize {
        match self.get(id) {
            TypeDeclaration::Base { byte_size, .. } => *byte_size,
            TypeDeclaration::TypeDef { base, .. } => {
                base.map(|inner| self.size_of(inner)).unwrap_or(0)
            }
            TypeDeclaration::Pointer { pointer_size, .. } => *pointer_size,
            TypeDeclaration::Array { element, count } => {
                let element_size = element.map(|e| self.size_of(e)).unwrap_or(0);
                match count {
                    Some(ArrayBound::Fixed(count)) => element_size * *count as usize,
                    _ => 0,
                }
            }
            TypeDeclaration::Structure {
                byte_size, members, ..
            } => match byte_size {
                Some(size) => *size as usize,
                None => members
                    .last()
                    .map(|member| {
                        member.offset as usize
                            + member.type_ref.map(|t| self.size_of(t)).unwrap_or(0)
                    })
                    .unwrap_or(0),
            },
            TypeDeclaration::Union {
                byte_size, members, ..
            } => match byte_size {
                Some(size) => *size as usize,
                None => members
                    .iter()
                    .map(|member| member.type_ref.map(|t| self.size_of(t)).unwrap_or(0))
                    .max()
                    .unwrap_or(0),
            },
            TypeDeclaration::Const { inner } | TypeDeclaration::Volatile { inner } => {
                inner.map(|i| self.size_of(i)).unwrap_or(0)
            }
        }
    }

    /// Human-readable type name; `None` renders as `void`.
    pub fn name_of(&self, id: Option<TypeId>) -> String {
        let Some(id) = id else {
            return "void".to_string();
        };
        match self.get(id) {
            TypeDeclaration::Base { name, .. } => name.clone(),
            TypeDeclaration::TypeDef { name, .. } => name.clone(),
            TypeDeclaration::Pointer { target, .. } => format!("{}*", self.name_of(*target)),
            TypeDeclaration::Array { element, .. } => format!("{}[]", self.name_of(*element)),
            TypeDeclaration::Structure { name, .. } => match name {
                Some(name) => format!("struct {name}"),
                None => "struct".to_string(),
            },
            TypeDeclaration::Union { name, .. } => match name {
                Some(name) => format!("union {name}"),
                None => "union".to_string(),
            },
            TypeDeclaration::Const { inner } => format!("const {}", self.name_of(*inner)),
            TypeDeclaration::Volatile { inner } => format!("volatile {}", self.name_of(*inner)),
        }
    }

    /// Renders `data` as a value of the given type.
    pub fn parse_value(
        &self,
        id: TypeId,
        data: &[u8],
        byte_order: RunTimeEndian,
    ) -> Result<String, Error> {
        match self.get(id) {
            TypeDeclaration::Base {
                byte_size,
                encoding,
                ..
            } => self.parse_base(*byte_size, *encoding, data, byte_order),
            TypeDeclaration::TypeDef { base, .. } => {
                let inner = base.ok_or(Error::NoAssociatedType)?;
                self.parse_value(inner, data, byte_order)
            }
            TypeDeclaration::Const { inner } | TypeDeclaration::Volatile { inner } => {
                let inner = inner.ok_or(Error::NoAssociatedType)?;
                self.parse_value(inner, data, byte_order)
            }
            TypeDeclaration::Pointer {
                pointer_size,
                target,
            } => {
                if data.len() != *pointer_size {
                    return Err(Error::WrongSize {
                        expected: *pointer_size,
                        actual: data.len(),
                    });
                }
                let address = read_unsigned(data, byte_order);
                Ok(format!("({}*) 0x{address:x}", self.name_of(*target)))
            }
            TypeDeclaration::Array { element, count } => {
                let element = element.ok_or(Error::NoAssociatedType)?;
                match count {
                    None => return Err(Error::NoBoundary),
                    Some(ArrayBound::Runtime) => return Err(Error::NeedParseLocation),
                    Some(ArrayBound::Fixed(_)) => {}
                }
                let element_size = self.size_of(element);
                if element_size == 0 {
                    return Err(Error::NoBoundary);
                }
                if data.is_empty() || data.len() % element_size != 0 {
                    return Err(Error::WrongSize {
                        expected: self.size_of(id),
                        actual: data.len(),
                    });
                }
                data.chunks(element_size)
                    .map(|chunk| self.parse_value(element, chunk, byte_order))
                    .collect::<Result<Vec<_>, _>>()
                    .map(|elements| elements.join(" "))
            }
            TypeDeclaration::Structure { members, .. } => {
                let expected = self.size_of(id);
                if data.len() != expected {
                    return Err(Error::WrongSize {
                        expected,
                        actual: data.len(),
                    });
                }
                let fields = members
                    .iter()
                    .map(|member| {
                        let type_ref = member.type_ref.ok_or(Error::NoAssociatedType)?;
                        let size = self.size_of(type_ref);
                        let start = member.offset as usize;
                        let slice = data.get(start..start + size).ok_or(Error::WrongSize {
                            expected,
                            actual: data.len(),
                        })?;
                        let value = self.parse_value(type_ref, slice, byte_order)?;
                        Ok(format!("{}: {}", member.name, value))
                    })
                    .collect::<Result<Vec<_>, Error>>()?;
                Ok(format!("{{ {} }}", fields.iter().format(", ")))
            }
            TypeDeclaration::Union { members, .. } => {
                let expected = self.size_of(id);
                if data.len() != expected {
                    return Err(Error::WrongSize {
                        expected,
                        actual: data.len(),
                    });
                }
                // every variant is parsed over the same byte window
                let fields = members
                    .iter()
                    .map(|member| {
                        let type_ref = member.type_ref.ok_or(Error::NoAssociatedType)?;
                        let size = self.size_of(type_ref);
                        let slice = data.get(..size).ok_or(Error::WrongSize {
                            expected,
                            actual: data.len(),
                        })?;
                        let value = self.parse_value(type_ref, slice, byte_order)?;
                        Ok(format!("{}: {}", member.name, value))
                    })
                    .collect::<Result<Vec<_>, Error>>()?;
                Ok(format!("{{ {} }}", fields.iter().format(", ")))
            }
        }
    }

    fn parse_base(
        &self,
        byte_size: usize,
        encoding: DwAte,
        data: &[u8],
        byte_order: RunTimeEndian,
    ) -> Result<String, Error> {
        if data.len() != byte_size {
            return Err(Error::WrongSize {
                expected: byte_size,
                actual: data.len(),
            });
        }
        match encoding {
            DW_ATE_address => Ok(format!("0x{:x}", read_unsigned(data, byte_order))),
            DW_ATE_boolean => Ok(if data[0] != 0 { "true" } else { "false" }.to_string()),
            DW_ATE_signed | DW_ATE_signed_char => {
                Ok(format!("{}", read_signed(data, byte_order)))
            }
            DW_ATE_unsigned | DW_ATE_unsigned_char => {
                Ok(format!("{}", read_unsigned(data, byte_order)))
            }
            DW_ATE_float => match byte_size {
                4 => Ok(format!(
                    "{:.6}",
                    f32::from_bits(read_unsigned(data, byte_order) as u32)
                )),
                8 => Ok(format!(
                    "{:.6}",
                    f64::from_bits(read_unsigned(data, byte_order))
                )),
                _ => Err(Error::InvalidDwarf("unsupported float width")),
            },
            _ => Err(Error::InvalidDwarf("unsupported base type encoding")),
        }
    }
}

pub(crate) fn read_unsigned(data: &[u8], byte_order: RunTimeEndian) -> u64 {
    match byte_order {
        RunTimeEndian::Little => data
            .iter()
            .rev()
            .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte)),
        RunTimeEndian::Big => data
            .iter()
            .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte)),
    }
}

fn read_signed(data: &[u8], byte_order: RunTimeEndian) -> i64 {
    let value = read_unsigned(data, byte_order);
    let width = data.len().min(8) as u32 * 8;
    if width == 64 {
        return value as i64;
    }
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

/// A type node waiting for the type at some DIE offset to materialize.
#[derive(Debug)]
enum Waiter {
    TypedefBase(TypeId),
    PointerTarget(TypeId),
    ConstInner(TypeId),
    VolatileInner(TypeId),
    ArrayElement(TypeId),
    Member { aggregate: TypeId, index: usize },
}

/// Builds a [`TypeStore`] from the linear DIE stream of one compile unit.
pub struct TypeStoreBuilder {
    store: TypeStore,
    resolved: HashMap<u64, TypeId>,
    waiting: HashMap<u64, Vec<Waiter>>,
    current_array: Option<TypeId>,
    current_aggregate: Option<TypeId>,
    pointer_size: usize,
}

impl TypeStoreBuilder {
    pub fn new(pointer_size: usize) -> Self {
        Self {
            store: TypeStore::new(),
            resolved: HashMap::new(),
            waiting: HashMap::new(),
            current_array: None,
            current_aggregate: None,
            pointer_size,
        }
    }

    pub fn consume(&mut self, entry: &DieEntry) -> Result<(), Error> {
        match entry.tag {
            DW_TAG_base_type => {
                let name = entry
                    .name
                    .clone()
                    .ok_or(Error::InvalidDwarf("base type without a name"))?;
                let encoding = entry
                    .encoding
                    .ok_or(Error::InvalidDwarf("base type without an encoding"))?;
                let id = self.store.add(TypeDeclaration::Base {
                    name,
                    byte_size: entry.byte_size.unwrap_or(0) as usize,
                    encoding,
                });
                self.publish(entry.offset, id);
            }
            DW_TAG_typedef => {
                let name = entry.name.clone().unwrap_or_default();
                let base = self.lookup(entry.type_ref);
                let id = self.store.add(TypeDeclaration::TypeDef { name, base });
                if base.is_none() {
                    self.wait(entry.type_ref, Waiter::TypedefBase(id));
                }
                self.publish(entry.offset, id);
            }
            DW_TAG_pointer_type => {
                let target = self.lookup(entry.type_ref);
                let id = self.store.add(TypeDeclaration::Pointer {
                    pointer_size: self.pointer_size,
                    target,
                });
                if target.is_none() {
                    self.wait(entry.type_ref, Waiter::PointerTarget(id));
                }
                self.publish(entry.offset, id);
            }
            DW_TAG_array_type => {
                let element = self.lookup(entry.type_ref);
                let id = self.store.add(TypeDeclaration::Array {
                    element,
                    count: None,
                });
                if element.is_none() {
                    self.wait(entry.type_ref, Waiter::ArrayElement(id));
                }
                self.current_array = Some(id);
                self.publish(entry.offset, id);
            }
            DW_TAG_subrange_type => {
                if let Some(array_id) = self.current_array {
                    let bound = entry.count.or(entry
                        .upper_bound
                        .map(|bound| match bound {
                            ArrayBound::Fixed(upper) => ArrayBound::Fixed(upper + 1),
                            ArrayBound::Runtime => ArrayBound::Runtime,
                        }));
                    if let TypeDeclaration::Array { count, .. } = self.store.get_mut(array_id) {
                        *count = bound;
                    }
                }
            }
            DW_TAG_structure_type => {
                let id = self.store.add(TypeDeclaration::Structure {
                    name: entry.name.clone(),
                    byte_size: entry.byte_size,
                    members: Vec::new(),
                });
                self.current_aggregate = Some(id);
                self.publish(entry.offset, id);
            }
            DW_TAG_union_type => {
                let id = self.store.add(TypeDeclaration::Union {
                    name: entry.name.clone(),
                    byte_size: entry.byte_size,
                    members: Vec::new(),
                });
                self.current_aggregate = Some(id);
                self.publish(entry.offset, id);
            }
            DW_TAG_member => {
                let aggregate = self
                    .current_aggregate
                    .ok_or(Error::InvalidDwarf("member entry outside of an aggregate"))?;
                let name = entry.name.clone().ok_or(Error::AnonymousStruct)?;
                let type_ref = self.lookup(entry.type_ref);
                let member = Member {
                    name,
                    offset: entry.data_member_location.unwrap_or(0),
                    type_ref,
                };
                let index = match self.store.get_mut(aggregate) {
                    TypeDeclaration::Structure { members, .. }
                    | TypeDeclaration::Union { members, .. } => {
                        members.push(member);
                        members.len() - 1
                    }
                    _ => return Err(Error::InvalidDwarf("member entry outside of an aggregate")),
                };
                if type_ref.is_none() {
                    self.wait(entry.type_ref, Waiter::Member { aggregate, index });
                }
            }
            DW_TAG_const_type => {
                let inner = self.lookup(entry.type_ref);
                let id = self.store.add(TypeDeclaration::Const { inner });
                if inner.is_none() && entry.type_ref.is_some() {
                    self.wait(entry.type_ref, Waiter::ConstInner(id));
                }
                self.publish(entry.offset, id);
            }
            DW_TAG_volatile_type => {
                let inner = self.lookup(entry.type_ref);
                let id = self.store.add(TypeDeclaration::Volatile { inner });
                if inner.is_none() && entry.type_ref.is_some() {
                    self.wait(entry.type_ref, Waiter::VolatileInner(id));
                }
                self.publish(entry.offset, id);
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolves the id published at `offset` into every type that was
    /// created with a dangling reference to it. Pointer targets that never
    /// materialize simply stay void; any other dangling reference is a
    /// defect of the debug information.
    pub fn finish(self) -> Result<TypeStore, Error> {
        for waiters in self.waiting.into_values() {
            for waiter in waiters {
                match waiter {
                    Waiter::PointerTarget(_) => {}
                    _ => return Err(Error::InvalidDwarf("type referenced but never defined")),
                }
            }
        }
        Ok(self.store)
    }

    /// Offset → id map of all published types, shared with the symbol side
    /// of the parse.
    pub fn resolved_offsets(&self) -> &HashMap<u64, TypeId> {
        &self.resolved
    }

    fn lookup(&self, offset: Option<u64>) -> Option<TypeId> {
        offset.and_then(|offset| self.resolved.get(&offset).copied())
    }

    fn wait(&mut self, offset: Option<u64>, waiter: Waiter) {
        if let Some(offset) = offset {
            self.waiting.entry(offset).or_default().push(waiter);
        }
    }

    fn publish(&mut self, offset: u64, id: TypeId) {
        self.resolved.insert(offset, id);
        let Some(waiters) = self.waiting.remove(&offset) else {
            return;
        };
        for waiter in waiters {
            match waiter {
                Waiter::TypedefBase(waiting_id) => {
                    if let TypeDeclaration::TypeDef { base, .. } = self.store.get_mut(waiting_id) {
                        *base = Some(id);
                    }
                }
                Waiter::PointerTarget(waiting_id) => {
                    if let TypeDeclaration::Pointer { target, .. } = self.store.get_mut(waiting_id)
                    {
                        *target = Some(id);
                    }
                }
                Waiter::ConstInner(waiting_id) => {
                    if let TypeDeclaration::Const { inner } = self.store.get_mut(waiting_id) {
                        *inner = Some(id);
                    }
                }
                Waiter::VolatileInner(waiting_id) => {
                    if let TypeDeclaration::Volatile { inner } = self.store.get_mut(waiting_id) {
                        *inner = Some(id);
                    }
                }
                Waiter::ArrayElement(waiting_id) => {
                    if let TypeDeclaration::Array { element, .. } = self.store.get_mut(waiting_id) {
                        *element = Some(id);
                    }
                }
                Waiter::Member { aggregate, index } => {
                    if let TypeDeclaration::Structure { members, .. }
                    | TypeDeclaration::Union { members, .. } = self.store.get_mut(aggregate)
                    {
                        members[index].type_ref = Some(id);
                    }
                }
            }
        }
    }
}
