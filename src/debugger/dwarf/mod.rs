//! Debug-information plumbing: loading the guest ELF image, walking its
//! DWARF compile units and feeding the line-table, type and symbol
//! builders.

pub mod eval;
pub mod line;
pub mod symbol;
pub mod r#type;

use crate::debugger::dwarf::line::{LineRow, LineTable};
use crate::debugger::dwarf::r#type::{ArrayBound, TypeStore, TypeStoreBuilder};
use crate::debugger::dwarf::symbol::{SymbolTable, Variable};
use crate::debugger::error::Error;
use crate::debugger::SymbolSource;
use bytes::Bytes;
use fallible_iterator::FallibleIterator;
use gimli::{
    AttributeValue, DwAte, DwTag, Range, Reader, RunTimeEndian, DW_AT_byte_size, DW_AT_count,
    DW_AT_data_member_location, DW_AT_encoding, DW_AT_high_pc, DW_AT_location, DW_AT_low_pc,
    DW_AT_name, DW_AT_type, DW_AT_upper_bound,
};
use log::debug;
use object::{Object, ObjectSection};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroU64;
use std::path::Path;
use std::rc::Rc;

pub type EndianRcSlice = gimli::EndianRcSlice<gimli::RunTimeEndian>;

/// One debugging-information entry, reduced to the attributes the type and
/// symbol builders consume.
#[derive(Debug, Clone)]
pub struct DieEntry {
    /// Compile-unit-relative offset; type references use the same space.
    pub offset: u64,
    pub tag: DwTag,
    pub name: Option<String>,
    pub byte_size: Option<u64>,
    pub encoding: Option<DwAte>,
    pub type_ref: Option<u64>,
    pub data_member_location: Option<u64>,
    pub upper_bound: Option<ArrayBound>,
    pub count: Option<ArrayBound>,
    pub low_pc: Option<u64>,
    /// Absolute end address; offset-from-low encodings are already
    /// resolved.
    pub high_pc: Option<u64>,
    pub location: Option<Bytes>,
}

/// DWARF sections of the guest image plus the per-unit range index.
pub struct DebugInformation {
    dwarf: gimli::Dwarf<EndianRcSlice>,
    units: Vec<gimli::Unit<EndianRcSlice>>,
    unit_ranges: Vec<Vec<Range>>,
    byte_order: RunTimeEndian,
}

impl DebugInformation {
    /// Maps the image file and copies its DWARF sections out of the
    /// mapping.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = fs::File::open(path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        let object = object::File::parse(&*mmap)?;
        Self::from_object(&object)
    }

    pub fn from_object(object: &object::File) -> Result<Self, Error> {
        let byte_order = if object.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        fn load_section<'a>(
            id: gimli::SectionId,
            file: &object::File<'a>,
            endian: RunTimeEndian,
        ) -> Result<EndianRcSlice, gimli::Error> {
            let data = file
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(Cow::Borrowed(&[]));
            Ok(gimli::EndianRcSlice::new(Rc::from(&*data), endian))
        }

        let dwarf = gimli::Dwarf::load(|id| load_section(id, object, byte_order))?;

        let units: Vec<_> = dwarf
            .units()
            .map(|header| dwarf.unit(header))
            .collect()
            .map_err(Error::DwarfParsing)?;

        let unit_ranges = units
            .iter()
            .map(|unit| {
                let mut ranges: Vec<Range> = dwarf.unit_ranges(unit)?.collect()?;
                ranges.sort_by_key(|range| range.begin);
                Ok(ranges)
            })
            .collect::<Result<Vec<_>, gimli::Error>>()?;

        Ok(Self {
            dwarf,
            units,
            unit_ranges,
            byte_order,
        })
    }

    pub fn byte_order(&self) -> RunTimeEndian {
        self.byte_order
    }

    /// Pointer width of the image in bytes, taken from the first compile
    /// unit.
    pub fn pointer_width(&self) -> Option<usize> {
        self.units
            .first()
            .map(|unit| usize::from(unit.header.address_size()))
    }

    /// Flattens every unit's line program into one [`LineTable`].
    pub fn line_table(&self) -> Result<LineTable, Error> {
        let mut rows = Vec::new();
        for unit in &self.units {
            let Some(program) = unit.line_program.clone() else {
                continue;
            };
            let mut files: HashMap<u64, Rc<str>> = HashMap::new();
            let mut line_rows = program.rows();
            while let Some((header, row)) = line_rows.next_row()? {
                let file = match files.get(&row.file_index()) {
                    Some(file) => Rc::clone(file),
                    None => {
                        let rendered: Rc<str> = match row.file(header) {
                            Some(file) => {
                                Rc::from(render_file_path(unit, file, header, &self.dwarf)?)
                            }
                            None => Rc::from(""),
                        };
                        files.insert(row.file_index(), Rc::clone(&rendered));
                        rendered
                    }
                };
                rows.push(LineRow {
                    address: row.address(),
                    file,
                    line: row.line().map(NonZeroU64::get).unwrap_or(0),
                    is_stmt: row.is_stmt(),
                    end_sequence: row.end_sequence(),
                });
            }
        }
        Ok(LineTable::from_rows(rows))
    }

    fn unit_for_pc(&self, pc: u64) -> Option<usize> {
        self.unit_ranges.iter().position(|ranges| {
            ranges
                .iter()
                .any(|range| range.begin <= pc && pc <= range.end)
        })
    }
}

/// Lazily parsed symbol and type information, one entry per compile unit
/// actually visited by the debugger.
pub struct DwarfResolver {
    debug_info: DebugInformation,
    parsed: HashMap<usize, ParsedUnit>,
}

struct ParsedUnit {
    symbols: SymbolTable,
}

impl DwarfResolver {
    pub fn new(debug_info: DebugInformation) -> Self {
        Self {
            debug_info,
            parsed: HashMap::new(),
        }
    }

    fn ensure_parsed(&mut self, unit_index: usize) -> Result<(), Error> {
        if self.parsed.contains_key(&unit_index) {
            return Ok(());
        }
        debug!(target: "debugger", "parsing debug entries of unit {unit_index}");
        let parsed = parse_unit(&self.debug_info, unit_index)?;
        self.parsed.insert(unit_index, parsed);
        Ok(())
    }
}

impl SymbolSource for DwarfResolver {
    fn find_symbol(&mut self, name: &str, pc: u64) -> Result<Variable, Error> {
        let unit_index = self
            .debug_info
            .unit_for_pc(pc)
            .ok_or(Error::UnknownAddress(pc))?;
        self.ensure_parsed(unit_index)?;
        self.parsed[&unit_index].symbols.get(name, pc).cloned()
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

/// Walks every DIE of the unit once, then replays the captured entries
/// through the type builder and the scope builder.
fn parse_unit(debug_info: &DebugInformation, unit_index: usize) -> Result<ParsedUnit, Error> {
    let unit = &debug_info.units[unit_index];
    let ranges = &debug_info.unit_ranges[unit_index];

    let mut entries = Vec::new();
    let mut cursor = unit.entries();
    while let Some((_, die)) = cursor.next_dfs()? {
        entries.push(die_entry(&debug_info.dwarf, unit, die)?);
    }

    let mut types = TypeStoreBuilder::new(usize::from(unit.header.address_size()));
    for entry in &entries {
        types.consume(entry)?;
    }
    let offsets = types.resolved_offsets().clone();
    let types: Rc<TypeStore> = Rc::new(types.finish()?);

    let (low_pc, high_pc) = match (
        ranges.iter().map(|range| range.begin).min(),
        ranges.iter().map(|range| range.end).max(),
    ) {
        (Some(low), Some(high)) => (low, high),
        _ => (0, u64::MAX),
    };
    let mut symbols = SymbolTable::new(low_pc, high_pc);
    for entry in &entries {
        symbols.consume(entry, &types, &offsets);
    }

    Ok(ParsedUnit { symbols })
}

fn die_entry(
    dwarf: &gimli::Dwarf<EndianRcSlice>,
    unit: &gimli::Unit<EndianRcSlice>,
    die: &gimli::DebuggingInformationEntry<EndianRcSlice>,
) -> Result<DieEntry, Error> {
    let name = match die.attr(DW_AT_name)? {
        Some(attr) => Some(
            dwarf
                .attr_string(unit, attr.value())?
                .to_string_lossy()?
                .into_owned(),
        ),
        None => None,
    };

    let byte_size = die.attr(DW_AT_byte_size)?.and_then(|attr| attr.udata_value());

    let encoding = die.attr(DW_AT_encoding)?.and_then(|attr| match attr.value() {
        AttributeValue::Encoding(encoding) => Some(encoding),
        _ => None,
    });

    // only intra-unit references are usable; anything else behaves like a
    // missing type attribute
    let type_ref = die.attr(DW_AT_type)?.and_then(|attr| match attr.value() {
        AttributeValue::UnitRef(offset) => Some(offset.0 as u64),
        _ => None,
    });

    let data_member_location = die
        .attr(DW_AT_data_member_location)?
        .and_then(|attr| attr.udata_value());

    let bound_attr = |attr: Option<gimli::Attribute<EndianRcSlice>>| {
        attr.map(|attr| match attr.udata_value() {
            Some(value) => ArrayBound::Fixed(value),
            None => ArrayBound::Runtime,
        })
    };
    let upper_bound = bound_attr(die.attr(DW_AT_upper_bound)?);
    let count = bound_attr(die.attr(DW_AT_count)?);

    let mut low_pc = None;
    if let Some(attr) = die.attr(DW_AT_low_pc)? {
        match attr.value() {
            AttributeValue::Addr(value) => low_pc = Some(value),
            AttributeValue::DebugAddrIndex(index) => low_pc = Some(dwarf.address(unit, index)?),
            _ => {}
        }
    }

    let mut high_pc = None;
    if let Some(attr) = die.attr(DW_AT_high_pc)? {
        match attr.value() {
            AttributeValue::Addr(value) => high_pc = Some(value),
            AttributeValue::DebugAddrIndex(index) => high_pc = Some(dwarf.address(unit, index)?),
            AttributeValue::Udata(value) => high_pc = Some(low_pc.unwrap_or(0) + value),
            _ => {}
        }
    }

    let location = die.attr(DW_AT_location)?.and_then(|attr| match attr.value() {
        AttributeValue::Exprloc(expression) => expression
            .0
            .to_slice()
            .ok()
            .map(|data| Bytes::copy_from_slice(&data)),
        _ => None,
    });

    Ok(DieEntry {
        offset: die.offset().0 as u64,
        tag: die.tag(),
        name,
        byte_size,
        encoding,
        type_ref,
        data_member_location,
        upper_bound,
        count,
        low_pc,
        high_pc,
        location,
    })
}

fn render_file_path<R: Reader>(
    dw_unit: &gimli::Unit<R>,
    file: &gimli::FileEntry<R, R::Offset>,
    header: &gimli::LineProgramHeader<R, R::Offset>,
    sections: &gimli::Dwarf<R>,
) -> Result<String, gimli::Error> {
    let mut path = if let Some(ref comp_dir) = dw_unit.comp_dir {
        comp_dir.to_string_lossy()?.into_owned()
    } else {
        String::new()
    };

    if file.directory_index() != 0 {
        if let Some(directory) = file.directory(header) {
            path_push(
                &mut path,
                sections
                    .attr_string(dw_unit, directory)?
                    .to_string_lossy()?
                    .as_ref(),
            );
        }
    }

    path_push(
        &mut path,
        sections
            .attr_string(dw_unit, file.path_name())?
            .to_string_lossy()?
            .as_ref(),
    );

    Ok(path)
}

fn path_push(path: &mut String, p: &str) {
    if p.starts_with('/') {
        *path = p.to_string();
    } else {
        let dir_separator = '/';
        if !path.is_empty() && !path.ends_with(dir_separator) {
            path.push(dir_separator);
        }
        *path += p;
    }
}
