//! Bidirectional mapping between source positions and instruction
//! addresses, flattened out of the per-unit DWARF line programs.

use crate::debugger::error::Error;
use crate::debugger::LineInformation;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub(super) struct LineRow {
    pub address: u64,
    /// Full path of the source file.
    pub file: Rc<str>,
    pub line: u64,
    pub is_stmt: bool,
    pub end_sequence: bool,
}

/// Last path component, used as the forward-lookup key.
pub(super) fn short_filename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Line table of the whole guest image. The two maps are immutable after
/// construction; only the current-position pair mutates, driven by
/// [`LineInformation::is_new_line`] from the step loop.
pub struct LineTable {
    rows: Vec<LineRow>,
    file_to_address: HashMap<(String, u64), u64>,
    current_file: String,
    current_line: u64,
}

impl LineTable {
    /// Builds the table from rows in line-program order. Only
    /// statement-boundary rows are indexed for forward lookup and for each
    /// `(file, line)` key the first-encountered address wins.
    pub(super) fn from_rows(rows: Vec<LineRow>) -> Self {
        let mut file_to_address = HashMap::new();
        for row in &rows {
            if !row.is_stmt || row.end_sequence || row.line == 0 {
                continue;
            }
            let key = (short_filename(&row.file).to_string(), row.line);
            file_to_address.entry(key).or_insert(row.address);
        }

        let mut rows = rows;
        rows.sort_by_key(|row| row.address);

        Self {
            rows,
            file_to_address,
            current_file: String::new(),
            current_line: 0,
        }
    }

    /// Row covering `pc`: the row with the greatest address not above `pc`
    /// within a live sequence.
    fn lookup(&self, pc: u64) -> Option<&LineRow> {
        let index = match self.rows.binary_search_by_key(&pc, |row| row.address) {
            Ok(index) => index,
            Err(0) => return None,
            Err(index) => index - 1,
        };
        let row = &self.rows[index];
        (!row.end_sequence).then_some(row)
    }
}

impl LineInformation for LineTable {
    fn current_line(&self) -> (String, u64) {
        (self.current_file.clone(), self.current_line)
    }

    fn is_new_line(&mut self, pc: u64) -> bool {
        let Some((file, line)) = self
            .lookup(pc)
            .map(|row| (row.file.to_string(), row.line))
        else {
            return false;
        };
        let changed = line != self.current_line || file != self.current_file;
        self.current_line = line;
        self.current_file = file;
        changed
    }

    fn address(&self, file: &str, line: u64) -> Option<u64> {
        self.file_to_address
            .get(&(file.to_string(), line))
            .copied()
    }

    fn address_to_line(&self, address: u64) -> Result<(String, u64), Error> {
        self.lookup(address)
            .map(|row| (row.file.to_string(), row.line))
            .ok_or(Error::UnknownAddress(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(address: u64, file: &Rc<str>, line: u64, is_stmt: bool) -> LineRow {
        LineRow {
            address,
            file: Rc::clone(file),
            line,
            is_stmt,
            end_sequence: false,
        }
    }

    fn table() -> LineTable {
        let start: Rc<str> = Rc::from("/src/os/start.c");
        let main: Rc<str> = Rc::from("/src/os/main.c");
        LineTable::from_rows(vec![
            row(0x10, &start, 2, true),
            row(0x13, &start, 3, true),
            // non-statement row on the same line, must not win the key
            row(0x15, &start, 3, false),
            row(0x18, &start, 4, true),
            // duplicate key: first-encountered address wins
            row(0x1c, &start, 3, true),
            LineRow {
                address: 0x20,
                file: Rc::clone(&start),
                line: 0,
                is_stmt: false,
                end_sequence: true,
            },
            row(0x100, &main, 7, true),
        ])
    }

    #[test]
    fn test_address_uses_short_filename() {
        let table = table();
        assert_eq!(table.address("start.c", 3), Some(0x13));
        assert_eq!(table.address("main.c", 7), Some(0x100));
        assert_eq!(table.address("/src/os/start.c", 3), None);
    }

    #[test]
    fn test_first_encountered_address_wins() {
        let table = table();
        assert_eq!(table.address("start.c", 3), Some(0x13));
    }

    #[test]
    fn test_unmapped_lines_have_no_address() {
        let table = table();
        // comments, blank lines, lines of unknown files
        assert_eq!(table.address("start.c", 99), None);
        assert_eq!(table.address("other.c", 3), None);
    }

    #[test]
    fn test_address_to_line_covers_row_ranges() {
        let table = table();
        assert_eq!(
            table.address_to_line(0x13).unwrap(),
            ("/src/os/start.c".to_string(), 3)
        );
        // addresses between rows resolve to the covering row
        assert_eq!(
            table.address_to_line(0x14).unwrap(),
            ("/src/os/start.c".to_string(), 3)
        );
        assert!(matches!(
            table.address_to_line(0x2),
            Err(Error::UnknownAddress(0x2))
        ));
        // past an end-of-sequence marker there is no line
        assert!(matches!(
            table.address_to_line(0x50),
            Err(Error::UnknownAddress(0x50))
        ));
    }

    #[test]
    fn test_is_new_line_tracks_transitions() {
        let mut table = table();
        // first observation is always a change
        assert!(table.is_new_line(0x10));
        assert_eq!(table.current_line(), ("/src/os/start.c".to_string(), 2));
        // same line, different instruction: no change
        assert!(!table.is_new_line(0x11));
        // next source line
        assert!(table.is_new_line(0x13));
        // same line number in a different file is a change
        assert!(table.is_new_line(0x100));
        assert_eq!(table.current_line(), ("/src/os/main.c".to_string(), 7));
    }

    #[test]
    fn test_is_new_line_ignores_unmapped_pc() {
        let mut table = table();
        assert!(table.is_new_line(0x10));
        // unmapped pc neither reports nor records a change
        assert!(!table.is_new_line(0x2));
        assert_eq!(table.current_line(), ("/src/os/start.c".to_string(), 2));
    }

    #[test]
    fn test_short_filename() {
        assert_eq!(short_filename("/src/os/start.c"), "start.c");
        assert_eq!(short_filename("start.c"), "start.c");
    }
}
