//! Tabular pivot sources: a worksheet range or a table, presented uniformly.
//!
//! Both variants expose the same shape (header row + data rows + bounding
//! range). A table source captures its absolute sheet offsets once at
//! construction; callers always address it as if its header row were the
//! first row of the source.

use std::collections::BTreeSet;

use crate::builder::BuildError;
use crate::{Data, Dimensions, Range};

/// An Excel table (a named, structured range with a header row)
#[derive(Debug, Clone)]
pub struct Table {
    pub(crate) name: String,
    pub(crate) sheet_name: String,
    pub(crate) columns: Vec<String>,
    /// Whole-table bounds (header row included), absolute sheet coordinates
    pub(crate) dimensions: Dimensions,
    /// The owning sheet's cells
    pub(crate) sheet_range: Range<Data>,
}

impl Table {
    /// Creates a table over a slice of a sheet's cells.
    ///
    /// `dimensions` covers the header row and the data rows, in absolute
    /// sheet coordinates.
    pub fn new(
        name: impl Into<String>,
        sheet_name: impl Into<String>,
        columns: Vec<String>,
        dimensions: Dimensions,
        sheet_range: Range<Data>,
    ) -> Table {
        Table {
            name: name.into(),
            sheet_name: sheet_name.into(),
            columns,
            dimensions,
            sheet_range,
        }
    }

    /// Table display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the sheet owning the table
    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// Column header names, left to right
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whole-table bounds (header row included)
    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }
}

/// A worksheet range acting as a pivot source
#[derive(Debug, Clone)]
pub struct SheetSource {
    name: String,
    header: Vec<String>,
    range: Range<Data>,
}

impl SheetSource {
    /// Adapts a whole worksheet range; its first row is the header row.
    pub fn new(name: impl Into<String>, range: Range<Data>) -> SheetSource {
        let header = range
            .rows()
            .next()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .unwrap_or_default();
        SheetSource {
            name: name.into(),
            header,
            range,
        }
    }
}

/// A table acting as a pivot source
#[derive(Debug, Clone)]
pub struct TableSource {
    table: Table,
    /// Absolute position of the header row's first cell, captured once
    offset: (u32, u32),
}

impl TableSource {
    /// Adapts a table, validating its shape.
    ///
    /// Fails when the table has no header columns, no data rows, or two
    /// columns sharing a name.
    pub fn new(table: Table) -> Result<TableSource, BuildError> {
        if table.columns.is_empty() || table.dimensions.height() < 2 {
            return Err(BuildError::EmptySource(table.name));
        }
        let mut seen = BTreeSet::new();
        for column in &table.columns {
            if !seen.insert(column.as_str()) {
                return Err(BuildError::DuplicateColumn {
                    table: table.name,
                    column: column.clone(),
                });
            }
        }
        let offset = table.dimensions.start;
        Ok(TableSource { table, offset })
    }
}

/// A resolved pivot source, dispatched once per operation
#[derive(Debug, Clone)]
pub enum Source {
    /// A whole worksheet range
    Sheet(SheetSource),
    /// A table
    Table(TableSource),
}

impl Source {
    /// Source display name (sheet name or table name)
    pub fn name(&self) -> &str {
        match self {
            Source::Sheet(s) => &s.name,
            Source::Table(t) => &t.table.name,
        }
    }

    /// Name of the sheet the source cells live on
    pub fn sheet_name(&self) -> &str {
        match self {
            Source::Sheet(s) => &s.name,
            Source::Table(t) => &t.table.sheet_name,
        }
    }

    /// Header row labels, left to right
    pub fn header_row(&self) -> &[String] {
        match self {
            Source::Sheet(s) => &s.header,
            Source::Table(t) => &t.table.columns,
        }
    }

    /// Number of data rows (header excluded)
    pub fn row_count(&self) -> usize {
        match self {
            Source::Sheet(s) => s.range.height().saturating_sub(1),
            Source::Table(t) => t.table.dimensions.height() - 1,
        }
    }

    /// Value at `(row, col)` where row 0 is the first **data** row and
    /// col 0 the first source column, independent of sheet position
    pub fn value_at(&self, row: usize, col: usize) -> &Data {
        const EMPTY: &Data = &Data::Empty;
        match self {
            Source::Sheet(s) => {
                let start = s.range.start();
                s.range
                    .get_value((start.0 + 1 + row as u32, start.1 + col as u32))
                    .unwrap_or(EMPTY)
            }
            Source::Table(t) => t
                .table
                .sheet_range
                .get_value((t.offset.0 + 1 + row as u32, t.offset.1 + col as u32))
                .unwrap_or(EMPTY),
        }
    }

    /// Bounding range of the source (header included), absolute coordinates
    pub fn dimensions(&self) -> Dimensions {
        match self {
            Source::Sheet(s) => s.range.dimensions(),
            Source::Table(t) => t.table.dimensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet_range() -> Range<Data> {
        Range::from_rows(vec![
            vec![Data::from("A"), Data::from("B")],
            vec![Data::from("a1"), Data::Int(1)],
            vec![Data::from("a2"), Data::Int(2)],
        ])
    }

    #[test]
    fn sheet_source_header_and_rows() {
        let source = Source::Sheet(SheetSource::new("Sheet1", sheet_range()));
        assert_eq!(source.header_row(), ["A", "B"]);
        assert_eq!(source.row_count(), 2);
        assert_eq!(source.value_at(1, 1), &Data::Int(2));
    }

    #[test]
    fn table_source_offsets_do_not_leak() {
        // table body at rows 4..=6, columns 2..=3 of its sheet
        let mut cells = Vec::new();
        cells.push(((4, 2), Data::from("X")));
        cells.push(((4, 3), Data::from("Y")));
        cells.push(((5, 2), Data::from("x1")));
        cells.push(((5, 3), Data::Int(10)));
        cells.push(((6, 2), Data::from("x2")));
        cells.push(((6, 3), Data::Int(20)));
        let table = Table::new(
            "Orders",
            "Data",
            vec!["X".into(), "Y".into()],
            Dimensions::new((4, 2), (6, 3)),
            Range::from_cells(cells),
        );
        let source = Source::Table(TableSource::new(table).unwrap());
        assert_eq!(source.row_count(), 2);
        assert_eq!(source.value_at(0, 0), &Data::from("x1"));
        assert_eq!(source.value_at(1, 1), &Data::Int(20));
    }

    #[test]
    fn table_without_data_rows_is_rejected() {
        let table = Table::new(
            "Empty",
            "Data",
            vec!["X".into()],
            Dimensions::new((0, 0), (0, 0)),
            Range::from_rows(vec![vec![Data::from("X")]]),
        );
        assert_eq!(
            TableSource::new(table).unwrap_err(),
            BuildError::EmptySource("Empty".into())
        );
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let table = Table::new(
            "Dup",
            "Data",
            vec!["X".into(), "X".into()],
            Dimensions::new((0, 0), (1, 1)),
            Range::from_rows(vec![
                vec![Data::from("X"), Data::from("X")],
                vec![Data::Int(1), Data::Int(2)],
            ]),
        );
        match TableSource::new(table) {
            Err(BuildError::DuplicateColumn { table, column }) => {
                assert_eq!(table, "Dup");
                assert_eq!(column, "X");
            }
            other => panic!("expected DuplicateColumn, got {other:?}"),
        }
    }
}
