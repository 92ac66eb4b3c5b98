//! Rust OOXML pivot-table engine
//!
//! **pivotine** builds pivot tables from worksheet or table sources, writes
//! the OOXML pivot-cache/pivot-table part trio, and reconstructs pivot
//! tables from xlsx archives whose parts may arrive in any order inside the
//! zip container.
//!
//! # Examples
//! ```no_run
//! use pivotine::{Metric, PivotTableRequest, Workbook};
//!
//! let mut workbook = Workbook::open("sales.xlsx").expect("cannot open file");
//! let request = PivotTableRequest::new()
//!     .source_sheet("Sheet1")
//!     .rows(["Region", "Product"])
//!     .values(["Amount"])
//!     .metric(Metric::Sum);
//! let pivot = workbook.add_pivot_table(request).expect("invalid request");
//! assert_eq!(pivot.cache_id(), 10);
//! ```
//!
//! Loading goes the other way: [`Workbook::load_pivot_tables`] streams every
//! pivot part out of the archive into independent maps, then reconciles them
//! into the workbook's ordered pivot-table collection.

#![deny(missing_docs)]

#[macro_use]
mod utils;
mod builder;
mod datatype;
mod pivot;
mod source;
mod xlsx;

use std::fmt;

pub use builder::{BuildError, PivotTableRequest};
pub use datatype::{CellErrorType, Data};
pub use pivot::{
    CacheField, DataField, FreshPivot, LoadedPivot, Location, Metric, PivotTable, StyleInfo,
};
pub use source::{SheetSource, Source, Table, TableSource};
pub use xlsx::cache::{CacheDefinition, CacheRecords, RecordValue};
pub use xlsx::{Workbook, XlsxError};

/// A struct to handle all errors of this crate
#[derive(Debug)]
pub enum Error {
    /// Io error
    Io(std::io::Error),
    /// Xlsx part codec error
    Xlsx(XlsxError),
    /// Pivot-table build error
    Build(BuildError),
    /// Unexpected error
    Msg(&'static str),
}

from_err!(std::io::Error, Error, Io);
from_err!(XlsxError, Error, Xlsx);
from_err!(BuildError, Error, Build);
from_err!(&'static str, Error, Msg);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Xlsx(e) => write!(f, "Xlsx error: {e}"),
            Error::Build(e) => write!(f, "Build error: {e}"),
            Error::Msg(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Xlsx(e) => Some(e),
            Error::Build(e) => Some(e),
            Error::Msg(_) => None,
        }
    }
}

/// Dimensions of a rectangular cell area, in absolute (row, column)
/// coordinates, 0 based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    /// Top left cell (row, column)
    pub start: (u32, u32),
    /// Bottom right cell (row, column)
    pub end: (u32, u32),
}

impl Dimensions {
    /// Creates a new `Dimensions` from top left and bottom right corners
    pub fn new(start: (u32, u32), end: (u32, u32)) -> Dimensions {
        Dimensions { start, end }
    }

    /// Number of rows covered
    pub fn height(&self) -> usize {
        (self.end.0 - self.start.0 + 1) as usize
    }

    /// Number of columns covered
    pub fn width(&self) -> usize {
        (self.end.1 - self.start.1 + 1) as usize
    }
}

/// A trait to constrain cells
pub trait CellType: Default + Clone + PartialEq {}
impl<T: Default + Clone + PartialEq> CellType for T {}

/// A struct which represents a squared selection of cells
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Range<T: CellType> {
    start: (u32, u32),
    end: (u32, u32),
    inner: Vec<T>,
}

impl<T: CellType> Range<T> {
    /// Creates a new empty `Range` spanning `start` to `end`
    pub fn new(start: (u32, u32), end: (u32, u32)) -> Range<T> {
        Range {
            start,
            end,
            inner: vec![T::default(); ((end.0 - start.0 + 1) * (end.1 - start.1 + 1)) as usize],
        }
    }

    /// Creates a `Range` anchored at (0, 0) from dense rows.
    ///
    /// Rows shorter than the widest one are padded with default cells.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Range<T> {
        if rows.is_empty() {
            return Range {
                start: (0, 0),
                end: (0, 0),
                inner: Vec::new(),
            };
        }
        let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let height = rows.len();
        let mut inner = Vec::with_capacity(width * height);
        for mut row in rows {
            row.resize(width, T::default());
            inner.extend(row);
        }
        Range {
            start: (0, 0),
            end: (height as u32 - 1, width as u32 - 1),
            inner,
        }
    }

    /// Creates a `Range` from a sparse list of `(position, value)` cells.
    ///
    /// Bounds are the bounding box of the given positions.
    pub fn from_cells(cells: Vec<((u32, u32), T)>) -> Range<T> {
        if cells.is_empty() {
            return Range {
                start: (0, 0),
                end: (0, 0),
                inner: Vec::new(),
            };
        }
        let mut start = (u32::MAX, u32::MAX);
        let mut end = (0, 0);
        for ((row, col), _) in &cells {
            start.0 = start.0.min(*row);
            start.1 = start.1.min(*col);
            end.0 = end.0.max(*row);
            end.1 = end.1.max(*col);
        }
        let mut range = Range::new(start, end);
        let width = range.width();
        for (pos, val) in cells {
            let idx = (pos.0 - start.0) as usize * width + (pos.1 - start.1) as usize;
            range.inner[idx] = val;
        }
        range
    }

    /// Get top left cell position (row, column)
    pub fn start(&self) -> (u32, u32) {
        self.start
    }

    /// Get bottom right cell position (row, column)
    pub fn end(&self) -> (u32, u32) {
        self.end
    }

    /// Get column width
    pub fn width(&self) -> usize {
        (self.end.1 - self.start.1 + 1) as usize
    }

    /// Get row height
    pub fn height(&self) -> usize {
        (self.end.0 - self.start.0 + 1) as usize
    }

    /// Get size in (height, width) format
    pub fn get_size(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    /// Is range empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Bounding dimensions in absolute coordinates
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.start, self.end)
    }

    /// Get cell value from **absolute position**, `None` when out of bounds
    pub fn get_value(&self, absolute_position: (u32, u32)) -> Option<&T> {
        if self.inner.is_empty()
            || absolute_position.0 < self.start.0
            || absolute_position.1 < self.start.1
            || absolute_position.0 > self.end.0
            || absolute_position.1 > self.end.1
        {
            return None;
        }
        let idx = (absolute_position.0 - self.start.0) as usize * self.width()
            + (absolute_position.1 - self.start.1) as usize;
        self.inner.get(idx)
    }

    /// Get an iterator over inner rows
    pub fn rows(&self) -> Rows<'_, T> {
        if self.inner.is_empty() {
            Rows { inner: None }
        } else {
            let width = self.width();
            Rows {
                inner: Some(self.inner.chunks(width)),
            }
        }
    }
}

/// An iterator to read `Range` struct row by row
#[derive(Debug)]
pub struct Rows<'a, T: CellType> {
    inner: Option<std::slice::Chunks<'a, T>>,
}

impl<'a, T: CellType> Iterator for Rows<'a, T> {
    type Item = &'a [T];
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.as_mut().and_then(|c| c.next())
    }
}
