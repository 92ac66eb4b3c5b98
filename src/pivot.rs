//! Resolved pivot-table models.
//!
//! A pivot table is either freshly built from a source ([`FreshPivot`]) or
//! reconstructed from an archive ([`LoadedPivot`]); the two share accessors
//! through the [`PivotTable`] sum type and are dispatched exactly once, at
//! render time.

use std::str::FromStr;

use crate::builder::BuildError;
use crate::source::Source;
use crate::xlsx::cache::{CacheDefinition, CacheRecords};
use crate::Data;

/// Excel reserves low cache ids; freshly built tables start here.
pub(crate) const CACHE_ID_BASE: u32 = 10;

/// Aggregation metric applied to every value field of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    /// Sum of the values
    #[default]
    Sum,
    /// Count of the values
    Count,
}

impl Metric {
    /// The `subtotal` attribute value, absent for the default (`sum`)
    pub fn as_subtotal(&self) -> Option<&'static str> {
        match self {
            Metric::Sum => None,
            Metric::Count => Some("count"),
        }
    }

    /// Caption prefix used in generated data-field names
    pub fn caption(&self) -> &'static str {
        match self {
            Metric::Sum => "Sum",
            Metric::Count => "Count",
        }
    }

    /// Infers the metric from a parsed `subtotal` attribute.
    ///
    /// `"count"` means count; anything else, including absence, means sum.
    pub fn from_subtotal(subtotal: Option<&str>) -> Metric {
        match subtotal {
            Some("count") => Metric::Count,
            _ => Metric::Sum,
        }
    }
}

impl FromStr for Metric {
    type Err = BuildError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Metric::Sum),
            "count" => Ok(Metric::Count),
            other => Err(BuildError::UnsupportedMetric(other.to_string())),
        }
    }
}

/// One source column's metadata plus, for axis fields, its dictionary of
/// distinct values
#[derive(Debug, Clone, PartialEq)]
pub struct CacheField {
    /// Header label of the column
    pub name: String,
    /// Sorted distinct non-empty values; `None` for value-only fields
    pub shared_items: Option<Vec<Data>>,
}

/// A value field of the pivot table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataField {
    /// Display name, e.g. `Sum of Amount`
    pub name: String,
    /// Cache-field index the values come from
    pub fld: usize,
    /// `baseField` attribute
    pub base_field: u32,
    /// `baseItem` attribute
    pub base_item: u32,
    /// `subtotal` attribute; absent for `sum`
    pub subtotal: Option<String>,
}

/// The `location` element of a pivot-table definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Target area, e.g. `A3:C20`
    pub reference: String,
    /// `firstHeaderRow`
    pub first_header_row: u32,
    /// `firstDataRow`
    pub first_data_row: u32,
    /// `firstDataCol`
    pub first_data_col: u32,
}

impl Default for Location {
    fn default() -> Self {
        // placeholder area; the consuming application recomputes the real
        // layout when it refreshes the table
        Location {
            reference: "A3:C20".to_string(),
            first_header_row: 1,
            first_data_row: 2,
            first_data_col: 1,
        }
    }
}

/// The `pivotTableStyleInfo` leaf
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StyleInfo {
    /// Style name, e.g. `PivotStyleLight16`
    pub name: Option<String>,
    /// `showRowHeaders`
    pub show_row_headers: Option<String>,
    /// `showColHeaders`
    pub show_col_headers: Option<String>,
    /// `showRowStripes`
    pub show_row_stripes: Option<String>,
    /// `showColStripes`
    pub show_col_stripes: Option<String>,
    /// `showLastColumn`
    pub show_last_column: Option<String>,
}

/// Root attributes of `pivotTableDefinition` captured at parse time so an
/// unmodified loaded table reserializes structurally stable.
///
/// Absent attributes fall back to the fresh-render defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RootAttrs {
    pub(crate) data_caption: Option<String>,
    pub(crate) apply_number_formats: Option<String>,
    pub(crate) apply_border_formats: Option<String>,
    pub(crate) apply_font_formats: Option<String>,
    pub(crate) apply_pattern_formats: Option<String>,
    pub(crate) apply_alignment_formats: Option<String>,
    pub(crate) apply_width_height_formats: Option<String>,
    pub(crate) updated_version: Option<String>,
    pub(crate) min_refreshable_version: Option<String>,
    pub(crate) created_version: Option<String>,
    pub(crate) indent: Option<String>,
    pub(crate) compact: Option<String>,
    pub(crate) compact_data: Option<String>,
    pub(crate) multiple_field_filters: Option<String>,
    pub(crate) use_auto_formatting: Option<String>,
    pub(crate) item_print_titles: Option<String>,
}

/// One `item` of a parsed `pivotField`'s `items` group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedItem {
    /// Dictionary index (`x` attribute)
    pub x: Option<u32>,
    /// Item type (`t` attribute), e.g. `default`
    pub t: Option<String>,
}

/// One parsed `pivotField`, attributes preserved for re-emission
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedField {
    /// `axis` attribute (`axisRow`/`axisCol`), absent for value-only fields
    pub axis: Option<String>,
    /// `dataField` flag
    pub data_field: bool,
    /// `name` attribute when present
    pub name: Option<String>,
    /// `showAll` attribute when present
    pub show_all: Option<String>,
    /// `compact` attribute when present
    pub compact: Option<String>,
    /// `outline` attribute when present
    pub outline: Option<String>,
    /// Items of the field's dictionary, document order
    pub items: Vec<ParsedItem>,
}

/// A pivot table freshly built from a source
#[derive(Debug, Clone)]
pub struct FreshPivot {
    pub(crate) name: String,
    pub(crate) source: Source,
    pub(crate) rows: Vec<usize>,
    pub(crate) columns: Vec<usize>,
    pub(crate) values: Vec<usize>,
    pub(crate) metric: Metric,
    pub(crate) cache_fields: Vec<CacheField>,
    pub(crate) cache_id: u32,
    pub(crate) table_number: u32,
    pub(crate) apply_width_height_formats: bool,
}

impl FreshPivot {
    /// Source the table aggregates
    pub fn source(&self) -> &Source {
        &self.source
    }
}

/// A pivot table reconstructed from archive parts
#[derive(Debug, Clone)]
pub struct LoadedPivot {
    pub(crate) name: String,
    pub(crate) cache_id: u32,
    pub(crate) table_number: u32,
    pub(crate) part_path: String,
    pub(crate) rows: Vec<usize>,
    pub(crate) columns: Vec<usize>,
    pub(crate) values: Vec<usize>,
    pub(crate) metric: Metric,
    pub(crate) cache_fields: Vec<CacheField>,
    pub(crate) pivot_fields: Vec<ParsedField>,
    pub(crate) raw_row_fields: Vec<i32>,
    pub(crate) raw_col_fields: Vec<i32>,
    pub(crate) data_fields: Vec<DataField>,
    pub(crate) location: Option<Location>,
    pub(crate) style: Option<StyleInfo>,
    pub(crate) uid: Option<String>,
    pub(crate) attrs: RootAttrs,
    pub(crate) ext_lst: Option<String>,
    pub(crate) cache_definition: Option<CacheDefinition>,
    pub(crate) cache_records: Option<CacheRecords>,
}

impl LoadedPivot {
    /// Archive path of the `pivotTable{N}.xml` part this was parsed from
    pub fn part_path(&self) -> &str {
        &self.part_path
    }

    /// Attached cache definition, when the archive carried one
    pub fn cache_definition(&self) -> Option<&CacheDefinition> {
        self.cache_definition.as_ref()
    }

    /// Attached cache records, when the archive carried them
    pub fn cache_records(&self) -> Option<&CacheRecords> {
        self.cache_records.as_ref()
    }

    /// Raw data fields as parsed from the part
    pub fn data_fields(&self) -> &[DataField] {
        &self.data_fields
    }

    /// Row axis entries exactly as they appeared on the wire, values-axis
    /// markers included
    pub fn raw_row_fields(&self) -> &[i32] {
        &self.raw_row_fields
    }

    /// Column axis entries exactly as they appeared on the wire
    pub fn raw_col_fields(&self) -> &[i32] {
        &self.raw_col_fields
    }
}

/// A resolved pivot table, freshly built or loaded from an archive
#[derive(Debug, Clone)]
pub enum PivotTable {
    /// Built by [`crate::Workbook::add_pivot_table`]
    Fresh(FreshPivot),
    /// Reconstructed by [`crate::Workbook::load_pivot_tables`]
    Loaded(LoadedPivot),
}

impl PivotTable {
    /// Table display name
    pub fn name(&self) -> &str {
        match self {
            PivotTable::Fresh(p) => &p.name,
            PivotTable::Loaded(p) => &p.name,
        }
    }

    /// Cache id linking the table to its cache parts; serialized as a
    /// decimal string on the wire
    pub fn cache_id(&self) -> u32 {
        match self {
            PivotTable::Fresh(p) => p.cache_id,
            PivotTable::Loaded(p) => p.cache_id,
        }
    }

    /// 1-based position of the table in the workbook collection
    pub fn table_number(&self) -> u32 {
        match self {
            PivotTable::Fresh(p) => p.table_number,
            PivotTable::Loaded(p) => p.table_number,
        }
    }

    /// Row axis fields, as indices into [`Self::cache_fields`]
    pub fn rows(&self) -> &[usize] {
        match self {
            PivotTable::Fresh(p) => &p.rows,
            PivotTable::Loaded(p) => &p.rows,
        }
    }

    /// Column axis fields, as indices into [`Self::cache_fields`]
    pub fn columns(&self) -> &[usize] {
        match self {
            PivotTable::Fresh(p) => &p.columns,
            PivotTable::Loaded(p) => &p.columns,
        }
    }

    /// Value fields, as indices into [`Self::cache_fields`]
    pub fn values(&self) -> &[usize] {
        match self {
            PivotTable::Fresh(p) => &p.values,
            PivotTable::Loaded(p) => &p.values,
        }
    }

    /// Aggregation metric
    pub fn metric(&self) -> Metric {
        match self {
            PivotTable::Fresh(p) => p.metric,
            PivotTable::Loaded(p) => p.metric,
        }
    }

    /// One cache field per source column, in column order
    pub fn cache_fields(&self) -> &[CacheField] {
        match self {
            PivotTable::Fresh(p) => &p.cache_fields,
            PivotTable::Loaded(p) => &p.cache_fields,
        }
    }

    /// The loaded variant, when this table came from an archive
    pub fn as_loaded(&self) -> Option<&LoadedPivot> {
        match self {
            PivotTable::Loaded(p) => Some(p),
            PivotTable::Fresh(_) => None,
        }
    }

    /// The fresh variant, when this table was built in memory
    pub fn as_fresh(&self) -> Option<&FreshPivot> {
        match self {
            PivotTable::Fresh(p) => Some(p),
            PivotTable::Loaded(_) => None,
        }
    }
}
