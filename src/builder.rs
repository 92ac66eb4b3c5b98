//! Pivot-table request validation and cache-field construction.
//!
//! All validation runs eagerly, in a fixed order, before anything is built;
//! the first violated rule wins and nothing partial escapes.

use std::fmt;

use crate::pivot::{CacheField, Metric};
use crate::source::Source;

/// An enum for pivot-table build errors.
///
/// Every variant is raised synchronously by [`crate::Workbook::add_pivot_table`]
/// before any part is written; a failed call leaves the workbook's
/// pivot-table collection untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Both or neither of the sheet/table source were given
    Configuration,
    /// The table source has no header or no data rows
    EmptySource(String),
    /// Two table columns share a name
    DuplicateColumn {
        /// Table display name
        table: String,
        /// Offending column name
        column: String,
    },
    /// A requested field name is absent from the source header row
    UnknownField {
        /// Requested field name
        field: String,
        /// Source display name
        source: String,
    },
    /// The request has no row fields
    NoRowFields,
    /// The request has no value fields
    NoValueFields,
    /// Column fields combined with more than one value field
    MultiValueWithColumns,
    /// Metric outside `sum`/`count`
    UnsupportedMetric(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Configuration => {
                write!(f, "Exactly one of source sheet or source table required")
            }
            BuildError::EmptySource(t) => write!(f, "Table '{t}' has no data rows"),
            BuildError::DuplicateColumn { table, column } => {
                write!(f, "Table '{table}' has duplicate column '{column}'")
            }
            BuildError::UnknownField { field, source } => {
                write!(f, "Field '{field}' not found in source '{source}'")
            }
            BuildError::NoRowFields => write!(f, "At least one row field required"),
            BuildError::NoValueFields => write!(f, "At least one value field required"),
            BuildError::MultiValueWithColumns => {
                write!(f, "Multiple value fields cannot be combined with column fields")
            }
            BuildError::UnsupportedMetric(m) => {
                write!(f, "Unsupported metric '{m}', expected 'sum' or 'count'")
            }
        }
    }
}

impl std::error::Error for BuildError {}

/// A pivot-table request, built up field by field.
///
/// Field names are header labels; they are resolved against the source's
/// header row exactly once, when the request is added to a workbook.
#[derive(Debug, Clone)]
pub struct PivotTableRequest {
    pub(crate) source_sheet: Option<String>,
    pub(crate) source_table: Option<String>,
    pub(crate) rows: Vec<String>,
    pub(crate) columns: Vec<String>,
    pub(crate) values: Vec<String>,
    pub(crate) metric: Metric,
    pub(crate) apply_width_height_formats: bool,
}

impl Default for PivotTableRequest {
    fn default() -> Self {
        PivotTableRequest {
            source_sheet: None,
            source_table: None,
            rows: Vec::new(),
            columns: Vec::new(),
            values: Vec::new(),
            metric: Metric::Sum,
            apply_width_height_formats: true,
        }
    }
}

impl PivotTableRequest {
    /// Creates an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a worksheet as the source (mutually exclusive with a table)
    pub fn source_sheet(mut self, name: impl Into<String>) -> Self {
        self.source_sheet = Some(name.into());
        self
    }

    /// Use a table as the source (mutually exclusive with a sheet)
    pub fn source_table(mut self, name: impl Into<String>) -> Self {
        self.source_table = Some(name.into());
        self
    }

    /// Row axis field names, outermost first
    pub fn rows<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows = names.into_iter().map(Into::into).collect();
        self
    }

    /// Column axis field names (may be empty)
    pub fn columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = names.into_iter().map(Into::into).collect();
        self
    }

    /// Value field names (at least one required)
    pub fn values<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = names.into_iter().map(Into::into).collect();
        self
    }

    /// Aggregation metric, `Sum` by default
    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// Whether the consuming application may adjust widths/heights
    pub fn apply_width_height_formats(mut self, apply: bool) -> Self {
        self.apply_width_height_formats = apply;
        self
    }
}

/// Which source a request names, once the exactly-one rule has been checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceRef<'a> {
    Sheet(&'a str),
    Table(&'a str),
}

pub(crate) fn resolve_source_ref(request: &PivotTableRequest) -> Result<SourceRef<'_>, BuildError> {
    match (&request.source_sheet, &request.source_table) {
        (Some(sheet), None) => Ok(SourceRef::Sheet(sheet)),
        (None, Some(table)) => Ok(SourceRef::Table(table)),
        _ => Err(BuildError::Configuration),
    }
}

/// Field name lists resolved to indices into the source header row
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedFields {
    pub rows: Vec<usize>,
    pub columns: Vec<usize>,
    pub values: Vec<usize>,
}

/// Validates the request shape against the source and resolves every field
/// name to its header index.
pub(crate) fn validate(
    request: &PivotTableRequest,
    source: &Source,
) -> Result<ResolvedFields, BuildError> {
    let header = source.header_row();
    let lookup = |name: &String| -> Result<usize, BuildError> {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| BuildError::UnknownField {
                field: name.clone(),
                source: source.name().to_string(),
            })
    };

    let rows = request.rows.iter().map(lookup).collect::<Result<Vec<_>, _>>()?;
    let columns = request
        .columns
        .iter()
        .map(lookup)
        .collect::<Result<Vec<_>, _>>()?;
    let values = request
        .values
        .iter()
        .map(lookup)
        .collect::<Result<Vec<_>, _>>()?;

    if rows.is_empty() {
        return Err(BuildError::NoRowFields);
    }
    if values.is_empty() {
        return Err(BuildError::NoValueFields);
    }
    if !columns.is_empty() && values.len() > 1 {
        return Err(BuildError::MultiValueWithColumns);
    }

    Ok(ResolvedFields {
        rows,
        columns,
        values,
    })
}

/// Builds one cache field per source column, in column order.
///
/// Axis fields (row or column) get a deduplicated, sorted dictionary of
/// their distinct non-empty values; value-only fields carry no dictionary.
/// This is a full O(rows x axis-fields) pass over the source.
pub(crate) fn build_cache_fields(
    source: &Source,
    resolved: &ResolvedFields,
) -> Vec<CacheField> {
    let row_count = source.row_count();
    source
        .header_row()
        .iter()
        .enumerate()
        .map(|(col, name)| {
            let is_axis = resolved.rows.contains(&col) || resolved.columns.contains(&col);
            let shared_items = is_axis.then(|| {
                let mut items: Vec<_> = (0..row_count)
                    .map(|row| source.value_at(row, col))
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .collect();
                items.sort_by(|a, b| a.total_cmp(b));
                items.dedup();
                items
            });
            CacheField {
                name: name.clone(),
                shared_items,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SheetSource;
    use crate::{Data, Range};

    fn source() -> Source {
        Source::Sheet(SheetSource::new(
            "Sheet1",
            Range::from_rows(vec![
                vec![Data::from("A"), Data::from("B"), Data::from("C")],
                vec![Data::from("a1"), Data::from("b1"), Data::Int(1)],
                vec![Data::from("a1"), Data::from("b2"), Data::Int(2)],
                vec![Data::from("a2"), Data::from("b1"), Data::Int(3)],
            ]),
        ))
    }

    #[test]
    fn both_sources_is_a_configuration_error() {
        // even when every other field is also invalid
        let request = PivotTableRequest::new()
            .source_sheet("Sheet1")
            .source_table("Orders")
            .values(["Nope"]);
        assert_eq!(
            resolve_source_ref(&request).unwrap_err(),
            BuildError::Configuration
        );
        assert_eq!(
            resolve_source_ref(&PivotTableRequest::new()).unwrap_err(),
            BuildError::Configuration
        );
    }

    #[test]
    fn unknown_field_names_the_field_and_source() {
        let request = PivotTableRequest::new().rows(["Z"]).values(["C"]);
        assert_eq!(
            validate(&request, &source()).unwrap_err(),
            BuildError::UnknownField {
                field: "Z".into(),
                source: "Sheet1".into(),
            }
        );
    }

    #[test]
    fn rows_and_values_are_required() {
        let request = PivotTableRequest::new().values(["C"]);
        assert_eq!(validate(&request, &source()).unwrap_err(), BuildError::NoRowFields);
        let request = PivotTableRequest::new().rows(["A"]);
        assert_eq!(
            validate(&request, &source()).unwrap_err(),
            BuildError::NoValueFields
        );
    }

    #[test]
    fn multi_value_is_exclusive_with_columns() {
        let request = PivotTableRequest::new().rows(["A"]).values(["B", "C"]);
        assert!(validate(&request, &source()).is_ok());
        let request = PivotTableRequest::new()
            .rows(["A"])
            .columns(["B"])
            .values(["B", "C"]);
        assert_eq!(
            validate(&request, &source()).unwrap_err(),
            BuildError::MultiValueWithColumns
        );
    }

    #[test]
    fn shared_items_are_sorted_distinct_and_axis_only() {
        let request = PivotTableRequest::new().rows(["A", "B"]).values(["C"]);
        let source = source();
        let resolved = validate(&request, &source).unwrap();
        let fields = build_cache_fields(&source, &resolved);
        assert_eq!(fields.len(), 3);
        assert_eq!(
            fields[0].shared_items.as_deref(),
            Some(&[Data::from("a1"), Data::from("a2")][..])
        );
        assert_eq!(
            fields[1].shared_items.as_deref(),
            Some(&[Data::from("b1"), Data::from("b2")][..])
        );
        assert_eq!(fields[2].shared_items, None);
    }

    #[test]
    fn empty_values_are_excluded_from_the_dictionary() {
        let source = Source::Sheet(SheetSource::new(
            "Sheet1",
            Range::from_rows(vec![
                vec![Data::from("A"), Data::from("B")],
                vec![Data::from("a1"), Data::Int(1)],
                vec![Data::Empty, Data::Int(2)],
                vec![Data::from("a2"), Data::Int(3)],
            ]),
        ));
        let request = PivotTableRequest::new().rows(["A"]).values(["B"]);
        let resolved = validate(&request, &source).unwrap();
        let fields = build_cache_fields(&source, &resolved);
        assert_eq!(
            fields[0].shared_items.as_deref(),
            Some(&[Data::from("a1"), Data::from("a2")][..])
        );
    }
}
