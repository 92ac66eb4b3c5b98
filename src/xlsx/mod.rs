//! Xlsx workbook access: zip traversal, part codecs and the pivot-table
//! collection.
//!
//! [`Workbook`] reads just enough of an archive to serve as a pivot-table
//! host: sheet and table registries, shared strings, a minimal worksheet
//! value reader, plus the `pivotCaches` registry of `workbook.xml`.
//! Loading pivot tables is a two-phase pass: every pivot part found in the
//! archive is parsed into per-path maps first, then [`reconcile`] joins
//! them through integer cache ids so that zip entry order never matters.

pub mod cache;
mod pivot_parser;
mod reconcile;
mod render;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;
use std::str::FromStr;

use log::warn;
use quick_xml::{
    events::{
        attributes::{Attribute, Attributes},
        Event,
    },
    name::QName,
    Reader as XmlReader,
};
use zip::read::{ZipArchive, ZipFile};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::builder::{
    build_cache_fields, resolve_source_ref, validate, BuildError, PivotTableRequest, SourceRef,
};
use crate::pivot::{FreshPivot, PivotTable, CACHE_ID_BASE};
use crate::source::{SheetSource, Source, Table, TableSource};
use crate::{CellErrorType, Data, Dimensions, Error, Range};
use reconcile::{part_number, ArchiveParts};

pub(crate) type XlReader<'a, RS> = XmlReader<BufReader<ZipFile<'a, RS>>>;

/// Maximum number of rows allowed in an xlsx file
pub const MAX_ROWS: u32 = 1_048_576;

/// Maximum number of columns allowed in an xlsx file
pub const MAX_COLUMNS: u32 = 16_384;

pub(crate) const XML_HEADER: &str =
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
pub(crate) const SPREADSHEET_NS: &str =
    "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
pub(crate) const RELS_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// An enum for Xlsx specific errors
#[derive(Debug)]
pub enum XlsxError {
    /// Io error
    Io(std::io::Error),
    /// Zip error
    Zip(zip::result::ZipError),
    /// Xml error
    Xml(quick_xml::Error),
    /// Xml attribute error
    XmlAttr(quick_xml::events::attributes::AttrError),
    /// XML Encoding error
    Encoding(quick_xml::encoding::EncodingError),
    /// `ParseInt` error
    ParseInt(std::num::ParseIntError),
    /// Formatting error while rendering a part
    Fmt(std::fmt::Error),
    /// Unexpected end of xml
    XmlEof(&'static str),
    /// File not found
    FileNotFound(String),
    /// Relationship not found
    RelationshipNotFound,
    /// Expecting alphanumeric character
    Alphanumeric(u8),
    /// Numeric column
    NumericColumn(u8),
    /// Wrong dimension count
    DimensionCount(usize),
    /// There is no column component in the range string
    RangeWithoutColumnComponent,
    /// There is no row component in the range string
    RangeWithoutRowComponent,
    /// Cell error
    CellError(String),
    /// Worksheet not found
    WorksheetNotFound(String),
    /// Table not found
    TableNotFound(String),
    /// Unexpected error
    Unexpected(&'static str),
}

from_err!(std::io::Error, XlsxError, Io);
from_err!(zip::result::ZipError, XlsxError, Zip);
from_err!(quick_xml::Error, XlsxError, Xml);
from_err!(quick_xml::events::attributes::AttrError, XlsxError, XmlAttr);
from_err!(quick_xml::encoding::EncodingError, XlsxError, Encoding);
from_err!(std::num::ParseIntError, XlsxError, ParseInt);
from_err!(std::fmt::Error, XlsxError, Fmt);

impl std::fmt::Display for XlsxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XlsxError::Io(e) => write!(f, "I/O error: {e}"),
            XlsxError::Zip(e) => write!(f, "Zip error: {e}"),
            XlsxError::Xml(e) => write!(f, "Xml error: {e}"),
            XlsxError::XmlAttr(e) => write!(f, "Xml attribute error: {e}"),
            XlsxError::Encoding(e) => write!(f, "XML encoding error: {e}"),
            XlsxError::ParseInt(e) => write!(f, "Parse integer error: {e}"),
            XlsxError::Fmt(e) => write!(f, "Formatting error: {e}"),
            XlsxError::XmlEof(e) => write!(f, "Unexpected end of xml, expecting '</{e}>'"),
            XlsxError::FileNotFound(e) => write!(f, "File not found '{e}'"),
            XlsxError::RelationshipNotFound => write!(f, "Relationship not found"),
            XlsxError::Alphanumeric(e) => {
                write!(f, "Expecting alphanumeric character, got {e:X}")
            }
            XlsxError::NumericColumn(e) => write!(
                f,
                "Numeric character is not allowed for column name, got {e}",
            ),
            XlsxError::DimensionCount(e) => {
                write!(f, "Range dimension must be lower than 2. Got {e}")
            }
            XlsxError::RangeWithoutColumnComponent => {
                write!(f, "Range is missing the expected column component.")
            }
            XlsxError::RangeWithoutRowComponent => {
                write!(f, "Range is missing the expected row component.")
            }
            XlsxError::CellError(e) => write!(f, "Unsupported cell error value '{e}'"),
            XlsxError::WorksheetNotFound(n) => write!(f, "Worksheet '{n}' not found"),
            XlsxError::TableNotFound(n) => write!(f, "Table '{n}' not found"),
            XlsxError::Unexpected(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for XlsxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            XlsxError::Io(e) => Some(e),
            XlsxError::Zip(e) => Some(e),
            XlsxError::Xml(e) => Some(e),
            XlsxError::XmlAttr(e) => Some(e),
            XlsxError::Encoding(e) => Some(e),
            XlsxError::ParseInt(e) => Some(e),
            XlsxError::Fmt(e) => Some(e),
            _ => None,
        }
    }
}

impl FromStr for CellErrorType {
    type Err = XlsxError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "#DIV/0!" => Ok(CellErrorType::Div0),
            "#N/A" => Ok(CellErrorType::NA),
            "#NAME?" => Ok(CellErrorType::Name),
            "#NULL!" => Ok(CellErrorType::Null),
            "#NUM!" => Ok(CellErrorType::Num),
            "#REF!" => Ok(CellErrorType::Ref),
            "#VALUE!" => Ok(CellErrorType::Value),
            _ => Err(XlsxError::CellError(s.into())),
        }
    }
}

/// Table registry entries: name, sheet, columns, bounds (header included)
type Tables = Option<Vec<(String, String, Vec<String>, Dimensions)>>;

/// An xlsx workbook opened as a pivot-table host
pub struct Workbook<RS> {
    zip: ZipArchive<RS>,
    /// Shared strings
    strings: Vec<String>,
    /// Sheets: name, part path
    sheets: Vec<(String, String)>,
    /// Tables: name, sheet, columns, bounds
    tables: Tables,
    /// `workbook.xml.rels`: relationship id to (target, type)
    relationships: BTreeMap<Vec<u8>, (String, String)>,
    /// `pivotCaches` registry of `workbook.xml`: relationship id, cache id
    cache_registry: Vec<(Vec<u8>, u32)>,
    /// Pivot tables in table-number order
    pivot_tables: Vec<PivotTable>,
    /// Loaded pivot part path to its position in `pivot_tables`
    pivot_index: BTreeMap<String, usize>,
}

impl Workbook<BufReader<File>> {
    /// Opens a workbook file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, XlsxError> {
        Workbook::new(BufReader::new(File::open(path)?))
    }
}

impl<RS: Read + Seek> Workbook<RS> {
    /// Opens a workbook from a reader over xlsx bytes.
    pub fn new(reader: RS) -> Result<Self, XlsxError> {
        let mut workbook = Workbook {
            zip: ZipArchive::new(reader)?,
            strings: Vec::new(),
            sheets: Vec::new(),
            tables: None,
            relationships: BTreeMap::new(),
            cache_registry: Vec::new(),
            pivot_tables: Vec::new(),
            pivot_index: BTreeMap::new(),
        };
        workbook.relationships = workbook.part_relationships("xl/workbook.xml")?;
        workbook.read_workbook()?;
        workbook.read_shared_strings()?;
        Ok(workbook)
    }

    /// Sheet names, workbook order.
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    /// All pivot tables, ordered by table number.
    pub fn pivot_tables(&self) -> &[PivotTable] {
        &self.pivot_tables
    }

    /// Looks a loaded pivot table up by its archive part path.
    pub fn pivot_table_at(&self, part_path: &str) -> Option<&PivotTable> {
        self.pivot_index
            .get(part_path)
            .map(|i| &self.pivot_tables[*i])
    }

    /// Reads the relationship part attached to `part_path`, empty when the
    /// part carries none.
    fn part_relationships(
        &mut self,
        part_path: &str,
    ) -> Result<BTreeMap<Vec<u8>, (String, String)>, XlsxError> {
        let (dir, file) = part_path
            .rsplit_once('/')
            .ok_or(XlsxError::Unexpected("part path without a folder"))?;
        let rels_path = format!("{dir}/_rels/{file}.rels");
        let mut relationships = BTreeMap::new();
        let mut xml = match xml_reader(&mut self.zip, &rels_path) {
            None => return Ok(relationships),
            Some(x) => x?,
        };
        let mut buf = Vec::with_capacity(64);
        loop {
            buf.clear();
            match xml.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"Relationship" => {
                    let mut id = Vec::new();
                    let mut target = String::new();
                    let mut rel_type = String::new();
                    for a in e.attributes() {
                        match a.map_err(XlsxError::XmlAttr)? {
                            Attribute {
                                key: QName(b"Id"),
                                value: v,
                            } => id.extend_from_slice(&v),
                            Attribute {
                                key: QName(b"Target"),
                                value: v,
                            } => target = xml.decoder().decode(&v)?.into_owned(),
                            Attribute {
                                key: QName(b"Type"),
                                value: v,
                            } => rel_type = xml.decoder().decode(&v)?.into_owned(),
                            _ => (),
                        }
                    }
                    relationships.insert(id, (target, rel_type));
                }
                Ok(Event::End(ref e)) if e.local_name().as_ref() == b"Relationships" => break,
                Ok(Event::Eof) => return Err(XlsxError::XmlEof("Relationships")),
                Err(e) => return Err(XlsxError::Xml(e)),
                _ => (),
            }
        }
        Ok(relationships)
    }

    /// Reads the sheet registry and the `pivotCaches` registry.
    fn read_workbook(&mut self) -> Result<(), XlsxError> {
        let relationships = std::mem::take(&mut self.relationships);
        let mut xml = match xml_reader(&mut self.zip, "xl/workbook.xml") {
            None => {
                self.relationships = relationships;
                return Ok(());
            }
            Some(x) => x?,
        };
        let mut buf = Vec::with_capacity(1024);
        loop {
            buf.clear();
            match xml.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"sheet" => {
                    let mut name = String::new();
                    let mut path = String::new();
                    for a in e.attributes() {
                        let a = a.map_err(XlsxError::XmlAttr)?;
                        match a {
                            Attribute {
                                key: QName(b"name"),
                                ..
                            } => {
                                name = a.decode_and_unescape_value(xml.decoder())?.to_string();
                            }
                            Attribute {
                                key: QName(b"r:id"),
                                value: v,
                            }
                            | Attribute {
                                key: QName(b"relationships:id"),
                                value: v,
                            } => {
                                let (target, _) = relationships
                                    .get(&*v)
                                    .ok_or(XlsxError::RelationshipNotFound)?;
                                path = resolve_part_path("xl", target);
                            }
                            _ => (),
                        }
                    }
                    self.sheets.push((name, path));
                }
                Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"pivotCache" => {
                    let mut cache_id = 0;
                    let mut r_id = Vec::new();
                    for a in e.attributes() {
                        let a = a.map_err(XlsxError::XmlAttr)?;
                        match a.key.local_name().as_ref() {
                            b"cacheId" => cache_id = atoi_simd::parse::<u32>(&a.value).unwrap_or(0),
                            b"id" => r_id.extend_from_slice(&a.value),
                            _ => (),
                        }
                    }
                    self.cache_registry.push((r_id, cache_id));
                }
                Ok(Event::End(ref e)) if e.local_name().as_ref() == b"workbook" => break,
                Ok(Event::Eof) => return Err(XlsxError::XmlEof("workbook")),
                Err(e) => return Err(XlsxError::Xml(e)),
                _ => (),
            }
        }
        self.relationships = relationships;
        Ok(())
    }

    fn read_shared_strings(&mut self) -> Result<(), XlsxError> {
        let mut xml = match xml_reader(&mut self.zip, "xl/sharedStrings.xml") {
            None => return Ok(()),
            Some(x) => x?,
        };
        let mut buf = Vec::with_capacity(1024);
        loop {
            buf.clear();
            match xml.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"si" => {
                    if let Some(s) = read_string(&mut xml, e.name())? {
                        self.strings.push(s);
                    }
                }
                Ok(Event::End(ref e)) if e.local_name().as_ref() == b"sst" => break,
                Ok(Event::Eof) => return Err(XlsxError::XmlEof("sst")),
                Err(e) => return Err(XlsxError::Xml(e)),
                _ => (),
            }
        }
        Ok(())
    }

    fn sheet_path(&self, name: &str) -> Result<&str, XlsxError> {
        self.sheets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, path)| path.as_str())
            .ok_or_else(|| XlsxError::WorksheetNotFound(name.to_string()))
    }

    /// Reads a worksheet's cells into a dense range.
    pub fn worksheet_range(&mut self, name: &str) -> Result<Range<Data>, XlsxError> {
        let path = self.sheet_path(name)?.to_string();
        let mut xml = match xml_reader(&mut self.zip, &path) {
            None => return Err(XlsxError::WorksheetNotFound(name.to_string())),
            Some(x) => x?,
        };
        let strings = &self.strings;
        let mut cells = Vec::new();
        let mut buf = Vec::with_capacity(1024);
        let mut row = 0u32;
        let mut col = 0u32;
        loop {
            buf.clear();
            match xml.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"row" => {
                    if let Some(r) = get_attribute(e.attributes(), QName(b"r"))? {
                        row = atoi_simd::parse::<u32>(r).unwrap_or(row + 1).saturating_sub(1);
                    }
                    col = 0;
                }
                Ok(Event::End(ref e)) if e.local_name().as_ref() == b"row" => row += 1,
                Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"c" => {
                    let pos = match get_attribute(e.attributes(), QName(b"r"))? {
                        Some(r) => get_row_column(r)?,
                        None => (row, col),
                    };
                    let typ = get_attribute(e.attributes(), QName(b"t"))?
                        .map(<[u8]>::to_vec)
                        .unwrap_or_default();
                    col = pos.1 + 1;
                    if let Some(value) = read_cell_value(&mut xml, &typ, strings)? {
                        if !value.is_empty() {
                            cells.push((pos, value));
                        }
                    }
                }
                Ok(Event::End(ref e)) if e.local_name().as_ref() == b"sheetData" => break,
                Ok(Event::Eof) => return Err(XlsxError::XmlEof("worksheet")),
                Err(e) => return Err(XlsxError::Xml(e)),
                _ => (),
            }
        }
        Ok(Range::from_cells(cells))
    }

    // sheets must be known before tables are resolved
    fn read_table_metadata(&mut self) -> Result<(), XlsxError> {
        let mut new_tables = Vec::new();
        let sheets = self.sheets.clone();
        for (sheet_name, sheet_path) in &sheets {
            let dir = sheet_path
                .rsplit_once('/')
                .map(|(d, _)| d.to_string())
                .unwrap_or_else(|| "xl".to_string());
            let table_parts: Vec<String> = self
                .part_relationships(sheet_path)?
                .into_values()
                .filter(|(_, rel_type)| rel_type.ends_with("/table"))
                .map(|(target, _)| resolve_part_path(&dir, &target))
                .collect();
            for table_part in table_parts {
                let mut xml = match xml_reader(&mut self.zip, &table_part) {
                    None => continue,
                    Some(x) => x?,
                };
                let mut display_name = String::new();
                let mut ref_cells = String::new();
                let mut header_row_count = 1u32;
                let mut totals_row_count = 0u32;
                let mut column_names = Vec::new();
                let mut buf = Vec::with_capacity(256);
                loop {
                    buf.clear();
                    match xml.read_event_into(&mut buf) {
                        Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"table" => {
                            for a in e.attributes() {
                                match a.map_err(XlsxError::XmlAttr)? {
                                    Attribute {
                                        key: QName(b"displayName"),
                                        value: v,
                                    } => display_name = xml.decoder().decode(&v)?.into_owned(),
                                    Attribute {
                                        key: QName(b"ref"),
                                        value: v,
                                    } => ref_cells = xml.decoder().decode(&v)?.into_owned(),
                                    Attribute {
                                        key: QName(b"headerRowCount"),
                                        value: v,
                                    } => header_row_count = xml.decoder().decode(&v)?.parse()?,
                                    Attribute {
                                        key: QName(b"totalsRowCount"),
                                        value: v,
                                    } => totals_row_count = xml.decoder().decode(&v)?.parse()?,
                                    _ => (),
                                }
                            }
                        }
                        Ok(Event::Start(ref e))
                            if e.local_name().as_ref() == b"tableColumn" =>
                        {
                            for a in e.attributes().flatten() {
                                if let Attribute {
                                    key: QName(b"name"),
                                    value: v,
                                } = a
                                {
                                    column_names.push(xml.decoder().decode(&v)?.into_owned());
                                }
                            }
                        }
                        Ok(Event::End(ref e)) if e.local_name().as_ref() == b"table" => break,
                        Ok(Event::Eof) => return Err(XlsxError::XmlEof("table")),
                        Err(e) => return Err(XlsxError::Xml(e)),
                        _ => (),
                    }
                }
                let mut dims = get_dimension(ref_cells.as_bytes())?;
                // keep the header row inside the bounds, drop totals rows
                if header_row_count == 0 {
                    warn!("table {display_name} has no header row");
                }
                if totals_row_count != 0 {
                    dims.end.0 -= totals_row_count;
                }
                new_tables.push((display_name, sheet_name.clone(), column_names, dims));
            }
        }
        self.tables = Some(new_tables);
        Ok(())
    }

    /// Resolves a table by display name, cells included.
    pub fn table_by_name(&mut self, name: &str) -> Result<Table, XlsxError> {
        if self.tables.is_none() {
            self.read_table_metadata()?;
        }
        let (table_name, sheet_name, columns, dims) = self
            .tables
            .as_ref()
            .and_then(|tables| tables.iter().find(|(n, ..)| n == name))
            .ok_or_else(|| XlsxError::TableNotFound(name.to_string()))?
            .clone();
        let range = self.worksheet_range(&sheet_name)?;
        Ok(Table::new(table_name, sheet_name, columns, dims, range))
    }

    /// Builds a pivot table from `request` and appends it to the workbook.
    ///
    /// The new table gets the next free table number; its cache id is the
    /// table number projected into the workbook cache-id space, so the
    /// tables of one workbook occupy a dense id block.
    pub fn add_pivot_table(
        &mut self,
        request: PivotTableRequest,
    ) -> Result<&PivotTable, Error> {
        let source = match resolve_source_ref(&request)? {
            SourceRef::Sheet(name) => {
                let range = self.worksheet_range(name)?;
                if range.is_empty() || range.height() < 2 {
                    return Err(BuildError::EmptySource(name.to_string()).into());
                }
                Source::Sheet(SheetSource::new(name, range))
            }
            SourceRef::Table(name) => {
                let table = self.table_by_name(name)?;
                Source::Table(TableSource::new(table)?)
            }
        };
        let resolved = validate(&request, &source)?;
        let cache_fields = build_cache_fields(&source, &resolved);
        let table_number = self.pivot_tables.len() as u32 + 1;
        self.pivot_tables.push(PivotTable::Fresh(FreshPivot {
            name: format!("PivotTable{table_number}"),
            source,
            rows: resolved.rows,
            columns: resolved.columns,
            values: resolved.values,
            metric: request.metric,
            cache_fields,
            cache_id: CACHE_ID_BASE + table_number - 1,
            table_number,
            apply_width_height_formats: request.apply_width_height_formats,
        }));
        self.pivot_tables
            .last()
            .ok_or(Error::Msg("pivot table was not appended"))
    }

    /// Loads every pivot table of the archive.
    ///
    /// Phase one streams each pivot part into its own map, phase two links
    /// parts through the workbook's cache registry. Replaces the current
    /// pivot-table collection. A workbook without pivot parts loads an
    /// empty collection.
    pub fn load_pivot_tables(&mut self) -> Result<(), XlsxError> {
        let mut parts = ArchiveParts::default();
        let names: Vec<String> = self.zip.file_names().map(str::to_string).collect();
        for name in names {
            if name.starts_with("xl/pivotTables/")
                && part_number(&name, "pivotTable").is_some()
            {
                let mut xml = match xml_reader(&mut self.zip, &name) {
                    None => continue,
                    Some(x) => x?,
                };
                let parsed = pivot_parser::read_pivot_table(&mut xml)?;
                parts.pivot_tables.insert(name, parsed);
            } else if part_number(&name, "pivotCacheDefinition").is_some() {
                let mut xml = match xml_reader(&mut self.zip, &name) {
                    None => continue,
                    Some(x) => x?,
                };
                let definition = cache::read_definition(&mut xml)?;
                parts.cache_definitions.insert(name, definition);
            } else if part_number(&name, "pivotCacheRecords").is_some() {
                let mut xml = match xml_reader(&mut self.zip, &name) {
                    None => continue,
                    Some(x) => x?,
                };
                let records = cache::read_records(&mut xml)?;
                parts.cache_records.insert(name, records);
            }
        }
        let (tables, index) =
            reconcile::reconcile(parts, &self.cache_registry, &self.relationships);
        self.pivot_tables = tables;
        self.pivot_index = index;
        Ok(())
    }

    /// Pivot tables anchored on a worksheet, through the sheet's
    /// relationship part. Only loaded tables can be resolved this way.
    pub fn pivot_tables_in_sheet(
        &mut self,
        sheet_name: &str,
    ) -> Result<Vec<&PivotTable>, XlsxError> {
        let path = self.sheet_path(sheet_name)?.to_string();
        let dir = path
            .rsplit_once('/')
            .map(|(d, _)| d.to_string())
            .unwrap_or_else(|| "xl".to_string());
        let mut part_paths: Vec<String> = self
            .part_relationships(&path)?
            .into_values()
            .filter(|(_, rel_type)| rel_type.ends_with("/pivotTable"))
            .map(|(target, _)| resolve_part_path(&dir, &target))
            .collect();
        // numeric order, so pivotTable10 follows pivotTable2
        part_paths.sort_by_key(|p| part_number(p, "pivotTable").unwrap_or(0));
        Ok(part_paths
            .iter()
            .filter_map(|p| self.pivot_index.get(p))
            .map(|i| &self.pivot_tables[*i])
            .collect())
    }

    /// Writes the pivot parts of every table into an open zip writer.
    ///
    /// Each table contributes its definition part, two relationship parts
    /// and the cache definition/records pair. Workbook-level wiring (the
    /// `pivotCaches` element and its relationships) stays with the caller.
    pub fn write_pivot_parts<W: Write + Seek>(
        &self,
        writer: &mut ZipWriter<W>,
    ) -> Result<(), Error> {
        let options = SimpleFileOptions::default();
        for table in &self.pivot_tables {
            let n = table.table_number();
            let part_path = match table {
                PivotTable::Fresh(_) => format!("xl/pivotTables/pivotTable{n}.xml"),
                PivotTable::Loaded(p) => p.part_path().to_string(),
            };
            let xml = render::render_pivot_table(table)?;
            start_part(writer, &part_path, options)?;
            writer.write_all(xml.as_bytes())?;

            let (dir, file) = part_path
                .rsplit_once('/')
                .ok_or(Error::Msg("pivot part path without a folder"))?;
            start_part(writer, &format!("{dir}/_rels/{file}.rels"), options)?;
            writer.write_all(render::pivot_table_rels(n).as_bytes())?;

            let payload = match table {
                PivotTable::Fresh(p) => Some(cache::build_cache_payload(p)?),
                PivotTable::Loaded(p) => p
                    .cache_definition()
                    .map(|d| (d.clone(), p.cache_records().cloned().unwrap_or_default())),
            };
            let Some((definition, records)) = payload else {
                warn!(
                    "pivot table {} has no cache payload, skipping its cache parts",
                    table.name()
                );
                continue;
            };
            let def_xml = cache::render_definition(&definition, records.records.len())?;
            start_part(
                writer,
                &format!("xl/pivotCache/pivotCacheDefinition{n}.xml"),
                options,
            )?;
            writer.write_all(def_xml.as_bytes())?;

            start_part(
                writer,
                &format!("xl/pivotCache/_rels/pivotCacheDefinition{n}.xml.rels"),
                options,
            )?;
            writer.write_all(render::cache_definition_rels(n).as_bytes())?;

            let rec_xml = cache::render_records(&records)?;
            start_part(
                writer,
                &format!("xl/pivotCache/pivotCacheRecords{n}.xml"),
                options,
            )?;
            writer.write_all(rec_xml.as_bytes())?;
        }
        Ok(())
    }
}

fn start_part<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    path: &str,
    options: SimpleFileOptions,
) -> Result<(), Error> {
    writer
        .start_file(path, options)
        .map_err(XlsxError::Zip)
        .map_err(Error::Xlsx)
}

/// Reads the children of a `c` element into a cell value.
fn read_cell_value<B: std::io::BufRead>(
    xml: &mut XmlReader<B>,
    typ: &[u8],
    strings: &[String],
) -> Result<Option<Data>, XlsxError> {
    let mut raw: Option<String> = None;
    let mut inline: Option<String> = None;
    let mut buf = Vec::with_capacity(128);
    let mut val_buf = Vec::new();
    loop {
        buf.clear();
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"v" => {
                val_buf.clear();
                let mut value = String::new();
                loop {
                    match xml.read_event_into(&mut val_buf)? {
                        Event::Text(t) => value.push_str(&t.decode()?),
                        Event::End(end) if end.name() == e.name() => break,
                        Event::Eof => return Err(XlsxError::XmlEof("v")),
                        _ => (),
                    }
                }
                raw = Some(value);
            }
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"is" => {
                inline = read_string(xml, e.name())?;
            }
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"c" => break,
            Ok(Event::Eof) => return Err(XlsxError::XmlEof("c")),
            Err(e) => return Err(XlsxError::Xml(e)),
            _ => (),
        }
    }
    if typ == b"inlineStr" {
        return Ok(inline.map(Data::String));
    }
    let Some(raw) = raw else { return Ok(None) };
    let data = match typ {
        b"s" => {
            let idx = atoi_simd::parse::<u32>(raw.as_bytes()).unwrap_or(0) as usize;
            strings.get(idx).cloned().map(Data::String).unwrap_or_default()
        }
        b"str" => Data::String(raw),
        b"b" => Data::Bool(matches!(raw.as_str(), "1" | "true")),
        b"e" => Data::Error(raw.parse().unwrap_or(CellErrorType::Value)),
        _ => parse_number(raw.as_bytes()),
    };
    Ok(Some(data))
}

/// Numeric cell/item text: an integer unless the text carries a decimal
/// point or an exponent.
pub(crate) fn parse_number(v: &[u8]) -> Data {
    if v.contains(&b'.') || v.contains(&b'e') || v.contains(&b'E') {
        Data::Float(fast_float2::parse(v).unwrap_or(0.0))
    } else {
        match atoi_simd::parse::<i64>(v) {
            Ok(i) => Data::Int(i),
            Err(_) => Data::Float(fast_float2::parse(v).unwrap_or(0.0)),
        }
    }
}

fn xml_reader<'a, RS: Read + Seek>(
    zip: &'a mut ZipArchive<RS>,
    path: &str,
) -> Option<Result<XlReader<'a, RS>, XlsxError>> {
    let actual_path = zip
        .file_names()
        .find(|n| n.eq_ignore_ascii_case(path))?
        .to_owned();
    match zip.by_name(&actual_path) {
        Ok(f) => {
            let mut r = XmlReader::from_reader(BufReader::new(f));
            let config = r.config_mut();
            config.check_end_names = false;
            config.trim_text(false);
            config.check_comments = false;
            config.expand_empty_elements = true;
            Some(Ok(r))
        }
        Err(ZipError::FileNotFound) => None,
        Err(e) => Some(Err(e.into())),
    }
}

/// search through an Element's attributes for the named one
pub(crate) fn get_attribute<'a>(
    atts: Attributes<'a>,
    n: QName,
) -> Result<Option<&'a [u8]>, XlsxError> {
    for a in atts {
        match a {
            Ok(Attribute {
                key,
                value: Cow::Borrowed(value),
            }) if key == n => return Ok(Some(value)),
            Err(e) => return Err(XlsxError::XmlAttr(e)),
            _ => {} // ignore other attributes
        }
    }
    Ok(None)
}

/// converts a text representation (e.g. "A6:G67") of a dimension into integers
/// - top left (row, column),
/// - bottom right (row, column)
pub(crate) fn get_dimension(dimension: &[u8]) -> Result<Dimensions, XlsxError> {
    let parts: Vec<_> = dimension
        .split(|c| *c == b':')
        .map(get_row_column)
        .collect::<Result<Vec<_>, XlsxError>>()?;

    match parts.len() {
        0 => Err(XlsxError::DimensionCount(0)),
        1 => Ok(Dimensions {
            start: parts[0],
            end: parts[0],
        }),
        2 => {
            if parts[1].0 < parts[0].0 || parts[1].1 < parts[0].1 {
                return Err(XlsxError::Unexpected("range end is before its start"));
            }
            let rows = parts[1].0 - parts[0].0;
            let columns = parts[1].1 - parts[0].1;
            if rows > MAX_ROWS {
                warn!("xlsx has more than maximum number of rows ({rows} > {MAX_ROWS})");
            }
            if columns > MAX_COLUMNS {
                warn!("xlsx has more than maximum number of columns ({columns} > {MAX_COLUMNS})");
            }
            Ok(Dimensions {
                start: parts[0],
                end: parts[1],
            })
        }
        len => Err(XlsxError::DimensionCount(len)),
    }
}

/// Converts a text range name into its position (row, column) (0 based index).
/// If the row or column component in the range is missing, an Error is returned.
pub(crate) fn get_row_column(range: &[u8]) -> Result<(u32, u32), XlsxError> {
    let (row, col) = get_row_and_optional_column(range)?;
    let col = col.ok_or(XlsxError::RangeWithoutColumnComponent)?;
    Ok((row, col))
}

/// Converts a text range name into its position (row, column) (0 based index).
/// If the row component in the range is missing, an Error is returned.
/// If the column component in the range is missing, an None is returned for the column.
fn get_row_and_optional_column(range: &[u8]) -> Result<(u32, Option<u32>), XlsxError> {
    let (mut row, mut col) = (0, 0);
    let mut pow = 1;
    let mut readrow = true;
    for c in range.iter().rev() {
        match *c {
            c @ b'0'..=b'9' => {
                if readrow {
                    row += ((c - b'0') as u32) * pow;
                    pow *= 10;
                } else {
                    return Err(XlsxError::NumericColumn(c));
                }
            }
            c @ b'A'..=b'Z' => {
                if readrow {
                    if row == 0 {
                        return Err(XlsxError::RangeWithoutRowComponent);
                    }
                    pow = 1;
                    readrow = false;
                }
                col += ((c - b'A') as u32 + 1) * pow;
                pow *= 26;
            }
            c @ b'a'..=b'z' => {
                if readrow {
                    if row == 0 {
                        return Err(XlsxError::RangeWithoutRowComponent);
                    }
                    pow = 1;
                    readrow = false;
                }
                col += ((c - b'a') as u32 + 1) * pow;
                pow *= 26;
            }
            _ => return Err(XlsxError::Alphanumeric(*c)),
        }
    }
    let row = row
        .checked_sub(1)
        .ok_or(XlsxError::RangeWithoutRowComponent)?;
    Ok((row, col.checked_sub(1)))
}

/// attempts to read either a simple or richtext string
pub(crate) fn read_string<B: std::io::BufRead>(
    xml: &mut XmlReader<B>,
    closing: QName,
) -> Result<Option<String>, XlsxError> {
    let mut buf = Vec::with_capacity(1024);
    let mut val_buf = Vec::with_capacity(1024);
    let mut rich_buffer: Option<String> = None;
    let mut is_phonetic_text = false;
    loop {
        buf.clear();
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"r" => {
                if rich_buffer.is_none() {
                    // use a buffer since richtext has multiples <r> and <t> for the same cell
                    rich_buffer = Some(String::new());
                }
            }
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"rPh" => {
                is_phonetic_text = true;
            }
            Ok(Event::End(ref e)) if e.name() == closing => {
                return Ok(rich_buffer);
            }
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"rPh" => {
                is_phonetic_text = false;
            }
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"t" && !is_phonetic_text => {
                val_buf.clear();
                let mut value = String::new();
                loop {
                    match xml.read_event_into(&mut val_buf)? {
                        Event::Text(t) => value.push_str(&t.decode()?),
                        Event::End(end) if end.name() == e.name() => break,
                        Event::Eof => return Err(XlsxError::XmlEof("t")),
                        _ => (),
                    }
                }
                if let Some(ref mut s) = rich_buffer {
                    s.push_str(&value);
                } else {
                    // consume any remaining events up to expected closing tag
                    xml.read_to_end_into(closing, &mut val_buf)?;
                    return Ok(Some(value));
                }
            }
            Ok(Event::Eof) => return Err(XlsxError::XmlEof("")),
            Err(e) => return Err(XlsxError::Xml(e)),
            _ => (),
        }
    }
}

/// Resolves a relationship target against the directory of its source part.
pub(crate) fn resolve_part_path(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut dir: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    let mut target = target;
    while let Some(rest) = target.strip_prefix("../") {
        dir.pop();
        target = rest;
    }
    if dir.is_empty() {
        target.to_string()
    } else {
        format!("{}/{}", dir.join("/"), target)
    }
}

/// Convert the integer to Excelsheet column title.
/// If the column number not in 1~16384, an Error is returned.
pub(crate) fn column_number_to_name(num: u32) -> Result<Vec<u8>, XlsxError> {
    if num >= MAX_COLUMNS {
        return Err(XlsxError::Unexpected("column number overflow"));
    }
    let mut col: Vec<u8> = Vec::new();
    let mut num = num + 1;
    while num > 0 {
        let integer = ((num - 1) % 26 + 65) as u8;
        col.push(integer);
        num = (num - 1) / 26;
    }
    col.reverse();
    Ok(col)
}

/// Convert a cell coordinate to Excelsheet cell name.
/// If the column number not in 1~16384, an Error is returned.
pub(crate) fn coordinate_to_name(cell: (u32, u32)) -> Result<Vec<u8>, XlsxError> {
    let cell = &[
        column_number_to_name(cell.1)?,
        (cell.0 + 1).to_string().into_bytes(),
    ];
    Ok(cell.concat())
}

/// Renders a dimension as an `A1:B9` style range reference.
pub(crate) fn range_ref(dims: Dimensions) -> Result<String, XlsxError> {
    let start = coordinate_to_name(dims.start)?;
    let end = coordinate_to_name(dims.end)?;
    let mut reference = String::with_capacity(start.len() + end.len() + 1);
    reference.push_str(std::str::from_utf8(&start).map_err(|_| {
        XlsxError::Unexpected("fail to convert cell name")
    })?);
    reference.push(':');
    reference.push_str(std::str::from_utf8(&end).map_err(|_| {
        XlsxError::Unexpected("fail to convert cell name")
    })?);
    Ok(reference)
}
