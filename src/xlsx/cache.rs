//! Pivot-cache definition/records codec.
//!
//! The definition part carries one `cacheField` per source column (axis
//! fields with a `sharedItems` dictionary), the records part one `r` group
//! per data row where axis columns are `x` dictionary indices and value
//! columns are literal entries. Missing values appear as `m` markers in the
//! record stream only, never in a dictionary.

use std::fmt::Write as FmtWrite;
use std::io::BufRead;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;

use super::{parse_number, range_ref, XlsxError, RELS_NS, SPREADSHEET_NS};
use crate::pivot::{CacheField, FreshPivot};
use crate::source::Source;
use crate::{CellErrorType, Data};

/// A parsed `pivotCacheDefinition` part
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheDefinition {
    /// `worksheetSource` sheet attribute
    pub source_sheet: Option<String>,
    /// `worksheetSource` ref attribute
    pub source_ref: Option<String>,
    /// `worksheetSource` name attribute (table sources)
    pub source_name: Option<String>,
    /// One cache field per source column, document order
    pub cache_fields: Vec<CacheField>,
}

/// A parsed `pivotCacheRecords` part
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheRecords {
    /// One entry list per source data row
    pub records: Vec<Vec<RecordValue>>,
}

/// One entry of a cache record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// Index into the owning field's shared-item dictionary
    Shared(u32),
    /// Literal value; `Data::Empty` is the missing marker
    Value(Data),
}

/// Parses a one-letter item element (`m`/`n`/`s`/`b`/`e`/`d`) into a value.
fn parse_item<B: BufRead>(
    xml: &XmlReader<B>,
    e: &BytesStart,
) -> Result<Option<Data>, XlsxError> {
    let v = match e.try_get_attribute("v")? {
        Some(a) => Some(a.decode_and_unescape_value(xml.decoder())?),
        None => None,
    };
    let data = match e.local_name().as_ref() {
        b"m" => Data::Empty,
        b"n" => v
            .as_deref()
            .map(|v| parse_number(v.as_bytes()))
            .unwrap_or_default(),
        b"s" => match v {
            Some(v) => Data::String(v.into_owned()),
            None => Data::Empty,
        },
        b"b" => v
            .as_deref()
            .map(|v| Data::Bool(matches!(v, "1" | "true")))
            .unwrap_or_default(),
        b"e" => match v.as_deref() {
            Some(v) => Data::Error(v.parse().unwrap_or(CellErrorType::Value)),
            None => Data::Empty,
        },
        // dates are carried through as their ISO text
        b"d" => match v {
            Some(v) => Data::String(v.into_owned()),
            None => Data::Empty,
        },
        _ => return Ok(None),
    };
    Ok(Some(data))
}

/// Reads a `pivotCacheDefinition` part off the tag stream.
pub(crate) fn read_definition<B: BufRead>(
    xml: &mut XmlReader<B>,
) -> Result<CacheDefinition, XlsxError> {
    let mut def = CacheDefinition::default();
    let mut field: Option<CacheField> = None;
    let mut in_shared_items = false;
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        let event = xml.read_event_into(&mut buf);
        match &event {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"worksheetSource" => {
                    for a in e.attributes() {
                        let a = a.map_err(XlsxError::XmlAttr)?;
                        let value = a.decode_and_unescape_value(xml.decoder())?.to_string();
                        match a.key.local_name().as_ref() {
                            b"sheet" => def.source_sheet = Some(value),
                            b"ref" => def.source_ref = Some(value),
                            b"name" => def.source_name = Some(value),
                            _ => (),
                        }
                    }
                }
                b"cacheField" => {
                    let mut name = String::new();
                    for a in e.attributes() {
                        let a = a.map_err(XlsxError::XmlAttr)?;
                        if a.key.local_name().as_ref() == b"name" {
                            name = a.decode_and_unescape_value(xml.decoder())?.to_string();
                        }
                    }
                    field = Some(CacheField {
                        name,
                        shared_items: None,
                    });
                    if matches!(&event, Ok(Event::Empty(_))) {
                        def.cache_fields.extend(field.take());
                    }
                }
                // a dictionary-less field still carries a bare sharedItems
                // element; only a count attribute marks a real dictionary
                b"sharedItems" => {
                    if let Some(f) = field.as_mut() {
                        if e.try_get_attribute("count")?.is_some() {
                            f.shared_items = Some(Vec::new());
                            in_shared_items = !matches!(&event, Ok(Event::Empty(_)));
                        }
                    }
                }
                other if other.len() == 1 && in_shared_items => {
                    if let (Some(f), Some(data)) = (field.as_mut(), parse_item(xml, e)?) {
                        if let Some(items) = f.shared_items.as_mut() {
                            items.push(data);
                        }
                    }
                }
                _ => (),
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"sharedItems" => in_shared_items = false,
                b"cacheField" => def.cache_fields.extend(field.take()),
                b"pivotCacheDefinition" => break,
                _ => (),
            },
            Ok(Event::Eof) => return Err(XlsxError::XmlEof("pivotCacheDefinition")),
            Err(e) => return Err(XlsxError::Xml(e.clone())),
            _ => (),
        }
    }
    Ok(def)
}

/// Reads a `pivotCacheRecords` part off the tag stream.
pub(crate) fn read_records<B: BufRead>(
    xml: &mut XmlReader<B>,
) -> Result<CacheRecords, XlsxError> {
    let mut records = CacheRecords::default();
    let mut current: Option<Vec<RecordValue>> = None;
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                match e.local_name().as_ref() {
                    b"r" => current = Some(Vec::new()),
                    b"x" => {
                        if let Some(rec) = current.as_mut() {
                            let idx = match e.try_get_attribute("v")? {
                                Some(a) => atoi_simd::parse::<u32>(&a.value).unwrap_or(0),
                                None => 0,
                            };
                            rec.push(RecordValue::Shared(idx));
                        }
                    }
                    other if other.len() == 1 => {
                        if let Some(rec) = current.as_mut() {
                            if let Some(data) = parse_item(xml, e)? {
                                rec.push(RecordValue::Value(data));
                            }
                        }
                    }
                    _ => (),
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"r" => {
                    if let Some(rec) = current.take() {
                        records.records.push(rec);
                    }
                }
                b"pivotCacheRecords" => break,
                _ => (),
            },
            Ok(Event::Eof) => return Err(XlsxError::XmlEof("pivotCacheRecords")),
            Err(e) => return Err(XlsxError::Xml(e)),
            _ => (),
        }
    }
    Ok(records)
}

/// Builds the cache payload for a freshly built table.
///
/// Axis columns are emitted as dictionary indices, value-only columns as
/// literal entries; missing axis values become `m` markers in the record
/// stream while staying out of the dictionary.
pub(crate) fn build_cache_payload(
    pivot: &FreshPivot,
) -> Result<(CacheDefinition, CacheRecords), XlsxError> {
    let source = &pivot.source;
    let (source_sheet, source_ref, source_name) = match source {
        Source::Sheet(_) => (
            Some(source.sheet_name().to_string()),
            Some(range_ref(source.dimensions())?),
            None,
        ),
        Source::Table(_) => (None, None, Some(source.name().to_string())),
    };
    let def = CacheDefinition {
        source_sheet,
        source_ref,
        source_name,
        cache_fields: pivot.cache_fields.clone(),
    };

    let mut records = CacheRecords::default();
    for row in 0..source.row_count() {
        let mut rec = Vec::with_capacity(pivot.cache_fields.len());
        for (col, f) in pivot.cache_fields.iter().enumerate() {
            let value = source.value_at(row, col);
            match f.shared_items.as_ref() {
                Some(items) => {
                    if value.is_empty() {
                        rec.push(RecordValue::Value(Data::Empty));
                    } else {
                        match items.iter().position(|i| i == value) {
                            Some(idx) => rec.push(RecordValue::Shared(idx as u32)),
                            None => rec.push(RecordValue::Value(value.clone())),
                        }
                    }
                }
                None => rec.push(RecordValue::Value(value.clone())),
            }
        }
        records.records.push(rec);
    }
    Ok((def, records))
}

fn write_value(xml: &mut String, data: &Data) -> Result<(), XlsxError> {
    match data {
        Data::Empty => xml.push_str("<m/>"),
        Data::Int(v) => write!(xml, r#"<n v="{v}"/>"#)?,
        Data::Float(v) => write!(xml, r#"<n v="{v}"/>"#)?,
        Data::String(v) => write!(xml, r#"<s v="{}"/>"#, escape(v.as_str()))?,
        Data::Bool(v) => write!(xml, r#"<b v="{}"/>"#, if *v { "1" } else { "0" })?,
        Data::Error(v) => write!(xml, r#"<e v="{v}"/>"#)?,
    }
    Ok(())
}

/// Renders a `pivotCacheDefinition` part.
pub(crate) fn render_definition(
    def: &CacheDefinition,
    record_count: usize,
) -> Result<String, XlsxError> {
    let mut xml = String::with_capacity(4096);
    xml.push_str(super::XML_HEADER);
    xml.push('\n');
    write!(
        xml,
        r#"<pivotCacheDefinition xmlns="{SPREADSHEET_NS}" xmlns:r="{RELS_NS}" r:id="rId1" refreshOnLoad="1" createdVersion="8" refreshedVersion="8" minRefreshableVersion="3" recordCount="{record_count}">"#,
    )?;

    xml.push_str(r#"<cacheSource type="worksheet"><worksheetSource"#);
    if let Some(sheet) = &def.source_sheet {
        write!(xml, r#" sheet="{}""#, escape(sheet.as_str()))?;
    }
    if let Some(r) = &def.source_ref {
        write!(xml, r#" ref="{}""#, escape(r.as_str()))?;
    }
    if let Some(name) = &def.source_name {
        write!(xml, r#" name="{}""#, escape(name.as_str()))?;
    }
    xml.push_str("/></cacheSource>");

    write!(xml, r#"<cacheFields count="{}">"#, def.cache_fields.len())?;
    for field in &def.cache_fields {
        write!(
            xml,
            r#"<cacheField name="{}" numFmtId="0">"#,
            escape(field.name.as_str())
        )?;
        match field.shared_items.as_ref() {
            Some(items) => {
                write!(xml, r#"<sharedItems count="{}">"#, items.len())?;
                for item in items {
                    write_value(&mut xml, item)?;
                }
                xml.push_str("</sharedItems>");
            }
            None => xml.push_str("<sharedItems/>"),
        }
        xml.push_str("</cacheField>");
    }
    xml.push_str("</cacheFields>");
    xml.push_str("</pivotCacheDefinition>");
    Ok(xml)
}

/// Renders a `pivotCacheRecords` part.
pub(crate) fn render_records(records: &CacheRecords) -> Result<String, XlsxError> {
    let mut xml = String::with_capacity(4096);
    xml.push_str(super::XML_HEADER);
    xml.push('\n');
    write!(
        xml,
        r#"<pivotCacheRecords xmlns="{SPREADSHEET_NS}" xmlns:r="{RELS_NS}" count="{}">"#,
        records.records.len()
    )?;
    for record in &records.records {
        xml.push_str("<r>");
        for entry in record {
            match entry {
                RecordValue::Shared(idx) => write!(xml, r#"<x v="{idx}"/>"#)?,
                RecordValue::Value(data) => write_value(&mut xml, data)?,
            }
        }
        xml.push_str("</r>");
    }
    xml.push_str("</pivotCacheRecords>");
    Ok(xml)
}
