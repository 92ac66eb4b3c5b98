//! Streaming parser for `pivotTableDefinition` parts.
//!
//! A single forward pass over the tag stream; the section currently open
//! (`rowFields`, `colFields`, `dataFields`) decides how a `field` or
//! `dataField` element is routed. Row and column axis entries keep their
//! signed wire value so that the `-2` values-axis marker survives until
//! reconciliation. Unknown sections are skipped, `extLst` is captured
//! as-is for re-emission.

use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader as XmlReader, Writer as XmlWriter};

use super::XlsxError;
use crate::pivot::{DataField, Location, ParsedField, ParsedItem, RootAttrs, StyleInfo};

/// Everything a `pivotTableDefinition` part carries, before it is linked
/// to its cache payload.
#[derive(Debug, Default, Clone)]
pub(crate) struct ParsedPivot {
    pub(crate) name: String,
    pub(crate) cache_id: u32,
    pub(crate) uid: Option<String>,
    pub(crate) attrs: RootAttrs,
    pub(crate) location: Option<Location>,
    pub(crate) pivot_fields: Vec<ParsedField>,
    pub(crate) row_fields: Vec<i32>,
    pub(crate) col_fields: Vec<i32>,
    pub(crate) data_fields: Vec<DataField>,
    pub(crate) style: Option<StyleInfo>,
    pub(crate) ext_lst: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    None,
    RowFields,
    ColFields,
    DataFields,
}

fn parse_u32(v: &[u8]) -> u32 {
    atoi_simd::parse::<u32>(v).unwrap_or(0)
}

fn parse_i32(v: &[u8]) -> i32 {
    atoi_simd::parse::<i32>(v).unwrap_or(0)
}

fn read_root_attrs<B: BufRead>(
    xml: &XmlReader<B>,
    e: &BytesStart,
    pivot: &mut ParsedPivot,
) -> Result<(), XlsxError> {
    for a in e.attributes() {
        let a = a.map_err(XlsxError::XmlAttr)?;
        if a.key.local_name().as_ref() == b"cacheId" {
            pivot.cache_id = parse_u32(&a.value);
            continue;
        }
        let value = a.decode_and_unescape_value(xml.decoder())?.to_string();
        let attrs = &mut pivot.attrs;
        match a.key.local_name().as_ref() {
            b"name" => pivot.name = value,
            b"uid" => pivot.uid = Some(value),
            b"dataCaption" => attrs.data_caption = Some(value),
            b"applyNumberFormats" => attrs.apply_number_formats = Some(value),
            b"applyBorderFormats" => attrs.apply_border_formats = Some(value),
            b"applyFontFormats" => attrs.apply_font_formats = Some(value),
            b"applyPatternFormats" => attrs.apply_pattern_formats = Some(value),
            b"applyAlignmentFormats" => attrs.apply_alignment_formats = Some(value),
            b"applyWidthHeightFormats" => attrs.apply_width_height_formats = Some(value),
            b"updatedVersion" => attrs.updated_version = Some(value),
            b"minRefreshableVersion" => attrs.min_refreshable_version = Some(value),
            b"createdVersion" => attrs.created_version = Some(value),
            b"indent" => attrs.indent = Some(value),
            b"compact" => attrs.compact = Some(value),
            b"compactData" => attrs.compact_data = Some(value),
            b"multipleFieldFilters" => attrs.multiple_field_filters = Some(value),
            b"useAutoFormatting" => attrs.use_auto_formatting = Some(value),
            b"itemPrintTitles" => attrs.item_print_titles = Some(value),
            _ => (),
        }
    }
    Ok(())
}

fn read_location<B: BufRead>(
    xml: &XmlReader<B>,
    e: &BytesStart,
) -> Result<Location, XlsxError> {
    let mut location = Location::default();
    for a in e.attributes() {
        let a = a.map_err(XlsxError::XmlAttr)?;
        match a.key.local_name().as_ref() {
            b"ref" => {
                location.reference = a.decode_and_unescape_value(xml.decoder())?.to_string();
            }
            b"firstHeaderRow" => location.first_header_row = parse_u32(&a.value),
            b"firstDataRow" => location.first_data_row = parse_u32(&a.value),
            b"firstDataCol" => location.first_data_col = parse_u32(&a.value),
            _ => (),
        }
    }
    Ok(location)
}

fn read_pivot_field<B: BufRead>(
    xml: &XmlReader<B>,
    e: &BytesStart,
) -> Result<ParsedField, XlsxError> {
    let mut field = ParsedField::default();
    for a in e.attributes() {
        let a = a.map_err(XlsxError::XmlAttr)?;
        if a.key.local_name().as_ref() == b"dataField" {
            field.data_field = matches!(a.value.as_ref(), b"1" | b"true");
            continue;
        }
        let value = a.decode_and_unescape_value(xml.decoder())?.to_string();
        match a.key.local_name().as_ref() {
            b"axis" => field.axis = Some(value),
            b"name" => field.name = Some(value),
            b"showAll" => field.show_all = Some(value),
            b"compact" => field.compact = Some(value),
            b"outline" => field.outline = Some(value),
            _ => (),
        }
    }
    Ok(field)
}

fn read_data_field<B: BufRead>(
    xml: &XmlReader<B>,
    e: &BytesStart,
) -> Result<DataField, XlsxError> {
    let mut field = DataField::default();
    for a in e.attributes() {
        let a = a.map_err(XlsxError::XmlAttr)?;
        match a.key.local_name().as_ref() {
            b"name" => {
                field.name = a.decode_and_unescape_value(xml.decoder())?.to_string();
            }
            b"fld" => field.fld = parse_u32(&a.value) as usize,
            b"baseField" => field.base_field = parse_u32(&a.value),
            b"baseItem" => field.base_item = parse_u32(&a.value),
            b"subtotal" => {
                field.subtotal = Some(a.decode_and_unescape_value(xml.decoder())?.to_string());
            }
            _ => (),
        }
    }
    Ok(field)
}

fn read_style_info<B: BufRead>(
    xml: &XmlReader<B>,
    e: &BytesStart,
) -> Result<StyleInfo, XlsxError> {
    let mut style = StyleInfo::default();
    for a in e.attributes() {
        let a = a.map_err(XlsxError::XmlAttr)?;
        let value = a.decode_and_unescape_value(xml.decoder())?.to_string();
        match a.key.local_name().as_ref() {
            b"name" => style.name = Some(value),
            b"showRowHeaders" => style.show_row_headers = Some(value),
            b"showColHeaders" => style.show_col_headers = Some(value),
            b"showRowStripes" => style.show_row_stripes = Some(value),
            b"showColStripes" => style.show_col_stripes = Some(value),
            b"showLastColumn" => style.show_last_column = Some(value),
            _ => (),
        }
    }
    Ok(style)
}

/// Copies the `extLst` subtree, start tag included, into a string.
fn capture_ext_lst<B: BufRead>(
    xml: &mut XmlReader<B>,
    open: &BytesStart,
) -> Result<String, XlsxError> {
    let mut writer = XmlWriter::new(Vec::new());
    writer.write_event(Event::Start(open.to_owned()))?;
    let mut depth = 1usize;
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) => return Err(XlsxError::XmlEof("extLst")),
            Err(e) => return Err(XlsxError::Xml(e)),
            Ok(event) => {
                match &event {
                    Event::Start(_) => depth += 1,
                    Event::End(_) => depth -= 1,
                    _ => (),
                }
                writer.write_event(event)?;
                if depth == 0 {
                    break;
                }
            }
        }
    }
    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

/// Parses one `pivotTableDefinition` document off the reader.
pub(crate) fn read_pivot_table<B: BufRead>(
    xml: &mut XmlReader<B>,
) -> Result<ParsedPivot, XlsxError> {
    let mut pivot = ParsedPivot::default();
    let mut section = Section::None;
    let mut current_field: Option<ParsedField> = None;
    let mut buf = Vec::with_capacity(1024);
    let mut skip_buf = Vec::new();
    loop {
        buf.clear();
        let event = xml.read_event_into(&mut buf);
        match &event {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let empty = matches!(&event, Ok(Event::Empty(_)));
                match e.local_name().as_ref() {
                    b"pivotTableDefinition" => {
                        pivot = ParsedPivot::default();
                        read_root_attrs(xml, e, &mut pivot)?;
                        if empty {
                            return Ok(pivot);
                        }
                    }
                    b"location" => pivot.location = Some(read_location(xml, e)?),
                    b"pivotField" => {
                        let field = read_pivot_field(xml, e)?;
                        if empty {
                            pivot.pivot_fields.push(field);
                        } else {
                            current_field = Some(field);
                        }
                    }
                    b"item" => {
                        if let Some(field) = current_field.as_mut() {
                            let mut item = ParsedItem::default();
                            for a in e.attributes() {
                                let a = a.map_err(XlsxError::XmlAttr)?;
                                match a.key.local_name().as_ref() {
                                    b"x" => item.x = Some(parse_u32(&a.value)),
                                    b"t" => {
                                        item.t = Some(
                                            a.decode_and_unescape_value(xml.decoder())?
                                                .to_string(),
                                        );
                                    }
                                    _ => (),
                                }
                            }
                            field.items.push(item);
                        }
                    }
                    b"rowFields" => section = Section::RowFields,
                    b"colFields" => section = Section::ColFields,
                    b"dataFields" => section = Section::DataFields,
                    b"field" => {
                        let x = match e.try_get_attribute("x")? {
                            Some(a) => parse_i32(&a.value),
                            None => 0,
                        };
                        match section {
                            Section::RowFields => pivot.row_fields.push(x),
                            Section::ColFields => pivot.col_fields.push(x),
                            _ => (),
                        }
                    }
                    b"dataField" if section == Section::DataFields => {
                        pivot.data_fields.push(read_data_field(xml, e)?);
                    }
                    b"pivotTableStyleInfo" => pivot.style = Some(read_style_info(xml, e)?),
                    // layout caches this crate does not model
                    b"rowItems" | b"colItems" if !empty => {
                        skip_buf.clear();
                        xml.read_to_end_into(e.name(), &mut skip_buf)?;
                    }
                    b"extLst" => {
                        if empty {
                            pivot.ext_lst = Some("<extLst/>".to_string());
                        } else {
                            pivot.ext_lst = Some(capture_ext_lst(xml, e)?);
                        }
                    }
                    _ => (),
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"pivotField" => pivot.pivot_fields.extend(current_field.take()),
                b"rowFields" | b"colFields" | b"dataFields" => section = Section::None,
                b"pivotTableDefinition" => break,
                _ => (),
            },
            Ok(Event::Eof) => return Err(XlsxError::XmlEof("pivotTableDefinition")),
            Err(e) => return Err(XlsxError::Xml(e.clone())),
            _ => (),
        }
    }
    Ok(pivot)
}
