//! Serialization of `pivotTableDefinition` parts and their package glue.
//!
//! Freshly built tables get a canonical document with stable defaults;
//! loaded tables re-emit the attributes they were parsed with, falling
//! back to the same defaults for anything the source part left out.
//! Layout caches (`rowItems`/`colItems`) are always regenerated, the
//! captured `extLst` subtree goes back out untouched.

use std::fmt::Write as FmtWrite;

use quick_xml::escape::escape;
use uuid::Uuid;

use super::{XlsxError, RELS_NS, SPREADSHEET_NS, XML_HEADER};
use crate::pivot::{
    DataField, FreshPivot, Location, LoadedPivot, ParsedField, PivotTable, StyleInfo,
};

const MC_NS: &str = "http://schemas.openxmlformats.org/markup-compatibility/2006";
const XR_NS: &str = "http://schemas.microsoft.com/office/spreadsheetml/2014/revision";
const PKG_RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// Serializes one pivot table to its `pivotTableDefinition` document.
pub(crate) fn render_pivot_table(pivot: &PivotTable) -> Result<String, XlsxError> {
    match pivot {
        PivotTable::Fresh(p) => render_fresh(p),
        PivotTable::Loaded(p) => render_loaded(p),
    }
}

fn push_opt_attr(xml: &mut String, key: &str, value: &Option<String>) -> Result<(), XlsxError> {
    if let Some(v) = value {
        write!(xml, r#" {key}="{}""#, escape(v.as_str()))?;
    }
    Ok(())
}

fn write_location(xml: &mut String, location: &Location) -> Result<(), XlsxError> {
    write!(
        xml,
        r#"<location ref="{}" firstHeaderRow="{}" firstDataRow="{}" firstDataCol="{}"/>"#,
        escape(location.reference.as_str()),
        location.first_header_row,
        location.first_data_row,
        location.first_data_col,
    )?;
    Ok(())
}

fn write_data_field(xml: &mut String, field: &DataField) -> Result<(), XlsxError> {
    write!(
        xml,
        r#"<dataField name="{}" fld="{}" baseField="{}" baseItem="{}""#,
        escape(field.name.as_str()),
        field.fld,
        field.base_field,
        field.base_item,
    )?;
    if let Some(subtotal) = &field.subtotal {
        write!(xml, r#" subtotal="{}""#, escape(subtotal.as_str()))?;
    }
    xml.push_str("/>");
    Ok(())
}

fn write_style_info(xml: &mut String, style: &StyleInfo) -> Result<(), XlsxError> {
    xml.push_str("<pivotTableStyleInfo");
    push_opt_attr(xml, "name", &style.name)?;
    push_opt_attr(xml, "showRowHeaders", &style.show_row_headers)?;
    push_opt_attr(xml, "showColHeaders", &style.show_col_headers)?;
    push_opt_attr(xml, "showRowStripes", &style.show_row_stripes)?;
    push_opt_attr(xml, "showColStripes", &style.show_col_stripes)?;
    push_opt_attr(xml, "showLastColumn", &style.show_last_column)?;
    xml.push_str("/>");
    Ok(())
}

fn write_default_style(xml: &mut String) -> Result<(), XlsxError> {
    xml.push_str(
        r#"<pivotTableStyleInfo name="PivotStyleLight16" showRowHeaders="1" showColHeaders="1" showRowStripes="0" showColStripes="0" showLastColumn="1"/>"#,
    );
    Ok(())
}

/// An axis field lists its dictionary positions plus the trailing
/// subtotal item.
fn write_axis_items(xml: &mut String, item_count: usize) -> Result<(), XlsxError> {
    write!(xml, r#"<items count="{}">"#, item_count + 1)?;
    for i in 0..item_count {
        write!(xml, r#"<item x="{i}"/>"#)?;
    }
    xml.push_str(r#"<item t="default"/></items>"#);
    Ok(())
}

fn write_layout_caches(xml: &mut String) {
    xml.push_str(r#"<rowItems count="1"><i t="grand"><x/></i></rowItems>"#);
}

fn render_fresh(pivot: &FreshPivot) -> Result<String, XlsxError> {
    let mut xml = String::with_capacity(4096);
    xml.push_str(XML_HEADER);
    xml.push('\n');
    let uid = Uuid::new_v4()
        .as_hyphenated()
        .to_string()
        .to_ascii_uppercase();
    write!(
        xml,
        r#"<pivotTableDefinition xmlns="{SPREADSHEET_NS}" xmlns:r="{RELS_NS}" xmlns:mc="{MC_NS}" mc:Ignorable="xr" xmlns:xr="{XR_NS}" xr:uid="{{{uid}}}" name="{}" cacheId="{}" applyNumberFormats="0" applyBorderFormats="0" applyFontFormats="0" applyPatternFormats="0" applyAlignmentFormats="0" applyWidthHeightFormats="{}" dataCaption="Values" updatedVersion="8" minRefreshableVersion="3" useAutoFormatting="1" itemPrintTitles="1" createdVersion="8" indent="0" compact="0" compactData="0" multipleFieldFilters="0">"#,
        escape(pivot.name.as_str()),
        pivot.cache_id,
        if pivot.apply_width_height_formats { "1" } else { "0" },
    )?;

    write_location(&mut xml, &Location::default())?;

    write!(xml, r#"<pivotFields count="{}">"#, pivot.cache_fields.len())?;
    for (idx, field) in pivot.cache_fields.iter().enumerate() {
        let axis = if pivot.rows.contains(&idx) {
            Some("axisRow")
        } else if pivot.columns.contains(&idx) {
            Some("axisCol")
        } else {
            None
        };
        match (axis, field.shared_items.as_ref()) {
            (Some(axis), Some(items)) => {
                write!(xml, r#"<pivotField axis="{axis}" showAll="0">"#)?;
                write_axis_items(&mut xml, items.len())?;
                xml.push_str("</pivotField>");
            }
            (Some(axis), None) => {
                write!(xml, r#"<pivotField axis="{axis}" showAll="0"/>"#)?;
            }
            (None, _) if pivot.values.contains(&idx) => {
                xml.push_str(r#"<pivotField dataField="1" showAll="0"/>"#);
            }
            (None, _) => xml.push_str(r#"<pivotField showAll="0"/>"#),
        }
    }
    xml.push_str("</pivotFields>");

    write!(xml, r#"<rowFields count="{}">"#, pivot.rows.len())?;
    for idx in &pivot.rows {
        write!(xml, r#"<field x="{idx}"/>"#)?;
    }
    xml.push_str("</rowFields>");
    write_layout_caches(&mut xml);

    if pivot.columns.is_empty() {
        // values axis placeholder
        xml.push_str(r#"<colFields count="1"><field x="-2"/></colFields>"#);
    } else {
        write!(xml, r#"<colFields count="{}">"#, pivot.columns.len())?;
        for idx in &pivot.columns {
            write!(xml, r#"<field x="{idx}"/>"#)?;
        }
        xml.push_str("</colFields>");
    }
    xml.push_str(r#"<colItems count="1"><i/></colItems>"#);

    write!(xml, r#"<dataFields count="{}">"#, pivot.values.len())?;
    for idx in &pivot.values {
        let field = DataField {
            name: format!("{} of {}", pivot.metric.caption(), pivot.cache_fields[*idx].name),
            fld: *idx,
            base_field: 0,
            base_item: 0,
            subtotal: pivot.metric.as_subtotal().map(String::from),
        };
        write_data_field(&mut xml, &field)?;
    }
    xml.push_str("</dataFields>");

    write_default_style(&mut xml)?;
    xml.push_str("</pivotTableDefinition>");
    Ok(xml)
}

fn write_parsed_field(xml: &mut String, field: &ParsedField) -> Result<(), XlsxError> {
    xml.push_str("<pivotField");
    push_opt_attr(xml, "name", &field.name)?;
    push_opt_attr(xml, "axis", &field.axis)?;
    if field.data_field {
        xml.push_str(r#" dataField="1""#);
    }
    push_opt_attr(xml, "showAll", &field.show_all)?;
    push_opt_attr(xml, "compact", &field.compact)?;
    push_opt_attr(xml, "outline", &field.outline)?;
    if field.items.is_empty() {
        xml.push_str("/>");
        return Ok(());
    }
    write!(xml, r#"><items count="{}">"#, field.items.len())?;
    for item in &field.items {
        xml.push_str("<item");
        if let Some(x) = item.x {
            write!(xml, r#" x="{x}""#)?;
        }
        push_opt_attr(xml, "t", &item.t)?;
        xml.push_str("/>");
    }
    xml.push_str("</items></pivotField>");
    Ok(())
}

fn render_loaded(pivot: &LoadedPivot) -> Result<String, XlsxError> {
    let mut xml = String::with_capacity(4096);
    xml.push_str(XML_HEADER);
    xml.push('\n');
    write!(
        xml,
        r#"<pivotTableDefinition xmlns="{SPREADSHEET_NS}" xmlns:r="{RELS_NS}" xmlns:mc="{MC_NS}" mc:Ignorable="xr" xmlns:xr="{XR_NS}""#,
    )?;
    if let Some(uid) = &pivot.uid {
        write!(xml, r#" xr:uid="{}""#, escape(uid.as_str()))?;
    }
    write!(
        xml,
        r#" name="{}" cacheId="{}""#,
        escape(pivot.name.as_str()),
        pivot.cache_id
    )?;
    let attrs = &pivot.attrs;
    push_opt_attr(&mut xml, "applyNumberFormats", &attrs.apply_number_formats)?;
    push_opt_attr(&mut xml, "applyBorderFormats", &attrs.apply_border_formats)?;
    push_opt_attr(&mut xml, "applyFontFormats", &attrs.apply_font_formats)?;
    push_opt_attr(&mut xml, "applyPatternFormats", &attrs.apply_pattern_formats)?;
    push_opt_attr(
        &mut xml,
        "applyAlignmentFormats",
        &attrs.apply_alignment_formats,
    )?;
    push_opt_attr(
        &mut xml,
        "applyWidthHeightFormats",
        &attrs.apply_width_height_formats,
    )?;
    push_opt_attr(&mut xml, "dataCaption", &attrs.data_caption)?;
    push_opt_attr(&mut xml, "updatedVersion", &attrs.updated_version)?;
    push_opt_attr(
        &mut xml,
        "minRefreshableVersion",
        &attrs.min_refreshable_version,
    )?;
    push_opt_attr(&mut xml, "useAutoFormatting", &attrs.use_auto_formatting)?;
    push_opt_attr(&mut xml, "itemPrintTitles", &attrs.item_print_titles)?;
    push_opt_attr(&mut xml, "createdVersion", &attrs.created_version)?;
    push_opt_attr(&mut xml, "indent", &attrs.indent)?;
    push_opt_attr(&mut xml, "compact", &attrs.compact)?;
    push_opt_attr(&mut xml, "compactData", &attrs.compact_data)?;
    push_opt_attr(
        &mut xml,
        "multipleFieldFilters",
        &attrs.multiple_field_filters,
    )?;
    xml.push('>');

    if let Some(location) = &pivot.location {
        write_location(&mut xml, location)?;
    }

    if !pivot.pivot_fields.is_empty() {
        write!(xml, r#"<pivotFields count="{}">"#, pivot.pivot_fields.len())?;
        for field in &pivot.pivot_fields {
            write_parsed_field(&mut xml, field)?;
        }
        xml.push_str("</pivotFields>");
    }

    if !pivot.raw_row_fields.is_empty() {
        write!(xml, r#"<rowFields count="{}">"#, pivot.raw_row_fields.len())?;
        for x in &pivot.raw_row_fields {
            write!(xml, r#"<field x="{x}"/>"#)?;
        }
        xml.push_str("</rowFields>");
        write_layout_caches(&mut xml);
    }

    if !pivot.raw_col_fields.is_empty() {
        write!(xml, r#"<colFields count="{}">"#, pivot.raw_col_fields.len())?;
        for x in &pivot.raw_col_fields {
            write!(xml, r#"<field x="{x}"/>"#)?;
        }
        xml.push_str("</colFields>");
        xml.push_str(r#"<colItems count="1"><i/></colItems>"#);
    }

    if !pivot.data_fields.is_empty() {
        write!(xml, r#"<dataFields count="{}">"#, pivot.data_fields.len())?;
        for field in &pivot.data_fields {
            write_data_field(&mut xml, field)?;
        }
        xml.push_str("</dataFields>");
    }

    match &pivot.style {
        Some(style) => write_style_info(&mut xml, style)?,
        None => write_default_style(&mut xml)?,
    }

    if let Some(ext) = &pivot.ext_lst {
        xml.push_str(ext);
    }

    xml.push_str("</pivotTableDefinition>");
    Ok(xml)
}

/// `_rels` part of a pivot table, pointing at its cache definition.
pub(crate) fn pivot_table_rels(table_number: u32) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            "\n",
            r#"<Relationships xmlns="{ns}">"#,
            r#"<Relationship Id="rId1" Type="{rels}/pivotCacheDefinition" "#,
            r#"Target="../pivotCache/pivotCacheDefinition{n}.xml"/>"#,
            r#"</Relationships>"#
        ),
        ns = PKG_RELS_NS,
        rels = RELS_NS,
        n = table_number,
    )
}

/// `_rels` part of a cache definition, pointing at its record stream.
pub(crate) fn cache_definition_rels(table_number: u32) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            "\n",
            r#"<Relationships xmlns="{ns}">"#,
            r#"<Relationship Id="rId1" Type="{rels}/pivotCacheRecords" "#,
            r#"Target="pivotCacheRecords{n}.xml"/>"#,
            r#"</Relationships>"#
        ),
        ns = PKG_RELS_NS,
        rels = RELS_NS,
        n = table_number,
    )
}
