use std::io::{Cursor, Write};
use std::str::FromStr;

use pivotine::{
    BuildError, Data, Error, Metric, PivotTable, PivotTableRequest, RecordValue, Workbook,
};
use rstest::rstest;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const SHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const RELS_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

fn str_cell(reference: &str, value: &str) -> String {
    format!(r#"<c r="{reference}" t="str"><v>{value}</v></c>"#)
}

fn num_cell(reference: &str, value: &str) -> String {
    format!(r#"<c r="{reference}"><v>{value}</v></c>"#)
}

/// A worksheet with a header row and three data rows; the C4 amount is
/// left blank.
fn sales_sheet() -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<worksheet xmlns="{ns}"><sheetData>"#,
            r#"<row r="1">{h1}{h2}{h3}</row>"#,
            r#"<row r="2">{a2}{b2}{c2}</row>"#,
            r#"<row r="3">{a3}{b3}{c3}</row>"#,
            r#"<row r="4">{a4}{b4}</row>"#,
            r#"</sheetData></worksheet>"#
        ),
        ns = SHEET_NS,
        h1 = str_cell("A1", "Region"),
        h2 = str_cell("B1", "Product"),
        h3 = str_cell("C1", "Amount"),
        a2 = str_cell("A2", "East"),
        b2 = str_cell("B2", "Gadget"),
        c2 = num_cell("C2", "10"),
        a3 = str_cell("A3", "West"),
        b3 = str_cell("B3", "Widget"),
        c3 = num_cell("C3", "2.5"),
        a4 = str_cell("A4", "East"),
        b4 = str_cell("B4", "Widget"),
    )
}

fn workbook_xml(pivot_caches: &[(u32, &str)]) -> String {
    let mut caches = String::new();
    if !pivot_caches.is_empty() {
        caches.push_str("<pivotCaches>");
        for (cache_id, r_id) in pivot_caches {
            caches.push_str(&format!(
                r#"<pivotCache cacheId="{cache_id}" r:id="{r_id}"/>"#
            ));
        }
        caches.push_str("</pivotCaches>");
    }
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<workbook xmlns="{ns}" xmlns:r="{rels}">"#,
            r#"<sheets><sheet name="Data" sheetId="1" r:id="rId1"/></sheets>"#,
            "{caches}",
            r#"</workbook>"#
        ),
        ns = SHEET_NS,
        rels = RELS_NS,
        caches = caches,
    )
}

fn workbook_rels(cache_targets: &[(&str, &str)]) -> String {
    let mut rels = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<Relationships xmlns="{pkg}">"#,
            r#"<Relationship Id="rId1" Type="{rels}/worksheet" Target="worksheets/sheet1.xml"/>"#,
        ),
        pkg = PKG_RELS_NS,
        rels = RELS_NS,
    );
    for (r_id, target) in cache_targets {
        rels.push_str(&format!(
            r#"<Relationship Id="{r_id}" Type="{rels}/pivotCacheDefinition" Target="{target}"/>"#,
            r_id = r_id,
            rels = RELS_NS,
            target = target,
        ));
    }
    rels.push_str("</Relationships>");
    rels
}

fn build_archive(parts: &[(&str, &str)]) -> Cursor<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (path, content) in parts {
        writer
            .start_file(*path, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap()
}

fn source_workbook() -> Workbook<Cursor<Vec<u8>>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let sheet = sales_sheet();
    let workbook = workbook_xml(&[]);
    let rels = workbook_rels(&[]);
    let cursor = build_archive(&[
        ("xl/workbook.xml", workbook.as_str()),
        ("xl/_rels/workbook.xml.rels", rels.as_str()),
        ("xl/worksheets/sheet1.xml", sheet.as_str()),
    ]);
    Workbook::new(cursor).unwrap()
}

#[test]
fn cache_ids_form_a_dense_block_from_ten() {
    let mut workbook = source_workbook();
    for i in 0..3 {
        let request = PivotTableRequest::new()
            .source_sheet("Data")
            .rows(["Region"])
            .values(["Amount"]);
        let pivot = workbook.add_pivot_table(request).unwrap();
        assert_eq!(pivot.cache_id(), 10 + i);
        assert_eq!(pivot.table_number(), i + 1);
        assert_eq!(pivot.name(), format!("PivotTable{}", i + 1));
    }
}

#[test]
fn build_resolves_fields_and_dictionaries() {
    let mut workbook = source_workbook();
    let request = PivotTableRequest::new()
        .source_sheet("Data")
        .rows(["Region"])
        .columns(["Product"])
        .values(["Amount"])
        .metric(Metric::Sum);
    let pivot = workbook.add_pivot_table(request).unwrap();
    assert_eq!(pivot.rows(), &[0]);
    assert_eq!(pivot.columns(), &[1]);
    assert_eq!(pivot.values(), &[2]);
    let fields = pivot.cache_fields();
    assert_eq!(fields.len(), 3);
    // axis dictionaries are sorted and deduplicated, value fields have none
    assert_eq!(
        fields[0].shared_items.as_deref(),
        Some(&[Data::from("East"), Data::from("West")][..])
    );
    assert_eq!(
        fields[1].shared_items.as_deref(),
        Some(&[Data::from("Gadget"), Data::from("Widget")][..])
    );
    assert!(fields[2].shared_items.is_none());
}

#[test]
fn validation_failures_surface_as_build_errors() {
    let mut workbook = source_workbook();
    let request = PivotTableRequest::new()
        .source_sheet("Data")
        .rows(["Flavor"])
        .values(["Amount"]);
    match workbook.add_pivot_table(request) {
        Err(Error::Build(BuildError::UnknownField { field, source })) => {
            assert_eq!(field, "Flavor");
            assert_eq!(source, "Data");
        }
        other => panic!("expected UnknownField, got {other:?}"),
    }

    let request = PivotTableRequest::new().source_sheet("Data").values(["Amount"]);
    assert!(matches!(
        workbook.add_pivot_table(request),
        Err(Error::Build(BuildError::NoRowFields))
    ));

    let request = PivotTableRequest::new()
        .source_sheet("Data")
        .rows(["Region"])
        .columns(["Product"])
        .values(["Amount", "Amount"]);
    assert!(matches!(
        workbook.add_pivot_table(request),
        Err(Error::Build(BuildError::MultiValueWithColumns))
    ));

    let request = PivotTableRequest::new()
        .source_sheet("Data")
        .source_table("Orders")
        .rows(["Region"])
        .values(["Amount"]);
    assert!(matches!(
        workbook.add_pivot_table(request),
        Err(Error::Build(BuildError::Configuration))
    ));
}

/// Writes a built workbook's pivot parts next to a fresh copy of the
/// source parts, wiring the workbook registry to the given cache ids.
fn save_with_pivots(workbook: &Workbook<Cursor<Vec<u8>>>, cache_ids: &[u32]) -> Cursor<Vec<u8>> {
    let registry: Vec<(u32, String)> = cache_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, format!("rId{}", 100 + i)))
        .collect();
    let registry_refs: Vec<(u32, &str)> = registry
        .iter()
        .map(|(id, r_id)| (*id, r_id.as_str()))
        .collect();
    let targets: Vec<(String, String)> = cache_ids
        .iter()
        .enumerate()
        .map(|(i, _)| {
            (
                format!("rId{}", 100 + i),
                format!("pivotCache/pivotCacheDefinition{}.xml", i + 1),
            )
        })
        .collect();
    let target_refs: Vec<(&str, &str)> = targets
        .iter()
        .map(|(r, t)| (r.as_str(), t.as_str()))
        .collect();
    let sheet = sales_sheet();
    let workbook_part = workbook_xml(&registry_refs);
    let rels = workbook_rels(&target_refs);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (path, content) in [
        ("xl/workbook.xml", workbook_part.as_str()),
        ("xl/_rels/workbook.xml.rels", rels.as_str()),
        ("xl/worksheets/sheet1.xml", sheet.as_str()),
    ] {
        writer
            .start_file(path, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    workbook.write_pivot_parts(&mut writer).unwrap();
    writer.finish().unwrap()
}

#[test]
fn round_trip_preserves_model_and_records() {
    let mut workbook = source_workbook();
    let request = PivotTableRequest::new()
        .source_sheet("Data")
        .rows(["Region"])
        .values(["Amount"])
        .metric(Metric::Count);
    workbook.add_pivot_table(request).unwrap();

    let bytes = save_with_pivots(&workbook, &[10]);
    let mut reloaded = Workbook::new(bytes).unwrap();
    reloaded.load_pivot_tables().unwrap();

    let tables = reloaded.pivot_tables();
    assert_eq!(tables.len(), 1);
    let pivot = &tables[0];
    assert_eq!(pivot.name(), "PivotTable1");
    assert_eq!(pivot.cache_id(), 10);
    assert_eq!(pivot.rows(), &[0]);
    assert_eq!(pivot.columns(), &[] as &[usize]);
    assert_eq!(pivot.values(), &[2]);
    // metric is re-inferred from the data field's subtotal
    assert_eq!(pivot.metric(), Metric::Count);

    let loaded = pivot.as_loaded().unwrap();
    assert_eq!(loaded.part_path(), "xl/pivotTables/pivotTable1.xml");
    let definition = loaded.cache_definition().unwrap();
    assert_eq!(definition.source_sheet.as_deref(), Some("Data"));
    assert_eq!(definition.source_ref.as_deref(), Some("A1:C4"));
    assert_eq!(definition.cache_fields.len(), 3);
    assert_eq!(
        definition.cache_fields[0].shared_items.as_deref(),
        Some(&[Data::from("East"), Data::from("West")][..])
    );

    let records = loaded.cache_records().unwrap();
    assert_eq!(records.records.len(), 3);
    // axis column as dictionary index, value column literal
    assert_eq!(records.records[0][0], RecordValue::Shared(0));
    assert_eq!(records.records[0][2], RecordValue::Value(Data::Int(10)));
    assert_eq!(records.records[1][2], RecordValue::Value(Data::Float(2.5)));
    // the blank C4 amount travels as a missing marker
    assert_eq!(records.records[2][2], RecordValue::Value(Data::Empty));
}

#[test]
fn loading_is_independent_of_archive_entry_order() {
    let mut workbook = source_workbook();
    for _ in 0..2 {
        let request = PivotTableRequest::new()
            .source_sheet("Data")
            .rows(["Region"])
            .values(["Amount"]);
        workbook.add_pivot_table(request).unwrap();
    }
    let bytes = save_with_pivots(&workbook, &[10, 11]);

    // rebuild the archive with its entries reversed
    let mut source = zip::ZipArchive::new(bytes).unwrap();
    let names: Vec<String> = source.file_names().map(str::to_string).collect();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for name in names.iter().rev() {
        let mut entry = source.by_name(name).unwrap();
        writer
            .start_file(name.as_str(), SimpleFileOptions::default())
            .unwrap();
        std::io::copy(&mut entry, &mut writer).unwrap();
    }
    let reversed = writer.finish().unwrap();

    let mut reloaded = Workbook::new(reversed).unwrap();
    reloaded.load_pivot_tables().unwrap();
    let tables = reloaded.pivot_tables();
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].name(), "PivotTable1");
    assert_eq!(tables[0].cache_id(), 10);
    assert_eq!(tables[1].name(), "PivotTable2");
    assert_eq!(tables[1].cache_id(), 11);
    assert!(tables[1].as_loaded().unwrap().cache_records().is_some());
}

#[test]
fn rewriting_a_loaded_workbook_keeps_its_parts() {
    let mut workbook = source_workbook();
    let request = PivotTableRequest::new()
        .source_sheet("Data")
        .rows(["Region"])
        .columns(["Product"])
        .values(["Amount"]);
    workbook.add_pivot_table(request).unwrap();
    let bytes = save_with_pivots(&workbook, &[10]);

    let mut loaded = Workbook::new(bytes).unwrap();
    loaded.load_pivot_tables().unwrap();
    let second = save_with_pivots(&loaded, &[10]);

    let mut reloaded = Workbook::new(second).unwrap();
    reloaded.load_pivot_tables().unwrap();
    let pivot = reloaded.pivot_tables()[0].as_loaded().unwrap();
    assert_eq!(pivot.raw_col_fields(), &[1]);
    assert_eq!(pivot.data_fields()[0].name, "Sum of Amount");
    assert_eq!(
        pivot.cache_definition().unwrap().cache_fields[1]
            .shared_items
            .as_deref(),
        Some(&[Data::from("Gadget"), Data::from("Widget")][..])
    );
}

#[rstest]
#[case("sum", Metric::Sum)]
#[case("count", Metric::Count)]
fn metric_parses_known_names(#[case] input: &str, #[case] expected: Metric) {
    assert_eq!(Metric::from_str(input).unwrap(), expected);
}

#[test]
fn metric_rejects_unknown_names() {
    assert!(matches!(
        Metric::from_str("average"),
        Err(BuildError::UnsupportedMetric(name)) if name == "average"
    ));
}

#[test]
fn missing_pivot_parts_load_an_empty_collection() {
    let mut workbook = source_workbook();
    workbook.load_pivot_tables().unwrap();
    assert!(workbook.pivot_tables().is_empty());
}

#[test]
fn table_source_builds_against_table_columns() {
    let sheet = sales_sheet();
    let workbook_part = workbook_xml(&[]);
    let rels = workbook_rels(&[]);
    let sheet_rels = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<Relationships xmlns="{pkg}">"#,
            r#"<Relationship Id="rId1" Type="{rels}/table" Target="../tables/table1.xml"/>"#,
            r#"</Relationships>"#
        ),
        pkg = PKG_RELS_NS,
        rels = RELS_NS,
    );
    let table_part = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<table xmlns="{ns}" id="1" name="Orders" displayName="Orders" "#,
            r#"ref="A1:C4" headerRowCount="1"><tableColumns count="3">"#,
            r#"<tableColumn id="1" name="Region"/>"#,
            r#"<tableColumn id="2" name="Product"/>"#,
            r#"<tableColumn id="3" name="Amount"/>"#,
            r#"</tableColumns></table>"#
        ),
        ns = SHEET_NS,
    );
    let cursor = build_archive(&[
        ("xl/workbook.xml", workbook_part.as_str()),
        ("xl/_rels/workbook.xml.rels", rels.as_str()),
        ("xl/worksheets/sheet1.xml", sheet.as_str()),
        ("xl/worksheets/_rels/sheet1.xml.rels", sheet_rels.as_str()),
        ("xl/tables/table1.xml", table_part.as_str()),
    ]);
    let mut workbook = Workbook::new(cursor).unwrap();

    let request = PivotTableRequest::new()
        .source_table("Orders")
        .rows(["Product"])
        .values(["Amount"]);
    let pivot = workbook.add_pivot_table(request).unwrap();
    assert_eq!(pivot.rows(), &[1]);
    assert_eq!(
        pivot.cache_fields()[1].shared_items.as_deref(),
        Some(&[Data::from("Gadget"), Data::from("Widget")][..])
    );
    match pivot {
        PivotTable::Fresh(fresh) => assert_eq!(fresh.source().name(), "Orders"),
        PivotTable::Loaded(_) => panic!("expected a fresh pivot table"),
    }
}

#[test]
fn sheet_anchored_tables_come_back_in_table_number_order() {
    let sheet = sales_sheet();
    let workbook_part = workbook_xml(&[]);
    let rels = workbook_rels(&[]);
    let sheet_rels = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<Relationships xmlns="{pkg}">"#,
            r#"<Relationship Id="rId1" Type="{rels}/pivotTable" "#,
            r#"Target="../pivotTables/pivotTable10.xml"/>"#,
            r#"<Relationship Id="rId2" Type="{rels}/pivotTable" "#,
            r#"Target="../pivotTables/pivotTable2.xml"/>"#,
            r#"</Relationships>"#
        ),
        pkg = PKG_RELS_NS,
        rels = RELS_NS,
    );
    let table = |name: &str, cache_id: u32| {
        format!(r#"<pivotTableDefinition name="{name}" cacheId="{cache_id}"/>"#)
    };
    let second = table("Second", 11);
    let tenth = table("Tenth", 19);
    let cursor = build_archive(&[
        ("xl/workbook.xml", workbook_part.as_str()),
        ("xl/_rels/workbook.xml.rels", rels.as_str()),
        ("xl/worksheets/sheet1.xml", sheet.as_str()),
        ("xl/worksheets/_rels/sheet1.xml.rels", sheet_rels.as_str()),
        ("xl/pivotTables/pivotTable10.xml", tenth.as_str()),
        ("xl/pivotTables/pivotTable2.xml", second.as_str()),
    ]);
    let mut workbook = Workbook::new(cursor).unwrap();
    workbook.load_pivot_tables().unwrap();

    let anchored = workbook.pivot_tables_in_sheet("Data").unwrap();
    assert_eq!(anchored.len(), 2);
    assert_eq!(anchored[0].name(), "Second");
    assert_eq!(anchored[0].table_number(), 2);
    assert_eq!(anchored[1].name(), "Tenth");
    assert_eq!(anchored[1].table_number(), 10);
}

#[test]
fn pivot_lookup_by_part_path_and_sheet() {
    let mut workbook = source_workbook();
    let request = PivotTableRequest::new()
        .source_sheet("Data")
        .rows(["Region"])
        .values(["Amount"]);
    workbook.add_pivot_table(request).unwrap();
    let bytes = save_with_pivots(&workbook, &[10]);

    // anchor the pivot on the sheet through its relationship part
    let mut source = zip::ZipArchive::new(bytes).unwrap();
    let names: Vec<String> = source.file_names().map(str::to_string).collect();
    let sheet_rels = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<Relationships xmlns="{pkg}">"#,
            r#"<Relationship Id="rId1" Type="{rels}/pivotTable" "#,
            r#"Target="../pivotTables/pivotTable1.xml"/>"#,
            r#"</Relationships>"#
        ),
        pkg = PKG_RELS_NS,
        rels = RELS_NS,
    );
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for name in &names {
        let mut entry = source.by_name(name).unwrap();
        writer
            .start_file(name.as_str(), SimpleFileOptions::default())
            .unwrap();
        std::io::copy(&mut entry, &mut writer).unwrap();
    }
    writer
        .start_file(
            "xl/worksheets/_rels/sheet1.xml.rels",
            SimpleFileOptions::default(),
        )
        .unwrap();
    writer.write_all(sheet_rels.as_bytes()).unwrap();
    let archive = writer.finish().unwrap();

    let mut reloaded = Workbook::new(archive).unwrap();
    reloaded.load_pivot_tables().unwrap();
    assert!(reloaded
        .pivot_table_at("xl/pivotTables/pivotTable1.xml")
        .is_some());
    assert!(reloaded.pivot_table_at("xl/pivotTables/pivotTable9.xml").is_none());
    let anchored = reloaded.pivot_tables_in_sheet("Data").unwrap();
    assert_eq!(anchored.len(), 1);
    assert_eq!(anchored[0].name(), "PivotTable1");
}
