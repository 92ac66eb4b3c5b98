//! Post-load linking of pivot-table parts to their cache payloads.
//!
//! Archive members arrive in whatever order the zip directory lists them,
//! so loading happens in two phases: the workbook streams every pivot part
//! into [`ArchiveParts`], then this module joins them through the integer
//! cache ids of the workbook's `pivotCaches` registry. A pivot whose cache
//! payload is absent still loads; only its cache fields stay empty.

use std::collections::BTreeMap;

use log::warn;

use super::cache::{CacheDefinition, CacheRecords};
use super::pivot_parser::ParsedPivot;
use crate::pivot::{LoadedPivot, Metric, PivotTable};

/// Pivot parts collected from the archive, keyed by part path.
#[derive(Debug, Default)]
pub(crate) struct ArchiveParts {
    pub(crate) pivot_tables: BTreeMap<String, ParsedPivot>,
    pub(crate) cache_definitions: BTreeMap<String, CacheDefinition>,
    pub(crate) cache_records: BTreeMap<String, CacheRecords>,
}

/// Extracts the numeric suffix of a part file name, e.g. `3` from
/// `xl/pivotTables/pivotTable3.xml` with stem `pivotTable`.
pub(crate) fn part_number(path: &str, stem: &str) -> Option<u32> {
    let file = path.rsplit('/').next()?;
    let digits = file.strip_prefix(stem)?.strip_suffix(".xml")?;
    atoi_simd::parse::<u32>(digits.as_bytes()).ok()
}

/// Joins parsed pivot parts to cache payloads through the workbook's
/// `pivotCaches` registry and relationship table.
///
/// Returns the tables sorted by table number together with an index from
/// part path to position.
pub(crate) fn reconcile(
    parts: ArchiveParts,
    registry: &[(Vec<u8>, u32)],
    relationships: &BTreeMap<Vec<u8>, (String, String)>,
) -> (Vec<PivotTable>, BTreeMap<String, usize>) {
    // cacheId -> definition part path, via the registry's relationship ids
    let mut cache_parts = BTreeMap::new();
    for (r_id, cache_id) in registry {
        match relationships.get(r_id) {
            Some((target, rel_type)) if rel_type.ends_with("/pivotCacheDefinition") => {
                cache_parts.insert(*cache_id, super::resolve_part_path("xl", target));
            }
            _ => warn!(
                "pivot cache {} has no pivotCacheDefinition relationship",
                cache_id
            ),
        }
    }

    let mut tables = Vec::with_capacity(parts.pivot_tables.len());
    for (path, parsed) in parts.pivot_tables {
        let table_number = match part_number(&path, "pivotTable") {
            Some(n) => n,
            None => {
                warn!("cannot derive a table number from part {path}");
                0
            }
        };

        let mut cache_definition = None;
        let mut cache_records = None;
        match cache_parts.get(&parsed.cache_id) {
            Some(def_path) => {
                cache_definition = parts.cache_definitions.get(def_path).cloned();
                if cache_definition.is_none() {
                    warn!("cache definition part {def_path} is missing from the archive");
                }
                // the record stream shares its number with the definition
                if let Some(n) = part_number(def_path, "pivotCacheDefinition") {
                    let dir = def_path.rsplit_once('/').map(|(d, _)| d).unwrap_or("xl");
                    let records_path = format!("{dir}/pivotCacheRecords{n}.xml");
                    cache_records = parts.cache_records.get(&records_path).cloned();
                }
            }
            None => warn!(
                "pivot table {} references unknown cache id {}",
                parsed.name, parsed.cache_id
            ),
        }

        let rows: Vec<usize> = parsed
            .row_fields
            .iter()
            .filter(|x| **x >= 0)
            .map(|x| *x as usize)
            .collect();
        let columns: Vec<usize> = parsed
            .col_fields
            .iter()
            .filter(|x| **x >= 0)
            .map(|x| *x as usize)
            .collect();
        let values: Vec<usize> = parsed.data_fields.iter().map(|f| f.fld).collect();
        let metric = Metric::from_subtotal(
            parsed
                .data_fields
                .first()
                .and_then(|f| f.subtotal.as_deref()),
        );
        let cache_fields = cache_definition
            .as_ref()
            .map(|d| d.cache_fields.clone())
            .unwrap_or_default();

        tables.push(PivotTable::Loaded(LoadedPivot {
            name: parsed.name,
            cache_id: parsed.cache_id,
            table_number,
            part_path: path,
            rows,
            columns,
            values,
            metric,
            cache_fields,
            pivot_fields: parsed.pivot_fields,
            raw_row_fields: parsed.row_fields,
            raw_col_fields: parsed.col_fields,
            data_fields: parsed.data_fields,
            location: parsed.location,
            style: parsed.style,
            uid: parsed.uid,
            attrs: parsed.attrs,
            ext_lst: parsed.ext_lst,
            cache_definition,
            cache_records,
        }));
    }

    tables.sort_by_key(|t| t.table_number());
    let index = tables
        .iter()
        .enumerate()
        .filter_map(|(i, t)| t.as_loaded().map(|p| (p.part_path().to_string(), i)))
        .collect();
    (tables, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pivot::{CacheField, DataField};
    use crate::Data;

    fn parsed(name: &str, cache_id: u32, subtotal: Option<&str>) -> ParsedPivot {
        ParsedPivot {
            name: name.into(),
            cache_id,
            row_fields: vec![0],
            col_fields: vec![-2],
            data_fields: vec![DataField {
                name: format!("of {name}"),
                fld: 1,
                subtotal: subtotal.map(String::from),
                ..DataField::default()
            }],
            ..ParsedPivot::default()
        }
    }

    fn definition(field: &str) -> CacheDefinition {
        CacheDefinition {
            source_sheet: Some("Data".into()),
            source_ref: Some("A1:B3".into()),
            source_name: None,
            cache_fields: vec![CacheField {
                name: field.into(),
                shared_items: Some(vec![Data::from("x")]),
            }],
        }
    }

    fn workbook_links(
        entries: &[(&str, u32, &str)],
    ) -> (Vec<(Vec<u8>, u32)>, BTreeMap<Vec<u8>, (String, String)>) {
        let mut registry = Vec::new();
        let mut rels = BTreeMap::new();
        for (r_id, cache_id, target) in entries {
            registry.push((r_id.as_bytes().to_vec(), *cache_id));
            rels.insert(
                r_id.as_bytes().to_vec(),
                (
                    target.to_string(),
                    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotCacheDefinition".to_string(),
                ),
            );
        }
        (registry, rels)
    }

    #[test]
    fn links_tables_to_caches_in_any_discovery_order() {
        let mut parts = ArchiveParts::default();
        // records and definitions registered before any pivot table
        parts.cache_records.insert(
            "xl/pivotCache/pivotCacheRecords2.xml".into(),
            CacheRecords::default(),
        );
        parts.cache_definitions.insert(
            "xl/pivotCache/pivotCacheDefinition2.xml".into(),
            definition("B"),
        );
        parts.cache_definitions.insert(
            "xl/pivotCache/pivotCacheDefinition1.xml".into(),
            definition("A"),
        );
        parts.pivot_tables.insert(
            "xl/pivotTables/pivotTable2.xml".into(),
            parsed("Second", 11, Some("count")),
        );
        parts.pivot_tables.insert(
            "xl/pivotTables/pivotTable1.xml".into(),
            parsed("First", 10, None),
        );
        let (registry, rels) = workbook_links(&[
            ("rId7", 10, "pivotCache/pivotCacheDefinition1.xml"),
            ("rId8", 11, "pivotCache/pivotCacheDefinition2.xml"),
        ]);

        let (tables, index) = reconcile(parts, &registry, &rels);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name(), "First");
        assert_eq!(tables[0].metric(), Metric::Sum);
        assert_eq!(tables[0].cache_fields()[0].name, "A");
        assert_eq!(tables[1].name(), "Second");
        assert_eq!(tables[1].metric(), Metric::Count);
        let second = tables[1].as_loaded().unwrap();
        assert!(second.cache_records().is_some());
        assert_eq!(index["xl/pivotTables/pivotTable1.xml"], 0);
        assert_eq!(index["xl/pivotTables/pivotTable2.xml"], 1);
    }

    #[test]
    fn sentinel_axis_entries_stay_out_of_resolved_columns() {
        let mut parts = ArchiveParts::default();
        parts.pivot_tables.insert(
            "xl/pivotTables/pivotTable1.xml".into(),
            parsed("P", 10, None),
        );
        let (registry, rels) = workbook_links(&[]);
        let (tables, _) = reconcile(parts, &registry, &rels);
        assert_eq!(tables[0].columns(), &[] as &[usize]);
        assert_eq!(tables[0].rows(), &[0]);
        let loaded = tables[0].as_loaded().unwrap();
        assert_eq!(loaded.raw_col_fields, vec![-2]);
    }

    #[test]
    fn missing_cache_payload_is_not_fatal() {
        let mut parts = ArchiveParts::default();
        parts.pivot_tables.insert(
            "xl/pivotTables/pivotTable1.xml".into(),
            parsed("Orphan", 42, None),
        );
        let (registry, rels) = workbook_links(&[]);
        let (tables, _) = reconcile(parts, &registry, &rels);
        assert_eq!(tables[0].name(), "Orphan");
        assert!(tables[0].cache_fields().is_empty());
        assert!(tables[0].as_loaded().unwrap().cache_definition().is_none());
    }
}
