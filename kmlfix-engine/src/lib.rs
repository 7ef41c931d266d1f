pub mod errors {
    use kmlfix_core::errors::ModelError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("document model error: {0}")]
        Model(#[from] ModelError),
    }
}

pub mod renamer {
    use std::collections::HashMap;

    use kmlfix_core::placemark::{
        AttributePath, FieldIndex, GroupKey, PLACEMARK_TAG, PlacemarkRecord,
    };
    use kmlfix_core::report::{DuplicateEntry, DuplicatesReport};
    use kmlfix_core::xml::XmlDocument;
    use tracing::{debug, trace};

    use crate::errors::EngineError;

    /// 重命名格式 `<原名><分隔符><序号>`。
    pub const RENAME_SEPARATOR: &str = " - ";

    /// 同一分组键下的记录，保持文档中的出现顺序。
    #[derive(Debug, Clone)]
    pub struct PlacemarkGroup {
        pub key: GroupKey,
        pub records: Vec<PlacemarkRecord>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct ScanSummary {
        /// 按分组键首次出现的顺序排列。
        pub groups: Vec<PlacemarkGroup>,
        pub scanned: usize,
        pub skipped: usize,
    }

    #[derive(Debug, Clone, Default)]
    pub struct RenameOutcome {
        pub report: DuplicatesReport,
        /// 不同的（分组, 名称）重复对数量。
        pub total_duplicates: usize,
        pub renamed: usize,
        pub scanned: usize,
        pub skipped: usize,
    }

    /// 按属性路径分组并修正组内重复的叶属性值。
    #[derive(Debug, Clone)]
    pub struct DuplicateRenamer {
        path: AttributePath,
    }

    impl DuplicateRenamer {
        pub fn new(path: AttributePath) -> Self {
            Self { path }
        }

        #[inline]
        pub fn path(&self) -> &AttributePath {
            &self.path
        }

        /// 单次遍历文档中的 placemark，缺少任一路径字段的记录被跳过。文档不会被修改。
        pub fn scan(&self, document: &XmlDocument) -> ScanSummary {
            let mut summary = ScanSummary::default();
            let mut positions: HashMap<GroupKey, usize> = HashMap::new();

            for placemark in document.elements_by_local_name(PLACEMARK_TAG) {
                summary.scanned += 1;
                let index = FieldIndex::build(document, placemark);

                let Some(leaf_field) = index.field(self.path.leaf()) else {
                    summary.skipped += 1;
                    continue;
                };
                let Some(leaf_value) = index.trimmed(self.path.leaf()) else {
                    summary.skipped += 1;
                    continue;
                };
                let Some(key) = GroupKey::build(&self.path, &index) else {
                    trace!(placemark = placemark.get(), "placemark 缺少分组字段，跳过");
                    summary.skipped += 1;
                    continue;
                };

                let record = PlacemarkRecord {
                    placemark,
                    leaf_field: leaf_field.node,
                    leaf_value: leaf_value.to_string(),
                    key: key.clone(),
                };
                match positions.get(&key) {
                    Some(&position) => summary.groups[position].records.push(record),
                    None => {
                        positions.insert(key.clone(), summary.groups.len());
                        summary.groups.push(PlacemarkGroup {
                            key,
                            records: vec![record],
                        });
                    }
                }
            }

            debug!(
                scanned = summary.scanned,
                skipped = summary.skipped,
                groups = summary.groups.len(),
                "placemark 扫描完成"
            );
            summary
        }

        /// 扫描、检测并在文档上就地改名，返回重复报告。
        pub fn rename(&self, document: &mut XmlDocument) -> Result<RenameOutcome, EngineError> {
            let summary = self.scan(document);
            let mut outcome = RenameOutcome {
                scanned: summary.scanned,
                skipped: summary.skipped,
                ..RenameOutcome::default()
            };

            for group in &summary.groups {
                let entries = rename_group(document, group)?;
                if entries.is_empty() {
                    continue;
                }
                outcome.total_duplicates += entries.len();
                outcome.renamed += entries
                    .iter()
                    .map(|entry| entry.corrected.len())
                    .sum::<usize>();
                debug!(group = %group.key, duplicates = entries.len(), "分组内发现重复名称");
                outcome.report.insert(group.key.clone(), entries);
            }

            Ok(outcome)
        }
    }

    /// 重复值的每一次出现（包括第一次）都按 1..N 编号改名。
    fn rename_group(
        document: &mut XmlDocument,
        group: &PlacemarkGroup,
    ) -> Result<Vec<DuplicateEntry>, EngineError> {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for record in &group.records {
            let name = record.leaf_value.as_str();
            match positions.get(name) {
                Some(&position) => counts[position].1 += 1,
                None => {
                    positions.insert(name, counts.len());
                    counts.push((name, 1));
                }
            }
        }

        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        let mut corrected: HashMap<&str, Vec<String>> = HashMap::new();
        for record in &group.records {
            let name = record.leaf_value.as_str();
            let count = positions.get(name).map_or(0, |&position| counts[position].1);
            if count < 2 {
                continue;
            }
            let occurrence = occurrences.entry(name).or_insert(0);
            *occurrence += 1;
            let new_name = format!("{name}{RENAME_SEPARATOR}{occurrence}");
            document.set_text_content(record.leaf_field, new_name.as_str())?;
            corrected.entry(name).or_default().push(new_name);
        }

        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, count)| DuplicateEntry {
                name: name.to_string(),
                count,
                corrected: corrected.remove(name).unwrap_or_default(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use kmlfix_core::placemark::{AttributePath, FieldIndex, PLACEMARK_TAG};
    use kmlfix_core::report::DuplicateEntry;
    use kmlfix_core::xml::XmlDocument;
    use kmlfix_io::KmlFacade;

    use crate::renamer::DuplicateRenamer;

    fn placemark(fields: &[(&str, &str)]) -> String {
        let data: String = fields
            .iter()
            .map(|(name, value)| format!("<SimpleData name=\"{name}\">{value}</SimpleData>"))
            .collect();
        format!("<Placemark><ExtendedData><SchemaData>{data}</SchemaData></ExtendedData></Placemark>")
    }

    fn document(placemarks: &[String]) -> XmlDocument {
        let body: String = placemarks.concat();
        KmlFacade::new()
            .parse_str(&format!("<kml><Document>{body}</Document></kml>"))
            .expect("测试文档应能解析")
    }

    fn renamer() -> DuplicateRenamer {
        DuplicateRenamer::new(AttributePath::new(["FARM", "PLOT"]).unwrap())
    }

    fn leaf_values(doc: &XmlDocument) -> Vec<Option<String>> {
        doc.elements_by_local_name(PLACEMARK_TAG)
            .into_iter()
            .map(|id| FieldIndex::build(doc, id).field("PLOT").map(|f| f.value.clone()))
            .collect()
    }

    #[test]
    fn duplicated_values_are_numbered_from_one() {
        let mut doc = document(&[
            placemark(&[("FARM", "F"), ("PLOT", "A")]),
            placemark(&[("FARM", "F"), ("PLOT", "A")]),
            placemark(&[("FARM", "F"), ("PLOT", "B")]),
        ]);
        let outcome = renamer().rename(&mut doc).unwrap();

        assert_eq!(
            outcome.report.get("F|A").map(|entries| entries.to_vec()),
            Some(vec![DuplicateEntry {
                name: "A".to_string(),
                count: 2,
                corrected: vec!["A - 1".to_string(), "A - 2".to_string()],
            }])
        );
        assert!(outcome.report.get("F|B").is_none());
        assert_eq!(outcome.total_duplicates, 1);
        assert_eq!(
            leaf_values(&doc),
            vec![
                Some("A - 1".to_string()),
                Some("A - 2".to_string()),
                Some("B".to_string())
            ]
        );
    }

    #[test]
    fn group_key_uses_non_leaf_attributes_for_grouping() {
        let path = AttributePath::new(["FARM", "ZONE", "PLOT"]).unwrap();
        let mut doc = document(&[
            placemark(&[("FARM", "F"), ("ZONE", "1"), ("PLOT", "A")]),
            placemark(&[("FARM", "F"), ("ZONE", "1"), ("PLOT", "A")]),
            placemark(&[("FARM", "F"), ("ZONE", "2"), ("PLOT", "A")]),
        ]);
        let outcome = DuplicateRenamer::new(path).rename(&mut doc).unwrap();

        assert_eq!(outcome.report.len(), 1);
        assert_eq!(
            outcome.report.get("F|1|A").map(|entries| entries.to_vec()),
            Some(vec![DuplicateEntry {
                name: "A".to_string(),
                count: 2,
                corrected: vec!["A - 1".to_string(), "A - 2".to_string()],
            }])
        );
        assert!(outcome.report.get("F|2|A").is_none());
    }

    #[test]
    fn placemarks_missing_any_field_are_left_untouched() {
        let mut doc = document(&[
            placemark(&[("FARM", "F"), ("PLOT", "A")]),
            placemark(&[("FARM", "  "), ("PLOT", "A")]),
            placemark(&[("PLOT", "A")]),
            placemark(&[("FARM", "F"), ("PLOT", "")]),
            placemark(&[("FARM", "F")]),
        ]);
        let outcome = renamer().rename(&mut doc).unwrap();

        assert!(outcome.report.is_empty());
        assert_eq!(outcome.scanned, 5);
        assert_eq!(outcome.skipped, 4);
        assert_eq!(
            leaf_values(&doc),
            vec![
                Some("A".to_string()),
                Some("A".to_string()),
                Some("A".to_string()),
                Some(String::new()),
                None
            ]
        );
    }

    #[test]
    fn leaf_values_are_compared_after_trimming() {
        let mut doc = document(&[
            placemark(&[("FARM", "F"), ("PLOT", " 7 ")]),
            placemark(&[("FARM", "F"), ("PLOT", "7")]),
            placemark(&[("FARM", "F"), ("PLOT", "7")]),
        ]);
        let outcome = renamer().rename(&mut doc).unwrap();

        let entries = outcome.report.get("F|7").expect("应当报告分组 F|7");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].count, 3);
        assert_eq!(entries[0].corrected, vec!["7 - 1", "7 - 2", "7 - 3"]);
        assert_eq!(outcome.renamed, 3);
        assert_eq!(outcome.total_duplicates, 1);
    }

    #[test]
    fn total_counts_distinct_duplicate_pairs_not_nodes() {
        let path = AttributePath::new(["FARM", "ZONE", "PLOT"]).unwrap();
        let mut doc = document(&[
            placemark(&[("FARM", "F"), ("ZONE", "1"), ("PLOT", "A")]),
            placemark(&[("FARM", "F"), ("ZONE", "1"), ("PLOT", "A")]),
            placemark(&[("FARM", "F"), ("ZONE", "1"), ("PLOT", "A")]),
            placemark(&[("FARM", "F"), ("ZONE", "2"), ("PLOT", "A")]),
            placemark(&[("FARM", "F"), ("ZONE", "2"), ("PLOT", "A")]),
        ]);
        let outcome = DuplicateRenamer::new(path).rename(&mut doc).unwrap();

        assert_eq!(outcome.total_duplicates, 2);
        assert_eq!(outcome.report.total_duplicates(), 2);
        assert_eq!(outcome.renamed, 5);
    }

    #[test]
    fn document_without_duplicates_is_unchanged() {
        let source = document(&[
            placemark(&[("FARM", "F"), ("PLOT", "A")]),
            placemark(&[("FARM", "F"), ("PLOT", "B")]),
            placemark(&[("FARM", "G"), ("PLOT", "A")]),
        ]);
        let mut doc = source.clone();
        let outcome = renamer().rename(&mut doc).unwrap();

        assert!(outcome.report.is_empty());
        assert_eq!(outcome.total_duplicates, 0);
        assert_eq!(doc, source);
    }

    #[test]
    fn rename_is_deterministic() {
        let placemarks = [
            placemark(&[("FARM", "F"), ("PLOT", "A")]),
            placemark(&[("FARM", "G"), ("PLOT", "B")]),
            placemark(&[("FARM", "F"), ("PLOT", "A")]),
            placemark(&[("FARM", "G"), ("PLOT", "B")]),
        ];
        let mut first = document(&placemarks);
        let mut second = document(&placemarks);
        let first_outcome = renamer().rename(&mut first).unwrap();
        let second_outcome = renamer().rename(&mut second).unwrap();

        assert_eq!(first, second);
        assert_eq!(first_outcome.report, second_outcome.report);
        let keys: Vec<&str> = first_outcome
            .report
            .iter()
            .map(|(key, _)| key.as_str())
            .collect();
        assert_eq!(keys, vec!["F|A", "G|B"]);
    }
}
