use tracing::{info, warn};

use crate::pipeline::FixOutcome;

/// 生成控制台输出：重复报告（JSON）与重复总数。
pub fn render_report(outcome: &FixOutcome) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string_pretty(&outcome.report)?;
    let mut text = format!("按父级属性分组的重复地块:\n{json}\n");
    text.push_str(&format!(
        "已修正的重复地块名称总数: {}",
        outcome.total_duplicates
    ));
    if let Some(path) = &outcome.output {
        text.push_str(&format!("\n输出文件: {}", path.display()));
    }
    Ok(text)
}

pub fn print_report(outcome: &FixOutcome) {
    info!(
        scanned = outcome.scanned,
        skipped = outcome.skipped,
        renamed = outcome.renamed,
        total_duplicates = outcome.total_duplicates,
        "KML 修正完成"
    );
    match render_report(outcome) {
        Ok(text) => println!("{text}"),
        Err(err) => warn!(error = %err, "无法输出重复报告"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kmlfix_core::placemark::GroupKey;
    use kmlfix_core::report::{DuplicateEntry, DuplicatesReport};

    #[test]
    fn empty_report_renders_as_empty_object() {
        let text = render_report(&FixOutcome::default()).unwrap();
        assert!(text.contains("{}"));
        assert!(text.ends_with("总数: 0"));
    }

    #[test]
    fn report_lists_groups_and_total() {
        let mut report = DuplicatesReport::new();
        report.insert(
            GroupKey::from("Boa Vista|1|T1"),
            vec![DuplicateEntry {
                name: "T1".to_string(),
                count: 2,
                corrected: vec!["T1 - 1".to_string(), "T1 - 2".to_string()],
            }],
        );
        let outcome = FixOutcome {
            report,
            total_duplicates: 1,
            renamed: 2,
            ..FixOutcome::default()
        };
        let text = render_report(&outcome).unwrap();
        assert!(text.contains("\"Boa Vista|1|T1\""));
        assert!(text.contains("\"T1 - 2\""));
        assert!(text.contains("总数: 1"));
    }
}
