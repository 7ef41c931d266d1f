use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use kmlfix_config::JobConfig;
use kmlfix_core::placemark::AttributePath;
use kmlfix_core::report::DuplicatesReport;
use kmlfix_engine::renamer::DuplicateRenamer;
use kmlfix_io::{CORRECTED_SUFFIX, DocumentLoader, DocumentSaver, KmlFacade, corrected_output_path};
use tempfile::NamedTempFile;
use tracing::{error, info};

use crate::cli;
use crate::errors::FixError;

/// 一次修正任务的全部参数。
#[derive(Debug, Clone)]
pub struct FixJob {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub path: AttributePath,
    pub output_suffix: String,
    pub dry_run: bool,
    pub report_path: Option<PathBuf>,
}

impl FixJob {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, path: AttributePath) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            path,
            output_suffix: CORRECTED_SUFFIX.to_string(),
            dry_run: false,
            report_path: None,
        }
    }

    pub fn from_config(config: &JobConfig) -> Result<Self, FixError> {
        let path = AttributePath::new(config.attributes.iter().cloned())?;
        Ok(Self {
            input: config.input.clone(),
            output_dir: config.output_dir.clone(),
            path,
            output_suffix: config.output_suffix.clone(),
            dry_run: config.dry_run,
            report_path: config.report_path.clone(),
        })
    }

    #[inline]
    pub fn output_path(&self) -> PathBuf {
        corrected_output_path(&self.input, &self.output_dir, &self.output_suffix)
    }
}

/// 修正结果汇总。
#[derive(Debug, Clone, Default)]
pub struct FixOutcome {
    pub report: DuplicatesReport,
    pub total_duplicates: usize,
    pub renamed: usize,
    pub scanned: usize,
    pub skipped: usize,
    /// 实际写出的 KML 路径；演练模式下为 `None`。
    pub output: Option<PathBuf>,
}

/// 读取、修正并写出 KML。报告先暂存到目标目录的临时文件，KML 写出后再改名就位；
/// 除最后的改名外，任何一步失败都不会留下输出。
pub fn run_job(job: &FixJob) -> Result<FixOutcome, FixError> {
    let facade = KmlFacade::new();
    let mut document = facade.load(&job.input)?;
    info!(path = %job.input.display(), "已加载 KML 文档");

    let renamer = DuplicateRenamer::new(job.path.clone());
    let renamed = renamer.rename(&mut document)?;

    let staged_report = match &job.report_path {
        Some(path) => Some(stage_report(path, &serde_json::to_string_pretty(&renamed.report)?)?),
        None => None,
    };

    let output = if job.dry_run {
        info!("演练模式，跳过写出 KML");
        None
    } else {
        let output = job.output_path();
        facade.save(&document, &output)?;
        info!(path = %output.display(), "已写出修正后的 KML");
        Some(output)
    };

    if let (Some(path), Some(staged)) = (&job.report_path, staged_report) {
        staged.persist(path).map_err(|err| FixError::ReportWrite {
            path: path.clone(),
            source: err.error,
        })?;
        info!(path = %path.display(), "已写出重复报告");
    }

    Ok(FixOutcome {
        report: renamed.report,
        total_duplicates: renamed.total_duplicates,
        renamed: renamed.renamed,
        scanned: renamed.scanned,
        skipped: renamed.skipped,
        output,
    })
}

/// 顶层错误边界：成功时打印报告并返回；失败时记录诊断信息并返回空报告，从不向上抛出。
pub fn process_and_fix(job: &FixJob) -> DuplicatesReport {
    match run_job(job) {
        Ok(outcome) => {
            cli::print_report(&outcome);
            outcome.report
        }
        Err(err) => {
            error!(path = %job.input.display(), error = %err, "处理 KML 文件失败");
            DuplicatesReport::new()
        }
    }
}

/// 在报告的目标目录中写好临时文件；丢弃返回值即删除。
fn stage_report(path: &Path, json: &str) -> Result<NamedTempFile, FixError> {
    let report_error = |source| FixError::ReportWrite {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).map_err(report_error)?;
            parent
        }
        None => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(parent).map_err(report_error)?;
    staged.write_all(json.as_bytes()).map_err(report_error)?;
    staged.flush().map_err(report_error)?;
    Ok(staged)
}
