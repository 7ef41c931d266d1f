pub mod cli;
pub mod errors;
pub mod pipeline;

use errors::FixError;
use kmlfix_config::AppConfig;
use pipeline::FixJob;
use tracing::info;

pub use pipeline::{FixOutcome, process_and_fix, run_job};

/// 执行配置中的任务并打印报告，错误原样返回给调用方决定退出码。
pub fn run_configured(config: &AppConfig) -> Result<FixOutcome, FixError> {
    let job = FixJob::from_config(&config.job)?;
    info!(
        input = %job.input.display(),
        output_dir = %job.output_dir.display(),
        attributes = ?job.path.names(),
        "开始修正 KML 重复名称"
    );
    let outcome = run_job(&job)?;
    cli::print_report(&outcome);
    Ok(outcome)
}
