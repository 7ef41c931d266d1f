use std::path::PathBuf;

use clap::Parser;
use kmlfix_config::{AppConfig, ConfigError};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// 修正 KML 中同一分组内重复的 placemark 名称。
#[derive(Debug, Parser)]
#[command(name = "kmlfix", version)]
struct Args {
    /// 配置文件路径（默认读取 `KMLFIX_CONFIG` 或 `./config/default.toml`）
    #[arg(long)]
    config: Option<PathBuf>,
    /// 输入 KML 文件
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// 输出目录
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// 分组属性，可重复；最后一个为去重字段
    #[arg(short = 'a', long = "attribute")]
    attributes: Vec<String>,
    /// 只输出报告，不写出 KML
    #[arg(long)]
    dry_run: bool,
    /// 额外把报告写成 JSON 文件
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let mut config = load_configuration(args.config.clone());
    apply_overrides(&mut config, &args);
    init_logging(&config);
    info!("启动 kmlfix");

    if let Err(err) = kmlfix_frontend::run_configured(&config) {
        error!(error = %err, "处理 KML 文件失败");
        std::process::exit(1);
    }
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(input) = &args.input {
        config.job.input = input.clone();
    }
    if let Some(output_dir) = &args.output_dir {
        config.job.output_dir = output_dir.clone();
    }
    if !args.attributes.is_empty() {
        config.job.attributes = args.attributes.clone();
    }
    if args.dry_run {
        config.job.dry_run = true;
    }
    if let Some(report) = &args.report {
        config.job.report_path = Some(report.clone());
    }
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
