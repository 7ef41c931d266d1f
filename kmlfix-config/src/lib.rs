use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub job: JobConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `KMLFIX_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("KMLFIX_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 单次修正任务：输入文件、输出目录与分组属性路径（最后一项为去重字段）。
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    #[serde(default = "JobConfig::default_input")]
    pub input: PathBuf,
    #[serde(default = "JobConfig::default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "JobConfig::default_attributes")]
    pub attributes: Vec<String>,
    #[serde(default = "JobConfig::default_output_suffix")]
    pub output_suffix: String,
    /// 只生成报告，不写出 KML。
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl JobConfig {
    fn default_input() -> PathBuf {
        PathBuf::from("1.kml")
    }

    fn default_output_dir() -> PathBuf {
        PathBuf::from("./output")
    }

    fn default_attributes() -> Vec<String> {
        vec![
            "NOME_FAZ".to_string(),
            "ZONA".to_string(),
            "TALHAO".to_string(),
        ]
    }

    fn default_output_suffix() -> String {
        " - Corrigido".to_string()
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            input: Self::default_input(),
            output_dir: Self::default_output_dir(),
            attributes: Self::default_attributes(),
            output_suffix: Self::default_output_suffix(),
            dry_run: false,
            report_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_returned_when_file_missing() {
        let cfg = AppConfig::discover().expect("discover should succeed");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.job.input, PathBuf::from("1.kml"));
        assert_eq!(cfg.job.output_dir, PathBuf::from("./output"));
        assert_eq!(cfg.job.attributes, vec!["NOME_FAZ", "ZONA", "TALHAO"]);
        assert_eq!(cfg.job.output_suffix, " - Corrigido");
        assert!(!cfg.job.dry_run);
        assert!(cfg.job.report_path.is_none());
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [job]
            input = "dados/fazendas.kml"
            output_dir = "../saida"
            attributes = ["FAZENDA", "TALHAO"]
            dry_run = true
            report_path = "../saida/relatorio.json"
            "#
        )
        .unwrap();

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.job.input, PathBuf::from("dados/fazendas.kml"));
        assert_eq!(cfg.job.attributes, vec!["FAZENDA", "TALHAO"]);
        assert_eq!(cfg.job.output_suffix, " - Corrigido");
        assert!(cfg.job.dry_run);
        assert_eq!(
            cfg.job
                .report_path
                .as_deref()
                .map(|p| p.to_string_lossy().to_string()),
            Some("../saida/relatorio.json".to_string())
        );
    }

    #[test]
    fn invalid_toml_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[job]\nattributes = \"not-a-list\"").unwrap();
        let err = AppConfig::from_file(file.path()).expect_err("should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
