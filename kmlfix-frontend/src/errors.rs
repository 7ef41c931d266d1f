use std::path::PathBuf;

use kmlfix_core::errors::ModelError;
use kmlfix_engine::errors::EngineError;
use kmlfix_io::IoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FixError {
    #[error("属性路径无效: {0}")]
    AttributePath(#[from] ModelError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("序列化重复报告失败: {0}")]
    Report(#[from] serde_json::Error),
    #[error("写入报告文件 {path:?} 失败: {source}")]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
