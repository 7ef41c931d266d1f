use std::fs;
use std::path::{Path, PathBuf};

use kmlfix_core::xml::XmlDocument;
use thiserror::Error;
use tracing::debug;

mod reader;
mod writer;

/// 修正后文件名的固定后缀（位于扩展名之前）。
pub const CORRECTED_SUFFIX: &str = " - Corrigido";
pub const KML_EXTENSION: &str = "kml";

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create directory {path:?}: {source}")]
    CreateDirError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
    #[error("failed to serialize document: {0}")]
    SerializeError(String),
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<XmlDocument, IoError>;
}

pub trait DocumentSaver {
    fn save(&self, document: &XmlDocument, path: &Path) -> Result<(), IoError>;
}

pub struct KmlFacade;

impl KmlFacade {
    pub fn new() -> Self {
        Self
    }

    /// 解析内存中的 KML 文本。开头的 BOM 会被忽略。
    pub fn parse_str(&self, source: &str) -> Result<XmlDocument, IoError> {
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);
        reader::KmlParser::new(source)
            .parse()
            .map_err(|err| IoError::InvalidDocument(err.to_string()))
    }

    pub fn to_string(&self, document: &XmlDocument) -> Result<String, IoError> {
        writer::serialize(document)
    }
}

impl Default for KmlFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentLoader for KmlFacade {
    fn load(&self, path: &Path) -> Result<XmlDocument, IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = data.len(), "已读取 KML 文件");
        self.parse_str(&data)
    }
}

impl DocumentSaver for KmlFacade {
    /// 先完成序列化再落盘，序列化失败时不会创建任何文件。
    fn save(&self, document: &XmlDocument, path: &Path) -> Result<(), IoError> {
        let content = self.to_string(document)?;
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| IoError::CreateDirError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, content).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "已写入 KML 文件");
        Ok(())
    }
}

/// 由输入文件名推导输出路径：取文件名第一个 `.` 之前的部分，追加后缀与 `.kml`。
pub fn corrected_output_path(input: &Path, output_dir: &Path, suffix: &str) -> PathBuf {
    let file_name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = match file_name.split_once('.') {
        Some((base, _)) => base,
        None => file_name.as_str(),
    };
    output_dir.join(format!("{base}{suffix}.{KML_EXTENSION}"))
}
