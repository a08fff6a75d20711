//! 配置解析模块
//!
//! TOML 为主，JSON 按扩展名识别。解析只负责反序列化，合法性检查在 validator。

use std::path::Path;

use contracts::{ContractError, PipelineConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// 扩展名不区分大小写
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("toml") {
            Some(Self::Toml)
        } else if ext.eq_ignore_ascii_case("json") {
            Some(Self::Json)
        } else {
            None
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
        }
    }
}

/// Deserialize a `PipelineConfig`; the source error is kept for `{:#}` chains
pub fn parse(content: &str, format: ConfigFormat) -> Result<PipelineConfig, ContractError> {
    let parsed: Result<PipelineConfig, BoxError> = match format {
        ConfigFormat::Toml => toml::from_str(content).map_err(BoxError::from),
        ConfigFormat::Json => serde_json::from_str(content).map_err(BoxError::from),
    };

    parsed.map_err(|e| ContractError::ConfigParse {
        message: format!("{} parse error: {e}", format.name()),
        source: Some(e),
    })
}
