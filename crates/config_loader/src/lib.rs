//! # Config Loader
//!
//! 配置加载与解析模块。
//!
//! 负责：
//! - 解析 TOML/JSON 配置文件
//! - 校验配置合法性
//! - 生成 `TrafficConfig`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("traffic.toml")).unwrap();
//! println!("sampling resolution: {}", config.sampling_resolution);
//! ```

mod parser;
mod validator;

pub use contracts::TrafficConfig;
pub use parser::ConfigFormat;

use contracts::TrafficError;
use std::path::Path;

/// 配置加载器
///
/// 提供从文件或字符串加载配置的静态方法。
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从文件路径加载配置
    ///
    /// 根据文件扩展名自动检测格式 (.toml / .json)。
    ///
    /// # Errors
    /// - 文件读取失败
    /// - 格式不支持
    /// - 解析失败
    /// - 校验失败
    pub fn load_from_path(path: &Path) -> Result<TrafficConfig, TrafficError> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content, format)
    }

    /// 从字符串加载配置
    ///
    /// # Errors
    /// - 解析失败
    /// - 校验失败
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<TrafficConfig, TrafficError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }

    /// 将 TrafficConfig 序列化为 TOML 字符串
    pub fn to_toml(config: &TrafficConfig) -> Result<String, TrafficError> {
        toml::to_string_pretty(config)
            .map_err(|e| TrafficError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// 将 TrafficConfig 序列化为 JSON 字符串
    pub fn to_json(config: &TrafficConfig) -> Result<String, TrafficError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| TrafficError::config_parse(format!("JSON serialize error: {e}")))
    }

    /// 根据文件扩展名推断配置格式
    fn detect_format(path: &Path) -> Result<ConfigFormat, TrafficError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            TrafficError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            TrafficError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }
}
