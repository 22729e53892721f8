//! 配置解析：TOML / JSON

use contracts::{TrafficConfig, TrafficError};

/// 支持的配置格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// 根据扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "toml" => Some(ConfigFormat::Toml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }
}

/// 解析配置字符串
pub fn parse(content: &str, format: ConfigFormat) -> Result<TrafficConfig, TrafficError> {
    match format {
        ConfigFormat::Toml => toml::from_str(content)
            .map_err(|e| TrafficError::config_parse(format!("TOML parse error: {e}"))),
        ConfigFormat::Json => serde_json::from_str(content)
            .map_err(|e| TrafficError::config_parse(format!("JSON parse error: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("JSON"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config = parse("", ConfigFormat::Toml).unwrap();
        assert_eq!(config.sampling_resolution, 1.0);
        assert_eq!(config.batch_interval_ms, 10);
    }

    #[test]
    fn test_bad_toml_reports_parse_error() {
        let result = parse("sampling_resolution = [", ConfigFormat::Toml);
        assert!(matches!(result, Err(TrafficError::ConfigParse { .. })));
    }
}
