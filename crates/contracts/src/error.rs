//! 错误分层定义
//!
//! 按来源分层：config / simulator / map / pipeline

use thiserror::Error;

use crate::{ActorId, Location};

/// 统一错误类型
#[derive(Debug, Error)]
pub enum TrafficError {
    // ===== 配置错误 =====
    /// 配置解析错误
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// 配置校验错误
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== 仿真器错误 =====
    /// Actor 已销毁或句柄失效
    #[error("actor not alive: {actor_id}")]
    DeadActor { actor_id: ActorId },

    /// RPC 传输层错误
    #[error("simulator transport error: {message}")]
    Transport { message: String },

    // ===== 地图错误 =====
    /// 道路数据缺失（变道邻居查询失败）
    #[error("missing road data near ({:.1}, {:.1}, {:.1})", .location.x, .location.y, .location.z)]
    MissingRoadData { location: Location },

    /// 地图为空或位置不在地图内
    #[error("location outside map coverage")]
    OutsideMap,

    // ===== 管线错误 =====
    /// 路点缓冲为空（防御性，正常不可达）
    #[error("empty waypoint buffer for actor {actor_id}")]
    EmptyBuffer { actor_id: ActorId },

    /// 管线已停止，阻塞调用立即返回
    #[error("pipeline shut down")]
    Shutdown,

    // ===== 通用错误 =====
    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 其他错误
    #[error("{0}")]
    Other(String),
}

impl TrafficError {
    /// 创建配置解析错误
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// 创建配置校验错误
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建传输层错误
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TrafficError>;
