// 错误处理模块

use thiserror::Error;

/// 采集错误: 设备打开/读帧失败,对当前运行是致命的
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("无法打开视频源 {source_name}: {reason}")]
    Open { source_name: String, reason: String },

    #[error("读取帧失败: {0}")]
    Read(String),

    #[error("视频流已结束")]
    EndOfStream,
}

/// 单个检测模型在单帧上的失败,只影响本次融合
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("模型 {provider} 推理失败: {reason}")]
    Inference { provider: String, reason: String },

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("检测结果解析错误: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 告警推送失败 (网络/认证),事件直接丢弃
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("告警推送失败: {0}")]
    Publish(String),

    #[error("告警序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 告警确认请求校验失败,不会写库
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("缺少必填字段: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("请求体不是合法 JSON: {0}")]
    InvalidJson(String),

    #[error("请求体不是 JSON 对象")]
    NotAnObject,
}

/// 持久化失败,告警不视为已记录
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("数据库连接锁已毒化")]
    Poisoned,

    #[error("后台写库任务失败: {0}")]
    Task(String),
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("未知的 PPE 类别: {0}")]
    UnknownPpe(String),

    #[error("未知的分配策略: {0}")]
    UnknownPolicy(String),

    #[error("无效参数: {0}")]
    Invalid(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
