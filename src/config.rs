//! 配置 - 通过JSON文件调整参数, 命令行可覆盖

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::association::AssignmentPolicy;
use crate::detection::fusion::{FusionConfig, DEFAULT_IOU_THRESHOLD};
use crate::detection::{join_labels, RequiredPpe};
use crate::error::ConfigError;

/// 并发模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyMode {
    /// 采集+推理在独立线程
    #[default]
    Threaded,
    /// 单循环: 每次轮询在调用线程上执行一次采集
    Inline,
}

impl FromStr for ConcurrencyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "threaded" => Ok(ConcurrencyMode::Threaded),
            "inline" => Ok(ConcurrencyMode::Inline),
            other => Err(ConfigError::Invalid(format!("未知的并发模式: {}", other))),
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// 转换为 tracing 过滤器字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MQTT 推送配置 (服务器与凭据优先来自环境变量)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: Option<String>,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub tls: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: None,
            port: 8883,
            topic: "alerts".to_string(),
            client_id: "serbot_inference".to_string(),
            username: None,
            password: None,
            tls: true,
        }
    }
}

impl MqttConfig {
    /// 读取 MQTT_BROKER / MQTT_PORT / MQTT_TOPIC / MQTT_USERNAME / MQTT_PASSWORD
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(broker) = get("MQTT_BROKER") {
            self.broker = Some(broker);
        }
        if let Some(port) = get("MQTT_PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("MQTT_PORT 不是合法端口: {}", port)))?;
        }
        if let Some(topic) = get("MQTT_TOPIC") {
            self.topic = topic;
        }
        if let Some(user) = get("MQTT_USERNAME") {
            self.username = Some(user);
        }
        if let Some(pass) = get("MQTT_PASSWORD") {
            self.password = Some(pass);
        }
        Ok(())
    }
}

/// 系统配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    // === 检测参数 ===
    pub confidence_threshold: f32, // 检测置信度阈值
    pub iou_threshold: f32,        // 人员框去重 IoU 阈值
    pub required_ppe: RequiredPpe, // 本次会话必需的 PPE
    pub assignment_policy: AssignmentPolicy,
    pub provider_replays: Vec<PathBuf>, // 回放模型文件 (每个文件一个模型)

    // === 采集参数 ===
    pub camera_index: usize,
    pub source_dir: PathBuf,
    pub loop_source: bool,          // 输入播放完后从头开始
    pub frame_interval_ms: u64,     // 采集帧间隔
    pub read_retry_backoff_ms: u64, // 读帧失败后的退避

    // === 调度参数 ===
    pub detection_interval_secs: f64, // 推理间隔
    pub concurrency_mode: ConcurrencyMode,
    pub pause_idle_ms: u64,
    pub poll_timeout_ms: u64,
    pub join_timeout_ms: u64,

    // === 告警参数 ===
    pub alert_cooldown_secs: f64,
    pub mqtt: MqttConfig,
    pub database_path: PathBuf,
    pub ingress_addr: String,

    // === 显示与日志 ===
    pub font_path: Option<PathBuf>,
    pub log_level: LogLevel,
    pub log_dir: Option<PathBuf>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            required_ppe: RequiredPpe::full(),
            assignment_policy: AssignmentPolicy::OverlapRatio,
            provider_replays: Vec::new(),

            camera_index: 0,
            source_dir: PathBuf::from("frames"),
            loop_source: false,
            frame_interval_ms: 33,
            read_retry_backoff_ms: 500,

            detection_interval_secs: 5.0,
            concurrency_mode: ConcurrencyMode::Threaded,
            pause_idle_ms: 100,
            poll_timeout_ms: 1500,
            join_timeout_ms: 1000,

            alert_cooldown_secs: 10.0,
            mqtt: MqttConfig::default(),
            database_path: PathBuf::from("alerts.db"),
            ingress_addr: "127.0.0.1:5001".to_string(),

            font_path: None,
            log_level: LogLevel::Info,
            log_dir: None,
        }
    }
}

impl SentinelConfig {
    /// 从JSON文件加载配置, 文件不存在时写入默认配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("📝 配置文件不存在, 创建默认配置: {}", path.display());
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "置信度阈值必须在 [0, 1] 内: {}",
                self.confidence_threshold
            )));
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "IoU 阈值必须在 (0, 1] 内: {}",
                self.iou_threshold
            )));
        }
        if !(self.detection_interval_secs >= 0.0) || !self.detection_interval_secs.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "推理间隔不能为负: {}",
                self.detection_interval_secs
            )));
        }
        if !(self.alert_cooldown_secs >= 0.0) || !self.alert_cooldown_secs.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "告警冷却时间不能为负: {}",
                self.alert_cooldown_secs
            )));
        }
        if self.required_ppe.is_empty() {
            return Err(ConfigError::Invalid("必需 PPE 列表为空".to_string()));
        }
        Ok(())
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.detection_interval_secs).unwrap_or(Duration::ZERO)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.alert_cooldown_secs).unwrap_or(Duration::ZERO)
    }

    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            iou_threshold: self.iou_threshold,
            confidence_threshold: self.confidence_threshold,
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前配置:");
        info!("  检测置信度: {:.2}", self.confidence_threshold);
        info!("  必需PPE: {}", join_labels(self.required_ppe.items()));
        info!("  分配策略: {}", self.assignment_policy);
        info!("  推理间隔: {:.1}s", self.detection_interval_secs);
        info!("  告警冷却: {:.1}s", self.alert_cooldown_secs);
        info!("  并发模式: {:?}", self.concurrency_mode);
        match &self.mqtt.broker {
            Some(broker) => info!("  MQTT: {}:{} ({})", broker, self.mqtt.port, self.mqtt.topic),
            None => warn!("  MQTT: 未配置"),
        }
    }
}
