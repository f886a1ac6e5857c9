//! 运行控制: 生产者与消费者之间唯一共享的状态是三个原子标志

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::association::AssignmentPolicy;
use crate::config::{ConcurrencyMode, SentinelConfig};
use crate::detection::{FusionConfig, RequiredPpe};

/// 运行 / 暂停 / 停止 标志
#[derive(Debug, Default)]
pub struct ControlFlags {
    running: AtomicBool,
    paused: AtomicBool,
    stop: AtomicBool,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// 流水线参数 (由配置生成)
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub mode: ConcurrencyMode,
    pub fusion: FusionConfig,
    pub required: RequiredPpe,
    pub policy: AssignmentPolicy,
    pub detection_interval: Duration,
    pub alert_cooldown: Duration,
    pub alert_topic: String,
    pub frame_interval: Duration,
    pub pause_idle: Duration,
    pub read_retry_backoff: Duration,
    pub poll_timeout: Duration,
    pub join_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &SentinelConfig) -> Self {
        Self {
            mode: config.concurrency_mode,
            fusion: config.fusion_config(),
            required: config.required_ppe.clone(),
            policy: config.assignment_policy,
            detection_interval: config.detection_interval(),
            alert_cooldown: config.alert_cooldown(),
            alert_topic: config.mqtt.topic.clone(),
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            pause_idle: Duration::from_millis(config.pause_idle_ms),
            read_retry_backoff: Duration::from_millis(config.read_retry_backoff_ms),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            join_timeout: Duration::from_millis(config.join_timeout_ms),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&SentinelConfig::default())
    }
}
