/// 告警系统 (Alert System)
///
/// - Event:   告警事件与推送负载
/// - Manager: 冷却去重 + 最近告警
/// - Sink:    推送通道 (MQTT / 日志)
pub mod event;
pub mod manager;
pub mod sink;

pub use event::{AlertEvent, AlertType, Priority};
pub use manager::{AlertManager, DEFAULT_COOLDOWN, GLOBAL_ALERT_KEY, HISTORY_CAPACITY};
pub use sink::{sink_from_config, AlertSink, LogSink, MqttSink};
