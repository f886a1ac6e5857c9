//! 告警推送 (Alert Sink)
//!
//! 至多一次投递: 推送失败只记录日志,事件丢弃,不重试,不阻塞流水线

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{Client, Event, MqttOptions, Packet, QoS, Transport};
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::error::SinkError;

/// 告警推送接口
pub trait AlertSink: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), SinkError>;
}

/// 未配置消息服务器时使用: 只写日志
#[derive(Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), SinkError> {
        info!("[ALERT] {} <- {}", topic, String::from_utf8_lossy(payload));
        Ok(())
    }
}

/// MQTT 推送: 网络事件循环运行在独立线程,与帧处理节奏无关
pub struct MqttSink {
    client: Client,
    closed: Arc<AtomicBool>,
}

/// 请求队列长度, 满了 try_publish 直接失败
const MQTT_REQUEST_CAPACITY: usize = 16;

impl MqttSink {
    pub fn connect(config: &MqttConfig) -> Result<Self, SinkError> {
        let broker = config
            .broker
            .clone()
            .ok_or_else(|| SinkError::Publish("MQTT_BROKER 未配置".to_string()))?;

        let mut options = MqttOptions::new(config.client_id.clone(), broker.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user.clone(), pass.clone());
        }
        if config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut connection) = Client::new(options, MQTT_REQUEST_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = closed.clone();
        let port = config.port;

        std::thread::Builder::new()
            .name("mqtt-network".to_string())
            .spawn(move || {
                info!("📡 MQTT 网络线程启动: {}:{}", broker, port);
                for notification in connection.iter() {
                    if closed_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            info!("✅ MQTT 已连接: {:?}", ack.code);
                        }
                        Ok(event) => debug!("MQTT 事件: {:?}", event),
                        Err(e) => {
                            warn!("⚠️ MQTT 连接错误: {}, 1秒后重连", e);
                            std::thread::sleep(Duration::from_secs(1));
                        }
                    }
                }
                info!("📡 MQTT 网络线程退出");
            })
            .map_err(|e| SinkError::Publish(format!("无法启动 MQTT 网络线程: {}", e)))?;

        Ok(Self { client, closed })
    }
}

impl AlertSink for MqttSink {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), SinkError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| SinkError::Publish(e.to_string()))
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        let _ = self.client.try_disconnect();
    }
}

/// 根据配置选择推送方式
pub fn sink_from_config(config: &MqttConfig) -> Arc<dyn AlertSink> {
    if config.broker.is_none() {
        warn!("⚠️ 未配置 MQTT_BROKER, 告警只写入日志");
        return Arc::new(LogSink);
    }
    match MqttSink::connect(config) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!("⚠️ MQTT 初始化失败: {}, 告警只写入日志", e);
            Arc::new(LogSink)
        }
    }
}
