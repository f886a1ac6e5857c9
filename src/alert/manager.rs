//! 告警管理 (Alert Manager)
//!
//! 冷却去重 → 生成告警事件 → 推送 + 写入最近告警环形缓冲
//!
//! 没有跨帧的人员身份, 冷却键默认是进程级的 "ppe-missing":
//! 冷却期内任何人的缺失都会被抑制。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::event::AlertEvent;
use super::sink::AlertSink;
use crate::association::PersonObservation;
use crate::error::SinkError;

/// 默认冷却时间
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// 最近告警缓冲容量
pub const HISTORY_CAPACITY: usize = 50;

/// 进程级冷却键
pub const GLOBAL_ALERT_KEY: &str = "ppe-missing";

pub struct AlertManager {
    sink: Arc<dyn AlertSink>,
    topic: String,
    cooldown: Duration,
    last_emitted: HashMap<String, Instant>,
    history: VecDeque<AlertEvent>,
    publish_failures: u64,
}

impl AlertManager {
    pub fn new(sink: Arc<dyn AlertSink>, topic: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            sink,
            topic: topic.into(),
            cooldown,
            last_emitted: HashMap::new(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            publish_failures: 0,
        }
    }

    /// 观测结果对应的冷却键
    pub fn alert_key(&self, _observation: &PersonObservation) -> &'static str {
        GLOBAL_ALERT_KEY
    }

    /// 冷却判定: 无缺失 / 冷却中 → None, 否则生成事件并记录发出时间
    pub fn consider(
        &mut self,
        observation: &PersonObservation,
        now: Instant,
    ) -> Option<AlertEvent> {
        if observation.missing.is_empty() {
            return None;
        }

        let key = self.alert_key(observation);
        if let Some(last) = self.last_emitted.get(key) {
            if now.saturating_duration_since(*last) < self.cooldown {
                return None;
            }
        }

        let event = AlertEvent::from_observation(observation)?;
        self.last_emitted.insert(key.to_string(), now);
        Some(event)
    }

    /// 推送 (失败即丢弃) 并写入最近告警
    pub fn emit(&mut self, event: &AlertEvent) {
        let delivered = event
            .to_json()
            .map_err(SinkError::from)
            .and_then(|payload| self.sink.publish(&self.topic, payload.as_bytes()));

        match delivered {
            Ok(()) => info!("🚨 告警已发送: {}", event.description()),
            Err(e) => {
                self.publish_failures += 1;
                warn!("⚠️ 告警推送失败, 已丢弃 ({}): {}", event.id(), e);
            }
        }

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(event.clone());
    }

    /// 处理一次推理的全部观测结果, 返回本次发出的告警
    pub fn process(
        &mut self,
        observations: &[PersonObservation],
        now: Instant,
    ) -> Vec<AlertEvent> {
        let mut emitted = Vec::new();
        for observation in observations {
            if let Some(event) = self.consider(observation, now) {
                self.emit(&event);
                emitted.push(event);
            }
        }
        emitted
    }

    /// 最近告警, 旧的在前
    pub fn history(&self) -> impl Iterator<Item = &AlertEvent> {
        self.history.iter()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::detection::{BBox, PpeItem};
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// 记录所有推送内容的测试用 sink
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub published: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    impl AlertSink for RecordingSink {
        fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Publish("broker unreachable".to_string()));
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), String::from_utf8_lossy(payload).to_string()));
            Ok(())
        }
    }

    fn missing_gloves() -> PersonObservation {
        PersonObservation {
            bbox: BBox::new(10., 10., 50., 100.),
            confidence: 0.9,
            found: [PpeItem::SafetyVest].into_iter().collect::<BTreeSet<_>>(),
            missing: vec![PpeItem::Gloves],
        }
    }

    #[test]
    fn test_cooldown_suppresses_repeats() {
        let sink = Arc::new(RecordingSink::default());
        let mut manager = AlertManager::new(sink.clone(), "alerts", DEFAULT_COOLDOWN);
        let t0 = Instant::now();

        assert!(manager.consider(&missing_gloves(), t0).is_some());
        assert!(manager
            .consider(&missing_gloves(), t0 + Duration::from_secs(3))
            .is_none());
        assert!(manager
            .consider(&missing_gloves(), t0 + Duration::from_secs(11))
            .is_some());
    }

    #[test]
    fn test_compliant_person_never_alerts() {
        let mut manager =
            AlertManager::new(Arc::new(RecordingSink::default()), "alerts", DEFAULT_COOLDOWN);
        let mut observation = missing_gloves();
        observation.missing.clear();
        assert!(manager.consider(&observation, Instant::now()).is_none());
    }

    #[test]
    fn test_zero_cooldown_polls_every_tick() {
        let mut manager =
            AlertManager::new(Arc::new(RecordingSink::default()), "alerts", Duration::ZERO);
        let t0 = Instant::now();
        assert!(manager.consider(&missing_gloves(), t0).is_some());
        assert!(manager.consider(&missing_gloves(), t0).is_some());
    }

    #[test]
    fn test_process_publishes_once_per_event() {
        let sink = Arc::new(RecordingSink::default());
        let mut manager = AlertManager::new(sink.clone(), "alerts", DEFAULT_COOLDOWN);

        // 同一次推理两个人都缺失, 全局冷却键只放行第一个
        let emitted = manager.process(&[missing_gloves(), missing_gloves()], Instant::now());
        assert_eq!(emitted.len(), 1);

        let published = sink.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "alerts");
        assert!(published[0].1.contains("\"missing_ppe\":[\"gloves\"]"));
        assert_eq!(manager.history().count(), 1);
    }

    #[test]
    fn test_publish_failure_is_dropped_not_retried() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let mut manager = AlertManager::new(sink, "alerts", DEFAULT_COOLDOWN);
        let t0 = Instant::now();

        assert_eq!(manager.process(&[missing_gloves()], t0).len(), 1);
        assert_eq!(manager.publish_failures(), 1);
        // 失败也计入冷却, 不会立即重发
        assert!(manager
            .process(&[missing_gloves()], t0 + Duration::from_secs(1))
            .is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut manager =
            AlertManager::new(Arc::new(RecordingSink::default()), "alerts", Duration::ZERO);
        let t0 = Instant::now();
        let mut first_id = None;
        for i in 0..(HISTORY_CAPACITY + 5) {
            let events = manager.process(&[missing_gloves()], t0 + Duration::from_millis(i as u64));
            if i == 0 {
                first_id = Some(events[0].id().to_string());
            }
        }
        assert_eq!(manager.history().count(), HISTORY_CAPACITY);
        assert!(manager
            .history()
            .all(|e| Some(e.id().to_string()) != first_id));

        manager.clear_history();
        assert_eq!(manager.history().count(), 0);
    }
}
