use std::fmt;

use serde::Serialize;

use crate::alert::event::TIME_FORMAT;
use crate::association::PersonObservation;
use crate::detection::{join_labels, Frame};

/// 流水线状态, 只由调度器的控制操作修改
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Stopped,
    Running,
    Paused,
}

/// 状态指示 (界面显示)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StatusIndicator {
    Running,
    Paused,
    #[default]
    Stopped,
    Error,
}

impl fmt::Display for StatusIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StatusIndicator::Running => "🟢 Running",
            StatusIndicator::Paused => "🟡 Paused",
            StatusIndicator::Stopped => "⚪ Stopped",
            StatusIndicator::Error => "🔴 Error",
        };
        f.write_str(text)
    }
}

/// 单人检测记录 (显示 + CSV 报表)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionRecord {
    pub timestamp: String,
    pub person_location: String,
    #[serde(rename = "missing_PPE")]
    pub missing_ppe: String,
    pub alert: bool,
}

impl DetectionRecord {
    pub const CSV_HEADER: &'static str = "timestamp,person_location,missing_PPE,alert";

    pub fn from_observation(observation: &PersonObservation, at: chrono::DateTime<chrono::Local>) -> Self {
        Self {
            timestamp: at.format(TIME_FORMAT).to_string(),
            person_location: observation.bbox.to_string(),
            missing_ppe: join_labels(&observation.missing),
            alert: !observation.missing.is_empty(),
        }
    }

    /// CSV 行 (含逗号的字段加引号)
    pub fn csv_row(&self) -> String {
        format!(
            "{},{},{},{}",
            csv_field(&self.timestamp),
            csv_field(&self.person_location),
            csv_field(&self.missing_ppe),
            if self.alert { "Yes" } else { "No" }
        )
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// 队列记录 (生产者 → 消费者)
#[derive(Debug, Clone)]
pub enum PipelineRecord {
    Frame(Frame),
    Logs(Vec<String>),
    Detections(Vec<DetectionRecord>),
    Error(String),
    Status(StatusIndicator),
}

/// 生产者每次迭代产出的一组记录, 作为一个整体入队或丢弃
pub type RecordBatch = Vec<PipelineRecord>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BBox, PpeItem};
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    #[test]
    fn test_detection_record_csv() {
        let observation = PersonObservation {
            bbox: BBox::new(10., 10., 50., 100.),
            confidence: 0.9,
            found: BTreeSet::new(),
            missing: vec![PpeItem::SafetyVest, PpeItem::Gloves],
        };
        let at = chrono::Local.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let record = DetectionRecord::from_observation(&observation, at);

        assert_eq!(record.timestamp, "2024-05-01 08:30:00");
        assert!(record.alert);
        assert_eq!(
            record.csv_row(),
            "2024-05-01 08:30:00,\"[10,10,50,100]\",\"safety-vest, gloves\",Yes"
        );
    }

    #[test]
    fn test_compliant_record() {
        let observation = PersonObservation {
            bbox: BBox::new(0., 0., 5., 5.),
            confidence: 0.7,
            found: [PpeItem::Gloves].into_iter().collect(),
            missing: vec![],
        };
        let record = DetectionRecord::from_observation(&observation, chrono::Local::now());
        assert_eq!(record.missing_ppe, "None");
        assert!(record.csv_row().ends_with(",None,No"));
    }
}
