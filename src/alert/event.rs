use serde::{Deserialize, Serialize};

use crate::association::PersonObservation;
use crate::detection::{join_labels, PpeItem};

/// 告警时间格式
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 告警级别 (与前端卡片样式对应)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Critical,
    Warning,
    Info,
}

/// 优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// 告警事件: 只能由缺失PPE的观测结果构造,发出后不可修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    id: String,
    #[serde(rename = "type")]
    alert_type: AlertType,
    icon: String,
    title: String,
    time: String,
    description: String,
    priority: Priority,
    person_box: [i32; 4],
    missing_ppe: Vec<PpeItem>,
}

impl AlertEvent {
    /// 缺失列表为空时返回 None
    pub fn from_observation(observation: &PersonObservation) -> Option<Self> {
        if observation.missing.is_empty() {
            return None;
        }
        Some(Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_type: AlertType::Critical,
            icon: "⚠️".to_string(),
            title: "CRITICAL: PPE Missing".to_string(),
            time: chrono::Local::now().format(TIME_FORMAT).to_string(),
            description: format!(
                "Person at {} is missing: {}",
                observation.bbox,
                join_labels(&observation.missing)
            ),
            priority: Priority::High,
            person_box: observation.bbox.to_pixels(),
            missing_ppe: observation.missing.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn alert_type(&self) -> AlertType {
        self.alert_type
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn person_box(&self) -> [i32; 4] {
        self.person_box
    }

    pub fn missing_ppe(&self) -> &[PpeItem] {
        &self.missing_ppe
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
