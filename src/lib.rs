// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod alert; // 告警: 冷却去重 + 推送
pub mod association; // 人员与PPE关联
pub mod config; // 配置参数
pub mod detection; // 检测数据结构 + 多模型融合
pub mod error; // 错误类型
pub mod ingress; // 告警确认 HTTP 接口
pub mod input; // 视频输入系统
pub mod logging; // 日志初始化
pub mod pipeline; // 生产者/消费者流水线
pub mod store; // 告警持久化

pub use crate::alert::{AlertEvent, AlertManager, AlertSink};
pub use crate::association::{associate, AssignmentPolicy, PersonObservation};
pub use crate::config::{ConcurrencyMode, SentinelConfig};
pub use crate::detection::{
    fuse, BBox, Detection, DetectionProvider, Frame, PpeItem, RequiredPpe,
};
pub use crate::input::FrameSource;
pub use crate::pipeline::{ComponentFactory, PipelineState, Scheduler, StatusIndicator};
pub use crate::store::{AlertRecord, AlertStore, SqliteAlertStore};

/// 按本地时间生成时间字符串, 各字段之间用 `delimiter` 分隔
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}
