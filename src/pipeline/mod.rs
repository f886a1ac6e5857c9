/// 视频处理流水线 (Video Processing Pipeline)
///
/// 生产者/消费者架构, 通过容量为 2 的有界队列通信:
/// - Producer:  采集 + 周期推理 + 关联 + 告警 (独立线程或单循环)
/// - Dashboard: 消费者侧的显示状态 (日志/检测记录/最新帧/状态)
/// - Scheduler: 运行/暂停/停止 状态机
pub mod components;
pub mod control;
pub mod dashboard;
pub mod overlay;
pub mod producer;
pub mod queue;
pub mod scheduler;
pub mod types;

pub use components::ConfiguredComponents;
pub use control::{ControlFlags, PipelineSettings};
pub use dashboard::{Dashboard, DETECTION_CAPACITY, LOG_CAPACITY};
pub use overlay::{load_font, Overlay, OverlayItem};
pub use producer::{Producer, StepOutcome};
pub use queue::{record_queue, Polled, RecordReceiver, RecordSender, QUEUE_CAPACITY};
pub use scheduler::{ComponentFactory, Scheduler};
pub use types::{DetectionRecord, PipelineRecord, PipelineState, RecordBatch, StatusIndicator};
