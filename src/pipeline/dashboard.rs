//! 消费者侧的显示状态
//!
//! 只由消费者修改, 所有数据都经队列到达

use std::collections::VecDeque;

use super::types::{DetectionRecord, PipelineRecord, RecordBatch, StatusIndicator};
use crate::detection::Frame;

/// 日志面板行数
pub const LOG_CAPACITY: usize = 20;
/// 最近检测记录条数
pub const DETECTION_CAPACITY: usize = 50;

#[derive(Debug, Default)]
pub struct Dashboard {
    logs: VecDeque<String>,
    detections: VecDeque<DetectionRecord>,
    latest_frame: Option<Frame>,
    status: StatusIndicator,
    last_error: Option<String>,
    frames_received: u64,
}

impl Dashboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 应用一批记录, 返回其中的错误 (如有)
    pub fn apply(&mut self, batch: RecordBatch) -> Option<String> {
        let mut error = None;
        for record in batch {
            match record {
                PipelineRecord::Frame(frame) => {
                    self.frames_received += 1;
                    self.latest_frame = Some(frame);
                }
                PipelineRecord::Logs(lines) => {
                    for line in lines {
                        self.push_log(line);
                    }
                }
                PipelineRecord::Detections(records) => {
                    for record in records {
                        if self.detections.len() == DETECTION_CAPACITY {
                            self.detections.pop_front();
                        }
                        self.detections.push_back(record);
                    }
                }
                PipelineRecord::Error(message) => {
                    self.push_log(format!("Error: {}", message));
                    self.status = StatusIndicator::Error;
                    self.last_error = Some(message.clone());
                    error = Some(message);
                }
                PipelineRecord::Status(status) => self.status = status,
            }
        }
        error
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(line.into());
    }

    /// 清空日志和检测记录, 不影响运行状态
    pub fn clear(&mut self) {
        self.logs.clear();
        self.detections.clear();
    }

    pub fn set_status(&mut self, status: StatusIndicator) {
        self.status = status;
    }

    pub fn status(&self) -> StatusIndicator {
        self.status
    }

    pub fn logs(&self) -> impl Iterator<Item = &str> {
        self.logs.iter().map(String::as_str)
    }

    pub fn detections(&self) -> impl Iterator<Item = &DetectionRecord> {
        self.detections.iter()
    }

    pub fn latest_frame(&self) -> Option<&Frame> {
        self.latest_frame.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// 最近检测记录的 CSV 报表, 旧的在前
    pub fn csv_report(&self) -> String {
        let mut report = String::from(DetectionRecord::CSV_HEADER);
        report.push('\n');
        for record in &self.detections {
            report.push_str(&record.csv_row());
            report.push('\n');
        }
        report
    }
}
