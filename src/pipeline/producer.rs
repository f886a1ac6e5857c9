//! 生产者: 采集 + 周期推理 + 关联 + 告警
//!
//! 每次迭代产出一批记录 {帧, 日志, 检测记录} 并尝试入队,
//! 队列满时丢弃, 从不等待消费者。

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ab_glyph::FontVec;
use tracing::{debug, error, info, warn};

use super::control::{ControlFlags, PipelineSettings};
use super::overlay::Overlay;
use super::queue::RecordSender;
use super::types::{DetectionRecord, PipelineRecord, RecordBatch, StatusIndicator};
use crate::alert::AlertManager;
use crate::association::associate;
use crate::detection::{fuse, infer_all, join_labels, DetectionProvider, Frame};
use crate::error::CaptureError;
use crate::input::FrameSource;

/// 单次迭代的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// 已产出一批记录 (可能因队列满被丢弃)
    Produced,
    /// 暂停中, 未采集
    Idle,
    /// 读帧失败, 退避后继续
    Retry,
    /// 本轮运行结束 (停止请求或致命错误)
    Finished,
}

pub struct Producer {
    source: Box<dyn FrameSource>,
    providers: Vec<Box<dyn DetectionProvider>>,
    alerts: AlertManager,
    settings: PipelineSettings,
    flags: Arc<ControlFlags>,
    tx: RecordSender,
    font: Option<Arc<FontVec>>,
    last_inference: Option<Instant>,
    last_overlay: Overlay,
    failed_reads: u32,
}

impl Producer {
    pub fn new(
        source: Box<dyn FrameSource>,
        providers: Vec<Box<dyn DetectionProvider>>,
        alerts: AlertManager,
        settings: PipelineSettings,
        flags: Arc<ControlFlags>,
        tx: RecordSender,
    ) -> Self {
        Self {
            source,
            providers,
            alerts,
            settings,
            flags,
            tx,
            font: None,
            last_inference: None,
            last_overlay: Overlay::default(),
            failed_reads: 0,
        }
    }

    pub fn with_font(mut self, font: Option<Arc<FontVec>>) -> Self {
        self.font = font;
        self
    }

    /// 线程主循环
    pub fn run(mut self) {
        info!(
            "🚀 生产者启动: 输入 {}, {} 个检测模型, 推理间隔 {:?}",
            self.source.name(),
            self.providers.len(),
            self.settings.detection_interval
        );

        loop {
            let outcome = self.step();
            if outcome == StepOutcome::Finished {
                break;
            }
            let delay = self.delay_after(outcome);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }

        self.flags.set_running(false);
        info!("🛑 生产者退出");
    }

    /// 迭代之间的等待时间
    pub fn delay_after(&self, outcome: StepOutcome) -> Duration {
        match outcome {
            StepOutcome::Produced => self.settings.frame_interval,
            StepOutcome::Idle => self.settings.pause_idle,
            StepOutcome::Retry => self.settings.read_retry_backoff,
            StepOutcome::Finished => Duration::ZERO,
        }
    }

    pub fn step(&mut self) -> StepOutcome {
        self.step_at(Instant::now())
    }

    /// 执行一次迭代, `now` 用于推理间隔和告警冷却
    pub fn step_at(&mut self, now: Instant) -> StepOutcome {
        if self.flags.stop_requested() {
            return StepOutcome::Finished;
        }
        if self.flags.is_paused() {
            return StepOutcome::Idle;
        }

        let mut frame = match self.source.next_frame() {
            Ok(frame) => {
                self.failed_reads = 0;
                frame
            }
            Err(CaptureError::Read(reason)) if self.failed_reads == 0 => {
                self.failed_reads += 1;
                warn!("⚠️ 读帧失败, 退避后重试: {}", reason);
                return StepOutcome::Retry;
            }
            Err(e) => {
                self.fail(e);
                return StepOutcome::Finished;
            }
        };

        if self.flags.stop_requested() {
            return StepOutcome::Finished;
        }

        let mut batch: RecordBatch = Vec::with_capacity(3);
        let mut logs = Vec::new();
        let mut records = Vec::new();

        if self.inference_due(now) {
            self.run_inference(&frame, now, &mut logs, &mut records);
        }

        // 非推理帧重绘上一次的结果
        self.last_overlay
            .draw(&mut frame.image, self.font.as_deref());

        batch.push(PipelineRecord::Frame(frame));
        if !logs.is_empty() {
            batch.push(PipelineRecord::Logs(logs));
        }
        if !records.is_empty() {
            batch.push(PipelineRecord::Detections(records));
        }
        self.tx.offer(batch);

        StepOutcome::Produced
    }

    fn inference_due(&self, now: Instant) -> bool {
        match self.last_inference {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.settings.detection_interval,
        }
    }

    /// 融合 → 关联 → 告警, 并缓存叠加层
    fn run_inference(
        &mut self,
        frame: &Frame,
        now: Instant,
        logs: &mut Vec<String>,
        records: &mut Vec<DetectionRecord>,
    ) {
        let started = Instant::now();
        let outputs = infer_all(
            &mut self.providers,
            frame,
            self.settings.fusion.confidence_threshold,
        );
        let fused = fuse(outputs, &self.settings.fusion);
        logs.extend(fused.warnings.iter().cloned());

        if !fused.persons.is_empty() {
            logs.push(format!(
                "[{}] Running detection on {} person(s)...",
                chrono::Local::now().format("%H:%M:%S"),
                fused.persons.len()
            ));
        }

        let observations = associate(
            &fused.persons,
            &fused.ppe,
            &self.settings.required,
            self.settings.policy,
        );

        for observation in observations.iter().filter(|obs| !obs.is_compliant()) {
            let [x1, y1, _, _] = observation.bbox.to_pixels();
            logs.push(format!(
                "ALERT: Person at [{},{}] missing {}",
                x1,
                y1,
                join_labels(&observation.missing)
            ));
        }

        let emitted = self.alerts.process(&observations, now);
        records.extend(
            observations
                .iter()
                .map(|obs| DetectionRecord::from_observation(obs, frame.captured_at)),
        );

        self.last_overlay = Overlay::from_observations(&observations);
        self.last_inference = Some(now);

        debug!(
            "帧 {} 推理完成: {} 人, {} 个PPE, {} 条告警, 耗时 {:.1}ms",
            frame.sequence,
            observations.len(),
            fused.ppe.len(),
            emitted.len(),
            started.elapsed().as_secs_f64() * 1000.0
        );
    }

    /// 致命采集错误: 错误记录使用有限阻塞发送, 不受丢弃策略影响
    fn fail(&mut self, e: CaptureError) {
        error!("❌ 采集失败, 本轮运行终止: {}", e);
        let message = e.to_string();
        let batch = vec![
            PipelineRecord::Status(StatusIndicator::Error),
            PipelineRecord::Error(message),
        ];
        if !self.tx.send_final(batch, self.settings.poll_timeout) {
            warn!("⚠️ 错误记录未能送达消费者");
        }
        self.flags.set_running(false);
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }
}
