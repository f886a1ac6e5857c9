//! 流水线调度器 - 状态机
//!
//! ```text
//! Stopped --start--> Running <--pause_resume--> Paused
//!    ^                  |                          |
//!    +------stop--------+----------stop------------+
//! ```
//!
//! 每次 start 都通过 ComponentFactory 重新创建输入、检测模型与告警管理器。

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ab_glyph::FontVec;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use super::control::{ControlFlags, PipelineSettings};
use super::dashboard::Dashboard;
use super::producer::{Producer, StepOutcome};
use super::queue::{record_queue, Polled, RecordReceiver};
use super::types::{PipelineRecord, PipelineState, RecordBatch, StatusIndicator};
use crate::alert::{AlertManager, AlertSink};
use crate::config::ConcurrencyMode;
use crate::detection::DetectionProvider;
use crate::error::CaptureError;
use crate::input::FrameSource;

/// 生产者已退出但队列里没有错误记录时显示的信息
const PRODUCER_LOST: &str = "Producer stopped unexpectedly";

/// 生产者已退出时, 连续轮询超时达到该次数才强制停止
const DEAD_POLL_LIMIT: u32 = 2;

/// 每轮运行所需组件的工厂
pub trait ComponentFactory {
    /// 打开输入, 失败对本轮是致命的 (不重试)
    fn open_source(&self) -> Result<Box<dyn FrameSource>, CaptureError>;

    fn providers(&self) -> Vec<Box<dyn DetectionProvider>>;

    fn sink(&self) -> Arc<dyn AlertSink>;

    fn font(&self) -> Option<Arc<FontVec>> {
        None
    }
}

enum Worker {
    Threaded {
        handle: JoinHandle<()>,
        done: Receiver<()>,
    },
    Inline(Box<Producer>),
}

pub struct Scheduler<F: ComponentFactory> {
    factory: F,
    settings: PipelineSettings,
    flags: Arc<ControlFlags>,
    state: PipelineState,
    dashboard: Dashboard,
    rx: Option<RecordReceiver>,
    worker: Option<Worker>,
    dead_polls: u32,
}

impl<F: ComponentFactory> Scheduler<F> {
    pub fn new(factory: F, settings: PipelineSettings) -> Self {
        Self {
            factory,
            settings,
            flags: Arc::new(ControlFlags::new()),
            state: PipelineState::Stopped,
            dashboard: Dashboard::new(),
            rx: None,
            worker: None,
            dead_polls: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// 当前队列长度 (未启动时为 0)
    pub fn queue_len(&self) -> usize {
        self.rx.as_ref().map_or(0, RecordReceiver::len)
    }

    /// 被丢弃的记录批次数
    pub fn dropped_batches(&self) -> u64 {
        self.rx.as_ref().map_or(0, RecordReceiver::dropped)
    }

    /// Stopped → Running; 其他状态下无操作
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.state != PipelineState::Stopped {
            debug!("start 忽略: 当前状态 {:?}", self.state);
            return Ok(());
        }

        let source = match self.factory.open_source() {
            Ok(source) => source,
            Err(e) => {
                error!("❌ 无法打开输入: {}", e);
                self.dashboard.push_log(format!("Error: {}", e));
                self.dashboard.set_status(StatusIndicator::Error);
                return Err(e);
            }
        };

        // 每轮运行使用新的标志: 未响应而被放弃的旧生产者保留 stop = true
        self.flags = Arc::new(ControlFlags::new());
        self.flags.set_running(true);
        self.dead_polls = 0;

        let (tx, rx) = record_queue();
        let alerts = AlertManager::new(
            self.factory.sink(),
            self.settings.alert_topic.clone(),
            self.settings.alert_cooldown,
        );
        let producer = Producer::new(
            source,
            self.factory.providers(),
            alerts,
            self.settings.clone(),
            self.flags.clone(),
            tx,
        )
        .with_font(self.factory.font());

        let worker = match self.settings.mode {
            ConcurrencyMode::Threaded => {
                let (done_tx, done_rx) = bounded::<()>(1);
                let spawned = thread::Builder::new()
                    .name("producer".to_string())
                    .spawn(move || {
                        producer.run();
                        drop(done_tx);
                    });
                match spawned {
                    Ok(handle) => Worker::Threaded {
                        handle,
                        done: done_rx,
                    },
                    Err(e) => {
                        self.flags.set_running(false);
                        let e = CaptureError::Open {
                            source_name: "producer".to_string(),
                            reason: e.to_string(),
                        };
                        self.dashboard.push_log(format!("Error: {}", e));
                        self.dashboard.set_status(StatusIndicator::Error);
                        return Err(e);
                    }
                }
            }
            ConcurrencyMode::Inline => Worker::Inline(Box::new(producer)),
        };

        self.rx = Some(rx);
        self.worker = Some(worker);
        self.state = PipelineState::Running;
        self.dashboard.set_status(StatusIndicator::Running);
        self.dashboard.push_log("Camera started.");
        info!("▶️ 流水线启动 ({:?})", self.settings.mode);
        Ok(())
    }

    /// Running/Paused → Stopped; 已停止时无操作
    pub fn stop(&mut self) {
        if self.state == PipelineState::Stopped {
            return;
        }
        self.shutdown();
        self.dashboard.set_status(StatusIndicator::Stopped);
        self.dashboard.push_log("Camera stopped.");
        info!("⏹️ 流水线停止");
    }

    /// Running ⇄ Paused; 已停止时无操作
    pub fn pause_resume(&mut self) -> PipelineState {
        match self.state {
            PipelineState::Running => {
                self.flags.set_paused(true);
                self.state = PipelineState::Paused;
                self.dashboard.set_status(StatusIndicator::Paused);
                info!("⏸️ 已暂停");
            }
            PipelineState::Paused => {
                self.flags.set_paused(false);
                self.state = PipelineState::Running;
                self.dashboard.set_status(StatusIndicator::Running);
                info!("▶️ 已恢复");
            }
            PipelineState::Stopped => debug!("pause_resume 忽略: 未运行"),
        }
        self.state
    }

    /// 清空日志与检测记录, 状态不变
    pub fn clear_history(&mut self) {
        self.dashboard.clear();
    }

    /// 消费者的一次轮询
    ///
    /// 线程模式下最多等待 poll_timeout; 单循环模式下在调用线程上执行一次生产者迭代。
    pub fn poll(&mut self) -> PipelineState {
        if self.state == PipelineState::Stopped {
            return self.state;
        }

        match self.worker.as_mut() {
            Some(Worker::Inline(producer)) => {
                let outcome = producer.step();
                let delay = producer.delay_after(outcome);
                if outcome != StepOutcome::Produced && !delay.is_zero() {
                    thread::sleep(delay);
                }
                let error = self.drain_queue();
                if outcome == StepOutcome::Finished {
                    self.fault(error);
                }
            }
            Some(Worker::Threaded { .. }) => self.poll_threaded(),
            None => self.fault(None),
        }
        self.state
    }

    fn poll_threaded(&mut self) {
        let Some(rx) = self.rx.as_ref() else {
            return self.fault(None);
        };

        match rx.poll(self.settings.poll_timeout) {
            Polled::Batch(batch) => {
                self.dead_polls = 0;
                if let Some(error) = self.dashboard.apply(batch) {
                    self.fault(Some(error));
                }
            }
            Polled::Timeout => {
                if self.producer_alive() {
                    self.dead_polls = 0;
                    return;
                }
                self.dead_polls += 1;
                warn!(
                    "⚠️ 轮询超时且生产者已退出 ({}/{})",
                    self.dead_polls, DEAD_POLL_LIMIT
                );
                if self.dead_polls >= DEAD_POLL_LIMIT {
                    let error = self.drain_queue();
                    self.fault(error);
                }
            }
            Polled::Disconnected => {
                let error = self.drain_queue();
                self.fault(error);
            }
        }
    }

    fn producer_alive(&self) -> bool {
        match &self.worker {
            Some(Worker::Threaded { handle, .. }) => {
                self.flags.is_running() && !handle.is_finished()
            }
            Some(Worker::Inline(_)) => true,
            None => false,
        }
    }

    fn drain_queue(&mut self) -> Option<String> {
        let batches: Vec<RecordBatch> = self.rx.as_ref().map(RecordReceiver::drain).unwrap_or_default();
        let mut error = None;
        for batch in batches {
            if let Some(e) = self.dashboard.apply(batch) {
                error = Some(e);
            }
        }
        error
    }

    /// 生产者异常结束: 强制进入 Stopped 并显示错误
    fn fault(&mut self, error: Option<String>) {
        let message = match error {
            Some(message) => message,
            None => {
                let message = PRODUCER_LOST.to_string();
                self.dashboard.apply(vec![PipelineRecord::Error(message.clone())]);
                message
            }
        };
        error!("❌ 流水线终止: {}", message);
        self.shutdown();
        self.dashboard.set_status(StatusIndicator::Error);
    }

    /// 通知生产者停止并有限等待其退出
    fn shutdown(&mut self) {
        self.flags.request_stop();
        self.flags.set_paused(false);

        match self.worker.take() {
            Some(Worker::Threaded { handle, done }) => {
                match done.recv_timeout(self.settings.join_timeout) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        if handle.join().is_err() {
                            warn!("⚠️ 生产者线程 panic");
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        warn!(
                            "⚠️ 生产者 {:?} 内未响应, 视为已停止",
                            self.settings.join_timeout
                        );
                    }
                }
            }
            Some(Worker::Inline(_)) | None => {}
        }

        self.flags.set_running(false);
        self.rx = None;
        self.state = PipelineState::Stopped;
    }
}

impl<F: ComponentFactory> Drop for Scheduler<F> {
    fn drop(&mut self) {
        if self.state != PipelineState::Stopped {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::manager::tests::RecordingSink;
    use crate::detection::{BBox, Detection, Frame, ReplayProvider};
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// 固定帧数的输入, 读完后 EndOfStream
    struct CountingSource {
        remaining: usize,
        sequence: u64,
    }

    impl FrameSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            if self.remaining == 0 {
                return Err(CaptureError::EndOfStream);
            }
            self.remaining -= 1;
            self.sequence += 1;
            Ok(Frame::new(RgbImage::new(32, 32), self.sequence))
        }
    }

    struct TestFactory {
        frames: usize,
        fail_open: bool,
        opened: AtomicUsize,
        sink: Arc<RecordingSink>,
    }

    impl TestFactory {
        fn new(frames: usize) -> Self {
            Self {
                frames,
                fail_open: false,
                opened: AtomicUsize::new(0),
                sink: Arc::new(RecordingSink::default()),
            }
        }
    }

    impl ComponentFactory for TestFactory {
        fn open_source(&self) -> Result<Box<dyn FrameSource>, CaptureError> {
            if self.fail_open {
                return Err(CaptureError::Open {
                    source_name: "camera0".to_string(),
                    reason: "no device".to_string(),
                });
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSource {
                remaining: self.frames,
                sequence: 0,
            }))
        }

        fn providers(&self) -> Vec<Box<dyn DetectionProvider>> {
            let tick = vec![Detection::new("person", 0.9, BBox::new(1., 1., 20., 30.))];
            vec![Box::new(ReplayProvider::new("replay", vec![tick]))]
        }

        fn sink(&self) -> Arc<dyn AlertSink> {
            self.sink.clone()
        }
    }

    fn settings(mode: ConcurrencyMode) -> PipelineSettings {
        PipelineSettings {
            mode,
            frame_interval: Duration::from_millis(1),
            pause_idle: Duration::from_millis(1),
            poll_timeout: Duration::from_millis(200),
            join_timeout: Duration::from_millis(500),
            ..PipelineSettings::default()
        }
    }

    #[test]
    fn test_guarded_transitions() {
        let mut scheduler = Scheduler::new(TestFactory::new(1000), settings(ConcurrencyMode::Inline));
        assert_eq!(scheduler.pause_resume(), PipelineState::Stopped);

        scheduler.start().unwrap();
        assert_eq!(scheduler.state(), PipelineState::Running);
        // 重复 start 不会重新打开输入
        scheduler.start().unwrap();
        assert_eq!(scheduler.factory.opened.load(Ordering::SeqCst), 1);

        assert_eq!(scheduler.pause_resume(), PipelineState::Paused);
        assert_eq!(scheduler.dashboard().status(), StatusIndicator::Paused);
        assert_eq!(scheduler.pause_resume(), PipelineState::Running);

        scheduler.stop();
        assert_eq!(scheduler.state(), PipelineState::Stopped);
        assert_eq!(scheduler.dashboard().status(), StatusIndicator::Stopped);
        scheduler.stop();
        assert_eq!(scheduler.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_open_failure_is_fatal() {
        let mut factory = TestFactory::new(1);
        factory.fail_open = true;
        let mut scheduler = Scheduler::new(factory, settings(ConcurrencyMode::Threaded));

        assert!(matches!(scheduler.start(), Err(CaptureError::Open { .. })));
        assert_eq!(scheduler.state(), PipelineState::Stopped);
        assert_eq!(scheduler.dashboard().status(), StatusIndicator::Error);
    }

    #[test]
    fn test_inline_poll_runs_one_iteration() {
        let mut scheduler = Scheduler::new(TestFactory::new(1000), settings(ConcurrencyMode::Inline));
        scheduler.start().unwrap();

        scheduler.poll();
        assert_eq!(scheduler.dashboard().frames_received(), 1);
        assert_eq!(scheduler.dashboard().detections().count(), 1);

        scheduler.pause_resume();
        scheduler.poll();
        assert_eq!(scheduler.dashboard().frames_received(), 1);
    }

    #[test]
    fn test_inline_end_of_stream_stops_with_error() {
        let mut scheduler = Scheduler::new(TestFactory::new(2), settings(ConcurrencyMode::Inline));
        scheduler.start().unwrap();

        for _ in 0..3 {
            scheduler.poll();
        }
        assert_eq!(scheduler.state(), PipelineState::Stopped);
        assert_eq!(scheduler.dashboard().status(), StatusIndicator::Error);
        assert_eq!(scheduler.dashboard().last_error(), Some("视频流已结束"));
    }

    #[test]
    fn test_threaded_run_until_end_of_stream() {
        let mut scheduler = Scheduler::new(TestFactory::new(5), settings(ConcurrencyMode::Threaded));
        scheduler.start().unwrap();

        for _ in 0..100 {
            if scheduler.poll() == PipelineState::Stopped {
                break;
            }
        }
        assert_eq!(scheduler.state(), PipelineState::Stopped);
        assert_eq!(scheduler.dashboard().status(), StatusIndicator::Error);
        assert!(scheduler.dashboard().frames_received() >= 1);
        assert!(scheduler.queue_len() == 0);
    }

    #[test]
    fn test_clear_history_keeps_state() {
        let mut scheduler = Scheduler::new(TestFactory::new(1000), settings(ConcurrencyMode::Inline));
        scheduler.start().unwrap();
        scheduler.poll();

        scheduler.clear_history();
        assert_eq!(scheduler.dashboard().logs().count(), 0);
        assert_eq!(scheduler.dashboard().detections().count(), 0);
        assert_eq!(scheduler.state(), PipelineState::Running);
        scheduler.stop();
    }

    #[test]
    fn test_restart_builds_fresh_components() {
        let mut scheduler = Scheduler::new(TestFactory::new(1000), settings(ConcurrencyMode::Threaded));
        scheduler.start().unwrap();
        scheduler.stop();
        scheduler.start().unwrap();
        assert_eq!(scheduler.state(), PipelineState::Running);
        assert_eq!(scheduler.factory.opened.load(Ordering::SeqCst), 2);
        scheduler.stop();
    }

    /// 无限输入, 首次读取先阻塞 `stall`
    struct StallingSource {
        stall: Option<Duration>,
        captured: Arc<AtomicUsize>,
        sequence: u64,
    }

    impl FrameSource for StallingSource {
        fn name(&self) -> &str {
            "stalling"
        }

        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            if let Some(stall) = self.stall.take() {
                thread::sleep(stall);
            }
            self.captured.fetch_add(1, Ordering::SeqCst);
            self.sequence += 1;
            Ok(Frame::new(RgbImage::new(16, 16), self.sequence))
        }
    }

    /// 第一轮的输入会阻塞, 之后各轮正常; 按轮次统计采集帧数
    struct StallingFactory {
        stall: Duration,
        opened: AtomicUsize,
        captured: [Arc<AtomicUsize>; 2],
    }

    impl StallingFactory {
        fn new(stall: Duration) -> Self {
            Self {
                stall,
                opened: AtomicUsize::new(0),
                captured: [Arc::default(), Arc::default()],
            }
        }
    }

    impl ComponentFactory for StallingFactory {
        fn open_source(&self) -> Result<Box<dyn FrameSource>, CaptureError> {
            let run = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StallingSource {
                stall: (run == 0).then_some(self.stall),
                captured: self.captured[run.min(1)].clone(),
                sequence: 0,
            }))
        }

        fn providers(&self) -> Vec<Box<dyn DetectionProvider>> {
            Vec::new()
        }

        fn sink(&self) -> Arc<dyn AlertSink> {
            Arc::new(RecordingSink::default())
        }
    }

    struct PanickingSource;

    impl FrameSource for PanickingSource {
        fn name(&self) -> &str {
            "panicking"
        }

        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            panic!("capture driver crashed");
        }
    }

    struct PanickingFactory;

    impl ComponentFactory for PanickingFactory {
        fn open_source(&self) -> Result<Box<dyn FrameSource>, CaptureError> {
            Ok(Box::new(PanickingSource))
        }

        fn providers(&self) -> Vec<Box<dyn DetectionProvider>> {
            Vec::new()
        }

        fn sink(&self) -> Arc<dyn AlertSink> {
            Arc::new(RecordingSink::default())
        }
    }

    fn stalling_settings() -> PipelineSettings {
        PipelineSettings {
            poll_timeout: Duration::from_millis(50),
            join_timeout: Duration::from_millis(50),
            ..settings(ConcurrencyMode::Threaded)
        }
    }

    #[test]
    fn test_stop_gives_up_on_stalled_producer() {
        let mut scheduler = Scheduler::new(
            StallingFactory::new(Duration::from_millis(400)),
            stalling_settings(),
        );
        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        scheduler.stop();
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(scheduler.state(), PipelineState::Stopped);
        assert_eq!(scheduler.dashboard().status(), StatusIndicator::Stopped);
    }

    #[test]
    fn test_abandoned_producer_stays_stopped_after_restart() {
        let mut scheduler = Scheduler::new(
            StallingFactory::new(Duration::from_millis(400)),
            stalling_settings(),
        );
        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        scheduler.stop();

        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(800));

        // 旧生产者解除阻塞后最多交出阻塞中的那一帧, 随即退出
        assert!(scheduler.factory.captured[0].load(Ordering::SeqCst) <= 1);
        assert!(scheduler.factory.captured[1].load(Ordering::SeqCst) > 0);
        assert_eq!(scheduler.state(), PipelineState::Running);
        assert!(scheduler.flags.is_running());
        scheduler.stop();
    }

    #[test]
    fn test_repeated_timeout_with_exited_producer_forces_stop() {
        let mut scheduler = Scheduler::new(
            StallingFactory::new(Duration::from_secs(2)),
            stalling_settings(),
        );
        scheduler.start().unwrap();

        // 生产者仍在运行: 超时只是没有新数据
        assert_eq!(scheduler.poll(), PipelineState::Running);

        // 生产者已标记退出但还没有释放队列
        scheduler.flags.set_running(false);
        assert_eq!(scheduler.poll(), PipelineState::Running);
        assert_eq!(scheduler.poll(), PipelineState::Stopped);
        assert_eq!(scheduler.dashboard().status(), StatusIndicator::Error);
        assert_eq!(scheduler.dashboard().last_error(), Some(PRODUCER_LOST));
    }

    #[test]
    fn test_producer_lost_without_error_record() {
        let mut scheduler = Scheduler::new(PanickingFactory, settings(ConcurrencyMode::Threaded));
        scheduler.start().unwrap();

        for _ in 0..50 {
            if scheduler.poll() == PipelineState::Stopped {
                break;
            }
        }
        assert_eq!(scheduler.state(), PipelineState::Stopped);
        assert_eq!(scheduler.dashboard().status(), StatusIndicator::Error);
        assert_eq!(scheduler.dashboard().last_error(), Some(PRODUCER_LOST));
        assert!(scheduler
            .dashboard()
            .logs()
            .any(|line| line == "Error: Producer stopped unexpectedly"));
    }
}
