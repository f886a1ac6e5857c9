/// PPE 卫兵 (PPE Sentinel)
///
/// 劳保用品佩戴监控
///
/// 系统架构:
/// 1. 生产者: 采集 + 周期推理 + 关联 + 告警 (独立工作线程或单循环)
/// 2. 消费者: 控制与显示状态 (主线程)
/// 3. 告警确认接口: HTTP 服务 (tokio 后台任务)
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use ppe_sentinel::config::{ConcurrencyMode, SentinelConfig};
use ppe_sentinel::detection::{PpeItem, RequiredPpe};
use ppe_sentinel::error::ConfigError;
use ppe_sentinel::pipeline::{ConfiguredComponents, PipelineSettings, PipelineState, Scheduler};
use ppe_sentinel::store::SqliteAlertStore;
use ppe_sentinel::{gen_time_string, ingress, logging, AssignmentPolicy};

/// PPE 卫兵参数
#[derive(Parser, Debug)]
#[command(author, version, about = "PPE 卫兵 - 劳保用品佩戴监控", long_about = None)]
struct Cli {
    /// 配置文件 (不存在时创建默认配置)
    #[arg(short, long, default_value = "sentinel.json", global = true)]
    config: PathBuf,

    /// 日志目录 (按天轮转)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 运行监控流水线
    Run(RunArgs),
    /// 只运行告警确认接口
    Serve,
    /// 创建告警数据库
    InitDb,
    /// 打印生效的配置
    PrintConfig,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// 运行时长 (秒), 不设置则运行到输入结束或 Ctrl-C
    #[arg(short, long)]
    duration: Option<f64>,

    /// 不启动告警确认接口
    #[arg(long)]
    no_ingress: bool,

    /// 结束时导出检测记录 CSV (目录或文件)
    #[arg(long)]
    report: Option<PathBuf>,
}

/// 覆盖配置文件的参数
#[derive(Args, Debug)]
struct Overrides {
    /// 检测置信度阈值
    #[arg(long, global = true)]
    conf: Option<f32>,

    /// 输入索引
    #[arg(long, global = true)]
    camera: Option<usize>,

    /// 必需的 PPE (可重复): face-guard / ear-mufs / safety-vest / gloves / glasses
    #[arg(long = "ppe", global = true)]
    ppe: Vec<String>,

    /// 推理间隔 (秒)
    #[arg(long, global = true)]
    interval: Option<f64>,

    /// 分配策略: containment / overlap-ratio
    #[arg(long, global = true)]
    policy: Option<String>,

    /// 告警冷却 (秒)
    #[arg(long, global = true)]
    cooldown: Option<f64>,

    /// 输入图像目录
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// 输入播放完后从头开始
    #[arg(long = "loop", global = true)]
    loop_source: bool,

    /// 检测结果回放文件 (可重复, 每个文件一个模型)
    #[arg(long = "replay", global = true)]
    replays: Vec<PathBuf>,

    /// 标签字体
    #[arg(long, global = true)]
    font: Option<PathBuf>,

    /// 并发模式: threaded / inline
    #[arg(long, global = true)]
    mode: Option<String>,

    /// 告警确认接口地址
    #[arg(long, global = true)]
    ingress: Option<String>,
}

impl Overrides {
    fn apply(&self, config: &mut SentinelConfig) -> Result<(), ConfigError> {
        if let Some(conf) = self.conf {
            config.confidence_threshold = conf;
        }
        if let Some(camera) = self.camera {
            config.camera_index = camera;
        }
        if !self.ppe.is_empty() {
            let items = self
                .ppe
                .iter()
                .map(|s| s.parse::<PpeItem>())
                .collect::<Result<Vec<_>, _>>()?;
            config.required_ppe = RequiredPpe::new(items);
        }
        if let Some(interval) = self.interval {
            config.detection_interval_secs = interval;
        }
        if let Some(policy) = &self.policy {
            config.assignment_policy = policy.parse::<AssignmentPolicy>()?;
        }
        if let Some(cooldown) = self.cooldown {
            config.alert_cooldown_secs = cooldown;
        }
        if let Some(source) = &self.source {
            config.source_dir = source.clone();
        }
        if self.loop_source {
            config.loop_source = true;
        }
        if !self.replays.is_empty() {
            config.provider_replays = self.replays.clone();
        }
        if let Some(font) = &self.font {
            config.font_path = Some(font.clone());
        }
        if let Some(mode) = &self.mode {
            config.concurrency_mode = mode.parse::<ConcurrencyMode>()?;
        }
        if let Some(addr) = &self.ingress {
            config.ingress_addr = addr.clone();
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = SentinelConfig::load(&cli.config)
        .with_context(|| format!("无法加载配置 {}", cli.config.display()))?;
    cli.overrides.apply(&mut config)?;
    config.mqtt.apply_env()?;
    config.validate()?;

    let log_dir = cli.log_dir.clone().or_else(|| config.log_dir.clone());
    let _guard = logging::init_logging(config.log_level, log_dir.as_deref());

    match cli.command {
        Command::Run(args) => run(config, &args),
        Command::Serve => serve(&config),
        Command::InitDb => {
            let store = SqliteAlertStore::open(&config.database_path)?;
            info!("✅ 告警表已就绪 ({} 条记录)", store.count()?);
            Ok(())
        }
        Command::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn serve(config: &SentinelConfig) -> anyhow::Result<()> {
    let store = Arc::new(SqliteAlertStore::open(&config.database_path)?);
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(ingress::serve(&config.ingress_addr, store))
}

fn run(config: SentinelConfig, args: &RunArgs) -> anyhow::Result<()> {
    println!("🚀 PPE 卫兵启动");
    config.print_summary();

    let runtime = tokio::runtime::Runtime::new()?;

    // Ctrl-C 只设置标志, 由主循环执行停止
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::Relaxed);
        }
    });

    if !args.no_ingress {
        let store = Arc::new(SqliteAlertStore::open(&config.database_path)?);
        let addr = config.ingress_addr.clone();
        runtime.spawn(async move {
            if let Err(e) = ingress::serve(&addr, store).await {
                error!("❌ 告警确认接口退出: {}", e);
            }
        });
    }

    let deadline = args
        .duration
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map(|d| Instant::now() + d);

    let settings = PipelineSettings::from_config(&config);
    let mut scheduler = Scheduler::new(ConfiguredComponents::new(config), settings);
    scheduler.start()?;

    loop {
        if scheduler.poll() == PipelineState::Stopped {
            break;
        }
        if interrupted.load(Ordering::Relaxed) {
            info!("🛑 收到 Ctrl-C");
            scheduler.stop();
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            scheduler.stop();
            break;
        }
    }

    let dashboard = scheduler.dashboard();
    println!();
    println!("📊 运行结束: {}", dashboard.status());
    println!("  收到帧数: {}", dashboard.frames_received());
    println!("  丢弃批次: {}", scheduler.dropped_batches());
    println!("  检测记录: {}", dashboard.detections().count());
    if let Some(e) = dashboard.last_error() {
        println!("  最后错误: {}", e);
    }
    println!("  最近日志:");
    for line in dashboard.logs() {
        println!("    {}", line);
    }

    if let Some(report) = &args.report {
        let path = if report.is_dir() {
            report.join(format!("ppe_report_{}.csv", gen_time_string("")))
        } else {
            report.clone()
        };
        std::fs::write(&path, dashboard.csv_report())
            .with_context(|| format!("无法写入报表 {}", path.display()))?;
        info!("💾 检测报表已保存: {}", path.display());
    }

    runtime.shutdown_timeout(Duration::from_secs(1));
    if dashboard.last_error().is_some() {
        warn!("⚠️ 流水线因错误结束");
    }
    Ok(())
}
