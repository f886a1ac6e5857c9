//! 日志初始化 - 控制台 + 按天轮转的异步文件日志

use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogLevel;

const LOG_FILE_PREFIX: &str = "sentinel.log";

/// 初始化日志系统
///
/// RUST_LOG 优先于配置的级别。给出日志目录时额外写入文件,
/// 返回的 WorkerGuard 必须在 main 中保持存活。
pub fn init_logging(level: LogLevel, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter_string = format!("{},rumqttc=warn,hyper=warn", level.as_str());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_string));

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_thread_names(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            if let Err(e) = fs::create_dir_all(dir) {
                eprintln!("创建日志目录失败: {}", e);
            }
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // 重复初始化 (例如测试中) 时保持已有的订阅者
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}
