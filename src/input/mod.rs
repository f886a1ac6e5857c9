/// 视频输入系统 (Video Input System)
///
/// 帧源只负责按需交出下一帧,节奏由流水线生产者控制
/// - FrameSource:         取帧能力
/// - ImageSequenceSource: 目录中的静态图像序列 (按文件名排序)
pub mod sequence;

pub use sequence::ImageSequenceSource;

use crate::detection::Frame;
use crate::error::CaptureError;

/// 取帧能力: 每次调用返回一帧或采集错误
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    fn next_frame(&mut self) -> Result<Frame, CaptureError>;
}

