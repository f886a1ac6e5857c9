//! 图像序列输入 - 把一个目录的图像当作摄像头
//!
//! 目录布局: `<source_dir>/camera<N>/`; 索引 0 也可以直接使用 `<source_dir>`

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::FrameSource;
use crate::detection::Frame;
use crate::error::CaptureError;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub struct ImageSequenceSource {
    name: String,
    files: Vec<PathBuf>,
    cursor: usize,
    sequence: u64,
    looping: bool,
}

impl ImageSequenceSource {
    /// 打开第 `camera_index` 路输入, 失败不重试
    pub fn open(source_dir: &Path, camera_index: usize) -> Result<Self, CaptureError> {
        let dir = Self::resolve_dir(source_dir, camera_index)?;
        let name = format!("camera{}", camera_index);

        let entries = fs::read_dir(&dir).map_err(|e| CaptureError::Open {
            source_name: name.clone(),
            reason: format!("{}: {}", dir.display(), e),
        })?;

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CaptureError::Open {
                source_name: name,
                reason: format!("{} 中没有图像文件", dir.display()),
            });
        }

        info!("📷 打开输入 {}: {} ({} 帧)", name, dir.display(), files.len());
        Ok(Self {
            name,
            files,
            cursor: 0,
            sequence: 0,
            looping: false,
        })
    }

    /// 播放完后从头开始
    pub fn with_loop(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn resolve_dir(source_dir: &Path, camera_index: usize) -> Result<PathBuf, CaptureError> {
        let camera_dir = source_dir.join(format!("camera{}", camera_index));
        if camera_dir.is_dir() {
            return Ok(camera_dir);
        }
        if camera_index == 0 && source_dir.is_dir() {
            return Ok(source_dir.to_path_buf());
        }
        Err(CaptureError::Open {
            source_name: format!("camera{}", camera_index),
            reason: format!("目录不存在: {}", camera_dir.display()),
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.cursor >= self.files.len() {
            if !self.looping {
                return Err(CaptureError::EndOfStream);
            }
            self.cursor = 0;
        }

        let path = &self.files[self.cursor];
        self.cursor += 1;

        let image = image::open(path)
            .map_err(|e| CaptureError::Read(format!("{}: {}", path.display(), e)))?
            .to_rgb8();
        debug!("🖼️ 读取帧 {}", path.display());

        self.sequence += 1;
        Ok(Frame::new(image, self.sequence))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
