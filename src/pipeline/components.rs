//! 由配置文件构建流水线组件

use std::sync::Arc;

use ab_glyph::FontVec;
use tracing::{info, warn};

use super::overlay::load_font;
use super::scheduler::ComponentFactory;
use crate::alert::{sink_from_config, AlertSink};
use crate::config::SentinelConfig;
use crate::detection::{DetectionProvider, ReplayProvider};
use crate::error::CaptureError;
use crate::input::{FrameSource, ImageSequenceSource};

pub struct ConfiguredComponents {
    config: SentinelConfig,
    font: Option<Arc<FontVec>>,
}

impl ConfiguredComponents {
    /// 字体只加载一次, 失败时不画标签
    pub fn new(config: SentinelConfig) -> Self {
        let font = config.font_path.as_deref().and_then(|path| match load_font(path) {
            Ok(font) => {
                info!("🔤 字体加载成功: {}", path.display());
                Some(Arc::new(font))
            }
            Err(e) => {
                warn!("⚠️ 字体加载失败, 标签不显示: {}", e);
                None
            }
        });
        Self { config, font }
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }
}

impl ComponentFactory for ConfiguredComponents {
    fn open_source(&self) -> Result<Box<dyn FrameSource>, CaptureError> {
        let source = ImageSequenceSource::open(&self.config.source_dir, self.config.camera_index)?
            .with_loop(self.config.loop_source);
        Ok(Box::new(source))
    }

    fn providers(&self) -> Vec<Box<dyn DetectionProvider>> {
        let mut providers: Vec<Box<dyn DetectionProvider>> = Vec::new();
        for path in &self.config.provider_replays {
            match ReplayProvider::from_file(path) {
                Ok(provider) => providers.push(Box::new(provider)),
                Err(e) => warn!("⚠️ 检测模型 {} 加载失败, 已跳过: {}", path.display(), e),
            }
        }
        if providers.is_empty() {
            warn!("⚠️ 没有可用的检测模型, 只显示画面");
        }
        providers
    }

    fn sink(&self) -> Arc<dyn AlertSink> {
        sink_from_config(&self.config.mqtt)
    }

    fn font(&self) -> Option<Arc<FontVec>> {
        self.font.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::fs;

    #[test]
    fn test_builds_components_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        fs::create_dir(&frames).unwrap();
        RgbImage::new(4, 4).save(frames.join("0001.png")).unwrap();

        let replay = dir.path().join("yolo.jsonl");
        fs::write(&replay, "[]\n").unwrap();

        let config = SentinelConfig {
            source_dir: frames,
            provider_replays: vec![replay, dir.path().join("missing.jsonl")],
            ..SentinelConfig::default()
        };
        let components = ConfiguredComponents::new(config);

        let mut source = components.open_source().unwrap();
        assert_eq!(source.next_frame().unwrap().sequence, 1);

        // 加载失败的模型被跳过
        let providers = components.providers();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name(), "yolo");
        assert!(components.font().is_none());
    }
}
