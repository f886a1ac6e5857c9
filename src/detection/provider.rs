//! 检测模型接口 (Detection Provider)
//!
//! 模型本身对流水线是黑盒: 输入一帧 + 置信度阈值, 输出检测列表

use std::fs;
use std::path::Path;

use tracing::info;

use super::fusion::ProviderOutput;
use super::types::{Detection, Frame};
use crate::error::ProviderError;

/// 统一的检测模型接口
pub trait DetectionProvider: Send {
    /// 模型名称 (用于日志)
    fn name(&self) -> &str;

    /// 推理: 一帧 → 检测列表
    fn infer(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, ProviderError>;
}

/// 依次调用所有模型, 单个模型失败不影响其他模型
pub fn infer_all(
    providers: &mut [Box<dyn DetectionProvider>],
    frame: &Frame,
    confidence_threshold: f32,
) -> Vec<ProviderOutput> {
    providers
        .iter_mut()
        .map(|provider| ProviderOutput {
            provider: provider.name().to_string(),
            result: provider.infer(frame, confidence_threshold),
        })
        .collect()
}

/// 回放模型: 从 JSON Lines 文件读取预先录制的检测结果
///
/// 每一行是一次推理的结果 (JSON 数组), 按推理次数循环回放:
/// ```text
/// [{"label":"person","confidence":0.9,"box":[10,10,50,100]}]
/// []
/// ```
pub struct ReplayProvider {
    name: String,
    ticks: Vec<Vec<Detection>>,
    cursor: usize,
}

impl ReplayProvider {
    pub fn new(name: impl Into<String>, ticks: Vec<Vec<Detection>>) -> Self {
        Self {
            name: name.into(),
            ticks,
            cursor: 0,
        }
    }

    /// 从 JSON Lines 文件加载
    pub fn from_file(path: &Path) -> Result<Self, ProviderError> {
        let content = fs::read_to_string(path)?;
        let mut ticks = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            ticks.push(serde_json::from_str::<Vec<Detection>>(line)?);
        }

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("replay")
            .to_string();
        info!("✅ 回放模型 {} 加载成功: {} 条记录", name, ticks.len());
        Ok(Self::new(name, ticks))
    }
}

impl DetectionProvider for ReplayProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer(
        &mut self,
        _frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, ProviderError> {
        if self.ticks.is_empty() {
            return Ok(Vec::new());
        }
        let tick = &self.ticks[self.cursor % self.ticks.len()];
        self.cursor += 1;
        Ok(tick
            .iter()
            .filter(|det| det.confidence >= confidence_threshold)
            .cloned()
            .collect())
    }
}
