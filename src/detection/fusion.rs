//! 多模型检测融合 (Detection Fusion)
//!
//! 人员框: 跨模型做 NMS, IoU 超过阈值的只保留置信度最高的一个
//! PPE框:  直接合并,不做抑制 (各模型提供互补证据)

use tracing::{debug, warn};

use super::types::{Detection, ObjectClass, PersonBox};
use crate::error::ProviderError;

/// 人员框去重的默认 IoU 阈值
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// 融合参数
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    pub iou_threshold: f32,
    pub confidence_threshold: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            confidence_threshold: 0.5,
        }
    }
}

/// 单个模型在本帧的输出
#[derive(Debug)]
pub struct ProviderOutput {
    pub provider: String,
    pub result: Result<Vec<Detection>, ProviderError>,
}

/// 融合结果
#[derive(Debug, Default)]
pub struct FusionOutput {
    /// 去重后的人员框,按置信度降序
    pub persons: Vec<PersonBox>,
    /// 所有模型的 PPE 检测
    pub ppe: Vec<Detection>,
    /// 本帧失败模型的告警信息
    pub warnings: Vec<String>,
}

/// 贪心 NMS: 按置信度降序,丢弃与已保留框 IoU 超过阈值的框
pub fn suppress_persons(xs: &mut Vec<PersonBox>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].bbox.iou(&xs[index].bbox);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 融合所有模型的输出
pub fn fuse(outputs: Vec<ProviderOutput>, config: &FusionConfig) -> FusionOutput {
    let mut fused = FusionOutput::default();

    for output in outputs {
        let detections = match output.result {
            Ok(detections) => detections,
            Err(e) => {
                warn!("⚠️ 模型 {} 本帧失败,已跳过: {}", output.provider, e);
                fused
                    .warnings
                    .push(format!("Provider {} failed: {}", output.provider, e));
                continue;
            }
        };

        for det in detections {
            // NaN 置信度也在这里被过滤
            if !(det.confidence >= config.confidence_threshold) {
                continue;
            }
            if !det.bbox.is_valid() {
                debug!("丢弃非法检测框 {:?} ({})", det.bbox, det.class.label());
                continue;
            }
            match det.class {
                ObjectClass::Person => fused.persons.push(PersonBox {
                    bbox: det.bbox,
                    confidence: det.confidence,
                }),
                ObjectClass::Ppe(_) => fused.ppe.push(det),
                ObjectClass::Excluded(_) | ObjectClass::Other(_) => {}
            }
        }
    }

    suppress_persons(&mut fused.persons, config.iou_threshold);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;

    fn ok(provider: &str, detections: Vec<Detection>) -> ProviderOutput {
        ProviderOutput {
            provider: provider.to_string(),
            result: Ok(detections),
        }
    }

    #[test]
    fn test_redundant_persons_collapse_to_best() {
        // IoU = 9000 / 10000 = 0.9
        let a = Detection::new("person", 0.6, BBox::new(0., 0., 100., 100.));
        let b = Detection::new("person", 0.9, BBox::new(0., 0., 100., 90.));
        let fused = fuse(vec![ok("a", vec![a]), ok("b", vec![b])], &FusionConfig::default());

        assert_eq!(fused.persons.len(), 1);
        assert_eq!(fused.persons[0].confidence, 0.9);
        assert_eq!(fused.persons[0].bbox, BBox::new(0., 0., 100., 90.));
    }

    #[test]
    fn test_distinct_persons_are_kept() {
        let a = Detection::new("person", 0.7, BBox::new(0., 0., 50., 100.));
        let b = Detection::new("person", 0.8, BBox::new(200., 0., 250., 100.));
        let fused = fuse(vec![ok("a", vec![a, b])], &FusionConfig::default());
        assert_eq!(fused.persons.len(), 2);
        assert_eq!(fused.persons[0].confidence, 0.8);
    }

    #[test]
    fn test_ppe_is_pooled_without_suppression() {
        let g1 = Detection::new("gloves", 0.9, BBox::new(0., 0., 10., 10.));
        let g2 = Detection::new("gloves", 0.8, BBox::new(0., 0., 10., 10.));
        let hand = Detection::new("hands", 0.9, BBox::new(0., 0., 10., 10.));
        let fused = fuse(
            vec![ok("a", vec![g1, hand]), ok("b", vec![g2])],
            &FusionConfig::default(),
        );
        assert_eq!(fused.ppe.len(), 2);
        assert!(fused.persons.is_empty());
    }

    #[test]
    fn test_failed_provider_is_isolated() {
        let person = Detection::new("person", 0.9, BBox::new(0., 0., 50., 100.));
        let failed = ProviderOutput {
            provider: "broken".to_string(),
            result: Err(ProviderError::Inference {
                provider: "broken".to_string(),
                reason: "timeout".to_string(),
            }),
        };
        let fused = fuse(vec![failed, ok("good", vec![person])], &FusionConfig::default());
        assert_eq!(fused.persons.len(), 1);
        assert_eq!(fused.warnings.len(), 1);
        assert!(fused.warnings[0].contains("broken"));
    }

    #[test]
    fn test_threshold_and_invalid_boxes() {
        let low = Detection::new("person", 0.3, BBox::new(0., 0., 50., 100.));
        let flipped = Detection::new("person", 0.9, BBox::new(50., 0., 0., 100.));
        let fused = fuse(vec![ok("a", vec![low, flipped])], &FusionConfig::default());
        assert!(fused.persons.is_empty());
        assert!(fused.warnings.is_empty());
    }
}
