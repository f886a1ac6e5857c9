//! 检测结果叠加层
//!
//! 推理帧之间重绘 "上一次" 的结果, 画面保持采集帧率

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::association::PersonObservation;
use crate::detection::{join_labels, BBox};

const MISSING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const COMPLIANT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 16.0;

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayItem {
    pub bbox: BBox,
    pub label: String,
    pub compliant: bool,
}

impl OverlayItem {
    pub fn color(&self) -> Rgb<u8> {
        if self.compliant {
            COMPLIANT_COLOR
        } else {
            MISSING_COLOR
        }
    }
}

/// 一次推理的全部标注
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    items: Vec<OverlayItem>,
}

impl Overlay {
    pub fn from_observations(observations: &[PersonObservation]) -> Self {
        let items = observations
            .iter()
            .map(|obs| OverlayItem {
                bbox: obs.bbox,
                label: format!("Missing: {}", join_labels(&obs.missing)),
                compliant: obs.is_compliant(),
            })
            .collect();
        Self { items }
    }

    pub fn items(&self) -> &[OverlayItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 画框, 有字体时在框上方写标签
    pub fn draw(&self, image: &mut RgbImage, font: Option<&FontVec>) {
        for item in &self.items {
            let color = item.color();
            let [x1, y1, x2, y2] = item.bbox.to_pixels();

            for inset in 0..BOX_THICKNESS {
                let w = x2 - x1 - 2 * inset;
                let h = y2 - y1 - 2 * inset;
                if w < 1 || h < 1 {
                    break;
                }
                let rect = Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
                draw_hollow_rect_mut(image, rect, color);
            }

            if let Some(font) = font {
                let y = (y1 - LABEL_SCALE as i32 - 2).max(0);
                draw_text_mut(image, color, x1, y, PxScale::from(LABEL_SCALE), font, &item.label);
            }
        }
    }
}

/// 加载 TTF/OTF 字体
pub fn load_font(path: &Path) -> anyhow::Result<FontVec> {
    let data = std::fs::read(path)?;
    FontVec::try_from_vec(data)
        .map_err(|e| anyhow::anyhow!("无法解析字体 {}: {}", path.display(), e))
}
