use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 检测数据结构定义
/// Data structures shared by fusion, association and the pipeline

// ========== 公共常量 ==========

/// 人员类别标签
pub const PERSON_LABEL: &str = "person";

/// 模型可以检测,但不参与PPE判定的类别
pub const EXCLUDED_CLASSES: [&str; 9] = [
    "hands",
    "head",
    "face",
    "ear",
    "tools",
    "foot",
    "medical-suit",
    "safety-suit",
    "face-mask-medical",
];

// ========== 枚举类型 ==========

/// PPE 类别 (声明顺序即目录顺序)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PpeItem {
    FaceGuard,
    EarMufs,
    SafetyVest,
    Gloves,
    Glasses,
}

impl PpeItem {
    /// PPE 目录 (canonical order)
    pub const CATALOG: [PpeItem; 5] = [
        PpeItem::FaceGuard,
        PpeItem::EarMufs,
        PpeItem::SafetyVest,
        PpeItem::Gloves,
        PpeItem::Glasses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PpeItem::FaceGuard => "face-guard",
            PpeItem::EarMufs => "ear-mufs",
            PpeItem::SafetyVest => "safety-vest",
            PpeItem::Gloves => "gloves",
            PpeItem::Glasses => "glasses",
        }
    }
}

impl fmt::Display for PpeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PpeItem {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PpeItem::CATALOG
            .into_iter()
            .find(|item| item.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnknownPpe(s.to_string()))
    }
}

/// 检测类别 (由模型输出的标签解析而来)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ObjectClass {
    Person,
    Ppe(PpeItem),
    /// 可识别但被忽略的类别 (手、头、工具...)
    Excluded(String),
    /// 目录之外的标签
    Other(String),
}

impl ObjectClass {
    pub fn from_label(label: &str) -> Self {
        if label == PERSON_LABEL {
            return ObjectClass::Person;
        }
        if let Ok(item) = label.parse::<PpeItem>() {
            return ObjectClass::Ppe(item);
        }
        if EXCLUDED_CLASSES.contains(&label) {
            ObjectClass::Excluded(label.to_string())
        } else {
            ObjectClass::Other(label.to_string())
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ObjectClass::Person => PERSON_LABEL,
            ObjectClass::Ppe(item) => item.as_str(),
            ObjectClass::Excluded(label) | ObjectClass::Other(label) => label,
        }
    }
}

impl From<String> for ObjectClass {
    fn from(label: String) -> Self {
        ObjectClass::from_label(&label)
    }
}

impl From<ObjectClass> for String {
    fn from(class: ObjectClass) -> Self {
        class.label().to_string()
    }
}

// ========== 数据结构 ==========

/// 检测框 (Detection bounding box), 左上 (x1,y1) 右下 (x2,y2)
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// x1<x2 且 y1<y2
    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.) * self.height().max(0.)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2., (self.y1 + self.y2) / 2.)
    }

    /// 点是否落在框内 (含边界)
    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        self.x1 <= x && x <= self.x2 && self.y1 <= y && y <= self.y2
    }

    pub fn intersection_area(&self, another: &BBox) -> f32 {
        let l = self.x1.max(another.x1);
        let r = self.x2.min(another.x2);
        let t = self.y1.max(another.y1);
        let b = self.y2.min(another.y2);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &BBox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &BBox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }

    /// 像素坐标 (截断取整)
    pub fn to_pixels(&self) -> [i32; 4] {
        [
            self.x1 as i32,
            self.y1 as i32,
            self.x2 as i32,
            self.y2 as i32,
        ]
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x1, y1, x2, y2] = self.to_pixels();
        write!(f, "[{},{},{},{}]", x1, y1, x2, y2)
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// 单个检测结果 {label, confidence, box}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "label")]
    pub class: ObjectClass,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BBox,
}

impl Detection {
    pub fn new(label: &str, confidence: f32, bbox: BBox) -> Self {
        Self {
            class: ObjectClass::from_label(label),
            confidence,
            bbox,
        }
    }

    pub fn is_person(&self) -> bool {
        self.class == ObjectClass::Person
    }

    pub fn ppe_item(&self) -> Option<PpeItem> {
        match self.class {
            ObjectClass::Ppe(item) => Some(item),
            _ => None,
        }
    }
}

/// 融合后的人员框
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PersonBox {
    pub bbox: BBox,
    pub confidence: f32,
}

/// 本次会话要求佩戴的 PPE 集合 (始终按目录顺序,无重复)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<PpeItem>", into = "Vec<PpeItem>")]
pub struct RequiredPpe(Vec<PpeItem>);

impl RequiredPpe {
    pub fn new<I: IntoIterator<Item = PpeItem>>(items: I) -> Self {
        let set: BTreeSet<PpeItem> = items.into_iter().collect();
        Self(set.into_iter().collect())
    }

    /// 完整目录
    pub fn full() -> Self {
        Self(PpeItem::CATALOG.to_vec())
    }

    pub fn items(&self) -> &[PpeItem] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// missing = required − found, 保持 required 的顺序
    pub fn missing(&self, found: &BTreeSet<PpeItem>) -> Vec<PpeItem> {
        self.0
            .iter()
            .filter(|item| !found.contains(item))
            .copied()
            .collect()
    }
}

impl Default for RequiredPpe {
    fn default() -> Self {
        Self::full()
    }
}

impl From<Vec<PpeItem>> for RequiredPpe {
    fn from(items: Vec<PpeItem>) -> Self {
        RequiredPpe::new(items)
    }
}

impl From<RequiredPpe> for Vec<PpeItem> {
    fn from(required: RequiredPpe) -> Self {
        required.0
    }
}

/// 采集帧 (采集 → 检测/显示)
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Local>,
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            captured_at: Local::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("size", &format_args!("{}x{}", self.width(), self.height()))
            .field("captured_at", &self.captured_at)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// 标签列表拼接, 空列表为 "None"
pub fn join_labels(items: &[PpeItem]) -> String {
    if items.is_empty() {
        return "None".to_string();
    }
    items
        .iter()
        .map(PpeItem::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
