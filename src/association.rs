//! 人员与PPE关联 (Association Engine)
//!
//! 纯函数: (人员框, PPE池, 必需PPE, 分配策略) → 每个人的已佩戴/缺失PPE
//!
//! 两种分配策略:
//! - Containment:  PPE框中心点落在人员框内即关联,不独占
//! - OverlapRatio: 交集面积 / PPE框面积 > 0.5 即归属该人,并从池中移除 (先到先得)

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::detection::{BBox, Detection, PersonBox, PpeItem, RequiredPpe};
use crate::error::ConfigError;

/// 重叠比例阈值
pub const OVERLAP_RATIO_THRESHOLD: f32 = 0.5;

/// PPE 分配策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentPolicy {
    Containment,
    #[default]
    OverlapRatio,
}

impl fmt::Display for AssignmentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentPolicy::Containment => f.write_str("containment"),
            AssignmentPolicy::OverlapRatio => f.write_str("overlap-ratio"),
        }
    }
}

impl FromStr for AssignmentPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "containment" | "center" => Ok(AssignmentPolicy::Containment),
            "overlap-ratio" | "overlap" => Ok(AssignmentPolicy::OverlapRatio),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

/// 单人观测结果 (每次推理重新计算,不持久化)
#[derive(Debug, Clone, PartialEq)]
pub struct PersonObservation {
    pub bbox: BBox,
    pub confidence: f32,
    pub found: BTreeSet<PpeItem>,
    /// 按必需PPE的顺序
    pub missing: Vec<PpeItem>,
}

impl PersonObservation {
    pub fn is_compliant(&self) -> bool {
        self.missing.is_empty()
    }
}

/// PPE框与人员框的交集占PPE框面积的比例
pub fn overlap_ratio(person: &BBox, item: &BBox) -> f32 {
    let item_area = item.area();
    if item_area <= 0. {
        return 0.;
    }
    person.intersection_area(item) / item_area
}

/// PPE框中心点是否在人员框内
pub fn center_contained(person: &BBox, item: &BBox) -> bool {
    let (cx, cy) = item.center();
    person.contains_point(cx, cy)
}

/// 关联: 输出顺序与人员框输入顺序一致
pub fn associate(
    persons: &[PersonBox],
    ppe: &[Detection],
    required: &RequiredPpe,
    policy: AssignmentPolicy,
) -> Vec<PersonObservation> {
    let mut pool: Vec<&Detection> = ppe.iter().filter(|d| d.ppe_item().is_some()).collect();
    let mut observations = Vec::with_capacity(persons.len());

    for person in persons {
        let mut found = BTreeSet::new();

        match policy {
            AssignmentPolicy::Containment => {
                for item in &pool {
                    if center_contained(&person.bbox, &item.bbox) {
                        found.extend(item.ppe_item());
                    }
                }
            }
            AssignmentPolicy::OverlapRatio => {
                let mut unassigned = Vec::with_capacity(pool.len());
                for item in pool {
                    if overlap_ratio(&person.bbox, &item.bbox) > OVERLAP_RATIO_THRESHOLD {
                        found.extend(item.ppe_item());
                    } else {
                        unassigned.push(item);
                    }
                }
                pool = unassigned;
            }
        }

        let missing = required.missing(&found);
        observations.push(PersonObservation {
            bbox: person.bbox,
            confidence: person.confidence,
            found,
            missing,
        });
    }

    observations
}
