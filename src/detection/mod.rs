/// 检测系统 (Detection System)
///
/// - Provider: 检测模型接口 (黑盒)
/// - Fusion:   多模型结果融合 (人员框NMS + PPE合并)
/// - Types:    检测框/类别/PPE目录
pub mod fusion;
pub mod provider;
pub mod types;

pub use fusion::{fuse, FusionConfig, FusionOutput, ProviderOutput};
pub use provider::{infer_all, DetectionProvider, ReplayProvider};
pub use types::{
    join_labels, BBox, Detection, Frame, ObjectClass, PersonBox, PpeItem, RequiredPpe,
};
