// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/labels.rs - 类别标签表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::model::ModelLoadError;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

pub fn coco_labels() -> Vec<String> {
  COCO_CLASSES.iter().map(|s| s.to_string()).collect()
}

/// 读取类别表文件
///
/// 支持字符串数组 `["person", ...]`，或以类别编号为键的对象 `{"0": "person", ...}`。
pub fn load_labels(path: &Path) -> Result<Vec<String>, ModelLoadError> {
  debug!("读取类别表: {}", path.display());
  let content = std::fs::read_to_string(path)?;
  parse_labels(&content)
}

pub fn parse_labels(content: &str) -> Result<Vec<String>, ModelLoadError> {
  let invalid = |msg: String| ModelLoadError::InvalidLabels(msg);
  let value: Value = serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;

  match value {
    Value::Array(items) => items
      .into_iter()
      .map(|item| match item {
        Value::String(s) => Ok(s),
        other => Err(invalid(format!("类别名称必须是字符串: {}", other))),
      })
      .collect(),
    Value::Object(map) => {
      let mut entries = map
        .into_iter()
        .map(|(k, v)| {
          let id: usize = k
            .parse()
            .map_err(|_| invalid(format!("类别编号无效: {}", k)))?;
          match v {
            Value::String(s) => Ok((id, s)),
            other => Err(invalid(format!("类别名称必须是字符串: {}", other))),
          }
        })
        .collect::<Result<Vec<_>, _>>()?;
      entries.sort_by_key(|(id, _)| *id);
      for (expected, (id, _)) in entries.iter().enumerate() {
        if *id != expected {
          return Err(invalid(format!("类别编号不连续, 缺少 {}", expected)));
        }
      }
      Ok(entries.into_iter().map(|(_, name)| name).collect())
    }
    _ => Err(invalid("类别表必须是数组或对象".to_string())),
  }
}
