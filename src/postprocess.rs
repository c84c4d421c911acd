// 该文件是 Qianli （千里眼） 项目的一部分。
// src/postprocess.rs - 检测结果后处理
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

use std::sync::Arc;

use tracing::debug;

use crate::{
  config::{BoxUnits, DetectorConfig},
  model::BOX_ROWS,
  tensor::OutputTensor,
};

/// 轴对齐的角点框
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  /// 由中心点与宽高构造
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self {
      left: cx - w / 2.0,
      top: cy - h / 2.0,
      right: cx + w / 2.0,
      bottom: cy + h / 2.0,
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn scale(&self, sx: f32, sy: f32) -> Self {
    Self {
      left: self.left * sx,
      top: self.top * sy,
      right: self.right * sx,
      bottom: self.bottom * sy,
    }
  }

  pub fn iou(&self, other: &BBox) -> f32 {
    iou(self, other)
  }
}

/// 计算两个框的交并比，不相交时为 0
pub fn iou(a: &BBox, b: &BBox) -> f32 {
  let left = a.left.max(b.left);
  let top = a.top.max(b.top);
  let right = a.right.min(b.right);
  let bottom = a.bottom.min(b.bottom);

  if right <= left || bottom <= top {
    return 0.0;
  }

  let intersection = (right - left) * (bottom - top);
  let union = a.area() + b.area() - intersection;
  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 单个锚点解码得到的候选框（模型输入坐标系）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionCandidate {
  pub class_id: usize,
  pub score: f32,
  pub bbox: BBox,
}

/// 最终交给外部的检测结果，坐标为原始帧像素
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub label: String,
  pub class_id: usize,
  pub confidence: f32,
  pub bbox: BBox,
}

/// 贪心非极大值抑制，结果按置信度降序排列
pub fn non_max_suppression(
  mut candidates: Vec<DetectionCandidate>,
  threshold: f32,
  class_aware: bool,
) -> Vec<DetectionCandidate> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut suppressed = vec![false; candidates.len()];
  let mut selected = Vec::with_capacity(candidates.len());

  for i in 0..candidates.len() {
    if suppressed[i] {
      continue;
    }
    let best = candidates[i];
    selected.push(best);

    for j in (i + 1)..candidates.len() {
      if suppressed[j] {
        continue;
      }
      let other = &candidates[j];
      if class_aware && other.class_id != best.class_id {
        continue;
      }
      if iou(&best.bbox, &other.bbox) > threshold {
        suppressed[j] = true;
      }
    }
  }

  selected
}

#[derive(Debug, Clone)]
pub struct Postprocessor {
  confidence_threshold: f32,
  nms_threshold: f32,
  box_units: BoxUnits,
  class_aware_nms: bool,
  labels: Arc<[String]>,
}

impl Postprocessor {
  pub fn new(config: &DetectorConfig, labels: Arc<[String]>) -> Self {
    Self {
      confidence_threshold: config.confidence_threshold,
      nms_threshold: config.nms_threshold,
      box_units: config.box_units,
      class_aware_nms: config.class_aware_nms,
      labels,
    }
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  pub fn nms_threshold(&self) -> f32 {
    self.nms_threshold
  }

  /// 逐锚点解码并按置信度过滤，坐标仍在模型输入坐标系
  pub fn candidates(&self, output: &OutputTensor, model_input_size: usize) -> Vec<DetectionCandidate> {
    let num_classes = output.num_features().saturating_sub(BOX_ROWS);
    if num_classes == 0 {
      return Vec::new();
    }

    let unit = match self.box_units {
      BoxUnits::Pixels => 1.0,
      BoxUnits::Normalized => model_input_size as f32,
    };

    let (xs, ys, ws, hs) = (output.row(0), output.row(1), output.row(2), output.row(3));
    let mut candidates = Vec::new();

    for anchor in 0..output.num_anchors() {
      let mut class_id = 0;
      let mut score = output.value(BOX_ROWS, anchor);
      for c in 1..num_classes {
        let s = output.value(BOX_ROWS + c, anchor);
        if s > score {
          score = s;
          class_id = c;
        }
      }

      if !score.is_finite() || score < self.confidence_threshold {
        continue;
      }

      let bbox = BBox::from_center(
        xs[anchor] * unit,
        ys[anchor] * unit,
        ws[anchor] * unit,
        hs[anchor] * unit,
      );
      if !(bbox.left.is_finite() && bbox.top.is_finite() && bbox.right.is_finite() && bbox.bottom.is_finite()) {
        continue;
      }

      candidates.push(DetectionCandidate {
        class_id,
        score,
        bbox,
      });
    }

    candidates
  }

  pub fn decode(
    &self,
    output: &OutputTensor,
    model_input_size: usize,
    original_width: usize,
    original_height: usize,
  ) -> Vec<Detection> {
    let candidates = self.candidates(output, model_input_size);
    let num_candidates = candidates.len();
    let kept = non_max_suppression(candidates, self.nms_threshold, self.class_aware_nms);
    debug!("候选框 {} 个, 抑制后保留 {} 个", num_candidates, kept.len());

    let scale_x = original_width as f32 / model_input_size as f32;
    let scale_y = original_height as f32 / model_input_size as f32;

    kept
      .into_iter()
      .map(|candidate| Detection {
        label: self
          .labels
          .get(candidate.class_id)
          .cloned()
          .unwrap_or_else(|| "unknown".to_string()),
        class_id: candidate.class_id,
        confidence: candidate.score,
        bbox: candidate.bbox.scale(scale_x, scale_y),
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::labels::coco_labels;

  const EPS: f32 = 1e-4;

  fn output_with(anchors: &[([f32; 4], usize, f32)], num_classes: usize) -> OutputTensor {
    let mut output = OutputTensor::new([1, BOX_ROWS + num_classes, anchors.len()]);
    for (i, (bbox, class_id, score)) in anchors.iter().enumerate() {
      for (row, v) in bbox.iter().enumerate() {
        output.row_mut(row)[i] = *v;
      }
      output.row_mut(BOX_ROWS + class_id)[i] = *score;
    }
    output
  }

  fn postprocessor(config: DetectorConfig) -> Postprocessor {
    Postprocessor::new(&config, coco_labels().into())
  }

  fn assert_close(a: f32, b: f32) {
    assert!((a - b).abs() < EPS, "{} != {}", a, b);
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = BBox::new(10.0, 20.0, 110.0, 70.0);
    assert_eq!(iou(&a, &a), 1.0);
  }

  #[test]
  fn iou_is_symmetric() {
    let boxes = [
      BBox::new(0.0, 0.0, 10.0, 10.0),
      BBox::new(5.0, 5.0, 15.0, 15.0),
      BBox::new(-3.5, 2.0, 4.25, 9.0),
      BBox::new(20.0, 20.0, 30.0, 30.0),
      BBox::new(1.0, 1.0, 1.0, 8.0),
    ];
    for a in &boxes {
      for b in &boxes {
        assert_eq!(iou(a, b), iou(b, a));
      }
    }
  }

  #[test]
  fn iou_of_disjoint_or_touching_boxes_is_zero() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    assert_eq!(iou(&a, &BBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    assert_eq!(iou(&a, &BBox::new(10.0, 0.0, 20.0, 10.0)), 0.0);
  }

  #[test]
  fn iou_partial_overlap() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BBox::new(5.0, 0.0, 15.0, 10.0);
    // 交 50，并 150
    assert_close(iou(&a, &b), 1.0 / 3.0);
  }

  #[test]
  fn single_anchor_is_decoded_and_rescaled() {
    let output = output_with(&[([320.0, 320.0, 100.0, 50.0], 2, 0.9)], 80);
    let detections = postprocessor(DetectorConfig::default()).decode(&output, 640, 1280, 960);

    assert_eq!(detections.len(), 1);
    let d = &detections[0];
    assert_eq!(d.label, "car");
    assert_eq!(d.class_id, 2);
    assert_close(d.confidence, 0.9);
    // scale_x = 2, scale_y = 1.5
    assert_close(d.bbox.left, 540.0);
    assert_close(d.bbox.top, 442.5);
    assert_close(d.bbox.right, 740.0);
    assert_close(d.bbox.bottom, 517.5);
  }

  #[test]
  fn normalized_boxes_are_expanded_first() {
    let output = output_with(&[([0.5, 0.5, 0.25, 0.125], 0, 0.8)], 80);
    let config = DetectorConfig {
      box_units: BoxUnits::Normalized,
      ..DetectorConfig::default()
    };
    let detections = postprocessor(config).decode(&output, 640, 640, 640);
    assert_eq!(detections.len(), 1);
    assert_close(detections[0].bbox.left, 240.0);
    assert_close(detections[0].bbox.top, 280.0);
    assert_close(detections[0].bbox.right, 400.0);
    assert_close(detections[0].bbox.bottom, 360.0);
  }

  #[test]
  fn below_threshold_is_discarded() {
    let output = output_with(&[([320.0, 320.0, 100.0, 50.0], 0, 0.49)], 80);
    let detections = postprocessor(DetectorConfig::default()).decode(&output, 640, 640, 640);
    assert!(detections.is_empty());
  }

  #[test]
  fn score_equal_to_threshold_is_kept() {
    let output = output_with(&[([320.0, 320.0, 100.0, 50.0], 0, 0.5)], 80);
    let detections = postprocessor(DetectorConfig::default()).decode(&output, 640, 640, 640);
    assert_eq!(detections.len(), 1);
  }

  #[test]
  fn best_class_wins() {
    let mut output = output_with(&[([100.0, 100.0, 20.0, 20.0], 3, 0.6)], 80);
    output.row_mut(BOX_ROWS + 7)[0] = 0.7;
    let detections = postprocessor(DetectorConfig::default()).decode(&output, 640, 640, 640);
    assert_eq!(detections[0].class_id, 7);
    assert_eq!(detections[0].label, "truck");
  }

  #[test]
  fn overlapping_boxes_keep_the_most_confident() {
    // 两个 100x100 的框水平错开 25 像素: 交 7500, 并 12500, IoU = 0.6
    let output = output_with(
      &[
        ([200.0, 200.0, 100.0, 100.0], 0, 0.7),
        ([225.0, 200.0, 100.0, 100.0], 0, 0.9),
      ],
      80,
    );
    let candidates = postprocessor(DetectorConfig::default()).candidates(&output, 640);
    assert_close(iou(&candidates[0].bbox, &candidates[1].bbox), 0.6);

    let detections = postprocessor(DetectorConfig::default()).decode(&output, 640, 640, 640);
    assert_eq!(detections.len(), 1);
    assert_close(detections[0].confidence, 0.9);
    assert_close(detections[0].bbox.left, 175.0);
  }

  #[test]
  fn suppression_is_not_chained_through_suppressed_boxes() {
    // A 抑制 B，B 与 C 重叠但 C 与 A 不重叠，C 必须保留
    let candidates = vec![
      DetectionCandidate {
        class_id: 0,
        score: 0.9,
        bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
      },
      DetectionCandidate {
        class_id: 0,
        score: 0.8,
        bbox: BBox::new(3.0, 0.0, 13.0, 10.0),
      },
      DetectionCandidate {
        class_id: 0,
        score: 0.7,
        bbox: BBox::new(6.0, 0.0, 16.0, 10.0),
      },
    ];
    let kept = non_max_suppression(candidates, 0.4, false);
    let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
    assert_eq!(scores, vec![0.9, 0.7]);
  }

  #[test]
  fn class_aware_suppression_keeps_other_classes() {
    let candidates = vec![
      DetectionCandidate {
        class_id: 0,
        score: 0.9,
        bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
      },
      DetectionCandidate {
        class_id: 1,
        score: 0.8,
        bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
      },
    ];
    assert_eq!(non_max_suppression(candidates.clone(), 0.4, false).len(), 1);
    assert_eq!(non_max_suppression(candidates, 0.4, true).len(), 2);
  }

  #[test]
  fn retained_detections_respect_both_thresholds() {
    // 一组有规律的候选框，检查输出满足阈值与两两 IoU 约束
    let mut anchors = Vec::new();
    for i in 0..40 {
      let offset = (i % 8) as f32 * 9.0;
      let row = (i / 8) as f32 * 35.0;
      let score = 0.3 + (i as f32 * 0.37) % 0.7;
      anchors.push(([100.0 + offset, 100.0 + row, 40.0, 40.0], i % 3, score));
    }
    let output = output_with(&anchors, 80);

    for &(conf, nms) in &[(0.5, 0.4), (0.3, 0.2), (0.8, 0.6)] {
      let config = DetectorConfig::default()
        .with_confidence_threshold(conf)
        .with_nms_threshold(nms);
      let detections = postprocessor(config).decode(&output, 640, 1280, 720);
      for (i, d1) in detections.iter().enumerate() {
        assert!(d1.confidence >= conf);
        for d2 in &detections[i + 1..] {
          assert!(d1.confidence >= d2.confidence);
          assert!(iou(&d1.bbox, &d2.bbox) <= nms + EPS);
        }
      }
    }
  }

  #[test]
  fn non_finite_scores_are_ignored() {
    let output = output_with(&[([320.0, 320.0, 10.0, 10.0], 0, f32::NAN)], 1);
    let config = DetectorConfig::default().with_num_classes(1);
    let pp = Postprocessor::new(&config, vec!["only".to_string()].into());
    assert!(pp.decode(&output, 640, 640, 640).is_empty());
  }
}
