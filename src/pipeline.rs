// 该文件是 Qianli （千里眼） 项目的一部分。
// src/pipeline.rs - 单帧检测流水线
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

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
  config::DetectorConfig,
  convert::ColorConverter,
  frame::RawFrame,
  gate::FrameGate,
  model::{InferenceAdapter, ModelSource, labels::coco_labels},
  output::{DetectionReport, DetectionSink, Status, StatusSink},
  postprocess::{Detection, Postprocessor},
  preprocess::Preprocessor,
  tensor::InputTensor,
};

/// 一次 `analyze` 调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
  /// 被节流策略拒绝
  Skipped,
  /// 帧格式无法处理，未报告任何结果
  Dropped,
  /// 模型不可用，报告了空结果
  Disabled,
  /// 推理失败，报告了空结果
  Failed,
  /// 正常处理，携带检测数量
  Processed(usize),
}

/// 流水线累计统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
  pub offered: u64,
  pub skipped: u64,
  pub dropped: u64,
  pub failed: u64,
  pub processed: u64,
}

impl PipelineStats {
  fn record(&mut self, outcome: FrameOutcome) {
    match outcome {
      FrameOutcome::Skipped => self.skipped += 1,
      FrameOutcome::Dropped => self.dropped += 1,
      FrameOutcome::Failed => self.failed += 1,
      FrameOutcome::Disabled | FrameOutcome::Processed(_) => self.processed += 1,
    }
  }
}

/// 串行驱动 节流 → 颜色转换 → 预处理 → 推理 → 后处理
///
/// 任何单帧错误都在此处被吸收，转为空结果和一条状态通知。
pub struct PipelineController<D, S> {
  gate: FrameGate,
  converter: ColorConverter,
  preprocessor: Preprocessor,
  postprocessor: Postprocessor,
  adapter: InferenceAdapter,
  input: Option<InputTensor>,
  model_input_size: usize,
  frame_counter: u64,
  stats: PipelineStats,
  detections: D,
  status: S,
}

impl<D: DetectionSink, S: StatusSink> PipelineController<D, S> {
  pub fn new(config: &DetectorConfig, adapter: InferenceAdapter, detections: D, status: S) -> Self {
    let model_input_size = adapter
      .metadata()
      .map(|m| m.input_size())
      .unwrap_or(config.model_input_size);
    let labels = adapter
      .metadata()
      .map(|m| m.labels().clone())
      .unwrap_or_else(|| coco_labels().into());
    let input = adapter.allocate_input();

    if let Some(reason) = adapter.disabled_reason() {
      warn!("检测功能已禁用: {}", reason);
    }

    Self {
      gate: FrameGate::from_config(config),
      converter: ColorConverter::new(),
      preprocessor: Preprocessor::new(model_input_size),
      postprocessor: Postprocessor::new(config, labels),
      adapter,
      input,
      model_input_size,
      frame_counter: 0,
      stats: PipelineStats::default(),
      detections,
      status,
    }
  }

  /// 加载模型并构建流水线，加载阶段通过 `status` 报告
  pub fn load(source: &ModelSource, detections: D, status: S) -> Self {
    let adapter = InferenceAdapter::load(source, &status);
    Self::new(&source.config, adapter, detections, status)
  }

  pub fn is_detection_enabled(&self) -> bool {
    self.adapter.is_ready()
  }

  pub fn stats(&self) -> PipelineStats {
    self.stats
  }

  pub fn gate(&self) -> &FrameGate {
    &self.gate
  }

  pub fn detection_sink(&self) -> &D {
    &self.detections
  }

  /// 处理相机送来的一帧，永不返回错误
  ///
  /// 调用方需保证调用不重叠；`now_ms` 必须来自单调时钟。
  pub fn analyze(&mut self, frame: &RawFrame, now_ms: u64) -> FrameOutcome {
    self.frame_counter = self.frame_counter.wrapping_add(1);
    let frame_index = self.frame_counter;
    self.stats.offered += 1;

    let outcome = if self.gate.accept(frame_index, now_ms) {
      self.process(frame_index, frame)
    } else {
      FrameOutcome::Skipped
    };
    self.stats.record(outcome);
    outcome
  }

  /// 绕过节流直接处理一帧
  pub fn process(&mut self, frame_index: u64, frame: &RawFrame) -> FrameOutcome {
    let dimensions = frame.oriented_dimensions();

    // 格式不支持的帧无论模型是否可用都直接丢弃
    if let Err(e) = self.converter.check_format(frame) {
      warn!("帧 {} 格式不支持: {}", frame_index, e);
      self.status.on_status(&Status::FrameDropped(e.to_string()));
      return FrameOutcome::Dropped;
    }

    let Some(input) = self.input.as_mut() else {
      Self::report(&self.detections, frame_index, dimensions, Vec::new(), Duration::ZERO);
      return FrameOutcome::Disabled;
    };

    let image = match self.converter.convert(frame) {
      Ok(image) => image,
      Err(e) => {
        warn!("帧 {} 转换失败: {}", frame_index, e);
        self.status.on_status(&Status::FrameDropped(e.to_string()));
        return FrameOutcome::Dropped;
      }
    };

    if let Err(e) = self.preprocessor.prepare(&image, input) {
      warn!("帧 {} 预处理失败: {}", frame_index, e);
      self.status.on_status(&Status::FrameDropped(e.to_string()));
      return FrameOutcome::Dropped;
    }
    drop(image);

    let started = Instant::now();
    let result = self.adapter.run(input);
    let inference_time = started.elapsed();

    let detections = match result {
      Ok(Some(output)) => {
        self
          .postprocessor
          .decode(output, self.model_input_size, dimensions.0, dimensions.1)
      }
      Ok(None) => {
        Self::report(&self.detections, frame_index, dimensions, Vec::new(), inference_time);
        return FrameOutcome::Disabled;
      }
      Err(e) => {
        warn!("帧 {} 推理失败, 按无检测结果处理: {}", frame_index, e);
        self
          .status
          .on_status(&Status::InferenceFailed(e.to_string()));
        Self::report(&self.detections, frame_index, dimensions, Vec::new(), inference_time);
        return FrameOutcome::Failed;
      }
    };

    let count = detections.len();
    debug!(
      "帧 {} 处理完成: {} 个检测结果, 推理耗时 {:.2?}",
      frame_index, count, inference_time
    );
    Self::report(&self.detections, frame_index, dimensions, detections, inference_time);
    FrameOutcome::Processed(count)
  }

  fn report(
    sink: &D,
    frame_index: u64,
    (width, height): (usize, usize),
    detections: Vec<Detection>,
    inference_time: Duration,
  ) {
    let report = DetectionReport::new(
      frame_index,
      width as u32,
      height as u32,
      detections,
      inference_time,
    );
    sink.on_detections(&report);
  }

  /// 输出累计统计
  pub fn log_summary(&self) {
    let stats = &self.stats;
    info!(
      "共收到 {} 帧: 处理 {} 帧, 节流跳过 {} 帧, 丢弃 {} 帧, 推理失败 {} 帧",
      stats.offered, stats.processed, stats.skipped, stats.dropped, stats.failed
    );
  }
}
