// 该文件是 Qianli （千里眼） 项目的一部分。
// tests/pipeline.rs - 端到端流水线测试
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

use std::{io::Write, path::Path, sync::mpsc};

use url::Url;

use qianli::{
  FromUrl,
  input::InputWrapper,
  model::ModelSource,
  output::{ChannelSink, DetectionReport, Status},
  pipeline::{FrameOutcome, PipelineController},
  task::{ContinuousTask, Task},
};

/// 3 个锚点、2 个类别：两只重叠的猫和一只狗
const CANNED_MODEL: &str = r#"{
  "shape": [1, 6, 3],
  "outputs": [[
    16, 17, 4,
    16, 16, 4,
    8, 8, 4,
    8, 8, 4,
    0.9, 0.8, 0.1,
    0.0, 0.1, 0.7
  ]]
}"#;

fn write_file(dir: &Path, name: &str, content: &str) -> String {
  let path = dir.join(name);
  let mut file = std::fs::File::create(&path).unwrap();
  file.write_all(content.as_bytes()).unwrap();
  Url::from_file_path(&path).unwrap().path().to_string()
}

#[test]
fn canned_model_detects_and_suppresses() {
  let dir = tempfile::tempdir().unwrap();
  let model = write_file(dir.path(), "model.json", CANNED_MODEL);
  let labels = write_file(dir.path(), "labels.json", r#"["cat", "dog"]"#);
  let url = Url::parse(&format!(
    "canned://{}?input=32&classes=2&anchors=3&skip=1&interval=0&labels={}",
    model, labels
  ))
  .unwrap();
  let source = ModelSource::from_url(&url).unwrap();

  let (report_tx, report_rx) = mpsc::channel::<DetectionReport>();
  let (status_tx, status_rx) = mpsc::channel::<Status>();
  let mut controller = PipelineController::load(
    &source,
    ChannelSink::new(report_tx),
    ChannelSink::new(status_tx),
  );
  assert!(controller.is_detection_enabled());

  let statuses: Vec<Status> = status_rx.try_iter().collect();
  assert_eq!(statuses.first().map(|s| matches!(s, Status::LoadingModel(_))), Some(true));
  assert_eq!(statuses.last(), Some(&Status::Ready));

  let input =
    InputWrapper::from_url(&Url::parse("pattern://local?width=64&height=64&frames=2").unwrap())
      .unwrap();
  let outcomes: Vec<_> = input
    .enumerate()
    .map(|(i, frame)| controller.analyze(&frame, i as u64 * 100))
    .collect();
  assert_eq!(outcomes, vec![FrameOutcome::Processed(2); 2]);

  let reports: Vec<DetectionReport> = report_rx.try_iter().collect();
  assert_eq!(reports.len(), 2);
  let report = &reports[0];
  assert_eq!(report.counts.get("cat"), Some(&1));
  assert_eq!(report.counts.get("dog"), Some(&1));

  let labels: Vec<&str> = report.detections.iter().map(|d| d.label.as_str()).collect();
  assert_eq!(labels, vec!["cat", "dog"]);
  assert!((report.detections[0].confidence - 0.9).abs() < 1e-6);
  let cat = report.detections[0].bbox;
  assert!((cat.left - 24.0).abs() < 1e-4 && (cat.right - 40.0).abs() < 1e-4);
  assert!((cat.top - 24.0).abs() < 1e-4 && (cat.bottom - 40.0).abs() < 1e-4);
}

#[test]
fn missing_model_keeps_pipeline_running() {
  let url = Url::parse("canned:///no/such/model.json?skip=1&interval=0").unwrap();
  let source = ModelSource::from_url(&url).unwrap();

  let (report_tx, report_rx) = mpsc::channel::<DetectionReport>();
  let (status_tx, status_rx) = mpsc::channel::<Status>();
  let mut controller = PipelineController::load(
    &source,
    ChannelSink::new(report_tx),
    ChannelSink::new(status_tx),
  );
  assert!(!controller.is_detection_enabled());

  let input =
    InputWrapper::from_url(&Url::parse("pattern://local?width=16&height=16").unwrap()).unwrap();
  let stats = ContinuousTask::default()
    .with_frame_number(Some(6))
    .run_task(input, &mut controller)
    .unwrap();
  assert_eq!(stats.offered, 6);
  assert_eq!(stats.processed, 6);

  let reports: Vec<DetectionReport> = report_rx.try_iter().collect();
  assert_eq!(reports.len(), 6);
  assert!(reports.iter().all(DetectionReport::is_empty));

  let failures = status_rx
    .try_iter()
    .filter(|s| matches!(s, Status::LoadFailed(_)))
    .count();
  assert_eq!(failures, 1);
}
