// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bin/continuous_detect.rs - 持续检测
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use qianli::{
  FromUrl,
  input::InputWrapper,
  model::ModelSource,
  output::{LogSink, OutputWrapper},
  pipeline::PipelineController,
  task::{ContinuousTask, Task},
};
use tracing::info;

/// Qianli 持续检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型来源，例如 rknn:///models/yolov8n.rknn?confidence=0.5
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 yuv:///data/capture.nv21?width=1280&height=960&layout=nv21
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，例如 log:stdout 或 folder:///data/records
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型来源: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let source = ModelSource::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let mut controller = PipelineController::load(&source, output, LogSink);
  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(input, &mut controller)?;

  Ok(())
}
