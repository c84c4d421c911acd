// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理压测
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
  output::{LogSink, NullSink},
  pipeline::PipelineController,
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// Qianli 压测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型来源
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，只使用第一帧
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 重复次数
  #[arg(long, default_value = "1000", value_name = "COUNT")]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型来源: {}", args.model);
  info!("输入来源: {}", args.input);

  let input = InputWrapper::from_url(&args.input)?;
  let source = ModelSource::from_url(&args.model)?;

  let mut controller = PipelineController::load(&source, NullSink, LogSink);
  RepeatShotTask::default()
    .with_repeat(args.repeat)
    .run_task(input, &mut controller)?;

  Ok(())
}
