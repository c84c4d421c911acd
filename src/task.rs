// 该文件是 Qianli （千里眼） 项目的一部分。
// src/task.rs - 任务调度
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

use std::{
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::{
  frame::RawFrame,
  output::{DetectionSink, StatusSink},
  pipeline::{FrameOutcome, PipelineController, PipelineStats},
};

pub trait Task<I, D, S>: Sized {
  type Error;
  fn run_task(
    self,
    input: I,
    controller: &mut PipelineController<D, S>,
  ) -> Result<PipelineStats, Self::Error>;
}

/// 对同一帧反复执行完整流水线，统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }
}

// 前两次作为预热不计入平均值
const WARMUP_TIMES: usize = 2;

impl<I, D, S> Task<I, D, S> for RepeatShotTask
where
  I: Iterator<Item = RawFrame>,
  D: DetectionSink,
  S: StatusSink,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    controller: &mut PipelineController<D, S>,
  ) -> Result<PipelineStats, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    if !controller.is_detection_enabled() {
      warn!("模型不可用, 测得的只是颜色转换与预处理的耗时");
    }

    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = Instant::now();
      let outcome = controller.process(i as u64 + 1, &frame);
      let elapsed = now.elapsed();
      info!("({})处理完成 {:?}，耗时: {:.2?}", i, outcome, elapsed);
      if outcome == FrameOutcome::Dropped {
        anyhow::bail!("输入帧无法处理");
      }
      times.push(elapsed);
    }

    let measured = if times.len() > WARMUP_TIMES {
      &times[WARMUP_TIMES..]
    } else {
      &times[..]
    };
    warn!(
      "平均处理时间: {:.2?}",
      measured.iter().sum::<Duration>() / measured.len() as u32
    );

    Ok(controller.stats())
  }
}

/// 持续从输入取帧交给流水线，直到输入结束、达到帧数上限或收到中断信号
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<I, D, S> Task<I, D, S> for ContinuousTask
where
  I: Iterator<Item = RawFrame>,
  D: DetectionSink,
  S: StatusSink,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    controller: &mut PipelineController<D, S>,
  ) -> Result<PipelineStats, Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();

    let installed = ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    });
    if let Err(e) = installed {
      warn!("无法注册中断信号处理: {}", e);
    }

    let started = Instant::now();
    let mut frame_index = 0;
    for frame in input {
      frame_index += 1;
      let now_ms = started.elapsed().as_millis() as u64;
      let outcome = controller.analyze(&frame, now_ms);
      if outcome != FrameOutcome::Skipped {
        info!("第 {} 帧: {:?}", frame_index, outcome);
      }

      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    controller.log_summary();
    info!("任务完成，退出");
    Ok(controller.stats())
  }
}
