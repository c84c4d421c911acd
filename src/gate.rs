// 该文件是 Qianli （千里眼） 项目的一部分。
// src/gate.rs - 帧节流
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

use tracing::trace;

use crate::config::DetectorConfig;

/// 决定哪些帧进入流水线
///
/// 同时满足两个条件的帧才会被接受：帧序号是 `skip_interval` 的整数倍，
/// 且距上次接受至少经过 `min_interval_ms` 毫秒。被拒绝的帧不缓存。
#[derive(Debug, Clone)]
pub struct FrameGate {
  skip_interval: u64,
  min_interval_ms: u64,
  last_accepted_ms: Option<u64>,
}

impl FrameGate {
  pub fn new(skip_interval: u64, min_interval_ms: u64) -> Self {
    Self {
      skip_interval: skip_interval.max(1),
      min_interval_ms,
      last_accepted_ms: None,
    }
  }

  pub fn from_config(config: &DetectorConfig) -> Self {
    Self::new(config.frame_skip_interval, config.min_processing_interval_ms)
  }

  pub fn skip_interval(&self) -> u64 {
    self.skip_interval
  }

  pub fn min_interval_ms(&self) -> u64 {
    self.min_interval_ms
  }

  pub fn last_accepted_ms(&self) -> Option<u64> {
    self.last_accepted_ms
  }

  pub fn accept(&mut self, frame_index: u64, now_ms: u64) -> bool {
    if frame_index % self.skip_interval != 0 {
      trace!("帧 {} 被跳帧策略丢弃", frame_index);
      return false;
    }

    if let Some(last) = self.last_accepted_ms {
      // 时钟回退时视为间隔不足
      let elapsed = now_ms.saturating_sub(last);
      if elapsed < self.min_interval_ms {
        trace!("帧 {} 距上次处理仅 {} ms, 丢弃", frame_index, elapsed);
        return false;
      }
    }

    self.last_accepted_ms = Some(now_ms);
    true
  }

  /// 清除上次接受的时间，例如相机会话重建之后
  pub fn reset(&mut self) {
    self.last_accepted_ms = None;
  }
}

impl Default for FrameGate {
  fn default() -> Self {
    Self::from_config(&DetectorConfig::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 以固定帧间隔投喂帧，返回被接受帧的 (序号, 时间)
  fn drive(gate: &mut FrameGate, frames: u64, frame_period_ms: u64) -> Vec<(u64, u64)> {
    (1..=frames)
      .map(|i| (i, i * frame_period_ms))
      .filter(|&(i, now)| gate.accept(i, now))
      .collect()
  }

  #[test]
  fn accepts_every_nth_frame_when_time_allows() {
    let mut gate = FrameGate::new(3, 0);
    let accepted: Vec<u64> = drive(&mut gate, 10, 1).into_iter().map(|(i, _)| i).collect();
    assert_eq!(accepted, vec![3, 6, 9]);
  }

  #[test]
  fn both_throttles_must_pass() {
    // 30 fps 相机，每 3 帧约 100 ms，最小间隔 200 ms
    let mut gate = FrameGate::new(3, 200);
    let accepted = drive(&mut gate, 30, 33);
    assert_eq!(
      accepted,
      vec![(3, 99), (12, 396), (21, 693), (30, 990)]
    );
  }

  #[test]
  fn at_most_one_acceptance_per_window() {
    for &(skip, interval, period) in &[(1, 200, 7), (3, 200, 33), (2, 50, 16), (5, 1000, 10)] {
      let mut gate = FrameGate::new(skip, interval);
      let accepted = drive(&mut gate, 2000, period);
      assert!(!accepted.is_empty());
      for pair in accepted.windows(2) {
        let ((i0, t0), (i1, t1)) = (pair[0], pair[1]);
        assert!(t1 - t0 >= interval, "间隔不足: {:?}", pair);
        assert!(i1 - i0 >= skip, "跳帧不足: {:?}", pair);
      }
    }
  }

  #[test]
  fn rejected_frames_do_not_move_the_window() {
    let mut gate = FrameGate::new(1, 200);
    assert!(gate.accept(1, 1000));
    assert!(!gate.accept(2, 1150));
    assert!(!gate.accept(3, 1199));
    assert!(gate.accept(4, 1200));
    assert_eq!(gate.last_accepted_ms(), Some(1200));
  }

  #[test]
  fn clock_going_backwards_is_rejected() {
    let mut gate = FrameGate::new(1, 200);
    assert!(gate.accept(1, 5000));
    assert!(!gate.accept(2, 100));
    gate.reset();
    assert!(gate.accept(3, 100));
  }

  #[test]
  fn zero_skip_interval_accepts_every_frame() {
    let mut gate = FrameGate::new(0, 0);
    assert_eq!(gate.skip_interval(), 1);
    assert!((1..=5).all(|i| gate.accept(i, i)));
  }
}
