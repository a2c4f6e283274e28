// 该文件是 Lingshi （零食） 项目的一部分。
// src/format.rs - 分类结果格式化
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

use crate::model::{Outcome, Predictions};

pub const NOTHING_FOUND: &str = "nothing found";
pub const NOT_SURE: &str = "not sure";
pub const UNRECOGNIZED: &str = "???";

/// 低于该置信度时单次模式只报告 "not sure"
pub const NOT_SURE_THRESHOLD: f32 = 0.6;

pub const TOP_K: usize = 3;

/// 格式化策略
///
/// 置信度阈值只在单次模式下生效，实时模式总是给出原始的前三项。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
  SingleShot,
  Live,
}

impl FormatMode {
  pub fn format(self, outcome: &Outcome) -> String {
    match outcome {
      Outcome::Ranked(predictions) => self.format_predictions(predictions),
      Outcome::Unrecognized => UNRECOGNIZED.to_string(),
      Outcome::Failed(message) => format!("error: {}", message),
    }
  }

  fn format_predictions(self, predictions: &Predictions) -> String {
    let Some(top) = predictions.top() else {
      return NOTHING_FOUND.to_string();
    };

    if self == FormatMode::SingleShot && top.confidence < NOT_SURE_THRESHOLD {
      return NOT_SURE.to_string();
    }

    predictions
      .top_k(TOP_K)
      .iter()
      .map(|p| format!("{} {:.1}%", p.label, p.confidence as f64 * 100.0))
      .collect::<Vec<_>>()
      .join("\n")
  }
}
