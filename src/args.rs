// 该文件是 Lingshi （零食） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use url::Url;

use lingshi::pipeline::{DEFAULT_INFLIGHT, PipelineConfig};

/// Lingshi 零食识别
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 识别一张图片并打印结果
  Oneshot(Common),
  /// 对相机画面做实时识别
  Live(Live),
}

#[derive(ClapArgs, Debug)]
pub struct Common {
  /// 模型路径，例如 onnx:///models/snacks.onnx?labels=/models/labels.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 image:///tmp/apple.png 或 gst://camera/dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出方式
  #[arg(long, value_name = "OUTPUT", default_value = "console:")]
  pub output: Url,
}

#[derive(ClapArgs, Debug)]
pub struct Live {
  #[command(flatten)]
  pub common: Common,

  /// 同时进行的最大推理数
  #[arg(long, value_name = "N", default_value_t = DEFAULT_INFLIGHT)]
  pub inflight: usize,

  /// 停止时等待进行中推理的时间（毫秒）
  #[arg(long, value_name = "MS", default_value_t = 2000)]
  pub drain_timeout_ms: u64,

  /// 推理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,
}

impl Live {
  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig::default()
      .with_inflight(self.inflight)
      .with_drain_timeout(Duration::from_millis(self.drain_timeout_ms))
  }
}
