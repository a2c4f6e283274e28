// 该文件是 Lingshi （零食） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lingshi::{
  FromUrl,
  input::InputWrapper,
  model::{OnnxClassifier, OnnxClassifierBuilder},
  output::OutputWrapper,
  task::{ContinuousTask, OneShotTask, Task},
};

use args::{Args, Command, Common};

fn open(common: &Common) -> Result<(InputWrapper, OnnxClassifier, OutputWrapper)> {
  info!("模型文件路径: {}", common.model);
  info!("输入来源: {}", common.input);
  info!("输出路径: {}", common.output);

  let input = InputWrapper::from_url(&common.input)?;
  let model = OnnxClassifierBuilder::from_url(&common.model)?.build()?;
  let output = OutputWrapper::from_url(&common.output)?;
  Ok((input, model, output))
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  match args.command {
    Command::Oneshot(common) => {
      let (input, model, output) = open(&common)?;
      OneShotTask.run_task(input, model, output)?;
    }
    Command::Live(live) => {
      let (input, model, output) = open(&live.common)?;
      ContinuousTask::default()
        .with_config(live.pipeline_config())
        .with_frame_number(live.frame_number)
        .run_task(input, model, output)?;
    }
  }

  Ok(())
}
