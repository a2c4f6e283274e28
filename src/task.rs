// 该文件是 Lingshi （零食） 项目的一部分。
// src/task.rs - 单次与实时分类任务
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
  sync::mpsc::{self, Receiver, RecvTimeoutError},
  thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{info, warn};

use crate::{
  format::FormatMode,
  frame::Frame,
  input::CameraSource,
  model::{Classifier, Outcome},
  output::Present,
  pipeline::{DrainReport, Pipeline, PipelineConfig, PipelineStats, classify_caught},
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 单次分类：不经过准入限流，使用单次模式的格式化策略
pub fn classify_once<M: Classifier>(model: &M, frame: &Frame) -> String {
  let mut context = model.new_context();
  let outcome = classify_caught(model, &mut context, frame);
  if let Outcome::Failed(message) = &outcome {
    warn!("分类失败: {}", message);
  }
  FormatMode::SingleShot.format(&outcome)
}

pub struct OneShotTask;

impl<I, M, O> Task<I, M, O> for OneShotTask
where
  I: Iterator<Item = Frame>,
  M: Classifier,
  O: Present,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!(
      "输入帧获取成功 ({}x{})，开始推理...",
      frame.width(),
      frame.height()
    );
    let now = Instant::now();
    let text = classify_once(&model, &frame);
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.present(&text)?;

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<u64>,
  config: PipelineConfig,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_config(mut self, config: PipelineConfig) -> Self {
    self.config = config;
    self
  }
}

impl ContinuousTask {
  /// 运行实时识别，直到 `stop` 收到信号、达到帧数或输入源结束
  pub fn run_until<I, M, O>(
    self,
    input: I,
    model: M,
    output: O,
    stop: &Receiver<()>,
  ) -> anyhow::Result<PipelineStats>
  where
    I: CameraSource + Send + 'static,
    M: Classifier + 'static,
    O: Present + Send + 'static,
    O::Error: std::fmt::Display,
  {
    let mut pipeline = Pipeline::new(model, output, self.config)?;
    pipeline.start(input)?;

    let started = Instant::now();
    loop {
      match stop.recv_timeout(POLL_INTERVAL) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
          warn!("中断信号接收，退出任务循环");
          break;
        }
        Err(RecvTimeoutError::Timeout) => {}
      }

      let stats = pipeline.stats();
      if self.frame_number.is_some_and(|n| stats.dispatched >= n) {
        info!("达到指定帧数 {}, 退出任务循环", stats.dispatched);
        break;
      }
      if pipeline.source_finished() {
        info!("输入源结束，退出任务循环");
        break;
      }
    }

    let stats = pipeline.stats();
    match pipeline.shutdown() {
      DrainReport::Drained => info!("所有推理已完成"),
      DrainReport::Reclaimed { abandoned } => warn!("放弃了 {} 个未完成的推理", abandoned),
    }

    let elapsed = started.elapsed();
    info!(
      "任务完成: 提交 {} 帧, 推理 {} 帧, 丢弃 {} 帧, 失败 {} 帧, 用时 {:.2?}",
      stats.submitted, stats.dispatched, stats.dropped, stats.failed, elapsed
    );
    if stats.dispatched > 0 {
      info!(
        "平均吞吐: {:.1} 帧/秒",
        stats.dispatched as f64 / elapsed.as_secs_f64()
      );
    }
    Ok(stats)
  }
}

impl<I, M, O> Task<I, M, O> for ContinuousTask
where
  I: CameraSource + Send + 'static,
  M: Classifier + 'static,
  O: Present + Send + 'static,
  O::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .context("无法设置 Ctrl-C 处理器")?;

    self.run_until(input, model, output, &rx)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    input::IterSource,
    model::{Prediction, Predictions},
  };
  use std::{fmt, sync::Mutex};

  #[derive(Debug)]
  struct BadBuffer;

  impl fmt::Display for BadBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "bad buffer")
    }
  }

  impl std::error::Error for BadBuffer {}

  struct Fixed(Option<Vec<(&'static str, f32)>>);

  impl Classifier for Fixed {
    type Context = ();
    type Error = BadBuffer;

    fn new_context(&self) {}

    fn classify(&self, _: &mut (), _: &Frame) -> Result<Option<Predictions>, BadBuffer> {
      let items = self.0.as_ref().ok_or(BadBuffer)?;
      Ok(Some(Predictions::ranked(
        items
          .iter()
          .map(|&(label, confidence)| Prediction::new(label, confidence))
          .collect(),
      )))
    }
  }

  struct Panicky;

  impl Classifier for Panicky {
    type Context = ();
    type Error = BadBuffer;

    fn new_context(&self) {}

    fn classify(&self, _: &mut (), _: &Frame) -> Result<Option<Predictions>, BadBuffer> {
      panic!("boom")
    }
  }

  #[derive(Default)]
  struct Collect(Mutex<Vec<String>>);

  impl Present for &Collect {
    type Error = std::io::Error;

    fn present(&self, text: &str) -> Result<(), Self::Error> {
      self.0.lock().unwrap().push(text.to_string());
      Ok(())
    }
  }

  fn frame() -> Frame {
    Frame::filled(2, 2, [0, 0, 0]).unwrap()
  }

  #[test]
  fn classify_once_formats_single_shot() {
    let model = Fixed(Some(vec![("banana", 0.82), ("apple", 0.95), ("pear", 0.61)]));
    assert_eq!(
      classify_once(&model, &frame()),
      "apple 95.0%\nbanana 82.0%\npear 61.0%"
    );

    let unsure = Fixed(Some(vec![("apple", 0.4)]));
    assert_eq!(classify_once(&unsure, &frame()), "not sure");

    let empty = Fixed(Some(vec![]));
    assert_eq!(classify_once(&empty, &frame()), "nothing found");

    let failing = Fixed(None);
    assert_eq!(classify_once(&failing, &frame()), "error: bad buffer");

    assert_eq!(
      classify_once(&Panicky, &frame()),
      "error: classifier panicked: boom"
    );
  }

  #[test]
  fn one_shot_presents_first_frame() {
    let sink = Collect::default();
    let model = Fixed(Some(vec![("apple", 0.9)]));
    OneShotTask
      .run_task(vec![frame(), frame()].into_iter(), model, &sink)
      .unwrap();
    assert_eq!(*sink.0.lock().unwrap(), ["apple 90.0%"]);
  }

  #[test]
  fn one_shot_without_frame_fails() {
    let sink = Collect::default();
    let model = Fixed(Some(vec![]));
    assert!(
      OneShotTask
        .run_task(std::iter::empty(), model, &sink)
        .is_err()
    );
    assert!(sink.0.lock().unwrap().is_empty());
  }

  fn apple() -> Fixed {
    Fixed(Some(vec![("apple", 0.9)]))
  }

  #[test]
  fn continuous_stops_at_frame_number() {
    let (_stop_tx, stop) = mpsc::channel();
    let (tx, rx) = mpsc::channel::<String>();
    let source = IterSource::new(std::iter::repeat_with(frame));

    let stats = ContinuousTask::default()
      .with_frame_number(Some(5))
      .run_until(source, apple(), tx, &stop)
      .unwrap();
    assert!(stats.dispatched >= 5);
    assert!(rx.iter().count() as u64 >= 5);
  }

  #[test]
  fn continuous_stops_when_source_finishes() {
    let (_stop_tx, stop) = mpsc::channel();
    let (tx, rx) = mpsc::channel::<String>();
    let source = IterSource::new((0..3).map(|_| frame()));

    let stats = ContinuousTask::default()
      .with_config(PipelineConfig::default().with_inflight(1))
      .run_until(source, apple(), tx, &stop)
      .unwrap();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.dispatched, 3);
    assert_eq!(stats.dropped, 0);
    let results: Vec<String> = rx.iter().collect();
    assert_eq!(results, vec!["apple 90.0%"; 3]);
  }

  #[test]
  fn continuous_stops_on_signal() {
    let (stop_tx, stop) = mpsc::channel();
    stop_tx.send(()).unwrap();
    let (tx, _rx) = mpsc::channel::<String>();
    let source = IterSource::new(std::iter::repeat_with(frame));

    let started = Instant::now();
    ContinuousTask::default()
      .run_until(source, apple(), tx, &stop)
      .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
  }
}
