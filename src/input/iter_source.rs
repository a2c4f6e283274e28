// 该文件是 Lingshi （零食） 项目的一部分。
// src/input/iter_source.rs - 迭代器帧源
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  input::{CameraSource, FrameCallback},
};

pub type BoxedFrames = Box<dyn Iterator<Item = Frame> + Send>;

#[derive(Error, Debug)]
pub enum IterSourceError {
  #[error("帧源已经启动过")]
  AlreadyStarted,
  #[error("无法启动采集线程: {0}")]
  Spawn(#[from] std::io::Error),
}

/// 在采集线程上逐帧推送迭代器内容的帧源
///
/// 可选的 `interval` 模拟相机帧率。回调阻塞时采集线程一起阻塞，
/// 不会预读后续帧。
pub struct IterSource<I> {
  frames: Option<I>,
  interval: Option<Duration>,
  stop_flag: Arc<AtomicBool>,
  finished: Arc<AtomicBool>,
  worker: Option<JoinHandle<()>>,
}

impl<I> IterSource<I> {
  pub fn new(frames: I) -> Self {
    Self {
      frames: Some(frames),
      interval: None,
      stop_flag: Arc::new(AtomicBool::new(false)),
      finished: Arc::new(AtomicBool::new(false)),
      worker: None,
    }
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = Some(interval);
    self
  }

  pub fn with_fps(self, fps: f64) -> Self {
    if fps > 0.0 {
      self.with_interval(Duration::from_secs_f64(1.0 / fps))
    } else {
      self
    }
  }
}

impl<I: Iterator<Item = Frame> + Send + 'static> CameraSource for IterSource<I> {
  type Error = IterSourceError;

  fn start(&mut self, mut on_frame: FrameCallback) -> Result<(), Self::Error> {
    let frames = self.frames.take().ok_or(IterSourceError::AlreadyStarted)?;
    let interval = self.interval;
    let stop_flag = Arc::clone(&self.stop_flag);
    let finished = Arc::clone(&self.finished);

    let worker = thread::Builder::new()
      .name("lingshi-capture".to_string())
      .spawn(move || {
        let mut count = 0u64;
        for frame in frames {
          if stop_flag.load(Ordering::Acquire) {
            break;
          }
          let tick = Instant::now();
          on_frame(frame);
          count += 1;
          if let Some(interval) = interval {
            thread::sleep(interval.saturating_sub(tick.elapsed()));
          }
        }
        finished.store(true, Ordering::Release);
        info!("帧源结束，共推送 {} 帧", count);
      })?;

    debug!("采集线程已启动");
    self.worker = Some(worker);
    Ok(())
  }

  fn stop(&mut self) {
    self.stop_flag.store(true, Ordering::Release);
    if let Some(worker) = self.worker.take() {
      if worker.join().is_err() {
        warn!("采集线程异常退出");
      }
    }
  }

  fn is_finished(&self) -> bool {
    self.finished.load(Ordering::Acquire)
  }
}

impl<I> Drop for IterSource<I> {
  fn drop(&mut self) {
    self.stop_flag.store(true, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::mpsc;

  fn frames(n: u8) -> impl Iterator<Item = Frame> + Send + 'static {
    (0..n).map(|i| Frame::filled(1, 1, [i, 0, 0]).unwrap())
  }

  #[test]
  fn pushes_every_frame_in_order() {
    let (tx, rx) = mpsc::channel();
    let mut source = IterSource::new(frames(5));
    source
      .start(Box::new(move |frame| tx.send(frame.pixel(0, 0)[0]).unwrap()))
      .unwrap();

    let received: Vec<u8> = rx.iter().take(5).collect();
    assert_eq!(received, [0, 1, 2, 3, 4]);
    source.stop();
    assert!(source.is_finished());
  }

  #[test]
  fn cannot_start_twice() {
    let mut source = IterSource::new(frames(1));
    source.start(Box::new(|_| {})).unwrap();
    assert!(matches!(
      source.start(Box::new(|_| {})),
      Err(IterSourceError::AlreadyStarted)
    ));
    source.stop();
  }

  #[test]
  fn stop_interrupts_endless_stream() {
    let endless = std::iter::repeat_with(|| Frame::filled(1, 1, [0, 0, 0]).unwrap());
    let mut source = IterSource::new(endless).with_fps(200.0);
    source.start(Box::new(|_| {})).unwrap();
    thread::sleep(Duration::from_millis(30));
    source.stop();
    assert!(source.is_finished());
  }
}
