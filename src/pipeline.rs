// 该文件是 Lingshi （零食） 项目的一部分。
// src/pipeline.rs - 限流的实时分类流水线
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

//! # 实时分类流水线
//!
//! 相机以自身的帧率推送帧，流水线最多同时运行 N 次推理：
//!
//! 1. `submit` 先从准入令牌池取一个令牌，取不到就阻塞调用方（通常是相机回调线程），
//!    这样相机层会自行丢帧，流水线内部不会排队；
//! 2. 按轮转顺序选一个推理槽，在独立的工作线程中执行分类；
//! 3. 分类结束（成功、失败或 panic）后令牌随析构归还；
//! 4. 格式化后的结果交给展示线程，由它调用 [`Present`]。
//!
//! 帧之间不保证顺序，展示端总是反映最近一次 *完成* 的分类。

use std::{
  any::Any,
  panic::{self, AssertUnwindSafe},
  sync::{
    Arc, PoisonError,
    atomic::{AtomicU64, Ordering},
    mpsc::{self, Sender},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  format::FormatMode,
  frame::Frame,
  input::CameraSource,
  model::{Classifier, Outcome},
  output::Present,
};

mod admission;
mod slots;

pub use self::admission::{AdmissionPool, AdmissionToken};
pub use self::slots::SlotRing;

pub const DEFAULT_INFLIGHT: usize = 2;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("并发推理数量必须大于 0")]
  ZeroCapacity,
  #[error("流水线已连接相机源")]
  AlreadyRunning,
  #[error("相机源启动失败: {0}")]
  Source(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("无法启动线程: {0}")]
  Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  inflight: usize,
  drain_timeout: Duration,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      inflight: DEFAULT_INFLIGHT,
      drain_timeout: DEFAULT_DRAIN_TIMEOUT,
    }
  }
}

impl PipelineConfig {
  pub fn with_inflight(mut self, inflight: usize) -> Self {
    self.inflight = inflight;
    self
  }

  pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
    self.drain_timeout = drain_timeout;
    self
  }

  pub fn inflight(&self) -> usize {
    self.inflight
  }

  pub fn drain_timeout(&self) -> Duration {
    self.drain_timeout
  }
}

/// `submit` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
  Dispatched { slot: usize },
  Dropped,
}

/// `stop` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReport {
  Drained,
  Reclaimed { abandoned: usize },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
  pub submitted: u64,
  pub dispatched: u64,
  pub dropped: u64,
  pub completed: u64,
  pub failed: u64,
  pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
  submitted: AtomicU64,
  dispatched: AtomicU64,
  dropped: AtomicU64,
  completed: AtomicU64,
  failed: AtomicU64,
}

impl Counters {
  fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }
}

enum Delivery {
  Text(String),
  Shutdown,
}

struct Shared<M: Classifier> {
  classifier: M,
  slots: SlotRing<M::Context>,
  admission: Arc<AdmissionPool>,
  counters: Counters,
  deliveries: Sender<Delivery>,
}

impl<M: Classifier> Shared<M> {
  fn deliver(&self, text: String) {
    if self.deliveries.send(Delivery::Text(text)).is_err() {
      debug!("展示线程已退出，丢弃结果");
    }
  }

  fn run_slot(&self, slot: usize, frame: Frame, token: AdmissionToken) {
    let started = Instant::now();
    let outcome = {
      let cell = self.slots.checkout(slot);
      let mut context = cell.lock().unwrap_or_else(PoisonError::into_inner);
      classify_caught(&self.classifier, &mut *context, &frame)
    };

    match &outcome {
      Outcome::Failed(message) => {
        error!("推理槽 {} 分类失败: {}", slot, message);
        Counters::bump(&self.counters.failed);
      }
      _ => Counters::bump(&self.counters.completed),
    }
    debug!("推理槽 {} 完成，耗时: {:.2?}", slot, started.elapsed());

    self.deliver(FormatMode::Live.format(&outcome));
    drop(token);
  }
}

/// 调用分类器，把 panic 转成失败结果
pub(crate) fn classify_caught<M: Classifier>(
  classifier: &M,
  context: &mut M::Context,
  frame: &Frame,
) -> Outcome {
  match panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(context, frame))) {
    Ok(result) => Outcome::from(result),
    Err(payload) => Outcome::Failed(panic_message(payload.as_ref())),
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    format!("classifier panicked: {}", message)
  } else if let Some(message) = payload.downcast_ref::<String>() {
    format!("classifier panicked: {}", message)
  } else {
    "classifier panicked".to_string()
  }
}

/// 可克隆的提交句柄，交给相机回调使用
pub struct SubmitHandle<M: Classifier> {
  shared: Arc<Shared<M>>,
}

impl<M: Classifier> Clone for SubmitHandle<M> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<M: Classifier + 'static> SubmitHandle<M> {
  /// 提交一帧
  ///
  /// 没有空闲令牌时阻塞；流水线停止时立即丢弃该帧。
  pub fn submit(&self, frame: Frame) -> Submitted {
    let shared = &self.shared;
    Counters::bump(&shared.counters.submitted);

    let Some(token) = shared.admission.acquire() else {
      debug!("流水线未运行，丢弃帧");
      Counters::bump(&shared.counters.dropped);
      return Submitted::Dropped;
    };

    let slot = shared.slots.next_index();
    let worker = Arc::clone(shared);
    let spawned = thread::Builder::new()
      .name(format!("lingshi-slot-{}", slot))
      .spawn(move || worker.run_slot(slot, frame, token));

    match spawned {
      Ok(_) => {
        Counters::bump(&shared.counters.dispatched);
        debug!("帧已分派到推理槽 {}", slot);
        Submitted::Dispatched { slot }
      }
      Err(e) => {
        error!("无法启动推理线程: {}", e);
        Counters::bump(&shared.counters.failed);
        Counters::bump(&shared.counters.dropped);
        shared.deliver(FormatMode::Live.format(&Outcome::Failed(e.to_string())));
        Submitted::Dropped
      }
    }
  }
}

trait AttachedSource: Send {
  fn stop(&mut self);
  fn is_finished(&self) -> bool;
}

impl<S: CameraSource + Send> AttachedSource for S {
  fn stop(&mut self) {
    CameraSource::stop(self)
  }

  fn is_finished(&self) -> bool {
    CameraSource::is_finished(self)
  }
}

/// 帧分类流水线
pub struct Pipeline<M: Classifier + 'static> {
  handle: SubmitHandle<M>,
  config: PipelineConfig,
  source: Option<Box<dyn AttachedSource>>,
  presenter: Option<JoinHandle<()>>,
}

impl<M: Classifier + 'static> Pipeline<M> {
  pub fn new<O>(classifier: M, output: O, config: PipelineConfig) -> Result<Self, PipelineError>
  where
    O: Present + Send + 'static,
    O::Error: std::fmt::Display,
  {
    if config.inflight == 0 {
      return Err(PipelineError::ZeroCapacity);
    }

    let (deliveries, rx) = mpsc::channel::<Delivery>();
    let presenter = thread::Builder::new()
      .name("lingshi-present".to_string())
      .spawn(move || {
        while let Ok(Delivery::Text(text)) = rx.recv() {
          if let Err(e) = output.present(&text) {
            warn!("展示结果失败: {}", e);
          }
        }
        debug!("展示线程退出");
      })?;

    let slots = SlotRing::new((0..config.inflight).map(|_| classifier.new_context()));
    let shared = Arc::new(Shared {
      classifier,
      slots,
      admission: Arc::new(AdmissionPool::new(config.inflight)),
      counters: Counters::default(),
      deliveries,
    });

    info!("流水线已创建，最大并发推理数: {}", config.inflight);
    Ok(Self {
      handle: SubmitHandle { shared },
      config,
      source: None,
      presenter: Some(presenter),
    })
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn handle(&self) -> SubmitHandle<M> {
    self.handle.clone()
  }

  pub fn submit(&self, frame: Frame) -> Submitted {
    self.handle.submit(frame)
  }

  /// 打开准入并订阅相机源
  pub fn start<S>(&mut self, mut source: S) -> Result<(), PipelineError>
  where
    S: CameraSource + Send + 'static,
  {
    if self.source.is_some() {
      return Err(PipelineError::AlreadyRunning);
    }

    self.handle.shared.admission.open();
    let handle = self.handle.clone();
    source
      .start(Box::new(move |frame| {
        handle.submit(frame);
      }))
      .map_err(|e| {
        error!("相机源启动失败: {}", e);
        PipelineError::Source(Box::new(e))
      })?;

    info!("流水线开始接收帧");
    self.source = Some(Box::new(source));
    Ok(())
  }

  pub fn is_accepting(&self) -> bool {
    self.handle.shared.admission.is_open()
  }

  pub fn source_finished(&self) -> bool {
    self.source.as_ref().is_some_and(|s| s.is_finished())
  }

  /// 停止接收帧并等待进行中的推理
  ///
  /// 等待超过 `drain_timeout` 后强制收回剩余令牌，并替换仍被占用的推理槽，
  /// 重新启动后的调用不会等待被放弃的调用。
  pub fn stop(&mut self) -> DrainReport {
    let shared = &self.handle.shared;
    shared.admission.close();
    if let Some(mut source) = self.source.take() {
      source.stop();
      info!("已取消订阅相机源");
    }

    if shared.admission.wait_idle(self.config.drain_timeout) {
      debug!("进行中的推理已全部完成");
      DrainReport::Drained
    } else {
      let abandoned = shared.admission.reclaim();
      let renewed = shared
        .slots
        .renew_busy(|| shared.classifier.new_context());
      warn!(
        "等待推理超时 ({:.2?})，放弃 {} 个推理，重建 {} 个推理槽",
        self.config.drain_timeout, abandoned, renewed
      );
      DrainReport::Reclaimed { abandoned }
    }
  }

  /// 停止流水线；全部推理完成时等待展示线程送出所有结果
  pub fn shutdown(mut self) -> DrainReport {
    let report = self.stop();
    let _ = self.handle.shared.deliveries.send(Delivery::Shutdown);
    if let (DrainReport::Drained, Some(presenter)) = (report, self.presenter.take()) {
      if presenter.join().is_err() {
        error!("展示线程异常退出");
      }
    }
    report
  }

  pub fn stats(&self) -> PipelineStats {
    let counters = &self.handle.shared.counters;
    PipelineStats {
      submitted: counters.submitted.load(Ordering::Relaxed),
      dispatched: counters.dispatched.load(Ordering::Relaxed),
      dropped: counters.dropped.load(Ordering::Relaxed),
      completed: counters.completed.load(Ordering::Relaxed),
      failed: counters.failed.load(Ordering::Relaxed),
      in_flight: self.handle.shared.admission.outstanding(),
    }
  }
}

impl<M: Classifier + 'static> Drop for Pipeline<M> {
  fn drop(&mut self) {
    let shared = &self.handle.shared;
    shared.admission.close();
    if let Some(mut source) = self.source.take() {
      source.stop();
    }
    let _ = shared.deliveries.send(Delivery::Shutdown);
  }
}
