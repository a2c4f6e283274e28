// 该文件是 Lingshi （零食） 项目的一部分。
// tests/pipeline_tests.rs - 流水线并发与停止行为测试
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
  fmt,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
    mpsc::{self, Receiver, Sender},
  },
  thread,
  time::{Duration, Instant},
};

use lingshi::{
  frame::Frame,
  input::IterSource,
  model::{Classifier, Prediction, Predictions},
  pipeline::{DrainReport, Pipeline, PipelineConfig, Submitted},
};

const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct BadBuffer;

impl fmt::Display for BadBuffer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "bad buffer")
  }
}

impl std::error::Error for BadBuffer {}

fn snack(label: &str, confidence: f32) -> Predictions {
  Predictions::ranked(vec![Prediction::new(label, confidence)])
}

fn frame(tag: u8) -> Frame {
  Frame::filled(2, 2, [tag, 0, 0]).unwrap()
}

fn wait_until(mut done: impl FnMut() -> bool) {
  let deadline = Instant::now() + WAIT;
  while !done() {
    assert!(Instant::now() < deadline, "等待超时");
    thread::sleep(Duration::from_millis(5));
  }
}

/// 记录同时进行的分类数
#[derive(Default)]
struct Gauge {
  current: AtomicUsize,
  peak: AtomicUsize,
}

struct Slow {
  gauge: Arc<Gauge>,
  delay: Duration,
}

impl Classifier for Slow {
  type Context = ();
  type Error = BadBuffer;

  fn new_context(&self) {}

  fn classify(&self, _: &mut (), _: &Frame) -> Result<Option<Predictions>, BadBuffer> {
    let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
    self.gauge.peak.fetch_max(now, Ordering::SeqCst);
    thread::sleep(self.delay);
    self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    Ok(Some(snack("apple", 0.9)))
  }
}

/// 按帧的红色分量决定成功、报错或 panic
struct Mixed;

impl Classifier for Mixed {
  type Context = ();
  type Error = BadBuffer;

  fn new_context(&self) {}

  fn classify(&self, _: &mut (), frame: &Frame) -> Result<Option<Predictions>, BadBuffer> {
    match frame.pixel(0, 0)[0] % 3 {
      0 => Ok(Some(snack("pear", 0.7))),
      1 => Err(BadBuffer),
      _ => panic!("boom"),
    }
  }
}

/// 前 `hang` 次调用在闸门打开前一直阻塞，之后的调用立即返回
struct Hung {
  gate: Arc<Mutex<Receiver<()>>>,
  calls: AtomicUsize,
  hang: usize,
}

impl Hung {
  fn new(hang: usize) -> (Self, Sender<()>) {
    let (tx, rx) = mpsc::channel();
    (
      Self {
        gate: Arc::new(Mutex::new(rx)),
        calls: AtomicUsize::new(0),
        hang,
      },
      tx,
    )
  }
}

impl Classifier for Hung {
  type Context = ();
  type Error = BadBuffer;

  fn new_context(&self) {}

  fn classify(&self, _: &mut (), _: &Frame) -> Result<Option<Predictions>, BadBuffer> {
    if self.calls.fetch_add(1, Ordering::SeqCst) >= self.hang {
      return Ok(Some(snack("fresh", 0.8)));
    }
    let gate = self.gate.lock().map_err(|_| BadBuffer)?;
    let _ = gate.recv();
    Ok(Some(snack("late", 0.9)))
  }
}

fn config(inflight: usize) -> PipelineConfig {
  PipelineConfig::default()
    .with_inflight(inflight)
    .with_drain_timeout(Duration::from_millis(200))
}

#[test]
fn concurrency_never_exceeds_inflight() {
  for inflight in [1, 2, 4] {
    let gauge = Arc::new(Gauge::default());
    let model = Slow {
      gauge: Arc::clone(&gauge),
      delay: Duration::from_millis(20),
    };
    let (tx, rx) = mpsc::channel::<String>();
    let pipeline = Pipeline::new(model, tx, config(inflight)).unwrap();

    for i in 0..12 {
      assert!(matches!(
        pipeline.submit(frame(i)),
        Submitted::Dispatched { .. }
      ));
      assert!(pipeline.stats().in_flight <= inflight);
    }
    assert_eq!(pipeline.shutdown(), DrainReport::Drained);

    let results: Vec<String> = rx.iter().collect();
    assert_eq!(results.len(), 12);
    assert!(results.iter().all(|r| r == "apple 90.0%"));
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= inflight, "peak {} > {}", peak, inflight);
  }
}

#[test]
fn errors_and_panics_release_admission() {
  let (tx, rx) = mpsc::channel::<String>();
  let mut pipeline = Pipeline::new(Mixed, tx, config(2)).unwrap();

  for i in 0..9 {
    pipeline.submit(frame(i));
  }
  assert_eq!(pipeline.stop(), DrainReport::Drained);

  let stats = pipeline.stats();
  assert_eq!(stats.dispatched, 9);
  assert_eq!(stats.completed, 3);
  assert_eq!(stats.failed, 6);
  assert_eq!(stats.in_flight, 0);
  assert_eq!(pipeline.shutdown(), DrainReport::Drained);

  let results: Vec<String> = rx.iter().collect();
  assert_eq!(results.len(), 9);
  assert_eq!(results.iter().filter(|r| *r == "pear 70.0%").count(), 3);
  assert_eq!(
    results.iter().filter(|r| *r == "error: bad buffer").count(),
    3
  );
  assert_eq!(
    results
      .iter()
      .filter(|r| r.starts_with("error: classifier panicked: boom"))
      .count(),
    3
  );
}

#[test]
fn fast_camera_is_throttled() {
  let gauge = Arc::new(Gauge::default());
  let model = Slow {
    gauge: Arc::clone(&gauge),
    delay: Duration::from_millis(5),
  };
  let (tx, rx) = mpsc::channel::<String>();
  let mut pipeline = Pipeline::new(model, tx, config(2)).unwrap();

  pipeline
    .start(IterSource::new((0..50).map(frame)))
    .unwrap();
  wait_until(|| {
    assert!(pipeline.stats().in_flight <= 2);
    pipeline.source_finished()
  });

  let stats = pipeline.stats();
  assert_eq!(stats.submitted, 50);
  assert_eq!(stats.dispatched, 50);
  assert_eq!(stats.dropped, 0);
  assert_eq!(pipeline.shutdown(), DrainReport::Drained);

  assert_eq!(rx.iter().count(), 50);
  assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
}

#[test]
fn stop_unblocks_producer_and_reclaims_hung_work() {
  let (model, gate) = Hung::new(2);
  let (tx, rx) = mpsc::channel::<String>();
  let mut pipeline = Pipeline::new(model, tx, config(2)).unwrap();

  pipeline
    .start(IterSource::new(std::iter::repeat_with(|| frame(0))))
    .unwrap();
  // 两个槽都卡住，第三帧阻塞在准入上
  wait_until(|| {
    let stats = pipeline.stats();
    stats.dispatched == 2 && stats.submitted >= 3
  });

  let started = Instant::now();
  assert_eq!(pipeline.stop(), DrainReport::Reclaimed { abandoned: 2 });
  assert!(started.elapsed() < Duration::from_secs(5));
  assert!(!pipeline.is_accepting());
  assert_eq!(pipeline.stats().in_flight, 0);
  assert_eq!(pipeline.stats().dispatched, 2);

  // 被放弃的调用仍然卡着，重新启动后的帧照样能完成
  pipeline
    .start(IterSource::new((0..4).map(frame)))
    .unwrap();
  assert!(pipeline.is_accepting());
  for _ in 0..4 {
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "fresh 80.0%");
  }
  wait_until(|| pipeline.source_finished());
  assert_eq!(pipeline.stop(), DrainReport::Drained);
  assert_eq!(pipeline.stats().dispatched, 6);
  assert_eq!(pipeline.stats().in_flight, 0);

  // 被放弃的调用结束后归还的旧令牌不影响容量
  drop(gate);
  for _ in 0..2 {
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "late 90.0%");
  }
  thread::sleep(Duration::from_millis(50));
  assert_eq!(pipeline.stats().in_flight, 0);

  assert_eq!(pipeline.shutdown(), DrainReport::Drained);
  assert_eq!(rx.iter().count(), 0);
}

#[test]
fn second_start_is_rejected() {
  let (tx, _rx) = mpsc::channel::<String>();
  let model = Slow {
    gauge: Arc::default(),
    delay: Duration::ZERO,
  };
  let mut pipeline = Pipeline::new(model, tx, config(1)).unwrap();
  pipeline.start(IterSource::new(std::iter::empty::<Frame>())).unwrap();
  assert!(pipeline.start(IterSource::new(std::iter::empty::<Frame>())).is_err());
}

#[cfg(feature = "record_output")]
#[test]
fn results_are_recorded_as_json_lines() {
  use lingshi::output::RecordOutput;

  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("results.jsonl");
  let output = RecordOutput::open(&path).unwrap();
  let mut pipeline = Pipeline::new(Mixed, output, config(2)).unwrap();

  pipeline
    .start(IterSource::new([0, 3, 6].into_iter().map(frame)))
    .unwrap();
  wait_until(|| pipeline.source_finished());
  assert_eq!(pipeline.shutdown(), DrainReport::Drained);

  let content = std::fs::read_to_string(&path).unwrap();
  let lines: Vec<serde_json::Value> = content
    .lines()
    .map(|l| serde_json::from_str(l).unwrap())
    .collect();
  assert_eq!(lines.len(), 3);
  for (i, line) in lines.iter().enumerate() {
    assert_eq!(line["sequence"], i as u64 + 1);
    assert_eq!(line["result"], "pear 70.0%");
  }
}

#[cfg(feature = "read_image_file")]
#[test]
fn image_file_replays_as_camera() {
  use lingshi::{FromUrl, input::ImageFileInput};

  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("apple.png");
  image::RgbImage::from_pixel(8, 8, image::Rgb([3, 0, 0]))
    .save(&path)
    .unwrap();
  let url = url::Url::parse(&format!("image://{}?fps=200&count=5", path.display())).unwrap();

  let (tx, rx) = mpsc::channel::<String>();
  let mut pipeline = Pipeline::new(Mixed, tx, config(2)).unwrap();
  pipeline.start(ImageFileInput::from_url(&url).unwrap()).unwrap();
  wait_until(|| pipeline.source_finished());
  assert_eq!(pipeline.shutdown(), DrainReport::Drained);

  let results: Vec<String> = rx.iter().collect();
  assert_eq!(results, vec!["pear 70.0%"; 5]);
}
