// 该文件是 Lingshi （零食） 项目的一部分。
// src/model/onnx.rs - ONNX 分类模型
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

use std::{fs::File, io::BufReader, path::PathBuf};

use image::{RgbImage, imageops};
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{Classifier, Prediction, Predictions},
};

const DEFAULT_INPUT_SIZE: usize = 224;

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

#[derive(Error, Debug)]
pub enum OnnxClassifierError {
  #[error("模型路径必须使用 {0} 方案")]
  SchemeMismatch(&'static str),
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("标签文件错误: {0}")]
  LabelError(#[from] serde_json::Error),
  #[error("无效参数 {0}: {1}")]
  InvalidQuery(String, String),
  #[error("输入图像无效: {0}")]
  InvalidInput(String),
  #[error("tract 错误: {0:#}")]
  TractError(TractError),
}

impl From<std::io::Error> for OnnxClassifierError {
  fn from(err: std::io::Error) -> Self {
    OnnxClassifierError::ModelLoadError(err)
  }
}

impl From<TractError> for OnnxClassifierError {
  fn from(err: TractError) -> Self {
    OnnxClassifierError::TractError(err)
  }
}

/// ONNX 模型构建器
///
/// URL 形如 `onnx:///models/snacks.onnx?labels=/models/labels.json&size=227&softmax=true`，
/// 标签文件是按类别序号排列的 JSON 字符串数组。
pub struct OnnxClassifierBuilder {
  model_path: PathBuf,
  labels_path: Option<PathBuf>,
  size: usize,
  softmax: bool,
}

impl FromUrlWithScheme for OnnxClassifierBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxClassifierBuilder {
  type Error = OnnxClassifierError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxClassifierError::SchemeMismatch(Self::SCHEME));
    }

    let mut builder = Self::new(url.path());
    for (key, value) in url.query_pairs() {
      let invalid = || OnnxClassifierError::InvalidQuery(key.to_string(), value.to_string());
      match &*key {
        "labels" => builder.labels_path = Some(PathBuf::from(value.to_string())),
        "size" => builder.size = value.parse().map_err(|_| invalid())?,
        "softmax" => builder.softmax = value.parse().map_err(|_| invalid())?,
        _ => debug!("忽略未知参数: {}={}", key, value),
      }
    }
    Ok(builder)
  }
}

impl OnnxClassifierBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      labels_path: None,
      size: DEFAULT_INPUT_SIZE,
      softmax: false,
    }
  }

  pub fn labels(mut self, path: impl Into<PathBuf>) -> Self {
    self.labels_path = Some(path.into());
    self
  }

  pub fn size(mut self, size: usize) -> Self {
    self.size = size;
    self
  }

  pub fn softmax(mut self, softmax: bool) -> Self {
    self.softmax = softmax;
    self
  }

  pub fn build(self) -> Result<OnnxClassifier, OnnxClassifierError> {
    info!("加载模型文件: {}", self.model_path.display());
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, self.size, self.size)),
      )?
      .into_optimized()?
      .into_runnable()?;

    let labels: Vec<String> = match &self.labels_path {
      Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
      None => Vec::new(),
    };
    info!("模型加载完成，输入尺寸 {0}x{0}，标签数: {1}", self.size, labels.len());

    Ok(OnnxClassifier {
      plan,
      labels,
      size: self.size,
      softmax: self.softmax,
    })
  }
}

/// tract 推理的图像分类器
///
/// 预处理：居中裁剪成正方形，缩放到 `size`，按 NCHW 排列并归一化到 [0, 1]。
pub struct OnnxClassifier {
  plan: OnnxPlan,
  labels: Vec<String>,
  size: usize,
  softmax: bool,
}

impl OnnxClassifier {
  fn label(&self, index: usize) -> String {
    self
      .labels
      .get(index)
      .cloned()
      .unwrap_or_else(|| format!("class_{}", index))
  }

  fn preprocess(&self, frame: &Frame, scratch: &mut Vec<f32>) -> Result<(), OnnxClassifierError> {
    let image = RgbImage::from_raw(frame.width(), frame.height(), frame.as_hwc().to_vec())
      .ok_or_else(|| OnnxClassifierError::InvalidInput("RGB 缓冲区与尺寸不符".to_string()))?;

    let side = frame.width().min(frame.height());
    let x = (frame.width() - side) / 2;
    let y = (frame.height() - side) / 2;
    let cropped = imageops::crop_imm(&image, x, y, side, side).to_image();
    let size = self.size as u32;
    let resized = imageops::resize(&cropped, size, size, imageops::FilterType::Triangle);

    let plane = self.size * self.size;
    scratch.clear();
    scratch.resize(3 * plane, 0.0);
    for (i, pixel) in resized.pixels().enumerate() {
      for c in 0..3 {
        scratch[c * plane + i] = pixel[c] as f32 / 255.0;
      }
    }
    Ok(())
  }
}

fn softmax(scores: &mut [f32]) {
  let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let mut sum = 0.0;
  for score in scores.iter_mut() {
    *score = (*score - max).exp();
    sum += *score;
  }
  if sum > 0.0 {
    scores.iter_mut().for_each(|s| *s /= sum);
  }
}

impl Classifier for OnnxClassifier {
  /// 预处理缓冲，按推理槽复用
  type Context = Vec<f32>;
  type Error = OnnxClassifierError;

  fn new_context(&self) -> Self::Context {
    Vec::with_capacity(3 * self.size * self.size)
  }

  fn classify(
    &self,
    scratch: &mut Self::Context,
    frame: &Frame,
  ) -> Result<Option<Predictions>, Self::Error> {
    if let Some(k) = frame.intrinsics() {
      debug!("帧附带相机内参，焦距: {:?}", k.focal_length());
    }

    self.preprocess(frame, scratch)?;
    let input = Tensor::from_shape(&[1, 3, self.size, self.size], scratch.as_slice())?;
    let outputs = self.plan.run(tvec!(input.into()))?;

    let Some(output) = outputs.first() else {
      return Ok(None);
    };
    let Ok(view) = output.to_array_view::<f32>() else {
      debug!("模型输出不是 f32 张量");
      return Ok(None);
    };

    let mut scores: Vec<f32> = view.iter().copied().collect();
    if self.softmax {
      softmax(&mut scores);
    }

    let predictions = scores
      .into_iter()
      .enumerate()
      .map(|(index, confidence)| {
        Prediction::new(self.label(index), confidence.clamp(0.0, 1.0))
      })
      .collect();
    Ok(Some(predictions))
  }
}
