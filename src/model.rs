// 该文件是 Lingshi （零食） 项目的一部分。
// src/model.rs - 分类模型
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

use crate::frame::Frame;

/// 图像分类器
///
/// 分类器本身可以被多个线程同时调用；每次调用额外借用一个
/// `Context`，用来复用预处理缓冲之类的调用上下文。
/// 返回 `Ok(None)` 表示模型给出了无法识别的响应（没有分类结果）。
pub trait Classifier: Send + Sync {
  type Context: Send;
  type Error: std::error::Error + Send + Sync + 'static;

  fn new_context(&self) -> Self::Context;

  fn classify(
    &self,
    context: &mut Self::Context,
    frame: &Frame,
  ) -> Result<Option<Predictions>, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
  pub label: String,
  pub confidence: f32,
}

impl Prediction {
  pub fn new(label: impl Into<String>, confidence: f32) -> Self {
    Self {
      label: label.into(),
      confidence,
    }
  }
}

/// 按置信度降序排列的分类结果
///
/// 置信度不是有限值（NaN、无穷）的条目在排序时被丢弃。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predictions {
  items: Box<[Prediction]>,
}

impl Predictions {
  pub fn ranked(mut items: Vec<Prediction>) -> Self {
    items.retain(|p| p.confidence.is_finite());
    items.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Self {
      items: items.into_boxed_slice(),
    }
  }

  pub fn top(&self) -> Option<&Prediction> {
    self.items.first()
  }

  pub fn top_k(&self, k: usize) -> &[Prediction] {
    &self.items[..k.min(self.items.len())]
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Prediction> {
    self.items.iter()
  }
}

impl FromIterator<Prediction> for Predictions {
  fn from_iter<I: IntoIterator<Item = Prediction>>(iter: I) -> Self {
    Self::ranked(iter.into_iter().collect())
  }
}

/// 一次分类调用的最终结果
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  Ranked(Predictions),
  Unrecognized,
  Failed(String),
}

impl<E: std::error::Error> From<Result<Option<Predictions>, E>> for Outcome {
  fn from(result: Result<Option<Predictions>, E>) -> Self {
    match result {
      Ok(Some(predictions)) => Outcome::Ranked(predictions),
      Ok(None) => Outcome::Unrecognized,
      Err(e) => Outcome::Failed(e.to_string()),
    }
  }
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxClassifier, OnnxClassifierBuilder, OnnxClassifierError};
