// 该文件是 Lingshi （零食） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::Path;

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{BoxedFrames, CameraSource, FrameCallback, IterSource, IterSourceError},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(image::ImageError),
  #[error("Invalid query parameter {0}: {1}")]
  InvalidQuery(String, String),
  #[error("Image already consumed")]
  Consumed,
  #[error("Replay error: {0}")]
  Replay(#[from] IterSourceError),
}

impl From<std::io::Error> for ImageFileInputError {
  fn from(err: std::io::Error) -> Self {
    ImageFileInputError::IoError(err)
  }
}

impl From<image::ImageError> for ImageFileInputError {
  fn from(err: image::ImageError) -> Self {
    ImageFileInputError::ImageLoadError(err)
  }
}

const DEFAULT_REPLAY_FPS: f64 = 30.0;

/// 单张图片输入
///
/// 作为迭代器只产出一帧（单次模式）；作为 [`CameraSource`] 时按 `fps`
/// 重复推送同一帧 `count` 次（`count` 为 0 表示一直推送），用于没有相机时
/// 演示实时模式。
///
/// URL 形如 `image:///path/photo.jpg?fps=30&count=300`。
pub struct ImageFileInput {
  frame: Option<Frame>,
  fps: f64,
  count: usize,
  replay: Option<IterSource<BoxedFrames>>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let mut input = Self::open(url.path())?;
    for (key, value) in url.query_pairs() {
      match &*key {
        "fps" => {
          input.fps = value
            .parse()
            .map_err(|_| ImageFileInputError::InvalidQuery(key.to_string(), value.to_string()))?;
        }
        "count" => {
          input.count = value
            .parse()
            .map_err(|_| ImageFileInputError::InvalidQuery(key.to_string(), value.to_string()))?;
        }
        _ => {}
      }
    }
    Ok(input)
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)?.decode()?.to_rgb8();
    info!(
      "读取图像 {}: {}x{}",
      path.display(),
      image.width(),
      image.height()
    );
    Ok(Self::from_frame(Frame::from(image)))
  }

  pub fn from_frame(frame: Frame) -> Self {
    Self {
      frame: Some(frame),
      fps: DEFAULT_REPLAY_FPS,
      count: 0,
      replay: None,
    }
  }

  pub fn with_fps(mut self, fps: f64) -> Self {
    self.fps = fps;
    self
  }

  pub fn with_count(mut self, count: usize) -> Self {
    self.count = count;
    self
  }

  fn replay_frames(frame: Frame, count: usize) -> BoxedFrames {
    let frames = std::iter::repeat(frame);
    if count == 0 {
      Box::new(frames)
    } else {
      Box::new(frames.take(count))
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

impl CameraSource for ImageFileInput {
  type Error = ImageFileInputError;

  fn start(&mut self, on_frame: FrameCallback) -> Result<(), Self::Error> {
    let frame = self.frame.take().ok_or(ImageFileInputError::Consumed)?;
    info!("以 {} fps 回放图像，次数: {}", self.fps, self.count);
    let mut replay =
      IterSource::new(Self::replay_frames(frame, self.count)).with_fps(self.fps);
    replay.start(on_frame)?;
    self.replay = Some(replay);
    Ok(())
  }

  fn stop(&mut self) {
    if let Some(mut replay) = self.replay.take() {
      replay.stop();
    }
  }

  fn is_finished(&self) -> bool {
    self.replay.as_ref().is_none_or(|r| r.is_finished())
  }
}
