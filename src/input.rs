// 该文件是 Lingshi （零食） 项目的一部分。
// src/input.rs - 相机/图像输入
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

use thiserror::Error;

use crate::{FromUrl, frame::Frame};

/// 相机源推送每一帧时调用的回调
pub type FrameCallback = Box<dyn FnMut(Frame) + Send>;

/// 推送式帧源
///
/// `start` 注册回调后，源在自己的采集线程上逐帧调用它。
/// 回调阻塞时源不应缓存帧，而是跳过。`stop` 之后不再调用回调。
pub trait CameraSource {
  type Error: std::error::Error + Send + Sync + 'static;

  fn start(&mut self, on_frame: FrameCallback) -> Result<(), Self::Error>;
  fn stop(&mut self);
  fn is_finished(&self) -> bool;
}

mod iter_source;
pub use self::iter_source::{BoxedFrames, IterSource, IterSourceError};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerCamera, GStreamerInputError, GStreamerInputPipelineBuilder};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerCamera(GStreamerCamera),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerCamera(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    let _ = url;
    Err(InputError::SchemeMismatch)
  }
}

impl Iterator for InputWrapper {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerCamera(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
      #[allow(unreachable_patterns)]
      _ => None,
    }
  }
}

impl CameraSource for InputWrapper {
  type Error = InputError;

  fn start(&mut self, on_frame: FrameCallback) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerCamera(input) => Ok(input.start(on_frame)?),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => Ok(input.start(on_frame)?),
      #[allow(unreachable_patterns)]
      _ => {
        let _ = on_frame;
        Err(InputError::SchemeMismatch)
      }
    }
  }

  fn stop(&mut self) {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerCamera(input) => input.stop(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.stop(),
      #[allow(unreachable_patterns)]
      _ => {}
    }
  }

  fn is_finished(&self) -> bool {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerCamera(input) => input.is_finished(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.is_finished(),
      #[allow(unreachable_patterns)]
      _ => true,
    }
  }
}
