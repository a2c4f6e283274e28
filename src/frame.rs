// 该文件是 Lingshi （零食） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {width}x{height}")]
  InvalidShape { width: u32, height: u32 },
}

/// 相机内参矩阵（3x3，行优先）
///
/// 采集端可选地附带此矩阵，分类器可以据此校正方向。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics(pub [[f32; 3]; 3]);

impl CameraIntrinsics {
  pub fn focal_length(&self) -> (f32, f32) {
    (self.0[0][0], self.0[1][1])
  }

  pub fn principal_point(&self) -> (f32, f32) {
    (self.0[0][2], self.0[1][2])
  }
}

/// 一帧 RGB 图像（HWC 排列，每像素 3 字节）
///
/// 帧创建后不可修改。提交给流水线后所有权随之转移，
/// 只会被一次分类调用只读地使用，然后丢弃。
#[derive(Debug, Clone)]
pub struct Frame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
  intrinsics: Option<CameraIntrinsics>,
}

impl Frame {
  pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::InvalidShape { width, height });
    }

    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::SizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
      intrinsics: None,
    })
  }

  /// 纯色帧，主要用于测试和回放
  pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self, FrameError> {
    let pixels = width as usize * height as usize;
    let data = rgb.iter().copied().cycle().take(pixels * RGB_CHANNELS).collect();
    Self::from_rgb(width, height, data)
  }

  pub fn with_intrinsics(mut self, intrinsics: CameraIntrinsics) -> Self {
    self.intrinsics = Some(intrinsics);
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn intrinsics(&self) -> Option<&CameraIntrinsics> {
    self.intrinsics.as_ref()
  }

  pub fn as_hwc(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
    let index = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
    [self.data[index], self.data[index + 1], self.data[index + 2]]
  }
}

#[cfg(feature = "read_image_file")]
impl From<image::RgbImage> for Frame {
  fn from(image: image::RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
      intrinsics: None,
    }
  }
}
