// 该文件是 Lingshi （零食） 项目的一部分。
// src/output/record.rs - JSON Lines 结果记录
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
  fs::{File, OpenOptions},
  io::{BufWriter, Write},
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
};

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::{FromUrl, FromUrlWithScheme, output::Present};

#[derive(Error, Debug)]
pub enum RecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

struct RecordState {
  writer: BufWriter<File>,
  sequence: u64,
}

/// 每个展示结果追加一行 JSON：`{"timestamp", "sequence", "result"}`
///
/// URL 形如 `record:///var/log/lingshi/results.jsonl`。
pub struct RecordOutput {
  path: PathBuf,
  state: Mutex<RecordState>,
}

impl FromUrlWithScheme for RecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordOutput {
  type Error = RecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(RecordOutputError::SchemeMismatch);
    }
    Self::open(uri.path())
  }
}

impl RecordOutput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordOutputError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    info!("记录结果到文件: {}", path.display());

    Ok(Self {
      path,
      state: Mutex::new(RecordState {
        writer: BufWriter::new(file),
        sequence: 0,
      }),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Present for RecordOutput {
  type Error = RecordOutputError;

  fn present(&self, text: &str) -> Result<(), Self::Error> {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    state.sequence += 1;
    let line = json!({
      "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
      "sequence": state.sequence,
      "result": text,
    });
    serde_json::to_writer(&mut state.writer, &line)?;
    state.writer.write_all(b"\n")?;
    state.writer.flush()?;
    Ok(())
  }
}
