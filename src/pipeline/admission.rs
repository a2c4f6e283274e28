// 该文件是 Lingshi （零食） 项目的一部分。
// src/pipeline/admission.rs - 准入令牌池
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
  sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use tracing::{debug, warn};

#[derive(Debug)]
struct PoolState {
  available: usize,
  generation: u64,
  open: bool,
}

/// 容量为 N 的计数许可池
///
/// 每个令牌代表一次正在进行的推理。`acquire` 在没有可用令牌时阻塞调用方，
/// 令牌在 `Drop` 时归还，因此任何退出路径都恰好归还一次。
/// 池关闭后 `acquire` 立即返回 `None`，并唤醒所有等待者。
#[derive(Debug)]
pub struct AdmissionPool {
  capacity: usize,
  state: Mutex<PoolState>,
  changed: Condvar,
}

/// 已获取的准入令牌，析构时归还
#[derive(Debug)]
pub struct AdmissionToken {
  pool: Arc<AdmissionPool>,
  generation: u64,
}

impl Drop for AdmissionToken {
  fn drop(&mut self) {
    self.pool.release(self.generation);
  }
}

impl AdmissionPool {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity,
      state: Mutex::new(PoolState {
        available: capacity,
        generation: 0,
        open: true,
      }),
      changed: Condvar::new(),
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  fn lock(&self) -> MutexGuard<'_, PoolState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn open(&self) {
    self.lock().open = true;
  }

  pub fn close(&self) {
    self.lock().open = false;
    self.changed.notify_all();
  }

  pub fn is_open(&self) -> bool {
    self.lock().open
  }

  /// 当前未归还的令牌数
  pub fn outstanding(&self) -> usize {
    self.capacity - self.lock().available
  }

  /// 阻塞直到拿到令牌；池已关闭时返回 `None`
  pub fn acquire(self: &Arc<Self>) -> Option<AdmissionToken> {
    let mut state = self.lock();
    while state.open && state.available == 0 {
      state = self
        .changed
        .wait(state)
        .unwrap_or_else(PoisonError::into_inner);
    }
    self.take(&mut state)
  }

  pub fn try_acquire(self: &Arc<Self>) -> Option<AdmissionToken> {
    let mut state = self.lock();
    self.take(&mut state)
  }

  fn take(self: &Arc<Self>, state: &mut PoolState) -> Option<AdmissionToken> {
    if !state.open || state.available == 0 {
      return None;
    }
    state.available -= 1;
    Some(AdmissionToken {
      pool: Arc::clone(self),
      generation: state.generation,
    })
  }

  fn release(&self, generation: u64) {
    let mut state = self.lock();
    if generation != state.generation {
      debug!(
        "忽略过期令牌归还: 令牌代 {}, 当前代 {}",
        generation, state.generation
      );
      return;
    }
    debug_assert!(state.available < self.capacity);
    state.available = (state.available + 1).min(self.capacity);
    drop(state);
    self.changed.notify_all();
  }

  /// 等待所有令牌归还，超时返回 `false`
  pub fn wait_idle(&self, timeout: Duration) -> bool {
    let state = self.lock();
    let (state, _) = self
      .changed
      .wait_timeout_while(state, timeout, |s| s.available < self.capacity)
      .unwrap_or_else(PoisonError::into_inner);
    state.available == self.capacity
  }

  /// 强制收回全部容量，返回被放弃的令牌数
  ///
  /// 收回后进入新的一代，旧令牌之后再析构不会重复归还。
  pub fn reclaim(&self) -> usize {
    let mut state = self.lock();
    let abandoned = self.capacity - state.available;
    if abandoned > 0 {
      warn!("强制收回 {} 个未归还的准入令牌", abandoned);
    }
    state.generation += 1;
    state.available = self.capacity;
    drop(state);
    self.changed.notify_all();
    abandoned
  }
}
