// 该文件是 Lingshi （零食） 项目的一部分。
// src/pipeline/slots.rs - 轮转推理槽
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

use std::sync::{
  Arc, Mutex, PoisonError, TryLockError,
  atomic::{AtomicUsize, Ordering},
};

/// 单个推理槽持有的上下文
pub type SlotContext<C> = Arc<Mutex<C>>;

/// N 个可复用的推理上下文，按轮转顺序分配
///
/// 完成顺序不确定，同一个槽可能被两次调用同时选中，
/// 所以每个槽各自加锁。被放弃的调用仍然占着旧上下文的锁，
/// `renew_busy` 把这些槽换成新的上下文，旧的随调用结束释放。
#[derive(Debug)]
pub struct SlotRing<C> {
  slots: Box<[Mutex<SlotContext<C>>]>,
  next: AtomicUsize,
}

impl<C> SlotRing<C> {
  pub fn new(contexts: impl IntoIterator<Item = C>) -> Self {
    Self {
      slots: contexts
        .into_iter()
        .map(|context| Mutex::new(Arc::new(Mutex::new(context))))
        .collect(),
      next: AtomicUsize::new(0),
    }
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  /// 返回当前索引并把计数器推进到 `(index + 1) % N`
  pub fn next_index(&self) -> usize {
    let len = self.slots.len().max(1);
    match self
      .next
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
    {
      Ok(index) | Err(index) => index,
    }
  }

  /// 取出槽当前的上下文，调用方自行加锁
  pub fn checkout(&self, index: usize) -> SlotContext<C> {
    let cell = self.slots[index]
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(&cell)
  }

  /// 把仍被占用的槽换成 `fresh` 构造的新上下文，返回替换的槽数
  pub fn renew_busy(&self, mut fresh: impl FnMut() -> C) -> usize {
    let mut renewed = 0;
    for slot in self.slots.iter() {
      let mut cell = slot.lock().unwrap_or_else(PoisonError::into_inner);
      let busy = matches!(cell.try_lock(), Err(TryLockError::WouldBlock));
      if busy {
        *cell = Arc::new(Mutex::new(fresh()));
        renewed += 1;
      }
    }
    renewed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{collections::HashSet, sync::Arc, thread};

  #[test]
  fn cycles_through_every_slot() {
    let ring = SlotRing::new(vec![(); 3]);
    let order: Vec<_> = (0..7).map(|_| ring.next_index()).collect();
    assert_eq!(order, [0, 1, 2, 0, 1, 2, 0]);
  }

  #[test]
  fn single_slot_always_zero() {
    let ring = SlotRing::new(vec![0u8]);
    assert!((0..5).all(|_| ring.next_index() == 0));
  }

  #[test]
  fn concurrent_selection_stays_balanced() {
    const N: usize = 4;
    const PER_THREAD: usize = 250;
    let ring = Arc::new(SlotRing::new(vec![(); N]));

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let ring = Arc::clone(&ring);
        thread::spawn(move || (0..PER_THREAD).map(|_| ring.next_index()).collect::<Vec<_>>())
      })
      .collect();

    let mut counts = [0usize; N];
    for handle in handles {
      for index in handle.join().unwrap() {
        counts[index] += 1;
      }
    }
    assert!(counts.iter().all(|&c| c == 4 * PER_THREAD / N));
  }

  #[test]
  fn every_window_of_n_covers_all_slots() {
    let ring = SlotRing::new(vec![(); 5]);
    let order: Vec<_> = (0..20).map(|_| ring.next_index()).collect();
    for window in order.chunks(5) {
      let distinct: HashSet<_> = window.iter().collect();
      assert_eq!(distinct.len(), 5);
    }
  }

  #[test]
  fn slot_contexts_are_mutable() {
    let ring = SlotRing::new(vec![Vec::<u8>::new(), Vec::new()]);
    ring.checkout(1).lock().unwrap().push(7);
    assert_eq!(*ring.checkout(1).lock().unwrap(), vec![7]);
    assert!(ring.checkout(0).lock().unwrap().is_empty());
  }

  #[test]
  fn renew_replaces_only_held_slots() {
    let ring = SlotRing::new(vec![1u8, 2]);
    let held = ring.checkout(0);
    let guard = held.lock().unwrap();

    assert_eq!(ring.renew_busy(|| 9), 1);
    assert_eq!(*ring.checkout(0).try_lock().unwrap(), 9);
    assert_eq!(*ring.checkout(1).try_lock().unwrap(), 2);

    // 旧上下文仍归原调用所有
    assert_eq!(*guard, 1);
    drop(guard);
    assert_eq!(ring.renew_busy(|| 0), 0);
  }
}
