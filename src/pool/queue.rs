//! 优先级工作队列
//!
//! 取出顺序：优先级高者先出；同优先级按入队先后（FIFO）。入队序号单调递增，用于稳定地打破平局。
//! 每个队列项附带一个 oneshot 发送端，排水循环执行完毕后通过它把结果交还提交方。

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::core::PoolError;

/// 工作项 ID
pub type WorkId = String;

/// 未指定时的优先级（数值越大越紧急）
pub const DEFAULT_PRIORITY: i32 = 5;

/// 执行结果回传通道
pub type OutcomeSender = oneshot::Sender<Result<Value, PoolError>>;

/// 排队中的一次提交
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    pub id: WorkId,
    pub agent_name: String,
    pub payload: Value,
    pub priority: i32,
    pub submitted_at: DateTime<Utc>,
    /// 入队序号，同优先级时决定先后
    pub seq: u64,
}

/// 队列中的条目：工作项 + 结果回传端
#[derive(Debug)]
pub struct QueuedWork {
    pub item: WorkItem,
    pub reply: OutcomeSender,
}

impl QueuedWork {
    /// 把结果交还提交方；提交方已丢弃句柄时静默忽略
    pub fn resolve(self, outcome: Result<Value, PoolError>) {
        let _ = self.reply.send(outcome);
    }
}

impl PartialEq for QueuedWork {
    fn eq(&self, other: &Self) -> bool {
        self.item.seq == other.item.seq
    }
}

impl Eq for QueuedWork {}

impl PartialOrd for QueuedWork {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap 是大顶堆：优先级高者更「大」，同优先级序号小者更「大」
impl Ord for QueuedWork {
    fn cmp(&self, other: &Self) -> Ordering {
        self.item
            .priority
            .cmp(&other.item.priority)
            .then_with(|| other.item.seq.cmp(&self.item.seq))
    }
}

/// 优先级队列
#[derive(Debug, Default)]
pub struct WorkQueue {
    heap: BinaryHeap<QueuedWork>,
    next_seq: u64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队，返回工作项 ID
    pub fn push(&mut self, agent_name: String, payload: Value, priority: i32, reply: OutcomeSender) -> WorkId {
        let item = WorkItem {
            id: format!("work_{}", uuid::Uuid::new_v4()),
            agent_name,
            payload,
            priority,
            submitted_at: Utc::now(),
            seq: self.next_seq,
        };
        self.next_seq += 1;

        let id = item.id.clone();
        tracing::debug!(work_id = %id, agent = %item.agent_name, priority, "Work item queued");
        self.heap.push(QueuedWork { item, reply });
        id
    }

    /// 取出最高优先级的工作项
    pub fn pop(&mut self) -> Option<QueuedWork> {
        self.heap.pop()
    }

    /// 移除尚未取出的工作项
    pub fn remove(&mut self, id: &str) -> Option<QueuedWork> {
        let mut removed = None;
        let heap = std::mem::take(&mut self.heap);
        for entry in heap.into_vec() {
            if removed.is_none() && entry.item.id == id {
                removed = Some(entry);
            } else {
                self.heap.push(entry);
            }
        }
        removed
    }

    /// 清空队列（关闭时用），顺序不保证
    pub fn drain(&mut self) -> Vec<QueuedWork> {
        self.heap.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
