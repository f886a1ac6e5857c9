//! 生产者 → 消费者的有界记录队列
//!
//! 容量 2, 满时丢弃最新的一批, 生产者永不阻塞

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::debug;

use super::types::RecordBatch;

pub const QUEUE_CAPACITY: usize = 2;

/// 单次轮询结果
#[derive(Debug)]
pub enum Polled {
    Batch(RecordBatch),
    Timeout,
    /// 生产者已退出且队列已空
    Disconnected,
}

pub struct RecordSender {
    tx: Sender<RecordBatch>,
    dropped: Arc<AtomicU64>,
}

pub struct RecordReceiver {
    rx: Receiver<RecordBatch>,
    dropped: Arc<AtomicU64>,
}

pub fn record_queue() -> (RecordSender, RecordReceiver) {
    let (tx, rx) = bounded(QUEUE_CAPACITY);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        RecordSender {
            tx,
            dropped: dropped.clone(),
        },
        RecordReceiver { rx, dropped },
    )
}

impl RecordSender {
    /// 非阻塞入队, 队列满时丢弃本批并返回 false
    pub fn offer(&self, batch: RecordBatch) -> bool {
        match self.tx.try_send(batch) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("队列已满, 丢弃最新记录 (累计 {})", dropped);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// 有限时间的阻塞入队, 用于不能丢失的错误记录
    pub fn send_final(&self, batch: RecordBatch, timeout: Duration) -> bool {
        self.tx.send_timeout(batch, timeout).is_ok()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl RecordReceiver {
    pub fn poll(&self, timeout: Duration) -> Polled {
        match self.rx.recv_timeout(timeout) {
            Ok(batch) => Polled::Batch(batch),
            Err(RecvTimeoutError::Timeout) => Polled::Timeout,
            Err(RecvTimeoutError::Disconnected) => Polled::Disconnected,
        }
    }

    /// 取出当前队列中的全部记录, 不等待
    pub fn drain(&self) -> Vec<RecordBatch> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::PipelineRecord;

    fn batch(line: &str) -> RecordBatch {
        vec![PipelineRecord::Logs(vec![line.to_string()])]
    }

    fn first_line(batch: &RecordBatch) -> &str {
        match &batch[0] {
            PipelineRecord::Logs(lines) => &lines[0],
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_overflow_drops_newest() {
        let (tx, rx) = record_queue();
        assert!(tx.offer(batch("a")));
        assert!(tx.offer(batch("b")));
        assert!(!tx.offer(batch("c")));
        assert_eq!(tx.len(), QUEUE_CAPACITY);
        assert_eq!(rx.dropped(), 1);

        let drained = rx.drain();
        let lines: Vec<&str> = drained.iter().map(first_line).collect();
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_poll_timeout_and_disconnect() {
        let (tx, rx) = record_queue();
        assert!(matches!(rx.poll(Duration::from_millis(10)), Polled::Timeout));

        tx.offer(batch("last"));
        drop(tx);
        assert!(matches!(rx.poll(Duration::from_millis(10)), Polled::Batch(_)));
        assert!(matches!(
            rx.poll(Duration::from_millis(10)),
            Polled::Disconnected
        ));
    }

    #[test]
    fn test_send_final_waits_for_room() {
        let (tx, rx) = record_queue();
        tx.offer(batch("a"));
        tx.offer(batch("b"));
        // 队列满且没有消费者取走时, 有限等待后放弃
        assert!(!tx.send_final(batch("error"), Duration::from_millis(20)));

        rx.drain();
        assert!(tx.send_final(batch("error"), Duration::from_millis(20)));
    }
}
