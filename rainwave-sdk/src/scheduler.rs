//! 请求调度
//!
//! 维护待发送队列和已发送表：决定何时发送、分配关联 ID、合并重复的无状态请求、
//! 限制已发送表的长度。

use crate::error::{RequestError, SdkError};
use crate::events::Station;
use crate::request::PendingRequest;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::{debug, warn};

/// 已发送表默认上限
pub const DEFAULT_MAX_SENT: usize = 10;

/// 帧的出口（连接上的发送端）
pub trait FrameSink {
    fn send_frame(&mut self, frame: String) -> Result<(), SdkError>;
}

impl FrameSink for Vec<String> {
    fn send_frame(&mut self, frame: String) -> Result<(), SdkError> {
        self.push(frame);
        Ok(())
    }
}

/// 一次 drain 的结果
#[derive(Debug, Default)]
pub struct DrainReport {
    /// 成功写出的帧数
    pub transmitted: usize,
    /// 其中等待响应的帧数（不含无状态请求）
    pub correlated: usize,
    /// 写出失败时的错误，失败的请求仍留在队首
    pub error: Option<SdkError>,
}

/// 请求调度器
pub struct RequestScheduler {
    sid: Station,
    max_sent: usize,
    next_message_id: u64,
    queue: VecDeque<PendingRequest>,
    sent: VecDeque<PendingRequest>,
    idle: bool,
}

impl RequestScheduler {
    pub fn new(sid: Station, max_sent: usize) -> Self {
        Self {
            sid,
            max_sent,
            next_message_id: 1,
            queue: VecDeque::new(),
            sent: VecDeque::new(),
            idle: true,
        }
    }

    /// 加入队列，返回是否应当立即 drain
    pub fn enqueue(&mut self, request: PendingRequest, ready: bool) -> bool {
        let action = request.action();
        if action.is_stateless() || !ready {
            let mut kept = VecDeque::with_capacity(self.queue.len() + 1);
            for queued in self.queue.drain(..) {
                if queued.action() == action {
                    debug!("[Scheduler] Throwing away extra {}", action);
                    queued.reject(RequestError::Superseded);
                } else {
                    kept.push_back(queued);
                }
            }
            self.queue = kept;
        }

        self.queue.push_back(request);
        self.idle && ready
    }

    /// 连接就绪时依次发送队首请求，直到队列为空或连接不可用
    pub fn drain(&mut self, ready: bool, sink: &mut dyn FrameSink, now: Instant) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            if !ready {
                self.idle = self.queue.is_empty();
                return report;
            }

            let Some(mut request) = self.queue.pop_front() else {
                self.idle = true;
                return report;
            };

            let message_id = if request.action().is_stateless() {
                None
            } else {
                let id = self.next_message_id;
                self.next_message_id += 1;
                Some(id)
            };
            request.mark_sent(message_id, now);

            let frame = match request.frame(self.sid) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("[Scheduler] Failed to encode {}: {}", request.action(), e);
                    request.reject(RequestError::Serialization(e.to_string()));
                    continue;
                }
            };

            debug!("[Scheduler] Socket write {}", frame);
            if let Err(e) = sink.send_frame(frame) {
                request.reset();
                self.queue.push_front(request);
                self.idle = false;
                report.error = Some(e);
                return report;
            }
            report.transmitted += 1;

            if message_id.is_some() {
                report.correlated += 1;
                self.sent.push_back(request);
                self.prune_sent();
            } else {
                request.resolve(Value::Null);
            }
        }
    }

    fn prune_sent(&mut self) {
        while self.sent.len() > self.max_sent {
            if let Some(evicted) = self.sent.pop_front() {
                warn!(
                    "[Scheduler] Evicting unanswered {} (message_id {:?})",
                    evicted.action(),
                    evicted.message_id()
                );
                evicted.reject(RequestError::Evicted);
            }
        }
    }

    /// 按关联 ID 取出已发送的请求
    pub fn complete(&mut self, message_id: u64) -> Option<PendingRequest> {
        let index = self
            .sent
            .iter()
            .position(|r| r.message_id() == Some(message_id))?;
        self.sent.remove(index)
    }

    /// 把已发送表中的请求按原顺序放回队首，等待重连后重发
    pub fn requeue_sent(&mut self) -> usize {
        let count = self.sent.len();
        while let Some(mut request) = self.sent.pop_back() {
            request.reset();
            self.queue.push_front(request);
        }
        if count > 0 {
            self.idle = false;
            debug!("[Scheduler] Requeued {} unanswered requests", count);
        }
        count
    }

    /// 丢弃所有请求（调用方会收到 Abandoned）
    pub fn abandon_all(&mut self) {
        let dropped = self.queue.len() + self.sent.len();
        self.queue.clear();
        self.sent.clear();
        self.idle = true;
        if dropped > 0 {
            debug!("[Scheduler] Abandoned {} requests", dropped);
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }

    /// 最早一条仍未应答的请求的发送时间
    pub fn oldest_sent_at(&self) -> Option<Instant> {
        self.sent.front().and_then(|r| r.sent_at())
    }

    /// 已发送表中的关联 ID（按发送顺序）
    pub fn sent_message_ids(&self) -> Vec<u64> {
        self.sent.iter().filter_map(|r| r.message_id()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Action;
    use serde_json::{json, Map};

    struct BrokenSink;

    impl FrameSink for BrokenSink {
        fn send_frame(&mut self, _frame: String) -> Result<(), SdkError> {
            Err(SdkError::SendFailed("closed".into()))
        }
    }

    fn request(action: Action) -> PendingRequest {
        PendingRequest::new(action, Map::new(), None)
    }

    fn frames(sink: &[String]) -> Vec<Value> {
        sink.iter().map(|f| serde_json::from_str(f).unwrap()).collect()
    }

    #[test]
    fn test_stateless_dedup_keeps_newest() {
        let mut scheduler = RequestScheduler::new(Station::Game, DEFAULT_MAX_SENT);
        let mut params = Map::new();
        params.insert("n".into(), json!(1));
        scheduler.enqueue(PendingRequest::new(Action::Ping, params, None), true);
        let mut params = Map::new();
        params.insert("n".into(), json!(2));
        // 连接未就绪：同名请求同样只保留最新的一个
        scheduler.enqueue(PendingRequest::new(Action::Ping, params, None), false);
        assert_eq!(scheduler.queued_len(), 1);

        let mut sink: Vec<String> = Vec::new();
        let report = scheduler.drain(true, &mut sink, Instant::now());
        assert_eq!(report.transmitted, 1);
        let sent = frames(&sink);
        assert_eq!(sent[0]["n"], json!(2));
        assert!(sent[0].get("message_id").is_none());
        assert_eq!(scheduler.sent_len(), 0);
    }

    #[tokio::test]
    async fn test_superseded_request_is_rejected() {
        let mut scheduler = RequestScheduler::new(Station::Game, DEFAULT_MAX_SENT);
        let (first, first_rx) = PendingRequest::with_receiver(Action::Pong, Map::new());
        let (second, second_rx) = PendingRequest::with_receiver(Action::Pong, Map::new());
        scheduler.enqueue(first, true);
        scheduler.enqueue(second, true);

        assert_eq!(first_rx.await.unwrap(), Err(RequestError::Superseded));

        let mut sink: Vec<String> = Vec::new();
        scheduler.drain(true, &mut sink, Instant::now());
        assert_eq!(second_rx.await.unwrap(), Ok(Value::Null));
    }

    #[test]
    fn test_ready_requests_are_not_deduplicated() {
        let mut scheduler = RequestScheduler::new(Station::Game, DEFAULT_MAX_SENT);
        assert!(!scheduler.enqueue(request(Action::Album), false));
        assert!(!scheduler.enqueue(request(Action::Song), false));
        assert!(scheduler.enqueue(request(Action::Song), true));
        assert_eq!(scheduler.queued_len(), 3);
    }

    #[tokio::test]
    async fn test_unready_duplicate_replaces_older() {
        let mut scheduler = RequestScheduler::new(Station::Game, DEFAULT_MAX_SENT);
        let mut first_params = Map::new();
        first_params.insert("id".into(), json!(1));
        let mut second_params = Map::new();
        second_params.insert("id".into(), json!(2));
        let (first, first_rx) = PendingRequest::with_receiver(Action::Album, first_params);
        let (second, _second_rx) = PendingRequest::with_receiver(Action::Album, second_params);

        scheduler.enqueue(first, false);
        scheduler.enqueue(second, false);
        assert_eq!(first_rx.await.unwrap(), Err(RequestError::Superseded));
        assert_eq!(scheduler.queued_len(), 1);

        let mut sink: Vec<String> = Vec::new();
        scheduler.drain(true, &mut sink, Instant::now());
        let sent = frames(&sink);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["id"], json!(2));
        assert_eq!(sent[0]["message_id"], json!(1));
    }

    #[tokio::test]
    async fn test_requeued_request_replaced_while_reconnecting() {
        let mut scheduler = RequestScheduler::new(Station::Game, DEFAULT_MAX_SENT);
        let mut old_params = Map::new();
        old_params.insert("id".into(), json!(1));
        let mut new_params = Map::new();
        new_params.insert("id".into(), json!(2));
        let (old, old_rx) = PendingRequest::with_receiver(Action::Album, old_params);
        let (new, _new_rx) = PendingRequest::with_receiver(Action::Album, new_params);

        let mut sink: Vec<String> = Vec::new();
        scheduler.enqueue(old, true);
        scheduler.drain(true, &mut sink, Instant::now());
        assert_eq!(scheduler.sent_len(), 1);

        // 连接断开，未应答的请求回到队首
        scheduler.requeue_sent();
        scheduler.enqueue(new, false);
        assert_eq!(old_rx.await.unwrap(), Err(RequestError::Superseded));
        assert_eq!(scheduler.queued_len(), 1);

        let mut sink: Vec<String> = Vec::new();
        scheduler.drain(true, &mut sink, Instant::now());
        let sent = frames(&sink);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["id"], json!(2));
        assert_eq!(sent[0]["message_id"], json!(2));
    }

    #[test]
    fn test_oldest_sent_at_follows_sent_table() {
        let mut scheduler = RequestScheduler::new(Station::Game, DEFAULT_MAX_SENT);
        assert_eq!(scheduler.oldest_sent_at(), None);

        let mut sink: Vec<String> = Vec::new();
        let first_at = Instant::now();
        scheduler.enqueue(request(Action::Album), true);
        scheduler.drain(true, &mut sink, first_at);
        let second_at = first_at + std::time::Duration::from_millis(1500);
        scheduler.enqueue(request(Action::Song), true);
        scheduler.drain(true, &mut sink, second_at);
        assert_eq!(scheduler.oldest_sent_at(), Some(first_at));

        scheduler.complete(1);
        assert_eq!(scheduler.oldest_sent_at(), Some(second_at));
        scheduler.complete(2);
        assert_eq!(scheduler.oldest_sent_at(), None);
    }

    #[test]
    fn test_no_transmission_until_ready() {
        let mut scheduler = RequestScheduler::new(Station::Game, DEFAULT_MAX_SENT);
        scheduler.enqueue(request(Action::Album), false);

        let mut sink: Vec<String> = Vec::new();
        let report = scheduler.drain(false, &mut sink, Instant::now());
        assert_eq!(report.transmitted, 0);
        assert!(sink.is_empty());
        assert_eq!(scheduler.queued_len(), 1);
        assert!(!scheduler.is_idle());

        scheduler.drain(true, &mut sink, Instant::now());
        assert_eq!(frames(&sink)[0]["message_id"], json!(1));
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_ids_are_distinct_and_fifo() {
        let mut scheduler = RequestScheduler::new(Station::Covers, DEFAULT_MAX_SENT);
        for action in [Action::Album, Action::Artist, Action::Song] {
            scheduler.enqueue(request(action), false);
        }
        let mut sink: Vec<String> = Vec::new();
        scheduler.drain(true, &mut sink, Instant::now());

        let sent = frames(&sink);
        let actions: Vec<_> = sent.iter().map(|f| f["action"].clone()).collect();
        assert_eq!(actions, vec![json!("album"), json!("artist"), json!("song")]);
        assert_eq!(scheduler.sent_message_ids(), vec![1, 2, 3]);
        assert!(sent.iter().all(|f| f["sid"] == json!(3)));
    }

    #[tokio::test]
    async fn test_sent_table_is_bounded() {
        let mut scheduler = RequestScheduler::new(Station::Game, DEFAULT_MAX_SENT);
        let mut receivers = Vec::new();
        let mut sink: Vec<String> = Vec::new();
        for _ in 0..15 {
            let (req, rx) = PendingRequest::with_receiver(Action::Song, Map::new());
            receivers.push(rx);
            scheduler.enqueue(req, true);
            scheduler.drain(true, &mut sink, Instant::now());
        }

        assert_eq!(scheduler.sent_len(), 10);
        assert_eq!(scheduler.sent_message_ids(), (6..=15).collect::<Vec<_>>());

        for rx in receivers.drain(..5) {
            assert_eq!(rx.await.unwrap(), Err(RequestError::Evicted));
        }
    }

    #[test]
    fn test_complete_out_of_order() {
        let mut scheduler = RequestScheduler::new(Station::Game, DEFAULT_MAX_SENT);
        for action in [Action::Album, Action::Artist, Action::Song] {
            scheduler.enqueue(request(action), true);
        }
        let mut sink: Vec<String> = Vec::new();
        scheduler.drain(true, &mut sink, Instant::now());

        assert_eq!(scheduler.complete(3).unwrap().action(), Action::Song);
        assert_eq!(scheduler.complete(1).unwrap().action(), Action::Album);
        assert!(scheduler.complete(3).is_none());
        assert_eq!(scheduler.sent_message_ids(), vec![2]);
    }

    #[test]
    fn test_send_failure_keeps_request_at_head() {
        let mut scheduler = RequestScheduler::new(Station::Game, DEFAULT_MAX_SENT);
        scheduler.enqueue(request(Action::Album), true);
        scheduler.enqueue(request(Action::Song), true);

        let report = scheduler.drain(true, &mut BrokenSink, Instant::now());
        assert!(report.error.is_some());
        assert_eq!(scheduler.queued_len(), 2);
        assert_eq!(scheduler.sent_len(), 0);

        let mut sink: Vec<String> = Vec::new();
        scheduler.drain(true, &mut sink, Instant::now());
        assert_eq!(frames(&sink)[0]["action"], json!("album"));
    }

    #[test]
    fn test_requeue_sent_preserves_order() {
        let mut scheduler = RequestScheduler::new(Station::Game, DEFAULT_MAX_SENT);
        scheduler.enqueue(request(Action::Album), true);
        scheduler.enqueue(request(Action::Artist), true);
        let mut sink: Vec<String> = Vec::new();
        scheduler.drain(true, &mut sink, Instant::now());
        scheduler.enqueue(request(Action::Song), false);

        assert_eq!(scheduler.requeue_sent(), 2);
        assert_eq!(scheduler.sent_len(), 0);

        let mut sink: Vec<String> = Vec::new();
        scheduler.drain(true, &mut sink, Instant::now());
        let sent = frames(&sink);
        let order: Vec<_> = sent.iter().map(|f| f["action"].clone()).collect();
        assert_eq!(order, vec![json!("album"), json!("artist"), json!("song")]);
        // 重发时分配新的 ID
        assert_eq!(scheduler.sent_message_ids(), vec![3, 4, 5]);
    }
}
