//! 入站帧分发
//!
//! 解析服务端帧，按 `message_id` 完成对应请求，其余顶层 key 作为事件广播。
//! 投票相关的 key 延后到排期数据发布之后再广播。

use crate::broadcaster::EventBroadcaster;
use crate::error::{RequestError, SdkError};
use crate::events::{
    ErrorClear, ErrorPayload, Event, EventKind, SdkException, TL_STATION_OFFLINE,
    TL_SYNC_RETRYING,
};
use crate::request::Action;
use crate::scheduler::RequestScheduler;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// 关联字段，不作为事件广播
const MESSAGE_ID_KEY: &str = "message_id";

/// 延后广播的 key（依赖排期数据）
const DEFERRED: [EventKind; 2] = [EventKind::AlreadyVoted, EventKind::LiveVoting];

/// 一帧分发后连接层需要关心的信号
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// 完成的请求及其往返时间
    pub completed: Option<(Action, Option<Duration>)>,
    /// 收到 `wsok`
    pub auth_ok: bool,
    /// 收到 `wserror`
    pub auth_error: Option<ErrorPayload>,
    /// 服务端发来 `ping`
    pub server_ping: bool,
    /// `sched_current` 的 id
    pub schedule_id: Option<u64>,
}

/// 消息分发器
pub struct MessageDispatcher {
    broadcaster: Arc<EventBroadcaster>,
}

impl MessageDispatcher {
    pub fn new(broadcaster: Arc<EventBroadcaster>) -> Self {
        Self { broadcaster }
    }

    /// 处理一帧。解析失败或空帧返回错误，由连接层当作传输故障处理
    pub fn on_frame(
        &self,
        raw: &str,
        scheduler: &mut RequestScheduler,
        now: Instant,
    ) -> Result<DispatchReport, SdkError> {
        let body = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) if !map.is_empty() => map,
            Ok(_) => {
                warn!("[Dispatcher] Response from Rainwave API was blank: {}", raw);
                return Err(SdkError::Protocol("blank response".into()));
            }
            Err(e) => {
                warn!("[Dispatcher] Response from Rainwave API was not JSON: {}", e);
                return Err(SdkError::Protocol(e.to_string()));
            }
        };
        debug!("[Dispatcher] Socket receive {}", raw);

        self.broadcaster.emit(&Event::SdkErrorClear(ErrorClear {
            tl_key: TL_SYNC_RETRYING.into(),
        }));

        let mut report = DispatchReport::default();
        self.complete_request(&body, scheduler, now, &mut report);
        self.check_sync_result(&body);
        self.perform_callbacks(body, &mut report);
        Ok(report)
    }

    fn complete_request(
        &self,
        body: &Map<String, Value>,
        scheduler: &mut RequestScheduler,
        now: Instant,
        report: &mut DispatchReport,
    ) {
        let Some(message_id) = body.get(MESSAGE_ID_KEY).and_then(Value::as_u64) else {
            return;
        };
        let Some(request) = scheduler.complete(message_id) else {
            debug!("[Dispatcher] No pending request for message_id {}", message_id);
            return;
        };

        let rtt = request.sent_at().map(|sent| now.saturating_duration_since(sent));
        report.completed = Some((request.action(), rtt));

        match body.get("error") {
            Some(error) => {
                let payload = serde_json::from_value::<ErrorPayload>(error.clone()).unwrap_or_else(|_| {
                    ErrorPayload {
                        code: 0,
                        tl_key: "unknown_error".into(),
                        text: error.to_string(),
                    }
                });
                debug!("[Dispatcher] {} failed: {}", request.action(), payload.tl_key);
                request.reject(RequestError::Server(payload));
            }
            None => request.resolve(Value::Object(body.clone())),
        }
    }

    fn check_sync_result(&self, body: &Map<String, Value>) {
        let Some(sync_result) = body.get("sync_result") else {
            return;
        };
        let offline = sync_result.get("tl_key").and_then(Value::as_str) == Some(TL_STATION_OFFLINE);
        if offline {
            let payload = serde_json::from_value(sync_result.clone())
                .unwrap_or_else(|_| ErrorPayload::new(TL_STATION_OFFLINE));
            self.broadcaster.emit(&Event::Error(payload));
        } else {
            self.broadcaster.emit(&Event::SdkErrorClear(ErrorClear {
                tl_key: TL_STATION_OFFLINE.into(),
            }));
        }
    }

    fn perform_callbacks(&self, body: Map<String, Value>, report: &mut DispatchReport) {
        let mut deferred: Vec<(EventKind, Value)> = Vec::new();

        for (key, value) in body {
            if key == MESSAGE_ID_KEY {
                continue;
            }
            let kind = match EventKind::from_key(&key) {
                Some(kind) if !kind.is_internal() => kind,
                _ => {
                    warn!("[Dispatcher] Ignoring unknown response key: {}", key);
                    continue;
                }
            };
            if DEFERRED.contains(&kind) {
                deferred.push((kind, value));
                continue;
            }
            self.emit_decoded(kind, value, report);
        }

        // 只有 sched_current 解码成功才算同步完成
        if report.schedule_id.is_some() {
            debug!("[Dispatcher] Sync complete.");
            self.broadcaster.emit(&Event::SdkScheduleSynced(true));
        }

        for kind in DEFERRED {
            if let Some(index) = deferred.iter().position(|(k, _)| *k == kind) {
                let (kind, value) = deferred.swap_remove(index);
                if !value.is_null() {
                    self.emit_decoded(kind, value, report);
                }
            }
        }
    }

    fn emit_decoded(&self, kind: EventKind, value: Value, report: &mut DispatchReport) {
        let event = match Event::decode(kind, value) {
            Ok(event) => event,
            Err(e) => {
                warn!("[Dispatcher] Malformed {} payload: {}", kind, e);
                self.broadcaster.emit(&Event::SdkException(SdkException {
                    message: format!("malformed {} payload: {}", kind, e),
                }));
                return;
            }
        };

        match &event {
            Event::Wsok(_) => report.auth_ok = true,
            Event::Wserror(error) => report.auth_error = Some(error.clone()),
            Event::Ping(_) => report.server_ping = true,
            Event::SchedCurrent(schedule) => report.schedule_id = Some(schedule.id),
            _ => {}
        }

        self.broadcaster.emit(&event);
    }
}
