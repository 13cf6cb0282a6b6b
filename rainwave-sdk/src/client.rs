//! Rainwave 客户端
//!
//! [`RainwaveClient`] 是可克隆的句柄；所有可变状态都属于一个后台任务，
//! 句柄通过命令通道与它交互，事件回调在该任务中同步执行。

use crate::broadcaster::{listener, EventBroadcaster, Listener};
use crate::config::{DebugSink, SdkConfig, SocketErrorHook};
use crate::connection::{ConnectionManager, ConnectionState, Timer};
use crate::dispatcher::{DispatchReport, MessageDispatcher};
use crate::error::{RequestError, SdkError};
use crate::events::{
    ErrorClear, ErrorPayload, Event, EventKind, SdkException, TL_AUTH_FAILED, TL_SYNC_RETRYING,
};
use crate::latency::LatencyTracker;
use crate::request::{Action, PendingRequest};
use crate::scheduler::RequestScheduler;
use crate::transport::{Connector, Link, LinkEvent, Outgoing, WebSocketConnector};
use serde_json::{Map, Value};
use std::future::pending;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// 句柄发给后台任务的命令
#[derive(Debug)]
enum Command {
    Start,
    Stop,
    PermanentlyClose,
    Request(PendingRequest),
}

type ConnectOutcome = (u64, Result<Link, SdkError>);

struct Shared {
    commands: mpsc::UnboundedSender<Command>,
    broadcaster: Arc<EventBroadcaster>,
    state: watch::Receiver<ConnectionState>,
    failed_attempts: Arc<AtomicU32>,
    latency: Arc<Mutex<LatencyTracker>>,
}

/// Rainwave 实时 API 客户端
///
/// 所有句柄都被丢弃后后台任务关闭连接并退出。
#[derive(Clone)]
pub struct RainwaveClient {
    shared: Arc<Shared>,
}

impl RainwaveClient {
    /// 使用 websocket 传输创建客户端，需要在 tokio 运行时中调用
    pub fn new(config: SdkConfig) -> Result<Self, SdkError> {
        let connector = WebSocketConnector::new(&config.tls)?;
        Ok(Self::with_connector(config, connector))
    }

    /// 使用自定义传输创建客户端
    pub fn with_connector<C: Connector>(config: SdkConfig, connector: C) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let broadcaster = Arc::new(EventBroadcaster::new());
        let failed_attempts = Arc::new(AtomicU32::new(0));
        let latency = Arc::new(Mutex::new(LatencyTracker::new(
            config.timings.latency_window,
            config.timings.slow_threshold,
        )));

        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        let actor = Actor {
            endpoint: config.endpoint(),
            manager: ConnectionManager::new(
                config.user_id,
                config.api_key.clone(),
                config.max_retries,
                &config.timings,
            ),
            scheduler: RequestScheduler::new(config.sid, config.timings.max_sent),
            dispatcher: MessageDispatcher::new(broadcaster.clone()),
            debug_sink: config.debug,
            on_socket_error: config.on_socket_error,
            connector: Arc::new(connector),
            broadcaster: broadcaster.clone(),
            state_tx,
            failed_attempts: failed_attempts.clone(),
            latency: latency.clone(),
            link: None,
            opened_tx,
        };
        tokio::spawn(actor.run(command_rx, opened_rx));

        Self {
            shared: Arc::new(Shared {
                commands,
                broadcaster,
                state,
                failed_attempts,
                latency,
            }),
        }
    }

    fn send(&self, command: Command) {
        if self.shared.commands.send(command).is_err() {
            warn!("[Rainwave] Client task is gone, command dropped");
        }
    }

    /// 连接（已就绪时无操作）
    pub fn start(&self) {
        self.send(Command::Start);
    }

    /// 断开连接，丢弃所有未完成的请求；之后可以再次 start()
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// 断开连接并且不再重连
    pub fn permanently_close(&self) {
        self.send(Command::PermanentlyClose);
    }

    pub fn subscribe(&self, kind: EventKind, listener: Listener) {
        self.shared.broadcaster.subscribe(kind, listener);
    }

    /// 订阅并返回回调本身，用于之后取消订阅
    pub fn on<F>(&self, kind: EventKind, f: F) -> Listener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let l = listener(f);
        self.subscribe(kind, l.clone());
        l
    }

    pub fn unsubscribe(&self, kind: EventKind, listener: &Listener) {
        self.shared.broadcaster.unsubscribe(kind, listener);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.shared.broadcaster.count(kind)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.clone()
    }

    /// 自上次认证成功以来的连续失败次数
    pub fn failed_attempts(&self) -> u32 {
        self.shared.failed_attempts.load(Ordering::SeqCst)
    }

    /// 最近请求的平均往返时间是否过高
    pub fn is_slow(&self) -> bool {
        self.shared
            .latency
            .lock()
            .map(|tracker| tracker.is_slow())
            .unwrap_or(false)
    }

    /// 发送任意操作，返回完整的响应体
    pub async fn request(
        &self,
        action: Action,
        params: Map<String, Value>,
    ) -> Result<Value, RequestError> {
        let (request, rx) = PendingRequest::with_receiver(action, params);
        if self.shared.commands.send(Command::Request(request)).is_err() {
            return Err(RequestError::Abandoned);
        }
        rx.await.unwrap_or(Err(RequestError::Abandoned))
    }
}

/// 后台任务：持有连接、调度器与分发器
struct Actor {
    endpoint: String,
    debug_sink: Option<DebugSink>,
    on_socket_error: Option<SocketErrorHook>,
    connector: Arc<dyn Connector>,
    manager: ConnectionManager,
    scheduler: RequestScheduler,
    dispatcher: MessageDispatcher,
    broadcaster: Arc<EventBroadcaster>,
    state_tx: watch::Sender<ConnectionState>,
    failed_attempts: Arc<AtomicU32>,
    latency: Arc<Mutex<LatencyTracker>>,
    link: Option<Link>,
    opened_tx: mpsc::UnboundedSender<ConnectOutcome>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut opened: mpsc::UnboundedReceiver<ConnectOutcome>,
    ) {
        loop {
            let deadline = self.manager.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some((generation, outcome)) = opened.recv() => {
                    self.on_connect_outcome(generation, outcome);
                }
                event = next_link_event(&mut self.link) => self.on_link_event(event),
                _ = sleep_or_pending(deadline) => self.on_timers(),
            }
            self.publish_state();
        }

        debug!("[Rainwave] All client handles dropped, shutting down");
        self.manager.stop();
        self.close_link();
        self.scheduler.abandon_all();
    }

    fn log(&self, message: &str) {
        debug!("[Rainwave] {}", message);
        if let Some(sink) = &self.debug_sink {
            sink(message);
        }
    }

    fn publish_state(&self) {
        self.failed_attempts
            .store(self.manager.failed_attempts(), Ordering::SeqCst);
        let state = self.manager.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    // ==================== 命令 ====================

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Start => self.start_connection(),
            Command::Stop => {
                self.manager.stop();
                self.close_link();
                self.scheduler.abandon_all();
                self.log("Socket closed.");
            }
            Command::PermanentlyClose => {
                self.manager.permanently_close();
                self.close_link();
                self.scheduler.abandon_all();
                self.log("Socket permanently closed.");
            }
            Command::Request(request) => self.enqueue(request),
        }
    }

    fn enqueue(&mut self, request: PendingRequest) {
        if self.manager.state() == ConnectionState::PermanentlyClosed {
            debug!("[Rainwave] Dropping {}: client is permanently closed", request.action());
            return;
        }
        if self.scheduler.enqueue(request, self.manager.is_ready()) {
            self.drain();
        }
    }

    fn start_connection(&mut self) {
        let Some(generation) = self.manager.start(Instant::now()) else {
            return;
        };
        self.log(&format!("Connecting to {}", self.endpoint));

        let connect = self.connector.connect(self.endpoint.clone());
        let opened_tx = self.opened_tx.clone();
        tokio::spawn(async move {
            let outcome = connect.await;
            let _ = opened_tx.send((generation, outcome));
        });
    }

    // ==================== 传输 ====================

    fn on_connect_outcome(&mut self, generation: u64, outcome: Result<Link, SdkError>) {
        match outcome {
            Ok(link) => match self.manager.on_open(generation) {
                Some(auth) => {
                    self.log("Socket open.");
                    if link.outbound.send(Outgoing::Text(auth)).is_err() {
                        self.fault(SdkError::SendFailed("link closed before auth".into()));
                        return;
                    }
                    self.link = Some(link);
                }
                None => link.close(),
            },
            Err(e) => {
                let current = generation == self.manager.generation()
                    && self.manager.state() == ConnectionState::Connecting;
                if current {
                    self.fault(e);
                } else {
                    debug!("[Rainwave] Ignoring stale connect failure: {}", e);
                }
            }
        }
    }

    fn on_link_event(&mut self, event: Option<LinkEvent>) {
        match event {
            Some(LinkEvent::Frame(raw)) => self.on_frame(&raw),
            Some(LinkEvent::Error(e)) => self.fault(SdkError::Transport(e)),
            Some(LinkEvent::Closed) | None => {
                self.fault(SdkError::ConnectionFailed("socket was closed".into()))
            }
        }
    }

    fn on_frame(&mut self, raw: &str) {
        let now = Instant::now();
        match self.dispatcher.on_frame(raw, &mut self.scheduler, now) {
            Ok(report) => {
                self.apply(report, now);
                self.refresh_stall();
            }
            Err(e) => self.fault(e),
        }
    }

    /// 停滞计时跟随最早一条未应答的请求，已发送表为空时关闭
    fn refresh_stall(&mut self) {
        match self.scheduler.oldest_sent_at() {
            Some(sent_at) if self.link.is_some() => self.manager.arm_stall(sent_at),
            _ => self.manager.disarm_stall(),
        }
    }

    fn apply(&mut self, report: DispatchReport, now: Instant) {
        if let Some((_, Some(rtt))) = report.completed {
            if let Ok(mut tracker) = self.latency.lock() {
                tracker.record(rtt);
            }
        }
        if let Some(id) = report.schedule_id {
            self.manager.set_schedule_id(id);
        }

        if let Some(error) = report.auth_error {
            if error.tl_key == TL_AUTH_FAILED {
                self.log("Authorization failed for Rainwave websocket. Wrong API key/user ID combo.");
                self.broadcaster.emit(&Event::Error(error));
                self.manager.on_auth_rejected();
                self.close_link();
                self.scheduler.abandon_all();
                return;
            }
            warn!("[Rainwave] Server reported {}", error.tl_key);
        }

        if report.auth_ok {
            if let Some(ready) = self.manager.on_auth_ok(now) {
                self.log("wsok received - auth was good!");
                self.broadcaster.emit(&Event::SdkErrorClear(ErrorClear {
                    tl_key: TL_SYNC_RETRYING.into(),
                }));
                if let Some(resync) = ready.resync {
                    if let Err(e) = self.send_direct(resync) {
                        self.fault(e);
                        return;
                    }
                }
            }
        }

        if report.server_ping {
            self.log("Server ping.");
            self.enqueue(PendingRequest::new(Action::Pong, Map::new(), None));
        }

        self.drain();
    }

    fn send_direct(&mut self, frame: String) -> Result<(), SdkError> {
        let link = self.link.as_ref().ok_or(SdkError::NotConnected)?;
        link.outbound
            .send(Outgoing::Text(frame))
            .map_err(|_| SdkError::SendFailed("link is closed".into()))
    }

    fn drain(&mut self) {
        let ready = self.manager.is_ready();
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let now = Instant::now();
        let report = self.scheduler.drain(ready, &mut link.outbound, now);
        if report.correlated > 0 {
            self.refresh_stall();
        }
        if let Some(e) = report.error {
            self.broadcaster.emit(&Event::SdkException(SdkException {
                message: e.to_string(),
            }));
            self.fault(e);
        }
    }

    fn close_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
    }

    /// 意外断开：关闭当前传输、把未应答的请求放回队首、按策略安排重连
    fn fault(&mut self, error: SdkError) {
        warn!("[Rainwave] Socket fault: {}", error);
        self.close_link();
        self.scheduler.requeue_sent();

        let Some(notice) = self.manager.on_closed(Instant::now()) else {
            return;
        };
        self.log("Socket was closed.");
        self.broadcaster.emit(&Event::Error(ErrorPayload::new(TL_SYNC_RETRYING)));
        self.notify_socket_error(&error);

        if notice.exhausted {
            info!(
                "[Rainwave] {} failed connection attempts, still retrying",
                notice.attempts
            );
            let exhausted = SdkError::RetriesExhausted(notice.attempts);
            self.broadcaster.emit(&Event::SdkException(SdkException {
                message: exhausted.to_string(),
            }));
            self.notify_socket_error(&exhausted);
        }
    }

    fn notify_socket_error(&self, error: &SdkError) {
        if let Some(hook) = &self.on_socket_error {
            hook(error);
        }
    }

    // ==================== 定时器 ====================

    fn on_timers(&mut self) {
        let now = Instant::now();
        while let Some(timer) = self.manager.poll_timer(now) {
            match timer {
                Timer::Connect => {
                    self.log("Couldn't appear to connect.");
                    self.fault(SdkError::ConnectionFailed("connect timed out".into()));
                }
                Timer::Stall => {
                    self.log("Forcing socket reconnect.");
                    self.fault(SdkError::Transport("request timed out".into()));
                }
                Timer::Reconnect => self.start_connection(),
                Timer::Keepalive => {
                    self.log("Pinging server.");
                    self.enqueue(PendingRequest::new(Action::Ping, Map::new(), None));
                }
            }
        }
    }
}

async fn next_link_event(link: &mut Option<Link>) -> Option<LinkEvent> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => pending().await,
    }
}

async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
