//! 连接状态机
//!
//! 不做任何 IO：只记录状态、计数器和各个定时器的截止时间，
//! 由客户端的事件循环根据返回值去打开 / 关闭传输。

use serde_json::json;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Timings;
use crate::request::Action;

/// 连接生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingAuth,
    Ready,
    PermanentlyClosed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingAuth => "awaiting_auth",
            ConnectionState::Ready => "ready",
            ConnectionState::PermanentlyClosed => "permanently_closed",
        };
        f.write_str(s)
    }
}

/// 到期的定时器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// 连接 / 认证超时
    Connect,
    /// 该发 ping 了
    Keepalive,
    /// 发出请求后一直没有入站帧
    Stall,
    /// 重连等待结束
    Reconnect,
}

/// 认证成功后需要做的事
#[derive(Debug, Default, PartialEq)]
pub struct AuthReady {
    /// 重新同步排期的探测帧（绕过请求队列直接发送）
    pub resync: Option<String>,
}

/// 一次意外断开的结果
#[derive(Debug, PartialEq)]
pub struct RetryNotice {
    /// 连续失败次数
    pub attempts: u32,
    /// 达到配置的最大重试次数
    pub exhausted: bool,
}

/// 连接管理
#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    user_id: u64,
    api_key: String,
    max_retries: u32,
    connect_timeout: Duration,
    keepalive_interval: Duration,
    reconnect_delay: Duration,
    request_timeout: Duration,
    /// 每次打开传输 +1，旧连接的回调据此被忽略
    generation: u64,
    intentional_close: bool,
    failed_attempts: u32,
    schedule_id: Option<u64>,
    connect_deadline: Option<Instant>,
    keepalive_deadline: Option<Instant>,
    stall_deadline: Option<Instant>,
    reconnect_deadline: Option<Instant>,
}

impl ConnectionManager {
    pub fn new(user_id: u64, api_key: impl Into<String>, max_retries: u32, timings: &Timings) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            user_id,
            api_key: api_key.into(),
            max_retries,
            connect_timeout: timings.connect_timeout,
            keepalive_interval: timings.keepalive_interval,
            reconnect_delay: timings.reconnect_delay,
            request_timeout: timings.request_timeout,
            generation: 0,
            intentional_close: false,
            failed_attempts: 0,
            schedule_id: None,
            connect_deadline: None,
            keepalive_deadline: None,
            stall_deadline: None,
            reconnect_deadline: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn schedule_id(&self) -> Option<u64> {
        self.schedule_id
    }

    pub fn set_schedule_id(&mut self, id: u64) {
        self.schedule_id = Some(id);
    }

    /// 开始连接，返回需要打开的传输代号；已就绪、正在连接或已永久关闭时返回 None
    pub fn start(&mut self, now: Instant) -> Option<u64> {
        match self.state {
            ConnectionState::Ready | ConnectionState::Connecting | ConnectionState::AwaitingAuth => {
                debug!("[Connection] start() ignored while {}", self.state);
                return None;
            }
            ConnectionState::PermanentlyClosed => {
                warn!("[Connection] start() ignored: permanently closed");
                return None;
            }
            ConnectionState::Disconnected => {}
        }

        self.generation += 1;
        self.intentional_close = false;
        self.reconnect_deadline = None;
        self.connect_deadline = Some(now + self.connect_timeout);
        self.state = ConnectionState::Connecting;
        info!("[Connection] Connecting (attempt generation {})", self.generation);
        Some(self.generation)
    }

    /// 传输已打开，返回认证帧；过期的代号返回 None
    pub fn on_open(&mut self, generation: u64) -> Option<String> {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            debug!("[Connection] Ignoring stale open for generation {}", generation);
            return None;
        }
        self.state = ConnectionState::AwaitingAuth;
        debug!("[Connection] Socket open, authenticating.");
        Some(
            json!({
                "action": "auth",
                "user_id": self.user_id,
                "key": self.api_key,
            })
            .to_string(),
        )
    }

    /// 收到 `wsok`
    pub fn on_auth_ok(&mut self, now: Instant) -> Option<AuthReady> {
        if self.state != ConnectionState::AwaitingAuth {
            debug!("[Connection] Unexpected wsok while {}", self.state);
            return None;
        }
        self.state = ConnectionState::Ready;
        self.connect_deadline = None;
        self.failed_attempts = 0;
        self.keepalive_deadline = Some(now + self.keepalive_interval);
        info!("[Connection] wsok received - auth was good!");

        let resync = self.schedule_id.map(|id| {
            debug!("[Connection] Socket send - check_sched_current_id with {}", id);
            json!({
                "action": Action::CheckSchedCurrentId.as_str(),
                "sched_id": id,
            })
            .to_string()
        });
        Some(AuthReady { resync })
    }

    /// 认证被拒，不再重连
    pub fn on_auth_rejected(&mut self) {
        warn!("[Connection] Authorization failed for Rainwave websocket. Wrong API key/user ID combo.");
        self.close_permanently();
    }

    /// 传输已断开（任何原因）。意外断开时安排重连
    pub fn on_closed(&mut self, now: Instant) -> Option<RetryNotice> {
        self.clear_session_timers();

        if self.state == ConnectionState::PermanentlyClosed {
            return None;
        }
        self.state = ConnectionState::Disconnected;
        if self.intentional_close {
            debug!("[Connection] Socket closed intentionally.");
            return None;
        }

        self.failed_attempts += 1;
        self.reconnect_deadline = Some(now + self.reconnect_delay);
        let exhausted = self.max_retries > 0 && self.failed_attempts >= self.max_retries;
        info!(
            "[Connection] Socket was closed, reconnecting in {:?} (failures: {})",
            self.reconnect_delay, self.failed_attempts
        );
        Some(RetryNotice {
            attempts: self.failed_attempts,
            exhausted,
        })
    }

    /// 主动断开，可再次 start()
    pub fn stop(&mut self) {
        self.intentional_close = true;
        self.clear_session_timers();
        self.reconnect_deadline = None;
        if self.state != ConnectionState::PermanentlyClosed {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// 主动断开并且不再允许任何连接
    pub fn permanently_close(&mut self) {
        self.close_permanently();
    }

    fn close_permanently(&mut self) {
        self.stop();
        self.state = ConnectionState::PermanentlyClosed;
    }

    fn clear_session_timers(&mut self) {
        self.connect_deadline = None;
        self.keepalive_deadline = None;
        self.stall_deadline = None;
    }

    /// 从最早一条未应答请求的发送时间起计时
    pub fn arm_stall(&mut self, sent_at: Instant) {
        self.stall_deadline = Some(sent_at + self.request_timeout);
    }

    /// 已没有未应答的请求
    pub fn disarm_stall(&mut self) {
        self.stall_deadline = None;
    }

    /// 最近的截止时间
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.connect_deadline,
            self.keepalive_deadline,
            self.stall_deadline,
            self.reconnect_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// 取出一个已到期的定时器。keepalive 会自动续期，其余的清除
    pub fn poll_timer(&mut self, now: Instant) -> Option<Timer> {
        if take_expired(&mut self.connect_deadline, now) {
            debug!("[Connection] Couldn't appear to connect.");
            return Some(Timer::Connect);
        }
        if take_expired(&mut self.stall_deadline, now) {
            debug!("[Connection] Request timed out, forcing reconnect.");
            return Some(Timer::Stall);
        }
        if take_expired(&mut self.reconnect_deadline, now) {
            return Some(Timer::Reconnect);
        }
        if take_expired(&mut self.keepalive_deadline, now) {
            self.keepalive_deadline = Some(now + self.keepalive_interval);
            return Some(Timer::Keepalive);
        }
        None
    }
}

fn take_expired(deadline: &mut Option<Instant>, now: Instant) -> bool {
    match *deadline {
        Some(at) if at <= now => {
            *deadline = None;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn manager(max_retries: u32) -> ConnectionManager {
        ConnectionManager::new(1, "k", max_retries, &Timings::default())
    }

    fn connect(m: &mut ConnectionManager, now: Instant) {
        let generation = m.start(now).unwrap();
        m.on_open(generation).unwrap();
        m.on_auth_ok(now).unwrap();
    }

    #[test]
    fn test_happy_path_and_auth_frame() {
        let mut m = manager(0);
        let now = Instant::now();
        let generation = m.start(now).unwrap();
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.next_deadline(), Some(now + Duration::from_millis(3000)));

        let auth: Value = serde_json::from_str(&m.on_open(generation).unwrap()).unwrap();
        assert_eq!(auth, json!({"action": "auth", "user_id": 1, "key": "k"}));
        assert_eq!(m.state(), ConnectionState::AwaitingAuth);

        let ready = m.on_auth_ok(now).unwrap();
        assert_eq!(ready.resync, None);
        assert!(m.is_ready());
        // 连接超时已撤销，只剩 keepalive
        assert_eq!(m.next_deadline(), Some(now + Duration::from_millis(20000)));
        assert_eq!(m.start(now), None);
    }

    #[test]
    fn test_resync_check_after_auth() {
        let mut m = manager(0);
        assert_eq!(m.schedule_id(), None);
        m.set_schedule_id(42);
        assert_eq!(m.schedule_id(), Some(42));
        let now = Instant::now();
        let generation = m.start(now).unwrap();
        m.on_open(generation);
        let resync: Value = serde_json::from_str(&m.on_auth_ok(now).unwrap().resync.unwrap()).unwrap();
        assert_eq!(resync, json!({"action": "check_sched_current_id", "sched_id": 42}));
    }

    #[test]
    fn test_stale_open_ignored() {
        let mut m = manager(0);
        let now = Instant::now();
        let first = m.start(now).unwrap();
        m.on_closed(now);
        let second = m.start(now + Duration::from_millis(500)).unwrap();
        assert_ne!(first, second);
        assert_eq!(m.on_open(first), None);
        assert!(m.on_open(second).is_some());
    }

    #[test]
    fn test_unintentional_close_schedules_reconnect() {
        let mut m = manager(0);
        let now = Instant::now();
        connect(&mut m, now);

        let notice = m.on_closed(now).unwrap();
        assert_eq!(notice, RetryNotice { attempts: 1, exhausted: false });
        assert_eq!(m.state(), ConnectionState::Disconnected);

        let due = now + Duration::from_millis(500);
        assert_eq!(m.next_deadline(), Some(due));
        assert_eq!(m.poll_timer(now), None);
        assert_eq!(m.poll_timer(due), Some(Timer::Reconnect));
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_retry_counter_and_notice() {
        let mut m = manager(2);
        let mut now = Instant::now();
        m.start(now);
        assert!(!m.on_closed(now).unwrap().exhausted);
        now += Duration::from_millis(500);
        m.start(now);
        let notice = m.on_closed(now).unwrap();
        assert_eq!(notice.attempts, 2);
        assert!(notice.exhausted);

        // 继续重试，成功后计数清零
        now += Duration::from_millis(500);
        connect(&mut m, now);
        assert_eq!(m.failed_attempts(), 0);
    }

    #[test]
    fn test_stop_is_intentional() {
        let mut m = manager(0);
        let now = Instant::now();
        connect(&mut m, now);
        m.stop();
        assert_eq!(m.on_closed(now), None);
        assert_eq!(m.next_deadline(), None);
        assert_eq!(m.failed_attempts(), 0);

        // stop 之后可以再次 start
        assert!(m.start(now).is_some());
    }

    #[test]
    fn test_auth_rejection_is_terminal() {
        let mut m = manager(0);
        let now = Instant::now();
        let generation = m.start(now).unwrap();
        m.on_open(generation);
        m.on_auth_rejected();
        assert_eq!(m.state(), ConnectionState::PermanentlyClosed);
        assert_eq!(m.on_closed(now), None);
        assert_eq!(m.next_deadline(), None);
        assert_eq!(m.start(now + Duration::from_secs(10)), None);
    }

    #[test]
    fn test_timers() {
        let mut m = manager(0);
        let now = Instant::now();
        m.start(now);
        assert_eq!(m.poll_timer(now + Duration::from_millis(3000)), Some(Timer::Connect));

        let mut m = manager(0);
        connect(&mut m, now);
        m.arm_stall(now);
        assert_eq!(m.poll_timer(now + Duration::from_millis(4000)), Some(Timer::Stall));
        m.arm_stall(now);
        m.disarm_stall();
        assert_eq!(m.next_deadline(), Some(now + Duration::from_millis(20000)));

        // 计时起点是请求的发送时间，不是重新计时的时刻
        m.arm_stall(now + Duration::from_millis(1000));
        assert_eq!(m.next_deadline(), Some(now + Duration::from_millis(5000)));
        m.disarm_stall();

        let tick = now + Duration::from_millis(20000);
        assert_eq!(m.poll_timer(tick), Some(Timer::Keepalive));
        assert_eq!(m.next_deadline(), Some(tick + Duration::from_millis(20000)));
    }
}
