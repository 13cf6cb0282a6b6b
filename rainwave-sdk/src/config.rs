//! 客户端配置

use crate::error::SdkError;
use crate::events::Station;
use crate::scheduler::DEFAULT_MAX_SENT;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// 生产环境的 websocket 地址
pub const DEFAULT_URL: &str = "wss://rainwave.cc/api4/websocket/";

/// 诊断日志回调
pub type DebugSink = Arc<dyn Fn(&str) + Send + Sync>;

/// 传输错误回调
pub type SocketErrorHook = Arc<dyn Fn(&SdkError) + Send + Sync>;

/// TLS 配置
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// CA 证书路径
    pub ca_cert_path: Option<PathBuf>,
    /// 是否跳过服务器证书验证（仅开发用）
    pub danger_accept_invalid_certs: bool,
}

/// 协议时序参数
#[derive(Debug, Clone)]
pub struct Timings {
    /// 打开连接到认证成功的最长时间
    pub connect_timeout: Duration,
    /// Ready 状态下发送 ping 的间隔
    pub keepalive_interval: Duration,
    /// 意外断开后重连前的等待
    pub reconnect_delay: Duration,
    /// 发出请求后多久没有任何入站帧视为卡住
    pub request_timeout: Duration,
    /// 已发送表上限
    pub max_sent: usize,
    /// 延迟统计窗口
    pub latency_window: usize,
    /// 平均延迟超过此值时 `is_slow()` 为 true
    pub slow_threshold: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            keepalive_interval: Duration::from_millis(20000),
            reconnect_delay: Duration::from_millis(500),
            request_timeout: Duration::from_millis(4000),
            max_sent: DEFAULT_MAX_SENT,
            latency_window: 10,
            slow_threshold: Duration::from_millis(2000),
        }
    }
}

/// SDK 配置
#[derive(Clone)]
pub struct SdkConfig {
    /// websocket 基础地址，电台 id 会拼在后面
    pub url: String,
    pub user_id: u64,
    pub api_key: String,
    pub sid: Station,
    /// 连续失败多少次后发出通知，0 表示不限
    pub max_retries: u32,
    pub timings: Timings,
    pub tls: TlsConfig,
    pub debug: Option<DebugSink>,
    pub on_socket_error: Option<SocketErrorHook>,
}

impl Default for SdkConfig {
    fn default() -> Self {
        let url = std::env::var("RAINWAVE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let max_retries = std::env::var("RAINWAVE_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);

        Self {
            url,
            user_id: 0,
            api_key: String::new(),
            sid: Station::Game,
            max_retries,
            timings: Timings::default(),
            tls: TlsConfig::default(),
            debug: None,
            on_socket_error: None,
        }
    }
}

impl SdkConfig {
    pub fn new(user_id: u64, api_key: impl Into<String>, sid: Station) -> Self {
        Self {
            user_id,
            api_key: api_key.into(),
            sid,
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_debug<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.debug = Some(Arc::new(sink));
        self
    }

    pub fn with_socket_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SdkError) + Send + Sync + 'static,
    {
        self.on_socket_error = Some(Arc::new(hook));
        self
    }

    /// 实际连接的地址：去掉结尾的 `/` 后拼上电台 id
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), self.sid.id())
    }
}

impl fmt::Debug for SdkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkConfig")
            .field("url", &self.url)
            .field("user_id", &self.user_id)
            .field("api_key", &"<redacted>")
            .field("sid", &self.sid)
            .field("max_retries", &self.max_retries)
            .field("timings", &self.timings)
            .field("tls", &self.tls)
            .field("debug", &self.debug.is_some())
            .field("on_socket_error", &self.on_socket_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = SdkConfig::new(1, "k", Station::Covers).with_url("wss://example.test/ws/");
        assert_eq!(config.endpoint(), "wss://example.test/ws/3");

        let config = config.with_url("ws://test");
        assert_eq!(config.endpoint(), "ws://test/3");
    }

    #[test]
    fn test_debug_output_hides_key() {
        let config = SdkConfig::new(7, "secret", Station::Game);
        let printed = format!("{:?}", config);
        assert!(!printed.contains("secret"));
        assert!(printed.contains("user_id: 7"));
    }

    #[test]
    fn test_default_timings() {
        let timings = Timings::default();
        assert_eq!(timings.connect_timeout, Duration::from_millis(3000));
        assert_eq!(timings.keepalive_interval, Duration::from_millis(20000));
        assert_eq!(timings.reconnect_delay, Duration::from_millis(500));
        assert_eq!(timings.request_timeout, Duration::from_millis(4000));
        assert_eq!(timings.max_sent, 10);
    }
}
