//! 传输层
//!
//! [`Connector`] 打开一条 [`Link`]：出站文本通道 + 入站事件通道。
//! 生产实现基于 tokio-tungstenite，测试使用内存中的 mock。

use crate::config::TlsConfig;
use crate::error::SdkError;
use crate::scheduler::FrameSink;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use native_tls::{Certificate, TlsConnector};
use std::fs;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector as WsConnector};
use tracing::{debug, info, warn};

/// 出站指令
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Text(String),
    Close,
}

/// 入站事件
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Frame(String),
    Closed,
    Error(String),
}

/// 一条已打开的连接
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Outgoing>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Link {
    /// 通知对端关闭，忽略已经断开的情况
    pub fn close(&self) {
        let _ = self.outbound.send(Outgoing::Close);
    }
}

impl FrameSink for mpsc::UnboundedSender<Outgoing> {
    fn send_frame(&mut self, frame: String) -> Result<(), SdkError> {
        self.send(Outgoing::Text(frame))
            .map_err(|_| SdkError::SendFailed("link is closed".into()))
    }
}

/// 打开连接
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, endpoint: String) -> BoxFuture<'static, Result<Link, SdkError>>;
}

/// websocket 连接器
#[derive(Clone, Default)]
pub struct WebSocketConnector {
    tls: Option<TlsConnector>,
}

impl WebSocketConnector {
    pub fn new(tls: &TlsConfig) -> Result<Self, SdkError> {
        Ok(Self {
            tls: build_tls_connector(tls)?,
        })
    }
}

/// 构建 TLS 连接器，没有自定义配置时使用系统默认
fn build_tls_connector(tls: &TlsConfig) -> Result<Option<TlsConnector>, SdkError> {
    if tls.ca_cert_path.is_none() && !tls.danger_accept_invalid_certs {
        return Ok(None);
    }

    let mut builder = TlsConnector::builder();

    if let Some(ca_path) = &tls.ca_cert_path {
        info!("[Transport] Loading CA certificate from {:?}", ca_path);
        let ca_pem = fs::read(ca_path)
            .map_err(|e| SdkError::TlsError(format!("Failed to read CA cert: {}", e)))?;
        let ca_cert = Certificate::from_pem(&ca_pem)
            .map_err(|e| SdkError::TlsError(format!("Failed to parse CA cert: {}", e)))?;
        builder.add_root_certificate(ca_cert);
    }

    if tls.danger_accept_invalid_certs {
        warn!("[Transport] TLS certificate verification disabled - FOR DEVELOPMENT ONLY");
        builder.danger_accept_invalid_certs(true);
    }

    let connector = builder
        .build()
        .map_err(|e| SdkError::TlsError(format!("Failed to build TLS connector: {}", e)))?;
    Ok(Some(connector))
}

impl Connector for WebSocketConnector {
    fn connect(&self, endpoint: String) -> BoxFuture<'static, Result<Link, SdkError>> {
        let tls = self.tls.clone().map(WsConnector::NativeTls);
        Box::pin(async move {
            if !endpoint.starts_with("ws://") && !endpoint.starts_with("wss://") {
                return Err(SdkError::InvalidUrl(endpoint));
            }

            info!("[Transport] Connecting to {}", endpoint);
            let (ws, _response) = connect_async_tls_with_config(endpoint.as_str(), None, false, tls)
                .await
                .map_err(|e| SdkError::ConnectionFailed(e.to_string()))?;

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump(ws, out_rx, in_tx));

            Ok(Link {
                outbound: out_tx,
                inbound: in_rx,
            })
        })
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// 在 websocket 与两个通道之间搬运数据，任一方向结束即退出
async fn pump(
    ws: WsStream,
    mut out_rx: mpsc::UnboundedReceiver<Outgoing>,
    in_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => match outgoing {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        let _ = in_tx.send(LinkEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    debug!("[Transport] Socket closed.");
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = in_tx.send(LinkEvent::Frame(text));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        let _ = in_tx.send(LinkEvent::Frame(text));
                    }
                    Err(e) => {
                        let _ = in_tx.send(LinkEvent::Error(e.to_string()));
                        break;
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    let _ = in_tx.send(LinkEvent::Closed);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = in_tx.send(LinkEvent::Error(e.to_string()));
                    break;
                }
            },
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_sender_as_frame_sink() {
        let (mut tx, mut rx) = mpsc::unbounded_channel();
        tx.send_frame("{}".into()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Outgoing::Text("{}".into()));

        drop(rx);
        assert!(matches!(tx.send_frame("{}".into()), Err(SdkError::SendFailed(_))));
    }

    #[test]
    fn test_default_tls_needs_no_connector() {
        assert!(build_tls_connector(&TlsConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_missing_ca_file_is_tls_error() {
        let tls = TlsConfig {
            ca_cert_path: Some("/nonexistent/ca.pem".into()),
            danger_accept_invalid_certs: false,
        };
        assert!(matches!(build_tls_connector(&tls), Err(SdkError::TlsError(_))));
    }

    #[test]
    fn test_unparseable_ca_is_tls_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"not a certificate").unwrap();
        let tls = TlsConfig {
            ca_cert_path: Some(file.path().to_path_buf()),
            danger_accept_invalid_certs: false,
        };
        match build_tls_connector(&tls) {
            Err(SdkError::TlsError(message)) => assert!(message.contains("parse")),
            other => panic!("unexpected result {:?}", other.map(|c| c.is_some())),
        }
    }

    #[tokio::test]
    async fn test_invalid_scheme_rejected() {
        let connector = WebSocketConnector::default();
        let result = connector.connect("http://example.test/1".into()).await;
        assert!(matches!(result, Err(SdkError::InvalidUrl(_))));
    }
}
