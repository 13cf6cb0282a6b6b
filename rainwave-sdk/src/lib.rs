//! Rainwave 实时 API 客户端
//!
//! 维护一条到 Rainwave 的 websocket 连接：认证、断线重连、
//! 在同一连接上复用多个请求，并把服务端推送分发给订阅者。

mod actions;
mod broadcaster;
mod client;
mod config;
mod connection;
mod dispatcher;
mod error;
mod events;
mod latency;
mod models;
mod request;
mod scheduler;
mod transport;

pub use broadcaster::{listener, EventBroadcaster, Listener};
pub use client::RainwaveClient;
pub use config::{DebugSink, SdkConfig, SocketErrorHook, Timings, TlsConfig, DEFAULT_URL};
pub use connection::{AuthReady, ConnectionManager, ConnectionState, RetryNotice, Timer};
pub use dispatcher::{DispatchReport, MessageDispatcher};
pub use error::{RequestError, SdkError};
pub use events::{
    ErrorClear, ErrorPayload, Event, EventKind, SdkException, Station, TL_AUTH_FAILED,
    TL_STATION_OFFLINE, TL_SYNC_RETRYING,
};
pub use latency::LatencyTracker;
pub use models::{
    Album, BooleanResult, FaveResult, LiveVotingEntry, RateResult, RequestedSong, ScheduleEvent,
    Song, StationDescription, StationSongCount, UpdatedAlbumRating, User,
};
pub use request::{Action, PendingRequest, Responder};
pub use scheduler::{DrainReport, FrameSink, RequestScheduler, DEFAULT_MAX_SENT};
pub use transport::{Connector, Link, LinkEvent, Outgoing, WebSocketConnector};
