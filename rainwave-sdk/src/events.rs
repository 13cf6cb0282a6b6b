//! 事件定义
//!
//! 服务端推送的每个顶层 key 都对应一个 [`EventKind`]，以及 SDK 自己产生的诊断事件。
//! 未在此列出的 key 在分发边界被拒绝。

use crate::models::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ==================== 电台 ====================

/// 电台（逻辑频道）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Station {
    Game = 1,
    Ocremix = 2,
    Covers = 3,
    Chiptune = 4,
    All = 5,
}

impl Station {
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl From<Station> for u8 {
    fn from(station: Station) -> Self {
        station.id()
    }
}

impl TryFrom<u8> for Station {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Station::Game),
            2 => Ok(Station::Ocremix),
            3 => Ok(Station::Covers),
            4 => Ok(Station::Chiptune),
            5 => Ok(Station::All),
            other => Err(format!("unknown station id {}", other)),
        }
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

// ==================== 诊断事件数据 ====================

/// 错误负载（`error` / `wserror` / `sync_result` 以及请求级错误）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: i64,
    pub tl_key: String,
    #[serde(default)]
    pub text: String,
}

impl ErrorPayload {
    pub fn new(tl_key: &str) -> Self {
        Self {
            code: 0,
            tl_key: tl_key.to_string(),
            text: String::new(),
        }
    }
}

/// 某个错误状态已解除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClear {
    pub tl_key: String,
}

/// SDK 内部异常（例如发送失败）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkException {
    pub message: String,
}

/// 常用的 tl_key
pub const TL_SYNC_RETRYING: &str = "sync_retrying";
pub const TL_STATION_OFFLINE: &str = "station_offline";
pub const TL_AUTH_FAILED: &str = "auth_failed";

// ==================== 事件表 ====================

macro_rules! rainwave_events {
    ($( $variant:ident = $key:literal => $payload:ty, )*) => {
        /// 可订阅的事件名（封闭集合）
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventKind {
            $( $variant, )*
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[ $( EventKind::$variant, )* ];

            /// 线上使用的 key
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( EventKind::$variant => $key, )*
                }
            }

            pub fn from_key(key: &str) -> Option<Self> {
                match key {
                    $( $key => Some(EventKind::$variant), )*
                    _ => None,
                }
            }
        }

        /// 带类型负载的事件
        #[derive(Debug, Clone, PartialEq)]
        pub enum Event {
            $( $variant($payload), )*
        }

        impl Event {
            pub fn kind(&self) -> EventKind {
                match self {
                    $( Event::$variant(_) => EventKind::$variant, )*
                }
            }

            /// 按事件名解析负载
            pub fn decode(kind: EventKind, value: Value) -> Result<Self, serde_json::Error> {
                match kind {
                    $( EventKind::$variant => Ok(Event::$variant(serde_json::from_value(value)?)), )*
                }
            }
        }
    };
}

rainwave_events! {
    Album = "album" => Album,
    AllAlbumsByCursor = "all_albums_by_cursor" => Value,
    AllArtists = "all_artists" => Value,
    AllFaves = "all_faves" => Value,
    AllGroups = "all_groups" => Value,
    AllSongs = "all_songs" => Value,
    AllStationsInfo = "all_stations_info" => Value,
    AlreadyVoted = "already_voted" => Value,
    Artist = "artist" => Value,
    BuildVersion = "build_version" => Value,
    CookieDomain = "cookie_domain" => Value,
    DeleteRequestResult = "delete_request_result" => BooleanResult,
    ErrorReportResult = "error_report_result" => Value,
    Error = "error" => ErrorPayload,
    FaveAlbumResult = "fave_album_result" => FaveResult,
    FaveAllSongsResult = "fave_all_songs_result" => Value,
    FaveSongResult = "fave_song_result" => FaveResult,
    Group = "group" => Value,
    Listener = "listener" => Value,
    LiveVoting = "live_voting" => BTreeMap<u64, Vec<LiveVotingEntry>>,
    Locale = "locale" => Value,
    Locales = "locales" => Value,
    Mobile = "mobile" => Value,
    OnDraw = "on_draw" => Value,
    OnInit = "on_init" => Value,
    OnMeasure = "on_measure" => Value,
    PauseRequestQueueResult = "pause_request_queue_result" => BooleanResult,
    Ping = "ping" => Value,
    PlaybackHistory = "playback_history" => Value,
    Pong = "pong" => Value,
    PongConfirm = "pong_confirm" => Value,
    RateResult = "rate_result" => RateResult,
    RedownloadM3u = "redownload_m3u" => Value,
    Relays = "relays" => Value,
    RequestFavoritedSongsResult = "request_favorited_songs_result" => BooleanResult,
    RequestLineResult = "request_line_result" => Value,
    RequestLine = "request_line" => Value,
    RequestResult = "request_result" => BooleanResult,
    RequestUnratedSongsResult = "request_unrated_songs_result" => BooleanResult,
    Requests = "requests" => Vec<RequestedSong>,
    SchedCurrent = "sched_current" => ScheduleEvent,
    SchedHistory = "sched_history" => Vec<ScheduleEvent>,
    SchedNext = "sched_next" => Vec<ScheduleEvent>,
    SearchResults = "search_results" => Value,
    Song = "song" => Value,
    StationList = "station_list" => Value,
    StationSongCount = "station_song_count" => Vec<StationSongCount>,
    Stations = "stations" => Vec<StationDescription>,
    StreamFilename = "stream_filename" => Value,
    SyncResult = "sync_result" => ErrorPayload,
    Top100 = "top_100" => Value,
    UnpauseRequestQueueResult = "unpause_request_queue_result" => BooleanResult,
    UnratedSongs = "unrated_songs" => Value,
    UserInfoResult = "user_info_result" => Value,
    UserRecentVotes = "user_recent_votes" => Value,
    UserRequestedHistory = "user_requested_history" => Value,
    User = "user" => User,
    VoteResult = "vote_result" => BooleanResult,
    WebsocketHost = "websocket_host" => Value,
    Wsok = "wsok" => Value,
    Wserror = "wserror" => ErrorPayload,
    SdkErrorClear = "sdk_error_clear" => ErrorClear,
    SdkScheduleSynced = "sdk_schedule_synced" => bool,
    SdkException = "sdk_exception" => SdkException,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::from_key(s).ok_or_else(|| format!("unknown event: {}", s))
    }
}

impl EventKind {
    /// SDK 自己产生、永远不会出现在服务端帧里的事件
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            EventKind::SdkErrorClear | EventKind::SdkScheduleSynced | EventKind::SdkException
        )
    }
}
