//! 请求定义
//!
//! [`Action`] 是服务端支持的操作（封闭集合），[`PendingRequest`] 是一次尚未完成的调用。

use crate::error::RequestError;
use crate::events::{EventKind, Station};
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

macro_rules! rainwave_actions {
    ($( $variant:ident = $name:literal => $response:expr, )*) => {
        /// 服务端操作
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Action {
            $( $variant, )*
        }

        impl Action {
            pub const ALL: &'static [Action] = &[ $( Action::$variant, )* ];

            /// 帧里的 `action` 字段
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Action::$variant => $name, )*
                }
            }

            /// 成功响应里携带结果的 key
            pub fn response_key(&self) -> Option<EventKind> {
                match self {
                    $( Action::$variant => $response, )*
                }
            }
        }
    };
}

rainwave_actions! {
    Album = "album" => Some(EventKind::Album),
    AllAlbumsByCursor = "all_albums_by_cursor" => Some(EventKind::AllAlbumsByCursor),
    AllArtists = "all_artists" => Some(EventKind::AllArtists),
    AllFaves = "all_faves" => Some(EventKind::AllFaves),
    AllGroups = "all_groups" => Some(EventKind::AllGroups),
    AllSongs = "all_songs" => Some(EventKind::AllSongs),
    Artist = "artist" => Some(EventKind::Artist),
    ClearRating = "clear_rating" => Some(EventKind::RateResult),
    ClearRequests = "clear_requests" => Some(EventKind::Requests),
    ClearRequestsOnCooldown = "clear_requests_on_cooldown" => Some(EventKind::Requests),
    DeleteRequest = "delete_request" => Some(EventKind::Requests),
    FaveAlbum = "fave_album" => Some(EventKind::FaveAlbumResult),
    FaveAllSongs = "fave_all_songs" => Some(EventKind::FaveAllSongsResult),
    FaveSong = "fave_song" => Some(EventKind::FaveSongResult),
    Group = "group" => Some(EventKind::Group),
    InfoAll = "info_all" => Some(EventKind::AllStationsInfo),
    Listener = "listener" => Some(EventKind::Listener),
    OrderRequests = "order_requests" => Some(EventKind::Requests),
    PauseRequestQueue = "pause_request_queue" => Some(EventKind::PauseRequestQueueResult),
    PlaybackHistory = "playback_history" => Some(EventKind::PlaybackHistory),
    Rate = "rate" => Some(EventKind::RateResult),
    Request = "request" => Some(EventKind::Requests),
    RequestFavoritedSongs = "request_favorited_songs" => Some(EventKind::Requests),
    RequestLine = "request_line" => Some(EventKind::RequestLineResult),
    RequestUnratedSongs = "request_unrated_songs" => Some(EventKind::Requests),
    Search = "search" => Some(EventKind::SearchResults),
    Song = "song" => Some(EventKind::Song),
    StationSongCount = "station_song_count" => Some(EventKind::StationSongCount),
    Stations = "stations" => Some(EventKind::Stations),
    Top100 = "top_100" => Some(EventKind::Top100),
    UnpauseRequestQueue = "unpause_request_queue" => Some(EventKind::UnpauseRequestQueueResult),
    UnratedSongs = "unrated_songs" => Some(EventKind::UnratedSongs),
    UserInfo = "user_info" => Some(EventKind::UserInfoResult),
    UserRecentVotes = "user_recent_votes" => Some(EventKind::UserRecentVotes),
    UserRequestedHistory = "user_requested_history" => Some(EventKind::UserRequestedHistory),
    Vote = "vote" => Some(EventKind::VoteResult),
    CheckSchedCurrentId = "check_sched_current_id" => None,
    Ping = "ping" => None,
    Pong = "pong" => None,
}

impl Action {
    /// 无状态操作：不分配关联 ID，重复调用会取代队列中尚未发送的旧请求
    pub fn is_stateless(&self) -> bool {
        matches!(self, Action::Ping | Action::Pong)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 请求结果回传
pub type Responder = oneshot::Sender<Result<Value, RequestError>>;

/// 一次进行中的调用
#[derive(Debug)]
pub struct PendingRequest {
    action: Action,
    params: Map<String, Value>,
    message_id: Option<u64>,
    sent_at: Option<Instant>,
    responder: Option<Responder>,
}

impl PendingRequest {
    pub fn new(action: Action, params: Map<String, Value>, responder: Option<Responder>) -> Self {
        Self {
            action,
            params,
            message_id: None,
            sent_at: None,
            responder,
        }
    }

    /// 创建请求并返回接收结果的一端
    pub fn with_receiver(
        action: Action,
        params: Map<String, Value>,
    ) -> (Self, oneshot::Receiver<Result<Value, RequestError>>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(action, params, Some(tx)), rx)
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// 只在发送之后才有值
    pub fn message_id(&self) -> Option<u64> {
        self.message_id
    }

    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }

    pub(crate) fn mark_sent(&mut self, message_id: Option<u64>, now: Instant) {
        self.message_id = message_id;
        self.sent_at = Some(now);
    }

    /// 重新排队前清除发送状态
    pub(crate) fn reset(&mut self) {
        self.message_id = None;
        self.sent_at = None;
    }

    /// 构造线上帧：参数 + action + message_id，缺省时补上电台
    pub fn frame(&self, sid: Station) -> Result<String, serde_json::Error> {
        let mut message = self.params.clone();
        message.insert("action".into(), Value::from(self.action.as_str()));
        if let Some(id) = self.message_id {
            message.insert("message_id".into(), Value::from(id));
        }
        message.entry("sid").or_insert_with(|| Value::from(sid.id()));
        serde_json::to_string(&message)
    }

    pub fn resolve(mut self, body: Value) {
        if let Some(tx) = self.responder.take() {
            if tx.send(Ok(body)).is_err() {
                debug!("[Request] {} resolved after caller went away", self.action);
            }
        }
    }

    pub fn reject(mut self, error: RequestError) {
        if let Some(tx) = self.responder.take() {
            if tx.send(Err(error)).is_err() {
                debug!("[Request] {} rejected after caller went away", self.action);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_frame_merges_params() {
        let mut request = PendingRequest::new(Action::Album, params(json!({"id": 5})), None);
        request.mark_sent(Some(1), Instant::now());

        let frame: Value = serde_json::from_str(&request.frame(Station::Game).unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({"action": "album", "id": 5, "message_id": 1, "sid": 1})
        );
        // 构造帧不改动调用方的参数，重发时仍是原样
        assert_eq!(request.params(), &params(json!({"id": 5})));
    }

    #[test]
    fn test_frame_keeps_explicit_sid_and_omits_missing_id() {
        let request = PendingRequest::new(Action::Ping, params(json!({"sid": 3})), None);
        let frame: Value = serde_json::from_str(&request.frame(Station::Game).unwrap()).unwrap();
        assert_eq!(frame, json!({"action": "ping", "sid": 3}));
    }

    #[test]
    fn test_stateless_set() {
        let stateless: Vec<_> = Action::ALL.iter().filter(|a| a.is_stateless()).collect();
        assert_eq!(stateless, vec![&Action::Ping, &Action::Pong]);
        assert_eq!(Action::Ping.response_key(), None);
        assert_eq!(Action::ClearRating.response_key(), Some(EventKind::RateResult));
    }

    #[tokio::test]
    async fn test_resolve_and_reject() {
        let (request, rx) = PendingRequest::with_receiver(Action::Song, Map::new());
        request.resolve(json!({"song": {}}));
        assert_eq!(rx.await.unwrap(), Ok(json!({"song": {}})));

        let (request, rx) = PendingRequest::with_receiver(Action::Song, Map::new());
        request.reject(RequestError::Evicted);
        assert_eq!(rx.await.unwrap(), Err(RequestError::Evicted));

        let (request, rx) = PendingRequest::with_receiver(Action::Song, Map::new());
        drop(request);
        assert!(rx.await.is_err());
    }
}
