//! 每个服务端操作对应的类型化方法
//!
//! 方法发送操作并从响应体中取出该操作的结果 key。

use crate::client::RainwaveClient;
use crate::error::RequestError;
use crate::models::{
    Album, BooleanResult, FaveResult, RateResult, RequestedSong, StationDescription,
    StationSongCount,
};
use crate::request::Action;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// 请求参数，`None` 的字段不会出现在帧里
#[derive(Debug, Default)]
struct Params(Map<String, Value>);

impl Params {
    fn new() -> Self {
        Self::default()
    }

    fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    fn set_opt<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }
}

/// 从响应体取出 `action` 的结果 key 并解析
fn extract<T: DeserializeOwned>(action: Action, mut body: Value) -> Result<T, RequestError> {
    let key = action
        .response_key()
        .ok_or_else(|| RequestError::Decode(format!("{} has no response payload", action)))?;
    let payload = body
        .get_mut(key.as_str())
        .map(Value::take)
        .ok_or_else(|| RequestError::Decode(format!("response is missing \"{}\"", key)))?;
    Ok(serde_json::from_value(payload)?)
}

impl RainwaveClient {
    async fn call<T: DeserializeOwned>(&self, action: Action, params: Params) -> Result<T, RequestError> {
        let body = self.request(action, params.0).await?;
        extract(action, body)
    }

    // ==================== 资料库 ====================

    pub async fn album(&self, id: u64, sort: Option<&str>) -> Result<Album, RequestError> {
        self.call(Action::Album, Params::new().set("id", id).set_opt("sort", sort))
            .await
    }

    /// 分页获取全部专辑，`after` 为上一页最后一个专辑名
    pub async fn all_albums(&self, after: Option<&str>) -> Result<Value, RequestError> {
        self.call(Action::AllAlbumsByCursor, Params::new().set_opt("after", after))
            .await
    }

    pub async fn all_artists(&self) -> Result<Value, RequestError> {
        self.call(Action::AllArtists, Params::new()).await
    }

    pub async fn all_faves(&self) -> Result<Value, RequestError> {
        self.call(Action::AllFaves, Params::new()).await
    }

    pub async fn all_groups(&self) -> Result<Value, RequestError> {
        self.call(Action::AllGroups, Params::new()).await
    }

    pub async fn all_songs(&self, order: Option<&str>) -> Result<Value, RequestError> {
        self.call(Action::AllSongs, Params::new().set_opt("order", order))
            .await
    }

    pub async fn artist(&self, id: u64) -> Result<Value, RequestError> {
        self.call(Action::Artist, Params::new().set("id", id)).await
    }

    pub async fn group(&self, id: u64) -> Result<Value, RequestError> {
        self.call(Action::Group, Params::new().set("id", id)).await
    }

    pub async fn song(&self, id: u64) -> Result<Value, RequestError> {
        self.call(Action::Song, Params::new().set("id", id)).await
    }

    pub async fn search(&self, search: &str) -> Result<Value, RequestError> {
        self.call(Action::Search, Params::new().set("search", search))
            .await
    }

    pub async fn top_100(&self) -> Result<Value, RequestError> {
        self.call(Action::Top100, Params::new()).await
    }

    pub async fn unrated_songs(&self) -> Result<Value, RequestError> {
        self.call(Action::UnratedSongs, Params::new()).await
    }

    pub async fn playback_history(&self) -> Result<Value, RequestError> {
        self.call(Action::PlaybackHistory, Params::new()).await
    }

    // ==================== 电台 ====================

    pub async fn info_all(&self) -> Result<Value, RequestError> {
        self.call(Action::InfoAll, Params::new()).await
    }

    pub async fn stations(&self) -> Result<Vec<StationDescription>, RequestError> {
        self.call(Action::Stations, Params::new()).await
    }

    pub async fn station_song_count(&self) -> Result<Vec<StationSongCount>, RequestError> {
        self.call(Action::StationSongCount, Params::new()).await
    }

    pub async fn listener(&self, id: u64) -> Result<Value, RequestError> {
        self.call(Action::Listener, Params::new().set("id", id)).await
    }

    // ==================== 评分与收藏 ====================

    pub async fn rate(&self, song_id: u64, rating: f64) -> Result<RateResult, RequestError> {
        self.call(
            Action::Rate,
            Params::new().set("song_id", song_id).set("rating", rating),
        )
        .await
    }

    pub async fn clear_rating(&self, song_id: u64) -> Result<RateResult, RequestError> {
        self.call(Action::ClearRating, Params::new().set("song_id", song_id))
            .await
    }

    pub async fn fave_song(&self, song_id: u64, fave: bool) -> Result<FaveResult, RequestError> {
        self.call(
            Action::FaveSong,
            Params::new().set("song_id", song_id).set("fave", fave),
        )
        .await
    }

    pub async fn fave_album(&self, album_id: u64, fave: bool) -> Result<FaveResult, RequestError> {
        self.call(
            Action::FaveAlbum,
            Params::new().set("album_id", album_id).set("fave", fave),
        )
        .await
    }

    pub async fn fave_all_songs(&self, album_id: u64, fave: bool) -> Result<Value, RequestError> {
        self.call(
            Action::FaveAllSongs,
            Params::new().set("album_id", album_id).set("fave", fave),
        )
        .await
    }

    // ==================== 投票 ====================

    pub async fn vote(&self, entry_id: u64) -> Result<BooleanResult, RequestError> {
        self.call(Action::Vote, Params::new().set("entry_id", entry_id))
            .await
    }

    // ==================== 点歌 ====================

    pub async fn request_song(&self, song_id: u64) -> Result<Vec<RequestedSong>, RequestError> {
        self.call(Action::Request, Params::new().set("song_id", song_id))
            .await
    }

    pub async fn delete_request(&self, song_id: u64) -> Result<Vec<RequestedSong>, RequestError> {
        self.call(Action::DeleteRequest, Params::new().set("song_id", song_id))
            .await
    }

    /// 重新排序点歌队列
    pub async fn order_requests(&self, song_ids: &[u64]) -> Result<Vec<RequestedSong>, RequestError> {
        let order = song_ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.call(Action::OrderRequests, Params::new().set("order", order))
            .await
    }

    pub async fn clear_requests(&self) -> Result<Vec<RequestedSong>, RequestError> {
        self.call(Action::ClearRequests, Params::new()).await
    }

    pub async fn clear_requests_on_cooldown(&self) -> Result<Vec<RequestedSong>, RequestError> {
        self.call(Action::ClearRequestsOnCooldown, Params::new()).await
    }

    pub async fn request_favorited_songs(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<RequestedSong>, RequestError> {
        self.call(
            Action::RequestFavoritedSongs,
            Params::new().set_opt("limit", limit),
        )
        .await
    }

    pub async fn request_unrated_songs(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<RequestedSong>, RequestError> {
        self.call(
            Action::RequestUnratedSongs,
            Params::new().set_opt("limit", limit),
        )
        .await
    }

    pub async fn pause_request_queue(&self) -> Result<BooleanResult, RequestError> {
        self.call(Action::PauseRequestQueue, Params::new()).await
    }

    pub async fn unpause_request_queue(&self) -> Result<BooleanResult, RequestError> {
        self.call(Action::UnpauseRequestQueue, Params::new()).await
    }

    pub async fn request_line(&self) -> Result<Value, RequestError> {
        self.call(Action::RequestLine, Params::new()).await
    }

    // ==================== 用户 ====================

    pub async fn user_info(&self) -> Result<Value, RequestError> {
        self.call(Action::UserInfo, Params::new()).await
    }

    pub async fn user_recent_votes(&self) -> Result<Value, RequestError> {
        self.call(Action::UserRecentVotes, Params::new()).await
    }

    pub async fn user_requested_history(&self) -> Result<Value, RequestError> {
        self.call(Action::UserRequestedHistory, Params::new()).await
    }
}
