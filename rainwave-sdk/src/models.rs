//! 响应数据结构
//!
//! 只对 SDK 与常见调用方真正关心的字段建模，其余字段保留在 `extra` 中。

use crate::events::Station;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 专辑
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub rating_user: Option<f64>,
    #[serde(default)]
    pub art: Option<String>,
    #[serde(default)]
    pub fave: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 歌曲
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub albums: Vec<Album>,
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub rating_user: Option<f64>,
    #[serde(default)]
    pub fave: Option<bool>,
    #[serde(default)]
    pub entry_id: Option<u64>,
    #[serde(default)]
    pub entry_votes: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 排期中的一个事件（选举、OneUp 等）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub id: u64,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sid: Option<Station>,
    #[serde(default)]
    pub voting_allowed: bool,
    #[serde(default)]
    pub songs: Vec<Song>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 当前登录用户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub sid: Option<Station>,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub tuned_in: bool,
    #[serde(default)]
    pub perks: bool,
    #[serde(default)]
    pub request_position: Option<i64>,
    #[serde(default)]
    pub requests_paused: bool,
    #[serde(default)]
    pub voted_entry: Option<u64>,
    #[serde(default)]
    pub listener_id: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 点歌队列中的一首歌
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedSong {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub sid: Option<Station>,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub request_id: Option<u64>,
    #[serde(default)]
    pub cool: bool,
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub albums: Vec<Album>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 只有成功标志的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanResult {
    pub success: bool,
    #[serde(default)]
    pub tl_key: String,
    #[serde(default)]
    pub text: String,
}

/// 收藏结果（歌曲 / 专辑）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaveResult {
    pub success: bool,
    #[serde(default)]
    pub tl_key: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub fave: Option<bool>,
    #[serde(default)]
    pub sid: Option<Station>,
}

/// 专辑评分更新
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatedAlbumRating {
    pub id: u64,
    #[serde(default)]
    pub sid: Option<Station>,
    #[serde(default)]
    pub rating_user: Option<f64>,
    #[serde(default)]
    pub rating_complete: Option<bool>,
}

/// 评分结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateResult {
    pub success: bool,
    #[serde(default)]
    pub tl_key: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub song_id: Option<u64>,
    #[serde(default)]
    pub rating_user: Option<f64>,
    #[serde(default)]
    pub updated_album_ratings: Vec<UpdatedAlbumRating>,
}

/// 实时投票数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveVotingEntry {
    pub entry_id: u64,
    pub entry_votes: u64,
    pub song_id: u64,
}

/// 电台描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationDescription {
    pub id: Station,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub relays: Value,
}

/// 各电台歌曲数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSongCount {
    pub sid: Station,
    pub song_count: u64,
}
