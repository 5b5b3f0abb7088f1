//! gPodder API v2 wire types (§4.8, §6).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase", tag = "action")]
pub enum EpisodeActionType {
    Download,
    Delete,
    Play {
        position: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        started: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u32>,
    },
    New,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeAction {
    pub podcast: String,
    pub episode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(flatten)]
    pub action: EpisodeActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
}

impl EpisodeAction {
    pub fn new_download(podcast: String, episode: String, device: String) -> Self {
        Self {
            podcast,
            episode,
            device: Some(device),
            action: EpisodeActionType::Download,
            timestamp: None,
            guid: None,
        }
    }

    pub fn new_play(
        podcast: String,
        episode: String,
        device: String,
        position: u32,
        total: Option<u32>,
    ) -> Self {
        Self {
            podcast,
            episode,
            device: Some(device),
            action: EpisodeActionType::Play {
                position,
                started: None,
                total,
            },
            timestamp: None,
            guid: None,
        }
    }

    pub fn new_play_stop(podcast: String, episode: String, device: String, position: u32) -> Self {
        Self::new_play(podcast, episode, device, position, None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UploadEpisodeActionsResponse {
    pub timestamp: u64,
    #[serde(default)]
    pub update_urls: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GetEpisodeActionsResponse {
    #[serde(default)]
    pub actions: Vec<EpisodeAction>,
    pub timestamp: u64,
}

/// `/api/2/subscriptions/{user}/{device}.json` GET response shape (delta
/// since a stored timestamp, §4.8 Pull).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SubscriptionChanges {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
    pub timestamp: u64,
}

/// `/api/2/subscriptions/{user}/{device}.json` POST body (§4.8 Push).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SubscriptionUpdate {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SubscriptionUpdateResponse {
    pub timestamp: u64,
    #[serde(default)]
    pub update_urls: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_action_serializes_with_tag_and_flattened_fields() {
        let action = EpisodeAction::new_play(
            "https://a/feed".into(),
            "https://a/ep1.mp3".into(),
            "podliner-host".into(),
            42,
            Some(600),
        );
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "play");
        assert_eq!(json["position"], 42);
        assert_eq!(json["total"], 600);
        assert!(json.get("started").is_none());
    }

    #[test]
    fn download_action_round_trips() {
        let action =
            EpisodeAction::new_download("https://a/feed".into(), "https://a/ep1.mp3".into(), "d".into());
        let json = serde_json::to_string(&action).unwrap();
        let back: EpisodeAction = serde_json::from_str(&json).unwrap();
        assert_eq!(action, back);
    }
}
