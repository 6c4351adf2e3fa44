// Remote HTTP catalog backend (TheGamesDB-style JSON API).
//
// Read-only. The resolver wraps every call in its own deadline; the client
// carries a matching request timeout so a hung connection surfaces as
// `LookupError::Timeout` either way.

use crate::hashing::DigestSet;
use crate::lookup::backend::{LookupError, MatchKind, MetadataBackend, MetadataCandidate};
use crate::systems::{self, ExternalCatalog, SystemId};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub struct GamesDbBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    priority: u32,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    data: ApiData,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    #[serde(default)]
    games: Vec<ApiGame>,
}

#[derive(Debug, Deserialize)]
struct ApiGame {
    id: i64,
    game_title: String,
    platform: i64,
    #[serde(default)]
    region: Option<String>,
}

impl GamesDbBackend {
    pub const ID: &'static str = "gamesdb";

    pub fn new(
        base_url: String,
        api_key: Option<String>,
        request_timeout: Duration,
        priority: u32,
    ) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LookupError::Unavailable(e.to_string()))?;

        Ok(GamesDbBackend {
            client,
            base_url,
            api_key,
            priority,
        })
    }

    async fn fetch(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<ApiGame>, LookupError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self.client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.query(&[("apikey", key.as_str())]);
        }

        debug!("GamesDb request: {} {:?}", url, query);
        let response = request.send().await.map_err(map_reqwest_error)?;
        let response = response.error_for_status().map_err(map_reqwest_error)?;
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| LookupError::Malformed(e.to_string()))?;

        Ok(body.data.games)
    }

    fn candidate(&self, game: ApiGame, kind: MatchKind) -> MetadataCandidate {
        MetadataCandidate {
            backend_id: Self::ID.to_string(),
            match_kind: kind,
            external_record_id: game.id.to_string(),
            proposed_title: game.game_title,
            proposed_system: systems::canonical_from_external(
                ExternalCatalog::GamesDb,
                game.platform,
            ),
            region: game.region,
            rank: 0,
        }
    }
}

fn map_reqwest_error(error: reqwest::Error) -> LookupError {
    if error.is_timeout() {
        LookupError::Timeout
    } else {
        LookupError::Unavailable(error.to_string())
    }
}

#[async_trait::async_trait]
impl MetadataBackend for GamesDbBackend {
    fn id(&self) -> &str {
        Self::ID
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn query_by_digest(
        &self,
        digests: &DigestSet,
    ) -> Result<Vec<MetadataCandidate>, LookupError> {
        let games = self
            .fetch("Games/ByGameHash", &[("hash", digests.md5.clone())])
            .await?;
        Ok(games
            .into_iter()
            .map(|g| self.candidate(g, MatchKind::ExactDigest))
            .collect())
    }

    async fn query_by_filename(
        &self,
        normalized_name: &str,
        system: SystemId,
    ) -> Result<Vec<MetadataCandidate>, LookupError> {
        let Some(platform) = systems::external_id_for(system, ExternalCatalog::GamesDb) else {
            return Ok(Vec::new());
        };

        let games = self
            .fetch(
                "Games/ByGameName",
                &[
                    ("name", normalized_name.to_string()),
                    ("filter[platform]", platform.to_string()),
                ],
            )
            .await?;
        Ok(games
            .into_iter()
            .map(|g| self.candidate(g, MatchKind::FuzzyFilename))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_deserializes() {
        let body = r#"{
            "data": {
                "games": [
                    {"id": 1018, "game_title": "Chrono Trigger", "platform": 6, "region": "USA"},
                    {"id": 2200, "game_title": "Unknown Platform Game", "platform": 123456}
                ]
            }
        }"#;

        let parsed: ApiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.games.len(), 2);
        assert_eq!(parsed.data.games[0].game_title, "Chrono Trigger");

        let backend = GamesDbBackend::new(
            "https://example.test/v1".to_string(),
            None,
            Duration::from_secs(5),
            1,
        )
        .unwrap();

        let mut games = parsed.data.games;
        let unknown = backend.candidate(games.pop().unwrap(), MatchKind::ExactDigest);
        let known = backend.candidate(games.pop().unwrap(), MatchKind::ExactDigest);

        assert_eq!(known.proposed_system, Some(SystemId::Snes));
        assert_eq!(known.region.as_deref(), Some("USA"));
        // Unrecognized platform ids never guess a system
        assert_eq!(unknown.proposed_system, None);
    }

    #[test]
    fn empty_games_list_deserializes() {
        let parsed: ApiResponse = serde_json::from_str(r#"{"data": {}}"#).unwrap();
        assert!(parsed.data.games.is_empty());
    }
}
