use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::AUTHORIZATION;
use serenity::model::id::GuildId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::model::{LoadResult, NodeInfo, UpdatePlayer};
use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum LavalinkError {
    #[error("Lavalink request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Lavalink answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Lavalink session not established yet")]
    NoSession,

    #[error("Lavalink did not become ready after {0} attempts")]
    NotReady(u32),
}

/// Shared slot holding the session id announced by the websocket `ready` op.
pub type SessionSlot = Arc<RwLock<Option<String>>>;

/// Operations the player manager needs from a Lavalink node.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LavalinkApi: Send + Sync {
    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, LavalinkError>;

    async fn update_player(
        &self,
        guild_id: GuildId,
        update: &UpdatePlayer,
        no_replace: bool,
    ) -> Result<(), LavalinkError>;

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), LavalinkError>;
}

/// REST half of the Lavalink v4 protocol.
pub struct LavalinkRest {
    http: reqwest::Client,
    base_url: String,
    password: String,
    session: SessionSlot,
}

impl LavalinkRest {
    pub fn new(config: &Config) -> Result<Self, LavalinkError> {
        Self::with_base_url(config.lavalink_rest_url(), config.lavalink_password.clone())
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, LavalinkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("molten-music/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            password: password.into(),
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// Slot the websocket task writes the session id into.
    pub fn session(&self) -> SessionSlot {
        Arc::clone(&self.session)
    }

    fn session_id(&self) -> Result<String, LavalinkError> {
        self.session.read().clone().ok_or(LavalinkError::NoSession)
    }

    fn player_url(&self, guild_id: GuildId) -> Result<String, LavalinkError> {
        Ok(format!(
            "{}/v4/sessions/{}/players/{}",
            self.base_url,
            self.session_id()?,
            guild_id
        ))
    }

    pub async fn info(&self) -> Result<NodeInfo, LavalinkError> {
        let response = self
            .http
            .get(format!("{}/v4/info", self.base_url))
            .header(AUTHORIZATION, &self.password)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    /// Polls `/v4/info` until the node answers.
    ///
    /// `attempts = None` waits forever, which is what the container entry
    /// point wants when Lavalink starts alongside the bot.
    pub async fn wait_until_ready(
        &self,
        interval: Duration,
        attempts: Option<u32>,
    ) -> Result<NodeInfo, LavalinkError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.info().await {
                Ok(info) => {
                    info!("✅ Lavalink {} listo en {}", info.version.semver, self.base_url);
                    return Ok(info);
                }
                Err(e) => {
                    warn!("⏳ Esperando a Lavalink ({}): {}", attempt, e);
                }
            }

            if attempts.is_some_and(|max| attempt >= max) {
                return Err(LavalinkError::NotReady(attempt));
            }

            tokio::time::sleep(interval).await;
        }
    }
}

#[async_trait]
impl LavalinkApi for LavalinkRest {
    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, LavalinkError> {
        debug!("🔍 loadtracks: {}", identifier);

        let response = self
            .http
            .get(format!("{}/v4/loadtracks", self.base_url))
            .query(&[("identifier", identifier)])
            .header(AUTHORIZATION, &self.password)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn update_player(
        &self,
        guild_id: GuildId,
        update: &UpdatePlayer,
        no_replace: bool,
    ) -> Result<(), LavalinkError> {
        let response = self
            .http
            .patch(self.player_url(guild_id)?)
            .query(&[("noReplace", no_replace)])
            .header(AUTHORIZATION, &self.password)
            .json(update)
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), LavalinkError> {
        let response = self
            .http
            .delete(self.player_url(guild_id)?)
            .header(AUTHORIZATION, &self.password)
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, LavalinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(LavalinkError::Status {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::model::{fixtures::track_json, Filters};
    use httpmock::prelude::*;
    use httpmock::Method::PATCH;
    use serde_json::json;

    fn client(server: &MockServer) -> LavalinkRest {
        LavalinkRest::with_base_url(server.base_url(), "secret").unwrap()
    }

    #[tokio::test]
    async fn test_load_tracks_sends_identifier_and_password() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v4/loadtracks")
                    .query_param("identifier", "ytsearch:never gonna")
                    .header("Authorization", "secret");
                then.status(200)
                    .json_body(json!({ "loadType": "search", "data": [track_json("Never")] }));
            })
            .await;

        let result = client(&server).load_tracks("ytsearch:never gonna").await.unwrap();
        mock.assert_async().await;

        match result {
            LoadResult::Search(tracks) => assert_eq!(tracks[0].title(), "Never"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_player_requires_session() {
        let server = MockServer::start_async().await;
        let rest = client(&server);

        let err = rest
            .update_player(GuildId::new(1), &UpdatePlayer::paused(true), false)
            .await
            .unwrap_err();
        assert!(matches!(err, LavalinkError::NoSession));
    }

    #[tokio::test]
    async fn test_update_player_patches_session_player() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/v4/sessions/abc/players/123")
                    .query_param("noReplace", "false")
                    .json_body(json!({ "filters": { "timescale": { "speed": 1.1, "pitch": 1.2, "rate": 1.0 } } }));
                then.status(200).json_body(json!({}));
            })
            .await;

        let rest = client(&server);
        *rest.session().write() = Some("abc".into());
        rest.update_player(GuildId::new(123), &UpdatePlayer::filters(Filters::nightcore()), false)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/v4/sessions/abc/players/9");
                then.status(404).body("player not found");
            })
            .await;

        let rest = client(&server);
        *rest.session().write() = Some("abc".into());
        let err = rest.destroy_player(GuildId::new(9)).await.unwrap_err();
        assert!(matches!(err, LavalinkError::Status { status: 404, ref message } if message == "player not found"));
    }

    #[tokio::test]
    async fn test_wait_until_ready_gives_up() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v4/info");
                then.status(503);
            })
            .await;

        let err = client(&server)
            .wait_until_ready(Duration::from_millis(1), Some(2))
            .await
            .unwrap_err();
        assert!(matches!(err, LavalinkError::NotReady(2)));
    }

    #[tokio::test]
    async fn test_info() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v4/info").header("Authorization", "secret");
                then.status(200).json_body(json!({
                    "version": { "semver": "4.0.8", "major": 4, "minor": 0, "patch": 8 },
                    "sourceManagers": ["youtube", "soundcloud"],
                    "plugins": []
                }));
            })
            .await;

        let info = client(&server).info().await.unwrap();
        assert_eq!(info.version.semver, "4.0.8");
        assert_eq!(info.source_managers.len(), 2);
    }
}
