//! REST client for the duel HTTP API.
//!
//! The duel endpoints are an external collaborator: the core calls them for
//! snapshots, submissions, and reference data, and adapts the replies; it
//! does not own their semantics. The [`DuelApi`] trait exists so tests can
//! substitute a scripted mock.

use crate::config::ClientConfig;
use crate::error::{DuelClientError, Result};
use async_trait::async_trait;
use duel_proto::{Duel, DuelTestResponse, SubmissionResponse, SupportedLanguage};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct SolutionBody<'a> {
    code: &'a str,
    language_id: &'a str,
}

#[derive(Serialize)]
struct JoinRoomBody<'a> {
    room_code: &'a str,
}

/// Capability surface of the duel HTTP API.
#[async_trait]
pub trait DuelApi: Send + Sync {
    /// Point-in-time duel snapshot.
    async fn get_duel(&self, duel_id: &str) -> Result<Duel>;

    /// The user's currently active duel, if matchmaking has assigned one.
    async fn active_duel(&self, user_id: &str) -> Result<Option<Duel>>;

    /// Creates a fresh PvE duel against the AI opponent.
    async fn create_ai_duel(&self) -> Result<Duel>;

    /// Submits a solution. The HTTP reply is advisory; the result of
    /// record arrives over the realtime channel.
    async fn submit_solution(
        &self,
        duel_id: &str,
        code: &str,
        language_id: &str,
    ) -> Result<SubmissionResponse>;

    /// Runs the public tests against the duel's problem.
    async fn run_tests(
        &self,
        duel_id: &str,
        code: &str,
        language_id: &str,
    ) -> Result<DuelTestResponse>;

    /// Immutable language reference data, fetched once per session.
    async fn supported_languages(&self) -> Result<Vec<SupportedLanguage>>;

    /// Creates a private room; the reply carries its `room_code`.
    async fn create_room(&self) -> Result<Duel>;

    /// Joins a private room by its shareable code.
    async fn join_room(&self, room_code: &str) -> Result<Duel>;
}

/// Production implementation over reqwest.
pub struct HttpDuelApi {
    client: Client,
    base: String,
    token: String,
}

impl HttpDuelApi {
    pub fn new(config: &ClientConfig, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base: config.api_base.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(DuelClientError::Api { status, body })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(path, "duel API GET");
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_json<B: Serialize + Sync, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        debug!(path, "duel API POST");
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl DuelApi for HttpDuelApi {
    async fn get_duel(&self, duel_id: &str) -> Result<Duel> {
        self.get_json(&format!("/duels/{duel_id}")).await
    }

    async fn active_duel(&self, user_id: &str) -> Result<Option<Duel>> {
        match self
            .get_json::<Duel>(&format!("/duels/active/{user_id}"))
            .await
        {
            Ok(duel) => Ok(Some(duel)),
            Err(DuelClientError::Api { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create_ai_duel(&self) -> Result<Duel> {
        self.post_json("/duels/ai", &serde_json::json!({})).await
    }

    async fn submit_solution(
        &self,
        duel_id: &str,
        code: &str,
        language_id: &str,
    ) -> Result<SubmissionResponse> {
        self.post_json(
            &format!("/duels/{duel_id}/submit"),
            &SolutionBody { code, language_id },
        )
        .await
    }

    async fn run_tests(
        &self,
        duel_id: &str,
        code: &str,
        language_id: &str,
    ) -> Result<DuelTestResponse> {
        self.post_json(
            &format!("/duels/{duel_id}/test"),
            &SolutionBody { code, language_id },
        )
        .await
    }

    async fn supported_languages(&self) -> Result<Vec<SupportedLanguage>> {
        self.get_json("/languages").await
    }

    async fn create_room(&self) -> Result<Duel> {
        self.post_json("/duels/rooms", &serde_json::json!({})).await
    }

    async fn join_room(&self, room_code: &str) -> Result<Duel> {
        self.post_json("/duels/rooms/join", &JoinRoomBody { room_code })
            .await
    }
}
