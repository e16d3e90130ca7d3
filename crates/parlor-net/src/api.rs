//! REST access to the back-office chat and video endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use parlor_shared::protocol::{BlockResponse, ChatCounterpart, HistoryPage, HistoryRequest, JobStatus};
use parlor_shared::types::CounterpartId;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::{NetError, Result};
use crate::token::TokenProvider;

/// Chat endpoints used by the session.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_roster(&self) -> Result<Vec<ChatCounterpart>>;

    async fn fetch_history(&self, request: &HistoryRequest) -> Result<HistoryPage>;

    /// Flip the blocked state of a counterpart. Returns the backend's
    /// confirmation text.
    async fn toggle_block(&self, counterpart: &CounterpartId) -> Result<BlockResponse>;
}

/// Status of long-running video processing jobs.
#[async_trait]
pub trait JobStatusApi: Send + Sync {
    async fn job_status(&self, job_id: &str) -> Result<JobStatus>;
}

/// [`ChatApi`] and [`JobStatusApi`] over HTTP with bearer auth.
#[derive(Clone)]
pub struct HttpChatApi {
    http: Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpChatApi {
    pub fn new(http: Client, base_url: Url, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            base_url,
            tokens,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| NetError::UnsupportedScheme(self.base_url.scheme().to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Attach the current token; it is read on every call.
    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.tokens.access_token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T> {
    if res.status().is_success() {
        Ok(res.json().await?)
    } else {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(NetError::UnexpectedStatus { status, body })
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_roster(&self) -> Result<Vec<ChatCounterpart>> {
        let url = self.endpoint(&["chat", "users"])?;
        debug!(%url, "Fetching chat roster");
        let res = self.authorized(self.http.get(url)).send().await?;
        decode(res).await
    }

    async fn fetch_history(&self, request: &HistoryRequest) -> Result<HistoryPage> {
        let mut url = self.endpoint(&["chat", "messages", &request.username])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("page", &request.page.to_string());
            if let Some(before) = request.before_id {
                query.append_pair("lastMessageId", &before.to_string());
            }
        }
        debug!(%url, page = request.page, "Fetching chat history");
        let res = self.authorized(self.http.get(url)).send().await?;
        decode(res).await
    }

    async fn toggle_block(&self, counterpart: &CounterpartId) -> Result<BlockResponse> {
        let url = self.endpoint(&["chat", "users", counterpart.as_str(), "block"])?;
        debug!(%url, "Toggling block");
        let res = self.authorized(self.http.post(url)).send().await?;
        decode(res).await
    }
}

#[async_trait]
impl JobStatusApi for HttpChatApi {
    async fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        let url = self.endpoint(&["videos", job_id, "status"])?;
        let res = self.authorized(self.http.get(url)).send().await?;
        decode(res).await
    }
}
