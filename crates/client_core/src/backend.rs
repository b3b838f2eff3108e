//! REST surface the directory talks to.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Company, CompanyId, Tier},
    protocol::{
        add_tag_route, companies_route, downvote_route, remove_tag_route, update_rank_route,
        update_tier_route, upvote_route, RankForm, RankResponse, TagForm, TagMutationResponse,
        TierForm, TierResponse, PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER,
    },
};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend rejected tag mutation for company {0}")]
    TagRejected(CompanyId),
    #[error("invalid server url '{0}'")]
    InvalidServerUrl(String),
}

#[async_trait]
pub trait CompanyBackend: Send + Sync {
    async fn list_companies(&self) -> Result<Vec<Company>>;
    async fn upvote(&self, id: CompanyId) -> Result<RankResponse>;
    async fn downvote(&self, id: CompanyId) -> Result<RankResponse>;
    async fn update_rank(&self, id: CompanyId, rank: i64) -> Result<RankResponse>;
    async fn update_tier(&self, id: CompanyId, tier: &Tier) -> Result<TierResponse>;
    async fn add_tag(&self, id: CompanyId, tag: &str) -> Result<TagMutationResponse>;
    async fn remove_tag(&self, id: CompanyId, index: usize) -> Result<TagMutationResponse>;
}

pub struct HttpCompanyBackend {
    http: Client,
    server_url: String,
}

impl HttpCompanyBackend {
    pub fn new(server_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let server_url = server_url.into().trim().trim_end_matches('/').to_string();
        if server_url.is_empty() {
            return Err(BackendError::InvalidServerUrl(server_url).into());
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, server_url })
    }

    fn post(&self, route: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{route}", self.server_url))
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
    }

    async fn send_json<T: DeserializeOwned>(&self, route: &str, request: RequestBuilder) -> Result<T> {
        debug!(route, "backend: sending request");
        let body = request
            .send()
            .await
            .with_context(|| format!("request to {route} failed"))?
            .error_for_status()
            .with_context(|| format!("{route} returned an error status"))?
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode response from {route}"))?;
        Ok(body)
    }
}

#[async_trait]
impl CompanyBackend for HttpCompanyBackend {
    async fn list_companies(&self) -> Result<Vec<Company>> {
        let route = companies_route();
        let request = self
            .http
            .get(format!("{}{route}", self.server_url))
            .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);
        self.send_json(route, request).await
    }

    async fn upvote(&self, id: CompanyId) -> Result<RankResponse> {
        let route = upvote_route(id);
        self.send_json(&route, self.post(&route)).await
    }

    async fn downvote(&self, id: CompanyId) -> Result<RankResponse> {
        let route = downvote_route(id);
        self.send_json(&route, self.post(&route)).await
    }

    async fn update_rank(&self, id: CompanyId, rank: i64) -> Result<RankResponse> {
        let route = update_rank_route(id);
        let request = self.post(&route).form(&RankForm { rank });
        self.send_json(&route, request).await
    }

    async fn update_tier(&self, id: CompanyId, tier: &Tier) -> Result<TierResponse> {
        let route = update_tier_route(id);
        let request = self.post(&route).form(&TierForm { tier: tier.clone() });
        self.send_json(&route, request).await
    }

    async fn add_tag(&self, id: CompanyId, tag: &str) -> Result<TagMutationResponse> {
        let route = add_tag_route(id);
        let request = self.post(&route).form(&TagForm {
            tag: tag.to_string(),
        });
        let response: TagMutationResponse = self.send_json(&route, request).await?;
        if !response.success {
            return Err(BackendError::TagRejected(id).into());
        }
        Ok(response)
    }

    async fn remove_tag(&self, id: CompanyId, index: usize) -> Result<TagMutationResponse> {
        let route = remove_tag_route(id, index);
        let response: TagMutationResponse = self.send_json(&route, self.post(&route)).await?;
        if !response.success {
            return Err(BackendError::TagRejected(id).into());
        }
        Ok(response)
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
