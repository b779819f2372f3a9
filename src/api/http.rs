//! REST client for the chit backend.

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::ChitApi;
use crate::models::{
    Assignment, AssignmentId, Contribution, ContributionId, ContributionPatch, Member,
    NewAssignment, Payout, PayoutId, PayoutPatch, Scheme, SchemeId,
};

#[derive(Debug, Deserialize)]
struct AssignmentList {
    #[serde(alias = "slots")]
    assignments: Vec<Assignment>,
}

#[derive(Debug, Deserialize)]
struct PayoutList {
    #[serde(alias = "slots")]
    payouts: Vec<Payout>,
}

#[derive(Debug, Deserialize)]
struct CollectionList {
    collections: Vec<Contribution>,
}

#[derive(Debug, Deserialize)]
struct MemberList {
    members: Vec<Member>,
}

/// FastAPI-style error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

#[derive(Clone)]
pub struct HttpChitApi {
    client: Client,
    base_url: String,
}

impl HttpChitApi {
    pub fn new(base_url: &str, token: Option<&str>, timeout_secs: u64) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = token {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", token)
                    .parse()
                    .context("Invalid CHIT_API_TOKEN")?,
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers)
            .build()
            .context("Failed to build HttpChitApi")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(path, "GET");
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;
        let resp = check(resp, "GET", path).await?;
        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to parse response of GET {}", path))
    }
}

/// Turn a non-2xx response into an error carrying the backend's `detail`.
async fn check(resp: Response, method: &str, path: &str) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    Err(anyhow!("{}", error_detail(&text).unwrap_or_else(|| {
        format!("{} {} {}: {}", method, path, status, text)
    })))
}

fn error_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Null => None,
        // validation errors come back as a list of objects
        other => Some(other.to_string()),
    }
}

#[async_trait::async_trait]
impl ChitApi for HttpChitApi {
    async fn get_scheme(&self, scheme_id: SchemeId) -> Result<Scheme> {
        self.get_json(&format!("/chits/{}", scheme_id)).await
    }

    async fn list_members(&self) -> Result<Vec<Member>> {
        let list: MemberList = self.get_json("/members").await?;
        Ok(list.members)
    }

    async fn list_assignments(&self, scheme_id: SchemeId) -> Result<Vec<Assignment>> {
        let list: AssignmentList = self
            .get_json(&format!("/chits/{}/assignments", scheme_id))
            .await?;
        Ok(list.assignments)
    }

    async fn create_assignment(&self, new: &NewAssignment) -> Result<Assignment> {
        let resp = self
            .client
            .post(self.url("/assignments"))
            .json(new)
            .send()
            .await
            .context("POST /assignments failed")?;
        let resp = check(resp, "POST", "/assignments").await?;
        resp.json::<Assignment>()
            .await
            .context("Failed to parse created assignment")
    }

    async fn delete_assignment(&self, id: AssignmentId) -> Result<()> {
        let path = format!("/assignments/{}", id);
        let resp = self
            .client
            .delete(self.url(&path))
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", path))?;
        check(resp, "DELETE", &path).await?;
        Ok(())
    }

    async fn list_payouts(&self, scheme_id: SchemeId) -> Result<Vec<Payout>> {
        let list: PayoutList = self
            .get_json(&format!("/payouts/chit/{}", scheme_id))
            .await?;
        Ok(list.payouts)
    }

    async fn update_payout(&self, id: PayoutId, patch: &PayoutPatch) -> Result<Payout> {
        let path = format!("/payouts/{}", id);
        let resp = self
            .client
            .put(self.url(&path))
            .json(patch)
            .send()
            .await
            .with_context(|| format!("PUT {} failed", path))?;
        let resp = check(resp, "PUT", &path).await?;
        resp.json::<Payout>()
            .await
            .context("Failed to parse updated payout")
    }

    async fn list_contributions(&self, scheme_id: SchemeId) -> Result<Vec<Contribution>> {
        let list: CollectionList = self
            .get_json(&format!("/collections/chit/{}", scheme_id))
            .await?;
        Ok(list.collections)
    }

    async fn update_contribution(
        &self,
        id: ContributionId,
        patch: &ContributionPatch,
    ) -> Result<Contribution> {
        let path = format!("/collections/{}", id);
        let resp = self
            .client
            .patch(self.url(&path))
            .json(patch)
            .send()
            .await
            .with_context(|| format!("PATCH {} failed", path))?;
        let resp = check(resp, "PATCH", &path).await?;
        resp.json::<Contribution>()
            .await
            .context("Failed to parse updated collection")
    }
}
