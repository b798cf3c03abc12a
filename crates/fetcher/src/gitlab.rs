//! GitLab API v4 client for the merge request watcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response};

use chatwatch_common::error::AppError;
use chatwatch_common::types::{MergeRequest, Project};

/// Page size requested from list endpoints (GitLab's maximum).
const PER_PAGE: u32 = 100;

/// Remote read side of the merge request watcher.
#[async_trait]
pub trait MergeRequestSource: Send + Sync {
    /// All open merge requests across every configured project.
    ///
    /// Any failure fails the whole call; no partial aggregate is returned.
    async fn fetch_all(&self) -> Result<Vec<MergeRequest>, AppError>;

    /// Project metadata for one merge request's `project_id`.
    async fn project(&self, project_id: u64) -> Result<Project, AppError>;
}

/// GitLab API client.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    client: Client,
    base_url: String,
    projects: Vec<String>,
}

impl GitLabClient {
    pub fn new(
        base_url: &str,
        token: &str,
        projects: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        if !token.is_empty() {
            let mut value = HeaderValue::from_str(token).map_err(|_| {
                AppError::Config("MRWATCH_TOKEN contains invalid header characters".into())
            })?;
            value.set_sensitive(true);
            headers.insert("private-token", value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            projects,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    /// `/projects/:id`, with `group/name` paths URL-encoded.
    fn project_path(project: &str) -> String {
        format!("/projects/{}", urlencoding::encode(project))
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Response, AppError> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Api {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    /// Open merge requests for one project, following `X-Next-Page`.
    pub async fn list_open_merge_requests(
        &self,
        project: &str,
    ) -> Result<Vec<MergeRequest>, AppError> {
        let url = self.api_url(&format!("{}/merge_requests", Self::project_path(project)));
        let mut page = 1u32;
        let mut all = Vec::new();

        loop {
            let query = [
                ("state", "opened".to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let response = self.get(&url, &query).await?;
            let next_page = next_page(response.headers());
            let batch: Vec<MergeRequest> = response.json().await?;
            all.extend(batch);

            match next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        tracing::debug!(project, count = all.len(), "Listed open merge requests");
        Ok(all)
    }

    /// Verify every configured project is reachable. Returns the ones that
    /// are not, with the reason; the caller decides how loud to be.
    pub async fn check_projects(&self) -> Vec<(String, AppError)> {
        let mut unreachable = Vec::new();
        for project in &self.projects {
            let url = self.api_url(&Self::project_path(project));
            match self.get(&url, &[]).await {
                Ok(_) => tracing::info!(project = %project, "GitLab project reachable"),
                Err(e) => unreachable.push((project.clone(), e)),
            }
        }
        unreachable
    }
}

#[async_trait]
impl MergeRequestSource for GitLabClient {
    async fn fetch_all(&self) -> Result<Vec<MergeRequest>, AppError> {
        let mut all = Vec::new();
        for project in &self.projects {
            all.extend(self.list_open_merge_requests(project).await?);
        }
        Ok(all)
    }

    async fn project(&self, project_id: u64) -> Result<Project, AppError> {
        let url = self.api_url(&Self::project_path(&project_id.to_string()));
        let project = self.get(&url, &[]).await?.json().await?;
        Ok(project)
    }
}

/// `X-Next-Page`; GitLab sends it empty on the last page.
fn next_page(headers: &HeaderMap) -> Option<u32> {
    headers
        .get("x-next-page")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
