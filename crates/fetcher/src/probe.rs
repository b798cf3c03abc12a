//! HTTP probe for the site checker.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};

use chatwatch_common::error::AppError;

static URL_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-a-zA-Z0-9@:%._\+~#=]{2,256}\.[a-z]{2,6}\b([-a-zA-Z0-9@:%_\+.~#?&//=]*)")
        .expect("URL shape pattern is valid")
});

/// Whether `candidate` looks like a site URL (`host.tld[/path]`).
pub fn is_url(candidate: &str) -> bool {
    URL_SHAPE.is_match(candidate)
}

#[async_trait]
pub trait SiteProbe: Send + Sync {
    /// One bare GET. Any response is `Ok`, whatever its status.
    async fn fetch_one(&self, url: &str) -> Result<StatusCode, AppError>;
}

#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SiteProbe for HttpProbe {
    async fn fetch_one(&self, url: &str) -> Result<StatusCode, AppError> {
        tracing::debug!(url, "Checking url");
        let response = self.client.get(url).send().await?;
        Ok(response.status())
    }
}
