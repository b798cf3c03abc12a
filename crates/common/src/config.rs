use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::AppError;

/// Global configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Chat host webhook. When unset, the console host is used.
    pub webhook_url: Option<String>,

    /// Timeout applied to every outbound HTTP call (default: 10s)
    pub http_timeout: Duration,

    /// Maximum concurrent checks / sends per engine (default: 16)
    pub max_in_flight: usize,

    /// Merge request engine; `None` when `MRWATCH_GITLAB_URL` is unset.
    pub merge_requests: Option<MergeRequestConfig>,

    /// Site engine; `None` when `SITECHECK_SITES` is unset.
    pub sites: Option<SiteCheckConfig>,
}

/// Merge request watcher configuration.
///
/// Empty template and command strings are kept as-is; the worker substitutes
/// its built-in defaults.
#[derive(Debug, Clone)]
pub struct MergeRequestConfig {
    /// GitLab base URL, e.g. `https://gitlab.example.com`
    pub gitlab_url: String,

    /// Value of the `PRIVATE-TOKEN` header
    pub token: String,

    /// Project ids or `group/name` paths
    pub projects: Vec<String>,

    pub polling_interval: Duration,

    /// Accepted for compatibility; the polling loop does not use it.
    pub notify_interval: Duration,

    /// Rendered per new merge request. Fields use GitLab's snake_case API
    /// names (`{{.iid}}`, `{{.title}}`, `{{.web_url}}`,
    /// `{{.project.name_with_namespace}}`); `{{.Title}}` does not resolve.
    pub notify_template: String,

    /// Rendered per assigned merge request in a query reply; same field
    /// names as `notify_template`.
    pub response_template: String,

    pub command: String,

    /// Room that receives background notifications
    pub chat_room: String,
}

/// Site checker configuration.
#[derive(Debug, Clone)]
pub struct SiteCheckConfig {
    /// Site name → URL
    pub sites: BTreeMap<String, String>,
    pub check_interval: Duration,

    /// Site templates read PascalCase fields: `{{.SiteName}}`,
    /// `{{.SiteUrl}}`, `{{.StatusCode}}`.
    pub fail_template: String,
    pub status_template: String,
    pub command: String,
    pub chat_room: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let text = |key: &str| lookup(key).unwrap_or_default();

        let merge_requests = match var("MRWATCH_GITLAB_URL") {
            Some(gitlab_url) => {
                let projects = parse_list(&text("MRWATCH_PROJECTS"));
                if projects.is_empty() {
                    return Err(AppError::Config(
                        "MRWATCH_PROJECTS is required when MRWATCH_GITLAB_URL is set".into(),
                    ));
                }
                Some(MergeRequestConfig {
                    gitlab_url: gitlab_url.trim_end_matches('/').to_string(),
                    token: text("MRWATCH_TOKEN"),
                    projects,
                    polling_interval: parse_interval(
                        "MRWATCH_POLL_INTERVAL_SECS",
                        var("MRWATCH_POLL_INTERVAL_SECS"),
                        60,
                    )?,
                    notify_interval: Duration::from_secs(parse_u64(
                        "MRWATCH_NOTIFY_INTERVAL_SECS",
                        var("MRWATCH_NOTIFY_INTERVAL_SECS"),
                        0,
                    )?),
                    notify_template: text("MRWATCH_NOTIFY_TEMPLATE"),
                    response_template: text("MRWATCH_RESPONSE_TEMPLATE"),
                    command: text("MRWATCH_COMMAND").trim().to_string(),
                    chat_room: var("MRWATCH_CHAT_ROOM").ok_or_else(|| {
                        AppError::Config(
                            "MRWATCH_CHAT_ROOM is required when MRWATCH_GITLAB_URL is set".into(),
                        )
                    })?,
                })
            }
            None => None,
        };

        let sites = match var("SITECHECK_SITES") {
            Some(raw) => Some(SiteCheckConfig {
                sites: parse_sites(&raw)?,
                check_interval: parse_interval(
                    "SITECHECK_INTERVAL_SECS",
                    var("SITECHECK_INTERVAL_SECS"),
                    60,
                )?,
                fail_template: text("SITECHECK_FAIL_TEMPLATE"),
                status_template: text("SITECHECK_STATUS_TEMPLATE"),
                command: text("SITECHECK_COMMAND").trim().to_string(),
                chat_room: var("SITECHECK_CHAT_ROOM").ok_or_else(|| {
                    AppError::Config(
                        "SITECHECK_CHAT_ROOM is required when SITECHECK_SITES is set".into(),
                    )
                })?,
            }),
            None => None,
        };

        let max_in_flight =
            parse_u64("CHATWATCH_MAX_IN_FLIGHT", var("CHATWATCH_MAX_IN_FLIGHT"), 16)?;
        if max_in_flight == 0 {
            return Err(AppError::Config(
                "CHATWATCH_MAX_IN_FLIGHT must be at least 1".into(),
            ));
        }

        Ok(Self {
            webhook_url: var("CHATWATCH_WEBHOOK_URL"),
            http_timeout: parse_interval(
                "CHATWATCH_HTTP_TIMEOUT_SECS",
                var("CHATWATCH_HTTP_TIMEOUT_SECS"),
                10,
            )?,
            max_in_flight: max_in_flight as usize,
            merge_requests,
            sites,
        })
    }
}

fn parse_u64(key: &str, raw: Option<String>, default: u64) -> Result<u64, AppError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} must be a valid u64, got {value:?}"))),
        None => Ok(default),
    }
}

fn parse_interval(key: &str, raw: Option<String>, default: u64) -> Result<Duration, AppError> {
    let secs = parse_u64(key, raw, default)?;
    if secs == 0 {
        return Err(AppError::Config(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `name=url,name=url`.
fn parse_sites(raw: &str) -> Result<BTreeMap<String, String>, AppError> {
    let mut sites = BTreeMap::new();
    for entry in parse_list(raw) {
        let (name, url) = entry.split_once('=').ok_or_else(|| {
            AppError::Config(format!("SITECHECK_SITES entry {entry:?} is not name=url"))
        })?;
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            return Err(AppError::Config(format!(
                "SITECHECK_SITES entry {entry:?} has an empty name or url"
            )));
        }
        if sites.insert(name.to_string(), url.to_string()).is_some() {
            return Err(AppError::Config(format!(
                "SITECHECK_SITES lists {name:?} more than once"
            )));
        }
    }
    if sites.is_empty() {
        return Err(AppError::Config("SITECHECK_SITES can not be empty".into()));
    }
    Ok(sites)
}
