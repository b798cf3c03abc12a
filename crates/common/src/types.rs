use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a merge request: `(iid, project_id)`.
///
/// The iid is only unique within a project, so both halves are needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MrIdentity {
    pub iid: u64,
    pub project_id: u64,
}

impl std::fmt::Display for MrIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.iid, self.project_id)
    }
}

/// A GitLab user as embedded in merge request payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLabUser {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: String,
}

/// Project metadata, fetched lazily right before a merge request is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub name_with_namespace: String,
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default)]
    pub web_url: String,
}

/// An open merge request as returned by `GET /projects/:id/merge_requests`.
///
/// Field names follow the GitLab JSON shape, which is also what message
/// templates address (`{{.title}}`, `{{.project.name}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: u64,
    pub iid: u64,
    pub project_id: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub source_branch: String,
    #[serde(default)]
    pub target_branch: String,
    #[serde(default)]
    pub author: Option<GitLabUser>,
    /// Absent means unassigned; such merge requests never match a user query.
    #[serde(default)]
    pub assignee: Option<GitLabUser>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Filled in by enrichment; never part of the list response.
    #[serde(default)]
    pub project: Option<Project>,
}

impl MergeRequest {
    pub fn identity(&self) -> MrIdentity {
        MrIdentity {
            iid: self.iid,
            project_id: self.project_id,
        }
    }

    /// Whether the assignee's username equals `user` exactly.
    pub fn is_assigned_to(&self, user: &str) -> bool {
        self.assignee
            .as_ref()
            .is_some_and(|assignee| assignee.username == user)
    }
}

/// Sender of an inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub name: String,
}

/// A message handed to the workers by the chat host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub room: String,
    pub text: String,
    /// `None` when the host could not attribute the message; such messages
    /// are rejected by the workers.
    pub from: Option<ChatUser>,
}

impl InboundMessage {
    pub fn new(
        id: impl Into<String>,
        room: impl Into<String>,
        from: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            room: room.into(),
            text: text.into(),
            from: Some(ChatUser { name: from.into() }),
        }
    }

    pub fn sender(&self) -> Option<&str> {
        self.from.as_ref().map(|user| user.name.as_str())
    }
}

/// A named endpoint checked by the site engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteTarget {
    pub name: String,
    pub url: String,
}

/// Result of one site check. Never stored; reported and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteCheckOutcome {
    pub name: String,
    pub url: String,
    pub result: SiteCheckResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteCheckResult {
    /// The endpoint answered; `status` is the full status line, e.g. `"503 Service Unavailable"`.
    Responded { code: u16, status: String },
    /// No response: connection refused, DNS failure, timeout.
    TransportError(String),
}

impl SiteCheckOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self.result, SiteCheckResult::Responded { code: 200, .. })
    }
}

/// Template payload for site notifications.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SitePayload {
    pub site_name: String,
    pub site_url: String,
    pub status_code: String,
}
