//! Remote reads for both engines: the GitLab merge request API and bare
//! HTTP probes against configured sites.

pub mod gitlab;
pub mod probe;

pub use gitlab::{GitLabClient, MergeRequestSource};
pub use probe::{HttpProbe, SiteProbe, is_url};
pub use reqwest::StatusCode;
