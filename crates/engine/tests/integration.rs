//! Integration tests for both engines, driven through in-memory fakes of the
//! GitLab source, the site probe, and the chat host.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p chatwatch-engine --test integration
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use chatwatch_common::config::{MergeRequestConfig, SiteCheckConfig};
use chatwatch_common::error::AppError;
use chatwatch_common::types::{GitLabUser, InboundMessage, MergeRequest, Project};
use chatwatch_engine::merge_requests::NO_MERGE_REQUESTS_REPLY;
use chatwatch_engine::{MergeRequestWatcher, ReportMode, SiteChecker, Worker};
use chatwatch_fetcher::{MergeRequestSource, SiteProbe, StatusCode};
use chatwatch_notifier::{ChatHost, Destination, Notifier};

// ============================================================
// Shared fakes
// ============================================================

#[derive(Default)]
struct RecordingHost {
    room: Mutex<Vec<(String, String)>>,
    replies: Mutex<Vec<(String, String)>>,
}

impl RecordingHost {
    fn room_texts(&self) -> Vec<String> {
        self.room
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    fn reply_texts(&self) -> Vec<String> {
        self.replies
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatHost for RecordingHost {
    async fn send_to_room(&self, room: &str, text: &str) -> Result<(), AppError> {
        self.room
            .lock()
            .unwrap()
            .push((room.to_string(), text.to_string()));
        Ok(())
    }

    async fn reply(&self, message: &InboundMessage, text: &str) -> Result<(), AppError> {
        self.replies
            .lock()
            .unwrap()
            .push((message.id.clone(), text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct FakeSource {
    merge_requests: Mutex<Vec<MergeRequest>>,
    failing: Mutex<bool>,
    broken_projects: HashSet<u64>,
    lookup_delays: HashMap<u64, Duration>,
    fetches: AtomicUsize,
}

impl FakeSource {
    fn with(merge_requests: Vec<MergeRequest>) -> Self {
        Self {
            merge_requests: Mutex::new(merge_requests),
            ..Default::default()
        }
    }

    fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl MergeRequestSource for FakeSource {
    async fn fetch_all(&self) -> Result<Vec<MergeRequest>, AppError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() {
            return Err(AppError::Api {
                status: 502,
                url: "https://gitlab.example.com/api/v4/projects/42/merge_requests".into(),
            });
        }
        Ok(self.merge_requests.lock().unwrap().clone())
    }

    async fn project(&self, project_id: u64) -> Result<Project, AppError> {
        if let Some(delay) = self.lookup_delays.get(&project_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.broken_projects.contains(&project_id) {
            return Err(AppError::Api {
                status: 404,
                url: format!("https://gitlab.example.com/api/v4/projects/{project_id}"),
            });
        }
        Ok(Project {
            id: project_id,
            name: format!("app{project_id}"),
            name_with_namespace: format!("team / app{project_id}"),
            path_with_namespace: format!("team/app{project_id}"),
            web_url: format!("https://gitlab.example.com/team/app{project_id}"),
        })
    }
}

enum Probe {
    Status(u16),
    Refused,
    Hang,
}

struct FakeProbe {
    responses: HashMap<String, Probe>,
}

#[async_trait]
impl SiteProbe for FakeProbe {
    async fn fetch_one(&self, url: &str) -> Result<StatusCode, AppError> {
        match self.responses.get(url) {
            Some(Probe::Status(code)) => Ok(StatusCode::from_u16(*code).unwrap()),
            Some(Probe::Refused) | None => Err(AppError::Timeout(Duration::from_secs(1))),
            Some(Probe::Hang) => std::future::pending().await,
        }
    }
}

fn mr(iid: u64, project_id: u64, assignee: Option<&str>) -> MergeRequest {
    MergeRequest {
        id: project_id * 1000 + iid,
        iid,
        project_id,
        title: format!("MR {iid}"),
        description: None,
        state: "opened".into(),
        web_url: format!("https://gitlab.example.com/team/app{project_id}/-/merge_requests/{iid}"),
        source_branch: "feature".into(),
        target_branch: "main".into(),
        author: None,
        assignee: assignee.map(|name| GitLabUser {
            id: 1,
            username: name.to_string(),
            name: name.to_string(),
        }),
        created_at: None,
        project: None,
    }
}

fn mr_config() -> MergeRequestConfig {
    MergeRequestConfig {
        gitlab_url: "https://gitlab.example.com".into(),
        token: String::new(),
        projects: vec!["42".into()],
        polling_interval: Duration::from_secs(60),
        notify_interval: Duration::ZERO,
        notify_template: String::new(),
        response_template: String::new(),
        command: String::new(),
        chat_room: "dev".into(),
    }
}

fn new_watcher(
    source: Arc<FakeSource>,
    config: &MergeRequestConfig,
) -> (MergeRequestWatcher, Arc<RecordingHost>) {
    let host = Arc::new(RecordingHost::default());
    let watcher =
        MergeRequestWatcher::new(config, 4, source, Notifier::new(host.clone())).unwrap();
    (watcher, host)
}

fn site_config(sites: &[(&str, &str)]) -> SiteCheckConfig {
    SiteCheckConfig {
        sites: sites
            .iter()
            .map(|(name, url)| (name.to_string(), url.to_string()))
            .collect::<BTreeMap<_, _>>(),
        check_interval: Duration::from_secs(60),
        fail_template: String::new(),
        status_template: String::new(),
        command: String::new(),
        chat_room: "ops".into(),
    }
}

fn new_checker(
    config: &SiteCheckConfig,
    responses: Vec<(&str, Probe)>,
) -> (SiteChecker, Arc<RecordingHost>) {
    let probe = FakeProbe {
        responses: responses
            .into_iter()
            .map(|(url, probe)| (url.to_string(), probe))
            .collect(),
    };
    let host = Arc::new(RecordingHost::default());
    let checker = SiteChecker::new(
        config,
        4,
        Duration::from_millis(100),
        Arc::new(probe),
        Notifier::new(host.clone()),
    )
    .unwrap();
    (checker, host)
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================
// Merge request watcher: background cycle
// ============================================================

#[tokio::test]
async fn test_new_merge_request_notified_once() {
    let source = Arc::new(FakeSource::with(vec![mr(7, 42, None)]));
    let (watcher, host) = new_watcher(source, &mr_config());

    let new = watcher.poll_new().await.unwrap();
    assert_eq!(new.len(), 1);
    assert_eq!(watcher.notify_new(new).await, 1);

    let new = watcher.poll_new().await.unwrap();
    assert!(new.is_empty());
    assert_eq!(watcher.notify_new(new).await, 0);

    assert_eq!(
        host.room_texts(),
        vec!["New MergeRequest !7 MR 7 in team / app42 https://gitlab.example.com/team/app42/-/merge_requests/7"]
    );
    assert_eq!(host.room.lock().unwrap()[0].0, "dev");
    assert_eq!(watcher.tracked_count().await, 1);
}

#[tokio::test]
async fn test_only_later_additions_are_new() {
    let source = Arc::new(FakeSource::with(vec![mr(1, 42, None)]));
    let (watcher, _host) = new_watcher(source.clone(), &mr_config());

    assert_eq!(watcher.poll_new().await.unwrap().len(), 1);

    source
        .merge_requests
        .lock()
        .unwrap()
        .extend([mr(2, 42, None), mr(1, 43, None)]);
    let new = watcher.poll_new().await.unwrap();
    let ids: Vec<_> = new.iter().map(|m| m.identity().to_string()).collect();
    assert_eq!(ids, vec!["2-42", "1-43"]);
}

#[tokio::test]
async fn test_restart_notifies_again() {
    let source = Arc::new(FakeSource::with(vec![mr(7, 42, None)]));

    let (first, _) = new_watcher(source.clone(), &mr_config());
    assert_eq!(first.poll_new().await.unwrap().len(), 1);

    // A fresh instance stands in for a process restart.
    let (second, host) = new_watcher(source, &mr_config());
    let new = second.poll_new().await.unwrap();
    assert_eq!(new.len(), 1);
    assert_eq!(second.notify_new(new).await, 1);
    assert_eq!(host.room_texts().len(), 1);
}

#[tokio::test]
async fn test_fetch_error_skips_cycle() {
    let source = Arc::new(FakeSource::with(vec![mr(7, 42, None)]));
    let (watcher, host) = new_watcher(source.clone(), &mr_config());

    source.set_failing(true);
    let err = watcher.poll_new().await.unwrap_err();
    assert!(err.is_remote());
    assert_eq!(watcher.tracked_count().await, 0);

    source.set_failing(false);
    let new = watcher.poll_new().await.unwrap();
    assert_eq!(watcher.notify_new(new).await, 1);
    assert_eq!(host.room_texts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_notifications_follow_discovery_order() {
    // Later projects answer their lookups first.
    let source = Arc::new(FakeSource {
        merge_requests: Mutex::new(vec![mr(1, 1, None), mr(2, 2, None), mr(3, 3, None)]),
        lookup_delays: HashMap::from([
            (1, Duration::from_millis(150)),
            (2, Duration::from_millis(100)),
            (3, Duration::from_millis(50)),
        ]),
        ..Default::default()
    });
    let config = MergeRequestConfig {
        notify_template: "{{.iid}}".into(),
        ..mr_config()
    };
    let (watcher, host) = new_watcher(source, &config);

    let new = watcher.poll_new().await.unwrap();
    let discovered: Vec<_> = new.iter().map(|m| m.iid.to_string()).collect();
    assert_eq!(discovered, vec!["1", "2", "3"]);

    assert_eq!(watcher.notify_new(new).await, 3);
    assert_eq!(host.room_texts(), discovered);
}

#[tokio::test]
async fn test_enrichment_failure_suppresses_only_that_item() {
    let source = Arc::new(FakeSource {
        merge_requests: Mutex::new(vec![mr(1, 42, None), mr(2, 99, None)]),
        broken_projects: HashSet::from([99]),
        ..Default::default()
    });
    let (watcher, host) = new_watcher(source, &mr_config());

    let new = watcher.poll_new().await.unwrap();
    assert_eq!(new.len(), 2);
    assert_eq!(watcher.notify_new(new).await, 1);
    assert_eq!(host.room_texts().len(), 1);
    assert!(host.room_texts()[0].contains("!1 MR 1"));

    // Still marked seen; the failed one is not retried.
    assert!(watcher.poll_new().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_render_failure_suppresses_message() {
    let source = Arc::new(FakeSource::with(vec![mr(1, 42, None)]));
    let mut config = mr_config();
    config.notify_template = "{{.title}} by {{.author.username}}".into();
    let (watcher, host) = new_watcher(source, &config);

    let new = watcher.poll_new().await.unwrap();
    assert_eq!(watcher.notify_new(new).await, 0);
    assert!(host.room_texts().is_empty());
}

#[tokio::test]
async fn test_custom_notify_template() {
    let source = Arc::new(FakeSource::with(vec![mr(3, 42, Some("bob"))]));
    let mut config = mr_config();
    config.notify_template = "{{.assignee.username}}: {{.project.name}} !{{.iid}}".into();
    let (watcher, host) = new_watcher(source, &config);

    let new = watcher.poll_new().await.unwrap();
    watcher.notify_new(new).await;
    assert_eq!(host.room_texts(), vec!["bob: app42 !3"]);
}

#[tokio::test]
async fn test_background_loop_delivers_and_start_is_idempotent() {
    let source = Arc::new(FakeSource::with(vec![mr(7, 42, None)]));
    let (watcher, host) = new_watcher(source.clone(), &mr_config());

    assert!(watcher.start());
    assert!(!watcher.start());
    assert!(watcher.is_running());

    wait_for(|| host.room_texts().len() == 1).await;
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
}

// ============================================================
// Merge request watcher: on-demand path
// ============================================================

fn alice_bob_unassigned() -> Vec<MergeRequest> {
    vec![mr(1, 42, Some("alice")), mr(2, 42, Some("bob")), mr(3, 42, None)]
}

#[tokio::test]
async fn test_query_replies_with_assigned_merge_requests() {
    let source = Arc::new(FakeSource::with(alice_bob_unassigned()));
    let (watcher, host) = new_watcher(source, &mr_config());

    let msg = InboundMessage::new("m-1", "dev", "alice", "mergerequest");
    assert!(watcher.process(&msg).await.unwrap());

    assert_eq!(
        host.reply_texts(),
        vec![
            "Checking MergeRequest for alice. Please wait".to_string(),
            "!1 MR 1 (team / app42) https://gitlab.example.com/team/app42/-/merge_requests/1"
                .to_string(),
            "@alice. You have 1 Merge Requests.".to_string(),
        ]
    );
    assert!(host.replies.lock().unwrap().iter().all(|(id, _)| id == "m-1"));
    assert!(host.room_texts().is_empty());
    // The on-demand path leaves the tracker alone.
    assert_eq!(watcher.tracked_count().await, 0);
}

#[tokio::test]
async fn test_query_without_matches() {
    let source = Arc::new(FakeSource::with(alice_bob_unassigned()));
    let (watcher, host) = new_watcher(source, &mr_config());

    let msg = InboundMessage::new("m-2", "dev", "carol", "hey mergerequest?");
    assert!(watcher.process(&msg).await.unwrap());

    let replies = host.reply_texts();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies.last().unwrap(), NO_MERGE_REQUESTS_REPLY);
}

#[tokio::test]
async fn test_query_counts_every_match() {
    let mut merge_requests = alice_bob_unassigned();
    merge_requests.push(mr(9, 43, Some("alice")));
    let source = Arc::new(FakeSource::with(merge_requests));
    let (watcher, host) = new_watcher(source, &mr_config());

    let msg = InboundMessage::new("m-3", "dev", "alice", "mergerequest");
    watcher.process(&msg).await.unwrap();

    let replies = host.reply_texts();
    assert_eq!(replies.len(), 4);
    assert_eq!(replies[3], "@alice. You have 2 Merge Requests.");
}

#[tokio::test]
async fn test_query_fetch_error_propagates() {
    let source = Arc::new(FakeSource::with(alice_bob_unassigned()));
    source.set_failing(true);
    let (watcher, host) = new_watcher(source, &mr_config());

    let msg = InboundMessage::new("m-4", "dev", "alice", "mergerequest");
    let err = watcher.process(&msg).await.unwrap_err();
    assert!(matches!(err, AppError::Api { status: 502, .. }));
    // Only the acknowledgement went out.
    assert_eq!(host.reply_texts().len(), 1);
}

#[tokio::test]
async fn test_unrelated_and_malformed_messages() {
    let source = Arc::new(FakeSource::with(alice_bob_unassigned()));
    let mut config = mr_config();
    config.command = "mrs".into();
    let (watcher, host) = new_watcher(source.clone(), &config);
    assert_eq!(watcher.command(), "mrs");

    let msg = InboundMessage::new("m-5", "dev", "alice", "mergerequest");
    assert!(!watcher.process(&msg).await.unwrap());

    let anonymous = InboundMessage {
        from: None,
        ..InboundMessage::new("m-6", "dev", "", "mrs")
    };
    let err = watcher.process(&anonymous).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidMessage(_)));

    assert!(host.reply_texts().is_empty());
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
}

// ============================================================
// Site checker
// ============================================================

#[tokio::test]
async fn test_failing_site_does_not_affect_healthy_one() {
    let config = site_config(&[("a", "http://a.example.com"), ("b", "http://b.example.com")]);
    let (checker, host) = new_checker(
        &config,
        vec![
            ("http://a.example.com", Probe::Refused),
            ("http://b.example.com", Probe::Status(200)),
        ],
    );

    let outcomes = checker
        .check_all(ReportMode::FailuresOnly, Destination::Room("ops".into()))
        .await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().any(|o| o.name == "b" && o.is_ok()));

    assert_eq!(
        host.room_texts(),
        vec!["Check site a Fail. Error Timed out after 1s"]
    );
    assert_eq!(host.room.lock().unwrap()[0].0, "ops");
}

#[tokio::test]
async fn test_default_fail_template() {
    let config = site_config(&[("c", "http://c.example.com")]);
    let (checker, host) = new_checker(&config, vec![("http://c.example.com", Probe::Status(503))]);

    checker
        .check_all(ReportMode::FailuresOnly, Destination::Room("ops".into()))
        .await;
    assert_eq!(
        host.room_texts(),
        vec!["c is dead!!! Status 503 Service Unavailable http://c.example.com"]
    );
}

#[tokio::test]
async fn test_hanging_site_times_out_without_blocking_others() {
    let config = site_config(&[("slow", "http://slow.example.com"), ("down", "http://down.example.com")]);
    let (checker, host) = new_checker(
        &config,
        vec![
            ("http://slow.example.com", Probe::Hang),
            ("http://down.example.com", Probe::Status(500)),
        ],
    );

    let outcomes = checker
        .check_all(ReportMode::FailuresOnly, Destination::Room("ops".into()))
        .await;
    assert_eq!(outcomes.len(), 2);

    let texts: HashSet<String> = host.room_texts().into_iter().collect();
    assert_eq!(
        texts,
        HashSet::from([
            "Check site slow Fail. Error Timed out after 100ms".to_string(),
            "down is dead!!! Status 500 Internal Server Error http://down.example.com".to_string(),
        ])
    );
}

#[tokio::test]
async fn test_status_command_reports_every_site() {
    let config = site_config(&[("a", "http://a.example.com"), ("b", "http://b.example.com")]);
    let (checker, host) = new_checker(
        &config,
        vec![
            ("http://a.example.com", Probe::Refused),
            ("http://b.example.com", Probe::Status(200)),
        ],
    );

    let msg = InboundMessage::new("m-7", "ops", "alice", "sitestatus please");
    assert!(checker.process(&msg).await.unwrap());
    assert!(checker.is_running());

    let replies: HashSet<String> = host.reply_texts().into_iter().collect();
    assert_eq!(
        replies,
        HashSet::from([
            "b status 200 OK http://b.example.com".to_string(),
            "Check site a Fail. Error Timed out after 1s".to_string(),
        ])
    );
}

#[tokio::test]
async fn test_any_message_starts_background_checks() {
    let config = site_config(&[("c", "http://c.example.com")]);
    let (checker, host) = new_checker(&config, vec![("http://c.example.com", Probe::Status(503))]);
    assert!(!checker.is_running());

    let msg = InboundMessage::new("m-8", "ops", "bob", "good morning");
    assert!(!checker.process(&msg).await.unwrap());
    assert!(checker.is_running());
    assert!(!checker.start());

    wait_for(|| host.room_texts().len() == 1).await;
    assert!(host.reply_texts().is_empty());
}

#[tokio::test]
async fn test_custom_status_template_and_command() {
    let mut config = site_config(&[("b", "https://b.example.com/health")]);
    config.command = "health".into();
    config.status_template = "[{{.SiteName}}] {{.StatusCode}}".into();
    let (checker, host) = new_checker(&config, vec![("https://b.example.com/health", Probe::Status(200))]);

    let msg = InboundMessage::new("m-9", "ops", "bob", "sitestatus");
    assert!(!checker.process(&msg).await.unwrap());

    let msg = InboundMessage::new("m-10", "ops", "bob", "health");
    assert!(checker.process(&msg).await.unwrap());
    assert_eq!(host.reply_texts(), vec!["[b] 200 OK"]);
}

#[test]
fn test_invalid_site_url_rejected() {
    let config = site_config(&[("bad", "asdfasdfas")]);
    let probe = FakeProbe {
        responses: HashMap::new(),
    };
    let result = SiteChecker::new(
        &config,
        4,
        Duration::from_secs(1),
        Arc::new(probe),
        Notifier::new(Arc::new(RecordingHost::default())),
    );
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn test_bad_template_rejected_at_construction() {
    let mut config = mr_config();
    config.response_template = "{{.title".into();
    let result = MergeRequestWatcher::new(
        &config,
        4,
        Arc::new(FakeSource::default()),
        Notifier::new(Arc::new(RecordingHost::default())),
    );
    assert!(matches!(result, Err(AppError::Template(_))));
}
