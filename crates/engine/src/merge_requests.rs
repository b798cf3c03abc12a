//! Merge request watcher.
//!
//! Background cycle: fetch every open merge request, keep the ones whose
//! `(iid, project_id)` has not been seen by this process, and broadcast one
//! templated message per new item to the configured room.
//!
//! On-demand path: a message containing the command keyword gets the
//! requester's assigned merge requests as replies, followed by a summary.
//! This path reads the remote state directly and never touches the tracker.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use chatwatch_common::config::MergeRequestConfig;
use chatwatch_common::error::AppError;
use chatwatch_common::types::{InboundMessage, MergeRequest, MrIdentity};
use chatwatch_fetcher::MergeRequestSource;
use chatwatch_notifier::{Destination, MessageTemplate, Notifier};

use crate::Worker;
use crate::poller::Poller;
use crate::tracker::DedupTracker;

pub const WORKER_ID: &str = "GITLABMERGEREQUEST";

pub const DEFAULT_COMMAND: &str = "mergerequest";

pub const DEFAULT_NOTIFY_TEMPLATE: &str =
    "New MergeRequest !{{.iid}} {{.title}} in {{.project.name_with_namespace}} {{.web_url}}";

pub const DEFAULT_RESPONSE_TEMPLATE: &str =
    "!{{.iid}} {{.title}} ({{.project.name_with_namespace}}) {{.web_url}}";

pub const NO_MERGE_REQUESTS_REPLY: &str =
    "Congratulation!! (=￣ω￣=) You don't have any MergeRequest.";

#[derive(Clone)]
pub struct MergeRequestWatcher {
    source: Arc<dyn MergeRequestSource>,
    notifier: Notifier,
    notify_template: Arc<MessageTemplate>,
    response_template: Arc<MessageTemplate>,
    command: Arc<str>,
    chat_room: Arc<str>,
    poller: Arc<Poller>,
    tracker: Arc<Mutex<DedupTracker<MrIdentity>>>,
    permits: Arc<Semaphore>,
}

impl MergeRequestWatcher {
    pub fn new(
        config: &MergeRequestConfig,
        max_in_flight: usize,
        source: Arc<dyn MergeRequestSource>,
        notifier: Notifier,
    ) -> Result<Self, AppError> {
        let notify_template = MessageTemplate::compile_or_default(
            "noti",
            &config.notify_template,
            DEFAULT_NOTIFY_TEMPLATE,
        )?;
        let response_template = MessageTemplate::compile_or_default(
            "resp",
            &config.response_template,
            DEFAULT_RESPONSE_TEMPLATE,
        )?;
        for template in [&notify_template, &response_template] {
            let capitalized = capitalized_fields(template);
            if !capitalized.is_empty() {
                tracing::warn!(
                    worker = WORKER_ID,
                    template = template.name(),
                    fields = ?capitalized,
                    "Template reads capitalized fields; merge request fields are snake_case \
                     (.title, .web_url, .project.name_with_namespace) and these will not render"
                );
            }
        }

        let command = if config.command.is_empty() {
            DEFAULT_COMMAND
        } else {
            config.command.as_str()
        };

        tracing::info!(
            worker = WORKER_ID,
            projects = config.projects.len(),
            polling_interval_secs = config.polling_interval.as_secs(),
            notify_interval_secs = config.notify_interval.as_secs(),
            command,
            chat_room = %config.chat_room,
            "Merge request watcher configured"
        );

        Ok(Self {
            source,
            notifier,
            notify_template: Arc::new(notify_template),
            response_template: Arc::new(response_template),
            command: command.into(),
            chat_room: config.chat_room.as_str().into(),
            poller: Arc::new(Poller::new(WORKER_ID, config.polling_interval)),
            tracker: Arc::new(Mutex::new(DedupTracker::new())),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Substring match, so `"mergerequest please"` triggers too.
    pub fn matches_command(&self, text: &str) -> bool {
        text.contains(&*self.command)
    }

    pub fn is_running(&self) -> bool {
        self.poller.is_running()
    }

    pub async fn tracked_count(&self) -> usize {
        self.tracker.lock().await.len()
    }

    /// Fetch and classify. Returns the merge requests not seen before, now
    /// marked as seen.
    ///
    /// A fetch error leaves the tracker untouched.
    pub async fn poll_new(&self) -> Result<Vec<MergeRequest>, AppError> {
        tracing::info!(worker = WORKER_ID, "Start check new merge requests");
        let merge_requests = self.source.fetch_all().await?;

        let mut tracker = self.tracker.lock().await;
        let new = tracker.classify(merge_requests, MergeRequest::identity);
        for mr in &new {
            tracing::info!(
                worker = WORKER_ID,
                iid = mr.iid,
                project_id = mr.project_id,
                title = %mr.title,
                "New merge request"
            );
        }
        tracing::debug!(worker = WORKER_ID, tracked = tracker.len(), "Tracked merge requests");

        Ok(new)
    }

    /// Broadcast one notification per merge request to the room.
    ///
    /// Project lookups run concurrently, capped by the worker's permit pool;
    /// messages then go out one at a time in discovery order. Returns how
    /// many were delivered; the rest were logged and dropped.
    pub async fn notify_new(&self, merge_requests: Vec<MergeRequest>) -> usize {
        let destination = Destination::Room(self.chat_room.to_string());
        let mut enriched: Vec<Option<MergeRequest>> =
            merge_requests.iter().map(|_| None).collect();
        let mut tasks = JoinSet::new();

        for (index, mr) in merge_requests.into_iter().enumerate() {
            let watcher = self.clone();
            tasks.spawn(async move {
                let Ok(_permit) = watcher.permits.clone().acquire_owned().await else {
                    return (index, None);
                };
                (index, watcher.enrich(mr).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, mr)) => enriched[index] = mr,
                Err(e) => {
                    tracing::error!(worker = WORKER_ID, error = %e, "Project lookup task failed")
                }
            }
        }

        let mut delivered = 0;
        for mr in enriched.into_iter().flatten() {
            if self
                .notifier
                .render_and_deliver(&self.notify_template, &mr, &destination)
                .await
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Attach project metadata. `None` when the lookup fails, which drops
    /// this message only.
    async fn enrich(&self, mut mr: MergeRequest) -> Option<MergeRequest> {
        match self.source.project(mr.project_id).await {
            Ok(project) => {
                mr.project = Some(project);
                Some(mr)
            }
            Err(e) => {
                tracing::error!(
                    worker = WORKER_ID,
                    iid = mr.iid,
                    project_id = mr.project_id,
                    error = %e,
                    "Get project info failed"
                );
                None
            }
        }
    }

    /// Reply with every merge request assigned to `user`, then a summary.
    ///
    /// Always ends with exactly one summary reply. Returns the match count.
    pub async fn reply_assigned(
        &self,
        merge_requests: Vec<MergeRequest>,
        message: &InboundMessage,
        user: &str,
    ) -> usize {
        tracing::debug!(worker = WORKER_ID, user, "Finding merge requests for user");
        let destination = Destination::Reply(message.clone());

        let mut count = 0;
        for mr in merge_requests.into_iter().filter(|mr| mr.is_assigned_to(user)) {
            tracing::debug!(worker = WORKER_ID, user, iid = mr.iid, "Found merge request for user");
            if let Some(mr) = self.enrich(mr).await {
                self.notifier
                    .render_and_deliver(&self.response_template, &mr, &destination)
                    .await;
            }
            count += 1;
        }

        let summary = if count == 0 {
            NO_MERGE_REQUESTS_REPLY.to_string()
        } else {
            format!("@{user}. You have {count} Merge Requests.")
        };
        self.notifier.deliver(&destination, &summary).await;
        count
    }
}

#[async_trait]
impl Worker for MergeRequestWatcher {
    fn id(&self) -> &'static str {
        WORKER_ID
    }

    fn start(&self) -> bool {
        let watcher = self.clone();
        self.poller.start(move || {
            let watcher = watcher.clone();
            async move {
                let new = watcher.poll_new().await?;
                if !new.is_empty() {
                    let sender = watcher.clone();
                    tokio::spawn(async move {
                        sender.notify_new(new).await;
                    });
                }
                Ok(())
            }
        })
    }

    async fn process(&self, message: &InboundMessage) -> Result<bool, AppError> {
        tracing::debug!(worker = WORKER_ID, message_id = %message.id, "Got new message");
        let user = message.sender().ok_or_else(|| {
            AppError::InvalidMessage(format!("[{WORKER_ID}] message {} has no sender", message.id))
        })?;
        if !self.matches_command(&message.text) {
            return Ok(false);
        }

        tracing::info!(worker = WORKER_ID, user, text = %message.text, "Process message");
        let destination = Destination::Reply(message.clone());
        self.notifier
            .deliver(
                &destination,
                &format!("Checking MergeRequest for {user}. Please wait"),
            )
            .await;

        let merge_requests = self.source.fetch_all().await?;
        tracing::debug!(worker = WORKER_ID, count = merge_requests.len(), "Got merge requests");
        self.reply_assigned(merge_requests, message, user).await;
        Ok(true)
    }
}

/// Field paths whose first segment starts uppercase. Merge request payloads
/// carry GitLab's snake_case names, so such a path never resolves.
fn capitalized_fields(template: &MessageTemplate) -> Vec<String> {
    template
        .field_paths()
        .filter(|path| path.starts_with(|c: char| c.is_ascii_uppercase()))
        .collect()
}
