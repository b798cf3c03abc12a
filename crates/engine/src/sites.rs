//! Site checker.
//!
//! Every interval each configured site is probed in its own task. Only
//! failures reach the room: a non-200 response is rendered with the fail
//! template, a transport error with a fixed message. Checks are isolated;
//! one site erroring or hanging does not delay or suppress another's report.
//!
//! The status command re-runs every check and replies with the status
//! template for each site, including healthy ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use chatwatch_common::config::SiteCheckConfig;
use chatwatch_common::error::AppError;
use chatwatch_common::types::{
    InboundMessage, SiteCheckOutcome, SiteCheckResult, SitePayload, SiteTarget,
};
use chatwatch_fetcher::{SiteProbe, is_url};
use chatwatch_notifier::{Destination, MessageTemplate, Notifier};

use crate::Worker;
use crate::poller::Poller;

pub const WORKER_ID: &str = "SITECHECKER";

pub const DEFAULT_COMMAND: &str = "sitestatus";

pub const DEFAULT_FAIL_TEMPLATE: &str =
    "{{.SiteName}} is dead!!! Status {{.StatusCode}} {{.SiteUrl}}";

pub const DEFAULT_STATUS_TEMPLATE: &str = "{{.SiteName}} status {{.StatusCode}} {{.SiteUrl}}";

/// Which outcomes produce a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// Background cycle: everything except a 200.
    FailuresOnly,
    /// Status command: every site.
    All,
}

#[derive(Clone)]
pub struct SiteChecker {
    probe: Arc<dyn SiteProbe>,
    notifier: Notifier,
    fail_template: Arc<MessageTemplate>,
    status_template: Arc<MessageTemplate>,
    sites: Arc<[SiteTarget]>,
    command: Arc<str>,
    chat_room: Arc<str>,
    poller: Arc<Poller>,
    permits: Arc<Semaphore>,
    check_timeout: Duration,
}

impl SiteChecker {
    pub fn new(
        config: &SiteCheckConfig,
        max_in_flight: usize,
        check_timeout: Duration,
        probe: Arc<dyn SiteProbe>,
        notifier: Notifier,
    ) -> Result<Self, AppError> {
        if config.sites.is_empty() {
            return Err(AppError::Config(format!("{WORKER_ID} sites can not be empty")));
        }
        let mut sites = Vec::with_capacity(config.sites.len());
        for (name, url) in &config.sites {
            if !is_url(url) {
                return Err(AppError::Config(format!(
                    "{WORKER_ID} site {name} has invalid url {url:?}"
                )));
            }
            sites.push(SiteTarget {
                name: name.clone(),
                url: url.clone(),
            });
        }

        let fail_template = MessageTemplate::compile_or_default(
            "sitechecker-fail",
            &config.fail_template,
            DEFAULT_FAIL_TEMPLATE,
        )?;
        let status_template = MessageTemplate::compile_or_default(
            "sitechecker-status",
            &config.status_template,
            DEFAULT_STATUS_TEMPLATE,
        )?;
        let command = if config.command.is_empty() {
            DEFAULT_COMMAND
        } else {
            config.command.as_str()
        };

        tracing::info!(
            worker = WORKER_ID,
            sites = sites.len(),
            check_interval_secs = config.check_interval.as_secs(),
            command,
            chat_room = %config.chat_room,
            "Site checker configured"
        );

        Ok(Self {
            probe,
            notifier,
            fail_template: Arc::new(fail_template),
            status_template: Arc::new(status_template),
            sites: sites.into(),
            command: command.into(),
            chat_room: config.chat_room.as_str().into(),
            poller: Arc::new(Poller::new(WORKER_ID, config.check_interval)),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            check_timeout,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn matches_command(&self, text: &str) -> bool {
        text.contains(&*self.command)
    }

    pub fn is_running(&self) -> bool {
        self.poller.is_running()
    }

    /// Check every site concurrently and report each outcome per `mode`.
    ///
    /// Returns all outcomes, in completion order.
    pub async fn check_all(
        &self,
        mode: ReportMode,
        destination: Destination,
    ) -> Vec<SiteCheckOutcome> {
        let mut tasks = JoinSet::new();
        for target in self.sites.iter().cloned() {
            let checker = self.clone();
            let destination = destination.clone();
            tasks.spawn(async move {
                let _permit = checker.permits.clone().acquire_owned().await.ok();
                let outcome = checker.check_one(&target).await;
                checker.report(&outcome, mode, &destination).await;
                outcome
            });
        }

        let mut outcomes = Vec::with_capacity(self.sites.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(worker = WORKER_ID, error = %e, "Site check task failed"),
            }
        }
        outcomes
    }

    /// Probe one site, bounded by the check timeout.
    pub async fn check_one(&self, target: &SiteTarget) -> SiteCheckOutcome {
        let result =
            match tokio::time::timeout(self.check_timeout, self.probe.fetch_one(&target.url)).await
            {
                Ok(Ok(status)) => SiteCheckResult::Responded {
                    code: status.as_u16(),
                    status: status.to_string(),
                },
                Ok(Err(e)) => SiteCheckResult::TransportError(e.to_string()),
                Err(_) => {
                    SiteCheckResult::TransportError(AppError::Timeout(self.check_timeout).to_string())
                }
            };

        tracing::debug!(
            worker = WORKER_ID,
            site = %target.name,
            url = %target.url,
            result = ?result,
            "Checked site"
        );

        SiteCheckOutcome {
            name: target.name.clone(),
            url: target.url.clone(),
            result,
        }
    }

    /// Turn one outcome into at most one message. Returns whether one was sent.
    async fn report(
        &self,
        outcome: &SiteCheckOutcome,
        mode: ReportMode,
        destination: &Destination,
    ) -> bool {
        let status = match &outcome.result {
            SiteCheckResult::TransportError(err) => {
                tracing::warn!(worker = WORKER_ID, site = %outcome.name, error = %err, "Site check failed");
                let text = format!("Check site {} Fail. Error {}", outcome.name, err);
                return self.notifier.deliver(destination, &text).await;
            }
            SiteCheckResult::Responded { status, .. } => status,
        };

        let template = match mode {
            ReportMode::FailuresOnly if outcome.is_ok() => return false,
            ReportMode::FailuresOnly => &self.fail_template,
            ReportMode::All => &self.status_template,
        };

        let payload = SitePayload {
            site_name: outcome.name.clone(),
            site_url: outcome.url.clone(),
            status_code: status.clone(),
        };
        tracing::info!(worker = WORKER_ID, site = %outcome.name, status = %status, "Send message");
        self.notifier
            .render_and_deliver(template, &payload, destination)
            .await
    }
}

#[async_trait]
impl Worker for SiteChecker {
    fn id(&self) -> &'static str {
        WORKER_ID
    }

    fn start(&self) -> bool {
        let checker = self.clone();
        self.poller.start(move || {
            let checker = checker.clone();
            async move {
                tracing::info!(worker = WORKER_ID, sites = checker.sites.len(), "Start check sites");
                let destination = Destination::Room(checker.chat_room.to_string());
                tokio::spawn(async move {
                    checker.check_all(ReportMode::FailuresOnly, destination).await;
                });
                Ok(())
            }
        })
    }

    async fn process(&self, message: &InboundMessage) -> Result<bool, AppError> {
        if message.sender().is_none() {
            return Err(AppError::InvalidMessage(format!(
                "[{WORKER_ID}] message {} has no sender",
                message.id
            )));
        }

        // Any message wakes the background loop if it is not running yet.
        self.start();

        if !self.matches_command(&message.text) {
            return Ok(false);
        }

        tracing::info!(worker = WORKER_ID, text = %message.text, "Process message");
        self.check_all(ReportMode::All, Destination::Reply(message.clone()))
            .await;
        Ok(true)
    }
}
