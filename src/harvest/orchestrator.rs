//! Top-level harvest driver.
//!
//! `Identify` (best-effort) → `ListSets` → per set: filter, then page through
//! `ListRecords` under the retry policy, archiving every page and saving a
//! checkpoint after each one → `latest.txt` → report.
//!
//! Sets are processed sequentially and pages within a set strictly in order,
//! so the orchestrator is the single writer of both the checkpoint and the
//! set statuses.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{Local, NaiveDate, Utc};
use tracing::{debug, error, info, instrument, warn};

use super::error::HarvestError;
use super::filter::{FilterDecision, SetFilter};
use super::report::{HarvestReport, JobOutcome};
use super::retry::RetryPolicy;
use super::tracker::{SetPhase, SetStatus};
use crate::checkpoint::{Checkpoint, CheckpointStore, ResumePoint};
use crate::config::RepositoryConfig;
use crate::protocol::{OaiClient, PageResult, SetDescriptor, verb};
use crate::sink::{CONTENT_TYPE_TEXT, CONTENT_TYPE_XML, PageLayout, Sink};

/// How the per-set loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetRun {
    /// The set reached `Exhausted` or `Failed`.
    Terminal,
    /// Cancellation was observed before the next page.
    Interrupted,
}

/// Checkpoint state owned by one run.
struct Progress {
    checkpoint: Checkpoint,
    /// Restored position of a set this run has not reached yet. It is what
    /// every save records as `current` until that set starts, so re-harvesting
    /// earlier sets cannot overwrite it.
    pending: Option<ResumePoint>,
    save_failures: u32,
}

impl Progress {
    fn record_position(&mut self, point: Option<ResumePoint>) {
        self.checkpoint.current = self.pending.clone().or(point);
    }
}

/// Drives one harvest job against one repository.
pub struct Harvester {
    config: RepositoryConfig,
    client: OaiClient,
    retry: RetryPolicy,
    filter: SetFilter,
    sink: Arc<dyn Sink>,
    checkpoints: Arc<dyn CheckpointStore>,
    harvest_date: Option<NaiveDate>,
}

impl Harvester {
    /// Creates a harvester with the given sink and checkpoint strategies.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Repository`] if the HTTP client cannot be
    /// built.
    pub fn new(
        config: RepositoryConfig,
        sink: Arc<dyn Sink>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self, HarvestError> {
        let client = OaiClient::from_config(&config)
            .map_err(|e| HarvestError::repository(config.base_url().as_str(), e))?;
        Ok(Self {
            retry: RetryPolicy::from_config(&config),
            filter: SetFilter::from_config(&config),
            config,
            client,
            sink,
            checkpoints,
            harvest_date: None,
        })
    }

    /// Fixes the harvest date instead of using today's local date.
    ///
    /// A restored checkpoint's date still takes precedence so a resumed run
    /// stays in its original partition.
    #[must_use]
    pub fn with_harvest_date(mut self, date: NaiveDate) -> Self {
        self.harvest_date = Some(date);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Runs the job to completion.
    ///
    /// # Errors
    ///
    /// See [`Harvester::run_interruptible`].
    pub async fn run(&self) -> Result<HarvestReport, HarvestError> {
        self.run_interruptible(Arc::new(AtomicBool::new(false)))
            .await
    }

    /// Runs the job, checking `interrupted` before every page request and
    /// while waiting between retry attempts.
    ///
    /// Per-set failures are recorded in the report, never returned.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Repository`] if the set list cannot be
    /// obtained, and [`HarvestError::Tracker`] on an internal state machine
    /// violation.
    #[instrument(skip(self, interrupted), fields(base_url = %self.config.base_url(), repo = %self.config.repo_prefix()))]
    pub async fn run_interruptible(
        &self,
        interrupted: Arc<AtomicBool>,
    ) -> Result<HarvestReport, HarvestError> {
        let started = Instant::now();
        let restored = self.load_checkpoint().await;
        let harvest_date = self.resolve_harvest_date(restored.as_ref());
        let layout = PageLayout::new(
            self.config.repo_prefix(),
            self.config.metadata_prefix(),
            harvest_date,
        );

        let repository_name = self.identify().await;
        self.check_metadata_format().await;
        let sets = self.discover_sets(&interrupted).await?;

        let (mut finished, pending) = match restored {
            Some(checkpoint) => (checkpoint.finished, checkpoint.current),
            None => (Vec::new(), None),
        };
        let mut progress = Progress {
            checkpoint: Checkpoint::new(
                self.config.repo_prefix(),
                self.config.metadata_prefix(),
                harvest_date,
            ),
            pending,
            save_failures: 0,
        };
        progress.checkpoint.finished.clone_from(&finished);

        let mut statuses = Vec::with_capacity(sets.len());
        let mut was_interrupted = false;

        for set in &sets {
            if interrupted.load(Ordering::SeqCst) {
                was_interrupted = true;
                break;
            }

            let mut status = SetStatus::new(set);
            if let FilterDecision::Skip(reason) = self.filter.decide(set) {
                info!(set = %set.spec, ?reason, "set filtered");
                status.filter(reason)?;
                statuses.push(status);
                continue;
            }

            if let Some(position) = finished
                .iter()
                .position(|done| done.identifier() == set.spec)
            {
                info!(set = %set.spec, "set completed in previous run, skipping");
                statuses.push(finished.remove(position));
                continue;
            }

            let resume_point = progress.pending.take_if(|point| point.set == set.spec);
            let set_started = Instant::now();
            let run = self
                .harvest_set(
                    set,
                    &mut status,
                    resume_point.as_ref(),
                    &layout,
                    &mut progress,
                    &interrupted,
                )
                .await?;
            status.set_elapsed(set_started.elapsed());

            if run == SetRun::Interrupted {
                statuses.push(status);
                was_interrupted = true;
                break;
            }

            if status.phase() == SetPhase::Exhausted {
                info!(
                    set = %set.spec,
                    files = status.files(),
                    records = status.records(),
                    elapsed_ms = status.elapsed_ms(),
                    "set complete"
                );
                progress.checkpoint.finished.push(status.clone());
                progress.record_position(None);
                self.save_checkpoint(&mut progress).await;
                statuses.push(status);
            } else {
                warn!(
                    set = %set.spec,
                    error = status.error().unwrap_or_default(),
                    "set failed"
                );
                statuses.push(status);
                if self.config.fail_on_error() {
                    warn!("fail-on-error set; not scheduling further sets");
                    break;
                }
            }
        }

        let any_failed = statuses
            .iter()
            .any(|status| status.phase() == SetPhase::Failed);
        let mut job_error = None;
        let outcome = if was_interrupted {
            warn!("harvest interrupted; checkpoint retained, run again to resume");
            JobOutcome::Interrupted
        } else if self.config.fail_on_error() && any_failed {
            JobOutcome::Failed
        } else {
            let latest = layout.latest_path();
            match self
                .sink
                .put(&latest, layout.latest_contents().as_bytes(), CONTENT_TYPE_TEXT)
                .await
            {
                Ok(()) => {
                    if let Err(e) = self.checkpoints.clear().await {
                        warn!(error = %e, "failed to clear checkpoint");
                    }
                    JobOutcome::Success
                }
                Err(e) => {
                    error!(path = %latest, error = %e, "failed to write latest pointer");
                    job_error = Some(format!("failed to write {latest}: {e}"));
                    JobOutcome::Failed
                }
            }
        };

        let report = HarvestReport {
            repository_name,
            base_url: self.config.base_url().to_string(),
            metadata_prefix: self.config.metadata_prefix().to_string(),
            harvest_date,
            outcome,
            elapsed: started.elapsed(),
            sets: statuses,
            job_error,
            checkpoint_save_failures: progress.save_failures,
        };
        info!(
            outcome = %report.outcome,
            sets = report.sets.len(),
            failed = report.failed_count(),
            checkpoint_save_failures = report.checkpoint_save_failures,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "harvest finished"
        );
        Ok(report)
    }

    async fn harvest_set(
        &self,
        set: &SetDescriptor,
        status: &mut SetStatus,
        resume: Option<&ResumePoint>,
        layout: &PageLayout,
        progress: &mut Progress,
        interrupted: &AtomicBool,
    ) -> Result<SetRun, HarvestError> {
        status.begin(resume)?;
        info!(set = %set.spec, resumed = resume.is_some(), "harvesting set");

        loop {
            if interrupted.load(Ordering::SeqCst) {
                info!(set = %set.spec, pages = status.pages(), "interrupt requested, stopping before next page");
                return Ok(SetRun::Interrupted);
            }

            let token = status.token().map(str::to_string);
            let result = self
                .retry
                .run_interruptible(verb::LIST_RECORDS, interrupted, || {
                    self.client.list_records(Some(set), token.as_deref())
                })
                .await;

            let page = match result {
                Ok(PageResult::Records(page)) => page,
                Ok(PageResult::EmptySet) => {
                    debug!(set = %set.spec, "noRecordsMatch");
                    status.exhaust_empty()?;
                    return Ok(SetRun::Terminal);
                }
                Ok(PageResult::ProtocolError { code, message }) => {
                    status.fail(format!("OAI-PMH error {code}: {message}"))?;
                    return Ok(SetRun::Terminal);
                }
                Err(e) if interrupted.load(Ordering::SeqCst) => {
                    info!(set = %set.spec, error = %e, "interrupt requested during retry back-off");
                    return Ok(SetRun::Interrupted);
                }
                Err(e) => {
                    status.fail(e.to_string())?;
                    return Ok(SetRun::Terminal);
                }
            };

            let sequence = status.accept_records(&page)?;
            let path = layout.page_path(&set.spec, sequence);
            if let Err(e) = self.sink.put(&path, &page.raw, CONTENT_TYPE_XML).await {
                status.fail(format!("sink error: {e}"))?;
                return Ok(SetRun::Terminal);
            }
            status.page_written()?;
            debug!(
                set = %set.spec,
                sequence,
                path = %path,
                records = page.record_count,
                cursor = status.cursor(),
                size = status.size(),
                "page archived"
            );

            match status.resume_point() {
                Some(point) => {
                    progress.record_position(Some(point));
                    self.save_checkpoint(progress).await;
                }
                None => return Ok(SetRun::Terminal),
            }
        }
    }

    async fn load_checkpoint(&self) -> Option<Checkpoint> {
        match self.checkpoints.load().await {
            Ok(Some(checkpoint))
                if checkpoint.matches(self.config.repo_prefix(), self.config.metadata_prefix()) =>
            {
                info!(
                    harvest_date = %checkpoint.harvest_date,
                    current = checkpoint.current.as_ref().map_or("", |point| point.set.as_str()),
                    finished = checkpoint.finished.len(),
                    "resuming from checkpoint"
                );
                Some(checkpoint)
            }
            Ok(Some(checkpoint)) => {
                warn!(
                    repo = %checkpoint.repo_prefix,
                    metadata_prefix = %checkpoint.metadata_prefix,
                    "checkpoint belongs to a different job, ignoring"
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable checkpoint, starting fresh");
                None
            }
        }
    }

    async fn save_checkpoint(&self, progress: &mut Progress) {
        progress.checkpoint.saved_at = Utc::now();
        if let Err(e) = self.checkpoints.save(&progress.checkpoint).await {
            progress.save_failures += 1;
            warn!(error = %e, failures = progress.save_failures, "failed to save checkpoint");
        }
    }

    fn resolve_harvest_date(&self, restored: Option<&Checkpoint>) -> NaiveDate {
        match (restored, self.harvest_date) {
            (Some(checkpoint), Some(requested)) if checkpoint.harvest_date != requested => {
                warn!(
                    checkpoint = %checkpoint.harvest_date,
                    requested = %requested,
                    "keeping the interrupted run's harvest date"
                );
                checkpoint.harvest_date
            }
            (Some(checkpoint), _) => checkpoint.harvest_date,
            (None, Some(requested)) => requested,
            (None, None) => Local::now().date_naive(),
        }
    }

    /// Single attempt; the repository name is only used in the report.
    async fn identify(&self) -> Option<String> {
        match self.client.identify().await {
            Ok(info) if !info.repository_name.is_empty() => {
                info!(
                    repository = %info.repository_name,
                    protocol_version = %info.protocol_version,
                    granularity = %info.granularity,
                    "identified repository"
                );
                Some(info.repository_name)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Identify failed, continuing");
                None
            }
        }
    }

    async fn check_metadata_format(&self) {
        match self.client.list_metadata_formats().await {
            Ok(formats)
                if !formats.is_empty()
                    && !formats
                        .iter()
                        .any(|format| format.metadata_prefix == self.config.metadata_prefix()) =>
            {
                let advertised: Vec<&str> = formats
                    .iter()
                    .map(|format| format.metadata_prefix.as_str())
                    .collect();
                warn!(
                    metadata_prefix = %self.config.metadata_prefix(),
                    advertised = ?advertised,
                    "repository does not advertise the requested metadata prefix"
                );
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "ListMetadataFormats failed, continuing"),
        }
    }

    async fn discover_sets(
        &self,
        interrupted: &AtomicBool,
    ) -> Result<Vec<SetDescriptor>, HarvestError> {
        let sets = self
            .retry
            .run_interruptible(verb::LIST_SETS, interrupted, || self.client.list_sets())
            .await
            .map_err(|e| HarvestError::repository(self.config.base_url().as_str(), e))?;

        if sets.is_empty() {
            info!("repository exposes no sets, harvesting the default set");
            return Ok(vec![SetDescriptor::default_set()]);
        }
        info!(count = sets.len(), "discovered sets");
        Ok(sets)
    }
}
