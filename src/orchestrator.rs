//! Ingestion Orchestrator
//!
//! Drives one scheduled run:
//! 1. validate every stanza before touching the secure store
//! 2. per instance, resolve the app credential and the user credentials
//! 3. per credential, compute the window, fetch, flush and checkpoint
//!
//! A credential's events are held until its fetch succeeds, so a failed
//! fetch writes nothing and the next run retries the same window.
//!
//! A failing credential is recorded and the next one proceeds. Store
//! failures, a missing app credential and checkpoint write failures end the
//! run.

use crate::checkpoint::{CheckpointError, CheckpointKey, CheckpointStore, ResumePoint};
use crate::config::{Config, ProvidersConfig, DEFAULT_MANAGEMENT_URL};
use crate::credentials::{
    AppCredential, CredentialError, CredentialRepository, SecureStore, StoreSession, UserCredential,
};
use crate::modinput::{ConfigurationError, InputConfig, PollingInstance};
use crate::output::{EventSink, PendingEvents};
use crate::providers::{
    FetchError, FetchWindow, Provider, ProviderClient, StaticRegistry, StrategyError,
    StrategyResolver,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::Instrument;

/// Errors that end a run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Credential resolution failed: {0}")]
    CredentialResolution(#[from] CredentialError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Errors confined to one credential, except `Checkpoint`
#[derive(Debug, thiserror::Error)]
enum PollError {
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// State shared by every operation on one polling instance
pub struct RunContext<'a> {
    pub instance: &'a PollingInstance,
    pub session: StoreSession,
    pub checkpoints: &'a CheckpointStore,
    pub sink: &'a mut dyn EventSink,
}

/// A credential fetched and checkpointed successfully
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedCredential {
    pub credential: String,
    /// `stored`, `first_run` or `recovered`
    pub resumed_from: &'static str,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub checkpoint: DateTime<Utc>,
    pub events: usize,
}

/// A credential skipped for this run
#[derive(Debug, Clone, Serialize)]
pub struct CredentialFailure {
    pub credential: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub name: String,
    pub provider: Provider,
    pub processed: Vec<ProcessedCredential>,
    pub failures: Vec<CredentialFailure>,
}

/// Outcome of a run that was not aborted
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub instances: Vec<InstanceReport>,
}

impl RunReport {
    pub fn failure_count(&self) -> usize {
        self.instances.iter().map(|i| i.failures.len()).sum()
    }

    pub fn processed_count(&self) -> usize {
        self.instances.iter().map(|i| i.processed.len()).sum()
    }

    /// True when no credential failed
    pub fn is_success(&self) -> bool {
        self.failure_count() == 0
    }
}

fn resume_label(resume: &ResumePoint) -> &'static str {
    match resume {
        ResumePoint::Stored(_) => "stored",
        ResumePoint::FirstRun(_) => "first_run",
        ResumePoint::Recovered(_) => "recovered",
    }
}

/// Runs every configured polling instance
pub struct IngestionOrchestrator<S, R = StaticRegistry> {
    credentials: CredentialRepository<S>,
    resolver: R,
    providers: ProvidersConfig,
    corrupt_fallback: Duration,
    management_url: Option<String>,
}

impl<S: SecureStore, R: StrategyResolver> IngestionOrchestrator<S, R> {
    pub fn new(store: S, resolver: R, config: &Config) -> Self {
        Self {
            credentials: CredentialRepository::new(store),
            resolver,
            providers: config.providers.clone(),
            corrupt_fallback: config.checkpoint.corrupt_fallback(),
            management_url: config.splunk.management_url.clone(),
        }
    }

    /// Management URL for store queries: settings override, then the host's
    /// `server_uri`, then the local default
    fn management_url(&self, input: &InputConfig) -> String {
        self.management_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| Some(input.server_uri.clone()).filter(|url| !url.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_MANAGEMENT_URL.to_string())
    }

    /// Execute one scheduled run, writing events to `sink`
    pub async fn run(
        &self,
        input: &InputConfig,
        sink: &mut dyn EventSink,
    ) -> Result<RunReport, RunError> {
        let instances = input.validate()?;
        let checkpoints = CheckpointStore::new(&input.checkpoint_dir, self.corrupt_fallback);
        let management_url = self.management_url(input);

        tracing::info!(
            instances = instances.len(),
            checkpoint_dir = ?checkpoints.dir(),
            "Configuration validated"
        );

        let mut report = RunReport::default();

        for instance in &instances {
            let mut ctx = RunContext {
                instance,
                session: StoreSession {
                    management_url: management_url.clone(),
                    session_key: input.session_key.clone(),
                    verify_tls: instance.force_cert_validation,
                },
                checkpoints: &checkpoints,
                sink: &mut *sink,
            };

            let span = tracing::info_span!(
                "instance",
                instance = %instance.name,
                provider = %instance.provider
            );
            let instance_report = self.poll_instance(&mut ctx).instrument(span).await?;
            report.instances.push(instance_report);
        }

        Ok(report)
    }

    async fn poll_instance(&self, ctx: &mut RunContext<'_>) -> Result<InstanceReport, RunError> {
        let provider = ctx.instance.provider;

        let app = self
            .credentials
            .app_credential(provider, &ctx.session)
            .await?
            .ok_or(CredentialError::MissingAppCredential { provider })?;

        let resolved = self
            .credentials
            .user_credentials(provider, &ctx.session)
            .await?;

        let mut report = InstanceReport {
            name: ctx.instance.name.clone(),
            provider,
            processed: Vec::new(),
            failures: Vec::new(),
        };

        for rejected in resolved.rejected {
            tracing::warn!(error = %rejected, "Skipping stored credential");
            let credential = match &rejected {
                CredentialError::Decode { entry, .. } => entry.clone(),
                _ => String::new(),
            };
            report.failures.push(CredentialFailure {
                credential,
                reason: rejected.to_string(),
            });
        }

        if resolved.credentials.is_empty() {
            tracing::info!("No stored credentials for provider, nothing to poll");
            return Ok(report);
        }

        for credential in &resolved.credentials {
            let span = tracing::info_span!("credential", credential = %credential.name);
            match self
                .poll_credential(ctx, credential, &app)
                .instrument(span)
                .await
            {
                Ok(processed) => report.processed.push(processed),
                Err(PollError::Checkpoint(e)) => {
                    tracing::error!(credential = %credential.name, error = %e, "Checkpoint write failed");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::error!(
                        credential = %credential.name,
                        error = %e,
                        "Polling failed, continuing with next credential"
                    );
                    report.failures.push(CredentialFailure {
                        credential: credential.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn poll_credential(
        &self,
        ctx: &mut RunContext<'_>,
        credential: &UserCredential,
        app: &AppCredential,
    ) -> Result<ProcessedCredential, PollError> {
        let provider = ctx.instance.provider;
        let mut client =
            ProviderClient::new(provider, credential, app, self.providers.endpoint(provider))?;

        let key = CheckpointKey::for_credential(&ctx.instance.name, &credential.name);
        let now = Utc::now();
        let resume = ctx.checkpoints.resume_point(&key, now);
        let window = FetchWindow::new(resume.timestamp(), now);

        let strategy = self.resolver.resolve(provider, window)?;

        tracing::debug!(start = %window.start(), end = %window.end(), "Fetching window");
        let mut pending = PendingEvents::new();
        let fetched_through = strategy.get_data(&mut client, &mut pending).await?;
        let events = pending.commit(&mut *ctx.sink).map_err(FetchError::Output)?;
        ctx.sink.flush().map_err(FetchError::Output)?;

        let checkpoint = fetched_through.max(window.start());
        ctx.checkpoints.write(&key, checkpoint)?;

        tracing::info!(checkpoint = %checkpoint, events, "Credential polled");

        Ok(ProcessedCredential {
            credential: credential.name.clone(),
            resumed_from: resume_label(&resume),
            window_start: window.start(),
            window_end: window.end(),
            checkpoint,
            events,
        })
    }
}
