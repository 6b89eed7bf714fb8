//! Session arena driving one runner per open playground snippet.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use super::RunnerRegistry;
use crate::config::PlaygroundConfig;
use crate::engine::Limits;
use crate::error::{HostError, HostResult};
use crate::runner::{ErrorLabel, ExecOutcome, Metadata, OutputSink, Runner};

/// Identifier of an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stage a run failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The program did not parse.
    Parse,
    /// The program failed while running.
    Exec,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Ran to its end.
    Completed,
    /// Stopped by [`Playground::abort`], [`Playground::switch_version`] or
    /// [`Playground::close`].
    Aborted,
    /// Failed to parse or to run.
    Failed {
        /// Where it failed.
        stage: Stage,
        /// Stable label; `None` when the error is not an engine error.
        label: Option<ErrorLabel>,
        /// Error text, when there is an error value.
        message: Option<String>,
    },
}

/// Result of [`Playground::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Release that handled the run.
    pub version: &'static str,
    /// Metadata declared by the program.
    #[serde(serialize_with = "metadata_entries")]
    pub metadata: Metadata,
    /// Outcome.
    pub outcome: RunOutcome,
}

/// Metadata keys may be absent, which JSON object keys cannot express.
fn metadata_entries<S: Serializer>(metadata: &Metadata, serializer: S) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Entry<'a> {
        name: Option<&'a str>,
        value: &'a serde_json::Value,
    }
    serializer.collect_seq(metadata.iter().map(|(name, value)| Entry {
        name: name.as_deref(),
        value,
    }))
}

/// Snapshot of an open session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Session id.
    pub id: SessionId,
    /// Release currently bound.
    pub version: &'static str,
    /// Open time.
    pub created_at: DateTime<Utc>,
}

struct Session {
    runner: Arc<dyn Runner>,
    sink: OutputSink,
    created_at: DateTime<Utc>,
}

/// Host selector: picks the release for each session and feeds it programs.
///
/// All methods take `&self` so that [`Playground::abort`] can be called while
/// [`Playground::run`] is pending on the same session.
pub struct Playground {
    registry: RunnerRegistry,
    default_version: &'static str,
    limits: Limits,
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl Playground {
    /// Create a playground over `registry`.
    pub fn new(registry: RunnerRegistry, config: &PlaygroundConfig) -> HostResult<Self> {
        let default_version = match &config.default_version {
            Some(version) => registry
                .versions()
                .into_iter()
                .find(|known| *known == version.as_str())
                .ok_or_else(|| HostError::UnknownVersion(version.clone()))?,
            None => registry.latest().ok_or(HostError::NoVersions)?,
        };
        Ok(Self {
            registry,
            default_version,
            limits: config.limits.clone(),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Release used by [`Playground::open`] when none is given.
    pub fn default_version(&self) -> &'static str {
        self.default_version
    }

    /// Registry backing this playground.
    pub fn registry(&self) -> &RunnerRegistry {
        &self.registry
    }

    /// Open a session bound to `version` (or the default) writing to `sink`.
    pub fn open(&self, version: Option<&str>, sink: OutputSink) -> HostResult<SessionId> {
        let version = version.unwrap_or(self.default_version);
        let runner = self.registry.create(version, Arc::clone(&sink), &self.limits)?;
        let id = SessionId::new();
        tracing::info!(session = %id, version = runner.version(), "session opened");
        self.sessions.write().insert(
            id,
            Session {
                runner: Arc::from(runner),
                sink,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    /// Parse and run `code` in a session. Engine failures are reported in the
    /// outcome, not as errors.
    pub async fn run(&self, id: SessionId, code: &str) -> HostResult<RunReport> {
        let runner = self.runner(id)?;
        let version = runner.version();

        let parsed = match runner.parse(code) {
            Ok(parsed) => parsed,
            Err(failure) => {
                let outcome = RunOutcome::Failed {
                    stage: Stage::Parse,
                    label: failure.error().and_then(|err| runner.classify_error(err)),
                    message: failure.error().map(|err| err.to_string()),
                };
                tracing::debug!(session = %id, version, ?outcome, "run rejected");
                return Ok(RunReport {
                    version,
                    metadata: Metadata::new(),
                    outcome,
                });
            }
        };

        let outcome = match runner.exec(&parsed.tree).await {
            Ok(ExecOutcome::Completed) => RunOutcome::Completed,
            Ok(ExecOutcome::Aborted) => RunOutcome::Aborted,
            Err(err) => RunOutcome::Failed {
                stage: Stage::Exec,
                label: runner.classify_error(&err),
                message: Some(err.to_string()),
            },
        };
        tracing::debug!(session = %id, version, ?outcome, "run finished");
        Ok(RunReport {
            version,
            metadata: parsed.metadata,
            outcome,
        })
    }

    /// Stop whatever the session is running. The session stays open with a
    /// fresh runner of the same release.
    pub fn abort(&self, id: SessionId) -> HostResult<()> {
        let version = self.runner(id)?.version();
        self.rebind(id, version)?;
        tracing::info!(session = %id, version, "session aborted");
        Ok(())
    }

    /// Rebind a session to another release, stopping any running program.
    pub fn switch_version(&self, id: SessionId, version: &str) -> HostResult<()> {
        self.rebind(id, version)?;
        tracing::info!(session = %id, version, "session switched");
        Ok(())
    }

    /// Close a session, stopping any running program.
    pub fn close(&self, id: SessionId) -> HostResult<()> {
        let session = self
            .sessions
            .write()
            .remove(&id)
            .ok_or(HostError::UnknownSession(id))?;
        session.runner.dispose();
        tracing::info!(session = %id, "session closed");
        Ok(())
    }

    /// Open sessions, oldest first.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .iter()
            .map(|(id, session)| SessionInfo {
                id: *id,
                version: session.runner.version(),
                created_at: session.created_at,
            })
            .collect();
        sessions.sort_by_key(|info| info.created_at);
        sessions
    }

    fn runner(&self, id: SessionId) -> HostResult<Arc<dyn Runner>> {
        self.sessions
            .read()
            .get(&id)
            .map(|session| Arc::clone(&session.runner))
            .ok_or(HostError::UnknownSession(id))
    }

    /// Replace a session's runner with a new one for `version`, disposing the
    /// old runner. The session keeps its sink.
    fn rebind(&self, id: SessionId, version: &str) -> HostResult<()> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&id).ok_or(HostError::UnknownSession(id))?;
        let runner = self
            .registry
            .create(version, Arc::clone(&session.sink), &self.limits)?;
        let old = std::mem::replace(&mut session.runner, Arc::from(runner));
        drop(sessions);
        old.dispose();
        Ok(())
    }
}

impl Drop for Playground {
    fn drop(&mut self) {
        for session in self.sessions.get_mut().values() {
            session.runner.dispose();
        }
    }
}
