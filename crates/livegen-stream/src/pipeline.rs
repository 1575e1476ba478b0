use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt as _;
use livegen_core::guard::check_suspicious;
use livegen_core::{
    ApplyDecision, Artifact, FailureKind, GenerationFailure, GuardrailEngine, PipelineConfig,
    RecoveryCoordinator, Snapshot, Validator, merge_continuation, sanity_check,
};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::collaborators::{Collaborators, HistoryRole, NoopCollaborators};
use crate::decoder::{Decoded, EventDecoder};
use crate::errors::PipelineError;
use crate::project::{GenerationLock, ProjectId, ProjectState};
use crate::session::{Conclusion, SessionEffect, StreamSession};
use crate::source::{ByteStream, GenerationRequest, GenerationSource};

/// How a generation session ended.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutcome {
    /// The candidate passed validation and the guards and is now known-good.
    Applied {
        artifact: Artifact,
        decision: ApplyDecision,
        summary: Option<String>,
    },
    Chat {
        text: String,
    },
    Plan {
        items: Vec<String>,
    },
    /// The known-good artifact was kept.
    Rejected {
        failure: GenerationFailure,
    },
    Aborted,
    /// A newer session or a project switch made this one stale.
    Superseded,
}

impl SessionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Applied { .. } => "applied",
            SessionOutcome::Chat { .. } => "chat",
            SessionOutcome::Plan { .. } => "plan",
            SessionOutcome::Rejected { .. } => "rejected",
            SessionOutcome::Aborted => "aborted",
            SessionOutcome::Superseded => "superseded",
        }
    }

    pub fn failure(&self) -> Option<&GenerationFailure> {
        match self {
            SessionOutcome::Rejected { failure } => Some(failure),
            _ => None,
        }
    }
}

/// Handle used to abort a running session.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Best effort; the session resolves to `Aborted` and project state is untouched.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// A started session. Call [`GenerationRun::finish`] for its outcome.
pub struct GenerationRun {
    session_id: uuid::Uuid,
    lock: GenerationLock,
    final_rx: oneshot::Receiver<SessionOutcome>,
    abort_handle: AbortHandle,
}

impl GenerationRun {
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn lock(&self) -> &GenerationLock {
        &self.lock
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    pub async fn finish(self) -> Result<SessionOutcome, PipelineError> {
        self.final_rx.await.map_err(|_| {
            PipelineError::Protocol(format!(
                "session task ended without an outcome (session={})",
                self.session_id
            ))
        })
    }
}

pub(crate) struct PipelineInner {
    source: Arc<dyn GenerationSource>,
    collaborators: Arc<dyn Collaborators>,
    config: PipelineConfig,
    validator: Validator,
    engine: GuardrailEngine,
    projects: DashMap<ProjectId, ProjectState>,
    active: watch::Sender<Option<GenerationLock>>,
}

/// Entry point: owns project state and the active generation lock.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Makes `project` the active project and bumps the epoch.
    ///
    /// `baseline` seeds the known-good artifact of a project seen for the
    /// first time; an existing project keeps its state.
    pub fn open_project(&self, project: impl Into<ProjectId>, baseline: Option<Artifact>) -> GenerationLock {
        let project = project.into();
        let capacity = self.inner.config.ledger_capacity;
        self.inner
            .projects
            .entry(project.clone())
            .or_insert_with(|| ProjectState::new(baseline, capacity));
        let lock = self.inner.bump(project);
        info!(lock = %lock, "project opened");
        lock
    }

    pub fn active_lock(&self) -> Option<GenerationLock> {
        self.inner.active.borrow().clone()
    }

    /// Receiver that observes every lock change.
    pub fn subscribe_lock(&self) -> watch::Receiver<Option<GenerationLock>> {
        self.inner.active.subscribe()
    }

    pub fn known_good(&self, project: &ProjectId) -> Option<Artifact> {
        self.inner
            .projects
            .get(project)
            .and_then(|state| state.known_good.clone())
    }

    /// Ledger contents, oldest first.
    pub fn snapshots(&self, project: &ProjectId) -> Vec<Snapshot> {
        self.inner
            .projects
            .get(project)
            .map(|state| state.ledger.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes the snapshot `steps` behind the newest the known-good artifact.
    ///
    /// Restored artifacts only need to pass the restore sanity check. Any
    /// session running for the project is superseded.
    pub async fn restore(&self, project: &ProjectId, steps: usize) -> Result<Artifact, PipelineError> {
        let artifact = {
            let state = self
                .inner
                .projects
                .get(project)
                .ok_or_else(|| PipelineError::UnknownProject(project.clone()))?;
            state
                .ledger
                .rollback(steps)
                .map(|snapshot| snapshot.artifact.clone())
                .ok_or_else(|| PipelineError::Validation(format!("no snapshot {steps} step(s) back")))?
        };
        let check = sanity_check(&artifact);
        if !check.valid {
            return Err(PipelineError::Validation(format!(
                "snapshot failed the restore check: {}",
                check.reason.unwrap_or_default()
            )));
        }
        if let Some(mut state) = self.inner.projects.get_mut(project) {
            state.known_good = Some(artifact.clone());
        }
        let is_active = self
            .inner
            .active
            .borrow()
            .as_ref()
            .is_some_and(|lock| &lock.project == project);
        if is_active {
            self.inner.bump(project.clone());
        }
        self.inner
            .collaborators
            .persist_artifact(project, &artifact, uuid::Uuid::new_v4())
            .await;
        info!(project = %project, steps, "snapshot restored");
        Ok(artifact)
    }

    /// Starts a session for the active project; any older session becomes stale.
    pub async fn start(&self, instruction: impl Into<String>) -> Result<GenerationRun, PipelineError> {
        let instruction = instruction.into();
        if instruction.trim().is_empty() {
            return Err(PipelineError::Validation("instruction must not be empty".into()));
        }
        let project = self
            .inner
            .active
            .borrow()
            .as_ref()
            .map(|lock| lock.project.clone())
            .ok_or(PipelineError::NoActiveProject)?;

        let lock = self.inner.bump(project.clone());
        let session_id = uuid::Uuid::new_v4();
        let request = GenerationRequest {
            session_id,
            project: project.clone(),
            instruction: instruction.clone(),
            baseline: self.known_good(&project),
        };
        info!(session_id = %session_id, lock = %lock, source = self.inner.source.id(), "starting generation session");
        let stream = self.inner.source.open(&request).await?;
        self.inner
            .collaborators
            .append_history_entry(&project, HistoryRole::User, &instruction, None)
            .await;

        let session = StreamSession::new(
            session_id,
            lock.clone(),
            instruction,
            self.inner.config.mode_fallback_chars,
        );
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);
        tokio::spawn(run_task(self.inner.clone(), session, stream, abort_rx, final_tx));

        Ok(GenerationRun {
            session_id,
            lock,
            final_rx,
            abort_handle: AbortHandle { tx: abort_tx },
        })
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    source: Option<Arc<dyn GenerationSource>>,
    collaborators: Option<Arc<dyn Collaborators>>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn source(mut self, source: Arc<dyn GenerationSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn collaborators(mut self, collaborators: Arc<dyn Collaborators>) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        self.config.validate()?;
        let source = self
            .source
            .ok_or_else(|| PipelineError::Config("a generation source is required".into()))?;
        let collaborators = self
            .collaborators
            .unwrap_or_else(|| Arc::new(NoopCollaborators));
        let (active, _) = watch::channel(None);
        Ok(Pipeline {
            inner: Arc::new(PipelineInner {
                source,
                collaborators,
                validator: Validator::with_layout_policy(self.config.layout_policy),
                engine: GuardrailEngine::new(self.config.guard.clone()),
                config: self.config,
                projects: DashMap::new(),
                active,
            }),
        })
    }
}

impl PipelineInner {
    fn bump(&self, project: ProjectId) -> GenerationLock {
        let mut issued = GenerationLock { project, epoch: 0 };
        self.active.send_modify(|active| {
            issued.epoch = active.as_ref().map_or(0, |lock| lock.epoch) + 1;
            *active = Some(issued.clone());
        });
        issued
    }

    fn is_current(&self, lock: &GenerationLock) -> bool {
        self.active.borrow().as_ref() == Some(lock)
    }

    /// Applies one decoded record; false when the session has gone stale.
    async fn handle(&self, session: &mut StreamSession, decoded: Decoded) -> bool {
        if !self.is_current(session.lock()) {
            debug!(session_id = %session.session_id(), lock = %session.lock(), "discarding record for stale session");
            return false;
        }
        for effect in session.apply(decoded, &self.validator) {
            match effect {
                SessionEffect::Phase(phase) => self.collaborators.notify_phase(&phase).await,
                SessionEffect::Preview(artifact) => self.collaborators.notify_preview(&artifact).await,
                SessionEffect::Forward(event) => self.collaborators.notify_event(&event).await,
            }
        }
        true
    }

    async fn reject(&self, session: &StreamSession, failure: GenerationFailure) -> SessionOutcome {
        if !self.is_current(session.lock()) {
            return SessionOutcome::Superseded;
        }
        warn!(
            session_id = %session.session_id(),
            project = %session.lock().project,
            kind = %failure.kind,
            message = %failure.message,
            "generation rejected"
        );
        self.collaborators
            .notify_error(failure.kind, &failure.message)
            .await;
        SessionOutcome::Rejected { failure }
    }

    async fn finalize(&self, session: &StreamSession, abort_rx: &watch::Receiver<bool>) -> SessionOutcome {
        if !self.is_current(session.lock()) {
            return SessionOutcome::Superseded;
        }
        let project = session.lock().project.clone();
        match session.conclude() {
            Conclusion::Chat { text } => {
                self.collaborators
                    .append_history_entry(&project, HistoryRole::Assistant, &text, None)
                    .await;
                SessionOutcome::Chat { text }
            }
            Conclusion::Plan { items } => {
                self.collaborators
                    .append_history_entry(&project, HistoryRole::Assistant, &items.join("\n"), None)
                    .await;
                SessionOutcome::Plan { items }
            }
            Conclusion::Failed(failure) => self.reject(session, failure).await,
            Conclusion::Candidate { artifact, truncated } => {
                self.finalize_candidate(session, artifact, truncated, abort_rx)
                    .await
            }
        }
    }

    async fn finalize_candidate(
        &self,
        session: &StreamSession,
        artifact: Option<Artifact>,
        truncated: bool,
        abort_rx: &watch::Receiver<bool>,
    ) -> SessionOutcome {
        let mut artifact = artifact;
        if truncated {
            match self.recover(session, artifact.as_ref()).await {
                Some(merged) => artifact = Some(merged),
                None => {
                    return self
                        .reject(
                            session,
                            GenerationFailure::new(
                                FailureKind::TruncationConfirmed,
                                "the generator ran out of room before finishing and could not continue; the current version was kept",
                            ),
                        )
                        .await;
                }
            }
        }

        let Some(artifact) = artifact else {
            return self
                .reject(
                    session,
                    GenerationFailure::new(
                        FailureKind::NoCodeExtracted,
                        "the response did not contain any code; the current version was kept",
                    ),
                )
                .await;
        };

        let chars = source_chars(&artifact);
        if chars < self.config.min_source_chars {
            return self
                .reject(
                    session,
                    GenerationFailure::new(
                        FailureKind::IncompleteOutput,
                        format!("the generated code is too short to be complete ({chars} characters)"),
                    ),
                )
                .await;
        }

        let validation = self.validator.validate_artifact(&artifact);
        if !validation.valid {
            let reason = validation.reason.unwrap_or_default();
            return self
                .reject(
                    session,
                    GenerationFailure::new(
                        FailureKind::ValidationFailed,
                        format!("the generated code is incomplete or broken: {reason}"),
                    )
                    .at_line(validation.line),
                )
                .await;
        }

        let project = session.lock().project.clone();
        let baseline = self
            .projects
            .get(&project)
            .and_then(|state| state.known_good.clone());
        let (old, new) = comparable_sources(baseline.as_ref(), &artifact);
        let decision = self
            .engine
            .safe_apply(&old, &new, session.instruction(), session.confidence());
        if !decision.accepted {
            return self
                .reject(
                    session,
                    GenerationFailure::new(
                        FailureKind::GuardrailRejected,
                        format!(
                            "the change was blocked to protect the current version: {}",
                            decision.rejection_message()
                        ),
                    ),
                )
                .await;
        }
        if !decision.bypassed()
            && let Some(message) = check_suspicious(&old, &new)
        {
            return self
                .reject(session, GenerationFailure::new(FailureKind::SuspiciousOutput, message))
                .await;
        }

        if *abort_rx.borrow() {
            return SessionOutcome::Aborted;
        }
        if !self.is_current(session.lock()) {
            return SessionOutcome::Superseded;
        }
        {
            let capacity = self.config.ledger_capacity;
            let mut state = self
                .projects
                .entry(project.clone())
                .or_insert_with(|| ProjectState::new(None, capacity));
            state.known_good = Some(artifact.clone());
            state.ledger.record(artifact.clone(), session.instruction());
        }

        let summary = session.summary();
        self.collaborators
            .persist_artifact(&project, &artifact, session.session_id())
            .await;
        let history = summary
            .clone()
            .unwrap_or_else(|| format!("Updated the project ({artifact})"));
        self.collaborators
            .append_history_entry(&project, HistoryRole::Assistant, &history, Some(&artifact))
            .await;
        info!(
            session_id = %session.session_id(),
            project = %project,
            artifact = %artifact,
            profile = ?decision.profile,
            "artifact applied"
        );
        SessionOutcome::Applied {
            artifact,
            decision,
            summary,
        }
    }

    async fn recover(&self, session: &StreamSession, partial: Option<&Artifact>) -> Option<Artifact> {
        let mut coordinator = RecoveryCoordinator::new(self.config.continuation.clone());
        while coordinator.begin() {
            let seed = partial.cloned().unwrap_or_else(|| Artifact::single(""));
            info!(session_id = %session.session_id(), attempt = coordinator.attempts(), "requesting continuation after truncation");
            match self
                .collaborators
                .request_continuation(&seed, session.instruction())
                .await
            {
                Some(continuation) => {
                    coordinator.complete(true);
                    return Some(match partial {
                        Some(partial) => merge_continuation(partial, &continuation),
                        None => continuation,
                    });
                }
                None => coordinator.complete(false),
            }
        }
        None
    }
}

/// Total trimmed length across every entry.
fn source_chars(artifact: &Artifact) -> usize {
    artifact
        .entries()
        .iter()
        .map(|(_, source)| source.trim().len())
        .sum()
}

/// Strings the guards compare: whole file sets when both sides are
/// multi-file, primary sources otherwise.
fn comparable_sources(old: Option<&Artifact>, new: &Artifact) -> (String, String) {
    match (old, new) {
        (Some(old @ Artifact::Files { .. }), Artifact::Files { .. }) => {
            (old.combined_source(), new.combined_source())
        }
        (Some(old), _) => (old.primary_source().to_string(), new.primary_source().to_string()),
        (None, _) => (String::new(), new.combined_source()),
    }
}

async fn run_task(
    inner: Arc<PipelineInner>,
    session: StreamSession,
    stream: ByteStream,
    abort_rx: watch::Receiver<bool>,
    final_tx: oneshot::Sender<SessionOutcome>,
) {
    let session_id = session.session_id();
    let outcome = drive(&inner, session, stream, abort_rx).await;
    info!(session_id = %session_id, outcome = outcome.label(), "generation session finished");
    let _ = final_tx.send(outcome);
}

async fn drive(
    inner: &PipelineInner,
    mut session: StreamSession,
    mut stream: ByteStream,
    mut abort_rx: watch::Receiver<bool>,
) -> SessionOutcome {
    let mut decoder = EventDecoder::default();
    let mut abort_open = true;
    loop {
        tokio::select! {
            changed = abort_rx.changed(), if abort_open => {
                match changed {
                    Ok(()) if *abort_rx.borrow() => {
                        info!(session_id = %session.session_id(), "generation session aborted");
                        return SessionOutcome::Aborted;
                    }
                    Ok(()) => {}
                    Err(_) => abort_open = false,
                }
            }
            next = stream.next() => {
                match next {
                    Some(Ok(chunk)) => {
                        for decoded in decoder.push_chunk(&chunk) {
                            if !inner.handle(&mut session, decoded).await {
                                return SessionOutcome::Superseded;
                            }
                        }
                    }
                    Some(Err(err)) => {
                        let failure = GenerationFailure::new(
                            FailureKind::TransportFailed,
                            format!("the connection to the generator failed: {}", err.message()),
                        );
                        return inner.reject(&session, failure).await;
                    }
                    None => break,
                }
            }
        }
    }
    for decoded in decoder.finish() {
        if !inner.handle(&mut session, decoded).await {
            return SessionOutcome::Superseded;
        }
    }
    if session.malformed_count() > 0 {
        debug!(session_id = %session.session_id(), malformed = session.malformed_count(), "session had malformed records");
    }
    inner.finalize(&session, &abort_rx).await
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use bytes::Bytes;
    use livegen_core::{GuardConfig, GuardName, GuardProfile};
    use tokio::sync::mpsc;

    use super::*;
    use crate::errors::SourceError;
    use crate::event::StreamEvent;
    use crate::source::ReplaySource;

    const APP: &str = "import React from 'react';\n\nexport default function App() {\n  return <main className=\"page\">Hello from the cafe</main>;\n}\n";

    #[derive(Default)]
    struct Recording {
        persisted: Mutex<Vec<(ProjectId, Artifact)>>,
        history: Mutex<Vec<(HistoryRole, String)>>,
        errors: Mutex<Vec<FailureKind>>,
        previews: Mutex<Vec<Artifact>>,
        phases: Mutex<Vec<String>>,
        events: Mutex<Vec<StreamEvent>>,
        continuations: Mutex<VecDeque<Option<Artifact>>>,
        continuation_requests: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl Collaborators for Recording {
        async fn persist_artifact(&self, project: &ProjectId, artifact: &Artifact, _attribution_id: uuid::Uuid) {
            self.persisted
                .lock()
                .expect("lock")
                .push((project.clone(), artifact.clone()));
        }

        async fn append_history_entry(
            &self,
            _project: &ProjectId,
            role: HistoryRole,
            text: &str,
            _artifact: Option<&Artifact>,
        ) {
            self.history.lock().expect("lock").push((role, text.to_string()));
        }

        async fn notify_phase(&self, phase: &str) {
            self.phases.lock().expect("lock").push(phase.to_string());
        }

        async fn notify_preview(&self, artifact: &Artifact) {
            self.previews.lock().expect("lock").push(artifact.clone());
        }

        async fn notify_error(&self, kind: FailureKind, _message: &str) {
            self.errors.lock().expect("lock").push(kind);
        }

        async fn notify_event(&self, event: &StreamEvent) {
            self.events.lock().expect("lock").push(event.clone());
        }

        async fn request_continuation(&self, _partial: &Artifact, _instruction: &str) -> Option<Artifact> {
            *self.continuation_requests.lock().expect("lock") += 1;
            self.continuations.lock().expect("lock").pop_front().flatten()
        }
    }

    /// Hands out prepared streams, one per `open`.
    struct ScriptedSource {
        streams: Mutex<VecDeque<ByteStream>>,
    }

    impl ScriptedSource {
        fn new(streams: Vec<ByteStream>) -> Self {
            Self {
                streams: Mutex::new(streams.into()),
            }
        }
    }

    #[async_trait::async_trait]
    impl GenerationSource for ScriptedSource {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn open(&self, _request: &GenerationRequest) -> Result<ByteStream, SourceError> {
            self.streams
                .lock()
                .expect("lock")
                .pop_front()
                .ok_or_else(|| SourceError::Config("no scripted stream left".into()))
        }
    }

    fn channel_stream(rx: mpsc::UnboundedReceiver<Bytes>) -> ByteStream {
        Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok::<_, SourceError>(chunk), rx))
        }))
    }

    fn pipeline(source: Arc<dyn GenerationSource>, recording: Arc<Recording>) -> Pipeline {
        Pipeline::builder()
            .source(source)
            .collaborators(recording)
            .build()
            .expect("pipeline")
    }

    fn replay(text: &str) -> Arc<dyn GenerationSource> {
        Arc::new(ReplaySource::from_text(text, 7))
    }

    fn big_page() -> Artifact {
        let lines: Vec<String> = (0..200)
            .map(|i| {
                if i < 5 {
                    format!("function Section{i}() {{ return null }}")
                } else {
                    format!("  const value_{i:03} = \"old\";")
                }
            })
            .collect();
        Artifact::single(lines.join("\n"))
    }

    #[tokio::test]
    async fn legacy_stream_is_applied_and_recorded() {
        let recording = Arc::new(Recording::default());
        let raw = format!("/// BEGIN_CODE ///\n{APP}/// END_CODE ///\n/// SUMMARY ///\nBuilt a cafe page.\n");
        let pipeline = pipeline(replay(&raw), recording.clone());
        let project = ProjectId::new("p1");
        pipeline.open_project(project.clone(), None);

        let outcome = pipeline
            .start("build a cafe page")
            .await
            .expect("start")
            .finish()
            .await
            .expect("finish");
        let SessionOutcome::Applied { artifact, summary, .. } = outcome else {
            panic!("expected applied, got {outcome:?}");
        };
        assert_eq!(artifact, Artifact::single(APP.trim_end()));
        assert_eq!(summary.as_deref(), Some("Built a cafe page."));
        assert_eq!(pipeline.known_good(&project), Some(artifact.clone()));
        assert_eq!(pipeline.snapshots(&project).len(), 1);
        assert_eq!(recording.persisted.lock().expect("lock").len(), 1);
        assert!(!recording.previews.lock().expect("lock").is_empty());
        let history = recording.history.lock().expect("lock").clone();
        assert_eq!(
            history,
            vec![
                (HistoryRole::User, "build a cafe page".to_string()),
                (HistoryRole::Assistant, "Built a cafe page.".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn phase_only_stream_ends_early_and_keeps_known_good() {
        let recording = Arc::new(Recording::default());
        let pipeline = pipeline(
            replay("event: phase\ndata: planning\n\nevent: phase\ndata: coding\n\n"),
            recording.clone(),
        );
        let project = ProjectId::new("p1");
        pipeline.open_project(project.clone(), Some(big_page()));

        let outcome = pipeline.start("add a footer").await.expect("start").finish().await.expect("finish");
        assert_eq!(
            outcome.failure().map(|f| f.kind),
            Some(FailureKind::StreamEndedEarly)
        );
        assert_eq!(pipeline.known_good(&project), Some(big_page()));
        assert_eq!(*recording.errors.lock().expect("lock"), vec![FailureKind::StreamEndedEarly]);
        assert_eq!(
            *recording.phases.lock().expect("lock"),
            vec!["planning".to_string(), "coding".to_string()]
        );
    }

    #[tokio::test]
    async fn guard_rejection_keeps_known_good() {
        let recording = Arc::new(Recording::default());
        let payload = serde_json::json!({ "files": { "/App.tsx": APP } }).to_string();
        let pipeline = pipeline(
            replay(&format!("event: files\ndata: {payload}\n\n")),
            recording.clone(),
        );
        let project = ProjectId::new("p1");
        pipeline.open_project(project.clone(), Some(big_page()));

        let outcome = pipeline
            .start("Please redesign the whole landing page with a calmer palette, larger type and more whitespace between every section")
            .await
            .expect("start")
            .finish()
            .await
            .expect("finish");
        let failure = outcome.failure().expect("rejected");
        assert_eq!(failure.kind, FailureKind::GuardrailRejected);
        assert!(failure.message.contains("5 → 1"), "{}", failure.message);
        assert_eq!(pipeline.known_good(&project), Some(big_page()));
        assert!(pipeline.snapshots(&project).is_empty());
        assert!(recording.persisted.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn stale_session_is_superseded_after_project_switch() {
        let recording = Arc::new(Recording::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Arc::new(ScriptedSource::new(vec![channel_stream(rx)]));
        let pipeline = pipeline(source, recording.clone());
        let first = ProjectId::new("p1");
        pipeline.open_project(first.clone(), Some(big_page()));

        let run = pipeline.start("build a cafe page").await.expect("start");
        let (head, tail) = APP.split_at(40);
        tx.send(Bytes::from(format!("/// BEGIN_CODE ///\n{head}"))).expect("send");
        pipeline.open_project("p2", None);
        tx.send(Bytes::from(format!("{tail}/// END_CODE ///\n"))).expect("send");
        drop(tx);

        assert_eq!(run.finish().await.expect("finish"), SessionOutcome::Superseded);
        assert_eq!(pipeline.known_good(&first), Some(big_page()));
        assert!(recording.persisted.lock().expect("lock").is_empty());
        assert!(recording.errors.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn abort_preserves_known_good() {
        let recording = Arc::new(Recording::default());
        let source = Arc::new(ReplaySource::from_chunks([Bytes::from_static(
            b"/// BEGIN_CODE ///\nexport default function App() {\n",
        )]).stalled());
        let pipeline = pipeline(source, recording.clone());
        let project = ProjectId::new("p1");
        pipeline.open_project(project.clone(), Some(big_page()));

        let run = pipeline.start("make it blue").await.expect("start");
        run.abort_handle().abort();
        assert_eq!(run.finish().await.expect("finish"), SessionOutcome::Aborted);
        assert_eq!(pipeline.known_good(&project), Some(big_page()));
        assert!(recording.errors.lock().expect("lock").is_empty());
        assert!(recording.persisted.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn confirmed_truncation_requests_one_continuation_and_applies_merge() {
        let recording = Arc::new(Recording::default());
        let full = "export default function App() {\n  const title = 'Welcome to the coffee shop';\n  return <main><h1>{title}</h1></main>;\n}";
        recording
            .continuations
            .lock()
            .expect("lock")
            .push_back(Some(Artifact::single(full)));
        let pipeline = pipeline(
            replay(
                "event: code_chunk\ndata: {\"content\":\"export default function App() {\\n  return (\"}\n\nevent: error\ndata: {\"code\":\"max_tokens\",\"message\":\"cut off\"}\n\n",
            ),
            recording.clone(),
        );
        let project = ProjectId::new("p1");
        pipeline.open_project(project.clone(), None);

        let outcome = pipeline.start("build a cafe page").await.expect("start").finish().await.expect("finish");
        let SessionOutcome::Applied { artifact, .. } = outcome else {
            panic!("expected applied, got {outcome:?}");
        };
        assert_eq!(artifact, Artifact::single(full));
        assert_eq!(*recording.continuation_requests.lock().expect("lock"), 1);
        assert_eq!(pipeline.known_good(&project), Some(artifact));
    }

    #[tokio::test]
    async fn truncation_without_continuation_is_confirmed() {
        let recording = Arc::new(Recording::default());
        let pipeline = pipeline(
            replay("event: code_chunk\ndata: export default function App() {\n\nevent: error\ndata: {\"code\":\"length\"}\n\n"),
            recording.clone(),
        );
        pipeline.open_project("p1", None);
        let outcome = pipeline.start("build a page").await.expect("start").finish().await.expect("finish");
        assert_eq!(
            outcome.failure().map(|f| f.kind),
            Some(FailureKind::TruncationConfirmed)
        );
        assert_eq!(*recording.continuation_requests.lock().expect("lock"), 1);
    }

    #[tokio::test]
    async fn start_requires_project_and_instruction() {
        let pipeline = Pipeline::builder().source(replay("")).build().expect("pipeline");
        assert!(matches!(
            pipeline.start("build").await.err(),
            Some(PipelineError::NoActiveProject)
        ));
        pipeline.open_project("p1", None);
        assert!(matches!(
            pipeline.start("   ").await.err(),
            Some(PipelineError::Validation(_))
        ));
        assert!(matches!(
            Pipeline::builder().build().err(),
            Some(PipelineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn starting_a_session_bumps_the_epoch() {
        let pipeline = Pipeline::builder().source(replay("Sure!\n")).build().expect("pipeline");
        let opened = pipeline.open_project("p1", None);
        let run = pipeline.start("hello there").await.expect("start");
        assert_eq!(run.lock().epoch, opened.epoch + 1);
        assert_eq!(pipeline.active_lock().as_ref(), Some(run.lock()));
        assert_eq!(
            run.finish().await.expect("finish"),
            SessionOutcome::Chat {
                text: "Sure!".into()
            }
        );
    }

    #[tokio::test]
    async fn restore_rolls_back_to_an_earlier_snapshot() {
        let recording = Arc::new(Recording::default());
        let second = APP.replace("Hello from the cafe", "Fresh coffee every morning");
        let raw = format!("/// BEGIN_CODE ///\n{APP}/// END_CODE ///\n");
        let raw2 = format!("/// BEGIN_CODE ///\n{second}/// END_CODE ///\n");
        let source = Arc::new(ScriptedSource::new(vec![
            Box::pin(futures::stream::iter(vec![Ok::<_, SourceError>(Bytes::from(raw))])),
            Box::pin(futures::stream::iter(vec![Ok::<_, SourceError>(Bytes::from(raw2))])),
        ]));
        let pipeline = pipeline(source, recording.clone());
        let project = ProjectId::new("p1");
        pipeline.open_project(project.clone(), None);
        for instruction in ["build a cafe page", "change the tagline"] {
            let outcome = pipeline.start(instruction).await.expect("start").finish().await.expect("finish");
            assert_eq!(outcome.label(), "applied");
        }
        assert_eq!(pipeline.snapshots(&project).len(), 2);

        let restored = pipeline.restore(&project, 1).await.expect("restore");
        assert_eq!(restored, Artifact::single(APP.trim_end()));
        assert_eq!(pipeline.known_good(&project), Some(restored));
        assert!(matches!(
            pipeline.restore(&project, 5).await,
            Err(PipelineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn confidence_and_suggestions_are_forwarded() {
        let recording = Arc::new(Recording::default());
        let payload = serde_json::json!({ "files": { "/App.tsx": APP } }).to_string();
        let pipeline = pipeline(
            replay(&format!(
                "event: confidence\ndata: {{\"score\":90}}\n\nevent: suggestions\ndata: [{{\"label\":\"Add menu\",\"prompt\":\"Add a menu section\"}}]\n\nevent: files\ndata: {payload}\n\n"
            )),
            recording.clone(),
        );
        pipeline.open_project("p1", None);
        let outcome = pipeline.start("build a cafe page").await.expect("start").finish().await.expect("finish");
        let SessionOutcome::Applied { decision, .. } = outcome else {
            panic!("expected applied");
        };
        assert!(decision.bypassed());
        assert!(!decision.failed_guards.contains(&GuardName::Confidence));
        let events = recording.events.lock().expect("lock").clone();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Confidence { score, .. } if score == 90.0));
    }

    fn page_with_lines(paragraphs: usize) -> String {
        let body: String = (0..paragraphs)
            .map(|i| format!("      <p>Menu item number {i}</p>\n"))
            .collect();
        format!("export default function App() {{\n  return (\n    <main>\n{body}    </main>\n  );\n}}")
    }

    #[tokio::test]
    async fn collapse_that_passes_loose_guards_is_suspicious() {
        let recording = Arc::new(Recording::default());
        let loose = GuardProfile {
            min_length_ratio: 0.1,
            max_diff_ratio: 1.0,
            min_line_ratio: 0.1,
            min_confidence: 0.0,
        };
        let config = PipelineConfig {
            guard: GuardConfig {
                normal: loose,
                micro: loose,
                ..GuardConfig::default()
            },
            ..PipelineConfig::default()
        };
        let baseline = Artifact::single(page_with_lines(144));
        let payload = serde_json::json!({ "files": { "/App.tsx": page_with_lines(49) } }).to_string();
        let pipeline = Pipeline::builder()
            .source(replay(&format!("event: files\ndata: {payload}\n\n")))
            .collaborators(recording.clone())
            .config(config)
            .build()
            .expect("pipeline");
        let project = ProjectId::new("p1");
        pipeline.open_project(project.clone(), Some(baseline.clone()));

        let outcome = pipeline.start("trim the menu").await.expect("start").finish().await.expect("finish");
        let failure = outcome.failure().expect("rejected");
        assert_eq!(failure.kind, FailureKind::SuspiciousOutput);
        assert!(failure.message.contains("full rewrite"), "{}", failure.message);
        assert_eq!(pipeline.known_good(&project), Some(baseline));
        assert!(pipeline.snapshots(&project).is_empty());
        assert_eq!(*recording.errors.lock().expect("lock"), vec![FailureKind::SuspiciousOutput]);
    }

    #[tokio::test]
    async fn default_guards_reject_the_same_collapse_first() {
        let recording = Arc::new(Recording::default());
        let payload = serde_json::json!({ "files": { "/App.tsx": page_with_lines(49) } }).to_string();
        let pipeline = pipeline(replay(&format!("event: files\ndata: {payload}\n\n")), recording.clone());
        let project = ProjectId::new("p1");
        pipeline.open_project(project.clone(), Some(Artifact::single(page_with_lines(144))));

        let outcome = pipeline.start("trim the menu").await.expect("start").finish().await.expect("finish");
        assert_eq!(
            outcome.failure().map(|f| f.kind),
            Some(FailureKind::GuardrailRejected)
        );
    }
}
