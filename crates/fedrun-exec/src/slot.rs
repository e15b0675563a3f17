use std::{
    mem,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use fedrun_model::{ProcessEnv, RecordStatus, SlotKind, StartAck, StopAck, rfc3339};
use fedrun_store::{Journal, LogTarget};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::{Notify, mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, trace, warn};

use crate::{
    error::SlotError,
    filter::clean_line,
    patch::ConfigPatcher,
    signal::{self, ProcessGroup, Signal},
    sink::LogSink,
};

/// How long output may stay open after the leader exits before its group is terminated.
const DRAIN_SETTLE: Duration = Duration::from_millis(250);

/// Applied to every child unless the orchestrator environment already sets them.
const LOCALE_DEFAULTS: [(&str, &str); 3] = [
    ("PYTHONIOENCODING", "utf-8"),
    ("LC_ALL", "C.UTF-8"),
    ("LANG", "C.UTF-8"),
];

#[derive(Debug, Clone)]
pub struct SlotConfig {
    /// Append-only log file of every occupancy of the slot.
    pub log_path: PathBuf,
    /// Time between the polite termination request and the forced kill.
    pub grace: Duration,
}

impl SlotConfig {
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            grace: Self::DEFAULT_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

/// Node session to open for an occupancy.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub node_id: String,
    pub runtime_config: Value,
}

/// Run record to open for an occupancy.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub project_id: String,
    pub label: String,
    pub config: Value,
}

/// Records opened when the slot starts and closed when the child exits.
#[derive(Debug, Clone, Default)]
pub struct RecordPlan {
    pub session: Option<SessionPlan>,
    pub run: Option<RunPlan>,
}

/// Everything needed to launch one child.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; must exist.
    pub cwd: PathBuf,
    /// Overrides on top of the inherited environment.
    pub env: ProcessEnv,
    pub records: RecordPlan,
    /// Free-form label reported in snapshots (e.g. federation name).
    pub label: Option<String>,
    /// Written with the run id before launch and cleared on release.
    pub correlation: Option<ConfigPatcher>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: ProcessEnv::new(),
            records: RecordPlan::default(),
            label: None,
            correlation: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Read-only view of an occupied slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub kind: SlotKind,
    pub pid: u32,
    pub log_path: PathBuf,
    pub started_at: OffsetDateTime,
    pub session_id: Option<String>,
    pub run_id: Option<String>,
    pub label: Option<String>,
}

/// Environment handed to a child: locale defaults where the orchestrator has
/// none, record ids when known, then `overrides`.
pub fn child_env(overrides: &ProcessEnv, session_id: Option<&str>, run_id: Option<&str>) -> ProcessEnv {
    let mut env = ProcessEnv::new();
    for (key, value) in LOCALE_DEFAULTS {
        if std::env::var_os(key).is_none() {
            env.push(key, value);
        }
    }
    if let Some(id) = session_id {
        env.push("NODE_SESSION_ID", id);
    }
    if let Some(id) = run_id {
        env.push("FLWR_RUN_ID", id);
    }
    env.merged(overrides)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    /// Leader reaped; output may still be draining.
    Exited,
    Released,
}

#[derive(Debug, Clone, Default)]
struct RecordIds {
    session_id: Option<String>,
    run_id: Option<String>,
}

impl RecordIds {
    fn session(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn run(&self) -> Option<&str> {
        self.run_id.as_deref()
    }
}

#[derive(Debug)]
struct Occupancy {
    generation: u64,
    snapshot: SlotSnapshot,
    ids: RecordIds,
    control: mpsc::UnboundedSender<Signal>,
    phase: watch::Receiver<Phase>,
    correlation: Option<ConfigPatcher>,
    /// Set by the first releaser; later releasers back off.
    releasing: bool,
}

#[derive(Debug)]
enum SlotState {
    Vacant,
    /// Reserved by a start in progress; no process handle yet.
    Starting,
    Occupied(Occupancy),
}

/// What a stop needs from the occupancy, copied out of the lock.
struct StopHandle {
    generation: u64,
    ids: RecordIds,
    control: mpsc::UnboundedSender<Signal>,
    phase: watch::Receiver<Phase>,
}

#[derive(Debug)]
struct SlotInner {
    kind: SlotKind,
    config: SlotConfig,
    journal: Journal,
    sink: LogSink,
    state: Mutex<SlotState>,
    changed: Notify,
    generation: AtomicU64,
}

/// Single-occupancy supervisor of one category of child process.
///
/// Occupancy is checked and reserved in one step without suspending, so two
/// concurrent starts can never both proceed. Start and stop bodies run as
/// detached tasks: a caller that goes away mid-call never leaves a half-made
/// occupancy behind.
#[derive(Debug, Clone)]
pub struct ProcessSlot {
    inner: Arc<SlotInner>,
}

impl ProcessSlot {
    pub fn new(kind: SlotKind, config: SlotConfig, journal: Journal) -> Self {
        Self {
            inner: Arc::new(SlotInner {
                kind,
                config,
                sink: LogSink::new(journal.clone()),
                journal,
                state: Mutex::new(SlotState::Vacant),
                changed: Notify::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn kind(&self) -> SlotKind {
        self.inner.kind
    }

    pub fn log_path(&self) -> &Path {
        &self.inner.config.log_path
    }

    /// Returns `true` while a process handle is held.
    pub fn is_occupied(&self) -> bool {
        matches!(*self.inner.lock(), SlotState::Occupied(_))
    }

    pub fn snapshot(&self) -> Option<SlotSnapshot> {
        match &*self.inner.lock() {
            SlotState::Occupied(o) => Some(o.snapshot.clone()),
            _ => None,
        }
    }

    pub async fn start(&self, spec: LaunchSpec) -> Result<StartAck, SlotError> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.start(spec).await })
            .await
            .map_err(|e| SlotError::Aborted(e.to_string()))?
    }

    pub async fn stop(&self) -> Result<StopAck, SlotError> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.stop().await })
            .await
            .map_err(|e| SlotError::Aborted(e.to_string()))?
    }

    /// Wait until the slot holds no process and no start is in progress.
    pub async fn wait_vacant(&self) {
        loop {
            let notified = self.inner.changed.notified();
            if matches!(*self.inner.lock(), SlotState::Vacant) {
                return;
            }
            notified.await;
        }
    }
}

/// Holds the `Starting` reservation; reverts it to `Vacant` unless committed.
struct Reservation<'a> {
    inner: &'a SlotInner,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, occupancy: Occupancy) {
        *self.inner.lock() = SlotState::Occupied(occupancy);
        self.committed = true;
        self.inner.changed.notify_waiters();
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            *self.inner.lock() = SlotState::Vacant;
            self.inner.changed.notify_waiters();
        }
    }
}

impl SlotInner {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve(&self) -> Result<Reservation<'_>, SlotError> {
        let mut state = self.lock();
        if !matches!(*state, SlotState::Vacant) {
            return Err(SlotError::AlreadyRunning(self.kind));
        }
        *state = SlotState::Starting;
        Ok(Reservation {
            inner: self,
            committed: false,
        })
    }

    async fn start(self: Arc<Self>, spec: LaunchSpec) -> Result<StartAck, SlotError> {
        let reservation = self.reserve()?;

        if !tokio::fs::metadata(&spec.cwd)
            .await
            .is_ok_and(|meta| meta.is_dir())
        {
            return Err(SlotError::ConfigurationMissing(spec.cwd));
        }

        let ids = self.open_records(&spec.records).await;
        if let Some(patcher) = &spec.correlation {
            patcher.set_correlation_id(ids.run()).await;
        }

        let spawned = self.command(&spec, &ids).spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                warn!(slot = %self.kind, program = %spec.program, error = %source, "spawn failed");
                self.abandon(&ids, spec.correlation.as_ref()).await;
                return Err(SlotError::Spawn {
                    program: spec.program,
                    source,
                });
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            warn!(slot = %self.kind, "child output pipes missing; killing child");
            if let Err(e) = child.start_kill() {
                warn!(slot = %self.kind, error = %e, "kill after capture failure failed");
            }
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
            self.abandon(&ids, spec.correlation.as_ref()).await;
            return Err(SlotError::CaptureUnavailable(self.kind));
        };

        let pid = child.id().unwrap_or_default();
        let group = ProcessGroup::led_by(pid);
        let started_at = OffsetDateTime::now_utc();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let log_path = self.config.log_path.clone();

        if let Some(id) = ids.session() {
            self.sink.register(LogTarget::Session(id));
        }
        if let Some(id) = ids.run() {
            self.sink.register(LogTarget::Run(id));
        }

        let drains = vec![
            self.clone().spawn_drain(stdout, ids.clone()),
            self.clone().spawn_drain(stderr, ids.clone()),
        ];
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(Phase::Running);
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(self.clone().monitor(Monitor {
            generation,
            child,
            group,
            control: control_rx,
            drains,
            ready: ready_rx,
            phase: phase_tx,
            ids: ids.clone(),
        }));

        let snapshot = SlotSnapshot {
            kind: self.kind,
            pid,
            log_path: log_path.clone(),
            started_at,
            session_id: ids.session_id.clone(),
            run_id: ids.run_id.clone(),
            label: spec.label.clone(),
        };
        reservation.commit(Occupancy {
            generation,
            snapshot,
            ids: ids.clone(),
            control: control_tx,
            phase: phase_rx,
            correlation: spec.correlation,
            releasing: false,
        });

        if let Some(id) = ids.session() {
            self.journal.session_running(id, pid, started_at).await;
        }
        if let Some(id) = ids.run() {
            self.journal.run_running(id, started_at, ids.session()).await;
        }

        let label = self.kind.label();
        info!(slot = %self.kind, pid, session_id = ?ids.session_id, run_id = ?ids.run_id, "process started");
        self.log(&format!("[{}] {label} started (pid={pid})\n", now()), &ids)
            .await;
        let _ = ready_tx.send(());

        Ok(StartAck {
            session_id: ids.session_id,
            run_id: ids.run_id,
            ..StartAck::running(pid, log_path.display().to_string())
        })
    }

    async fn stop(self: Arc<Self>) -> Result<StopAck, SlotError> {
        let handle = loop {
            let notified = self.changed.notified();
            {
                let state = self.lock();
                match &*state {
                    SlotState::Vacant => return Err(SlotError::NotRunning(self.kind)),
                    SlotState::Starting => {}
                    SlotState::Occupied(o) => {
                        break StopHandle {
                            generation: o.generation,
                            ids: o.ids.clone(),
                            control: o.control.clone(),
                            phase: o.phase.clone(),
                        };
                    }
                }
            }
            trace!(slot = %self.kind, "stop waiting for start to finish");
            notified.await;
        };

        let label = self.kind.label();
        self.log(&format!("[{}] {label} stop requested\n", now()), &handle.ids)
            .await;

        let StopHandle {
            generation,
            control,
            mut phase,
            ..
        } = handle;

        // The group is signalled even when the leader is gone: helpers holding
        // the output pipes keep the occupancy alive until they exit.
        let _ = control.send(Signal::Terminate);
        let released = tokio::time::timeout(
            self.config.grace,
            phase.wait_for(|p| *p == Phase::Released),
        )
        .await
        .is_ok();

        if !released {
            warn!(slot = %self.kind, grace = ?self.config.grace, "grace period elapsed; killing");
            let _ = control.send(Signal::Kill);
            let _ = phase.wait_for(|p| *p == Phase::Released).await;
        }

        // The monitor records the exit and releases; if it is gone, release here.
        self.release(generation).await;

        info!(slot = %self.kind, "process stopped");
        Ok(StopAck::stopped())
    }

    async fn open_records(&self, plan: &RecordPlan) -> RecordIds {
        let session_id = match &plan.session {
            Some(s) => {
                self.journal
                    .open_session(&s.node_id, s.runtime_config.clone())
                    .await
            }
            None => None,
        };
        let run_id = match &plan.run {
            Some(r) => {
                self.journal
                    .open_run(&r.project_id, &r.label, r.config.clone())
                    .await
            }
            None => None,
        };
        RecordIds { session_id, run_id }
    }

    /// Close records of a launch that never produced an occupancy.
    async fn abandon(&self, ids: &RecordIds, correlation: Option<&ConfigPatcher>) {
        let at = OffsetDateTime::now_utc();
        if let Some(id) = ids.session() {
            self.journal.close_session(id, RecordStatus::Failed, at).await;
        }
        if let Some(id) = ids.run() {
            self.journal.close_run(id, RecordStatus::Failed, at).await;
        }
        if let Some(patcher) = correlation {
            patcher.set_correlation_id(None).await;
        }
    }

    fn command(&self, spec: &LaunchSpec, ids: &RecordIds) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in child_env(&spec.env, ids.session(), ids.run()).resolved() {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);
        debug!(slot = %self.kind, program = %spec.program, args = ?spec.args, "launching");
        cmd
    }

    fn spawn_drain<R>(self: Arc<Self>, reader: R, ids: RecordIds) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::with_capacity(256);
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => self.log(&clean_line(&buf), &ids).await,
                    Err(e) => {
                        warn!(slot = %self.kind, error = %e, "output read failed; drain stopped");
                        break;
                    }
                }
            }
            trace!(slot = %self.kind, "drain reached end of stream");
        })
    }

    async fn monitor(self: Arc<Self>, task: Monitor) {
        let Monitor {
            generation,
            mut child,
            group,
            mut control,
            drains,
            ready,
            phase,
            ids,
        } = task;

        let code = loop {
            tokio::select! {
                status = child.wait() => break match status {
                    Ok(status) => signal::exit_code(status),
                    Err(e) => {
                        warn!(slot = %self.kind, error = %e, "wait on child failed");
                        -1
                    }
                },
                Some(sig) = control.recv() => signal::deliver(&mut child, group, sig),
            }
        };
        phase.send_replace(Phase::Exited);
        self.await_drains(drains, group, &mut control).await;
        // Start finishes its bookkeeping before the exit is recorded.
        let _ = ready.await;

        let label = self.kind.label();
        self.log(&format!("[{}] {label} exited with code {code}\n", now()), &ids)
            .await;

        let status = RecordStatus::from_exit_code(code);
        let ended_at = OffsetDateTime::now_utc();
        if let Some(id) = ids.session() {
            self.journal.close_session(id, status, ended_at).await;
        }
        if let Some(id) = ids.run() {
            self.journal.close_run(id, status, ended_at).await;
        }
        info!(slot = %self.kind, code, status = status.as_str(), "process exited");

        self.release(generation).await;
        phase.send_replace(Phase::Released);
    }

    /// Join both drains once the leader has exited.
    ///
    /// Helpers left in the group may still hold the pipes open. They get
    /// `DRAIN_SETTLE` to finish, then the group is terminated and killed after
    /// the grace period. Stop requests keep being forwarded meanwhile.
    async fn await_drains(
        &self,
        drains: Vec<JoinHandle<()>>,
        group: Option<ProcessGroup>,
        control: &mut mpsc::UnboundedReceiver<Signal>,
    ) {
        let kind = self.kind;
        let joined = async move {
            for drain in drains {
                if let Err(e) = drain.await {
                    warn!(slot = %kind, error = %e, "drain task failed");
                }
            }
        };
        tokio::pin!(joined);

        let mut escalation = group.map(|_| Signal::Terminate);
        let mut deadline = Instant::now() + DRAIN_SETTLE;
        loop {
            tokio::select! {
                () = &mut joined => return,
                Some(sig) = control.recv() => {
                    if let Some(group) = group {
                        group.signal(sig);
                    }
                }
                () = tokio::time::sleep_until(deadline), if escalation.is_some() => {
                    let (Some(group), Some(sig)) = (group, escalation.take()) else { continue };
                    debug!(slot = %self.kind, ?sig, "output still open after exit; signalling process group");
                    group.signal(sig);
                    if sig == Signal::Terminate {
                        escalation = Some(Signal::Kill);
                        deadline = Instant::now() + self.config.grace;
                    }
                }
            }
        }
    }

    /// Vacate the slot if it still holds occupancy `generation`.
    ///
    /// Only the first caller performs cleanup; later calls return `false`.
    async fn release(&self, generation: u64) -> bool {
        let (ids, correlation) = {
            let mut state = self.lock();
            match &mut *state {
                SlotState::Occupied(o) if o.generation == generation && !o.releasing => {
                    o.releasing = true;
                    (o.ids.clone(), o.correlation.clone())
                }
                _ => return false,
            }
        };

        if let Some(id) = ids.session() {
            self.sink.forget(LogTarget::Session(id));
        }
        if let Some(id) = ids.run() {
            self.sink.forget(LogTarget::Run(id));
        }
        // Cleared while still occupied so a following run cannot lose its id.
        if let Some(patcher) = &correlation {
            patcher.set_correlation_id(None).await;
        }

        let previous = mem::replace(&mut *self.lock(), SlotState::Vacant);
        self.changed.notify_waiters();
        debug!(slot = %self.kind, generation, was_occupied = matches!(previous, SlotState::Occupied(_)), "slot released");
        true
    }

    async fn log(&self, text: &str, ids: &RecordIds) {
        if let Err(e) = self
            .sink
            .append(&self.config.log_path, text, ids.session(), ids.run())
            .await
        {
            warn!(slot = %self.kind, path = %self.config.log_path.display(), error = %e, "log append failed");
        }
    }
}

struct Monitor {
    generation: u64,
    child: Child,
    group: Option<ProcessGroup>,
    control: mpsc::UnboundedReceiver<Signal>,
    drains: Vec<JoinHandle<()>>,
    ready: oneshot::Receiver<()>,
    phase: watch::Sender<Phase>,
    ids: RecordIds,
}

fn now() -> String {
    rfc3339(OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_record_ids() {
        let overrides = ProcessEnv::new().with("FLWR_RUN_ID", "manual");
        let env = child_env(&overrides, Some("sess"), Some("run"));
        assert_eq!(env.get("NODE_SESSION_ID"), Some("sess"));
        assert_eq!(env.get("FLWR_RUN_ID"), Some("manual"));
    }

    #[test]
    fn absent_ids_are_not_exported() {
        let env = child_env(&ProcessEnv::new(), None, None);
        assert!(env.get("NODE_SESSION_ID").is_none());
        assert!(env.get("FLWR_RUN_ID").is_none());
    }

    #[test]
    fn locale_defaults_respect_orchestrator_env() {
        let env = child_env(&ProcessEnv::new(), None, None);
        for (key, value) in LOCALE_DEFAULTS {
            match std::env::var_os(key) {
                Some(_) => assert!(env.get(key).is_none(), "{key} must be inherited"),
                None => assert_eq!(env.get(key), Some(value)),
            }
        }
    }

    #[test]
    fn slot_config_defaults() {
        let cfg = SlotConfig::new("logs/run.log");
        assert_eq!(cfg.grace, Duration::from_secs(10));
        let cfg = cfg.with_grace(Duration::from_millis(5));
        assert_eq!(cfg.grace, Duration::from_millis(5));
    }

    #[tokio::test]
    async fn stop_on_vacant_slot_is_rejected() {
        let slot = ProcessSlot::new(SlotKind::Coordinator, SlotConfig::new("x.log"), Journal::default());
        let err = slot.stop().await.unwrap_err();
        assert!(matches!(err, SlotError::NotRunning(SlotKind::Coordinator)));
        assert_eq!(err.kind(), "not_running");
    }

    #[tokio::test]
    async fn missing_working_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let slot = ProcessSlot::new(
            SlotKind::Participant,
            SlotConfig::new(dir.path().join("supernode.log")),
            Journal::default(),
        );
        let spec = LaunchSpec::new("sh", dir.path().join("no-such-app"));

        let err = slot.start(spec).await.unwrap_err();
        assert_eq!(err.kind(), "configuration_missing");
        assert!(!slot.is_occupied());
    }

    #[cfg(unix)]
    mod process {
        use std::{sync::Arc, time::Duration};

        use fedrun_store::{MemoryStore, StoreClient, tables};
        use serde_json::json;
        use tempfile::TempDir;

        use super::*;

        struct Fixture {
            dir: TempDir,
            store: Arc<MemoryStore>,
            slot: ProcessSlot,
        }

        impl Fixture {
            fn new(kind: SlotKind, grace: Duration) -> Self {
                let dir = tempfile::tempdir().unwrap();
                let store = Arc::new(MemoryStore::new());
                let journal = Journal::new(StoreClient::new(store.clone()));
                let config = SlotConfig::new(dir.path().join("logs").join(format!("{}.log", kind.label())))
                    .with_grace(grace);
                let slot = ProcessSlot::new(kind, config, journal);
                Self { dir, store, slot }
            }

            fn sh(&self, script: &str) -> LaunchSpec {
                let mut spec = LaunchSpec::new("sh", self.dir.path()).args(["-c", script]);
                spec.records.session = Some(SessionPlan {
                    node_id: "node-1".into(),
                    runtime_config: json!({ "command": "test" }),
                });
                spec
            }

            fn log(&self) -> String {
                std::fs::read_to_string(self.slot.log_path()).unwrap_or_default()
            }

            async fn wait_for_log(&self, needle: &str) {
                tokio::time::timeout(Duration::from_secs(10), async {
                    while !self.log().contains(needle) {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                })
                .await
                .unwrap_or_else(|_| panic!("log never contained {needle:?}: {}", self.log()));
            }

            async fn wait_vacant(&self) {
                tokio::time::timeout(Duration::from_secs(10), self.slot.wait_vacant())
                    .await
                    .expect("slot never released");
            }

            fn field(&self, table: &str, id: &str, column: &str) -> Value {
                self.store
                    .row(table, id)
                    .and_then(|row| row.get(column).cloned())
                    .unwrap_or(Value::Null)
            }
        }

        #[tokio::test]
        async fn natural_exit_zero_completes_session() {
            let fx = Fixture::new(SlotKind::Participant, Duration::from_secs(5));
            let ack = fx.slot.start(fx.sh("echo hello")).await.unwrap();
            assert_eq!(ack.status, "running");
            assert!(ack.pid > 0);
            let session = ack.session_id.clone().expect("session id");

            fx.wait_vacant().await;

            let log = fx.log();
            assert!(log.contains("hello\n"));
            assert!(log.contains(&format!("supernode started (pid={})", ack.pid)));
            assert!(log.contains("supernode exited with code 0"));
            assert_eq!(fx.field(tables::NODE_SESSIONS, &session, "status"), json!("completed"));
            assert_eq!(fx.field(tables::NODE_SESSIONS, &session, "pid"), json!(ack.pid));
            assert!(fx.field(tables::NODE_SESSIONS, &session, "ended_at").is_string());
            let mirrored = fx.field(tables::NODE_SESSIONS, &session, "log_stream");
            assert!(mirrored.as_str().unwrap().contains("hello\n"));
        }

        #[tokio::test]
        async fn nonzero_exit_fails_session() {
            let fx = Fixture::new(SlotKind::Coordinator, Duration::from_secs(5));
            let ack = fx.slot.start(fx.sh("echo boom 1>&2; exit 3")).await.unwrap();
            fx.wait_vacant().await;

            let log = fx.log();
            assert!(log.contains("boom\n"), "stderr is captured");
            assert!(log.contains("superlink exited with code 3"));
            let session = ack.session_id.unwrap();
            assert_eq!(fx.field(tables::NODE_SESSIONS, &session, "status"), json!("failed"));
        }

        #[tokio::test]
        async fn second_start_is_rejected_while_occupied() {
            let fx = Fixture::new(SlotKind::Coordinator, Duration::from_secs(5));
            fx.slot.start(fx.sh("sleep 30")).await.unwrap();

            let err = fx.slot.start(fx.sh("sleep 30")).await.unwrap_err();
            assert!(matches!(err, SlotError::AlreadyRunning(SlotKind::Coordinator)));

            fx.slot.stop().await.unwrap();
            assert!(!fx.slot.is_occupied());
        }

        #[tokio::test]
        async fn concurrent_starts_admit_exactly_one() {
            let fx = Fixture::new(SlotKind::Participant, Duration::from_secs(5));
            let (a, b) = tokio::join!(
                fx.slot.start(fx.sh("sleep 30")),
                fx.slot.start(fx.sh("sleep 30")),
            );
            assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
            let err = a.err().or(b.err()).unwrap();
            assert_eq!(err.kind(), "already_running");

            fx.slot.stop().await.unwrap();
        }

        #[tokio::test]
        async fn stop_terminates_and_records_signal_exit() {
            let fx = Fixture::new(SlotKind::Coordinator, Duration::from_secs(5));
            let ack = fx.slot.start(fx.sh("echo up; sleep 30")).await.unwrap();
            fx.wait_for_log("up\n").await;

            let stopped = fx.slot.stop().await.unwrap();
            assert_eq!(stopped.status, "stopped");
            assert!(!fx.slot.is_occupied());

            let log = fx.log();
            assert!(log.contains("superlink stop requested"));
            assert!(log.contains("superlink exited with code -15"));
            let session = ack.session_id.unwrap();
            assert_eq!(fx.field(tables::NODE_SESSIONS, &session, "status"), json!("failed"));
        }

        #[tokio::test]
        async fn stop_escalates_after_grace() {
            let fx = Fixture::new(SlotKind::Participant, Duration::from_millis(300));
            fx.slot
                .start(fx.sh("trap '' TERM; echo armed; while :; do sleep 1; done"))
                .await
                .unwrap();
            fx.wait_for_log("armed\n").await;

            fx.slot.stop().await.unwrap();

            assert!(!fx.slot.is_occupied());
            assert!(fx.log().contains("supernode exited with code -9"));
        }

        #[tokio::test]
        async fn output_is_cleaned_before_logging() {
            let fx = Fixture::new(SlotKind::Run, Duration::from_secs(5));
            fx.slot
                .start(fx.sh(r"printf '\033[32mOK\033[0m\n'; printf 'bad\377byte\n'"))
                .await
                .unwrap();
            fx.wait_vacant().await;

            let log = fx.log();
            assert!(log.contains("OK\n"));
            assert!(log.contains("badbyte\n"));
            assert!(!log.contains('\u{1b}'));
        }

        #[tokio::test]
        async fn spawn_failure_closes_records() {
            let fx = Fixture::new(SlotKind::Coordinator, Duration::from_secs(5));
            let mut spec = fx.sh("unused");
            spec.program = fx.dir.path().join("missing-binary").display().to_string();

            let err = fx.slot.start(spec).await.unwrap_err();
            assert_eq!(err.kind(), "spawn_failed");
            assert!(!fx.slot.is_occupied());

            let sessions = fx.store.rows(tables::NODE_SESSIONS);
            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[0]["status"], json!("failed"));
            assert!(sessions[0]["ended_at"].is_string());
        }

        #[tokio::test]
        async fn run_record_and_correlation_follow_occupancy() {
            let fx = Fixture::new(SlotKind::Run, Duration::from_secs(5));
            let config_path = fx.dir.path().join("pyproject.toml");
            let original = "[tool.flwr.app.config]\nnum-server-rounds = 1\n";
            std::fs::write(&config_path, original).unwrap();

            let mut spec = fx.sh("echo run-id=$FLWR_RUN_ID; sleep 30");
            spec.records.run = Some(RunPlan {
                project_id: "proj-1".into(),
                label: "production".into(),
                config: json!({ "federation_name": "production", "stream": true }),
            });
            spec.label = Some("production".into());
            spec.correlation = Some(ConfigPatcher::for_run_id(&config_path));

            let ack = fx.slot.start(spec).await.unwrap();
            let run_id = ack.run_id.clone().expect("run id");
            let session_id = ack.session_id.clone().expect("session id");

            let patched = std::fs::read_to_string(&config_path).unwrap();
            assert!(patched.contains(&format!("current-run-id = \"{run_id}\"")));
            fx.wait_for_log(&format!("run-id={run_id}")).await;

            assert_eq!(fx.field(tables::FEDERATED_RUNS, &run_id, "status"), json!("running"));
            assert_eq!(
                fx.field(tables::FEDERATED_RUNS, &run_id, "coordinator_session_id"),
                json!(session_id)
            );
            let snapshot = fx.slot.snapshot().unwrap();
            assert_eq!(snapshot.label.as_deref(), Some("production"));
            assert_eq!(snapshot.run_id.as_deref(), Some(run_id.as_str()));

            fx.slot.stop().await.unwrap();

            assert_eq!(std::fs::read_to_string(&config_path).unwrap(), original);
            assert_eq!(fx.field(tables::FEDERATED_RUNS, &run_id, "status"), json!("failed"));
            let mirrored = fx.field(tables::FEDERATED_RUNS, &run_id, "log_stream");
            assert!(mirrored.as_str().unwrap().contains("run stop requested"));
        }

        #[tokio::test]
        async fn slot_is_reusable_after_exit() {
            let fx = Fixture::new(SlotKind::Participant, Duration::from_secs(5));
            fx.slot.start(fx.sh("exit 0")).await.unwrap();
            fx.wait_vacant().await;

            fx.slot.start(fx.sh("exit 0")).await.unwrap();
            fx.wait_vacant().await;

            assert_eq!(fx.log().matches("supernode started").count(), 2);
            assert_eq!(fx.store.rows(tables::NODE_SESSIONS).len(), 2);
        }

        #[tokio::test]
        async fn helper_holding_output_does_not_pin_slot() {
            let fx = Fixture::new(SlotKind::Participant, Duration::from_secs(5));
            let ack = fx.slot.start(fx.sh("sleep 30 & echo leader-done")).await.unwrap();
            fx.wait_vacant().await;

            let log = fx.log();
            assert!(log.contains("leader-done\n"));
            assert!(log.contains("supernode exited with code 0"));
            assert!(!log.contains("stop requested"));
            let session = ack.session_id.unwrap();
            assert_eq!(fx.field(tables::NODE_SESSIONS, &session, "status"), json!("completed"));
        }

        #[tokio::test]
        async fn stop_reaches_helpers_after_leader_exit() {
            let fx = Fixture::new(SlotKind::Participant, Duration::from_secs(1));
            fx.slot
                .start(fx.sh("(trap '' TERM; exec sleep 30) & echo leader-done"))
                .await
                .unwrap();
            fx.wait_for_log("leader-done\n").await;
            assert!(fx.slot.is_occupied(), "helper still holds the output pipes");

            let stopped = tokio::time::timeout(Duration::from_secs(5), fx.slot.stop())
                .await
                .expect("stop hung on a helper process")
                .unwrap();
            assert_eq!(stopped.status, "stopped");
            assert!(!fx.slot.is_occupied());

            let log = fx.log();
            assert!(log.contains("supernode stop requested"));
            assert_eq!(log.matches("supernode exited with code 0").count(), 1);
        }

        #[tokio::test]
        async fn stop_during_start_waits_and_terminates() {
            let fx = Fixture::new(SlotKind::Coordinator, Duration::from_secs(5));
            fx.store.set_latency(Duration::from_millis(500));

            let starter = {
                let slot = fx.slot.clone();
                let spec = fx.sh("echo up; sleep 30");
                tokio::spawn(async move { slot.start(spec).await })
            };
            tokio::time::sleep(Duration::from_millis(150)).await;
            assert!(!fx.slot.is_occupied(), "session record still being opened");

            let stopped = tokio::time::timeout(Duration::from_secs(20), fx.slot.stop())
                .await
                .expect("stop never finished")
                .unwrap();
            assert_eq!(stopped.status, "stopped");

            let ack = starter.await.unwrap().unwrap();
            assert!(ack.pid > 0);
            assert!(!fx.slot.is_occupied());

            let log = fx.log();
            assert!(log.contains(&format!("superlink started (pid={})", ack.pid)));
            assert!(log.contains("superlink stop requested"));
            assert!(log.contains("superlink exited with code -15"));
        }

        #[tokio::test]
        async fn natural_exit_racing_stop_releases_once() {
            let fx = Fixture::new(SlotKind::Participant, Duration::from_secs(5));
            let delays = [160u64, 190, 200, 210, 240];

            for (round, delay) in delays.into_iter().enumerate() {
                fx.slot.start(fx.sh("sleep 0.2")).await.unwrap();
                tokio::time::sleep(Duration::from_millis(delay)).await;

                match fx.slot.stop().await {
                    Ok(ack) => assert_eq!(ack.status, "stopped"),
                    Err(e) => assert_eq!(e.kind(), "not_running"),
                }
                fx.wait_vacant().await;
                assert_eq!(fx.log().matches("supernode exited with code").count(), round + 1);
            }

            let sessions = fx.store.rows(tables::NODE_SESSIONS);
            assert_eq!(sessions.len(), delays.len());
            for session in sessions {
                assert!(session["ended_at"].is_string());
                assert_ne!(session["status"], json!("running"));
            }
        }

        #[tokio::test]
        async fn offline_store_does_not_block_processes() {
            let fx = Fixture::new(SlotKind::Participant, Duration::from_secs(5));
            fx.store.set_offline(true);

            let ack = fx.slot.start(fx.sh("echo offline")).await.unwrap();
            assert!(ack.session_id.is_none());
            fx.wait_vacant().await;

            assert!(fx.log().contains("offline\n"));
        }
    }
}
