use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use fedrun_exec::{
    ConfigPatcher, LaunchSpec, ProcessSlot, RecordPlan, RunPlan, SessionPlan, SlotConfig, SlotError, SlotSnapshot,
};
use fedrun_model::{
    ActiveRun, CoordinatorHealth, Health, NodeRole, ParticipantHealth, ProcessEnv, RunInfo, RunStartRequest, SlotKind,
    StartAck, StartRequest, StopAck, SuperlinkStartRequest, SupernodeStartRequest, rfc3339,
};
use fedrun_store::{IdentityResolver, Journal, StoreClient};
use tracing::{debug, info, instrument, warn};

use crate::{command, error::SupervisorError, settings::SupervisorSettings};

/// Services shared by every slot of one supervisor; built once at startup.
#[derive(Debug, Clone)]
pub struct Context {
    pub journal: Journal,
    pub identity: Arc<IdentityResolver>,
}

impl Context {
    pub fn new(store: StoreClient) -> Self {
        Self {
            identity: Arc::new(IdentityResolver::new(store.clone())),
            journal: Journal::new(store),
        }
    }
}

/// Identity a participant start runs under: request values, else store resolution.
#[derive(Debug, Default, Clone)]
struct ActiveIdentity {
    project_id: Option<String>,
    node_id: Option<String>,
    user_id: Option<String>,
}

/// Identity of the current participant occupancy, keyed by its snapshot.
#[derive(Debug, Clone)]
struct ActiveParticipant {
    occupancy: SlotSnapshot,
    identity: ActiveIdentity,
}

pub struct Supervisor {
    role: NodeRole,
    settings: SupervisorSettings,
    context: Context,
    slots: BTreeMap<SlotKind, ProcessSlot>,
    active: Mutex<Option<ActiveParticipant>>,
}

impl Supervisor {
    /// Aggregation server plus run slot.
    pub fn coordinator(settings: SupervisorSettings, store: StoreClient) -> Self {
        Self::with_slots(NodeRole::Coordinator, settings, store, &[SlotKind::Coordinator, SlotKind::Run])
    }

    /// Participant slot only.
    pub fn participant(settings: SupervisorSettings, store: StoreClient) -> Self {
        Self::with_slots(NodeRole::Participant, settings, store, &[SlotKind::Participant])
    }

    fn with_slots(role: NodeRole, settings: SupervisorSettings, store: StoreClient, kinds: &[SlotKind]) -> Self {
        let context = Context::new(store);
        let slots = kinds
            .iter()
            .map(|&kind| {
                let config = SlotConfig::new(settings.log_path(kind)).with_grace(settings.grace);
                (kind, ProcessSlot::new(kind, config, context.journal.clone()))
            })
            .collect();
        info!(%role, app_dir = %settings.app_dir.display(), store = context.journal.is_enabled(), "supervisor ready");
        Self {
            role,
            settings,
            context,
            slots,
            active: Mutex::new(None),
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Slot kinds this supervisor owns, in route order.
    pub fn managed(&self) -> Vec<SlotKind> {
        self.slots.keys().copied().collect()
    }

    pub fn slot(&self, kind: SlotKind) -> Result<&ProcessSlot, SupervisorError> {
        self.slots.get(&kind).ok_or(SupervisorError::Unmanaged(kind))
    }

    #[instrument(level = "debug", skip_all, fields(slot = %req.kind()))]
    pub async fn start(&self, req: StartRequest) -> Result<StartAck, SupervisorError> {
        let kind = req.kind();
        let slot = self.slot(kind)?;
        if kind == SlotKind::Run && !self.slot(SlotKind::Coordinator)?.is_occupied() {
            return Err(SupervisorError::DependencyNotRunning {
                slot: SlotKind::Run,
                dependency: SlotKind::Coordinator,
            });
        }
        // Checked again atomically by the slot; this avoids opening records for a doomed start.
        if slot.is_occupied() {
            return Err(SlotError::AlreadyRunning(kind).into());
        }

        let spec = match req {
            StartRequest::Superlink(r) => self.superlink_spec(&r).await,
            StartRequest::Run(r) => self.run_spec(&r).await,
            StartRequest::Supernode(r) => {
                let (spec, identity) = self.supernode_spec(&r).await;
                let ack = slot.start(spec).await?;
                // A child that already exited has no occupancy to describe.
                *self.lock_active() = slot.snapshot().map(|occupancy| ActiveParticipant { occupancy, identity });
                return Ok(ack);
            }
        };
        Ok(slot.start(spec).await?)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn stop(&self, kind: SlotKind) -> Result<StopAck, SupervisorError> {
        let result = self.slot(kind)?.stop().await;
        if kind == SlotKind::Participant {
            *self.lock_active() = None;
        }
        Ok(result?)
    }

    pub fn health(&self) -> Health {
        match self.role {
            NodeRole::Coordinator => {
                let superlink = self.snapshot(SlotKind::Coordinator);
                let run = self.snapshot(SlotKind::Run);
                Health::Coordinator(CoordinatorHealth {
                    superlink_running: superlink.is_some(),
                    run_active: run.is_some(),
                    started_at: superlink.as_ref().map(|s| rfc3339(s.started_at)),
                    session_id: superlink.and_then(|s| s.session_id),
                    run_info: run.map(run_info),
                })
            }
            NodeRole::Participant => {
                let supernode = self.snapshot(SlotKind::Participant);
                let identity = self.active_identity().unwrap_or_default();
                Health::Participant(ParticipantHealth {
                    supernode_running: supernode.is_some(),
                    started_at: supernode.as_ref().map(|s| rfc3339(s.started_at)),
                    session_id: supernode.and_then(|s| s.session_id),
                    log_path: self.settings.log_path(SlotKind::Participant).display().to_string(),
                    project_id: identity.project_id,
                    node_id: identity.node_id,
                    user_id: identity.user_id,
                })
            }
        }
    }

    pub fn active_run(&self) -> Result<ActiveRun, SupervisorError> {
        let slot = self.slot(SlotKind::Run)?;
        Ok(ActiveRun {
            run: slot.snapshot().map(run_info),
        })
    }

    /// Stop every occupied slot, runs before the server they depend on.
    pub async fn shutdown(&self) {
        let order = [SlotKind::Run, SlotKind::Coordinator, SlotKind::Participant];
        for kind in order {
            let Some(slot) = self.slots.get(&kind) else { continue };
            if !slot.is_occupied() {
                continue;
            }
            match slot.stop().await {
                Ok(_) => info!(slot = %kind, "stopped on shutdown"),
                Err(e) => warn!(slot = %kind, error = %e, "stop on shutdown failed"),
            }
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveParticipant>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity of the running participant; dropped once its occupancy is gone,
    /// whether it was stopped or exited on its own.
    fn active_identity(&self) -> Option<ActiveIdentity> {
        let current = self.snapshot(SlotKind::Participant);
        let mut active = self.lock_active();
        if active.as_ref().map(|a| &a.occupancy) != current.as_ref() {
            *active = None;
        }
        active.as_ref().map(|a| a.identity.clone())
    }

    fn snapshot(&self, kind: SlotKind) -> Option<SlotSnapshot> {
        self.slots.get(&kind).and_then(ProcessSlot::snapshot)
    }

    fn launch(&self, cmd: command::CommandLine) -> LaunchSpec {
        let mut spec = LaunchSpec::new(cmd.program, &self.settings.app_dir).args(cmd.args);
        spec.env = self.settings.child_env.clone();
        spec
    }

    /// Project and node ids of this coordinator, when the store knows them.
    async fn coordinator_identity(&self) -> (Option<String>, Option<String>) {
        let identity = &self.context.identity;
        let project_id = identity
            .resolve_project(&self.settings.project_slug, &self.settings.project_name)
            .await;
        let node_id = match &project_id {
            Some(project) => {
                identity
                    .resolve_node(
                        project,
                        &self.settings.node_external_id,
                        NodeRole::Coordinator,
                        &self.settings.node_display_name,
                    )
                    .await
            }
            None => None,
        };
        (project_id, node_id)
    }

    async fn superlink_spec(&self, req: &SuperlinkStartRequest) -> LaunchSpec {
        let cmd = command::superlink(&self.settings.programs.superlink, req);
        let runtime_config = command::superlink_runtime_config(&cmd, req);
        let (_, node_id) = self.coordinator_identity().await;

        let mut spec = self.launch(cmd);
        spec.records.session = node_id.map(|node_id| SessionPlan { node_id, runtime_config });
        spec
    }

    async fn run_spec(&self, req: &RunStartRequest) -> LaunchSpec {
        let cmd = command::run(&self.settings.programs.flwr, req);
        let (project_id, node_id) = self.coordinator_identity().await;

        let mut spec = self.launch(cmd);
        spec.records = RecordPlan {
            session: node_id.map(|node_id| SessionPlan {
                node_id,
                runtime_config: command::run_session_config(req),
            }),
            run: project_id.map(|project_id| RunPlan {
                project_id,
                label: req.federation_name.clone(),
                config: command::run_record_config(req),
            }),
        };
        spec.label = Some(req.federation_name.clone());
        spec.correlation = Some(ConfigPatcher::for_run_id(self.settings.config_path()));
        spec
    }

    async fn supernode_spec(&self, req: &SupernodeStartRequest) -> (LaunchSpec, ActiveIdentity) {
        let identity = self.participant_identity(req).await;
        let cmd = command::supernode(&self.settings.programs.supernode, req);

        let mut env = ProcessEnv::new()
            .with("PROJECT_SLUG", self.settings.project_slug.as_str())
            .with("NODE_EXTERNAL_ID", self.settings.node_external_id.as_str());
        if let Some(project_id) = &identity.project_id {
            env.push("PROJECT_ID", project_id.as_str());
        }
        if let Some(node_id) = &identity.node_id {
            env.push("NODE_ID", node_id.as_str());
        }

        let mut spec = self.launch(cmd);
        // Configured variables win over the defaults above.
        spec.env = env.merged(&self.settings.child_env);
        spec.records.session = match (&identity.project_id, &identity.node_id) {
            (Some(project_id), Some(node_id)) => Some(SessionPlan {
                node_id: node_id.clone(),
                runtime_config: command::supernode_runtime_config(
                    req,
                    project_id,
                    node_id,
                    identity.user_id.as_deref(),
                ),
            }),
            _ => {
                debug!("participant identity unknown; no session recorded");
                None
            }
        };
        (spec, identity)
    }

    /// Request values first, store resolution for whatever is missing.
    async fn participant_identity(&self, req: &SupernodeStartRequest) -> ActiveIdentity {
        let mut project_id = req.project_id.clone();
        if project_id.is_none() {
            project_id = self
                .context
                .identity
                .resolve_project(&self.settings.project_slug, &self.settings.project_name)
                .await;
        }

        let mut node_id = req.node_id.clone();
        if node_id.is_none() {
            if let Some(project) = &project_id {
                node_id = self
                    .context
                    .identity
                    .resolve_node(
                        project,
                        &self.settings.node_external_id,
                        NodeRole::Participant,
                        &self.settings.node_display_name,
                    )
                    .await;
            }
        }

        ActiveIdentity {
            project_id,
            node_id,
            user_id: req.user_id.clone(),
        }
    }
}

fn run_info(snapshot: SlotSnapshot) -> RunInfo {
    RunInfo {
        federation_name: snapshot.label.unwrap_or_default(),
        started_at: rfc3339(snapshot.started_at),
        pid: snapshot.pid,
        log_path: snapshot.log_path.display().to_string(),
        run_id: snapshot.run_id,
        session_id: snapshot.session_id,
    }
}
