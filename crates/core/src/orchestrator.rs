//! The orchestrator: the boundary through which workflows are submitted,
//! polled, approved and cancelled.
//!
//! Each workflow is driven by one background task that begins a step,
//! executes it outside any lock, then folds the result back in. Every
//! mutation of a task goes through [`Inner::transition`]: it takes the
//! per-task lock, applies a state-machine function to a copy of the stored
//! state, writes it back with compare-and-swap and only then publishes the
//! resulting events. A workflow waiting for approval holds no task at all;
//! [`Orchestrator::resolve_approval`] spawns a fresh driver.

use crate::agents::factory::{AgentFactory, ProviderAdapterBuilder};
use crate::agents::telemetry::Telemetry;
use crate::config::models::AppConfig;
use crate::engine::{PlanBuilder, WorkflowEngine};
use crate::mcp::{GatewayToolClient, LocalToolClient, ToolClient, ToolError};
use crate::secrets::{EnvManager, SecretProvider};
use crate::state::store::{FileStore, StateStore, StoreError};
use crate::state::workflow::{self, TransitionError};
use af_protocol::config_models::OrchestratorSettings;
use af_protocol::ipc::WorkflowEvent;
use af_protocol::plan_models::PlanTemplate;
use af_protocol::workflow_models::{
    new_task_id, ApprovalDecision, WorkflowRequest, WorkflowState, WorkflowStatus,
};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, OwnedMutexGuard};
use tokio::task::{JoinHandle, JoinSet};

const EVENT_CAPACITY: usize = 1024;
const MAX_TASK_ID_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition for task {task_id}: {from} -> {to}")]
    InvalidStateTransition {
        task_id: String,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Concurrent update conflict on task {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl From<TransitionError> for OrchestratorError {
    fn from(error: TransitionError) -> Self {
        Self::InvalidStateTransition {
            task_id: error.task_id,
            from: error.from,
            to: error.to,
        }
    }
}

/// Async mutexes keyed by task id.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    fn forget(&self, key: &str) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

fn validate_task_id(task_id: &str) -> Result<(), OrchestratorError> {
    let valid = !task_id.is_empty()
        && task_id.len() <= MAX_TASK_ID_LEN
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidRequest(format!(
            "task_id '{task_id}' must be 1-{MAX_TASK_ID_LEN} ASCII letters, digits, '-' or '_'"
        )))
    }
}

struct Inner {
    store: Arc<dyn StateStore>,
    engine: WorkflowEngine,
    plans: PlanBuilder,
    settings: OrchestratorSettings,
    task_locks: KeyedLocks,
    driver_locks: KeyedLocks,
    events: broadcast::Sender<WorkflowEvent>,
    drivers: Mutex<JoinSet<()>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    /// Apply `mutate` to the stored state of `task_id` and persist the
    /// result. Unchanged states are not written.
    async fn transition<T, F>(&self, task_id: &str, mutate: F) -> Result<(WorkflowState, T), OrchestratorError>
    where
        F: FnOnce(&mut WorkflowState, &mut Vec<WorkflowEvent>) -> Result<T, OrchestratorError> + Send,
        T: Send,
    {
        let _guard = self.task_locks.lock(task_id).await;
        let current = self
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(task_id.to_string()))?;

        let mut next = current.clone();
        let mut events = Vec::new();
        let value = mutate(&mut next, &mut events)?;
        if next == current {
            return Ok((current, value));
        }

        next.version = current.version + 1;
        next.updated_at = Utc::now();
        if !self.store.compare_and_swap(current.version, &next).await? {
            return Err(OrchestratorError::Conflict(task_id.to_string()));
        }
        if next.is_terminal() {
            self.task_locks.forget(task_id);
            self.driver_locks.forget(task_id);
        }

        for event in events {
            if let WorkflowEvent::StatusChanged { from, to, .. } = &event {
                tracing::info!(task_id, from = %from, to = %to, "workflow status changed");
            }
            let _ = self.events.send(event);
        }
        Ok((next, value))
    }

    /// Read a workflow, first applying any timeout that has come due: an
    /// expired deadline times the workflow out, an expired approval window
    /// rejects the gate and resumes the workflow on its reject branch.
    async fn get_status(self: &Arc<Self>, task_id: &str) -> Result<WorkflowState, OrchestratorError> {
        let state = self
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(task_id.to_string()))?;
        let now = Utc::now();
        let deadline_due = state.status.is_timeout_eligible() && state.is_expired(now);
        if !deadline_due && !state.approval_expired(now) {
            return Ok(state);
        }

        let (state, resume) = self
            .transition(task_id, |state, events| {
                let now = Utc::now();
                if workflow::check_deadline(state, now, events) {
                    return Ok(false);
                }
                Ok(workflow::expire_approval(state, now, events))
            })
            .await?;
        if resume {
            tracing::info!(task_id, "approval window closed, gate rejected");
            self.spawn_driver(task_id.to_string());
        }
        Ok(state)
    }

    fn spawn_driver(self: &Arc<Self>, task_id: String) {
        let inner = Arc::clone(self);
        let mut drivers = self.drivers.lock().unwrap_or_else(PoisonError::into_inner);
        while drivers.try_join_next().is_some() {}
        drivers.spawn(async move { inner.drive(&task_id).await });
    }

    /// Run steps until the workflow is terminal or waits for approval.
    async fn drive(&self, task_id: &str) {
        let _driver = self.driver_locks.lock(task_id).await;
        loop {
            let begun = self
                .transition(task_id, |state, events| {
                    Ok(workflow::begin_next_step(state, Utc::now(), events))
                })
                .await;
            let (state, index) = match begun {
                Ok((state, Some(index))) => (state, index),
                Ok((state, None)) => {
                    tracing::debug!(task_id, status = %state.status, "driver idle");
                    return;
                }
                Err(e) => {
                    tracing::error!(task_id, error = %e, "failed to begin step");
                    return;
                }
            };
            let Some(spec) = state.plan.step(index).cloned() else {
                return;
            };

            tracing::info!(task_id, step = %spec.name, kind = spec.kind.label(), "executing step");
            let execution = self.engine.execute_step(&state, &spec).await;

            let finished = self
                .transition(task_id, |state, events| {
                    Ok(workflow::finish_step(state, index, execution, Utc::now(), events))
                })
                .await;
            match finished {
                Ok((_, true)) => {}
                Ok((state, false)) => {
                    tracing::debug!(task_id, status = %state.status, "driver stopped");
                    return;
                }
                Err(e) => {
                    tracing::error!(task_id, step = %spec.name, error = %e, "failed to record step");
                    return;
                }
            }
        }
    }
}

/// Cheap to clone; clones share the same workflows.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        engine: WorkflowEngine,
        store: Arc<dyn StateStore>,
        templates: Vec<PlanTemplate>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                engine,
                plans: PlanBuilder::new(&settings, templates),
                settings,
                task_locks: KeyedLocks::default(),
                driver_locks: KeyedLocks::default(),
                events,
                drivers: Mutex::new(JoinSet::new()),
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Wire an orchestrator from loaded project configuration: provider
    /// adapters, the configured tool client and a file store under the
    /// state directory.
    pub async fn from_config(
        config: &AppConfig,
        root: &Path,
        secrets: Arc<dyn SecretProvider>,
        telemetry: Telemetry,
    ) -> Result<Self, OrchestratorError> {
        let settings = config.settings.clone();

        let factory = Arc::new(AgentFactory::new(
            Arc::new(ProviderAdapterBuilder::new(telemetry)),
            EnvManager::new(secrets),
        ));
        for agent in &config.agents {
            factory.register(agent.clone());
        }

        let tool_timeout = Duration::from_secs(settings.tool_timeout_seconds);
        let tools: Arc<dyn ToolClient> = match &settings.tool_gateway_url {
            Some(url) => Arc::new(GatewayToolClient::new(url, tool_timeout)?),
            None => Arc::new(LocalToolClient::with_builtins(root, tool_timeout)),
        };

        let store = Arc::new(FileStore::open(config.state_dir(root)).await?);
        let engine = WorkflowEngine::new(factory, tools, &settings)
            .with_project_path(root.display().to_string());

        Ok(Self::new(settings, engine, store, config.plans.clone()))
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    pub fn factory(&self) -> &Arc<AgentFactory> {
        self.inner.engine.factory()
    }

    pub fn tools(&self) -> &Arc<dyn ToolClient> {
        self.inner.engine.tools()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.inner.events.subscribe()
    }

    /// Accept a workflow and start driving it in the background.
    ///
    /// Returns as soon as the PENDING state is persisted.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a malformed task id, a zero timeout or an
    ///   invalid explicit plan
    /// - `DuplicateTask` when the task id is already taken
    pub async fn submit_workflow(&self, mut request: WorkflowRequest) -> Result<String, OrchestratorError> {
        let task_id = request.task_id.clone().unwrap_or_else(new_task_id);
        validate_task_id(&task_id)?;

        let timeout_seconds = request
            .timeout_seconds
            .unwrap_or(self.inner.settings.default_timeout_seconds);
        if timeout_seconds == 0 {
            return Err(OrchestratorError::InvalidRequest(
                "timeout_seconds must be positive".to_string(),
            ));
        }

        let plan = self
            .inner
            .plans
            .build(&request)
            .map_err(|e| OrchestratorError::InvalidRequest(e.to_string()))?;

        request.task_id = Some(task_id.clone());
        let agent_role = request.agent_role.clone();
        let steps = plan.len();
        let state = WorkflowState::new(task_id.clone(), request, plan, timeout_seconds);

        self.inner.store.insert(&state).await.map_err(|e| match e {
            StoreError::AlreadyExists(id) => OrchestratorError::DuplicateTask(id),
            other => other.into(),
        })?;

        tracing::info!(task_id = %task_id, role = %agent_role, steps, timeout_seconds, "workflow submitted");
        let _ = self.inner.events.send(WorkflowEvent::Submitted {
            task_id: task_id.clone(),
            agent_role,
        });

        self.inner.spawn_driver(task_id.clone());
        Ok(task_id)
    }

    /// Current state of a workflow, timing it out first if its deadline has
    /// passed.
    pub async fn get_status(&self, task_id: &str) -> Result<WorkflowState, OrchestratorError> {
        self.inner.get_status(task_id).await
    }

    /// Approve or reject the pending gate of a workflow.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` when the workflow is not AWAITING_APPROVAL;
    /// the stored state is left untouched.
    pub async fn resolve_approval(
        &self,
        task_id: &str,
        decision: ApprovalDecision,
        comment: Option<String>,
    ) -> Result<WorkflowState, OrchestratorError> {
        self.resolve_approval_by(task_id, decision, None, comment).await
    }

    /// [`Orchestrator::resolve_approval`], recording who decided.
    pub async fn resolve_approval_by(
        &self,
        task_id: &str,
        decision: ApprovalDecision,
        actor: Option<String>,
        comment: Option<String>,
    ) -> Result<WorkflowState, OrchestratorError> {
        self.inner.get_status(task_id).await?;

        let (state, resume) = self
            .inner
            .transition(task_id, |state, events| {
                Ok(workflow::resolve_approval(
                    state,
                    decision,
                    actor,
                    comment,
                    Utc::now(),
                    events,
                )?)
            })
            .await?;

        tracing::info!(task_id, decision = ?decision, resume, "approval resolved");
        if resume {
            self.inner.spawn_driver(task_id.to_string());
        }
        Ok(state)
    }

    /// Cancel a live workflow. An in-flight step runs to completion but its
    /// result is discarded.
    pub async fn cancel(&self, task_id: &str) -> Result<WorkflowState, OrchestratorError> {
        self.cancel_by(task_id, None, None).await
    }

    /// [`Orchestrator::cancel`], recording who cancelled and why.
    pub async fn cancel_by(
        &self,
        task_id: &str,
        actor: Option<String>,
        reason: Option<String>,
    ) -> Result<WorkflowState, OrchestratorError> {
        self.inner.get_status(task_id).await?;

        let (state, ()) = self
            .inner
            .transition(task_id, |state, events| {
                Ok(workflow::cancel(state, actor, reason, Utc::now(), events)?)
            })
            .await?;
        tracing::info!(task_id, actor = ?state.cancellation.as_ref().and_then(|c| c.actor.as_deref()), "workflow cancelled");
        Ok(state)
    }

    /// Poll until the workflow is terminal or waiting for approval.
    pub async fn wait_until_settled(
        &self,
        task_id: &str,
        poll_interval: Duration,
    ) -> Result<WorkflowState, OrchestratorError> {
        loop {
            let state = self.get_status(task_id).await?;
            if state.is_terminal() || state.status == WorkflowStatus::AwaitingApproval {
                return Ok(state);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn list(&self) -> Result<Vec<WorkflowState>, OrchestratorError> {
        Ok(self.inner.store.list().await?)
    }

    /// Apply every timeout that has come due: time out workflows past their
    /// deadline and reject gates whose approval window closed. Returns how
    /// many workflows were affected.
    pub async fn sweep_timeouts(&self) -> Result<usize, OrchestratorError> {
        let now = Utc::now();
        let mut timed_out = 0;
        let mut expired_gates = 0;
        for state in self.inner.store.list_active().await? {
            let deadline_due = state.status.is_timeout_eligible() && state.is_expired(now);
            if !deadline_due && !state.approval_expired(now) {
                continue;
            }
            match self.inner.get_status(&state.task_id).await {
                Ok(swept) if swept.status == WorkflowStatus::TimedOut => timed_out += 1,
                Ok(swept) if swept.status != state.status => expired_gates += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(task_id = %state.task_id, error = %e, "timeout sweep failed"),
            }
        }
        if timed_out + expired_gates > 0 {
            tracing::info!(timed_out, expired_gates, "timeout sweep");
        }
        Ok(timed_out + expired_gates)
    }

    /// Start the background sweep: time out expired workflows and evict idle
    /// agents every `sweep_interval_seconds`.
    pub fn spawn_sweeper(&self) {
        let orchestrator = self.clone();
        let interval = Duration::from_secs(self.inner.settings.sweep_interval_seconds.max(1));
        let max_idle = Duration::from_secs(self.inner.settings.agent_idle_timeout_seconds);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = orchestrator.sweep_timeouts().await {
                    tracing::warn!(error = %e, "timeout sweep failed");
                }
                orchestrator.factory().evict_idle(max_idle);
            }
        });

        let previous = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Resume every stored workflow that is neither terminal nor waiting for
    /// approval. Returns how many drivers were started.
    pub async fn recover(&self) -> Result<usize, OrchestratorError> {
        let mut resumed = 0;
        for state in self.inner.store.list_active().await? {
            if state.status == WorkflowStatus::AwaitingApproval {
                continue;
            }
            tracing::info!(task_id = %state.task_id, status = %state.status, "resuming workflow");
            self.inner.spawn_driver(state.task_id);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Stop the sweeper and all drivers, then drop cached agents. Persisted
    /// workflows can be picked up again with [`Orchestrator::recover`].
    pub async fn shutdown(&self) {
        if let Some(sweeper) = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }

        let mut drivers = std::mem::take(
            &mut *self
                .inner
                .drivers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        drivers.abort_all();
        while drivers.join_next().await.is_some() {}

        self.factory().cache().clear();
        tracing::info!("orchestrator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_validation() {
        assert!(validate_task_id("task-1_a").is_ok());
        assert!(validate_task_id("").is_err());
        assert!(validate_task_id("../escape").is_err());
        assert!(validate_task_id("has space").is_err());
        assert!(validate_task_id(&"x".repeat(MAX_TASK_ID_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn test_keyed_locks_are_per_key() {
        let locks = KeyedLocks::default();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
        let a_again = tokio::time::timeout(Duration::from_millis(50), locks.lock("a")).await;
        assert!(a_again.is_err());
    }
}
