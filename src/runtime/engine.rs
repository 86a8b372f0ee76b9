/// Approval workflow engine
///
/// Drives instances through their definition's nodes: submit creates the first cohort of
/// tasks, decisions settle cohorts and advance or terminate the instance, withdraw and
/// resubmit manage the instance chain, and the escalation sweep handles overdue tasks.
///
/// Every state change runs in one SQLite transaction whose updates are guarded on the
/// expected status, so a concurrent change makes the losing call fail cleanly instead of
/// double-applying. Adapter hooks and notifications run after commit; their failures
/// are logged and returned as warnings, never rolled back.

use crate::adapter::{AdapterRegistry, EntityAdapter};
use crate::approval::{
    settle_cohort, ApprovalInstance, ApprovalStore, ApprovalTask, CohortSettlement, Decision,
    DecisionOutcome, InstanceStatus, TaskStatus, Transition,
};
use crate::condition::{ConditionEvaluator, EntityData, INITIATOR_KEY};
use crate::error::{EngineError, EngineResult};
use crate::escalation::EscalationResolver;
use crate::notify::{NotifyEvent, Notifier};
use crate::workflow::types::{Node, TimeoutAction, UserId, WorkflowDefinition};
use crate::workflow::DefinitionRegistry;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteConnection;
use std::{collections::BTreeSet, fmt, sync::Arc};
use uuid::Uuid;

/// Adapter hook to run once the transaction has committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Submit,
    Approved,
    Rejected,
    Withdrawn,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::Submit => "on_submit",
            Hook::Approved => "on_approved",
            Hook::Rejected => "on_rejected",
            Hook::Withdrawn => "on_withdrawn",
        };
        f.write_str(name)
    }
}

/// Post-commit side effect
#[derive(Debug)]
enum Effect {
    Hook(Hook, ApprovalInstance),
    Notify {
        user_ids: BTreeSet<UserId>,
        instance_id: String,
        event: NotifyEvent,
    },
    /// Notify the initiator and the adapter's CC list, plus `extra`
    Announce {
        instance: ApprovalInstance,
        extra: BTreeSet<UserId>,
        event: NotifyEvent,
    },
}

pub struct WorkflowEngine {
    store: ApprovalStore,
    definitions: Arc<DefinitionRegistry>,
    adapters: AdapterRegistry,
    evaluator: ConditionEvaluator,
    notifier: Arc<dyn Notifier>,
    escalation: Arc<dyn EscalationResolver>,
}

impl WorkflowEngine {
    pub fn new(
        store: ApprovalStore,
        definitions: Arc<DefinitionRegistry>,
        adapters: AdapterRegistry,
        evaluator: ConditionEvaluator,
        notifier: Arc<dyn Notifier>,
        escalation: Arc<dyn EscalationResolver>,
    ) -> Self {
        Self {
            store,
            definitions,
            adapters,
            evaluator,
            notifier,
            escalation,
        }
    }

    /// Start approval for a business entity
    pub async fn submit(
        &self,
        business_type: &str,
        business_id: &str,
        initiator_id: &str,
    ) -> EngineResult<Transition<ApprovalInstance>> {
        self.start_instance(business_type, business_id, initiator_id, None).await
    }

    /// Start a new instance for the entity of a REJECTED or WITHDRAWN one, linking back to it
    pub async fn resubmit(
        &self,
        old_instance_id: &str,
        initiator_id: &str,
    ) -> EngineResult<Transition<ApprovalInstance>> {
        let previous = {
            let mut conn = self.store.connection().await?;
            let previous = self.require_instance(&mut conn, old_instance_id).await?;
            self.check_resubmittable(&mut conn, &previous, initiator_id).await?;
            previous
        };

        self.start_instance(
            &previous.business_type,
            &previous.business_id,
            initiator_id,
            Some(&previous),
        )
        .await
    }

    /// Record an approver's decision and settle the cohort
    pub async fn decide(
        &self,
        task_id: &str,
        approver_id: &str,
        decision: Decision,
        comment: Option<&str>,
    ) -> EngineResult<Transition<DecisionOutcome>> {
        let (task, instance) = {
            let mut conn = self.store.connection().await?;
            let task = self
                .store
                .get_task(&mut conn, task_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("approval task {}", task_id)))?;
            let instance = self.require_instance(&mut conn, &task.instance_id).await?;
            (task, instance)
        };

        check_decidable(&task, approver_id)?;
        if instance.status.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "approval instance {} is already {:?}",
                instance.id, instance.status
            )));
        }

        let entity_data = self.entity_data(&instance).await;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;

        if !self
            .store
            .decide_task(&mut tx, task_id, decision.task_status(), comment, now)
            .await?
        {
            // Lost a race: report what the task became
            let current = self.store.get_task(&mut tx, task_id).await?;
            return Err(match current.map(|t| t.status) {
                Some(TaskStatus::Approved) | Some(TaskStatus::Rejected) => {
                    EngineError::AlreadyDecided(task_id.to_string())
                }
                _ => EngineError::InvalidState(format!("approval task {} is no longer pending", task_id)),
            });
        }

        // Re-read the instance under the transaction before settling
        let instance = self.require_instance(&mut tx, &task.instance_id).await?;
        if instance.status.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "approval instance {} is already {:?}",
                instance.id, instance.status
            )));
        }
        let definition = self.store.instance_definition(&mut tx, &instance.id).await?;

        let mut effects = Vec::new();
        let outcome = self
            .settle_and_apply(&mut tx, &instance, &definition, task.sequence, &entity_data, now, &mut effects)
            .await?;

        tx.commit().await?;

        tracing::info!(
            "🗳️ Task {} {:?} by {} on instance {} -> {:?}",
            task_id,
            decision,
            approver_id,
            instance.id,
            outcome
        );

        let warnings = self.run_effects(effects).await;
        Ok(Transition::new(outcome, warnings))
    }

    /// Cancel an open instance; only its initiator may do so
    pub async fn withdraw(
        &self,
        instance_id: &str,
        by_user_id: &str,
    ) -> EngineResult<Transition<ApprovalInstance>> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let instance = self.require_instance(&mut tx, instance_id).await?;
        if instance.initiator_id != by_user_id {
            return Err(EngineError::NotAuthorized(format!(
                "only the initiator may withdraw approval instance {}",
                instance_id
            )));
        }
        if instance.status.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "approval instance {} is already {:?}",
                instance_id, instance.status
            )));
        }

        let waiting_on: BTreeSet<UserId> = self
            .store
            .instance_tasks(&mut tx, instance_id)
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.approver_id)
            .collect();

        self.store.skip_pending_tasks(&mut tx, instance_id, None, now).await?;
        if !self
            .store
            .terminate_instance(&mut tx, instance_id, InstanceStatus::Withdrawn, None, now)
            .await?
        {
            return Err(EngineError::InvalidState(format!(
                "approval instance {} is no longer open",
                instance_id
            )));
        }

        tx.commit().await?;
        tracing::info!("↩️ Approval instance {} withdrawn by {}", instance_id, by_user_id);

        let withdrawn = terminated(instance, InstanceStatus::Withdrawn, None, now);
        let effects = vec![
            Effect::Hook(Hook::Withdrawn, withdrawn.clone()),
            Effect::Announce {
                instance: withdrawn.clone(),
                extra: waiting_on,
                event: NotifyEvent::InstanceWithdrawn,
            },
        ];
        let warnings = self.run_effects(effects).await;

        Ok(Transition::new(withdrawn, warnings))
    }

    /// Escalate every overdue PENDING task; returns how many were escalated
    pub async fn escalate_overdue(&self) -> EngineResult<usize> {
        self.escalate_overdue_at(Utc::now()).await
    }

    /// Escalation sweep against an explicit clock
    ///
    /// Each task is escalated in its own transaction; one failure is logged and the sweep
    /// moves on.
    pub async fn escalate_overdue_at(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let overdue = {
            let mut conn = self.store.connection().await?;
            self.store.overdue_tasks(&mut conn, now).await?
        };

        if overdue.is_empty() {
            tracing::debug!("Escalation sweep found no overdue tasks");
            return Ok(0);
        }

        let mut escalated = 0;
        for task in &overdue {
            match self.escalate_task(task, now).await {
                Ok(true) => escalated += 1,
                Ok(false) => tracing::debug!("Task {} changed before escalation; skipped", task.id),
                Err(e) => tracing::error!("❌ Failed to escalate task {}: {}", task.id, e),
            }
        }

        tracing::info!("⏫ Escalation sweep: {} of {} overdue tasks escalated", escalated, overdue.len());
        Ok(escalated)
    }

    pub async fn get_instance(&self, instance_id: &str) -> EngineResult<ApprovalInstance> {
        let mut conn = self.store.connection().await?;
        self.require_instance(&mut conn, instance_id).await
    }

    /// All tasks of an instance in cohort order, including terminal ones
    pub async fn list_tasks(&self, instance_id: &str) -> EngineResult<Vec<ApprovalTask>> {
        let mut conn = self.store.connection().await?;
        self.require_instance(&mut conn, instance_id).await?;
        self.store.instance_tasks(&mut conn, instance_id).await
    }

    /// Resubmission chain containing `instance_id`, oldest first
    pub async fn instance_chain(&self, instance_id: &str) -> EngineResult<Vec<ApprovalInstance>> {
        let mut conn = self.store.connection().await?;
        let start = self.require_instance(&mut conn, instance_id).await?;

        let mut chain = vec![start.clone()];
        let mut cursor = start.previous_instance_id.clone();
        while let Some(previous_id) = cursor {
            let previous = self.require_instance(&mut conn, &previous_id).await?;
            cursor = previous.previous_instance_id.clone();
            chain.insert(0, previous);
        }

        let mut tail = start.id;
        while let Some(next) = self.store.successor_of(&mut conn, &tail).await? {
            tail = next.id.clone();
            chain.push(next);
        }

        Ok(chain)
    }

    /// Tasks waiting on a user's decision
    pub async fn pending_tasks_for(&self, approver_id: &str) -> EngineResult<Vec<ApprovalTask>> {
        let mut conn = self.store.connection().await?;
        self.store.pending_tasks_for_approver(&mut conn, approver_id).await
    }

    /// Open instance for an entity, if any
    pub async fn current_instance(
        &self,
        business_type: &str,
        business_id: &str,
    ) -> EngineResult<Option<ApprovalInstance>> {
        let mut conn = self.store.connection().await?;
        self.store.open_instance_for(&mut conn, business_type, business_id).await
    }

    async fn start_instance(
        &self,
        business_type: &str,
        business_id: &str,
        initiator_id: &str,
        previous: Option<&ApprovalInstance>,
    ) -> EngineResult<Transition<ApprovalInstance>> {
        let adapter = self.adapter(business_type)?;

        adapter
            .validate_submit(business_id)
            .await
            .map_err(EngineError::ValidationFailed)?;

        let mut entity_data = adapter.get_entity_data(business_id).await;
        entity_data.insert(INITIATOR_KEY, initiator_id);

        let candidates = self.definitions.for_business_type(business_type);
        // Snapshot with parallel siblings merged, one node per cohort
        let definition = self
            .evaluator
            .select_definition(&candidates, &entity_data)
            .ok_or_else(|| {
                EngineError::NotFound(format!("no workflow definition applies to {} {}", business_type, business_id))
            })?
            .folded();

        let (first_node, approvers) = self
            .plan_next_cohort(&definition, None, &entity_data)
            .ok_or_else(|| {
                EngineError::ValidationFailed(format!(
                    "workflow {} resolves no approvers for {} {}",
                    definition.flow_code, business_type, business_id
                ))
            })?;

        let now = Utc::now();
        let instance = ApprovalInstance {
            id: Uuid::new_v4().to_string(),
            business_type: business_type.to_string(),
            business_id: business_id.to_string(),
            flow_code: definition.flow_code.clone(),
            initiator_id: initiator_id.to_string(),
            status: InstanceStatus::Pending,
            current_sequence: first_node.sequence,
            previous_instance_id: previous.map(|p| p.id.clone()),
            title: adapter.generate_title(business_id).await,
            summary: adapter.generate_summary(business_id).await,
            rejection_reason: None,
            created_at: now,
            terminal_at: None,
        };

        let mut tx = self.store.begin().await?;

        if let Some(previous) = previous {
            // Re-check under the transaction: another resubmit may have won
            let previous = self.require_instance(&mut tx, &previous.id).await?;
            self.check_resubmittable(&mut tx, &previous, initiator_id).await?;
        }

        if let Some(open) = self.store.open_instance_for(&mut tx, business_type, business_id).await? {
            return Err(EngineError::InvalidState(format!(
                "{} {} already has open approval instance {}",
                business_type, business_id, open.id
            )));
        }

        self.store
            .insert_instance(&mut tx, &instance, &definition)
            .await
            .map_err(|e| open_conflict(e, business_type, business_id))?;
        self.create_cohort(&mut tx, &instance.id, &first_node, &approvers, now).await?;

        tx.commit().await?;

        tracing::info!(
            "📝 Approval instance {} started for {} {} (flow {}, {} approvers at sequence {})",
            instance.id,
            business_type,
            business_id,
            instance.flow_code,
            approvers.len(),
            first_node.sequence
        );

        let effects = vec![
            Effect::Hook(Hook::Submit, instance.clone()),
            Effect::Notify {
                user_ids: approvers,
                instance_id: instance.id.clone(),
                event: NotifyEvent::TaskAssigned,
            },
        ];
        let warnings = self.run_effects(effects).await;

        Ok(Transition::new(instance, warnings))
    }

    async fn escalate_task(&self, task: &ApprovalTask, now: DateTime<Utc>) -> EngineResult<bool> {
        let (instance, definition) = {
            let mut conn = self.store.connection().await?;
            let instance = self.require_instance(&mut conn, &task.instance_id).await?;
            let definition = self.store.instance_definition(&mut conn, &instance.id).await?;
            (instance, definition)
        };

        let node = definition.node(task.sequence).ok_or_else(|| {
            EngineError::InvalidState(format!(
                "workflow {} has no node at sequence {}",
                definition.flow_code, task.sequence
            ))
        })?;
        let policy = node.escalation.clone();

        let target = match policy.as_ref().map(|p| p.on_timeout) {
            Some(TimeoutAction::Reassign) => {
                let target = self.escalation.resolve_escalation_target(task).await;
                if target.is_none() {
                    tracing::warn!(
                        "⚠️ No escalation target for task {} ({}); treating as satisfied",
                        task.id,
                        task.approver_id
                    );
                }
                target
            }
            _ => None,
        };

        let entity_data = self.entity_data(&instance).await;
        let replacement = target.map(|approver_id| ApprovalTask {
            id: Uuid::new_v4().to_string(),
            instance_id: task.instance_id.clone(),
            sequence: task.sequence,
            approver_id,
            status: TaskStatus::Pending,
            decision_comment: None,
            has_veto_power: task.has_veto_power,
            due_date: policy
                .as_ref()
                .map(|p| now + Duration::hours(i64::from(p.timeout_hours))),
            decided_at: None,
            replaced_by: None,
            created_at: now,
        });

        let mut tx = self.store.begin().await?;

        let replaced_by = replacement.as_ref().map(|t| t.id.as_str());
        if !self.store.escalate_task(&mut tx, &task.id, replaced_by, now).await? {
            return Ok(false);
        }

        let instance = self.require_instance(&mut tx, &task.instance_id).await?;
        if !self
            .store
            .update_open_instance(&mut tx, &instance.id, InstanceStatus::Escalated, instance.current_sequence)
            .await?
        {
            return Ok(false);
        }

        let mut effects = Vec::new();
        let mut escalated_to = BTreeSet::from([task.approver_id.clone()]);
        if let Some(replacement) = &replacement {
            self.store.insert_task(&mut tx, replacement).await?;
            escalated_to.insert(replacement.approver_id.clone());
            effects.push(Effect::Notify {
                user_ids: BTreeSet::from([replacement.approver_id.clone()]),
                instance_id: instance.id.clone(),
                event: NotifyEvent::TaskAssigned,
            });
        }
        effects.push(Effect::Notify {
            user_ids: escalated_to,
            instance_id: instance.id.clone(),
            event: NotifyEvent::TaskEscalated,
        });

        let mut escalated_instance = instance;
        escalated_instance.status = InstanceStatus::Escalated;
        let outcome = self
            .settle_and_apply(&mut tx, &escalated_instance, &definition, task.sequence, &entity_data, now, &mut effects)
            .await?;

        tx.commit().await?;

        match &replacement {
            Some(replacement) => tracing::info!(
                "⏫ Task {} escalated from {} to {} (task {})",
                task.id,
                task.approver_id,
                replacement.approver_id,
                replacement.id
            ),
            None => tracing::info!("⏫ Task {} auto-satisfied after timeout -> {:?}", task.id, outcome),
        }

        for warning in self.run_effects(effects).await {
            tracing::warn!("Escalation of task {}: {}", task.id, warning);
        }

        Ok(true)
    }

    /// Settle the cohort at `sequence` and apply the result to the instance
    #[allow(clippy::too_many_arguments)]
    async fn settle_and_apply(
        &self,
        conn: &mut SqliteConnection,
        instance: &ApprovalInstance,
        definition: &WorkflowDefinition,
        sequence: i64,
        entity_data: &EntityData,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) -> EngineResult<DecisionOutcome> {
        let node = definition.node(sequence).ok_or_else(|| {
            EngineError::InvalidState(format!(
                "workflow {} has no node at sequence {}",
                definition.flow_code, sequence
            ))
        })?;

        let cohort = self.store.cohort_tasks(conn, &instance.id, sequence).await?;

        match settle_cohort(&cohort, node.settlement_threshold()) {
            CohortSettlement::Open => Ok(DecisionOutcome::Pending),

            CohortSettlement::Rejected { rejected_by, reason, vetoed } => {
                let skipped = self.store.skip_pending_tasks(conn, &instance.id, None, now).await?;
                self.terminate(conn, instance, InstanceStatus::Rejected, reason.as_deref(), now)
                    .await?;

                tracing::info!(
                    "❌ Approval instance {} rejected by task {} (veto: {}, {} tasks skipped)",
                    instance.id,
                    rejected_by,
                    vetoed,
                    skipped
                );

                let rejected = terminated(instance.clone(), InstanceStatus::Rejected, reason, now);
                effects.push(Effect::Hook(Hook::Rejected, rejected.clone()));
                effects.push(Effect::Announce {
                    instance: rejected,
                    extra: BTreeSet::new(),
                    event: NotifyEvent::InstanceRejected,
                });

                Ok(DecisionOutcome::Rejected { vetoed })
            }

            CohortSettlement::Approved { skipped } => {
                if !skipped.is_empty() {
                    self.store
                        .skip_pending_tasks(conn, &instance.id, Some(sequence), now)
                        .await?;
                    tracing::debug!("Cohort {} of {} settled; skipped {:?}", sequence, instance.id, skipped);
                }

                match self.plan_next_cohort(definition, Some(node), entity_data) {
                    Some((next, approvers)) => {
                        self.create_cohort(conn, &instance.id, &next, &approvers, now).await?;
                        if !self
                            .store
                            .update_open_instance(conn, &instance.id, InstanceStatus::Pending, next.sequence)
                            .await?
                        {
                            return Err(EngineError::InvalidState(format!(
                                "approval instance {} is no longer open",
                                instance.id
                            )));
                        }

                        effects.push(Effect::Notify {
                            user_ids: approvers,
                            instance_id: instance.id.clone(),
                            event: NotifyEvent::TaskAssigned,
                        });

                        Ok(DecisionOutcome::Advanced { sequence: next.sequence })
                    }
                    None => {
                        self.terminate(conn, instance, InstanceStatus::Approved, None, now).await?;
                        tracing::info!("✅ Approval instance {} approved", instance.id);

                        let approved = terminated(instance.clone(), InstanceStatus::Approved, None, now);
                        effects.push(Effect::Hook(Hook::Approved, approved.clone()));
                        effects.push(Effect::Announce {
                            instance: approved,
                            extra: BTreeSet::new(),
                            event: NotifyEvent::InstanceApproved,
                        });

                        Ok(DecisionOutcome::Approved)
                    }
                }
            }
        }
    }

    /// Next node after `after` that resolves at least one approver
    fn plan_next_cohort(
        &self,
        definition: &WorkflowDefinition,
        after: Option<&Node>,
        entity_data: &EntityData,
    ) -> Option<(Node, BTreeSet<UserId>)> {
        let mut cursor = after;
        loop {
            let next = self.evaluator.resolve_next_node(definition, cursor, entity_data)?;
            let approvers = self.evaluator.resolve_approvers(next, entity_data);
            if !approvers.is_empty() {
                return Some((next.clone(), approvers));
            }

            tracing::warn!(
                "⚠️ Node {} ({}) of workflow {} resolved no approvers; skipping",
                next.sequence,
                next.name,
                definition.flow_code
            );
            cursor = Some(next);
        }
    }

    async fn create_cohort(
        &self,
        conn: &mut SqliteConnection,
        instance_id: &str,
        node: &Node,
        approvers: &BTreeSet<UserId>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let due_date = node
            .escalation
            .as_ref()
            .map(|policy| now + Duration::hours(i64::from(policy.timeout_hours)));

        for approver_id in approvers {
            let task = ApprovalTask {
                id: Uuid::new_v4().to_string(),
                instance_id: instance_id.to_string(),
                sequence: node.sequence,
                approver_id: approver_id.clone(),
                status: TaskStatus::Pending,
                decision_comment: None,
                has_veto_power: node.has_veto(approver_id),
                due_date,
                decided_at: None,
                replaced_by: None,
                created_at: now,
            };
            self.store.insert_task(conn, &task).await?;
        }

        Ok(())
    }

    async fn terminate(
        &self,
        conn: &mut SqliteConnection,
        instance: &ApprovalInstance,
        status: InstanceStatus,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        if self.store.terminate_instance(conn, &instance.id, status, reason, now).await? {
            Ok(())
        } else {
            Err(EngineError::InvalidState(format!(
                "approval instance {} is no longer open",
                instance.id
            )))
        }
    }

    async fn check_resubmittable(
        &self,
        conn: &mut SqliteConnection,
        previous: &ApprovalInstance,
        initiator_id: &str,
    ) -> EngineResult<()> {
        if !matches!(previous.status, InstanceStatus::Rejected | InstanceStatus::Withdrawn) {
            return Err(EngineError::InvalidState(format!(
                "approval instance {} is {:?}; only rejected or withdrawn instances can be resubmitted",
                previous.id, previous.status
            )));
        }
        if previous.initiator_id != initiator_id {
            return Err(EngineError::NotAuthorized(format!(
                "only the initiator may resubmit approval instance {}",
                previous.id
            )));
        }
        if let Some(successor) = self.store.successor_of(conn, &previous.id).await? {
            return Err(EngineError::InvalidState(format!(
                "approval instance {} was already resubmitted as {}",
                previous.id, successor.id
            )));
        }
        Ok(())
    }

    async fn require_instance(
        &self,
        conn: &mut SqliteConnection,
        instance_id: &str,
    ) -> EngineResult<ApprovalInstance> {
        self.store
            .get_instance(conn, instance_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("approval instance {}", instance_id)))
    }

    fn adapter(&self, business_type: &str) -> EngineResult<Arc<dyn EntityAdapter>> {
        self.adapters
            .get(business_type)
            .ok_or_else(|| EngineError::NotFound(format!("no adapter registered for business type {}", business_type)))
    }

    /// Entity snapshot used for condition evaluation, with the initiator injected
    async fn entity_data(&self, instance: &ApprovalInstance) -> EntityData {
        let mut data = match self.adapters.get(&instance.business_type) {
            Some(adapter) => adapter.get_entity_data(&instance.business_id).await,
            None => {
                tracing::warn!(
                    "No adapter for business type {}; evaluating {} without entity data",
                    instance.business_type,
                    instance.id
                );
                EntityData::new()
            }
        };
        data.insert(INITIATOR_KEY, instance.initiator_id.as_str());
        data
    }

    /// Run post-commit hooks and notifications, collecting hook failures as warnings
    async fn run_effects(&self, effects: Vec<Effect>) -> Vec<String> {
        let mut warnings = Vec::new();

        for effect in effects {
            match effect {
                Effect::Hook(hook, instance) => {
                    let Some(adapter) = self.adapters.get(&instance.business_type) else {
                        let warning = format!(
                            "{} skipped for {} {}: no adapter registered",
                            hook, instance.business_type, instance.business_id
                        );
                        tracing::warn!("⚠️ {}", warning);
                        warnings.push(warning);
                        continue;
                    };

                    let id = instance.business_id.as_str();
                    let result = match hook {
                        Hook::Submit => adapter.on_submit(id, &instance).await,
                        Hook::Approved => adapter.on_approved(id, &instance).await,
                        Hook::Rejected => adapter.on_rejected(id, &instance).await,
                        Hook::Withdrawn => adapter.on_withdrawn(id, &instance).await,
                    };

                    if let Err(e) = result {
                        let warning = format!(
                            "{} failed for {} {}: {}",
                            hook, instance.business_type, instance.business_id, e
                        );
                        tracing::warn!("⚠️ {}", warning);
                        warnings.push(warning);
                    }
                }
                Effect::Notify { user_ids, instance_id, event } => {
                    self.notifier.notify(&user_ids, &instance_id, event).await;
                }
                Effect::Announce { instance, mut extra, event } => {
                    extra.insert(instance.initiator_id.clone());
                    if let Some(adapter) = self.adapters.get(&instance.business_type) {
                        extra.extend(adapter.get_cc_user_ids(&instance.business_id).await);
                    }
                    self.notifier.notify(&extra, &instance.id, event).await;
                }
            }
        }

        warnings
    }
}

fn check_decidable(task: &ApprovalTask, approver_id: &str) -> EngineResult<()> {
    if task.approver_id != approver_id {
        return Err(EngineError::NotAuthorized(format!(
            "task {} is assigned to another approver",
            task.id
        )));
    }

    match task.status {
        TaskStatus::Pending => Ok(()),
        TaskStatus::Approved | TaskStatus::Rejected => Err(EngineError::AlreadyDecided(task.id.clone())),
        TaskStatus::Skipped | TaskStatus::Escalated => Err(EngineError::InvalidState(format!(
            "approval task {} is {:?}",
            task.id, task.status
        ))),
    }
}

fn terminated(
    mut instance: ApprovalInstance,
    status: InstanceStatus,
    reason: Option<String>,
    at: DateTime<Utc>,
) -> ApprovalInstance {
    instance.status = status;
    instance.rejection_reason = reason;
    instance.terminal_at = Some(at);
    instance
}

/// Map a unique-index violation on insert to "already has an open instance"
fn open_conflict(err: EngineError, business_type: &str, business_id: &str) -> EngineError {
    if let EngineError::Storage(sqlx::Error::Database(db)) = &err {
        if db.is_unique_violation() {
            return EngineError::InvalidState(format!(
                "{} {} already has an open approval instance",
                business_type, business_id
            ));
        }
    }
    err
}
