use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use retention_core::error::{RetentionError, RetentionResult};
use retention_core::event_bus::{make_event, noop_sink, EventSink};
use retention_core::experimentation::VariantAssigner;
use retention_core::types::{
    Arm, CancellationRecord, EventType, Offer, SubmissionReceipt, SubscriptionRef,
};
use retention_core::validation::{validate_flow_state, ValidCancellation};

use crate::gateway::CancellationGateway;
use crate::state_machine::{FlowEvent, FlowState, Step};

/// Point-in-time view of one flow, returned by every engine operation.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowSnapshot {
    pub flow_id: Uuid,
    pub user_id: String,
    pub subscription_id: String,
    pub state: FlowState,
    /// Present once the arm is resolved.
    pub offer: Option<Offer>,
    /// Present once the submission succeeded.
    pub cancellation: Option<CancellationRecord>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct FlowSession {
    user_id: String,
    subscription: SubscriptionRef,
    state: FlowState,
    cancellation: Option<CancellationRecord>,
    submitting: bool,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FlowSession {
    fn snapshot(&self, flow_id: Uuid) -> FlowSnapshot {
        FlowSnapshot {
            flow_id,
            user_id: self.user_id.clone(),
            subscription_id: self.subscription.id.clone(),
            state: self.state.clone(),
            offer: self.state.offer(self.subscription.monthly_price).ok(),
            cancellation: self.cancellation.clone(),
            started_at: self.started_at,
        }
    }

    fn submission(&self) -> RetentionResult<ValidCancellation> {
        let arm = self.state.arm().ok_or_else(|| {
            RetentionError::InvalidState("cannot submit before the arm is resolved".to_string())
        })?;
        Ok(ValidCancellation {
            user_id: self.user_id.clone(),
            subscription_id: self.subscription.id.clone(),
            downsell_variant: arm,
            reason: self
                .state
                .cancellation_reason()
                .unwrap_or_default()
                .to_string(),
            accepted_downsell: self.state.accepted_downsell().unwrap_or(false),
        })
    }
}

/// Clears a session's in-flight flag when the submission finishes or its
/// future is dropped.
struct InFlight {
    sessions: Arc<DashMap<Uuid, FlowSession>>,
    flow_id: Uuid,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(mut session) = self.sessions.get_mut(&self.flow_id) {
            session.submitting = false;
        }
    }
}

/// Manages cancellation flows: one session per flow, advanced only through
/// the [`FlowState`] reducer.
pub struct FlowEngine<G> {
    sessions: Arc<DashMap<Uuid, FlowSession>>,
    assigner: VariantAssigner,
    gateway: Arc<G>,
    event_sink: Arc<dyn EventSink>,
    node_id: String,
    max_active_flows: usize,
}

impl<G> Clone for FlowEngine<G> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
            assigner: self.assigner,
            gateway: self.gateway.clone(),
            event_sink: self.event_sink.clone(),
            node_id: self.node_id.clone(),
            max_active_flows: self.max_active_flows,
        }
    }
}

impl<G> std::fmt::Debug for FlowEngine<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("sessions", &self.sessions.len())
            .field("max_active_flows", &self.max_active_flows)
            .finish()
    }
}

impl<G: CancellationGateway> FlowEngine<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            assigner: VariantAssigner::new(),
            gateway,
            event_sink: noop_sink(),
            node_id: "local".to_string(),
            max_active_flows: usize::MAX,
        }
    }

    /// Attach an event sink for emitting analytics events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Node id stamped on emitted analytics events.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_assigner(mut self, assigner: VariantAssigner) -> Self {
        self.assigner = assigner;
        self
    }

    pub fn with_max_active_flows(mut self, max: usize) -> Self {
        self.max_active_flows = max;
        self
    }

    pub fn assigner(&self) -> &VariantAssigner {
        &self.assigner
    }

    pub fn active_flows(&self) -> usize {
        self.sessions.len()
    }

    /// Opens a flow for `user_id` at `job_question` with the user's arm
    /// already resolved.
    pub fn start(
        &self,
        user_id: &str,
        subscription: SubscriptionRef,
    ) -> RetentionResult<FlowSnapshot> {
        let arm = self.assigner.assign(user_id)?;
        self.emit(EventType::VariantAssigned, None, user_id, Some(arm), None);

        let state = FlowState::new().apply(&FlowEvent::ResolveArm { arm })?;
        self.insert(user_id, subscription, state, EventType::FlowStarted)
    }

    /// Opens a flow from state held by the client. The raw state is checked
    /// before it is trusted, the arm is always re-derived, and the saved
    /// answers are replayed so the step must follow from them.
    pub fn restore(
        &self,
        user_id: &str,
        subscription: SubscriptionRef,
        raw_state: &Value,
    ) -> RetentionResult<FlowSnapshot> {
        validate_flow_state(raw_state)?;
        let saved: FlowState = serde_json::from_value(raw_state.clone()).map_err(|e| {
            RetentionError::InvalidInput(format!("malformed flow state: {e}"))
        })?;

        let arm = self.assigner.assign(user_id)?;
        let state = FlowState::replay(&saved, arm)?;
        state.require_renderable()?;
        self.insert(user_id, subscription, state, EventType::FlowRestored)
    }

    fn insert(
        &self,
        user_id: &str,
        subscription: SubscriptionRef,
        state: FlowState,
        event_type: EventType,
    ) -> RetentionResult<FlowSnapshot> {
        if self.sessions.len() >= self.max_active_flows {
            warn!(limit = self.max_active_flows, "Rejecting flow, too many active");
            return Err(RetentionError::CapacityExceeded(self.max_active_flows));
        }

        let flow_id = Uuid::new_v4();
        let now = Utc::now();
        let arm = state.arm();
        let step = state.current_step();
        let session = FlowSession {
            user_id: user_id.to_string(),
            subscription,
            state,
            cancellation: None,
            submitting: false,
            started_at: now,
            updated_at: now,
        };
        let snapshot = session.snapshot(flow_id);
        self.sessions.insert(flow_id, session);

        info!(flow_id = %flow_id, user_id = %user_id, variant = ?arm, step = step.as_str(), "Flow opened");
        metrics::counter!(
            "flow.started",
            "variant" => arm.map(|a| a.as_str()).unwrap_or("none")
        )
        .increment(1);
        self.emit(event_type, Some(flow_id), user_id, arm, Some(step));
        Ok(snapshot)
    }

    pub fn get(&self, flow_id: &Uuid) -> Option<FlowSnapshot> {
        self.sessions.get(flow_id).map(|s| s.snapshot(*flow_id))
    }

    /// Feeds a user answer through the reducer. Acceptance of the submission
    /// is reserved for [`FlowEngine::confirm`].
    pub fn apply(&self, flow_id: &Uuid, event: FlowEvent) -> RetentionResult<FlowSnapshot> {
        if event == FlowEvent::SubmissionAccepted {
            return Err(RetentionError::InvalidState(
                "submissions are accepted only through confirm".to_string(),
            ));
        }

        let (snapshot, from) = {
            let mut session = self
                .sessions
                .get_mut(flow_id)
                .ok_or(RetentionError::FlowNotFound(*flow_id))?;
            if session.submitting {
                return Err(RetentionError::SubmissionInFlight(*flow_id));
            }
            let from = session.state.current_step();
            let next = session.state.apply(&event)?;
            session.state = next;
            session.updated_at = Utc::now();
            (session.snapshot(*flow_id), from)
        };

        let to = snapshot.state.current_step();
        let arm = snapshot.state.arm();
        debug!(flow_id = %flow_id, from = from.as_str(), to = to.as_str(), trigger = event.trigger(), "Flow advanced");

        if let FlowEvent::AnswerDownsell { accept } = event {
            let event_type = if accept {
                EventType::DownsellAccepted
            } else {
                EventType::DownsellDeclined
            };
            metrics::counter!(
                "flow.downsell_responses",
                "variant" => arm.map(|a| a.as_str()).unwrap_or("none"),
                "accepted" => if accept { "true" } else { "false" }
            )
            .increment(1);
            self.emit(event_type, Some(*flow_id), &snapshot.user_id, arm, Some(to));
        } else if from != to {
            self.emit(EventType::StepAdvanced, Some(*flow_id), &snapshot.user_id, arm, Some(to));
        }

        Ok(snapshot)
    }

    /// Offer for the flow's arm at the subscription's monthly price.
    pub fn offer(&self, flow_id: &Uuid) -> RetentionResult<Offer> {
        let session = self
            .sessions
            .get(flow_id)
            .ok_or(RetentionError::FlowNotFound(*flow_id))?;
        session.state.offer(session.subscription.monthly_price)
    }

    /// Submits the flow from `confirmation`.
    ///
    /// Only one submission per flow may be in flight. On failure the flow
    /// stays at `confirmation` and the error is returned. If the flow is
    /// closed, or this future dropped, before the gateway answers, nothing is
    /// committed to the session.
    pub async fn confirm(&self, flow_id: &Uuid) -> RetentionResult<SubmissionReceipt> {
        let flow_id = *flow_id;
        let (payload, user_id, arm, _in_flight) = {
            let mut session = self
                .sessions
                .get_mut(&flow_id)
                .ok_or(RetentionError::FlowNotFound(flow_id))?;
            if session.submitting {
                return Err(RetentionError::SubmissionInFlight(flow_id));
            }
            if session.state.current_step() != Step::Confirmation {
                return Err(RetentionError::InvalidState(format!(
                    "confirm is not allowed from step {}",
                    session.state.current_step().as_str()
                )));
            }
            validate_flow_state(&serde_json::to_value(&session.state)?)?;
            let submission = session.submission()?;

            session.submitting = true;
            let guard = InFlight {
                sessions: self.sessions.clone(),
                flow_id,
            };
            (
                submission.to_payload(),
                session.user_id.clone(),
                submission.downsell_variant,
                guard,
            )
        };

        match self.gateway.submit(payload).await {
            Ok(receipt) => {
                if !self.commit(flow_id, &receipt)? {
                    warn!(flow_id = %flow_id, "Flow closed during submission, result not applied");
                }
                info!(
                    flow_id = %flow_id,
                    cancellation_id = %receipt.cancellation.id,
                    accepted_downsell = receipt.cancellation.accepted_downsell,
                    "Cancellation submitted"
                );
                metrics::counter!("flow.submissions", "outcome" => "success").increment(1);
                self.emit(
                    EventType::CancellationSubmitted,
                    Some(flow_id),
                    &user_id,
                    Some(arm),
                    Some(Step::Success),
                );
                Ok(receipt)
            }
            Err(e) => {
                warn!(flow_id = %flow_id, error = %e, "Cancellation submission failed");
                metrics::counter!("flow.submissions", "outcome" => "failure").increment(1);
                self.emit(
                    EventType::SubmissionFailed,
                    Some(flow_id),
                    &user_id,
                    Some(arm),
                    Some(Step::Confirmation),
                );
                Err(e)
            }
        }
    }

    /// Moves the session to `success` and stores the record. Returns `false`
    /// when the flow no longer exists.
    fn commit(&self, flow_id: Uuid, receipt: &SubmissionReceipt) -> RetentionResult<bool> {
        let Some(mut session) = self.sessions.get_mut(&flow_id) else {
            return Ok(false);
        };
        let next = session.state.apply(&FlowEvent::SubmissionAccepted)?;
        session.state = next;
        session.cancellation = Some(receipt.cancellation.clone());
        session.updated_at = Utc::now();
        Ok(true)
    }

    /// Starts the flow over from `job_question`, keeping the user's arm.
    pub fn restart(&self, flow_id: &Uuid) -> RetentionResult<FlowSnapshot> {
        let mut session = self
            .sessions
            .get_mut(flow_id)
            .ok_or(RetentionError::FlowNotFound(*flow_id))?;
        if session.submitting {
            return Err(RetentionError::SubmissionInFlight(*flow_id));
        }
        if session.cancellation.is_some() {
            return Err(RetentionError::InvalidState(
                "flow already has a recorded cancellation".to_string(),
            ));
        }
        let mut next = session.state.reset();
        if let Some(arm) = session.state.arm() {
            next = next.apply(&FlowEvent::ResolveArm { arm })?;
        }
        session.state = next;
        session.updated_at = Utc::now();
        Ok(session.snapshot(*flow_id))
    }

    /// Discards a flow. Returns `false` if it did not exist.
    pub fn close(&self, flow_id: &Uuid) -> bool {
        match self.sessions.remove(flow_id) {
            Some((_, session)) => {
                info!(flow_id = %flow_id, step = session.state.current_step().as_str(), "Flow closed");
                self.emit(
                    EventType::FlowClosed,
                    Some(*flow_id),
                    &session.user_id,
                    session.state.arm(),
                    Some(session.state.current_step()),
                );
                true
            }
            None => false,
        }
    }

    /// Drops flows idle for longer than `ttl`. Flows with a submission in
    /// flight are kept.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        // A ttl reaching before the representable range expires nothing.
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };
        let mut expired = Vec::new();

        self.sessions.retain(|id, session| {
            let keep = session.submitting || session.updated_at > cutoff;
            if !keep {
                expired.push((*id, session.user_id.clone(), session.state.arm()));
            }
            keep
        });

        for (flow_id, user_id, arm) in &expired {
            self.emit(EventType::FlowExpired, Some(*flow_id), user_id, *arm, None);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Swept expired flows");
            metrics::counter!("flow.expired").increment(expired.len() as u64);
        }
        expired.len()
    }

    fn emit(
        &self,
        event_type: EventType,
        flow_id: Option<Uuid>,
        user_id: &str,
        arm: Option<Arm>,
        step: Option<Step>,
    ) {
        let mut event = make_event(event_type, flow_id, Some(user_id.to_string()), arm);
        event.step = step.map(|s| s.as_str().to_string());
        event.node_id = self.node_id.clone();
        self.event_sink.emit(event);
    }
}
