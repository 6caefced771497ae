use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use retention_core::error::{RetentionError, RetentionResult};
use retention_core::offer::price_offer;
use retention_core::types::{Arm, Offer};

/// A step of the cancellation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    JobQuestion,
    FoundJob,
    StillLooking,
    JobHelp,
    DownsellOffer,
    Confirmation,
    Success,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::JobQuestion => "job_question",
            Step::FoundJob => "found_job",
            Step::StillLooking => "still_looking",
            Step::JobHelp => "job_help",
            Step::DownsellOffer => "downsell_offer",
            Step::Confirmation => "confirmation",
            Step::Success => "success",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Success)
    }

    /// Steps that display the priced offer and so need a resolved arm.
    pub fn requires_offer(&self) -> bool {
        matches!(self, Step::DownsellOffer | Step::Confirmation)
    }

    /// Triggers that may fire from this step, for presentation.
    pub fn allowed_triggers(&self) -> Vec<&'static str> {
        TRANSITIONS
            .iter()
            .filter(|t| t.from == *self)
            .map(|t| t.trigger)
            .collect()
    }
}

/// Something that happened in the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FlowEvent {
    #[serde(rename_all = "camelCase")]
    AnswerFoundJob { found_job: bool },
    Continue,
    #[serde(rename_all = "camelCase")]
    AnswerJobHelp { needs_help: bool },
    AnswerDownsell { accept: bool },
    ResolveArm { arm: Arm },
    /// The submission was validated and recorded. Only the engine's confirm
    /// path emits this.
    SubmissionAccepted,
}

impl FlowEvent {
    pub fn trigger(&self) -> &'static str {
        match self {
            FlowEvent::AnswerFoundJob { found_job: true } => "answer_found_job_yes",
            FlowEvent::AnswerFoundJob { found_job: false } => "answer_found_job_no",
            FlowEvent::Continue => "continue",
            FlowEvent::AnswerJobHelp { .. } => "answer_job_help",
            FlowEvent::AnswerDownsell { accept: true } => "accept_downsell",
            FlowEvent::AnswerDownsell { accept: false } => "decline_downsell",
            FlowEvent::ResolveArm { .. } => "resolve_arm",
            FlowEvent::SubmissionAccepted => "confirm",
        }
    }
}

/// Describes a single valid step transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepTransition {
    pub from: Step,
    pub to: Step,
    pub trigger: &'static str,
}

/// Every step-changing edge of the flow. `resolve_arm` leaves the step
/// untouched and is not listed.
pub const TRANSITIONS: &[StepTransition] = &[
    StepTransition {
        from: Step::JobQuestion,
        to: Step::FoundJob,
        trigger: "answer_found_job_yes",
    },
    StepTransition {
        from: Step::JobQuestion,
        to: Step::StillLooking,
        trigger: "answer_found_job_no",
    },
    StepTransition {
        from: Step::FoundJob,
        to: Step::JobHelp,
        trigger: "continue",
    },
    StepTransition {
        from: Step::StillLooking,
        to: Step::JobHelp,
        trigger: "continue",
    },
    StepTransition {
        from: Step::JobHelp,
        to: Step::DownsellOffer,
        trigger: "answer_job_help",
    },
    StepTransition {
        from: Step::DownsellOffer,
        to: Step::Confirmation,
        trigger: "accept_downsell",
    },
    StepTransition {
        from: Step::DownsellOffer,
        to: Step::Success,
        trigger: "decline_downsell",
    },
    StepTransition {
        from: Step::Confirmation,
        to: Step::Success,
        trigger: "confirm",
    },
];

/// Returns `true` if the table has an edge from `from` to `to`.
pub fn can_transition(from: Step, to: Step) -> bool {
    TRANSITIONS.iter().any(|t| t.from == from && t.to == to)
}

/// Answers collected so far and the step the user is on.
///
/// Fields are private: the only way to change a state is [`FlowState::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    current_step: Step,
    #[serde(default)]
    found_job: Option<bool>,
    #[serde(default)]
    needs_job_help: Option<bool>,
    #[serde(default)]
    cancellation_reason: Option<String>,
    #[serde(default)]
    arm: Option<Arm>,
    #[serde(default)]
    accepted_downsell: Option<bool>,
}

impl FlowState {
    /// Initial state: `job_question`, nothing answered, no arm.
    pub fn new() -> Self {
        Self {
            current_step: Step::JobQuestion,
            found_job: None,
            needs_job_help: None,
            cancellation_reason: None,
            arm: None,
            accepted_downsell: None,
        }
    }

    pub fn current_step(&self) -> Step {
        self.current_step
    }

    pub fn found_job(&self) -> Option<bool> {
        self.found_job
    }

    pub fn needs_job_help(&self) -> Option<bool> {
        self.needs_job_help
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn arm(&self) -> Option<Arm> {
        self.arm
    }

    pub fn accepted_downsell(&self) -> Option<bool> {
        self.accepted_downsell
    }

    /// Pure reducer: the state after `event`, or `InvalidState` when the
    /// event is not legal from the current step.
    pub fn apply(&self, event: &FlowEvent) -> RetentionResult<FlowState> {
        let mut next = self.clone();

        match (self.current_step, *event) {
            (step, FlowEvent::ResolveArm { arm }) => {
                if step.is_terminal() {
                    return Err(self.rejected(event));
                }
                match self.arm {
                    Some(existing) if existing != arm => {
                        return Err(RetentionError::InvalidState(format!(
                            "arm already resolved to {existing}, refusing {arm}"
                        )));
                    }
                    _ => next.arm = Some(arm),
                }
            }
            (Step::JobQuestion, FlowEvent::AnswerFoundJob { found_job }) => {
                let step = if found_job {
                    Step::FoundJob
                } else {
                    Step::StillLooking
                };
                next.found_job = Some(found_job);
                next.cancellation_reason = Some(step.as_str().to_string());
                next.current_step = step;
            }
            (Step::FoundJob | Step::StillLooking, FlowEvent::Continue) => {
                next.current_step = Step::JobHelp;
            }
            (Step::JobHelp, FlowEvent::AnswerJobHelp { needs_help }) => {
                next.needs_job_help = Some(needs_help);
                next.current_step = Step::DownsellOffer;
            }
            (Step::DownsellOffer, FlowEvent::AnswerDownsell { accept: true }) => {
                if self.arm.is_none() {
                    return Err(RetentionError::InvalidState(
                        "cannot accept a downsell before the arm is resolved".to_string(),
                    ));
                }
                next.accepted_downsell = Some(true);
                next.current_step = Step::Confirmation;
            }
            (Step::DownsellOffer, FlowEvent::AnswerDownsell { accept: false }) => {
                next.accepted_downsell = Some(false);
                next.current_step = Step::Success;
            }
            (Step::Confirmation, FlowEvent::SubmissionAccepted) => {
                next.current_step = Step::Success;
            }
            _ => return Err(self.rejected(event)),
        }

        Ok(next)
    }

    /// Rebuilds `saved` by replaying the answers it holds through
    /// [`FlowState::apply`], starting from a fresh state with `arm` resolved.
    ///
    /// Fails with `InvalidState` when the saved step cannot be reached from
    /// the saved answers, or when any saved field differs from the replayed
    /// one. A saved arm other than `arm` is a difference.
    pub fn replay(saved: &FlowState, arm: Arm) -> RetentionResult<FlowState> {
        if saved.current_step.is_terminal() {
            return Err(RetentionError::InvalidState(
                "a finished flow cannot be restored".to_string(),
            ));
        }

        let mut state = FlowState::new().apply(&FlowEvent::ResolveArm { arm })?;
        while state.current_step != saved.current_step {
            let event = match state.current_step {
                Step::JobQuestion => FlowEvent::AnswerFoundJob {
                    found_job: saved.found_job.ok_or_else(|| unanswered(saved, "foundJob"))?,
                },
                Step::FoundJob | Step::StillLooking => FlowEvent::Continue,
                Step::JobHelp => FlowEvent::AnswerJobHelp {
                    needs_help: saved
                        .needs_job_help
                        .ok_or_else(|| unanswered(saved, "needsJobHelp"))?,
                },
                Step::DownsellOffer => FlowEvent::AnswerDownsell {
                    accept: saved
                        .accepted_downsell
                        .ok_or_else(|| unanswered(saved, "acceptedDownsell"))?,
                },
                Step::Confirmation | Step::Success => {
                    return Err(RetentionError::InvalidState(format!(
                        "step {} is not reachable from the saved answers",
                        saved.current_step.as_str()
                    )));
                }
            };
            state = state.apply(&event)?;
        }

        let mut expected = saved.clone();
        expected.arm = saved.arm.or(Some(arm));
        if expected != state {
            return Err(RetentionError::InvalidState(format!(
                "saved answers do not match step {}",
                saved.current_step.as_str()
            )));
        }
        Ok(state)
    }

    /// Back to the initial state.
    pub fn reset(&self) -> FlowState {
        FlowState::new()
    }

    /// Fails when the current step cannot be shown: offer steps need an arm.
    pub fn require_renderable(&self) -> RetentionResult<()> {
        if self.current_step.requires_offer() && self.arm.is_none() {
            return Err(RetentionError::InvalidState(format!(
                "step {} requires a resolved arm",
                self.current_step.as_str()
            )));
        }
        Ok(())
    }

    /// Offer for the resolved arm at `monthly_price`.
    pub fn offer(&self, monthly_price: u64) -> RetentionResult<Offer> {
        let arm = self.arm.ok_or_else(|| {
            RetentionError::InvalidState("no offer before the arm is resolved".to_string())
        })?;
        Ok(price_offer(arm, monthly_price))
    }

    fn rejected(&self, event: &FlowEvent) -> RetentionError {
        RetentionError::InvalidState(format!(
            "'{}' is not allowed from step {}",
            event.trigger(),
            self.current_step.as_str()
        ))
    }
}

fn unanswered(saved: &FlowState, field: &str) -> RetentionError {
    RetentionError::InvalidState(format!(
        "step {} requires {field}",
        saved.current_step.as_str()
    ))
}

impl Default for FlowState {
    fn default() -> Self {
        Self::new()
    }
}
