//! Flow definitions: the versioned, validated step graph a contact moves
//! through.
//!
//! Each step type carries only its own config and its own successor arity,
//! so an invalid combination (a delay with two branches, a condition with
//! none) cannot be constructed at all.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Value object: Flow ID (the flow family, stable across versions)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

/// Value object: Step ID, unique within one flow version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

/// Value object: Contact ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactId(pub String);

/// One published revision of a flow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowVersionId {
    /// The flow family
    pub flow: FlowId,
    /// Monotonic version within the family
    pub version: u32,
}

impl fmt::Display for FlowVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.flow.0, self.version)
    }
}

/// Messaging channel a flow runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// SMS text messages
    Sms,
    /// Email
    Email,
    /// WhatsApp
    Whatsapp,
    /// Mobile push
    Push,
}

/// Unit for delay step durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    /// Seconds
    Seconds,
    /// Minutes
    Minutes,
    /// Hours
    Hours,
    /// Days
    Days,
}

impl DelayUnit {
    fn seconds(&self) -> u64 {
        match self {
            DelayUnit::Seconds => 1,
            DelayUnit::Minutes => 60,
            DelayUnit::Hours => 3_600,
            DelayUnit::Days => 86_400,
        }
    }
}

/// HTTP method for webhook steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

/// Comparison applied by a condition step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    /// Context value equals the operand
    Eq,
    /// Context value differs from the operand
    Ne,
    /// Context key is present (operand ignored)
    Exists,
    /// String or array containment
    Contains,
    /// Numeric greater-than
    Gt,
    /// Numeric less-than
    Lt,
}

/// A predicate over the run context, evaluated synchronously by condition
/// steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Context key to inspect
    pub field: String,
    /// Comparison operator
    pub op: PredicateOp,
    /// Right-hand operand
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Predicate {
    /// Evaluate against a run context
    pub fn eval(&self, context: &HashMap<String, serde_json::Value>) -> bool {
        let actual = context.get(&self.field);
        match self.op {
            PredicateOp::Exists => actual.is_some(),
            PredicateOp::Eq => actual == Some(&self.value),
            PredicateOp::Ne => actual != Some(&self.value),
            PredicateOp::Contains => match (actual, self.value.as_str()) {
                (Some(serde_json::Value::String(s)), Some(needle)) => s.contains(needle),
                (Some(serde_json::Value::Array(items)), _) => items.contains(&self.value),
                _ => false,
            },
            PredicateOp::Gt => match (actual.and_then(|v| v.as_f64()), self.value.as_f64()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            PredicateOp::Lt => match (actual.and_then(|v| v.as_f64()), self.value.as_f64()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
        }
    }
}

/// How a split step partitions its hash space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitType {
    /// Equal share per branch; authored weights are ignored
    Random,
    /// Authored weights interpreted as percentages
    Percentage,
    /// Authored weights interpreted as raw proportions
    Custom,
}

/// One outgoing branch of a split step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitBranch {
    /// Relative weight of this branch
    pub weight: u32,
    /// Successor step
    pub to: StepId,
}

/// The per-type configuration and successor layout of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Send a templated message over the flow's channel
    Message {
        /// Template with `{{key}}` placeholders resolved from run context
        template: String,
        /// Successor, None = terminal
        next: Option<StepId>,
    },
    /// Suspend the run for a fixed duration
    Delay {
        /// Duration magnitude
        amount: u64,
        /// Duration unit
        unit: DelayUnit,
        /// Successor
        next: Option<StepId>,
    },
    /// Branch synchronously on a context predicate
    Condition {
        /// The predicate to evaluate
        predicate: Predicate,
        /// Successor when the predicate holds
        on_true: Option<StepId>,
        /// Successor when it does not
        on_false: Option<StepId>,
    },
    /// Invoke a named action adapter
    Action {
        /// Adapter name
        action: String,
        /// Adapter parameters
        #[serde(default)]
        params: serde_json::Value,
        /// Successor
        next: Option<StepId>,
    },
    /// Suspend until the contact replies or the timeout fires
    WaitForResponse {
        /// Timeout in seconds
        timeout_seconds: u64,
        /// Successor when a reply arrives in time
        on_reply: Option<StepId>,
        /// Successor when the timeout fires first
        on_timeout: Option<StepId>,
    },
    /// Add or remove a tag on the contact
    Tag {
        /// Tag label
        tag: String,
        /// true = add, false = remove
        add: bool,
        /// Successor
        next: Option<StepId>,
    },
    /// Call an external HTTP endpoint with the run context as payload
    Webhook {
        /// Target URL
        url: String,
        /// HTTP method
        method: HttpMethod,
        /// Successor
        next: Option<StepId>,
    },
    /// Deterministically assign the contact to one of N branches
    Split {
        /// Partitioning mode
        split_type: SplitType,
        /// Weighted branches
        branches: Vec<SplitBranch>,
    },
    /// Convergence point for multiple upstream branches
    Merge {
        /// Successor
        next: Option<StepId>,
    },
    /// Dispatch a survey to the contact
    Survey {
        /// Survey identifier
        survey_id: String,
        /// Successor
        next: Option<StepId>,
    },
    /// Send an internal operator notification
    Notification {
        /// Notification text
        message: String,
        /// Successor
        next: Option<StepId>,
    },
    /// Send a calendar booking link
    Calendar {
        /// Booking link URL
        calendar_url: String,
        /// Successor
        next: Option<StepId>,
    },
    /// Request the contact's location
    Location {
        /// Prompt text
        prompt: String,
        /// Successor
        next: Option<StepId>,
    },
}

impl StepKind {
    /// All outgoing edges as (label, successor) pairs
    pub fn successors(&self) -> Vec<(String, &StepId)> {
        match self {
            StepKind::Message { next, .. }
            | StepKind::Delay { next, .. }
            | StepKind::Action { next, .. }
            | StepKind::Tag { next, .. }
            | StepKind::Webhook { next, .. }
            | StepKind::Merge { next }
            | StepKind::Survey { next, .. }
            | StepKind::Notification { next, .. }
            | StepKind::Calendar { next, .. }
            | StepKind::Location { next, .. } => next
                .iter()
                .map(|id| ("next".to_string(), id))
                .collect(),
            StepKind::Condition {
                on_true, on_false, ..
            } => on_true
                .iter()
                .map(|id| ("true".to_string(), id))
                .chain(on_false.iter().map(|id| ("false".to_string(), id)))
                .collect(),
            StepKind::WaitForResponse {
                on_reply,
                on_timeout,
                ..
            } => on_reply
                .iter()
                .map(|id| ("replied".to_string(), id))
                .chain(on_timeout.iter().map(|id| ("timeout".to_string(), id)))
                .collect(),
            StepKind::Split { branches, .. } => branches
                .iter()
                .enumerate()
                .map(|(i, b)| (format!("branch_{}", i), &b.to))
                .collect(),
        }
    }

    /// Duration a delay or wait step suspends for, if this kind suspends
    pub fn suspend_duration(&self) -> Option<Duration> {
        match self {
            StepKind::Delay { amount, unit, .. } => {
                Some(Duration::from_secs(amount * unit.seconds()))
            }
            StepKind::WaitForResponse {
                timeout_seconds, ..
            } => Some(Duration::from_secs(*timeout_seconds)),
            _ => None,
        }
    }
}

/// Represents a step in a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// ID of the step
    pub id: StepId,

    /// Human-readable name of the step
    pub name: String,

    /// Per-type config and successors
    #[serde(flatten)]
    pub kind: StepKind,
}

/// Authoring status of a flow definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Editable; runs may not be enrolled
    Draft,
    /// Frozen; enrollable, never mutated again
    Published,
}

/// Upper bound on delay/wait durations
const MAX_SUSPEND: Duration = Duration::from_secs(30 * 86_400);

/// Represents a parsed and validated flow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// ID of the flow family
    pub id: FlowId,

    /// The flow version, monotonic within the family
    pub version: u32,

    /// Human-readable name of the flow
    pub name: String,

    /// Channel the flow messages on
    pub channel: Channel,

    /// Draft or published
    pub status: FlowStatus,

    /// The steps in this flow; the first is the start step
    pub steps: Vec<StepDefinition>,
}

/// A single authoring-time problem found by validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The flow has no steps
    #[error("flow must have at least one step")]
    EmptyFlow,

    /// Two steps share an id
    #[error("duplicate step id: {0}")]
    DuplicateStepId(StepId),

    /// A successor reference does not resolve
    #[error("step {from} references non-existent successor: {to}")]
    DanglingSuccessor {
        /// Step holding the reference
        from: StepId,
        /// The missing id
        to: StepId,
    },

    /// A step cannot be reached from the start step
    #[error("step {0} is unreachable from the start step")]
    Unreachable(StepId),

    /// Delay or timeout is zero
    #[error("step {0} has a non-positive duration")]
    NonPositiveDuration(StepId),

    /// Delay or timeout exceeds the 30-day bound
    #[error("step {0} duration exceeds the 30-day bound")]
    DurationTooLong(StepId),

    /// Webhook URL failed to parse
    #[error("step {step} has a malformed webhook url: {url}")]
    InvalidWebhookUrl {
        /// The webhook step
        step: StepId,
        /// The offending URL
        url: String,
    },

    /// Split step with no branches
    #[error("split step {0} has no branches")]
    EmptySplit(StepId),

    /// Split branch weights sum to zero
    #[error("split step {0} has zero total weight")]
    ZeroSplitWeight(StepId),

    /// The successor graph can revisit a step
    #[error("cycle detected in successors involving step: {0}")]
    CycleDetected(StepId),
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FlowDefinition {
    /// The start step, if any
    pub fn start_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    /// Look up a step by id
    pub fn step(&self, id: &StepId) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Identifier of this (flow, version) pair
    pub fn version_id(&self) -> FlowVersionId {
        FlowVersionId {
            flow: self.id.clone(),
            version: self.version,
        }
    }

    /// Validate the flow definition, collecting every problem rather than
    /// failing on the first
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.steps.is_empty() {
            errors.push(ValidationError::EmptyFlow);
            return errors;
        }

        // ID uniqueness
        let mut step_ids: HashSet<&StepId> = HashSet::new();
        for step in &self.steps {
            if !step_ids.insert(&step.id) {
                errors.push(ValidationError::DuplicateStepId(step.id.clone()));
            }
        }

        // Successor references must resolve
        for step in &self.steps {
            for (_, successor) in step.kind.successors() {
                if !step_ids.contains(successor) {
                    errors.push(ValidationError::DanglingSuccessor {
                        from: step.id.clone(),
                        to: successor.clone(),
                    });
                }
            }
        }

        // Per-type config checks
        for step in &self.steps {
            match &step.kind {
                StepKind::Delay { .. } | StepKind::WaitForResponse { .. } => {
                    let duration = step.kind.suspend_duration().unwrap_or_default();
                    if duration.is_zero() {
                        errors.push(ValidationError::NonPositiveDuration(step.id.clone()));
                    } else if duration > MAX_SUSPEND {
                        errors.push(ValidationError::DurationTooLong(step.id.clone()));
                    }
                }
                StepKind::Webhook { url, .. } => {
                    if url::Url::parse(url).is_err() {
                        errors.push(ValidationError::InvalidWebhookUrl {
                            step: step.id.clone(),
                            url: url.clone(),
                        });
                    }
                }
                StepKind::Split { branches, .. } => {
                    if branches.is_empty() {
                        errors.push(ValidationError::EmptySplit(step.id.clone()));
                    } else if branches.iter().map(|b| b.weight as u64).sum::<u64>() == 0 {
                        errors.push(ValidationError::ZeroSplitWeight(step.id.clone()));
                    }
                }
                _ => {}
            }
        }

        // Reachability and cycles only make sense on a resolvable graph
        if errors.is_empty() {
            self.check_reachability(&mut errors);
            self.check_for_cycles(&mut errors);
        }

        errors
    }

    /// Every step must be reachable from the start step
    fn check_reachability(&self, errors: &mut Vec<ValidationError>) {
        let start = match self.start_step() {
            Some(s) => s.id.clone(),
            None => return,
        };

        let mut visited: HashSet<StepId> = HashSet::new();
        let mut frontier = vec![start];
        while let Some(id) = frontier.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(step) = self.step(&id) {
                for (_, successor) in step.kind.successors() {
                    frontier.push(successor.clone());
                }
            }
        }

        for step in &self.steps {
            if !visited.contains(&step.id) {
                errors.push(ValidationError::Unreachable(step.id.clone()));
            }
        }
    }

    /// DFS for cycles over successor edges; merges converge legally but the
    /// graph must stay acyclic
    fn check_for_cycles(&self, errors: &mut Vec<ValidationError>) {
        let successor_map: HashMap<&StepId, Vec<&StepId>> = self
            .steps
            .iter()
            .map(|s| (&s.id, s.kind.successors().into_iter().map(|(_, id)| id).collect()))
            .collect();

        let mut visited: HashSet<&StepId> = HashSet::new();
        let mut rec_stack: HashSet<&StepId> = HashSet::new();

        for step in &self.steps {
            if Self::is_cyclic(&step.id, &successor_map, &mut visited, &mut rec_stack) {
                errors.push(ValidationError::CycleDetected(step.id.clone()));
                return;
            }
        }
    }

    fn is_cyclic<'a>(
        step_id: &'a StepId,
        successor_map: &HashMap<&'a StepId, Vec<&'a StepId>>,
        visited: &mut HashSet<&'a StepId>,
        rec_stack: &mut HashSet<&'a StepId>,
    ) -> bool {
        if !visited.contains(step_id) {
            visited.insert(step_id);
            rec_stack.insert(step_id);

            if let Some(successors) = successor_map.get(step_id) {
                for successor in successors.clone() {
                    if (!visited.contains(successor)
                        && Self::is_cyclic(successor, successor_map, visited, rec_stack))
                        || rec_stack.contains(successor)
                    {
                        return true;
                    }
                }
            }
        }

        rec_stack.remove(step_id);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(id: &str, next: Option<&str>) -> StepDefinition {
        StepDefinition {
            id: StepId(id.to_string()),
            name: id.to_string(),
            kind: StepKind::Message {
                template: "Hi {{first_name}}".to_string(),
                next: next.map(|n| StepId(n.to_string())),
            },
        }
    }

    fn flow(steps: Vec<StepDefinition>) -> FlowDefinition {
        FlowDefinition {
            id: FlowId("welcome".to_string()),
            version: 1,
            name: "Welcome".to_string(),
            channel: Channel::Sms,
            status: FlowStatus::Draft,
            steps,
        }
    }

    #[test]
    fn test_valid_linear_flow() {
        let definition = flow(vec![message("a", Some("b")), message("b", None)]);
        assert!(definition.validate().is_empty());
    }

    #[test]
    fn test_empty_flow() {
        let definition = flow(vec![]);
        assert_eq!(definition.validate(), vec![ValidationError::EmptyFlow]);
    }

    #[test]
    fn test_duplicate_step_ids() {
        let definition = flow(vec![message("a", None), message("a", None)]);
        let errors = definition.validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateStepId(id) if id.0 == "a")));
    }

    #[test]
    fn test_dangling_successor() {
        let definition = flow(vec![message("a", Some("ghost"))]);
        let errors = definition.validate();
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::DanglingSuccessor { to, .. } if to.0 == "ghost"
        )));
    }

    #[test]
    fn test_unreachable_step() {
        let definition = flow(vec![message("a", None), message("island", None)]);
        let errors = definition.validate();
        assert_eq!(
            errors,
            vec![ValidationError::Unreachable(StepId("island".to_string()))]
        );
    }

    #[test]
    fn test_errors_are_collected_not_first_only() {
        let definition = flow(vec![
            message("a", Some("ghost")),
            StepDefinition {
                id: StepId("w".to_string()),
                name: "hook".to_string(),
                kind: StepKind::Webhook {
                    url: "not a url".to_string(),
                    method: HttpMethod::Post,
                    next: None,
                },
            },
        ]);
        let errors = definition.validate();
        assert!(errors.len() >= 2, "expected both problems, got {:?}", errors);
    }

    #[test]
    fn test_delay_bounds() {
        let zero = flow(vec![StepDefinition {
            id: StepId("d".to_string()),
            name: "d".to_string(),
            kind: StepKind::Delay {
                amount: 0,
                unit: DelayUnit::Hours,
                next: None,
            },
        }]);
        assert_eq!(
            zero.validate(),
            vec![ValidationError::NonPositiveDuration(StepId("d".to_string()))]
        );

        let too_long = flow(vec![StepDefinition {
            id: StepId("d".to_string()),
            name: "d".to_string(),
            kind: StepKind::Delay {
                amount: 31,
                unit: DelayUnit::Days,
                next: None,
            },
        }]);
        assert_eq!(
            too_long.validate(),
            vec![ValidationError::DurationTooLong(StepId("d".to_string()))]
        );
    }

    #[test]
    fn test_split_weights() {
        let empty = flow(vec![StepDefinition {
            id: StepId("s".to_string()),
            name: "s".to_string(),
            kind: StepKind::Split {
                split_type: SplitType::Random,
                branches: vec![],
            },
        }]);
        assert_eq!(
            empty.validate(),
            vec![ValidationError::EmptySplit(StepId("s".to_string()))]
        );
    }

    #[test]
    fn test_cycle_detection() {
        let definition = flow(vec![
            message("a", Some("b")),
            message("b", Some("c")),
            message("c", Some("a")),
        ]);
        let errors = definition.validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::CycleDetected(_))));
    }

    #[test]
    fn test_branches_converging_on_merge_are_legal() {
        let definition = flow(vec![
            StepDefinition {
                id: StepId("cond".to_string()),
                name: "cond".to_string(),
                kind: StepKind::Condition {
                    predicate: Predicate {
                        field: "vip".to_string(),
                        op: PredicateOp::Eq,
                        value: json!(true),
                    },
                    on_true: Some(StepId("left".to_string())),
                    on_false: Some(StepId("right".to_string())),
                },
            },
            message("left", Some("join")),
            message("right", Some("join")),
            StepDefinition {
                id: StepId("join".to_string()),
                name: "join".to_string(),
                kind: StepKind::Merge { next: None },
            },
        ]);
        assert!(definition.validate().is_empty());
    }

    #[test]
    fn test_step_kind_tagged_serialization() {
        let step = StepDefinition {
            id: StepId("d1".to_string()),
            name: "pause".to_string(),
            kind: StepKind::Delay {
                amount: 2,
                unit: DelayUnit::Hours,
                next: Some(StepId("m1".to_string())),
            },
        };

        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["type"], "delay");
        assert_eq!(value["amount"], 2);
        assert_eq!(value["unit"], "hours");

        let back: StepDefinition = serde_json::from_value(value).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_predicate_eval() {
        let mut context = HashMap::new();
        context.insert("plan".to_string(), json!("pro"));
        context.insert("seats".to_string(), json!(12));

        let eq = Predicate {
            field: "plan".to_string(),
            op: PredicateOp::Eq,
            value: json!("pro"),
        };
        assert!(eq.eval(&context));

        let gt = Predicate {
            field: "seats".to_string(),
            op: PredicateOp::Gt,
            value: json!(10),
        };
        assert!(gt.eval(&context));

        let missing = Predicate {
            field: "churned".to_string(),
            op: PredicateOp::Exists,
            value: json!(null),
        };
        assert!(!missing.eval(&context));

        let contains = Predicate {
            field: "plan".to_string(),
            op: PredicateOp::Contains,
            value: json!("pr"),
        };
        assert!(contains.eval(&context));
    }

    #[test]
    fn test_wait_successor_labels() {
        let kind = StepKind::WaitForResponse {
            timeout_seconds: 3_600,
            on_reply: Some(StepId("yes".to_string())),
            on_timeout: Some(StepId("nudge".to_string())),
        };
        let successors = kind.successors();
        assert_eq!(successors.len(), 2);
        assert_eq!(successors[0].0, "replied");
        assert_eq!(successors[1].0, "timeout");
    }
}
