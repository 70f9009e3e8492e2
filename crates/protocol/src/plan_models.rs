//! Plan graph models.
//!
//! A [`Plan`] is an arena of [`StepSpec`]s linked by index. Plans are authored
//! as nested [`StepTemplate`] lists (in `.agentflow/plans/*.yaml` or inline in
//! a request) and compiled into the arena form with [`Plan::compile`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// What a step does when executed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Run the workflow's agent with a prompt.
    Agent {
        prompt: String,
        /// Route tool requests in the agent output through the tool client.
        #[serde(default)]
        use_tools: bool,
    },
    /// Invoke a named tool directly.
    Tool {
        tool_name: String,
        #[serde(default)]
        arguments: Value,
    },
    /// Suspend until a human approves or rejects.
    Approval { proposed_action: String },
    /// Assemble the result payload and complete.
    Finalize,
}

impl StepKind {
    pub fn is_approval(&self) -> bool {
        matches!(self, Self::Approval { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Agent { .. } => "agent",
            Self::Tool { .. } => "tool",
            Self::Approval { .. } => "approval",
            Self::Finalize => "finalize",
        }
    }
}

/// One node of the plan arena.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub name: String,
    pub kind: StepKind,
    /// Step to run after this one. `None` ends the workflow.
    #[serde(default)]
    pub next: Option<usize>,
    /// Branch taken when an approval gate is rejected.
    #[serde(default)]
    pub on_reject: Option<usize>,
}

/// Authoring form of a step, as written in YAML or a request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepTemplate {
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_reject: Option<Vec<StepTemplate>>,
}

impl StepTemplate {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            on_reject: None,
        }
    }

    pub fn agent(name: impl Into<String>, prompt: impl Into<String>, use_tools: bool) -> Self {
        Self::new(
            name,
            StepKind::Agent {
                prompt: prompt.into(),
                use_tools,
            },
        )
    }

    pub fn tool(name: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self::new(
            name,
            StepKind::Tool {
                tool_name: tool_name.into(),
                arguments,
            },
        )
    }

    pub fn approval(name: impl Into<String>, proposed_action: impl Into<String>) -> Self {
        Self::new(
            name,
            StepKind::Approval {
                proposed_action: proposed_action.into(),
            },
        )
    }

    pub fn finalize(name: impl Into<String>) -> Self {
        Self::new(name, StepKind::Finalize)
    }

    pub fn with_on_reject(mut self, branch: Vec<StepTemplate>) -> Self {
        self.on_reject = Some(branch);
        self
    }
}

/// A named plan template loaded from `.agentflow/plans/<name>.yaml`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlanTemplate {
    /// Agent role this template applies to.
    pub role: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepTemplate>,
}

/// Reasons a plan is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    Empty,
    IndexOutOfRange { step: String, index: usize },
    RejectOnNonGate { step: String },
    Cycle { step: String },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("plan has no steps"),
            Self::IndexOutOfRange { step, index } => {
                write!(f, "step '{step}' links to missing step index {index}")
            }
            Self::RejectOnNonGate { step } => {
                write!(f, "step '{step}' has an on_reject branch but is not an approval step")
            }
            Self::Cycle { step } => write!(f, "plan contains a cycle through step '{step}'"),
        }
    }
}

impl std::error::Error for PlanError {}

/// Executable step graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Plan {
    pub steps: Vec<StepSpec>,
    /// Index of the first step.
    #[serde(default)]
    pub entry: usize,
}

impl Plan {
    /// Compile nested templates into the arena form.
    ///
    /// The top-level list becomes a chain linked by `next`. Each `on_reject`
    /// branch is appended after it as its own chain; its last step ends the
    /// workflow.
    pub fn compile(templates: &[StepTemplate]) -> Self {
        let mut steps = Vec::new();
        let entry = append_chain(&mut steps, templates).unwrap_or(0);
        Self { steps, entry }
    }

    pub fn step(&self, index: usize) -> Option<&StepSpec> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check the plan is non-empty, links stay in range, only approval steps
    /// branch on rejection, and no step can be reached from itself.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        if self.entry >= self.steps.len() {
            return Err(PlanError::IndexOutOfRange {
                step: "<entry>".to_string(),
                index: self.entry,
            });
        }

        for step in &self.steps {
            for index in step.next.iter().chain(step.on_reject.iter()) {
                if *index >= self.steps.len() {
                    return Err(PlanError::IndexOutOfRange {
                        step: step.name.clone(),
                        index: *index,
                    });
                }
            }
            if step.on_reject.is_some() && !step.kind.is_approval() {
                return Err(PlanError::RejectOnNonGate {
                    step: step.name.clone(),
                });
            }
        }

        // Iterative three-colour DFS over next/on_reject edges.
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }
        let mut marks = vec![Mark::White; self.steps.len()];
        for root in 0..self.steps.len() {
            if marks[root] != Mark::White {
                continue;
            }
            let mut stack = vec![(root, 0usize)];
            marks[root] = Mark::Grey;
            while let Some((node, edge)) = stack.pop() {
                let spec = &self.steps[node];
                let edges = [spec.next, spec.on_reject];
                if let Some(slot) = edges.get(edge) {
                    stack.push((node, edge + 1));
                    if let Some(child) = slot {
                        match marks[*child] {
                            Mark::Grey => {
                                return Err(PlanError::Cycle {
                                    step: self.steps[*child].name.clone(),
                                })
                            }
                            Mark::White => {
                                marks[*child] = Mark::Grey;
                                stack.push((*child, 0));
                            }
                            Mark::Black => {}
                        }
                    }
                } else {
                    marks[node] = Mark::Black;
                }
            }
        }

        Ok(())
    }
}

fn append_chain(steps: &mut Vec<StepSpec>, templates: &[StepTemplate]) -> Option<usize> {
    if templates.is_empty() {
        return None;
    }
    let start = steps.len();
    for (offset, template) in templates.iter().enumerate() {
        let next = (offset + 1 < templates.len()).then_some(start + offset + 1);
        steps.push(StepSpec {
            name: template.name.clone(),
            kind: template.kind.clone(),
            next,
            on_reject: None,
        });
    }
    for (offset, template) in templates.iter().enumerate() {
        if let Some(branch) = &template.on_reject {
            let branch_entry = append_chain(steps, branch);
            steps[start + offset].on_reject = branch_entry;
        }
    }
    Some(start)
}
