//! Plan construction for incoming workflow requests.

use af_protocol::config_models::OrchestratorSettings;
use af_protocol::plan_models::{Plan, PlanError, PlanTemplate, StepKind, StepTemplate};
use af_protocol::workflow_models::WorkflowRequest;
use serde_json::Value;
use std::collections::HashMap;

/// Turns a [`WorkflowRequest`] into a validated [`Plan`].
///
/// Source priority: the request's own step list, then the plan template
/// registered for the request's role, then the default plan
/// `plan -> [approval] -> act -> finalize`. The approval gate is part of the
/// default plan only when the task mentions one of the approval keywords.
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    approval_keywords: Vec<String>,
    templates: HashMap<String, PlanTemplate>,
}

impl PlanBuilder {
    pub fn new(settings: &OrchestratorSettings, templates: impl IntoIterator<Item = PlanTemplate>) -> Self {
        Self {
            approval_keywords: settings
                .approval_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            templates: templates
                .into_iter()
                .map(|t| (t.role.clone(), t))
                .collect(),
        }
    }

    pub fn build(&self, request: &WorkflowRequest) -> Result<Plan, PlanError> {
        let mut steps = match (&request.plan, self.templates.get(&request.agent_role)) {
            (Some(steps), _) => steps.clone(),
            (None, Some(template)) => template.steps.clone(),
            (None, None) => self.default_steps(&request.task_description),
        };

        substitute(&mut steps, &request.task_description);
        if let Some(remediation) = &request.remediation {
            attach_remediation(&mut steps, remediation);
        }

        let plan = Plan::compile(&steps);
        plan.validate()?;
        Ok(plan)
    }

    /// Whether the task description triggers an approval gate.
    pub fn requires_approval(&self, task_description: &str) -> bool {
        let task = task_description.to_lowercase();
        self.approval_keywords
            .iter()
            .any(|keyword| !keyword.is_empty() && task.contains(keyword.as_str()))
    }

    fn default_steps(&self, task_description: &str) -> Vec<StepTemplate> {
        let mut steps = vec![StepTemplate::agent(
            "plan",
            "Break the following task into concrete steps:\n{task}",
            false,
        )];
        if self.requires_approval(task_description) {
            steps.push(StepTemplate::approval("approval", "Approve: {task}"));
        }
        steps.push(StepTemplate::agent(
            "act",
            "Carry out the task, invoking tools where needed:\n{task}",
            true,
        ));
        steps.push(StepTemplate::finalize("finalize"));
        steps
    }
}

fn substitute(steps: &mut [StepTemplate], task: &str) {
    for step in steps {
        match &mut step.kind {
            StepKind::Agent { prompt, .. } => *prompt = prompt.replace("{task}", task),
            StepKind::Approval { proposed_action } => {
                *proposed_action = proposed_action.replace("{task}", task)
            }
            StepKind::Tool { arguments, .. } => substitute_value(arguments, task),
            StepKind::Finalize => {}
        }
        if let Some(branch) = &mut step.on_reject {
            substitute(branch, task);
        }
    }
}

fn substitute_value(value: &mut Value, task: &str) {
    match value {
        Value::String(text) => *text = text.replace("{task}", task),
        Value::Array(items) => items.iter_mut().for_each(|v| substitute_value(v, task)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute_value(v, task)),
        _ => {}
    }
}

/// Wire `remediation` as the reject branch of every gate without one.
fn attach_remediation(steps: &mut [StepTemplate], remediation: &str) {
    for step in steps {
        if let Some(branch) = &mut step.on_reject {
            attach_remediation(branch, remediation);
        } else if step.kind.is_approval() {
            step.on_reject = Some(vec![StepTemplate::agent(
                "remediate",
                remediation.to_string(),
                false,
            )]);
        }
    }
}
