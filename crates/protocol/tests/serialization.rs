use af_protocol::*;
use serde_json::json;

#[test]
fn test_agent_settings_deserialization_from_yaml() {
    let yaml_str = r#"
agent_id: deployer
description: Ships releases
provider: anthropic
model_settings:
  model_name: claude-sonnet-4.5
  max_tokens: 4096
  api_key: sk-ant-plain
tool_permissions:
  - read_file
  - echo
system_prompt: You deploy things carefully.
"#;

    let settings: AgentSettings = serde_yaml::from_str(yaml_str).expect("Failed to deserialize AgentSettings");

    assert_eq!(settings.agent_id, "deployer");
    assert_eq!(settings.provider, Provider::Anthropic);
    assert_eq!(settings.model_settings.max_tokens, Some(4096));
    assert_eq!(settings.model_settings.temperature, 0.7);
    assert!(settings.permits_tool("read_file"));
    assert_eq!(
        settings.model_settings.api_key.as_ref().map(SecretString::expose_secret),
        Some("sk-ant-plain")
    );

    // The key is dropped on the way back out.
    let json = serde_json::to_string(&settings).expect("Failed to serialize AgentSettings");
    assert!(!json.contains("sk-ant-plain"));
    let reloaded: AgentSettings = serde_json::from_str(&json).expect("Failed to deserialize AgentSettings");
    assert!(reloaded.model_settings.api_key.is_none());
}

#[test]
fn test_workflow_state_serialization() {
    let request = WorkflowRequest::new("dev", "Write a haiku").with_timeout(30);
    let plan = Plan::compile(&[StepTemplate::agent("plan", "{task}", false), StepTemplate::finalize("done")]);
    let mut state = WorkflowState::new("task-1", request, plan, 30);
    state.status = WorkflowStatus::Running;
    state.current_step = Some(0);
    let mut record = StepRecord::begin("plan", 0);
    record.tool_invocations.push(ToolInvocation {
        tool_name: "echo".to_string(),
        arguments: json!({"text": "hi"}),
        attempt: 1,
        result: None,
        error: Some(ToolFailure {
            kind: FailureKind::ToolExecution,
            message: "gateway unreachable".to_string(),
            degraded: true,
        }),
        started_at: chrono::Utc::now(),
        duration_ms: 3,
    });
    state.history.push(record);

    let json = serde_json::to_value(&state).expect("Failed to serialize WorkflowState");
    assert_eq!(json["status"], "RUNNING");
    assert_eq!(json["history"][0]["outcome"], "IN_PROGRESS");
    assert_eq!(json["history"][0]["tool_invocations"][0]["error"]["kind"], "tool_execution");
    assert_eq!(json["plan"]["steps"][0]["kind"]["type"], "agent");

    let deserialized: WorkflowState = serde_json::from_value(json).expect("Failed to deserialize WorkflowState");
    assert_eq!(deserialized, state);
}

#[test]
fn test_request_with_inline_plan() {
    let json = r#"{
        "task_description": "Delete stale branches",
        "agent_role": "janitor",
        "plan": [
            {"name": "gate", "type": "approval", "proposed_action": "delete 12 branches"},
            {"name": "done", "type": "finalize"}
        ]
    }"#;

    let request: WorkflowRequest = serde_json::from_str(json).expect("Failed to deserialize WorkflowRequest");
    assert!(request.task_id.is_none());
    let steps = request.plan.expect("plan should be present");
    assert!(steps[0].kind.is_approval());
    assert_eq!(steps[1].kind, StepKind::Finalize);
}

#[test]
fn test_orchestrator_settings_from_toml_shape() {
    let json = json!({
        "default_timeout_seconds": 60,
        "tool_failure_policy": "retry_once",
        "approval_keywords": ["drop"],
        "state_dir": "/tmp/state"
    });

    let settings: OrchestratorSettings = serde_json::from_value(json).expect("Failed to deserialize settings");
    assert_eq!(settings.default_timeout_seconds, 60);
    assert_eq!(settings.tool_failure_policy, ToolFailurePolicy::RetryOnce);
    assert_eq!(settings.approval_keywords, vec!["drop"]);
    assert_eq!(settings.sweep_interval_seconds, 5);
}

#[test]
fn test_workflow_event_serialization() {
    let event = WorkflowEvent::StatusChanged {
        task_id: "task-1".to_string(),
        from: WorkflowStatus::Running,
        to: WorkflowStatus::AwaitingApproval,
        step: Some("gate".to_string()),
    };

    let json = serde_json::to_value(&event).expect("Failed to serialize WorkflowEvent");
    assert_eq!(json["type"], "statusChanged");
    assert_eq!(json["payload"]["to"], "AWAITING_APPROVAL");

    let deserialized: WorkflowEvent = serde_json::from_value(json).expect("Failed to deserialize WorkflowEvent");
    assert_eq!(deserialized.task_id(), "task-1");

    let resolved = WorkflowEvent::ApprovalResolved {
        task_id: "task-1".to_string(),
        step_name: "gate".to_string(),
        decision: ApprovalDecision::Rejected,
    };
    let json = serde_json::to_value(&resolved).expect("Failed to serialize WorkflowEvent");
    assert_eq!(json["type"], "approvalResolved");
    assert_eq!(json["payload"]["decision"], "REJECTED");
}

#[test]
fn test_usage_report_serialization() {
    let mut report = UsageReport::new(Provider::OpenAi, "gpt-5");
    report.input_tokens = 120;
    report.cost_usd = Some(0.0042);

    let json = serde_json::to_value(&report).expect("Failed to serialize UsageReport");
    assert_eq!(json["provider"], "openai");
    assert_eq!(json["input_tokens"], 120);
}

#[test]
fn test_tool_descriptor_accepts_camel_case_schema() {
    let json = json!({
        "name": "read_file",
        "description": "Read a file",
        "inputSchema": {"type": "object"}
    });
    let descriptor: ToolDescriptor = serde_json::from_value(json).expect("Failed to deserialize ToolDescriptor");
    assert_eq!(descriptor.input_schema["type"], "object");
}
