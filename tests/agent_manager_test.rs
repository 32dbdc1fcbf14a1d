//! Integration tests for the process-wide agent registry

use kolosal_agents::config::{AgentConfig, FunctionConfig, SystemConfig};
use kolosal_agents::data::AgentData;
use kolosal_agents::functions::providers::FunctionDeps;
use kolosal_agents::manager::AgentManager;
use kolosal_agents::router::MessageRouter;
use std::sync::Arc;
use std::time::Duration;

fn manager() -> AgentManager {
    AgentManager::new(Arc::new(MessageRouter::new()), FunctionDeps::offline())
}

fn agent_config(name: &str) -> AgentConfig {
    AgentConfig {
        name: name.to_string(),
        functions: vec!["echo".to_string(), "add".to_string()],
        max_concurrent_tasks: Some(1),
        ..AgentConfig::default()
    }
}

/// Creating then deleting an agent leaves the registry unchanged.
#[tokio::test]
async fn create_delete_round_trip() {
    let manager = manager();
    assert_eq!(manager.agent_count(), 0);

    let id = manager.create_agent_from_config(&agent_config("temp")).unwrap();
    assert_eq!(manager.agent_count(), 1);

    manager.delete_agent(id).await.unwrap();
    assert_eq!(manager.agent_count(), 0);
    assert!(manager.get_agent(id).is_none());
}

/// Double-start and double-stop change nothing beyond a warning.
#[tokio::test]
async fn lifecycle_is_idempotent() {
    let manager = manager();
    let id = manager.create_agent_from_config(&agent_config("idem")).unwrap();

    manager.start_agent(id).await.unwrap();
    manager.start_agent(id).await.unwrap();
    assert_eq!(manager.running_count(), 1);

    manager.stop_agent(id).await.unwrap();
    manager.stop_agent(id).await.unwrap();
    assert_eq!(manager.running_count(), 0);

    manager.delete_agent(id).await.unwrap();
}

/// Deleting a running agent stops it first; its router registration is
/// gone afterwards.
#[tokio::test]
async fn delete_stops_running_agents() {
    let router = Arc::new(MessageRouter::new());
    let manager = AgentManager::new(Arc::clone(&router), FunctionDeps::offline());

    let id = manager.create_agent_from_config(&agent_config("doomed")).unwrap();
    manager.start_agent(id).await.unwrap();
    assert!(router.is_registered(id));

    manager.delete_agent(id).await.unwrap();
    assert!(!router.is_registered(id));
}

/// Config-declared custom LLM functions become registrable by name.
#[tokio::test]
async fn custom_function_configs_resolve_during_creation() {
    let manager = manager();
    let config = SystemConfig {
        agents: vec![AgentConfig {
            name: "summarizer".to_string(),
            functions: vec!["summarize".to_string(), "echo".to_string()],
            max_concurrent_tasks: Some(1),
            ..AgentConfig::default()
        }],
        functions: vec![FunctionConfig {
            name: "summarize".to_string(),
            function_type: "llm".to_string(),
            description: "Summarize text".to_string(),
            system_prompt: Some("You are a summarizer.".to_string()),
            ..FunctionConfig::default()
        }],
        ..SystemConfig::default()
    };

    let report = manager.load_configuration(&config).await;
    assert_eq!(report.created, 1);

    let agent = manager.get_agent_by_name("summarizer").unwrap();
    let names = agent.registry().names();
    assert!(names.contains(&"summarize".to_string()));
    assert!(names.contains(&"echo".to_string()));

    // the offline inference client fails the call but the dispatch path
    // works end to end
    let result = agent
        .execute_function("summarize", AgentData::new().with("prompt", "hello"))
        .await;
    assert!(!result.success);
    assert!(result.error_message.contains("llm_backend"));
}

/// End-to-end through the manager: async echo execution polled to a
/// completed result.
#[tokio::test]
async fn async_execution_through_manager() {
    let manager = manager();
    let id = manager.create_agent_from_config(&agent_config("worker")).unwrap();
    manager.start_agent(id).await.unwrap();

    let agent = manager.get_agent(id).unwrap();
    let job_id = agent
        .execute_function_async("echo", AgentData::new().with("text", "hi"), 0)
        .await
        .unwrap();

    let mut result = None;
    for _ in 0..200 {
        if agent.job_status(job_id).await.unwrap().is_terminal() {
            result = Some(agent.job_result(job_id).await.unwrap());
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let result = result.expect("job did not finish");
    assert!(result.success);
    assert_eq!(
        result.result_data.as_object().unwrap().get_string("text"),
        Some("hi")
    );

    manager.stop_all().await;
}

/// The job owner lookup scans all agents.
#[tokio::test]
async fn find_job_owner_locates_the_right_agent() {
    let manager = manager();
    let first = manager.create_agent_from_config(&agent_config("first")).unwrap();
    let second = manager.create_agent_from_config(&agent_config("second")).unwrap();
    manager.start_agent(first).await.unwrap();
    manager.start_agent(second).await.unwrap();

    let agent = manager.get_agent(second).unwrap();
    let job_id = agent
        .execute_function_async("echo", AgentData::new().with("text", "x"), 0)
        .await
        .unwrap();

    let owner = manager.find_job_owner(job_id).await.unwrap();
    assert_eq!(owner.id(), second);

    manager.stop_all().await;
}
