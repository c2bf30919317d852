/// Test helper functions and service builders
use super::fakes::FakeAgent;
use kumo_lib::modules::agents::infrastructure::CircuitBreakerConfig;
use kumo_lib::modules::agents::AgentsManager;
use kumo_lib::modules::jobs::domain::{Job, JobStatus};
use kumo_lib::shared::config::EngineConfig;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Manager over fake agents with a short fan-out retry delay
pub fn agents_manager(agents: &[Arc<FakeAgent>]) -> AgentsManager {
    let mut manager = AgentsManager::new(CircuitBreakerConfig::default(), Duration::from_millis(10));
    for agent in agents {
        manager.register(agent.clone()).unwrap();
    }
    manager
}

pub fn ids(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(agent, id)| (agent.to_string(), id.to_string()))
        .collect()
}

/// Engine configuration with fast ticks and no agents from the environment
pub fn test_config() -> EngineConfig {
    EngineConfig::from_lookup(|key| match key {
        "KUMO_QUEUE_TICK_MS" => Some("20".to_string()),
        "KUMO_FANOUT_RETRY_DELAY_MS" => Some("10".to_string()),
        _ => None,
    })
    .unwrap()
}

/// Poll `check` until it holds or `limit` elapses
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_status(job: &Arc<Job>, status: JobStatus, limit: Duration) -> bool {
    wait_until(limit, || {
        let job = Arc::clone(job);
        async move { job.status().await == status }
    })
    .await
}
