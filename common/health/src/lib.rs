use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use tokio::runtime;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Liveness reporting for the long-running loops of a clickstream service.
///
/// Each loop (the aggregation scheduler, the rdkafka client of the ingester)
/// registers itself as a component with a deadline and has to keep
/// reporting before that deadline expires. The process is live only when
/// every registered component is live:
///   - a component that has registered but not yet reported is `Starting`
///   - a component that reports healthy stays healthy until its deadline
///   - a component that misses its deadline is `Stalled`
///   - a component can explicitly report itself `Unhealthy`
///
/// A registry with no components is never healthy, so a probe cannot pass
/// before the service has wired its loops.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    Starting,
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    Stalled,
}

impl ComponentStatus {
    pub fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::HealthyUntil(until) => *until > OffsetDateTime::now_utc(),
            _ => false,
        }
    }
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Report healthy until now + deadline. Must be called more often than the deadline.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ))
        .await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!("failed to report {} health status: {}", self.component, err)
        }
    }

    /// Same as `report_healthy`, for callers outside of the runtime such as rdkafka callbacks.
    pub fn report_healthy_blocking(&self) {
        let status = ComponentStatus::HealthyUntil(OffsetDateTime::now_utc() + self.deadline);
        if let Ok(handle) = runtime::Handle::try_current() {
            let this = self.clone();
            handle.spawn(async move { this.report_status(status).await });
            return;
        }

        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.blocking_send(message) {
            warn!("failed to report {} health status: {}", self.component, err)
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    /// Must be called from within a tokio runtime: status updates are applied by a spawned task.
    pub fn new(name: &str) -> Self {
        let (sender, mut receiver) = mpsc::channel::<HealthMessage>(16);
        let registry = Self {
            name: name.to_owned(),
            components: Default::default(),
            sender,
        };

        let components = registry.components.clone();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match components.write() {
                    Ok(mut map) => {
                        map.insert(message.component, message.status);
                    }
                    Err(_) => warn!("poisoned health registry lock"),
                }
            }
        });

        registry
    }

    /// Register a component, which starts out as `Starting`.
    pub async fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Overall status, usable directly as an axum handler response.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("poisoned health registry lock, reporting {} unhealthy", self.name);
            return HealthStatus::default();
        };

        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };

        for (name, component) in components.iter() {
            let component = match component {
                ComponentStatus::HealthyUntil(_) if !component.is_healthy() => {
                    ComponentStatus::Stalled
                }
                other => other.clone(),
            };
            if !component.is_healthy() {
                status.healthy = false;
            }
            status.components.insert(name.clone(), component);
        }

        match status.healthy {
            true => info!("{} health check ok", self.name),
            false => warn!("{} health check failed: {:?}", self.name, status.components),
        }
        status
    }
}
