//! Liveness reporting for the long-running loops in each binary.
//!
//! Every loop registers itself with a deadline and must report in more often
//! than that deadline, or the process stops answering its liveness probe and
//! gets restarted. Readiness and liveness stay separate probes; this registry
//! only answers the latter.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Default)]
struct ComponentHealth {
    deadline: Duration,
    last_report: Option<Instant>,
}

/// Overall process health, computed from every registered component.
#[derive(Debug)]
pub struct HealthStatus {
    /// True when every component reported within its deadline.
    pub healthy: bool,
    /// Per-component state, for probe debugging.
    pub components: HashMap<String, String>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{:?}", self);
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Register a component. The returned handle must be used to report in
    /// more frequently than `deadline`.
    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        self.components.write().unwrap().insert(
            component.to_owned(),
            ComponentHealth {
                deadline,
                last_report: None,
            },
        );

        HealthHandle {
            component: component.to_owned(),
            components: self.components.clone(),
        }
    }

    /// Compute the process status. A registry with no components is
    /// unhealthy, as is any component that never reported or went stale.
    pub fn get_status(&self) -> HealthStatus {
        let components = self.components.read().unwrap();
        let now = Instant::now();

        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::new(),
        };

        for (name, component) in components.iter() {
            let label = match component.last_report {
                Some(at) if now.duration_since(at) <= component.deadline => "healthy",
                Some(_) => {
                    status.healthy = false;
                    "stalled"
                }
                None => {
                    status.healthy = false;
                    "starting"
                }
            };
            status.components.insert(name.clone(), label.to_owned());
        }

        if !status.healthy {
            tracing::warn!("{} health check failed: {:?}", self.name, status.components);
        }

        status
    }
}

/// Handle held by a component to report its own liveness.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
}

impl HealthHandle {
    /// Report as healthy until the component's deadline next runs out.
    pub fn report_healthy(&self) {
        if let Some(component) = self.components.write().unwrap().get_mut(&self.component) {
            component.last_report = Some(Instant::now());
        }
    }
}
