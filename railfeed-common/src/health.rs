//! Liveness reporting for the feed's long-running loops.
//!
//! Each loop registers a component with a deadline and must keep reporting healthy
//! more often than that deadline. The process is live only while every registered
//! component is within its deadline; a component that stops reporting is marked
//! `Stalled`.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tracing::warn;

#[derive(Default, Debug)]
pub struct HealthStatus {
    /// True when at least one component is registered and all of them are healthy
    pub healthy: bool,
    /// Current status of each registered component, for display
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
    /// Set on registration, before the first report
    Starting,
    /// Recently reported healthy, will need to report again before the date
    HealthyUntil(OffsetDateTime),
    /// Reported unhealthy
    Unhealthy,
    /// The HealthyUntil deadline passed without a new report
    Stalled,
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Must be called more frequently than the configured deadline.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut components) => {
                components.insert(self.component.clone(), status);
            }
            // Poisoned lock: the liveness check keeps failing and the process gets restarted
            Err(_) => warn!("poisoned HealthRegistry lock"),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Registers a new component. The returned handle is passed to the component so it
    /// can report its status.
    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Overall status computed from every registered component. Usable as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("{} health check failed: poisoned lock", self.name);
            return HealthStatus::default();
        };

        let now = OffsetDateTime::now_utc();
        let components: HashMap<String, ComponentStatus> = components
            .iter()
            .map(|(name, status)| {
                let status = match status {
                    ComponentStatus::HealthyUntil(until) if *until <= now => {
                        ComponentStatus::Stalled
                    }
                    other => other.clone(),
                };
                (name.clone(), status)
            })
            .collect();

        let healthy = !components.is_empty()
            && components
                .values()
                .all(|status| matches!(status, ComponentStatus::HealthyUntil(_)));

        if !healthy {
            warn!("{} health check failed: {:?}", self.name, components);
        }

        HealthStatus {
            healthy,
            components,
        }
    }
}
