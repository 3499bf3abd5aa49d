//! Publishes domain events to NATS.

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::events::DomainEvent;
use crate::domain::value_objects::TenantId;

#[derive(Serialize)]
struct Envelope<'a> {
    tenant: &'a str,
    name: &'a str,
    #[serde(flatten)]
    event: &'a DomainEvent,
}

/// Fire-and-forget publisher. Without a NATS connection events are only logged.
#[derive(Clone, Default)]
pub struct EventPublisher { nats: Option<async_nats::Client> }

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub fn disabled() -> Self { Self::default() }

    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else { return Self::disabled() };
        match async_nats::connect(url).await {
            Ok(client) => Self::new(Some(client)),
            Err(e) => {
                warn!(error = %e, "NATS unavailable, domain events will not be published");
                Self::disabled()
            }
        }
    }

    pub fn subject(tenant: &TenantId, event: &DomainEvent) -> String {
        format!("storehub.{}.{}", tenant, event.name())
    }

    pub async fn publish(&self, tenant: &TenantId, events: Vec<DomainEvent>) {
        for event in events {
            let subject = Self::subject(tenant, &event);
            let Some(client) = &self.nats else {
                debug!(%subject, "event not published (no NATS connection)");
                continue;
            };
            let payload = match serde_json::to_vec(&Envelope { tenant: tenant.as_str(), name: event.name(), event: &event }) {
                Ok(p) => p,
                Err(e) => { warn!(error = %e, %subject, "failed to encode event"); continue; }
            };
            if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                warn!(error = %e, %subject, "failed to publish event");
            }
        }
    }
}
