//! A resource installer whose sources are real tasks sending real requests.
//!
//! Each installed source resolves its sink, becomes ready after a configurable
//! delay, and then posts timer CloudEvents to the sink over HTTP(S), carrying a
//! token minted by a [`TestIssuer`] for the source's OIDC service account.

use crate::issuer::TestIssuer;
use anyhow::Result;
use async_trait::async_trait;
use sinkproof_ports::ResourceInstaller;
use sinkproof_receiver::{CloudEventSender, OutboundEvent};
use sinkproof_schema::TestScope;
use sinkproof_schema::resource::{
    Condition, Gvr, InstallOptions, ResourceStatus, oidc_service_account_name,
    service_account_subject,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Event type timer sources emit.
pub const TIMER_EVENT_TYPE: &str = "dev.knative.eventing.timer";

type Key = (String, Gvr, String);

struct Installed {
    status: ResourceStatus,
    ready_at: Instant,
    producer: Option<JoinHandle<()>>,
}

/// In-memory stand-in for a cluster's resource API.
pub struct InMemoryInstaller {
    issuer: Arc<TestIssuer>,
    ready_after: Duration,
    audience_override: Option<String>,
    resources: Mutex<HashMap<Key, Installed>>,
}

impl InMemoryInstaller {
    pub fn new(issuer: Arc<TestIssuer>) -> Self {
        Self {
            issuer,
            ready_after: Duration::ZERO,
            audience_override: None,
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Sources report ready only after `delay`, and send nothing before.
    pub fn with_ready_after(mut self, delay: Duration) -> Self {
        self.ready_after = delay;
        self
    }

    /// Tokens are minted for `audience` instead of the sink's audience.
    pub fn with_token_audience(mut self, audience: &str) -> Self {
        self.audience_override = Some(audience.to_string());
        self
    }

    pub fn issuer(&self) -> &TestIssuer {
        &self.issuer
    }

    /// Number of installed resources.
    pub fn installed(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Key, Installed>> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InMemoryInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryInstaller")
            .field("issuer", &self.issuer.issuer())
            .field("ready_after", &self.ready_after)
            .field("audience_override", &self.audience_override)
            .field("installed", &self.installed())
            .finish()
    }
}

impl Drop for InMemoryInstaller {
    fn drop(&mut self) {
        for installed in self.lock().values_mut() {
            if let Some(task) = installed.producer.take() {
                task.abort();
            }
        }
    }
}

fn condition(condition_type: &str, status: bool, message: Option<String>) -> Condition {
    Condition {
        condition_type: condition_type.to_string(),
        status,
        reason: None,
        message,
    }
}

#[async_trait]
impl ResourceInstaller for InMemoryInstaller {
    async fn install_source(
        &self,
        scope: &TestScope,
        gvr: &Gvr,
        name: &str,
        options: &InstallOptions,
    ) -> Result<()> {
        let key = (scope.namespace.clone(), gvr.clone(), name.to_string());
        if self.lock().contains_key(&key) {
            anyhow::bail!("{gvr} {name} already exists in {}", scope.namespace);
        }

        let service_account = oidc_service_account_name(gvr, name);
        let sink = options.sink.clone().unwrap_or_default();
        let mut status = ResourceStatus {
            sink_uri: sink.uri.clone(),
            sink_ca_certs: sink.ca_certs.clone(),
            sink_audience: sink.audience.clone(),
            service_account_name: Some(service_account.clone()),
            ..ResourceStatus::default()
        };

        let sender = match sink.uri.as_deref() {
            None => Err("sink has no URI".to_string()),
            Some(uri) => CloudEventSender::new(uri, sink.ca_certs.as_deref())
                .map_err(|e| format!("{e:#}")),
        };
        let producer = match sender {
            Ok(sender) => {
                status.conditions.push(condition("SinkProvided", true, None));
                status.conditions.push(condition("Deployed", true, None));
                let audience = self.audience_override.clone().or(sink.audience.clone());
                let token = audience.map(|aud| {
                    self.issuer
                        .token(&aud, &service_account_subject(&scope.namespace, &service_account))
                });
                let source = format!(
                    "/apis/v1/namespaces/{}/{}/{}",
                    scope.namespace, gvr.resource, name
                );
                Some(tokio::spawn(produce(
                    sender,
                    source,
                    token,
                    options.timer.clone(),
                    self.ready_after,
                )))
            }
            Err(message) => {
                tracing::warn!(%gvr, name, error = %message, "source cannot reach its sink");
                status
                    .conditions
                    .push(condition("SinkProvided", false, Some(message)));
                None
            }
        };

        tracing::debug!(%gvr, name, namespace = %scope.namespace, "installed source");
        self.lock().insert(
            key,
            Installed {
                ready_at: Instant::now() + self.ready_after,
                status,
                producer,
            },
        );
        Ok(())
    }

    async fn status(&self, scope: &TestScope, gvr: &Gvr, name: &str) -> Result<ResourceStatus> {
        let key = (scope.namespace.clone(), gvr.clone(), name.to_string());
        let resources = self.lock();
        let installed = resources
            .get(&key)
            .ok_or_else(|| anyhow::anyhow!("{gvr} {name} not found in {}", scope.namespace))?;
        let mut status = installed.status.clone();
        status.ready = installed.producer.is_some() && Instant::now() >= installed.ready_at;
        Ok(status)
    }

    async fn delete(&self, scope: &TestScope, gvr: &Gvr, name: &str) -> Result<()> {
        let key = (scope.namespace.clone(), gvr.clone(), name.to_string());
        if let Some(mut installed) = self.lock().remove(&key)
            && let Some(task) = installed.producer.take()
        {
            task.abort();
        }
        Ok(())
    }
}

async fn produce(
    sender: CloudEventSender,
    source: String,
    token: Option<String>,
    timer: sinkproof_schema::resource::TimerOptions,
    ready_after: Duration,
) {
    tokio::time::sleep(ready_after).await;
    let mut sent = 0u32;
    loop {
        if timer.repeat.is_some_and(|limit| sent >= limit) {
            break;
        }
        let mut event = OutboundEvent::new(TIMER_EVENT_TYPE, &sent.to_string(), &source)
            .with_json(&serde_json::json!({ "message": timer.message }));
        if let Some(token) = &token {
            event = event.with_bearer_token(token.clone());
        }
        match sender.send(&event).await {
            Ok(status) => tracing::trace!(%source, status, "timer event delivered"),
            Err(e) => tracing::warn!(%source, error = %format!("{e:#}"), "timer event not delivered"),
        }
        sent += 1;
        tokio::time::sleep(timer.period()).await;
    }
}
