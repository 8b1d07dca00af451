use crate::server::{self, RunningReceiver};
use crate::tls;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use sinkproof_ports::TransportProvider;
use sinkproof_schema::TestScope;
use sinkproof_schema::resource::{ReceiverEndpoint, ReceiverOptions};
use sinkproof_store::EventStore;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Runs receivers in-process on loopback ports.
///
/// TLS receivers get their own CA; the endpoint hands out that CA so a
/// source can be told to trust exactly this receiver.
#[derive(Default)]
pub struct LocalTransport {
    receivers: Mutex<HashMap<(String, String), RunningReceiver>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of receivers currently running.
    pub fn running(&self) -> usize {
        self.receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("running", &self.running())
            .finish()
    }
}

#[async_trait]
impl TransportProvider for LocalTransport {
    async fn start_receiver(
        &self,
        scope: &TestScope,
        store: &EventStore,
        name: &str,
        options: &ReceiverOptions,
    ) -> Result<ReceiverEndpoint> {
        let key = (scope.namespace.clone(), name.to_string());
        if self
            .receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key)
        {
            bail!("receiver {name} already running in {}", scope.namespace);
        }

        let material = if options.tls {
            Some(tls::issue(tls::DEFAULT_HOSTS).context("issue receiver TLS material")?)
        } else {
            None
        };
        let server_config = material.as_ref().map(tls::server_config).transpose()?;

        store.register(name, options.clone());
        let app = server::router(name, store.clone(), options.audience.as_deref());
        let running = server::start(app, server_config)
            .await
            .with_context(|| format!("start receiver {name}"))?;

        let endpoint = ReceiverEndpoint {
            name: name.to_string(),
            uri: running.uri(),
            ca_certs: material.map(|m| m.ca_pem),
            audience: options.audience.clone(),
        };
        tracing::info!(
            namespace = %scope.namespace,
            receiver = name,
            uri = %endpoint.uri,
            audience = ?endpoint.audience,
            "receiver started"
        );

        self.receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, running);
        Ok(endpoint)
    }

    async fn stop_receiver(&self, scope: &TestScope, name: &str) -> Result<()> {
        let running = self
            .receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(scope.namespace.clone(), name.to_string()));
        if let Some(running) = running {
            running.stop().await;
            tracing::info!(namespace = %scope.namespace, receiver = name, "receiver stopped");
        }
        Ok(())
    }
}
