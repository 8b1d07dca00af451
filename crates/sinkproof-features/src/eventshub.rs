//! Event receivers as feature steps.
//!
//! A started receiver's endpoint is kept in the feature's state so later
//! steps can point a source at it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sinkproof_engine::{Action, FeatureContext};
use sinkproof_schema::resource::{ReceiverEndpoint, ReceiverOptions};

fn state_key(name: &str) -> String {
    format!("eventshub/{name}")
}

/// Starts a receiver capturing into the feature's store.
#[derive(Debug, Clone)]
pub struct InstallReceiver {
    name: String,
    options: ReceiverOptions,
}

pub fn install_receiver(name: &str, options: ReceiverOptions) -> InstallReceiver {
    InstallReceiver {
        name: name.to_string(),
        options,
    }
}

#[async_trait]
impl Action for InstallReceiver {
    async fn run(&self, ctx: &FeatureContext) -> Result<()> {
        let endpoint = ctx
            .transport()
            .start_receiver(&ctx.scope, &ctx.store, &self.name, &self.options)
            .await
            .with_context(|| format!("install receiver {}", self.name))?;
        tracing::info!(
            receiver = %self.name,
            uri = %endpoint.uri,
            tls = endpoint.ca_certs.is_some(),
            audience = endpoint.audience.as_deref(),
            "receiver installed"
        );
        ctx.state.insert(&state_key(&self.name), endpoint);
        Ok(())
    }
}

/// Stops a receiver; stopping one that never started is fine.
#[derive(Debug, Clone)]
pub struct StopReceiver {
    name: String,
}

pub fn stop_receiver(name: &str) -> StopReceiver {
    StopReceiver {
        name: name.to_string(),
    }
}

#[async_trait]
impl Action for StopReceiver {
    async fn run(&self, ctx: &FeatureContext) -> Result<()> {
        ctx.transport()
            .stop_receiver(&ctx.scope, &self.name)
            .await
            .with_context(|| format!("stop receiver {}", self.name))
    }
}

/// Endpoint of receiver `name`, as installed by an earlier step.
pub fn endpoint(ctx: &FeatureContext, name: &str) -> Result<ReceiverEndpoint> {
    ctx.state.require(&state_key(name))
}

/// PEM bundle receiver `name` is served with, if it uses TLS.
pub fn ca_certs(ctx: &FeatureContext, name: &str) -> Result<Option<String>> {
    Ok(endpoint(ctx, name)?.ca_certs)
}
