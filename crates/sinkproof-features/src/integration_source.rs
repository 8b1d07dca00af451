//! Features for IntegrationSource delivering to a receiver.

use crate::{eventshub, featureflags, source};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sinkproof_assert::{has_type, kind, oidc_user_from_resource, on_store, over_tls};
use sinkproof_engine::{Action, Feature, FeatureContext};
use sinkproof_ids::make_random_k8s_name;
use sinkproof_schema::event::EventKind;
use sinkproof_schema::resource::{Gvr, InstallOptions, ReceiverOptions, TimerOptions};

/// Type of the events an IntegrationSource's timer emits.
pub const TIMER_EVENT_TYPE: &str = "dev.knative.eventing.timer";

/// Audience the OIDC feature's receiver expects.
pub const SINK_AUDIENCE: &str = "audience";

pub fn gvr() -> Gvr {
    Gvr::new("sources.knative.dev", "v1alpha1", "integrationsources")
}

/// Installs an IntegrationSource with explicit options.
#[derive(Debug, Clone)]
pub struct Install {
    name: String,
    options: InstallOptions,
}

pub fn install(name: &str, options: InstallOptions) -> Install {
    Install {
        name: name.to_string(),
        options,
    }
}

#[async_trait]
impl Action for Install {
    async fn run(&self, ctx: &FeatureContext) -> Result<()> {
        ctx.installer()
            .install_source(&ctx.scope, &gvr(), &self.name, &self.options)
            .await
            .with_context(|| format!("install integrationsource {}", self.name))
    }
}

/// Installs an IntegrationSource whose sink is a receiver started earlier in
/// the feature, trusting the receiver's CA.
#[derive(Debug, Clone)]
pub struct InstallWithReceiverSink {
    name: String,
    receiver: String,
    audience: Option<String>,
    timer: TimerOptions,
}

pub fn install_with_receiver_sink(
    name: &str,
    receiver: &str,
    audience: Option<&str>,
) -> InstallWithReceiverSink {
    InstallWithReceiverSink {
        name: name.to_string(),
        receiver: receiver.to_string(),
        audience: audience.map(str::to_string),
        timer: TimerOptions::default(),
    }
}

impl InstallWithReceiverSink {
    pub fn with_timer(mut self, timer: TimerOptions) -> Self {
        self.timer = timer;
        self
    }
}

#[async_trait]
impl Action for InstallWithReceiverSink {
    async fn run(&self, ctx: &FeatureContext) -> Result<()> {
        let mut sink = eventshub::endpoint(ctx, &self.receiver)?.as_destination();
        sink.ca_certs = eventshub::ca_certs(ctx, &self.receiver)?;
        sink.audience = self.audience.clone();
        let options = InstallOptions::default()
            .with_sink(sink)
            .with_timer(self.timer.clone());
        install(&self.name, options).run(ctx).await
    }
}

#[derive(Debug, Clone)]
pub struct Delete {
    name: String,
}

pub fn delete(name: &str) -> Delete {
    Delete {
        name: name.to_string(),
    }
}

#[async_trait]
impl Action for Delete {
    async fn run(&self, ctx: &FeatureContext) -> Result<()> {
        ctx.installer()
            .delete(&ctx.scope, &gvr(), &self.name)
            .await
            .with_context(|| format!("delete integrationsource {}", self.name))
    }
}

/// An IntegrationSource sending to an OIDC-protected TLS receiver uses its
/// own identity and trusts the receiver's CA.
pub fn sends_events_with_sink_ref_oidc() -> Feature {
    let src = make_random_k8s_name("integrationsource").into_string();
    let sink = make_random_k8s_name("sink").into_string();

    Feature::new("IntegrationSource send events with OIDC support")
        .prerequisite(
            "OIDC authentication is enabled",
            featureflags::authentication_oidc_enabled(),
        )
        .prerequisite(
            "transport encryption is strict",
            featureflags::transport_encryption_strict(),
        )
        .prerequisite(
            "should not run when Istio is enabled",
            featureflags::istio_disabled(),
        )
        .setup(
            "install sink",
            eventshub::install_receiver(
                &sink,
                ReceiverOptions::default()
                    .with_audience(SINK_AUDIENCE)
                    .with_tls(),
            ),
        )
        .requirement(
            "install integrationsource",
            install_with_receiver_sink(&src, &sink, Some(SINK_AUDIENCE)),
        )
        .requirement("integrationsource goes ready", source::is_ready(&gvr(), &src))
        .stable("integrationsource as event source", |g| {
            g.must(
                "delivers events",
                on_store(&sink).match_event(has_type(TIMER_EVENT_TYPE)).at_least(1),
            )
            .must(
                "uses integrationsources identity for OIDC",
                on_store(&sink)
                    .match_with_context(
                        kind(EventKind::EventReceived),
                        oidc_user_from_resource(&gvr(), &src),
                    )
                    .at_least(1),
            )
            .must(
                "Set sinkURI to HTTPS endpoint",
                source::expect_https_sink(&gvr(), &src),
            )
            .must(
                "Set sinkCACerts to non empty CA certs",
                source::expect_ca_certs(&gvr(), &src),
            )
        })
        .teardown("delete integrationsource", delete(&src))
        .teardown("uninstall sink", eventshub::stop_receiver(&sink))
}

/// An IntegrationSource sending to a TLS receiver delivers over TLS.
pub fn sends_events_with_tls() -> Feature {
    let src = make_random_k8s_name("integrationsource").into_string();
    let sink = make_random_k8s_name("sink").into_string();

    Feature::new("IntegrationSource send events with TLS support")
        .prerequisite(
            "transport encryption is strict",
            featureflags::transport_encryption_strict(),
        )
        .prerequisite(
            "should not run when Istio is enabled",
            featureflags::istio_disabled(),
        )
        .setup(
            "install sink",
            eventshub::install_receiver(&sink, ReceiverOptions::default().with_tls()),
        )
        .requirement(
            "install integrationsource",
            install_with_receiver_sink(&src, &sink, None),
        )
        .requirement("integrationsource goes ready", source::is_ready(&gvr(), &src))
        .stable("integrationsource as event source", |g| {
            g.must(
                "delivers events on sink with ref",
                on_store(&sink)
                    .match_event(has_type(TIMER_EVENT_TYPE).and(over_tls()))
                    .at_least(1),
            )
            .must(
                "Set sinkURI to HTTPS endpoint",
                source::expect_https_sink(&gvr(), &src),
            )
            .must(
                "Set sinkCACerts to non empty CA certs",
                source::expect_ca_certs(&gvr(), &src),
            )
        })
        .teardown("delete integrationsource", delete(&src))
        .teardown("uninstall sink", eventshub::stop_receiver(&sink))
}
