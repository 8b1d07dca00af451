//! Minimal CloudEvents sender, used by in-process sources and the CLI.

use crate::cloudevent::SPEC_VERSION;
use crate::tls;
use anyhow::{Context, Result, anyhow, bail};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::Url;

/// One event in binary content mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundEvent {
    pub event_type: String,
    pub id: String,
    pub source: String,
    pub content_type: String,
    pub data: Vec<u8>,
    /// Extra `ce-<name>` attributes.
    pub extensions: BTreeMap<String, String>,
    pub bearer_token: Option<String>,
}

impl OutboundEvent {
    pub fn new(event_type: &str, id: &str, source: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            id: id.to_string(),
            source: source.to_string(),
            content_type: "application/json".to_string(),
            data: Vec::new(),
            extensions: BTreeMap::new(),
            bearer_token: None,
        }
    }

    pub fn with_json(mut self, data: &serde_json::Value) -> Self {
        self.content_type = "application/json".to_string();
        self.data = data.to_string().into_bytes();
        self
    }

    pub fn with_extension(mut self, name: &str, value: &str) -> Self {
        self.extensions
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// Posts events to one destination, one connection per event.
#[derive(Clone)]
pub struct CloudEventSender {
    url: Url,
    connector: Option<TlsConnector>,
}

impl CloudEventSender {
    /// `ca_pem` is required for `https` destinations and is the only trust anchor used.
    pub fn new(destination: &str, ca_pem: Option<&str>) -> Result<Self> {
        let url = Url::parse(destination).with_context(|| format!("invalid sink URI {destination:?}"))?;
        let connector = match url.scheme() {
            "http" => None,
            "https" => {
                let ca_pem = ca_pem.ok_or_else(|| {
                    anyhow!("sink {destination} is https but no CA certificates were provided")
                })?;
                Some(TlsConnector::from(tls::client_config(ca_pem)?))
            }
            other => bail!("unsupported sink scheme {other:?}"),
        };
        Ok(Self { url, connector })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends `event` and returns the response status code.
    pub async fn send(&self, event: &OutboundEvent) -> Result<u16> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| anyhow!("sink URI {} has no host", self.url))?
            .to_string();
        let port = self
            .url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("sink URI {} has no port", self.url))?;
        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .with_context(|| format!("connect to {host}:{port}"))?;

        match &self.connector {
            Some(connector) => {
                // Brackets from IPv6 literals are not part of the server name.
                let server_name = ServerName::try_from(host.trim_matches(['[', ']']).to_string())
                    .map_err(|e| anyhow!("invalid server name {host:?}: {e}"))?;
                let stream = connector
                    .connect(server_name, stream)
                    .await
                    .with_context(|| format!("TLS handshake with {host}:{port}"))?;
                self.send_over(stream, event).await
            }
            None => self.send_over(stream, event).await,
        }
    }

    async fn send_over<I>(&self, io: I, event: &OutboundEvent) -> Result<u16>
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sender, connection) = http1::handshake(TokioIo::new(io))
            .await
            .context("HTTP handshake")?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "sender connection closed with error");
            }
        });

        let request = self.request(event)?;
        let response = sender.send_request(request).await.context("send event")?;
        let status = response.status().as_u16();
        tracing::debug!(
            sink = %self.url,
            event_type = %event.event_type,
            id = %event.id,
            status,
            "event sent"
        );
        Ok(status)
    }

    fn request(&self, event: &OutboundEvent) -> Result<hyper::Request<Full<Bytes>>> {
        let path = match self.url.query() {
            Some(q) => format!("{}?{q}", self.url.path()),
            None => self.url.path().to_string(),
        };
        let authority = match self.url.port() {
            Some(port) => format!("{}:{port}", self.url.host_str().unwrap_or_default()),
            None => self.url.host_str().unwrap_or_default().to_string(),
        };

        let mut builder = hyper::Request::post(path)
            .header(HOST, authority)
            .header(CONTENT_TYPE, &event.content_type)
            .header("ce-specversion", SPEC_VERSION)
            .header("ce-type", &event.event_type)
            .header("ce-id", &event.id)
            .header("ce-source", &event.source);
        for (name, value) in &event.extensions {
            builder = builder.header(format!("ce-{name}"), value);
        }
        if let Some(token) = &event.bearer_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
            .body(Full::new(Bytes::from(event.data.clone())))
            .context("build event request")
    }
}

impl std::fmt::Debug for CloudEventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudEventSender")
            .field("url", &self.url.as_str())
            .field("tls", &self.connector.is_some())
            .finish()
    }
}
