//! Hub negotiation: discover the connection token and the transports the hub
//! is willing to serve before opening the real-time channel.

use parlor_shared::constants::NEGOTIATE_VERSION;
use parlor_shared::error::ProtocolError;
use parlor_shared::types::TransportKind;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::{NetError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    connection_id: Option<String>,
    connection_token: Option<String>,
    #[serde(default)]
    negotiate_version: u32,
    #[serde(default)]
    available_transports: Vec<AvailableTransport>,
    /// Redirect to another hub (service-hosted hubs)
    url: Option<String>,
    access_token: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailableTransport {
    transport: String,
    #[serde(default)]
    transfer_formats: Vec<String>,
}

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiation {
    /// Hub to connect to (differs from the configured one after a redirect)
    pub hub_url: Url,
    pub connection_id: String,
    pub connection_token: String,
    /// Transports the hub advertised with text framing support
    pub transports: Vec<TransportKind>,
    /// Token handed out by a redirect, overriding the provider's token
    pub access_token: Option<String>,
}

impl Negotiation {
    /// A negotiation result for hubs reached without the negotiate round-trip.
    pub fn direct(hub_url: Url, transports: Vec<TransportKind>) -> Self {
        Self {
            hub_url,
            connection_id: String::new(),
            connection_token: String::new(),
            transports,
            access_token: None,
        }
    }

    /// Transports to try, in the caller's preference order.
    pub fn candidates(&self, preferred: &[TransportKind]) -> Vec<TransportKind> {
        preferred
            .iter()
            .copied()
            .filter(|kind| self.transports.contains(kind))
            .collect()
    }

    /// Hub URL carrying the connection token, as used by every transport.
    pub fn endpoint(&self) -> Url {
        let mut url = self.hub_url.clone();
        if !self.connection_token.is_empty() {
            url.query_pairs_mut().append_pair("id", &self.connection_token);
        }
        url
    }
}

/// `POST {hub}/negotiate`, following at most one redirect.
pub async fn negotiate(http: &Client, hub_url: &Url, token: Option<&str>) -> Result<Negotiation> {
    let first = request(http, hub_url, token).await?;
    match first.url.clone() {
        Some(redirect) => {
            let target: Url = redirect.parse()?;
            debug!(from = %hub_url, to = %target, "Hub negotiation redirected");
            let redirected_token = first.access_token.clone();
            let second = request(http, &target, redirected_token.as_deref().or(token)).await?;
            if second.url.is_some() {
                warn!(hub = %target, "Ignoring nested negotiation redirect");
            }
            into_negotiation(second, target, redirected_token)
        }
        None => into_negotiation(first, hub_url.clone(), None),
    }
}

async fn request(http: &Client, hub_url: &Url, token: Option<&str>) -> Result<NegotiateResponse> {
    let url = negotiate_url(hub_url);
    let mut req = http.post(url);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let res = req.send().await?;

    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(NetError::UnexpectedStatus { status, body });
    }

    let body: NegotiateResponse = res.json().await?;
    if let Some(error) = body.error {
        return Err(ProtocolError::HandshakeRejected(error).into());
    }
    Ok(body)
}

fn negotiate_url(hub_url: &Url) -> Url {
    let mut url = hub_url.clone();
    let path = format!("{}/negotiate", hub_url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .append_pair("negotiateVersion", &NEGOTIATE_VERSION.to_string());
    url
}

fn into_negotiation(
    body: NegotiateResponse,
    hub_url: Url,
    access_token: Option<String>,
) -> Result<Negotiation> {
    let connection_id = body
        .connection_id
        .ok_or(ProtocolError::MissingField("connectionId"))?;
    // Version 0 hubs use the connection id as the token.
    let connection_token = match body.negotiate_version {
        0 => connection_id.clone(),
        _ => body
            .connection_token
            .ok_or(ProtocolError::MissingField("connectionToken"))?,
    };

    let transports = body
        .available_transports
        .iter()
        .filter(|t| t.transfer_formats.is_empty() || t.transfer_formats.iter().any(|f| f == "Text"))
        .filter_map(|t| t.transport.parse::<TransportKind>().ok())
        .collect();

    Ok(Negotiation {
        hub_url,
        connection_id,
        connection_token,
        transports,
        access_token,
    })
}
