//! Outbound-request policy: refuses private, loopback, or unroutable
//! destinations.
//!
//! Two enforcement points, both backed by the same [`is_blocked_ip`] check:
//! a synchronous pre-check against the parsed URL, and a
//! [`resolve::Resolve`] implementation plugged into `reqwest::ClientBuilder`
//! so the transport re-resolves and validates the address it is about to
//! dial rather than trusting whatever the pre-check saw — closing the DNS
//! rebinding window between lookup and connect.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio::net::lookup_host;
use url::Url;

use crate::core::errors::CoreError;

/// Normalizes an IPv4-mapped IPv6 address (`::ffff:a.b.c.d`) down to its
/// IPv4 form so range checks can't be bypassed by the mapped encoding.
fn unwrap_mapped(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        other => other,
    }
}

/// Whether `ip` falls in a loopback, link-local, unspecified, private, or
/// otherwise non-routable range that must never be dialed.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match unwrap_mapped(ip) {
        IpAddr::V4(v4) => {
            if v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() || v4.is_private() {
                return true;
            }
            let octets = v4.octets();
            // CGNAT: 100.64.0.0/10
            if octets[0] == 100 && (octets[1] & 0b1100_0000) == 0b0100_0000 {
                return true;
            }
            false
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            let segments = v6.segments();
            // link-local fe80::/10
            if (segments[0] & 0xffc0) == 0xfe80 {
                return true;
            }
            // unique local fc00::/7
            if (segments[0] & 0xfe00) == 0xfc00 {
                return true;
            }
            false
        }
    }
}

/// Rejects anything but `http`/`https`, and resolves+validates the
/// hostname synchronously before a fetch is attempted. This is the first
/// of the two enforcement points; the second lives in [`SsrfResolver`].
pub async fn precheck(url: &Url) -> Result<(), CoreError> {
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(CoreError::Ssrf(format!("unsupported scheme: {other}"))),
    }
    let host = url
        .host_str()
        .ok_or_else(|| CoreError::InvalidInput("url has no host".into()))?;
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs = lookup_host((host, port))
        .await
        .map_err(|e| CoreError::InvalidInput(format!("dns lookup failed for {host}: {e}")))?;

    let mut any = false;
    for addr in addrs {
        any = true;
        if is_blocked_ip(addr.ip()) {
            return Err(CoreError::Ssrf(format!(
                "{host} resolves to a blocked address: {}",
                addr.ip()
            )));
        }
    }
    if !any {
        return Err(CoreError::InvalidInput(format!(
            "dns lookup for {host} returned no addresses"
        )));
    }
    Ok(())
}

/// A `reqwest::dns::Resolve` that re-resolves every hostname at dial time
/// and filters out any candidate address [`is_blocked_ip`] rejects. If
/// every candidate is blocked, resolution fails closed — `reqwest` never
/// gets an address to connect to.
#[derive(Clone, Default)]
pub struct SsrfResolver;

impl Resolve for SsrfResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs = lookup_host((host.as_str(), 0))
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;

            let allowed: Vec<SocketAddr> = addrs
                .filter(|a| !is_blocked_ip(a.ip()))
                .collect::<Vec<_>>();

            if allowed.is_empty() {
                return Err(format!("no non-blocked address for {host}").into());
            }

            let iter: Addrs = Box::new(allowed.into_iter());
            Ok(iter)
        })
    }
}

/// Builds a `reqwest::Client` wired with [`SsrfResolver`] so every request
/// it issues re-validates its destination at dial time.
pub fn build_guarded_client(
    timeout: std::time::Duration,
    user_agent: &str,
) -> Result<reqwest::Client, CoreError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .dns_resolver(Arc::new(SsrfResolver))
        .build()
        .map_err(|e| CoreError::InvalidInput(format!("failed to build http client: {e}")))
}
