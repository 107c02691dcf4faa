use crate::backend::ClientKey;
use actix_web::dev::ServiceRequest;
use std::future::{ready, Ready};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

pub type ClientKeyFuture = Ready<Result<ClientKey, actix_web::Error>>;

/// Utility to create an input function that produces a [ClientKey] for each request.
///
/// Requests without a usable address are keyed as [ClientKey::unknown()] rather than rejected,
/// so all of them share a single window.
pub struct ClientKeyFunctionBuilder {
    real_ip_key: bool,
    custom_key: Option<String>,
}

impl Default for ClientKeyFunctionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientKeyFunctionBuilder {
    /// By default the key is the client's real IP, see [ClientKeyFunctionBuilder::real_ip_key].
    pub fn new() -> Self {
        Self {
            real_ip_key: true,
            custom_key: None,
        }
    }

    /// Key on the client's real IP, taken from the `Forwarded` or `X-Forwarded-For` header and
    /// falling back to the connection peer address.
    ///
    /// # Security
    ///
    /// This calls
    /// [ConnectionInfo::realip_remote_addr()](actix_web::dev::ConnectionInfo::realip_remote_addr)
    /// internally which is only suitable for Actix applications deployed behind a proxy that you
    /// control.
    ///
    /// # IPv6
    ///
    /// IPv6 addresses will be grouped into a single key per /64
    pub fn real_ip_key(mut self) -> Self {
        self.real_ip_key = true;
        self
    }

    /// Key on the connection peer IP, ignoring forwarding headers.
    ///
    /// This is suitable when clients connect directly to the Actix application.
    pub fn peer_ip_key(mut self) -> Self {
        self.real_ip_key = false;
        self
    }

    /// Prefix the key with a custom component, to keep the keys of several limiters apart.
    pub fn custom_key(mut self, key: &str) -> Self {
        self.custom_key = Some(key.to_owned());
        self
    }

    pub fn build(self) -> impl Fn(&ServiceRequest) -> ClientKeyFuture + 'static {
        move |req| {
            let info = req.connection_info();
            let addr = if self.real_ip_key {
                info.realip_remote_addr()
            } else {
                info.peer_addr()
            };
            let ip = match addr.map(ip_key) {
                Some(Some(ip)) => ip,
                Some(None) => {
                    log::debug!("Unable to parse client address {addr:?}, keying as unknown");
                    ClientKey::unknown().to_string()
                }
                None => ClientKey::unknown().to_string(),
            };
            let key = match &self.custom_key {
                Some(custom) => format!("{custom}-{ip}"),
                None => ip,
            };
            ready(Ok(ClientKey::new(key)))
        }
    }
}

// Groups IPv6 addresses together, see:
// https://adam-p.ca/blog/2022/02/ipv6-rate-limiting/
fn ip_key(addr: &str) -> Option<String> {
    let ip = addr
        .parse::<IpAddr>()
        .or_else(|_| addr.parse::<SocketAddr>().map(|s| s.ip()))
        .ok()?;
    Some(match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return Some(v4.to_string());
            }
            let s = v6.segments();
            let subnet = Ipv6Addr::new(s[0], s[1], s[2], s[3], 0, 0, 0, 0);
            format!("{}/64", subnet)
        }
    })
}
