use async_trait::async_trait;
use std::net::IpAddr;
use trust_dns_resolver::TokioAsyncResolver;

use crate::DnsError;

/// Something that can map an address back to a hostname.
#[async_trait]
pub trait ReverseResolver: Send + Sync + 'static {
    /// Look up a name for `addr`. `None` means no usable name was found.
    async fn reverse_lookup(&self, addr: IpAddr) -> Option<String>;
}

/// Resolver backed by the system DNS configuration.
///
/// A reverse answer is only accepted if the name it gives resolves forward to
/// the original address again.
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn from_system_conf() -> Result<Self, DnsError> {
        Ok(Self {
            resolver: TokioAsyncResolver::tokio_from_system_conf()?,
        })
    }

    async fn verify_forward_matches(&self, name: &trust_dns_resolver::Name, addr: IpAddr) -> bool {
        match self.resolver.lookup_ip(name.clone()).await {
            Ok(lookup) => lookup.iter().any(|ip| ip == addr),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ReverseResolver for SystemResolver {
    async fn reverse_lookup(&self, addr: IpAddr) -> Option<String> {
        let lookup = match self.resolver.reverse_lookup(addr).await {
            Ok(lookup) => lookup,
            Err(e) => {
                tracing::debug!(%addr, "Reverse lookup failed: {}", e);
                return None;
            }
        };

        let name = lookup.iter().next()?;
        if !self.verify_forward_matches(name, addr).await {
            tracing::debug!(%addr, %name, "Reverse name does not resolve back to address");
            return None;
        }

        let name = name.to_ascii();
        let name = name.trim_end_matches('.');
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}
