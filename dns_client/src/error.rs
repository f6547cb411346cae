use thiserror::Error;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Failed to create DNS resolver: {0}")]
    ResolverSetup(#[from] trust_dns_resolver::error::ResolveError),
}
