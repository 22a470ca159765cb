use std::future::Future;
use std::io;
use std::net::SocketAddr;

/// Host name resolution, invoked once per run.
///
/// # Implementations
///
/// - [`TokioResolver`]: system resolver through `tokio::net::lookup_host`
/// - [`StaticResolver`]: fixed address list, for tests and pinned targets
pub trait Resolver: Send + Sync {
    /// Resolve `host` to the socket addresses of `port`, in preference order.
    fn resolve(&self, host: &str, port: u16) -> impl Future<Output = io::Result<Vec<SocketAddr>>> + Send;
}

/// System resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioResolver;

impl Resolver for TokioResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// Resolver that always answers with the same addresses.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    addrs: Vec<SocketAddr>,
}

impl StaticResolver {
    pub fn new(addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            addrs: addrs.into_iter().collect(),
        }
    }
}

impl Resolver for StaticResolver {
    async fn resolve(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> { Ok(self.addrs.clone()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_resolver_handles_literal_addresses() {
        let addrs = TokioResolver.resolve("127.0.0.1", 8080).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8080".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_static_resolver_ignores_the_query() {
        let addr: SocketAddr = "10.0.0.1:80".parse().unwrap();
        let resolver = StaticResolver::new([addr]);
        assert_eq!(resolver.resolve("example.com", 443).await.unwrap(), vec![addr]);
    }
}
