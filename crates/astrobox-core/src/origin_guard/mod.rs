//! Origin safety guard.
//!
//! Every caller-supplied URL passes through [`OriginGuard::validate`] before a
//! job is created or the extractor probes it. Symbolic hosts are resolved and
//! rejected if any record is private, so a DNS answer mixing public and
//! private addresses cannot be used to reach internal services.

mod ip;

pub use ip::{is_internal_hostname, is_private_ip, is_private_v4, is_private_v6};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::{Host, Url};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OriginError {
    #[error("Invalid URL.")]
    InvalidUrl,
    #[error("Only HTTP/HTTPS URLs are allowed.")]
    UnsupportedScheme,
    #[error("Invalid URL host.")]
    MissingHost,
    #[error("Local or internal hostnames are not allowed.")]
    InternalHostname,
    #[error("Private or loopback IP addresses are not allowed.")]
    PrivateAddress,
    #[error("Host resolves to private/internal address space.")]
    ResolvesToPrivate,
    #[error("Unable to resolve remote host.")]
    Unresolvable,
}

/// Name resolution seam; tests substitute fixed answers.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system (`getaddrinfo` through tokio).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

#[derive(Debug, Clone, Copy)]
struct Verdict {
    allowed: bool,
    expires_at: Instant,
}

pub struct OriginGuard {
    resolver: Arc<dyn HostResolver>,
    ttl: Duration,
    cache: Mutex<HashMap<String, Verdict>>,
}

impl OriginGuard {
    pub fn new(resolver: Arc<dyn HostResolver>, ttl: Duration) -> Self {
        Self {
            resolver,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Parse `raw` and verify it targets a public HTTP(S) origin.
    pub async fn validate(&self, raw: &str) -> Result<Url, OriginError> {
        let url = Url::parse(raw.trim()).map_err(|_| OriginError::InvalidUrl)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(OriginError::UnsupportedScheme);
        }

        let hostname = match url.host() {
            None => return Err(OriginError::MissingHost),
            Some(Host::Ipv4(v4)) => {
                return if is_private_v4(v4) {
                    Err(OriginError::PrivateAddress)
                } else {
                    Ok(url)
                };
            }
            Some(Host::Ipv6(v6)) => {
                return if is_private_v6(v6) {
                    Err(OriginError::PrivateAddress)
                } else {
                    Ok(url)
                };
            }
            Some(Host::Domain(d)) => d.trim_end_matches('.').to_ascii_lowercase(),
        };
        if hostname.is_empty() {
            return Err(OriginError::MissingHost);
        }
        if is_internal_hostname(&hostname) {
            return Err(OriginError::InternalHostname);
        }

        if let Some(allowed) = self.cached(&hostname) {
            return if allowed {
                Ok(url)
            } else {
                Err(OriginError::ResolvesToPrivate)
            };
        }

        let addrs = match self.resolver.resolve(&hostname).await {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::debug!(host = %hostname, error = %e, "origin resolution failed");
                return Err(OriginError::Unresolvable);
            }
        };
        if addrs.is_empty() {
            self.remember(&hostname, false);
            return Err(OriginError::Unresolvable);
        }

        let allowed = addrs.iter().all(|ip| !is_private_ip(*ip));
        self.remember(&hostname, allowed);
        if allowed {
            Ok(url)
        } else {
            tracing::warn!(host = %hostname, ?addrs, "rejected host resolving to private address");
            Err(OriginError::ResolvesToPrivate)
        }
    }

    fn cached(&self, host: &str) -> Option<bool> {
        let mut cache = self.cache.lock();
        match cache.get(host) {
            Some(v) if v.expires_at > Instant::now() => Some(v.allowed),
            Some(_) => {
                cache.remove(host);
                None
            }
            None => None,
        }
    }

    fn remember(&self, host: &str, allowed: bool) {
        self.cache.lock().insert(
            host.to_string(),
            Verdict {
                allowed,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver returning a fixed answer per host and counting lookups.
    #[derive(Default)]
    struct StaticResolver {
        answers: HashMap<String, Vec<IpAddr>>,
        lookups: AtomicUsize,
    }

    impl StaticResolver {
        fn with(mut self, host: &str, ips: &[&str]) -> Self {
            self.answers.insert(
                host.to_string(),
                ips.iter().map(|s| s.parse().unwrap()).collect(),
            );
            self
        }
    }

    #[async_trait]
    impl HostResolver for StaticResolver {
        async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.answers
                .get(host)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such host"))
        }
    }

    fn guard(resolver: StaticResolver) -> (OriginGuard, Arc<StaticResolver>) {
        let resolver = Arc::new(resolver);
        (
            OriginGuard::new(resolver.clone(), Duration::from_secs(300)),
            resolver,
        )
    }

    #[tokio::test]
    async fn rejects_schemes_and_internal_names() {
        let (g, _) = guard(StaticResolver::default());
        assert_eq!(g.validate("ftp://example.com/x").await, Err(OriginError::UnsupportedScheme));
        assert_eq!(g.validate("file:///etc/passwd").await, Err(OriginError::UnsupportedScheme));
        assert_eq!(g.validate("not a url").await, Err(OriginError::InvalidUrl));
        assert_eq!(g.validate("http://localhost:8080/").await, Err(OriginError::InternalHostname));
        assert_eq!(g.validate("https://nas.local/").await, Err(OriginError::InternalHostname));
    }

    #[tokio::test]
    async fn rejects_literal_private_ips() {
        let (g, resolver) = guard(StaticResolver::default());
        for url in [
            "http://127.0.0.1/",
            "http://10.1.2.3/",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/",
            "http://[::ffff:192.168.0.1]/",
            "http://0x7f000001/",
        ] {
            assert_eq!(g.validate(url).await, Err(OriginError::PrivateAddress), "{url}");
        }
        assert!(g.validate("http://93.184.216.34/").await.is_ok());
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_rebinding_answers_mixing_public_and_private() {
        let resolver = StaticResolver::default()
            .with("public.example", &["93.184.216.34"])
            .with("rebind.example", &["93.184.216.34", "10.0.0.5"])
            .with("empty.example", &[]);
        let (g, _) = guard(resolver);
        assert!(g.validate("https://public.example/watch?v=1").await.is_ok());
        assert_eq!(
            g.validate("https://rebind.example/").await,
            Err(OriginError::ResolvesToPrivate)
        );
        assert_eq!(g.validate("https://empty.example/").await, Err(OriginError::Unresolvable));
        assert_eq!(g.validate("https://missing.example/").await, Err(OriginError::Unresolvable));
    }

    #[tokio::test]
    async fn verdicts_are_cached_per_host() {
        let resolver = StaticResolver::default()
            .with("rebind.example", &["8.8.8.8", "192.168.1.10"])
            .with("ok.example", &["8.8.4.4"]);
        let (g, resolver) = guard(resolver);
        for _ in 0..3 {
            assert!(g.validate("https://rebind.example/a").await.is_err());
            assert!(g.validate("https://OK.example/b").await.is_ok());
        }
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_verdicts_resolve_again() {
        let resolver = Arc::new(StaticResolver::default().with("ok.example", &["8.8.4.4"]));
        let g = OriginGuard::new(resolver.clone(), Duration::from_millis(10));
        assert!(g.validate("https://ok.example/").await.is_ok());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(g.validate("https://ok.example/").await.is_ok());
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 2);
    }
}
