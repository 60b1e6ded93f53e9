//! Service discovery.
//!
//! Workers hold a lease under a logical service name and renew it by
//! registering again. Expired leases are invisible to `resolve` and are
//! pruned in the background.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Name judging workers register under
pub const JUDGE_SERVICE: &str = "judge-worker";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    /// `host:port` the instance serves on
    pub address: String,
}

#[derive(Debug)]
struct Lease {
    address: String,
    expires_at: Instant,
}

/// In-memory lease table
pub struct Registry {
    ttl: Duration,
    services: RwLock<HashMap<String, HashMap<String, Lease>>>,
}

impl Registry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `instance`, or renews its lease if already present
    pub fn register(&self, service: &str, instance: Instance) {
        let lease = Lease {
            address: instance.address,
            expires_at: Instant::now() + self.ttl,
        };
        let renewed = self
            .services
            .write()
            .entry(service.to_string())
            .or_default()
            .insert(instance.id.clone(), lease)
            .is_some();
        if !renewed {
            log::info!("Registered {} under {service}", instance.id);
        }
    }

    pub fn deregister(&self, service: &str, id: &str) -> bool {
        let removed = self
            .services
            .write()
            .get_mut(service)
            .and_then(|instances| instances.remove(id))
            .is_some();
        if removed {
            log::info!("Deregistered {id} from {service}");
        }
        removed
    }

    /// Instances of `service` whose lease has not expired, ordered by id
    pub fn live(&self, service: &str) -> Vec<Instance> {
        let now = Instant::now();
        let services = self.services.read();
        let mut instances: Vec<Instance> = services
            .get(service)
            .into_iter()
            .flat_map(|instances| instances.iter())
            .filter(|(_, lease)| lease.expires_at > now)
            .map(|(id, lease)| Instance {
                id: id.clone(),
                address: lease.address.clone(),
            })
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        instances
    }

    /// Drops expired leases and returns how many were dropped
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut services = self.services.write();
        let mut pruned = 0;
        for (service, instances) in services.iter_mut() {
            instances.retain(|id, lease| {
                let alive = lease.expires_at > now;
                if !alive {
                    log::info!("Lease of {id} under {service} expired");
                    pruned += 1;
                }
                alive
            });
        }
        services.retain(|_, instances| !instances.is_empty());
        pruned
    }
}

/// Periodically prunes `registry` until `token` is cancelled
pub async fn prune_expired(registry: Arc<Registry>, period: Duration, token: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                let pruned = registry.prune();
                if pruned > 0 {
                    log::debug!("Pruned {pruned} expired leases");
                }
            }
        }
    }
}

/// Resolves a logical service name to the addresses of live instances
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn resolve(&self, service: &str) -> Result<Vec<String>>;
}

/// A fixed set of addresses, regardless of the service asked for
pub struct StaticDiscovery(pub Vec<String>);

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn resolve(&self, _service: &str) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// HTTP client of a registry server
#[derive(Clone)]
pub struct RegistryClient {
    base: String,
    client: reqwest::Client,
}

impl RegistryClient {
    pub fn new(address: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build registry client")?;
        Ok(Self {
            base: format!("http://{address}/registry"),
            client,
        })
    }

    pub async fn register(&self, service: &str, instance: &Instance) -> Result<()> {
        self.client
            .put(format!("{}/{service}", self.base))
            .json(instance)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("failed to register {} under {service}", instance.id))?;
        Ok(())
    }

    pub async fn deregister(&self, service: &str, id: &str) -> Result<()> {
        self.client
            .delete(format!("{}/{service}/{id}", self.base))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("failed to deregister {id} from {service}"))?;
        Ok(())
    }
}

#[async_trait]
impl Discovery for RegistryClient {
    async fn resolve(&self, service: &str) -> Result<Vec<String>> {
        let instances: Vec<Instance> = self
            .client
            .get(format!("{}/{service}", self.base))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("failed to resolve {service}"))?
            .json()
            .await?;
        Ok(instances.into_iter().map(|i| i.address).collect())
    }
}
