//! Choice of the connection that serves invocations without a target.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::config::LoadBalancerKind;

/// Picks one of the active connections for `InvocationTarget::Any`.
///
/// The balancer only sees how many candidates there are; the connection
/// manager passes its active connections in a stable order.
pub trait LoadBalancer: Send + Sync {
    /// Returns the index of the candidate to use, or `None` if there are
    /// no candidates.
    fn next_index(&self, candidates: usize) -> Option<usize>;
}

impl std::fmt::Debug for dyn LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LoadBalancer")
    }
}

/// Hands out connections in turn.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    cursor: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    /// Creates a balancer starting at the first connection.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn next_index(&self, candidates: usize) -> Option<usize> {
        if candidates == 0 {
            return None;
        }
        Some(self.cursor.fetch_add(1, Ordering::Relaxed) % candidates)
    }
}

/// Picks a connection uniformly at random.
#[derive(Debug, Default)]
pub struct RandomLoadBalancer;

impl RandomLoadBalancer {
    /// Creates a random balancer.
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn next_index(&self, candidates: usize) -> Option<usize> {
        if candidates == 0 {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..candidates))
    }
}

/// Creates the load balancer configured by `kind`.
pub fn load_balancer_for(kind: LoadBalancerKind) -> Arc<dyn LoadBalancer> {
    match kind {
        LoadBalancerKind::RoundRobin => Arc::new(RoundRobinLoadBalancer::new()),
        LoadBalancerKind::Random => Arc::new(RandomLoadBalancer::new()),
    }
}
