//! Client configuration types and builders.

use std::net::SocketAddr;
use std::time::Duration;

use hazelcast_core::protocol::DEFAULT_MAX_FRAME_SET_SIZE;
use hazelcast_core::HazelcastError;

/// Default cluster name.
const DEFAULT_CLUSTER_NAME: &str = "dev";
/// Default member port.
const DEFAULT_PORT: u16 = 5701;
/// Default connection timeout.
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
/// Default heartbeat interval.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Default heartbeat timeout.
const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default size of the per-connection read staging buffer.
const DEFAULT_STAGING_BUFFER_SIZE: usize = 128 * 1024;
/// Smallest accepted staging buffer.
const MIN_STAGING_BUFFER_SIZE: usize = 1024;
/// Default initial retry backoff.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Default maximum retry backoff.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Default retry multiplier.
const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
/// Default retry jitter.
const DEFAULT_RETRY_JITTER: f64 = 0.2;
/// Default maximum retry attempts.
const DEFAULT_MAX_RETRIES: u32 = 10;
/// Default invocation timeout.
const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(120);
/// Default capacity of the per-connection outgoing queue.
const DEFAULT_OUTGOING_QUEUE_CAPACITY: usize = 1024;
/// Smallest frame-set size that still fits a fragment header and a request header.
const MIN_FRAME_SET_SIZE: usize = 64;

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
}

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for HazelcastError {
    fn from(err: ConfigError) -> Self {
        HazelcastError::Configuration(err.message)
    }
}

/// Network configuration for cluster connections.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    addresses: Vec<SocketAddr>,
    connection_timeout: Duration,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    smart_routing: bool,
    reconnect: bool,
    staging_buffer_size: usize,
}

impl NetworkConfig {
    /// Returns the configured cluster member addresses.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// Returns the connection timeout duration.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Returns how long a connection may stay idle before it is pinged.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Returns how long a connection may go without reads before it is
    /// closed.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Returns true if partition- and member-targeted invocations go to the
    /// owning member rather than to any connection.
    pub fn smart_routing(&self) -> bool {
        self.smart_routing
    }

    /// Returns true if the client reconnects after losing its last
    /// connection.
    pub fn reconnect(&self) -> bool {
        self.reconnect
    }

    /// Returns the size of the per-connection read staging buffer.
    pub fn staging_buffer_size(&self) -> usize {
        self.staging_buffer_size
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            addresses: vec![default_address()],
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            smart_routing: true,
            reconnect: true,
            staging_buffer_size: DEFAULT_STAGING_BUFFER_SIZE,
        }
    }
}

/// Builder for `NetworkConfig`.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfigBuilder {
    addresses: Vec<SocketAddr>,
    connection_timeout: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    heartbeat_timeout: Option<Duration>,
    smart_routing: Option<bool>,
    reconnect: Option<bool>,
    staging_buffer_size: Option<usize>,
}

impl NetworkConfigBuilder {
    /// Creates a new network configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cluster member address.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.addresses.push(address);
        self
    }

    /// Sets the cluster member addresses, replacing any previously configured.
    pub fn addresses(mut self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.addresses = addresses.into_iter().collect();
        self
    }

    /// Sets the connection timeout duration.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the heartbeat interval duration.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Sets the heartbeat timeout duration.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    /// Enables or disables smart routing.
    pub fn smart_routing(mut self, enabled: bool) -> Self {
        self.smart_routing = Some(enabled);
        self
    }

    /// Enables or disables reconnecting after the last connection is lost.
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.reconnect = Some(enabled);
        self
    }

    /// Sets the size of the per-connection read staging buffer.
    pub fn staging_buffer_size(mut self, size: usize) -> Self {
        self.staging_buffer_size = Some(size);
        self
    }

    /// Builds the network configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `heartbeat_interval` is not shorter than `heartbeat_timeout`
    /// - `staging_buffer_size` is below 1 KiB
    pub fn build(self) -> Result<NetworkConfig, ConfigError> {
        let addresses = if self.addresses.is_empty() {
            vec![default_address()]
        } else {
            self.addresses
        };

        let heartbeat_interval = self.heartbeat_interval.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        let heartbeat_timeout = self.heartbeat_timeout.unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT);
        if heartbeat_interval >= heartbeat_timeout {
            return Err(ConfigError::new(
                "heartbeat_interval must be shorter than heartbeat_timeout",
            ));
        }

        let staging_buffer_size = self
            .staging_buffer_size
            .unwrap_or(DEFAULT_STAGING_BUFFER_SIZE);
        if staging_buffer_size < MIN_STAGING_BUFFER_SIZE {
            return Err(ConfigError::new(format!(
                "staging_buffer_size must be at least {} bytes",
                MIN_STAGING_BUFFER_SIZE
            )));
        }

        Ok(NetworkConfig {
            addresses,
            connection_timeout: self.connection_timeout.unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
            heartbeat_interval,
            heartbeat_timeout,
            smart_routing: self.smart_routing.unwrap_or(true),
            reconnect: self.reconnect.unwrap_or(true),
            staging_buffer_size,
        })
    }
}

/// Backoff configuration, used between invocation retries and connection
/// attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
    max_retries: u32,
}

impl RetryConfig {
    /// Returns the initial backoff duration.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the maximum backoff duration.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Returns the backoff multiplier.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the jitter factor applied to each backoff (0.0 to 1.0).
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Returns the maximum number of connection attempts per address.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            jitter: DEFAULT_RETRY_JITTER,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl From<RetryConfig> for RetryConfigBuilder {
    fn from(config: RetryConfig) -> Self {
        Self {
            initial_backoff: Some(config.initial_backoff),
            max_backoff: Some(config.max_backoff),
            multiplier: Some(config.multiplier),
            jitter: Some(config.jitter),
            max_retries: Some(config.max_retries),
        }
    }
}

/// Builder for `RetryConfig`.
#[derive(Debug, Clone, Default)]
pub struct RetryConfigBuilder {
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
    max_retries: Option<u32>,
}

impl RetryConfigBuilder {
    /// Creates a new retry configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial backoff duration.
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the maximum backoff duration.
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Sets the backoff multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Sets the jitter factor.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Sets the maximum number of connection attempts per address.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Builds the retry configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `initial_backoff` exceeds `max_backoff`
    /// - `multiplier` is less than 1.0
    /// - `jitter` is outside 0.0..=1.0
    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        let initial_backoff = self.initial_backoff.unwrap_or(DEFAULT_INITIAL_BACKOFF);
        let max_backoff = self.max_backoff.unwrap_or(DEFAULT_MAX_BACKOFF);
        let multiplier = self.multiplier.unwrap_or(DEFAULT_RETRY_MULTIPLIER);
        let jitter = self.jitter.unwrap_or(DEFAULT_RETRY_JITTER);
        let max_retries = self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);

        if initial_backoff > max_backoff {
            return Err(ConfigError::new(
                "initial_backoff must not exceed max_backoff",
            ));
        }

        if multiplier < 1.0 {
            return Err(ConfigError::new("multiplier must be at least 1.0"));
        }

        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::new("jitter must be between 0.0 and 1.0"));
        }

        Ok(RetryConfig {
            initial_backoff,
            max_backoff,
            multiplier,
            jitter,
            max_retries,
        })
    }
}

/// Invocation behaviour.
#[derive(Debug, Clone)]
pub struct InvocationConfig {
    invocation_timeout: Duration,
    redo_operation: bool,
}

impl InvocationConfig {
    /// Returns the deadline applied to every invocation, retries included.
    pub fn invocation_timeout(&self) -> Duration {
        self.invocation_timeout
    }

    /// Returns true if non-retryable operations are re-sent after transient
    /// failures too.
    pub fn redo_operation(&self) -> bool {
        self.redo_operation
    }
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
            redo_operation: false,
        }
    }
}

/// Builder for `InvocationConfig`.
#[derive(Debug, Clone, Default)]
pub struct InvocationConfigBuilder {
    invocation_timeout: Option<Duration>,
    redo_operation: Option<bool>,
}

impl InvocationConfigBuilder {
    /// Creates a new invocation configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the invocation timeout.
    pub fn invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = Some(timeout);
        self
    }

    /// Enables or disables re-sending of non-retryable operations.
    pub fn redo_operation(mut self, redo: bool) -> Self {
        self.redo_operation = Some(redo);
        self
    }

    /// Builds the invocation configuration.
    pub fn build(self) -> Result<InvocationConfig, ConfigError> {
        let invocation_timeout = self
            .invocation_timeout
            .unwrap_or(DEFAULT_INVOCATION_TIMEOUT);
        if invocation_timeout.is_zero() {
            return Err(ConfigError::new("invocation_timeout must be positive"));
        }

        Ok(InvocationConfig {
            invocation_timeout,
            redo_operation: self.redo_operation.unwrap_or(false),
        })
    }
}

/// Message transport settings.
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    max_frame_set_size: usize,
    outgoing_queue_capacity: usize,
}

impl MessagingConfig {
    /// Returns the size above which outgoing messages are fragmented.
    pub fn max_frame_set_size(&self) -> usize {
        self.max_frame_set_size
    }

    /// Returns the number of encoded messages that may wait for the socket.
    pub fn outgoing_queue_capacity(&self) -> usize {
        self.outgoing_queue_capacity
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_frame_set_size: DEFAULT_MAX_FRAME_SET_SIZE,
            outgoing_queue_capacity: DEFAULT_OUTGOING_QUEUE_CAPACITY,
        }
    }
}

/// Builder for `MessagingConfig`.
#[derive(Debug, Clone, Default)]
pub struct MessagingConfigBuilder {
    max_frame_set_size: Option<usize>,
    outgoing_queue_capacity: Option<usize>,
}

impl MessagingConfigBuilder {
    /// Creates a new messaging configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fragmentation threshold.
    pub fn max_frame_set_size(mut self, size: usize) -> Self {
        self.max_frame_set_size = Some(size);
        self
    }

    /// Sets the outgoing queue capacity.
    pub fn outgoing_queue_capacity(mut self, capacity: usize) -> Self {
        self.outgoing_queue_capacity = Some(capacity);
        self
    }

    /// Builds the messaging configuration.
    pub fn build(self) -> Result<MessagingConfig, ConfigError> {
        let max_frame_set_size = self
            .max_frame_set_size
            .unwrap_or(DEFAULT_MAX_FRAME_SET_SIZE);
        if max_frame_set_size < MIN_FRAME_SET_SIZE {
            return Err(ConfigError::new(format!(
                "max_frame_set_size must be at least {} bytes",
                MIN_FRAME_SET_SIZE
            )));
        }

        let outgoing_queue_capacity = self
            .outgoing_queue_capacity
            .unwrap_or(DEFAULT_OUTGOING_QUEUE_CAPACITY);
        if outgoing_queue_capacity == 0 {
            return Err(ConfigError::new("outgoing_queue_capacity must be positive"));
        }

        Ok(MessagingConfig {
            max_frame_set_size,
            outgoing_queue_capacity,
        })
    }
}

/// Member selection strategy for invocations without a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancerKind {
    /// Cycle through connected members.
    #[default]
    RoundRobin,
    /// Pick a connected member at random.
    Random,
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    cluster_name: String,
    network: NetworkConfig,
    retry: RetryConfig,
    invocation: InvocationConfig,
    messaging: MessagingConfig,
    load_balancer: LoadBalancerKind,
}

impl ClientConfig {
    /// Creates a new client configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the cluster name.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Returns the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Returns the retry configuration.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the invocation configuration.
    pub fn invocation(&self) -> &InvocationConfig {
        &self.invocation
    }

    /// Returns the messaging configuration.
    pub fn messaging(&self) -> &MessagingConfig {
        &self.messaging
    }

    /// Returns the load balancing strategy.
    pub fn load_balancer(&self) -> LoadBalancerKind {
        self.load_balancer
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            network: NetworkConfig::default(),
            retry: RetryConfig::default(),
            invocation: InvocationConfig::default(),
            messaging: MessagingConfig::default(),
            load_balancer: LoadBalancerKind::default(),
        }
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    cluster_name: Option<String>,
    network: NetworkConfigBuilder,
    retry: RetryConfigBuilder,
    invocation: InvocationConfigBuilder,
    messaging: MessagingConfigBuilder,
    load_balancer: Option<LoadBalancerKind>,
}

impl ClientConfigBuilder {
    /// Creates a new client configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cluster name.
    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = Some(name.into());
        self
    }

    /// Configures network settings using a builder function.
    pub fn network<F>(mut self, f: F) -> Self
    where
        F: FnOnce(NetworkConfigBuilder) -> NetworkConfigBuilder,
    {
        self.network = f(self.network);
        self
    }

    /// Configures retry settings using a builder function.
    pub fn retry<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RetryConfigBuilder) -> RetryConfigBuilder,
    {
        self.retry = f(self.retry);
        self
    }

    /// Configures invocation settings using a builder function.
    pub fn invocation<F>(mut self, f: F) -> Self
    where
        F: FnOnce(InvocationConfigBuilder) -> InvocationConfigBuilder,
    {
        self.invocation = f(self.invocation);
        self
    }

    /// Configures messaging settings using a builder function.
    pub fn messaging<F>(mut self, f: F) -> Self
    where
        F: FnOnce(MessagingConfigBuilder) -> MessagingConfigBuilder,
    {
        self.messaging = f(self.messaging);
        self
    }

    /// Sets the load balancing strategy.
    pub fn load_balancer(mut self, kind: LoadBalancerKind) -> Self {
        self.load_balancer = Some(kind);
        self
    }

    /// Adds a cluster member address.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.network = self.network.add_address(address);
        self
    }

    /// Sets the cluster member addresses.
    pub fn addresses(mut self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.network = self.network.addresses(addresses);
        self
    }

    /// Sets the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.connection_timeout(timeout);
        self
    }

    /// Sets the invocation timeout.
    pub fn invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation = self.invocation.invocation_timeout(timeout);
        self
    }

    /// Builds the client configuration, returning an error if validation fails.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let cluster_name = self
            .cluster_name
            .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string());

        if cluster_name.is_empty() {
            return Err(ConfigError::new("cluster_name must not be empty"));
        }

        Ok(ClientConfig {
            cluster_name,
            network: self.network.build()?,
            retry: self.retry.build()?,
            invocation: self.invocation.build()?,
            messaging: self.messaging.build()?,
            load_balancer: self.load_balancer.unwrap_or_default(),
        })
    }
}
