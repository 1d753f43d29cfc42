//! Client builder pattern for client construction
//!
//! Provides a fluent interface for configuring the lifecycle before creation.

use simlink_transport_traits::{DataPeriod, MessageSource};

use super::config::ClientConfig;
use super::core::SimClient;
use crate::custom_events::CustomEventAllocator;
use crate::error::Result;
use crate::logging::LoggingConfig;

/// Builder for configuring and creating clients
///
/// # Examples
///
/// ```rust,no_run
/// use simlink_client::ClientBuilder;
/// use simlink_transport_traits::{ChannelSource, DataPeriod};
///
/// # fn example() -> simlink_client::Result<()> {
/// let (source, _feed) = ChannelSource::new();
/// let client = ClientBuilder::new()
///     .with_client_name("cockpit")
///     .with_connection_timeout(3_000)
///     .with_max_retries(5)
///     .with_poll_period(DataPeriod::SimFrame)
///     .build(source)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    custom_event_range: Option<(u32, u32)>,
}

impl ClientBuilder {
    /// Create a new client builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration, for example one loaded from a file.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Name announced to the simulator
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = name.into();
        self
    }

    // ============================================================================
    // TIMING
    // ============================================================================

    /// Timeout for a single connect attempt
    ///
    /// # Arguments
    ///
    /// * `timeout_ms` - Timeout in milliseconds
    pub fn with_connection_timeout(mut self, timeout_ms: u64) -> Self {
        self.config.connection_timeout_ms = timeout_ms;
        self
    }

    /// Delay between failed connect attempts, in milliseconds
    pub fn with_retry_interval(mut self, interval_ms: u64) -> Self {
        self.config.retry_interval_ms = interval_ms;
        self
    }

    /// Delay before reconnecting after a session ended, in milliseconds
    pub fn with_reconnect_delay(mut self, delay_ms: u64) -> Self {
        self.config.reconnect_delay_ms = delay_ms;
        self
    }

    /// How long shutdown waits for subscriptions, in milliseconds
    pub fn with_shutdown_timeout(mut self, timeout_ms: u64) -> Self {
        self.config.shutdown_timeout_ms = timeout_ms;
        self
    }

    // ============================================================================
    // RETRY AND DELIVERY
    // ============================================================================

    /// Failed connect attempts tolerated per connect cycle
    ///
    /// # Arguments
    ///
    /// * `max_retries` - Maximum failures before giving up, 0 for unlimited
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Reconnect after the simulator closes the stream
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Default subscription queue capacity
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Cadence of the polled simulator state
    pub fn with_poll_period(mut self, period: DataPeriod) -> Self {
        self.config.poll_period = period;
        self
    }

    /// Logging setup stored in the configuration
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Id range for custom events, `start..=end`
    ///
    /// The range must lie above the internal event ids for events to be
    /// routed to custom event handlers.
    pub fn with_custom_event_range(mut self, start: u32, end: u32) -> Self {
        self.custom_event_range = Some((start, end));
        self
    }

    /// Build a client over `source`
    ///
    /// The client is not started; call [`SimClient::start`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`](crate::ClientError::Config) if the
    /// configuration fails validation.
    pub fn build<S: MessageSource + 'static>(self, source: S) -> Result<SimClient<S>> {
        let custom_events = match self.custom_event_range {
            Some((start, end)) => CustomEventAllocator::with_range(start, end),
            None => CustomEventAllocator::new(),
        };
        SimClient::with_allocator(source, self.config, custom_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientError;
    use simlink_transport_traits::ChannelSource;

    #[test]
    fn test_builder_applies_settings() {
        let (source, _feed) = ChannelSource::new();
        let client = ClientBuilder::new()
            .with_client_name("cockpit")
            .with_max_retries(3)
            .with_auto_reconnect(false)
            .with_buffer_size(8)
            .with_poll_period(DataPeriod::SimFrame)
            .build(source)
            .unwrap();

        let config = client.config();
        assert_eq!(config.client_name, "cockpit");
        assert_eq!(config.max_retries, 3);
        assert!(!config.auto_reconnect);
        assert_eq!(config.buffer_size, 8);
        assert_eq!(config.poll_period, DataPeriod::SimFrame);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let (source, _feed) = ChannelSource::new();
        let result = ClientBuilder::new().with_buffer_size(0).build(source);
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_custom_event_range() {
        let (source, _feed) = ChannelSource::new();
        let client = ClientBuilder::new()
            .with_custom_event_range(1_000_005_000, 1_000_005_001)
            .build(source)
            .unwrap();
        assert_eq!(client.custom_events().remaining(), 2);
    }
}
