//! Store Configuration
//!
//! A [`StoreConfig`] fixes the per-signal channel capacity and an optional
//! debug name for tracing output. Configurations are built with
//! [`StoreConfigBuilder`], which validates before producing a value.

use rill_core::StoreError;

/// Configuration for a [`Store`](crate::Store).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Buffer capacity of the broadcast channel backing every signal.
    ///
    /// Subscribers falling further behind than this many values are lagged:
    /// they skip to the oldest retained value and a warning is logged.
    pub channel_capacity: usize,
    /// Debug name included in tracing output.
    pub name: Option<String>,
}

impl StoreConfig {
    /// Default channel capacity.
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

    /// Start building a configuration.
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder {
            config: Self::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            channel_capacity: Self::DEFAULT_CHANNEL_CAPACITY,
            name: None,
        }
    }
}

/// Builder for [`StoreConfig`].
#[derive(Debug)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the per-signal channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the debug name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Validate and produce the configuration.
    ///
    /// # Errors
    ///
    /// Fails when the channel capacity is zero.
    pub fn build(self) -> Result<StoreConfig, StoreError> {
        if self.config.channel_capacity == 0 {
            return Err(StoreError::InvalidConfig {
                message: "channel_capacity must be greater than zero".into(),
            });
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(
            config.channel_capacity,
            StoreConfig::DEFAULT_CHANNEL_CAPACITY
        );
        assert!(config.name.is_none());
    }

    #[test]
    fn test_builder_validates_capacity() {
        let config = StoreConfig::builder()
            .with_channel_capacity(16)
            .with_name("test")
            .build()
            .unwrap();
        assert_eq!(config.channel_capacity, 16);
        assert_eq!(config.name.as_deref(), Some("test"));

        assert!(StoreConfig::builder()
            .with_channel_capacity(0)
            .build()
            .is_err());
    }
}
