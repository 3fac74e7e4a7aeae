//! Initialization data: where to listen or where to connect.

use crate::HostlinkError;

/// An immutable `(address, port)` pair.
///
/// Validated once, at construction, so every role can trust it afterwards.
/// Nothing is bound or dialed until `connect()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    address: String,
    port: u16,
}

impl InitData {
    /// Address used by [`InitData::default`].
    pub const DEFAULT_ADDRESS: &'static str = "127.0.0.1";
    /// Port used by [`InitData::default`].
    pub const DEFAULT_PORT: u16 = 8888;

    /// Creates initialization data.
    ///
    /// # Errors
    /// Returns [`HostlinkError::InvalidConfig`] if `address` is blank or
    /// `port` is zero.
    pub fn new(address: impl Into<String>, port: u16) -> Result<Self, HostlinkError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(HostlinkError::InvalidConfig(
                "address must not be empty".into(),
            ));
        }
        if port == 0 {
            return Err(HostlinkError::InvalidConfig(
                "port must be positive".into(),
            ));
        }
        Ok(Self { address, port })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Renders `"address:port"` for binding or dialing.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl Default for InitData {
    fn default() -> Self {
        Self {
            address: Self::DEFAULT_ADDRESS.to_string(),
            port: Self::DEFAULT_PORT,
        }
    }
}
