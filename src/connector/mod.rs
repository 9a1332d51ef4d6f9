/*!
The `connector` module matches a device's reported identity to the adapter
that speaks its protocol. Connectors are plain values in an explicit
[`Registry`] that callers pass into enumeration and initialization; there is
no global connector state.
!*/

mod elektron;
mod microbrute;

pub use elektron::{
    local_dst_path, remote_dst_path, ElektronConnector, FS_DATA, FS_SAMPLES, STORAGE_PLUS_DRIVE,
    STORAGE_RAM,
};
pub use microbrute::{MicroBrute, MicroBruteConnector, Param as MicroBruteParam};

use crate::backend::{Backend, MidiInfo};
use crate::Result;

/// A device-specific adapter. `handshake` fills in the backend's name,
/// version and description, installs its filesystem tables and device
/// capabilities, and may attach private state.
pub trait Connector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sub-device name prefixes this connector claims during enumeration.
    fn port_prefixes(&self) -> &'static [&'static str];

    /// True when the identity-inquiry reply belongs to this connector.
    fn matches(&self, info: &MidiInfo) -> bool;

    fn handshake(&self, backend: &mut Backend) -> Result<()>;
}

/// The set of connectors a host knows about.
pub struct Registry {
    connectors: Vec<Box<dyn Connector>>,
}

impl Registry {
    pub fn new(connectors: Vec<Box<dyn Connector>>) -> Self {
        Self { connectors }
    }

    /// The built-in connectors.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            Box::new(ElektronConnector),
            Box::new(MicroBruteConnector),
        ])
    }

    pub fn find(&self, info: &MidiInfo) -> Option<&dyn Connector> {
        self.connectors
            .iter()
            .find(|connector| connector.matches(info))
            .map(|connector| &**connector)
    }

    /// True when any registered connector claims a port with this sub-device
    /// name.
    pub fn claims_port(&self, name: &str) -> bool {
        self.connectors.iter().any(|connector| {
            connector
                .port_prefixes()
                .iter()
                .any(|prefix| name.starts_with(prefix))
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
