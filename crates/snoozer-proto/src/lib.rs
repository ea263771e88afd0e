pub mod conversion;

pub use conversion::*;

/// Version announced in the plugin handshake line.
pub const PLUGIN_PROTOCOL_VERSION: u32 = 1;

pub mod v1 {
    tonic::include_proto!("snoozer.v1");
}
