//! Meridian wire-protocol bindings.
//!
//! Re-exports the generated protobuf modules so the SDK and plugin clients
//! depend on a stable interface rather than on codegen output paths.

pub mod v1 {
    tonic::include_proto!("meridian.v1");
}

pub use v1::plugin_v1_client::PluginV1Client;
pub use v1::plugin_v1_server::{PluginV1, PluginV1Server};
