//! Plugin processes, their RPC clients and the registry of loaded plugins.

mod available;
mod client;
mod execution;
mod jsonrpc;
mod launcher;
mod loaded;

pub use available::{AvailablePlugin, AvailablePluginInfo};
pub use client::{CollectorClient, PluginClient, PluginRpc, ProcessorClient, PublisherClient};
pub use execution::{HandshakeResponse, HandshakeState, PluginArgs, PluginProcess, start};
pub use jsonrpc::{JsonRpcClient, methods};
pub use launcher::{ExecLauncher, LaunchedPlugin, PluginLauncher};
pub use loaded::{LoadedPlugin, PluginRegistry, PluginStatus, RequestedPlugin, signature_path};
