/// edgebeat: edge host telemetry agent
///
/// Samples host metrics on a fixed period, keeps the latest snapshot in
/// memory for HTTP readers and optionally pushes each snapshot over MQTT
/// or to a webhook.

pub mod cli;
pub mod core;
pub mod server;
pub mod utils;
