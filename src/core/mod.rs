pub mod aggregator;
pub mod config;
pub mod metrics;
pub mod mqtt;
pub mod procfs;
pub mod provider;
pub mod publish;
pub mod scheduler;
pub mod snapshot;
pub mod store;

pub use aggregator::Aggregator;
pub use config::{AgentConfig, CliOverrides, LogFormat, MqttConfig};
pub use metrics::host_providers;
pub use mqtt::MqttSink;
pub use provider::{MetricProvider, ProviderError, Reading};
pub use publish::{FanoutSink, PublishError, PublishSink, WebhookSink};
pub use scheduler::{Scheduler, SchedulerError, SchedulerState, SchedulerStats};
pub use snapshot::{EncodeError, Section, SectionView, Snapshot};
pub use store::{SnapshotStore, StoreHandle, StoredSnapshot};
