use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::reconcilers::targets::TargetAddress;
use crate::resources::cryostats::Cryostat;
use crate::resources::flightrecorders::{EventInfo, JMXAuthSecret, TemplateInfo};
use crate::Result;

mod api;
mod factory;

#[cfg(test)]
pub mod fake;

pub use api::CryostatClient;
pub use factory::DefaultClientFactory;

/// A recording held in memory by a target JVM, as listed by Cryostat
#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingDescriptor {
    pub name: String,
    pub state: String,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub start_time: i64,
    /// Milliseconds, zero for continuous recordings
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub report_url: String,
}

/// A recording archived to Cryostat's storage
#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SavedRecording {
    pub name: String,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub report_url: String,
}

/// Operations on flight recordings, executed by Cryostat on our behalf
#[async_trait]
pub trait RecordingClient: Send + Sync {
    /// Starts a continuous recording
    async fn start_recording(
        &self,
        target: &TargetAddress,
        name: &str,
        event_options: &[String],
    ) -> Result<()>;

    /// Starts a recording that stops by itself after `seconds`
    async fn dump_recording(
        &self,
        target: &TargetAddress,
        name: &str,
        seconds: u64,
        event_options: &[String],
    ) -> Result<()>;

    async fn stop_recording(&self, target: &TargetAddress, name: &str) -> Result<()>;

    async fn list_recordings(&self, target: &TargetAddress) -> Result<Vec<RecordingDescriptor>>;

    /// Archives a recording, returning the filename it was saved under
    async fn save_recording(&self, target: &TargetAddress, name: &str) -> Result<String>;

    async fn list_saved_recordings(&self) -> Result<Vec<SavedRecording>>;

    async fn delete_recording(&self, target: &TargetAddress, name: &str) -> Result<()>;

    async fn delete_saved_recording(&self, filename: &str) -> Result<()>;

    async fn list_event_types(&self, target: &TargetAddress) -> Result<Vec<EventInfo>>;

    async fn list_templates(&self, target: &TargetAddress) -> Result<Vec<TemplateInfo>>;
}

/// Builds clients talking to a particular Cryostat instance.
///
/// Fails with [`crate::Error::CertNotReady`] while the instance's certificates are still being issued.
#[async_trait]
pub trait RecordingClientFactory: Send + Sync {
    async fn client_for(
        &self,
        cryostat: &Cryostat,
        jmx_credentials: Option<&JMXAuthSecret>,
    ) -> Result<Arc<dyn RecordingClient>>;
}
