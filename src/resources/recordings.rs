use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::reconcilers::duration_parser;

pub static RECORDING_FINALIZER: &str = "operator.cryostat.io/recording.finalizer";

/// Label mirroring `spec.flightRecorder.name`, used to find the Recordings of a FlightRecorder
pub static FLIGHT_RECORDER_LABEL: &str = "operator.cryostat.io/flightrecorder";

/// Recording represents a flight recording on a single FlightRecorder
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "Recording",
    group = "operator.cryostat.io",
    version = "v1beta1",
    namespaced,
    printcolumn = r#"{"name":"Name", "type":"string", "jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Download URL", "priority": 1, "type":"string", "jsonPath":".status.downloadURL"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "RecordingStatus", shortname = "rec")]
#[serde(rename_all = "camelCase")]
pub struct RecordingSpec {
    /// Name of the recording to be created
    pub name: String,
    /// A list of event options to use when creating the recording.
    /// These are used to enable and fine-tune individual events.
    /// Examples: "jdk.ExecutionSample:enabled=true", "jdk.ExecutionSample:period=200ms"
    #[serde(default)]
    pub event_options: Vec<String>,
    /// The requested total duration of the recording, a zero value
    /// indicates a continuous recording. Examples: "30s", "5m", "1h30m"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Desired state of the recording. If omitted, RUNNING will be assumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RecordingState>,
    /// Whether this recording should be saved to persistent storage. If true, the JFR file will be retained until
    /// this object is deleted. If false, the JFR file will be deleted when its corresponding JVM exits.
    #[serde(default)]
    pub archive: bool,
    /// Reference to the FlightRecorder object that corresponds to this Recording
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_recorder: Option<FlightRecorderReference>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct FlightRecorderReference {
    /// Name of the FlightRecorder in the same namespace
    pub name: String,
}

impl RecordingSpec {
    /// The requested duration; zero for a continuous recording
    pub fn requested_duration(&self) -> Result<Duration, crate::Error> {
        match self.duration.as_deref() {
            None | Some("") => Ok(Duration::ZERO),
            Some(duration) => Ok(duration_parser::parse(duration)?),
        }
    }

    /// The name of the referenced FlightRecorder, if one is set
    pub fn flight_recorder_name(&self) -> Option<&str> {
        self.flight_recorder
            .as_ref()
            .map(|r| r.name.as_str())
            .filter(|name| !name.is_empty())
    }
}

/// The state of a flight recording, as reported by Cryostat
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Created => "CREATED",
            RecordingState::Running => "RUNNING",
            RecordingState::Stopping => "STOPPING",
            RecordingState::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordingState {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(RecordingState::Created),
            "RUNNING" => Ok(RecordingState::Running),
            "STOPPING" => Ok(RecordingState::Stopping),
            "STOPPED" => Ok(RecordingState::Stopped),
            other => Err(crate::Error::UnknownRecordingState(other.into())),
        }
    }
}

/// Status of the Recording.
/// Mirrors what Cryostat last reported for the recording.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    /// Current state of the recording
    pub state: Option<RecordingState>,
    /// The date/time when the recording started
    pub start_time: Option<Time>,
    /// The duration of the recording specified during creation
    pub duration: Option<String>,
    /// A URL to download the JFR file for the recording
    #[serde(rename = "downloadURL")]
    pub download_url: Option<String>,
    /// A URL to download the autogenerated HTML report for the recording
    #[serde(rename = "reportURL")]
    pub report_url: Option<String>,
}
