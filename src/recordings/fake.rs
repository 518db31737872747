//! In-memory stand-in for Cryostat, used by reconcile tests

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{RecordingClient, RecordingClientFactory, RecordingDescriptor, SavedRecording};
use crate::reconcilers::certificates::ca_certificate_name;
use crate::reconcilers::targets::TargetAddress;
use crate::resources::cryostats::Cryostat;
use crate::resources::flightrecorders::{
    EventInfo, JMXAuthSecret, OptionDescriptor, TemplateInfo,
};
use crate::{Error, Result};

pub const BASE_URL: &str = "https://cryostat-sample.default.svc:8181";
pub const START_TIME: i64 = 1_600_000_000_000;

#[derive(Default)]
struct State {
    recordings: Vec<RecordingDescriptor>,
    saved: Vec<SavedRecording>,
    calls: Vec<String>,
    failing: HashSet<&'static str>,
}

#[derive(Default)]
pub struct FakeRecordingClient {
    state: Mutex<State>,
}

/// A genuine reqwest error, for simulating failed calls
fn call_failed() -> Error {
    match reqwest::Client::new().get("not a url").build() {
        Err(e) => Error::RecordingCallFailed(e),
        Ok(_) => unreachable!("an invalid url builds a request"),
    }
}

impl FakeRecordingClient {
    pub fn with_recording(self, name: &str, state: &str) -> Self {
        self.state.lock().unwrap().recordings.push(RecordingDescriptor {
            name: name.into(),
            state: state.into(),
            start_time: START_TIME,
            duration: 0,
            download_url: format!("{BASE_URL}/api/v1/targets/target/recordings/{name}"),
            report_url: format!("{BASE_URL}/api/v1/targets/target/reports/{name}"),
        });
        self
    }

    pub fn with_saved(self, filename: &str) -> Self {
        self.state.lock().unwrap().saved.push(saved(filename));
        self
    }

    /// Makes every call of the named operation fail
    pub fn failing(self, operation: &'static str) -> Self {
        self.state.lock().unwrap().failing.insert(operation);
        self
    }

    /// Overrides the state Cryostat reports for a recording
    pub fn set_state(&self, name: &str, state: &str) {
        let mut s = self.state.lock().unwrap();
        if let Some(r) = s.recordings.iter_mut().find(|r| r.name == name) {
            r.state = state.into();
        }
    }

    pub fn remove_recording(&self, name: &str) {
        self.state.lock().unwrap().recordings.retain(|r| r.name != name);
    }

    /// Every call made so far, as `"<operation> <argument>"`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn saved(&self) -> Vec<SavedRecording> {
        self.state.lock().unwrap().saved.clone()
    }

    pub fn recordings(&self) -> Vec<RecordingDescriptor> {
        self.state.lock().unwrap().recordings.clone()
    }

    fn record(&self, operation: &'static str, argument: &str) -> Result<MutexGuard<'_, State>> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("{operation} {argument}").trim_end().to_string());
        if s.failing.contains(operation) {
            return Err(call_failed());
        }
        Ok(s)
    }
}

fn saved(filename: &str) -> SavedRecording {
    SavedRecording {
        name: filename.into(),
        download_url: format!("{BASE_URL}/api/v1/recordings/{filename}"),
        report_url: format!("{BASE_URL}/api/v1/reports/{filename}"),
    }
}

#[async_trait]
impl RecordingClient for FakeRecordingClient {
    async fn start_recording(
        &self,
        target: &TargetAddress,
        name: &str,
        _event_options: &[String],
    ) -> Result<()> {
        let mut s = self.record("start", name)?;
        s.recordings.push(RecordingDescriptor {
            name: name.into(),
            state: "RUNNING".into(),
            start_time: START_TIME,
            duration: 0,
            download_url: format!("{BASE_URL}/api/v1/targets/{target}/recordings/{name}"),
            report_url: format!("{BASE_URL}/api/v1/targets/{target}/reports/{name}"),
        });
        Ok(())
    }

    async fn dump_recording(
        &self,
        target: &TargetAddress,
        name: &str,
        seconds: u64,
        _event_options: &[String],
    ) -> Result<()> {
        let mut s = self.record("dump", name)?;
        s.recordings.push(RecordingDescriptor {
            name: name.into(),
            state: "RUNNING".into(),
            start_time: START_TIME,
            duration: (seconds * 1000) as i64,
            download_url: format!("{BASE_URL}/api/v1/targets/{target}/recordings/{name}"),
            report_url: format!("{BASE_URL}/api/v1/targets/{target}/reports/{name}"),
        });
        Ok(())
    }

    async fn stop_recording(&self, _target: &TargetAddress, name: &str) -> Result<()> {
        let mut s = self.record("stop", name)?;
        match s.recordings.iter_mut().find(|r| r.name == name) {
            Some(r) => {
                r.state = "STOPPED".into();
                Ok(())
            }
            None => Err(call_failed()),
        }
    }

    async fn list_recordings(&self, _target: &TargetAddress) -> Result<Vec<RecordingDescriptor>> {
        let s = self.record("list", "")?;
        Ok(s.recordings.clone())
    }

    async fn save_recording(&self, _target: &TargetAddress, name: &str) -> Result<String> {
        let mut s = self.record("save", name)?;
        let filename = format!("target_{name}_20200913T121500Z.jfr");
        s.saved.push(saved(&filename));
        Ok(filename)
    }

    async fn list_saved_recordings(&self) -> Result<Vec<SavedRecording>> {
        let s = self.record("list-saved", "")?;
        Ok(s.saved.clone())
    }

    async fn delete_recording(&self, _target: &TargetAddress, name: &str) -> Result<()> {
        let mut s = self.record("delete", name)?;
        let before = s.recordings.len();
        s.recordings.retain(|r| r.name != name);
        if s.recordings.len() == before {
            return Err(call_failed());
        }
        Ok(())
    }

    async fn delete_saved_recording(&self, filename: &str) -> Result<()> {
        let mut s = self.record("delete-saved", filename)?;
        let before = s.saved.len();
        s.saved.retain(|r| r.name != filename);
        if s.saved.len() == before {
            return Err(call_failed());
        }
        Ok(())
    }

    async fn list_event_types(&self, _target: &TargetAddress) -> Result<Vec<EventInfo>> {
        self.record("list-events", "")?;
        Ok(vec![EventInfo {
            type_id: "jdk.ExecutionSample".into(),
            name: "Method Profiling Sample".into(),
            description: "Snapshot of a threads state".into(),
            category: vec!["Java Virtual Machine".into(), "Profiling".into()],
            options: BTreeMap::from([(
                "period".into(),
                OptionDescriptor {
                    name: "Period".into(),
                    description: "Record event at interval".into(),
                    default_value: "20 ms".into(),
                },
            )]),
        }])
    }

    async fn list_templates(&self, _target: &TargetAddress) -> Result<Vec<TemplateInfo>> {
        self.record("list-templates", "")?;
        Ok(vec![TemplateInfo {
            name: "Profiling".into(),
            description: "Low overhead configuration for profiling".into(),
            provider: "Oracle".into(),
            r#type: "TARGET".into(),
        }])
    }
}

/// Hands out a shared [`FakeRecordingClient`], optionally pretending certificates are not issued yet
pub struct FakeClientFactory {
    pub client: Arc<FakeRecordingClient>,
    pub cert_ready: bool,
}

impl FakeClientFactory {
    pub fn new(client: FakeRecordingClient) -> Self {
        Self {
            client: Arc::new(client),
            cert_ready: true,
        }
    }

    pub fn cert_not_ready() -> Self {
        Self {
            client: Arc::new(FakeRecordingClient::default()),
            cert_ready: false,
        }
    }
}

#[async_trait]
impl RecordingClientFactory for FakeClientFactory {
    async fn client_for(
        &self,
        cryostat: &Cryostat,
        _jmx_credentials: Option<&JMXAuthSecret>,
    ) -> Result<Arc<dyn RecordingClient>> {
        if !self.cert_ready {
            return Err(Error::CertNotReady(ca_certificate_name(
                cryostat.metadata.name.as_deref().unwrap_or_default(),
            )));
        }
        Ok(self.client.clone())
    }
}
