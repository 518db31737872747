use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use super::{RecordingClient, RecordingDescriptor, SavedRecording};
use crate::reconcilers::targets::TargetAddress;
use crate::resources::flightrecorders::{EventInfo, TemplateInfo};
use crate::{Error, Metrics, Result};

const JMX_AUTHORIZATION_HEADER: &str = "X-JMX-Authorization";

/// Client for version 1 of the Cryostat web API
pub struct CryostatClient {
    base_url: Url,
    http_client: reqwest::Client,
    bearer_token: String,
    jmx_authorization: Option<String>,
    metrics: Metrics,
}

impl CryostatClient {
    pub fn new(
        base_url: Url,
        http_client: reqwest::Client,
        bearer_token: String,
        metrics: Metrics,
    ) -> Self {
        Self {
            base_url,
            http_client,
            bearer_token,
            jmx_authorization: None,
            metrics,
        }
    }

    /// Authenticate to target JVMs with these credentials
    pub fn with_jmx_credentials(mut self, username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        self.jmx_authorization = Some(format!("Basic {encoded}"));
        self
    }

    /// Appends each segment to the base URL, percent-encoding it
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn target_url(&self, target: &TargetAddress, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["api", "v1", "targets", target.as_str()];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!("{method} {url}");
        let mut request_builder = self
            .http_client
            .request(method, url)
            .bearer_auth(&self.bearer_token);

        if let Some(jmx_authorization) = &self.jmx_authorization {
            request_builder =
                request_builder.header(JMX_AUTHORIZATION_HEADER, jmx_authorization.as_str());
        }

        request_builder
    }

    async fn send(
        &self,
        operation: &str,
        request_builder: RequestBuilder,
    ) -> Result<reqwest::Response> {
        let start = Instant::now();
        let result = request_builder
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(Error::RecordingCallFailed);
        self.metrics.remote_call(operation, start, &result);
        result
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, url: Url) -> Result<T> {
        self.send(operation, self.request(Method::GET, url))
            .await?
            .json()
            .await
            .map_err(Error::RecordingCallFailed)
    }
}

fn events_form_value(event_options: &[String]) -> String {
    event_options.join(",")
}

#[async_trait]
impl RecordingClient for CryostatClient {
    async fn start_recording(
        &self,
        target: &TargetAddress,
        name: &str,
        event_options: &[String],
    ) -> Result<()> {
        let url = self.target_url(target, &["recordings"])?;
        let form = [
            ("recordingName", name.to_string()),
            ("events", events_form_value(event_options)),
        ];
        self.send("start", self.request(Method::POST, url).form(&form))
            .await?;
        Ok(())
    }

    async fn dump_recording(
        &self,
        target: &TargetAddress,
        name: &str,
        seconds: u64,
        event_options: &[String],
    ) -> Result<()> {
        let url = self.target_url(target, &["recordings"])?;
        let form = [
            ("recordingName", name.to_string()),
            ("events", events_form_value(event_options)),
            ("duration", seconds.to_string()),
        ];
        self.send("dump", self.request(Method::POST, url).form(&form))
            .await?;
        Ok(())
    }

    async fn stop_recording(&self, target: &TargetAddress, name: &str) -> Result<()> {
        let url = self.target_url(target, &["recordings", name])?;
        self.send("stop", self.request(Method::PATCH, url).body("STOP"))
            .await?;
        Ok(())
    }

    async fn list_recordings(&self, target: &TargetAddress) -> Result<Vec<RecordingDescriptor>> {
        self.get_json("list", self.target_url(target, &["recordings"])?)
            .await
    }

    async fn save_recording(&self, target: &TargetAddress, name: &str) -> Result<String> {
        let url = self.target_url(target, &["recordings", name])?;
        self.send("save", self.request(Method::PATCH, url).body("SAVE"))
            .await?
            .text()
            .await
            .map_err(Error::RecordingCallFailed)
    }

    async fn list_saved_recordings(&self) -> Result<Vec<SavedRecording>> {
        self.get_json("list-saved", self.url(&["api", "v1", "recordings"])?)
            .await
    }

    async fn delete_recording(&self, target: &TargetAddress, name: &str) -> Result<()> {
        let url = self.target_url(target, &["recordings", name])?;
        self.send("delete", self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn delete_saved_recording(&self, filename: &str) -> Result<()> {
        let url = self.url(&["api", "v1", "recordings", filename])?;
        self.send("delete-saved", self.request(Method::DELETE, url))
            .await?;
        Ok(())
    }

    async fn list_event_types(&self, target: &TargetAddress) -> Result<Vec<EventInfo>> {
        self.get_json("list-events", self.target_url(target, &["events"])?)
            .await
    }

    async fn list_templates(&self, target: &TargetAddress) -> Result<Vec<TemplateInfo>> {
        self.get_json("list-templates", self.target_url(target, &["templates"])?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CryostatClient {
        CryostatClient::new(
            Url::parse("https://cryostat-sample.default.svc:8181/").unwrap(),
            reqwest::Client::new(),
            "token".into(),
            Metrics::default(),
        )
    }

    #[tokio::test]
    async fn unreachable_cryostats_are_counted() {
        let metrics = Metrics::default();
        // nothing listens on the discard port
        let client = CryostatClient::new(
            Url::parse("http://127.0.0.1:9/").unwrap(),
            reqwest::Client::new(),
            "token".into(),
            metrics.clone(),
        );

        let err = client.list_saved_recordings().await.unwrap_err();
        assert!(matches!(err, Error::RecordingCallFailed(_)));
        assert_eq!(
            metrics
                .remote_calls
                .with_label_values(&["list-saved", "unreachable"])
                .get(),
            1
        );
    }

    #[test]
    fn target_ids_are_a_single_path_segment() {
        let target = TargetAddress::new("10.0.0.12", 9091);
        let url = client().target_url(&target, &["recordings", "my recording"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://cryostat-sample.default.svc:8181/api/v1/targets/service:jmx:rmi:%2F%2F%2Fjndi%2Frmi:%2F%2F10.0.0.12:9091%2Fjmxrmi/recordings/my%20recording"
        );
    }

    #[test]
    fn saved_recordings_are_addressed_by_filename() {
        let url = client()
            .url(&["api", "v1", "recordings", "app_my-recording_20210101T000000Z.jfr"])
            .unwrap();
        assert_eq!(
            url.path(),
            "/api/v1/recordings/app_my-recording_20210101T000000Z.jfr"
        );
    }

    #[test]
    fn jmx_credentials_use_basic_auth() {
        let client = client().with_jmx_credentials("user", "pass");
        assert_eq!(client.jmx_authorization.unwrap(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn descriptors_decode_from_api_json() {
        let recordings: Vec<RecordingDescriptor> = serde_json::from_value(serde_json::json!([{
            "id": 1,
            "name": "my-recording",
            "state": "RUNNING",
            "startTime": 1_600_000_000_000_i64,
            "duration": 30_000,
            "continuous": false,
            "downloadUrl": "https://cryostat/api/v1/targets/t/recordings/my-recording",
            "reportUrl": "https://cryostat/api/v1/targets/t/reports/my-recording"
        }]))
        .unwrap();
        assert_eq!(recordings[0].state, "RUNNING");
        assert_eq!(recordings[0].duration, 30_000);
    }
}
