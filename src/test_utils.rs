//! Mock apiserver for reconcile tests.
//!
//! The client returned by [`mock_client`] sends every request to an [`ApiServerVerifier`],
//! which the test drives from a spawned task to assert on the traffic and answer it.

use std::time::Duration;

use http::{Method, Request, Response, StatusCode};
use kube::client::Body;
use kube::Client;
use serde_json::{json, Value};

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

pub struct ApiServerVerifier(ApiServerHandle);

pub fn mock_client() -> (Client, ApiServerVerifier) {
    let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let client = Client::new(mock_service, "default");
    (client, ApiServerVerifier(handle))
}

impl ApiServerVerifier {
    pub async fn next(&mut self) -> PendingRequest {
        let (request, send) = tokio::time::timeout(Duration::from_secs(5), self.0.next_request())
            .await
            .expect("timed out waiting for a request")
            .expect("service not called");
        let (parts, body) = request.into_parts();
        let body = body.collect_bytes().await.unwrap().to_vec();
        PendingRequest {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().unwrap_or_default().to_string(),
            body,
            send,
        }
    }

    pub async fn expect(&mut self, method: Method, path: &str) -> PendingRequest {
        let request = self.next().await;
        assert_eq!(request.method, method, "unexpected method for {}", request.path);
        assert_eq!(request.path, path);
        request
    }

    pub async fn expect_get(&mut self, path: &str) -> PendingRequest {
        self.expect(Method::GET, path).await
    }

    /// Asserts that the client makes no further calls
    pub async fn expect_no_more(mut self) {
        if let Ok(Some((request, _))) =
            tokio::time::timeout(Duration::from_millis(200), self.0.next_request()).await
        {
            panic!("unexpected request {} {}", request.method(), request.uri());
        }
    }
}

pub struct PendingRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub body: Vec<u8>,
    send: tower_test::mock::SendResponse<Response<Body>>,
}

impl PendingRequest {
    pub fn body_json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body is json")
    }

    pub fn json(self, value: Value) {
        self.respond(StatusCode::OK, value)
    }

    pub fn created(self, value: Value) {
        self.respond(StatusCode::CREATED, value)
    }

    /// Echoes the request body back, as the apiserver does for applies and creates
    pub fn echo(self) {
        let value = self.body_json();
        self.json(value)
    }

    pub fn not_found(self) {
        self.status(404, "NotFound")
    }

    pub fn status(self, code: u16, reason: &str) {
        let status = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("{reason} for test"),
            "reason": reason,
            "code": code,
        });
        self.respond(
            StatusCode::from_u16(code).expect("valid status code"),
            status,
        )
    }

    fn respond(self, status: StatusCode, value: Value) {
        let response = Response::builder()
            .status(status)
            .body(Body::from(serde_json::to_vec(&value).unwrap()))
            .unwrap();
        self.send.send_response(response);
    }
}
