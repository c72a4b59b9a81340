//! HTTP client for the recognition and admin endpoints.
//!
//! Everything the client needs (base URL, bearer token, timeout) comes in
//! through [`ApiConfig`] at construction time.

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ApiSettings;
use crate::enroll::Enrollment;
use crate::error::{Error, Result};
use crate::multipart::Form;
use crate::recognize::{RecognitionOutcome, Recognizer};
use crate::sampler::SampledFrame;

pub const RECOGNIZE_PATH: &str = "/api/recognize";
pub const USERS_PATH: &str = "/api/admin/users";
pub const ATTENDANCE_PATH: &str = "/api/admin/attendance";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            token: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn from_settings(settings: &ApiSettings, token: Option<String>) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            token,
            timeout: Duration::from_secs_f64(settings.timeout_secs),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

/// Join `base` and `path`, collapsing the slashes between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceReport {
    pub records: Vec<AttendanceRecord>,
    pub total_unique: u64,
}

/// Filter for the attendance listing. Dates are `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceQuery {
    pub from_date: String,
    pub to_date: String,
    pub user: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    success: bool,
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttendanceResponse {
    success: bool,
    #[serde(default)]
    records: Vec<AttendanceRecord>,
    #[serde(default)]
    total_unique: u64,
    #[serde(default)]
    error: Option<String>,
}

/// The authenticated admin endpoints.
pub trait AdminApi {
    fn list_users(&self) -> Result<Vec<User>>;
    fn add_user(&self, enrollment: &Enrollment) -> Result<()>;
    fn delete_user(&self, user_id: &str) -> Result<()>;
    fn attendance(&self, query: &AttendanceQuery) -> Result<AttendanceReport>;
}

#[derive(Clone)]
pub struct ApiClient {
    agent: ureq::Agent,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { agent, config }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn url(&self, path: &str) -> String {
        join_url(&self.config.base_url, path)
    }

    fn bearer(&self) -> Result<String> {
        match self.config.token.as_deref() {
            Some(token) if !token.is_empty() => Ok(format!("Bearer {}", token)),
            _ => Err(Error::NotLoggedIn),
        }
    }

    /// Blocking upload of one frame. Every failure is folded into the
    /// outcome.
    pub fn recognize_blocking(&self, frame: &SampledFrame) -> RecognitionOutcome {
        let (content_type, body) = Form::new()
            .file("image", "capture.jpg", frame.mime, frame.bytes.clone())
            .finish();

        let result = self
            .agent
            .post(&self.url(RECOGNIZE_PATH))
            .set("Content-Type", &content_type)
            .send_bytes(&body);

        match result {
            Ok(response) => match response.into_string() {
                Ok(text) => RecognitionOutcome::from_body(&text),
                Err(e) => {
                    warn!("Failed to read recognition response: {}", e);
                    RecognitionOutcome::TransportError
                }
            },
            // The service answers 4xx for rejected faces; the body still says which.
            Err(ureq::Error::Status(code, response)) => {
                debug!("Recognition endpoint answered HTTP {}", code);
                match response.into_string() {
                    Ok(text) => RecognitionOutcome::from_body(&text),
                    Err(_) => RecognitionOutcome::TransportError,
                }
            }
            Err(e) => {
                warn!("Recognition request failed: {}", e);
                RecognitionOutcome::TransportError
            }
        }
    }
}

impl Recognizer for ApiClient {
    async fn recognize(&self, frame: SampledFrame) -> RecognitionOutcome {
        let client = self.clone();
        match tokio::task::spawn_blocking(move || client.recognize_blocking(&frame)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Recognition upload task failed: {}", e);
                RecognitionOutcome::TransportError
            }
        }
    }
}

/// Decode a JSON body, accepting error statuses whose body still parses.
fn read_json<T: DeserializeOwned>(result: std::result::Result<ureq::Response, ureq::Error>) -> Result<T> {
    match result {
        Ok(response) => {
            let text = response
                .into_string()
                .map_err(|e| Error::Transport(format!("failed to read response: {}", e)))?;
            Ok(serde_json::from_str(&text)?)
        }
        Err(ureq::Error::Status(code, response)) => {
            let text = response.into_string().unwrap_or_default();
            serde_json::from_str(&text).map_err(|_| Error::Transport(format!("server returned HTTP {}", code)))
        }
        Err(e) => Err(e.into()),
    }
}

fn check_envelope(envelope: Envelope, fallback: &str) -> Result<()> {
    if envelope.success {
        Ok(())
    } else {
        Err(Error::Application(envelope.error.unwrap_or_else(|| fallback.to_string())))
    }
}

impl AdminApi for ApiClient {
    fn list_users(&self) -> Result<Vec<User>> {
        let auth = self.bearer()?;
        let response: UsersResponse = read_json(
            self.agent
                .get(&self.url(USERS_PATH))
                .set("Authorization", &auth)
                .call(),
        )?;

        if !response.success {
            return Err(Error::Application(
                response.error.unwrap_or_else(|| "Failed to fetch users".to_string()),
            ));
        }
        debug!("Fetched {} users", response.users.len());
        Ok(response.users)
    }

    fn add_user(&self, enrollment: &Enrollment) -> Result<()> {
        let auth = self.bearer()?;

        let mut form = Form::new()
            .text("user_id", &enrollment.user_id)
            .text("name", &enrollment.name);
        for image in &enrollment.images {
            form = form.file("images", &image.file_name, &image.mime, image.bytes.clone());
        }
        let (content_type, body) = form.finish();

        let envelope: Envelope = read_json(
            self.agent
                .post(&self.url(USERS_PATH))
                .set("Authorization", &auth)
                .set("Content-Type", &content_type)
                .send_bytes(&body),
        )?;
        check_envelope(envelope, "Failed to add user")?;

        info!(
            "Enrolled user {} with {} image(s)",
            enrollment.user_id,
            enrollment.images.len()
        );
        Ok(())
    }

    fn delete_user(&self, user_id: &str) -> Result<()> {
        let auth = self.bearer()?;

        let mut url = url::Url::parse(&self.url(USERS_PATH))
            .map_err(|e| Error::Config(format!("invalid API base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("API base URL cannot carry a path".to_string()))?
            .push(user_id);

        let envelope: Envelope = read_json(
            self.agent
                .delete(url.as_str())
                .set("Authorization", &auth)
                .call(),
        )?;
        check_envelope(envelope, "Failed to delete user")?;

        info!("Deleted user {}", user_id);
        Ok(())
    }

    fn attendance(&self, query: &AttendanceQuery) -> Result<AttendanceReport> {
        let auth = self.bearer()?;
        let response: AttendanceResponse = read_json(
            self.agent
                .get(&self.url(ATTENDANCE_PATH))
                .query("from_date", &query.from_date)
                .query("to_date", &query.to_date)
                .query("user", &query.user)
                .set("Authorization", &auth)
                .call(),
        )?;

        if !response.success {
            return Err(Error::Application(
                response
                    .error
                    .unwrap_or_else(|| "Failed to fetch attendance records".to_string()),
            ));
        }

        Ok(AttendanceReport {
            records: response.records,
            total_unique: response.total_unique,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    /// Answer exactly one request with `status` and `body`, handing back the
    /// raw request once served.
    fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            stream.write_all(response.as_bytes()).unwrap();
            request
        });
        (base_url, server)
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);

            let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
            let length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= end + 4 + length {
                break;
            }
        }
        String::from_utf8_lossy(&data).to_string()
    }

    fn frame() -> SampledFrame {
        SampledFrame::jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9], 1, 1)
    }

    #[test]
    fn upload_is_a_multipart_image_field() {
        let (base_url, server) = serve_once("200 OK", r#"{"success": true, "name": "Alice"}"#);
        let client = ApiClient::new(ApiConfig::new(&base_url));

        assert_eq!(
            client.recognize_blocking(&frame()),
            RecognitionOutcome::Matched("Alice".to_string())
        );

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /api/recognize HTTP/1.1\r\n"), "{}", request);
        assert!(request.contains("multipart/form-data; boundary="));
        assert!(request.contains("name=\"image\"; filename=\"capture.jpg\""));
        assert!(request.contains("Content-Type: image/jpeg"));
    }

    #[test]
    fn error_status_with_response_document_is_classified() {
        let (base_url, server) = serve_once("404 Not Found", r#"{"success": false, "error": "already_marked"}"#);
        let client = ApiClient::new(ApiConfig::new(&base_url));

        assert_eq!(client.recognize_blocking(&frame()), RecognitionOutcome::AlreadyMarked);
        server.join().unwrap();

        let (base_url, server) = serve_once("401 Unauthorized", r#"{"success": false}"#);
        let client = ApiClient::new(ApiConfig::new(&base_url));
        assert_eq!(client.recognize_blocking(&frame()), RecognitionOutcome::UnknownUser);
        server.join().unwrap();
    }

    #[test]
    fn error_status_without_response_document_is_transport_error() {
        let (base_url, server) = serve_once("502 Bad Gateway", "<html>bad gateway</html>");
        let client = ApiClient::new(ApiConfig::new(&base_url));

        assert_eq!(client.recognize_blocking(&frame()), RecognitionOutcome::TransportError);
        server.join().unwrap();
    }

    #[test]
    fn refused_connection_is_transport_error() {
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let client = ApiClient::new(ApiConfig::new(&format!("http://127.0.0.1:{}", port)));

        assert_eq!(client.recognize_blocking(&frame()), RecognitionOutcome::TransportError);
    }

    #[tokio::test]
    async fn async_recognize_goes_through_the_blocking_pool() {
        let (base_url, server) = serve_once("200 OK", r#"{"success": true, "name": "Bob"}"#);
        let client = ApiClient::new(ApiConfig::new(&base_url));

        assert_eq!(client.recognize(frame()).await, RecognitionOutcome::Matched("Bob".to_string()));
        server.join().unwrap();
    }

    #[test]
    fn joins_without_doubling_slashes() {
        assert_eq!(join_url("http://localhost:5000", "/api/recognize"), "http://localhost:5000/api/recognize");
        assert_eq!(join_url("http://localhost:5000///", "api/recognize"), "http://localhost:5000/api/recognize");
        assert_eq!(join_url("http://host/base/", "//api/admin/users"), "http://host/base/api/admin/users");
    }

    #[test]
    fn admin_calls_require_a_token() {
        let client = ApiClient::new(ApiConfig::new("http://127.0.0.1:9"));
        assert!(matches!(client.list_users(), Err(Error::NotLoggedIn)));
        assert!(matches!(client.delete_user("u1"), Err(Error::NotLoggedIn)));

        let client = ApiClient::new(ApiConfig::new("http://127.0.0.1:9").with_token(Some(String::new())));
        assert!(matches!(client.list_users(), Err(Error::NotLoggedIn)));
    }

    #[test]
    fn settings_carry_over() {
        let settings = ApiSettings {
            base_url: "http://kiosk:8000".to_string(),
            timeout_secs: 2.5,
        };
        let config = ApiConfig::from_settings(&settings, Some("t0k".to_string()));
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.token.as_deref(), Some("t0k"));
    }

    #[test]
    fn attendance_response_defaults() {
        let response: AttendanceResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(response.records.is_empty());
        assert_eq!(response.total_unique, 0);
    }

    #[test]
    fn failed_envelope_prefers_server_message() {
        let err = check_envelope(
            Envelope {
                success: false,
                error: Some("User ID exists".to_string()),
            },
            "Failed to add user",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "User ID exists");

        let err = check_envelope(Envelope { success: false, error: None }, "Failed to add user").unwrap_err();
        assert_eq!(err.to_string(), "Failed to add user");
    }
}
