//! `multipart/form-data` request bodies for ureq, which has no form support
//! of its own.

use std::sync::atomic::{AtomicU64, Ordering};

static BOUNDARY_SEQ: AtomicU64 = AtomicU64::new(0);

enum Part {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

#[derive(Default)]
pub struct Form {
    parts: Vec<Part>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.parts.push(Part::Text {
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, mime: &str, bytes: Vec<u8>) -> Self {
        self.parts.push(Part::File {
            name: name.to_string(),
            file_name: file_name.to_string(),
            mime: mime.to_string(),
            bytes,
        });
        self
    }

    /// Serialise the form, returning the `Content-Type` header value and the
    /// body.
    pub fn finish(self) -> (String, Vec<u8>) {
        let boundary = self.pick_boundary();
        let mut body = Vec::new();

        for part in &self.parts {
            body.extend_from_slice(b"--");
            body.extend_from_slice(boundary.as_bytes());
            body.extend_from_slice(b"\r\n");
            match part {
                Part::Text { name, value } => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape(name)).as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File {
                    name,
                    file_name,
                    mime,
                    bytes,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                            escape(name),
                            escape(file_name),
                            mime
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(b"--");
        body.extend_from_slice(boundary.as_bytes());
        body.extend_from_slice(b"--\r\n");

        (format!("multipart/form-data; boundary={}", boundary), body)
    }

    fn pick_boundary(&self) -> String {
        let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        loop {
            let seq = BOUNDARY_SEQ.fetch_add(1, Ordering::Relaxed);
            let boundary = format!("----presence{:016x}{:08x}", stamp, seq);
            if !self.parts.iter().any(|p| p.contains(boundary.as_bytes())) {
                return boundary;
            }
        }
    }
}

impl Part {
    fn contains(&self, needle: &[u8]) -> bool {
        let haystack: &[u8] = match self {
            Part::Text { value, .. } => value.as_bytes(),
            Part::File { bytes, .. } => bytes,
        };
        haystack.windows(needle.len()).any(|w| w == needle)
    }
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}
