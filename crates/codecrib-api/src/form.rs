use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::{HeaderMap, StatusCode, header},
};
use tracing::warn;

/// The file part of a multipart body.
#[derive(Debug)]
pub struct Upload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// A decoded `multipart/form-data` body: its text fields plus the one file
/// part the handler asked for.
#[derive(Debug, Default)]
pub struct Form {
    fields: HashMap<String, String>,
    pub upload: Option<Upload>,
}

impl Form {
    /// Read every part of `req`. The part named `upload_field` is kept as
    /// bytes, all others are read as text. The body limit still applies.
    pub async fn read(req: Request, upload_field: &str) -> Result<Self, StatusCode> {
        let mut multipart = Multipart::from_request(req, &()).await.map_err(|e| {
            warn!("Bad multipart request: {}", e);
            e.status()
        })?;

        let mut form = Form::default();
        while let Some(field) = multipart.next_field().await.map_err(|e| {
            warn!("Bad multipart field: {}", e);
            e.status()
        })? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == upload_field {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| {
                    warn!("Failed to read upload {}: {}", name, e);
                    e.status()
                })?;
                // browsers send an empty part when no file was chosen
                if !bytes.is_empty() {
                    form.upload = Some(Upload {
                        file_name,
                        content_type,
                        bytes,
                    });
                }
            } else {
                let value = field.text().await.map_err(|e| {
                    warn!("Failed to read field {}: {}", name, e);
                    e.status()
                })?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    #[cfg(test)]
    pub(crate) fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn take(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    /// HTML forms post checkboxes as "on" and scripts tend to send "true".
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.fields.get(name).map(String::as_str), Some("true" | "on" | "1"))
    }
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

pub fn is_json(headers: &HeaderMap) -> bool {
    content_type(headers).is_some_and(|ct| ct.starts_with("application/json"))
}

pub fn is_multipart(headers: &HeaderMap) -> bool {
    content_type(headers).is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    const BOUNDARY: &str = "codecrib-test-boundary";

    fn multipart_request(parts: &[(&str, Option<&str>, &str)]) -> Request {
        let mut body = String::new();
        for (name, file_name, value) in parts {
            body.push_str(&format!("--{}\r\n", BOUNDARY));
            match file_name {
                Some(file_name) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/plain\r\n\r\n",
                    name, file_name
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    name
                )),
            }
            body.push_str(value);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));

        Request::builder()
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn fields_and_upload_are_split() {
        let req = multipart_request(&[
            ("fileName", None, "main.rs"),
            ("file", Some("main.rs"), "fn main() {}\n"),
            ("rememberMe", None, "on"),
        ]);
        let mut form = Form::read(req, "file").await.unwrap();

        let upload = form.upload.take().unwrap();
        assert_eq!(upload.file_name.as_deref(), Some("main.rs"));
        assert_eq!(upload.content_type.as_deref(), Some("text/plain"));
        assert_eq!(&upload.bytes[..], b"fn main() {}\n");
        assert!(form.flag("rememberMe"));
        assert!(!form.flag("missing"));
        assert_eq!(form.take("fileName").as_deref(), Some("main.rs"));
        assert_eq!(form.take("fileName"), None);
    }

    #[tokio::test]
    async fn empty_upload_part_counts_as_absent() {
        let req = multipart_request(&[("file", Some(""), "")]);
        let form = Form::read(req, "file").await.unwrap();
        assert!(form.upload.is_none());
    }

    #[tokio::test]
    async fn non_multipart_body_is_rejected() {
        let req = Request::builder()
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hello"))
            .unwrap();
        assert!(Form::read(req, "file").await.is_err());
    }

    #[test]
    fn content_types_are_recognized() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));
        assert!(!is_multipart(&headers));
        headers.insert(header::CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        assert!(is_json(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            "multipart/form-data; boundary=x".parse().unwrap(),
        );
        assert!(is_multipart(&headers));
    }
}
