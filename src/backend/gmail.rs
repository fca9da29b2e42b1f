//! Gmail REST backend.
//!
//! Exact counts come from the label resource (`threadsTotal`,
//! `threadsUnread`). Estimates come from `threads.list` with
//! `maxResults=1`, reading `resultSizeEstimate`. All estimate lookups for a
//! request travel in one `multipart/mixed` batch, two sub-requests per query
//! (all threads, unread threads), keyed by `Content-ID`.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders};
use reqwest::Url;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::{MailBackend, ThreadCounts};
use crate::error::BackendError;

/// Gmail rejects batches with more sub-requests than this.
const MAX_BATCH_REQUESTS: usize = 100;

/// Gmail backend configuration.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// Base URL of the REST API, without a trailing `/gmail/v1`.
    pub api_base: String,
    /// Batch endpoint URL.
    pub batch_url: String,
    /// Label whose threads are counted (the default inbox view).
    pub label: String,
    pub request_timeout: Duration,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            api_base: "https://gmail.googleapis.com".to_string(),
            batch_url: "https://gmail.googleapis.com/batch/gmail/v1".to_string(),
            label: "INBOX".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// [`MailBackend`] backed by the Gmail API.
pub struct GmailBackend {
    config: GmailConfig,
    http: reqwest::Client,
}

impl GmailBackend {
    pub fn new(config: GmailConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/gmail/v1/users/me/{path}",
            self.config.api_base.trim_end_matches('/')
        )
    }

    /// Batch sub-request path for a `threads.list` estimate.
    fn threads_path(&self, query: &str) -> Result<String, BackendError> {
        let mut url = Url::parse(&self.api_url("threads")).map_err(|e| BackendError::Request {
            reason: format!("invalid Gmail API base: {e}"),
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("labelIds", &self.config.label);
            pairs.append_pair("maxResults", "1");
            if !query.is_empty() {
                pairs.append_pair("q", query);
            }
        }
        Ok(format!("{}?{}", url.path(), url.query().unwrap_or_default()))
    }

    async fn send_batch(
        &self,
        token: &SecretString,
        paths: &[String],
    ) -> Result<Vec<u64>, BackendError> {
        let boundary = format!("batch_{:016x}", rand::random::<u64>());
        let response = self
            .http
            .post(&self.config.batch_url)
            .bearer_auth(token.expose_secret())
            .header(CONTENT_TYPE, format!("multipart/mixed; boundary={boundary}"))
            .body(build_batch_body(&boundary, paths))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), error_message(&body)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await?;
        parse_batch_response(&content_type, &body, paths.len())
    }
}

#[async_trait]
impl MailBackend for GmailBackend {
    async fn fetch_exact_folder_counts(
        &self,
        token: &SecretString,
    ) -> Result<ThreadCounts, BackendError> {
        let url = self.api_url(&format!("labels/{}", self.config.label));
        debug!(label = %self.config.label, "Fetching exact label counts");

        let response = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), error_message(&body)));
        }

        let label: LabelResponse =
            response
                .json()
                .await
                .map_err(|e| BackendError::InvalidResponse {
                    reason: format!("label body: {e}"),
                })?;
        Ok(ThreadCounts {
            total: label.threads_total,
            unread: label.threads_unread,
        })
    }

    async fn fetch_estimated_counts(
        &self,
        token: &SecretString,
        queries: &[String],
    ) -> Result<Vec<ThreadCounts>, BackendError> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::with_capacity(queries.len() * 2);
        for query in queries {
            paths.push(self.threads_path(query)?);
            paths.push(self.threads_path(&unread_query(query))?);
        }
        debug!(
            queries = queries.len(),
            sub_requests = paths.len(),
            "Fetching batched estimates"
        );

        // Pairs never straddle chunks: the chunk size is even.
        let mut estimates = Vec::with_capacity(paths.len());
        for chunk in paths.chunks(MAX_BATCH_REQUESTS) {
            estimates.extend(self.send_batch(token, chunk).await?);
        }

        Ok(estimates
            .chunks_exact(2)
            .map(|pair| ThreadCounts {
                total: pair[0],
                unread: pair[1],
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelResponse {
    #[serde(default)]
    threads_total: u64,
    #[serde(default)]
    threads_unread: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadListResponse {
    #[serde(default)]
    result_size_estimate: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn unread_query(query: &str) -> String {
    if query.is_empty() {
        "is:unread".to_string()
    } else {
        format!("({query}) AND is:unread")
    }
}

/// Pull `error.message` out of a Google error body, else the raw text.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => body.trim().chars().take(200).collect(),
    }
}

/// Encode GET sub-requests as a `multipart/mixed` batch body.
pub fn build_batch_body(boundary: &str, paths: &[String]) -> String {
    let mut body = String::new();
    for (i, path) in paths.iter().enumerate() {
        let _ = write!(
            body,
            "--{boundary}\r\n\
             Content-Type: application/http\r\n\
             Content-ID: <item{i}>\r\n\
             \r\n\
             GET {path}\r\n\
             \r\n"
        );
    }
    let _ = write!(body, "--{boundary}--\r\n");
    body
}

/// Decode a batch response into `resultSizeEstimate` values, ordered by
/// sub-request index.
///
/// The outer `multipart/mixed` envelope goes through `mail-parser`; each part
/// body is an embedded HTTP response (status line, headers, JSON).
pub fn parse_batch_response(
    content_type: &str,
    body: &str,
    expected: usize,
) -> Result<Vec<u64>, BackendError> {
    let invalid = |reason: String| BackendError::InvalidResponse { reason };

    if !content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/")
    {
        return Err(invalid(format!(
            "batch response is not multipart: {content_type:?}"
        )));
    }

    let raw = format!("Content-Type: {content_type}\r\n\r\n{body}");
    let message = MessageParser::default()
        .parse(raw.as_bytes())
        .ok_or_else(|| invalid("unparseable batch response".into()))?;

    let mut slots: Vec<Option<u64>> = vec![None; expected];
    // Part 0 is the envelope itself.
    for part in message.parts.iter().skip(1) {
        let index = MimeHeaders::content_id(part)
            .and_then(content_id_index)
            .filter(|i| *i < expected)
            .ok_or_else(|| invalid("batch part without a known Content-ID".into()))?;

        let inner = std::str::from_utf8(part.contents())
            .map_err(|e| invalid(format!("batch part {index}: {e}")))?;
        let (inner_head, inner_body) = split_head(inner);
        let status = inner_head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| invalid(format!("batch part {index} has no status line")))?;
        if !(200..300).contains(&status) {
            return Err(BackendError::from_status(status, error_message(inner_body)));
        }

        let list: ThreadListResponse = serde_json::from_str(inner_body.trim())
            .map_err(|e| invalid(format!("batch part {index}: {e}")))?;
        slots[index] = Some(list.result_size_estimate);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.ok_or_else(|| invalid(format!("no response for item {i}"))))
        .collect()
}

/// Split an embedded HTTP response into its head and body.
fn split_head(s: &str) -> (&str, &str) {
    let s = s.trim_start_matches(['\r', '\n']);
    if let Some(i) = s.find("\r\n\r\n") {
        (&s[..i], &s[i + 4..])
    } else if let Some(i) = s.find("\n\n") {
        (&s[..i], &s[i + 2..])
    } else {
        (s, "")
    }
}

/// `<response-item7>` → 7.
fn content_id_index(id: &str) -> Option<usize> {
    let id = id.trim().trim_start_matches('<').trim_end_matches('>');
    let id = id.strip_prefix("response-").unwrap_or(id);
    id.strip_prefix("item")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_part(boundary: &str, index: usize, status: &str, json: &str) -> String {
        format!(
            "--{boundary}\r\nContent-Type: application/http\r\nContent-ID: <response-item{index}>\r\n\r\nHTTP/1.1 {status}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{json}\r\n"
        )
    }

    #[test]
    fn batch_body_has_one_part_per_path() {
        let body = build_batch_body(
            "b1",
            &["/gmail/v1/users/me/threads?q=a".into(), "/x?q=b".into()],
        );
        assert!(body.starts_with("--b1\r\nContent-Type: application/http\r\n"));
        assert!(body.contains("Content-ID: <item0>\r\n\r\nGET /gmail/v1/users/me/threads?q=a\r\n"));
        assert!(body.contains("Content-ID: <item1>\r\n\r\nGET /x?q=b\r\n"));
        assert!(body.ends_with("--b1--\r\n"));
    }

    #[test]
    fn parses_parts_by_content_id() {
        let boundary = "batch_abc";
        let body = format!(
            "{}{}--{boundary}--\r\n",
            response_part(boundary, 1, "200 OK", r#"{"resultSizeEstimate": 30}"#),
            response_part(boundary, 0, "200 OK", r#"{"threads": [], "resultSizeEstimate": 150}"#),
        );
        let values = parse_batch_response(
            &format!("multipart/mixed; boundary={boundary}"),
            &body,
            2,
        )
        .unwrap();
        assert_eq!(values, vec![150, 30]);
    }

    #[test]
    fn boundary_text_inside_a_body_does_not_split_the_part() {
        let boundary = "batch_abc";
        let body = format!(
            "{}--{boundary}--\r\n",
            response_part(
                boundary,
                0,
                "200 OK",
                r#"{"resultSizeEstimate": 7, "nextPageToken": "--batch_abc"}"#
            ),
        );
        let values = parse_batch_response(
            &format!("multipart/mixed; boundary={boundary}"),
            &body,
            1,
        )
        .unwrap();
        assert_eq!(values, vec![7]);
    }

    #[test]
    fn content_id_accepts_request_and_response_forms() {
        assert_eq!(content_id_index("<response-item12>"), Some(12));
        assert_eq!(content_id_index("response-item3"), Some(3));
        assert_eq!(content_id_index("item0"), Some(0));
        assert_eq!(content_id_index("<other>"), None);
    }

    #[test]
    fn missing_estimate_defaults_to_zero() {
        let boundary = "b";
        let body = format!(
            "{}--{boundary}--",
            response_part(boundary, 0, "200 OK", "{}")
        );
        let values =
            parse_batch_response("multipart/mixed; boundary=\"b\"", &body, 1).unwrap();
        assert_eq!(values, vec![0]);
    }

    #[test]
    fn inner_auth_failure_is_unauthorized() {
        let boundary = "b";
        let body = format!(
            "{}--{boundary}--",
            response_part(
                boundary,
                0,
                "401 Unauthorized",
                r#"{"error": {"code": 401, "message": "Invalid Credentials"}}"#
            )
        );
        let err = parse_batch_response("multipart/mixed; boundary=b", &body, 1).unwrap_err();
        assert!(err.is_auth());
        assert!(err.to_string().contains("Invalid Credentials"));
    }

    #[test]
    fn inner_server_error_preserves_message() {
        let boundary = "b";
        let body = format!(
            "{}--{boundary}--",
            response_part(
                boundary,
                0,
                "429 Too Many Requests",
                r#"{"error": {"code": 429, "message": "Rate Limit Exceeded"}}"#
            )
        );
        match parse_batch_response("multipart/mixed; boundary=b", &body, 1) {
            Err(BackendError::Status { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "Rate Limit Exceeded");
            }
            other => panic!("Expected Status error, got {other:?}"),
        }
    }

    #[test]
    fn missing_part_is_invalid() {
        let boundary = "b";
        let body = format!(
            "{}--{boundary}--",
            response_part(boundary, 0, "200 OK", r#"{"resultSizeEstimate": 1}"#)
        );
        assert!(matches!(
            parse_batch_response("multipart/mixed; boundary=b", &body, 2),
            Err(BackendError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn missing_boundary_is_invalid() {
        assert!(matches!(
            parse_batch_response("application/json", "{}", 1),
            Err(BackendError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn threads_path_encodes_query() {
        let backend = GmailBackend::new(GmailConfig::default()).unwrap();
        let path = backend.threads_path("(from:a@x.com) AND -(subject:\"hi there\")").unwrap();
        assert!(path.starts_with("/gmail/v1/users/me/threads?labelIds=INBOX&maxResults=1&q="));
        assert!(!path.contains(' '));

        let url = Url::parse(&format!("http://localhost{path}")).unwrap();
        let q = url
            .query_pairs()
            .find(|(k, _)| k == "q")
            .map(|(_, v)| v.into_owned());
        assert_eq!(
            q.as_deref(),
            Some("(from:a@x.com) AND -(subject:\"hi there\")")
        );
    }

    #[test]
    fn unread_query_wraps_panel_query() {
        assert_eq!(unread_query(""), "is:unread");
        assert_eq!(unread_query("from:a"), "(from:a) AND is:unread");
    }

    #[test]
    fn error_message_falls_back_to_body() {
        assert_eq!(error_message("  gateway timeout "), "gateway timeout");
        assert_eq!(
            error_message(r#"{"error": {"code": 500, "message": "Backend Error"}}"#),
            "Backend Error"
        );
    }
}
