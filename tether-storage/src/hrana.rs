//! Remote libSQL backend speaking Hrana over HTTP.
//!
//! Each connection keeps one server-side stream open between statements by
//! echoing back the baton returned with every response. Streams expire on
//! the server after a period of inactivity; the next request then fails with
//! `STREAM_EXPIRED` or an invalid-baton error and the client reconnects.

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tether_core::{AuthToken, BackendError, ClientSettings, RowSet, SqlValue, Statement};
use tokio::sync::Mutex;

use crate::backend::{Backend, BackendResult, Connection};

const PIPELINE_PATH: &str = "/v2/pipeline";

/// Hrana-over-HTTP [`Backend`].
#[derive(Clone)]
pub struct HranaBackend {
    http: reqwest::Client,
}

impl HranaBackend {
    pub fn new(settings: &ClientSettings) -> BackendResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.attempt_timeout())
            .build()
            .map_err(|e| BackendError::Transport {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Backend for HranaBackend {
    async fn connect(
        &self,
        endpoint: &str,
        token: &AuthToken,
    ) -> BackendResult<Arc<dyn Connection>> {
        let base_url = http_base_url(endpoint)?;
        tracing::debug!(base_url = %base_url, "Opening Hrana stream");
        Ok(Arc::new(HranaConnection {
            http: self.http.clone(),
            token: token.clone(),
            stream: Mutex::new(StreamState {
                base_url,
                baton: None,
            }),
        }))
    }
}

/// Map a libSQL endpoint to the HTTP base URL of its Hrana API.
pub fn http_base_url(endpoint: &str) -> BackendResult<String> {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let (scheme, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| BackendError::Connect {
            endpoint: endpoint.to_string(),
            reason: "endpoint has no scheme".to_string(),
        })?;
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "libsql" | "https" | "wss" => "https",
        "http" | "ws" => "http",
        other => {
            return Err(BackendError::Connect {
                endpoint: endpoint.to_string(),
                reason: format!("unsupported scheme '{other}'"),
            })
        }
    };
    if rest.is_empty() {
        return Err(BackendError::Connect {
            endpoint: endpoint.to_string(),
            reason: "endpoint has no host".to_string(),
        });
    }
    Ok(format!("{scheme}://{rest}"))
}

struct StreamState {
    base_url: String,
    baton: Option<String>,
}

/// One Hrana stream. Statements on the same connection are serialized
/// because each request must carry the baton of the previous response.
pub struct HranaConnection {
    http: reqwest::Client,
    token: AuthToken,
    stream: Mutex<StreamState>,
}

#[async_trait]
impl Connection for HranaConnection {
    async fn execute(&self, statement: &Statement) -> BackendResult<RowSet> {
        let mut stream = self.stream.lock().await;
        let body = encode_request(stream.baton.as_deref(), statement);
        let url = format!("{}{}", stream.base_url, PIPELINE_PATH);

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.token.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            // The server drops the stream on any HTTP-level error.
            stream.baton = None;
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Transport {
                reason: format!("HTTP {status}: {text}"),
            });
        }

        let text = response.text().await.map_err(|e| BackendError::Transport {
            reason: e.to_string(),
        })?;
        let parsed = decode_response(&text)?;
        stream.baton = parsed.baton.clone();
        if let Some(base_url) = parsed.base_url.as_deref() {
            stream.base_url = base_url.trim_end_matches('/').to_string();
        }
        first_result(parsed)
    }
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[derive(Debug, Serialize)]
struct PipelineRequest<'a> {
    baton: Option<&'a str>,
    requests: Vec<StreamRequest<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamRequest<'a> {
    Execute { stmt: HranaStmt<'a> },
}

#[derive(Debug, Serialize)]
struct HranaStmt<'a> {
    sql: &'a str,
    args: Vec<HranaValue>,
    want_rows: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HranaValue {
    Null,
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
    Blob { base64: String },
}

#[derive(Debug, Deserialize)]
struct PipelineResponse {
    baton: Option<String>,
    base_url: Option<String>,
    results: Vec<StreamResult>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: HranaError },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamResponse {
    Execute { result: StmtResult },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StmtResult {
    #[serde(default)]
    cols: Vec<Column>,
    #[serde(default)]
    rows: Vec<Vec<HranaValue>>,
    #[serde(default)]
    affected_row_count: u64,
}

#[derive(Debug, Deserialize)]
struct Column {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HranaError {
    message: String,
    code: Option<String>,
}

fn encode_request<'a>(baton: Option<&'a str>, statement: &'a Statement) -> PipelineRequest<'a> {
    PipelineRequest {
        baton,
        requests: vec![StreamRequest::Execute {
            stmt: HranaStmt {
                sql: &statement.sql,
                args: statement.params.iter().map(to_hrana).collect(),
                want_rows: true,
            },
        }],
    }
}

fn decode_response(text: &str) -> BackendResult<PipelineResponse> {
    serde_json::from_str(text).map_err(|e| BackendError::Protocol {
        reason: format!("malformed pipeline response: {e}"),
    })
}

fn first_result(response: PipelineResponse) -> BackendResult<RowSet> {
    match response.results.into_iter().next() {
        Some(StreamResult::Ok {
            response: StreamResponse::Execute { result },
        }) => to_row_set(result),
        Some(StreamResult::Ok { .. }) => Err(BackendError::Protocol {
            reason: "unexpected response type for execute".to_string(),
        }),
        Some(StreamResult::Error { error }) => Err(BackendError::Statement {
            message: error.message,
            code: error.code,
        }),
        None => Err(BackendError::Protocol {
            reason: "pipeline response has no results".to_string(),
        }),
    }
}

fn to_row_set(result: StmtResult) -> BackendResult<RowSet> {
    let columns = result
        .cols
        .into_iter()
        .map(|c| c.name.unwrap_or_default())
        .collect();
    let rows = result
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(from_hrana).collect::<BackendResult<Vec<_>>>())
        .collect::<BackendResult<Vec<_>>>()?;
    Ok(RowSet::new(columns, rows).with_rows_affected(result.affected_row_count))
}

fn to_hrana(value: &SqlValue) -> HranaValue {
    match value {
        SqlValue::Null => HranaValue::Null,
        SqlValue::Integer(v) => HranaValue::Integer {
            value: v.to_string(),
        },
        SqlValue::Real(v) => HranaValue::Float { value: *v },
        SqlValue::Text(v) => HranaValue::Text { value: v.clone() },
        SqlValue::Blob(v) => HranaValue::Blob {
            base64: STANDARD_NO_PAD.encode(v),
        },
    }
}

fn from_hrana(value: HranaValue) -> BackendResult<SqlValue> {
    Ok(match value {
        HranaValue::Null => SqlValue::Null,
        HranaValue::Integer { value } => {
            SqlValue::Integer(value.parse().map_err(|_| BackendError::Protocol {
                reason: format!("invalid integer value '{value}'"),
            })?)
        }
        HranaValue::Float { value } => SqlValue::Real(value),
        HranaValue::Text { value } => SqlValue::Text(value),
        HranaValue::Blob { base64 } => SqlValue::Blob(
            STANDARD_NO_PAD
                .decode(base64.trim_end_matches('='))
                .or_else(|_| STANDARD.decode(&base64))
                .map_err(|e| BackendError::Protocol {
                    reason: format!("invalid blob value: {e}"),
                })?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_url_mapping() {
        assert_eq!(
            http_base_url("libsql://settings-org.turso.io").unwrap(),
            "https://settings-org.turso.io"
        );
        assert_eq!(
            http_base_url("http://127.0.0.1:8080/").unwrap(),
            "http://127.0.0.1:8080"
        );
        assert_eq!(http_base_url("wss://db.example").unwrap(), "https://db.example");
        assert!(http_base_url("db.example").is_err());
        assert!(http_base_url("ftp://db.example").is_err());
        assert!(http_base_url("https://").is_err());
    }

    #[test]
    fn test_request_encoding() {
        let stmt = Statement::new("SELECT value FROM \"uid-00\" WHERE key = ?")
            .bind("theme")
            .bind(7i64)
            .bind(SqlValue::Null);
        let body = serde_json::to_value(encode_request(Some("b1"), &stmt)).unwrap();
        assert_eq!(
            body,
            json!({
                "baton": "b1",
                "requests": [{
                    "type": "execute",
                    "stmt": {
                        "sql": "SELECT value FROM \"uid-00\" WHERE key = ?",
                        "args": [
                            {"type": "text", "value": "theme"},
                            {"type": "integer", "value": "7"},
                            {"type": "null"}
                        ],
                        "want_rows": true
                    }
                }]
            })
        );
    }

    #[test]
    fn test_first_request_has_null_baton() {
        let stmt = Statement::new("SELECT 1");
        let body = serde_json::to_value(encode_request(None, &stmt)).unwrap();
        assert_eq!(body["baton"], serde_json::Value::Null);
    }

    #[test]
    fn test_execute_response_decoding() {
        let text = json!({
            "baton": "b2",
            "base_url": null,
            "results": [{
                "type": "ok",
                "response": {
                    "type": "execute",
                    "result": {
                        "cols": [{"name": "value", "decltype": "TEXT"}],
                        "rows": [[{"type": "text", "value": "dark"}]],
                        "affected_row_count": 0,
                        "last_insert_rowid": null
                    }
                }
            }]
        })
        .to_string();
        let parsed = decode_response(&text).unwrap();
        assert_eq!(parsed.baton.as_deref(), Some("b2"));
        let rows = first_result(parsed).unwrap();
        assert_eq!(rows.columns, vec!["value".to_string()]);
        assert_eq!(rows.concat_values(), "dark");
    }

    #[test]
    fn test_stream_error_keeps_code() {
        let text = json!({
            "baton": null,
            "base_url": null,
            "results": [{
                "type": "error",
                "error": {"message": "The stream has expired", "code": "STREAM_EXPIRED"}
            }]
        })
        .to_string();
        let err = first_result(decode_response(&text).unwrap()).unwrap_err();
        assert!(err.is_session_expired());
    }

    #[test]
    fn test_value_decoding() {
        assert_eq!(
            from_hrana(HranaValue::Integer {
                value: "-42".to_string()
            })
            .unwrap(),
            SqlValue::Integer(-42)
        );
        assert_eq!(
            from_hrana(HranaValue::Blob {
                base64: "3q0=".to_string()
            })
            .unwrap(),
            SqlValue::Blob(vec![0xde, 0xad])
        );
        assert!(from_hrana(HranaValue::Integer {
            value: "x".to_string()
        })
        .is_err());
    }

    #[test]
    fn test_malformed_response_is_protocol_error() {
        assert!(matches!(
            decode_response("not json"),
            Err(BackendError::Protocol { .. })
        ));
    }
}
