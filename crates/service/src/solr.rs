use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::index::{IndexBackend, IndexError};

#[derive(Debug, Clone)]
pub struct SolrClientConfig {
    pub base_url: String,
    pub app_id: String,
    pub timeout: Duration,
    pub user_agent: String,
}

/// [`IndexBackend`] speaking the Solr JSON request handlers.
#[derive(Clone)]
pub struct SolrClient {
    base_url: String,
    app_id: String,
    http: reqwest::Client,
}

impl SolrClient {
    pub fn new(config: SolrClientConfig) -> Result<Self, IndexError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()?;

        Ok(Self {
            base_url: config.base_url,
            app_id: config.app_id,
            http,
        })
    }

    fn handler_url(&self, handler: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), handler)
    }

    async fn get_json(
        &self,
        operation: &'static str,
        handler: &str,
        params: &[(&str, String)],
    ) -> Result<Value, IndexError> {
        let started = Instant::now();

        let result = async {
            let resp = self
                .http
                .get(self.handler_url(handler))
                .query(params)
                .send()
                .await?;

            if !resp.status().is_success() {
                return Err(IndexError::BadStatus(resp.status().as_u16()));
            }

            resp.json::<Value>()
                .await
                .map_err(|_| IndexError::MalformedResponse { operation })
        }
        .await;

        let outcome = if result.is_ok() { "success" } else { "error" };
        crate::metrics::observe_backend_call(operation, outcome, started.elapsed());
        result
    }
}

#[async_trait]
impl IndexBackend for SolrClient {
    async fn normalize(&self, field: &str, value: &str) -> Result<String, IndexError> {
        let body = self
            .get_json(
                "field_analysis",
                "analysis/field",
                &[
                    ("analysis.fieldname", field.to_string()),
                    ("analysis.fieldvalue", value.to_string()),
                    ("appId", self.app_id.clone()),
                    ("wt", "json".to_string()),
                    ("json.nl", "flat".to_string()),
                ],
            )
            .await?;

        ensure_status_ok(&body, "field_analysis")?;
        parse_field_analysis(&body, field).ok_or_else(|| {
            tracing::warn!(field, response = %body, "error in response (field analysis)");
            IndexError::MalformedResponse {
                operation: "field_analysis",
            }
        })
    }

    async fn enumerate_terms(
        &self,
        field: &str,
        lower_bound: &str,
        inclusive: bool,
        limit: usize,
        tracking_id: &str,
    ) -> Result<Vec<String>, IndexError> {
        let body = self
            .get_json(
                "terms",
                "terms",
                &[
                    ("terms.sort", "index".to_string()),
                    ("terms.fl", field.to_string()),
                    ("terms.lower", lower_bound.to_string()),
                    ("terms.lower.incl", inclusive.to_string()),
                    ("terms.limit", limit.to_string()),
                    ("terms.raw", "false".to_string()),
                    ("trackingId", tracking_id.to_string()),
                    ("appId", self.app_id.clone()),
                    ("wt", "json".to_string()),
                    ("json.nl", "flat".to_string()),
                ],
            )
            .await?;

        ensure_status_ok(&body, "terms")?;
        parse_terms(&body, field).ok_or_else(|| {
            tracing::warn!(field, response = %body, "error in response (terms)");
            IndexError::MalformedResponse { operation: "terms" }
        })
    }

    async fn hit_count(
        &self,
        field: &str,
        value: &str,
        filter_query: &str,
    ) -> Result<u64, IndexError> {
        let body = self
            .get_json(
                "select",
                "select",
                &[
                    ("q", format!("{}:{}", field, escape_query_chars(value))),
                    ("fq", filter_query.to_string()),
                    ("rows", "0".to_string()),
                    ("appId", self.app_id.clone()),
                    ("wt", "json".to_string()),
                ],
            )
            .await?;

        ensure_status_ok(&body, "select")?;
        body.get("response")
            .and_then(|r| r.get("numFound"))
            .and_then(Value::as_u64)
            .ok_or(IndexError::MalformedResponse {
                operation: "select",
            })
    }

    async fn ping(&self) -> Result<(), IndexError> {
        let body = self
            .get_json("ping", "admin/ping", &[("wt", "json".to_string())])
            .await?;

        match body.get("status").and_then(Value::as_str) {
            Some("OK") => Ok(()),
            _ => Err(IndexError::MalformedResponse { operation: "ping" }),
        }
    }
}

fn ensure_status_ok(body: &Value, operation: &'static str) -> Result<(), IndexError> {
    let status = body
        .get("responseHeader")
        .and_then(|h| h.get("status"))
        .and_then(Value::as_i64);

    match status {
        Some(0) => Ok(()),
        Some(status) => {
            tracing::warn!(operation, status, response = %body, "error in index response header");
            Err(IndexError::BadStatus(u16::try_from(status).unwrap_or(u16::MAX)))
        }
        None => {
            tracing::warn!(operation, response = %body, "index response has no status header");
            Err(IndexError::MalformedResponse { operation })
        }
    }
}

/// Reads the single token produced by the last analysis stage.
///
/// With `json.nl=flat` the stage list alternates `[stage_name, tokens, ...]`.
/// More than one token means the input was split, which is not a usable
/// scan position.
fn parse_field_analysis(body: &Value, field: &str) -> Option<String> {
    let stages = body
        .get("analysis")?
        .get("field_names")?
        .get(field)?
        .get("index")?
        .as_array()?;

    if stages.is_empty() || stages.len() % 2 != 0 {
        return None;
    }

    let tokens = stages.last()?.as_array()?;
    if tokens.len() != 1 {
        return None;
    }

    tokens[0].get("text")?.as_str().map(str::to_string)
}

/// Term names from a flat `[term, count, term, count, ...]` list.
fn parse_terms(body: &Value, field: &str) -> Option<Vec<String>> {
    let flat = body.get("terms")?.get(field)?.as_array()?;
    flat.chunks(2)
        .map(|pair| pair.first()?.as_str().map(str::to_string))
        .collect()
}

/// Backslash-escapes characters that are syntax in the Solr query parser.
pub fn escape_query_chars(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    for ch in value.chars() {
        if ch.is_whitespace()
            || matches!(
                ch,
                '\\' | '+'
                    | '-'
                    | '!'
                    | '('
                    | ')'
                    | ':'
                    | '^'
                    | '['
                    | ']'
                    | '"'
                    | '{'
                    | '}'
                    | '~'
                    | '*'
                    | '?'
                    | '|'
                    | '&'
                    | ';'
                    | '/'
            )
        {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
