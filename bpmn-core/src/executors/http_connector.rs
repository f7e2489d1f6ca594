use super::{ElementExecutor, EngineAction, ExecutionResult, ExecutorContext};
use crate::expr::EvalError;
use anyhow::Result;
use std::collections::BTreeMap;

/// Resolved HTTP request ready to execute. Network mechanics beyond mapping
/// variables into this shape are out of scope (spec §1) — the actual send
/// is performed by a pluggable `HttpClient` collaborator (see
/// `crate::http_client`).
#[derive(Debug, Clone)]
pub struct HttpRequestConfig {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<String>,
    pub auth: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
}

/// HTTP-connector specialization of a service task: evaluates each ioMapping
/// input `source` (literal, JSON, or FEEL) against variables and builds a
/// typed request config. Output mapping is applied by the processor once
/// the response comes back (spec §4.2).
pub struct HttpConnectorExecutor;

impl ElementExecutor for HttpConnectorExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        let Some(conn) = &ctx.element.http_connector else {
            return Ok(ExecutionResult::failure(format!(
                "http connector task {} has no httpConnector config",
                ctx.element.id
            )));
        };

        let mut url = conn.url.clone();
        let mut headers = conn.headers.clone();
        let mut query = conn.query.clone();
        let mut body = conn.body.clone();

        for input in &conn.inputs {
            let resolved = match ctx.evaluator.evaluate(&input.source, &ctx.token.variables) {
                Ok(v) => v,
                Err(EvalError::NotFound(_)) => continue,
                Err(e) => {
                    return Ok(ExecutionResult::failure(format!(
                        "http connector input {} failed to evaluate: {e}",
                        input.target
                    )))
                }
            };
            let rendered = resolved.to_string();
            if let Some(header) = input.target.strip_prefix("headers.") {
                headers.insert(header.to_string(), rendered);
            } else if let Some(q) = input.target.strip_prefix("query.") {
                query.insert(q.to_string(), rendered);
            } else {
                match input.target.as_str() {
                    "url" => url = rendered,
                    "body" => body = Some(rendered),
                    other => {
                        return Ok(ExecutionResult::failure(format!(
                            "http connector input target not recognized: {other}"
                        )))
                    }
                }
            }
        }

        let config = HttpRequestConfig {
            method: conn.method.clone(),
            url,
            headers,
            query,
            body,
            auth: conn.auth.clone(),
            connect_timeout_ms: conn.connect_timeout_ms,
            read_timeout_ms: conn.read_timeout_ms,
        };

        Ok(ExecutionResult {
            action: EngineAction::CreateHttpJob {
                config,
                outputs: conn.outputs.clone(),
            },
            ..ExecutionResult::wait(
                crate::token::WaitingFor::Job(String::new()),
                EngineAction::None,
            )
        })
    }
}
