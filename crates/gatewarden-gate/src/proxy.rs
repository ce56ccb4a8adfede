//! Reverse-proxy host for the gate.
//!
//! A thin axum front that intercepts every exchange: screen the request,
//! forward it upstream exactly once, screen the response, relay it. Blocked
//! exchanges get a fixed empty 403 on either path. The upstream call races
//! the session's cancellation signal so a mid-flight block latches before
//! the response is relayed.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use tracing::{info, warn};

use gatewarden_core::schema::{ReqFacts, RespFacts};

use crate::error::GateError;
use crate::session::Session;
use crate::state::GateState;

#[derive(Clone)]
struct ProxyCtx {
    state: Arc<GateState>,
    upstream: String,
    client: reqwest::Client,
}

/// Serve the gate on `listen`, forwarding approved traffic to `upstream`.
pub async fn run(state: Arc<GateState>, listen: SocketAddr, upstream: String) -> anyhow::Result<()> {
    let ctx = ProxyCtx {
        state,
        upstream: upstream.trim_end_matches('/').to_string(),
        client: reqwest::Client::new(),
    };
    let app = Router::new().fallback(handle).with_state(ctx);
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(%listen, upstream, "gate listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("serving")?;
    Ok(())
}

async fn handle(
    State(ctx): State<ProxyCtx>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let session = Session::start(ctx.state.clone());
    let response = intercept(&ctx, &session, peer, req).await;
    session.finalize();
    match response {
        Ok(resp) => resp,
        Err(GateError::Blocked) => blocked_response(),
    }
}

/// The fixed, content-free rejection. Decision text never reaches the caller.
fn blocked_response() -> Response {
    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .body(Body::empty())
        .unwrap_or_default()
}

async fn intercept(
    ctx: &ProxyCtx,
    session: &Session,
    peer: SocketAddr,
    req: Request<Body>,
) -> crate::error::Result<Response> {
    let (parts, body) = req.into_parts();
    let max = ctx.state.settings.max_body_bytes;
    let body = match axum::body::to_bytes(body, max).await {
        Ok(body) => body,
        Err(err) => {
            warn!(error = %err, "request body exceeds limit or failed to read");
            return Err(GateError::Blocked);
        }
    };

    let facts = ReqFacts {
        method: parts.method.to_string(),
        proto: format!("{:?}", parts.version),
        path: parts.uri.path().to_string(),
        query: query_pairs(parts.uri.query().unwrap_or("")),
        headers: header_pairs(&parts.headers),
        content_length: body.len(),
        client_addr: Some(peer.ip()),
    };
    session.approve_request(&facts, &body, is_json(&parts.headers))?;

    let url = format!(
        "{}{}",
        ctx.upstream,
        parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    );
    let mut headers = parts.headers.clone();
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);
    headers.remove(CONNECTION);

    let mut cancelled = session.cancelled();
    let send = ctx
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send();
    let upstream_resp = tokio::select! {
        res = send => res,
        _ = cancelled.changed() => return Err(GateError::Blocked),
    };
    let upstream_resp = match upstream_resp {
        Ok(resp) => resp,
        Err(err) => {
            warn!(error = %err, "upstream call failed");
            return Ok(Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .body(Body::empty())
                .unwrap_or_default());
        }
    };

    let status = upstream_resp.status();
    let resp_headers = upstream_resp.headers().clone();
    let resp_json = is_json(&resp_headers);
    let resp_body = tokio::select! {
        res = upstream_resp.bytes() => match res {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "upstream body read failed");
                return Ok(Response::builder()
                    .status(StatusCode::BAD_GATEWAY)
                    .body(Body::empty())
                    .unwrap_or_default());
            }
        },
        _ = cancelled.changed() => return Err(GateError::Blocked),
    };

    let resp_facts = RespFacts {
        status: status.as_u16(),
        headers: header_pairs(&resp_headers),
        content_length: resp_body.len(),
    };
    session.approve_response(&resp_facts, &resp_body, resp_json)?;

    let mut builder = Response::builder().status(status);
    for (name, value) in &resp_headers {
        if *name == CONTENT_LENGTH || *name == TRANSFER_ENCODING || *name == CONNECTION {
            continue;
        }
        builder = builder.header(name, value);
    }
    Ok(builder.body(Body::from(resp_body)).unwrap_or_default())
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("json"))
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|kv| !kv.is_empty())
        .map(|kv| match kv.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (kv.to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pairs_split() {
        assert_eq!(
            query_pairs("a=1&b=two&flag"),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
        assert!(query_pairs("").is_empty());
    }

    #[test]
    fn test_json_media_type_detection() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        assert!(is_json(&headers));
        headers.insert(CONTENT_TYPE, "text/html".parse().unwrap());
        assert!(!is_json(&headers));
        assert!(!is_json(&HeaderMap::new()));
    }

    #[test]
    fn test_blocked_response_is_empty_403() {
        let resp = blocked_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
