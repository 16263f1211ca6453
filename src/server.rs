use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use http::StatusCode;
use tracing::{info, warn};

use crate::error::ProxyError;
use crate::proxy::{ProxyCore, ProxyRequest, ResponseBody};

const MAX_INBOUND_BODY: usize = 64 * 1024 * 1024;

pub fn router(core: Arc<ProxyCore>) -> Router {
    Router::new().fallback(handle).with_state(core)
}

pub async fn serve(listen: SocketAddr, core: Arc<ProxyCore>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(address = %listen, "proxy front-end listening");
    axum::serve(listener, router(core)).await?;
    Ok(())
}

/// Descriptor conversion only: axum request in, core response out.
async fn handle(State(core): State<Arc<ProxyCore>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_INBOUND_BODY).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "failed to read inbound request body");
            return error_response(StatusCode::BAD_REQUEST);
        }
    };

    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let proxy_request = ProxyRequest {
        method: parts.method,
        target,
        headers: parts.headers,
        body,
    };

    match core.handle(proxy_request).await {
        Ok(response) => {
            let body = match response.body {
                ResponseBody::Full(bytes) => Body::from(bytes),
                ResponseBody::Stream(stream) => Body::from_stream(stream),
            };
            let mut http_response = Response::new(body);
            *http_response.status_mut() = response.status;
            *http_response.headers_mut() = response.headers;
            http_response
        }
        Err(err @ ProxyError::InvalidTarget(_)) => {
            warn!(error = %err, "rejected inbound request");
            error_response(StatusCode::BAD_REQUEST)
        }
        Err(err) => {
            warn!(error = %err, "proxying failed");
            error_response(StatusCode::BAD_GATEWAY)
        }
    }
}

fn error_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}
