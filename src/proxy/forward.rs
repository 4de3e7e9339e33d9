//! Plain-HTTP forwarder (C2): handles every non-`CONNECT` request, which
//! arrives either in absolute-form (`GET http://host/path HTTP/1.1`, the
//! normal shape for a proxied plain-HTTP request) or origin-form with a
//! `Host` header.
//!
//! Uses a single shared `hyper::Client` — connection reuse beyond what
//! `hyper` already does on its own is out of scope here. Only
//! `proxy-connection` is stripped from request headers; everything else is
//! forwarded unchanged.

use hyper::http::request::Parts;
use hyper::{Body, Request, Response, StatusCode};
use url::Url;

use crate::models::body_preview;
use crate::proxy::listener::ProxyContext;
use crate::utils::http::{build_error_response, is_hop_by_hop_header};
use crate::utils::logging::{log_forwarded_response, log_upstream_error};
use crate::{HeaderMultiMap, RequestRecord};

/// Forward one non-`CONNECT` request to its origin and stream the response
/// back, emitting a request event and then a response event to the sink.
pub async fn handle(ctx: &ProxyContext, req: Request<Body>) -> Response<Body> {
    let method = req.method().to_string();
    let (parts, body) = req.into_parts();

    let target_url = match resolve_target_url(&parts) {
        Ok(url) => url,
        Err(e) => return build_error_response(StatusCode::BAD_REQUEST, &e),
    };

    let host = target_url.host_str().unwrap_or_default().to_ascii_lowercase();
    let path = match target_url.query() {
        Some(query) => format!("{}?{}", target_url.path(), query),
        None => target_url.path().to_string(),
    };
    let watched = ctx.watch_list.is_watched(&host);

    let body_bytes = match hyper::body::to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(e) => return build_error_response(StatusCode::BAD_GATEWAY, &format!("failed reading request body: {}", e)),
    };

    let mut record = RequestRecord::new(method.clone(), host.clone(), path.clone(), watched);
    if ctx.config.verbose {
        record.headers = Some(collect_headers(&parts));
    }
    if watched && matches!(method.as_str(), "POST" | "PUT" | "PATCH") && !body_bytes.is_empty() {
        record.body_preview = Some(body_preview(&body_bytes, ctx.config.max_body_preview_bytes));
    }
    ctx.sink.emit(&record);

    let mut upstream_req = Request::builder().method(parts.method.clone()).uri(target_url.as_str());
    for (name, value) in parts.headers.iter() {
        if name.as_str().eq_ignore_ascii_case("proxy-connection") {
            continue;
        }
        upstream_req = upstream_req.header(name, value);
    }
    let upstream_req = match upstream_req.body(Body::from(body_bytes)) {
        Ok(req) => req,
        Err(e) => return build_error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    match ctx.http_client.request(upstream_req).await {
        Ok(resp) => {
            let status = resp.status();
            let (resp_parts, resp_body) = resp.into_parts();
            let resp_bytes = hyper::body::to_bytes(resp_body).await.unwrap_or_default();

            let response_preview = if ctx.config.verbose && watched {
                Some(body_preview(&resp_bytes, ctx.config.max_body_preview_bytes))
            } else {
                None
            };
            ctx.sink.emit(&record.with_response(status.as_u16(), response_preview));
            log_forwarded_response(&method, &host, &path, status.as_u16());

            let mut response = Response::builder().status(status);
            for (name, value) in resp_parts.headers.iter() {
                // The response body below is always a fully buffered
                // `Body::from`, so any framing header the origin sent
                // (`content-length`, `transfer-encoding`, ...) would be
                // stale; hyper recomputes `content-length` from the body it
                // is given.
                if is_hop_by_hop_header(name.as_str()) || name.as_str().eq_ignore_ascii_case("content-length") {
                    continue;
                }
                response = response.header(name, value);
            }
            response
                .body(Body::from(resp_bytes))
                .unwrap_or_else(|_| Response::new(Body::empty()))
        }
        Err(e) => {
            log_upstream_error(&method, &host, &path, &e.to_string());
            build_error_response(StatusCode::BAD_GATEWAY, &format!("upstream error: {}", e))
        }
    }
}

fn collect_headers(parts: &Parts) -> HeaderMultiMap {
    let mut headers = HeaderMultiMap::new();
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            headers.push(name.as_str(), value.to_string());
        }
    }
    headers
}

/// Resolve the request's origin URL: absolute-form requests carry it in the
/// request line already; origin-form requests need the `Host` header
/// joined with the request-target's path and query.
fn resolve_target_url(parts: &Parts) -> Result<Url, String> {
    if parts.uri.scheme_str().is_some() {
        return Url::parse(&parts.uri.to_string()).map_err(|e| e.to_string());
    }

    let host = parts
        .headers
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing Host header".to_string())?;
    let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Url::parse(&format!("http://{}{}", host, path_and_query)).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Request;

    #[test]
    fn resolves_absolute_form_request() {
        let req = Request::builder()
            .method("GET")
            .uri("http://api.example.test/v1/items?limit=2")
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        let url = resolve_target_url(&parts).unwrap();
        assert_eq!(url.host_str(), Some("api.example.test"));
        assert_eq!(url.path(), "/v1/items");
        assert_eq!(url.query(), Some("limit=2"));
    }

    #[test]
    fn resolves_origin_form_request_via_host_header() {
        let req = Request::builder()
            .method("GET")
            .uri("/v1/items")
            .header("host", "api.example.test")
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        let url = resolve_target_url(&parts).unwrap();
        assert_eq!(url.host_str(), Some("api.example.test"));
        assert_eq!(url.path(), "/v1/items");
    }

    #[test]
    fn origin_form_without_host_header_is_rejected() {
        let req = Request::builder().method("GET").uri("/v1/items").body(()).unwrap();
        let (parts, _) = req.into_parts();
        assert!(resolve_target_url(&parts).is_err());
    }

    /// Scenario S1, end to end: `handle` forwards a plain GET to a real
    /// loopback "upstream", streams its response back verbatim, and emits a
    /// request record followed by a response record carrying `statusCode`.
    #[tokio::test]
    async fn handle_forwards_request_and_emits_request_then_response_records() {
        use crate::ca::CertificateAuthority;
        use crate::config::Config;
        use crate::sink::{RingBufferSubscriber, Sink};
        use crate::watch::WatchList;
        use std::sync::Arc;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let upstream = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let request_text = String::from_utf8_lossy(&buf[..n]).into_owned();
            assert!(request_text.starts_with("GET /hello"));
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi")
                .await
                .unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_init(dir.path()).unwrap();
        let ring = Arc::new(RingBufferSubscriber::new(10));
        let ctx = ProxyContext::new(
            Arc::new(Config::default()),
            Arc::new(WatchList::new(vec![])),
            Arc::new(ca),
            ring.clone(),
        );

        let req = Request::builder()
            .method("GET")
            .uri(format!("http://127.0.0.1:{}/hello", addr.port()))
            .body(Body::empty())
            .unwrap();

        let response = handle(&ctx, req).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"hi");

        upstream.await.unwrap();

        let records = ring.drain();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].method, "GET");
        assert_eq!(records[0].path, "/hello");
        assert!(records[0].status_code.is_none());
        assert_eq!(records[1].status_code, Some(200));
    }
}
