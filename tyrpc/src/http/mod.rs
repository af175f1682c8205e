use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::{
    Method, Request, StatusCode,
    body::Incoming,
    header::{self, HeaderValue},
    server::conn::http1::Builder,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::{Error, ErrorKind, Metadata, Response, Result, State, resolve_batch};

mod multipart;

type HttpResponse = hyper::Response<Full<Bytes>>;

/// Serves one accepted TCP connection until it closes or the server stops.
pub(crate) fn serve_connection(state: &Arc<State>, stream: TcpStream, addr: SocketAddr) {
    let mut http = Builder::new();
    http.keep_alive(true);

    let service_state = state.clone();
    let connection = http
        .serve_connection(
            TokioIo::new(stream),
            hyper::service::service_fn(move |req: Request<Incoming>| {
                handle_request(service_state.clone(), req, addr)
            }),
        )
        .with_upgrades();

    state.supervisor.spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("connection {addr} failed: {e}");
        }
    });
}

async fn handle_request(
    state: Arc<State>,
    mut req: Request<Incoming>,
    addr: SocketAddr,
) -> std::result::Result<HttpResponse, Infallible> {
    if req.uri().path() != "/" {
        let mut rsp = hyper::Response::new(Full::new(Bytes::from_static(b"Not Found")));
        *rsp.status_mut() = StatusCode::NOT_FOUND;
        return Ok(rsp);
    }

    if req.method() == Method::OPTIONS {
        return Ok(preflight(&state));
    }

    if req.method() == Method::GET && hyper_tungstenite::is_upgrade_request(&req) {
        let metadata = Metadata::new(
            req.method().clone(),
            req.uri().clone(),
            req.headers().clone(),
            Some(addr),
        )
        .with_query_headers();
        let (rsp, websocket) = match hyper_tungstenite::upgrade(&mut req, None) {
            Ok(upgrade) => upgrade,
            Err(e) => {
                tracing::warn!("upgrade request from {addr} rejected: {e}");
                let mut rsp = hyper::Response::new(Full::new(Bytes::from(e.to_string())));
                *rsp.status_mut() = StatusCode::BAD_REQUEST;
                return Ok(rsp);
            }
        };

        let task_state = state.clone();
        state.supervisor.spawn(async move {
            match websocket.await {
                Ok(stream) => crate::ws::serve(&task_state, stream, metadata).await,
                Err(e) => tracing::warn!("upgrade {addr} to WebSocket failed: {e}"),
            }
        });
        return Ok(rsp);
    }

    if req.method() != Method::POST {
        let err = Error::new(ErrorKind::Protocol, r#"Only "POST" requests are allowed."#);
        return Ok(json_response(&state, StatusCode::METHOD_NOT_ALLOWED, &Response::error(&err)));
    }

    let metadata = Arc::new(Metadata::new(
        req.method().clone(),
        req.uri().clone(),
        req.headers().clone(),
        Some(addr),
    ));
    let rsp = match read_body(&state, req).await {
        Ok(body) => resolve_batch(&state.router, metadata, body).await,
        Err(err) => {
            tracing::warn!("reject batch from {addr}: {err}");
            Response::error(&err)
        }
    };
    Ok(json_response(&state, StatusCode::OK, &rsp))
}

async fn read_body(state: &State, req: Request<Incoming>) -> Result<crate::BatchBody> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("multipart/form-data") {
        return Err(Error::new(
            ErrorKind::Protocol,
            r#"Content type is not "multipart/form-data"."#,
        ));
    }
    let malformed = || Error::new(ErrorKind::Transport, "Malformed request.");
    let boundary = multer::parse_boundary(content_type).map_err(|_| malformed())?;

    let body = Limited::new(req.into_body(), state.config.max_body_size)
        .collect()
        .await
        .map_err(|e| {
            tracing::debug!("read body failed: {e}");
            malformed()
        })?
        .to_bytes();
    multipart::decode(body, boundary).await.map_err(|e| {
        tracing::debug!("decode body failed: {e}");
        malformed()
    })
}

fn preflight(state: &State) -> HttpResponse {
    let mut rsp = hyper::Response::new(Full::new(Bytes::new()));
    let headers = rsp.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, state.allow_origin.clone());
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("POST"));
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from(state.config.preflight_max_age),
    );
    rsp
}

fn json_response(state: &State, status: StatusCode, response: &Response) -> HttpResponse {
    let body = serde_json::to_vec(response).unwrap_or_default();
    let mut rsp = hyper::Response::new(Full::new(Bytes::from(body)));
    *rsp.status_mut() = status;
    let headers = rsp.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, state.allow_origin.clone());
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    rsp
}
