//! HTTP status interface.
//!
//! A thin veneer over `SharedState`:
//! - `GET /health`
//! - `GET /parking_data`: aggregate availability plus manual overrides
//! - `GET /get_frame_camN`: lane N's annotated frame as base64 JPEG
//! - `POST /set_lane_status/<lane>/<status>`: manual override (`F`/`E`)
//! - `POST /capture_images`: on-demand incident capture for every lane
//!
//! Each accepted connection is served on its own thread. When bound to a
//! loopback address, non-loopback peers get 403.

use anyhow::{anyhow, Result};
use serde_json::json;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::incident::IncidentCapturer;
use crate::state::SharedState;
use crate::LaneId;

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

/// What the routes need from the daemon.
#[derive(Clone)]
pub struct ApiContext {
    pub state: Arc<SharedState>,
    pub capturer: Arc<IncidentCapturer>,
}

pub struct ApiServer {
    addr: String,
    ctx: ApiContext,
}

impl ApiServer {
    pub fn new(addr: impl Into<String>, ctx: ApiContext) -> Self {
        Self {
            addr: addr.into(),
            ctx,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let ctx = self.ctx;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, ctx, shutdown_thread) {
                log::error!("status api stopped: {}", err);
            }
        });
        log::info!("status api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, ctx: ApiContext, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx) {
                        log::warn!("status api request rejected: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    let response = route(&request.method, &request.path, ctx);
    write_response(&mut stream, response.status, "application/json", &response.body)
}

/// Status code plus JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            body: value.to_string().into_bytes(),
        }
    }
}

/// Dispatch one request. No I/O on the connection happens here.
pub fn route(method: &str, path: &str, ctx: &ApiContext) -> ApiResponse {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (method, segments.as_slice()) {
        ("GET", ["health"]) => ApiResponse::json(200, json!({ "status": "ok" })),
        ("GET", ["parking_data"]) => ApiResponse::json(200, ctx.state.snapshot().to_json()),
        ("GET", [frame]) if frame.starts_with("get_frame_cam") => frame_response(frame, ctx),
        ("POST", ["set_lane_status", lane, status]) => set_lane_status(lane, status, ctx),
        ("POST", ["capture_images"]) => capture_images(ctx),
        (_, ["health"] | ["parking_data"] | ["capture_images"]) => {
            ApiResponse::json(405, json!({ "error": "method_not_allowed" }))
        }
        (_, ["set_lane_status", _, _]) => {
            ApiResponse::json(405, json!({ "error": "method_not_allowed" }))
        }
        _ => ApiResponse::json(404, json!({ "error": "not_found" })),
    }
}

fn frame_response(segment: &str, ctx: &ApiContext) -> ApiResponse {
    let lane = match segment
        .strip_prefix("get_frame_cam")
        .and_then(|n| n.parse::<LaneId>().ok())
    {
        Some(lane) => lane,
        None => return ApiResponse::json(404, json!({ "error": "not_found" })),
    };
    let image_data = match ctx.state.frame(lane) {
        Some(frame) => match frame.encode_base64_jpeg() {
            Ok(data) => data,
            Err(err) => {
                log::error!("encode lane {} frame: {:#}", lane, err);
                String::new()
            }
        },
        None => String::new(),
    };
    ApiResponse::json(200, json!({ "image_data": image_data }))
}

fn set_lane_status(lane: &str, status: &str, ctx: &ApiContext) -> ApiResponse {
    let invalid = || ApiResponse::json(400, json!({ "success": false, "message": "Invalid" }));
    let Ok(lane) = lane.parse::<LaneId>() else {
        return invalid();
    };
    match ctx.state.set_override(lane, status) {
        Ok(applied) => {
            log::info!("manual override: lane {} set to {}", lane, applied);
            ApiResponse::json(
                200,
                json!({ "success": true, "message": format!("Lane {} set to {}", lane, applied) }),
            )
        }
        Err(err) => {
            log::warn!("manual override rejected: {}", err);
            invalid()
        }
    }
}

fn capture_images(ctx: &ApiContext) -> ApiResponse {
    let messages: Vec<String> = ctx
        .state
        .frames()
        .into_iter()
        .map(|lane| ctx.capturer.capture(&lane.camera_id, Some(&lane.frame)).message)
        .collect();
    ApiResponse::json(200, json!({ "success": true, "messages": messages }))
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::{LaneLayout, LaneResult};
    use crate::frame::Frame;
    use crate::{SlotRect, SlotStatus};
    use image::Rgb;
    use serde_json::Value;

    fn ctx() -> ApiContext {
        let layouts: Vec<LaneLayout> = (1..=2)
            .map(|lane| LaneLayout {
                lane,
                camera_id: format!("cam{}", lane),
                location_id: 8,
                slots: vec![SlotRect::new(0, 0, 4, 4)],
                slot_offset: lane as u32 - 1,
            })
            .collect();
        ApiContext {
            state: Arc::new(SharedState::new(&layouts)),
            capturer: Arc::new(IncidentCapturer::new(
                std::env::temp_dir().join("parking-sentinel-api-unit"),
                None,
            )),
        }
    }

    fn body(resp: &ApiResponse) -> Value {
        serde_json::from_slice(&resp.body).unwrap()
    }

    #[test]
    fn override_route_accepts_codes_and_rejects_others() {
        let ctx = ctx();
        let ok = route("POST", "/set_lane_status/1/F", &ctx);
        assert_eq!(ok.status, 200);
        assert_eq!(body(&ok)["message"], "Lane 1 set to F");
        assert_eq!(ctx.state.override_for(1), Some(SlotStatus::Occupied));

        for path in ["/set_lane_status/1/X", "/set_lane_status/9/E", "/set_lane_status/a/E"] {
            let bad = route("POST", path, &ctx);
            assert_eq!(bad.status, 400, "{path}");
            assert_eq!(body(&bad), json!({ "success": false, "message": "Invalid" }));
        }
        assert_eq!(ctx.state.override_for(1), Some(SlotStatus::Occupied));
        assert_eq!(route("GET", "/set_lane_status/1/F", &ctx).status, 405);
    }

    #[test]
    fn frame_route_serves_empty_then_base64() {
        let ctx = ctx();
        let empty = route("GET", "/get_frame_cam1", &ctx);
        assert_eq!(body(&empty)["image_data"], "");

        {
            let mut guard = ctx.state.lock();
            guard.publish_lane(&LaneResult {
                lane: 1,
                occupied: 0,
                readings: Vec::new(),
                frame: Frame::filled(8, 8, Rgb([1, 2, 3])),
            });
        }
        let full = route("GET", "/get_frame_cam1", &ctx);
        assert!(!body(&full)["image_data"].as_str().unwrap().is_empty());
        assert_eq!(route("GET", "/get_frame_cam7", &ctx).status, 200);
        assert_eq!(route("GET", "/get_frame_camX", &ctx).status, 404);
    }

    #[test]
    fn unknown_paths_are_404() {
        let ctx = ctx();
        assert_eq!(route("GET", "/", &ctx).status, 404);
        assert_eq!(route("GET", "/events", &ctx).status, 404);
        assert_eq!(route("GET", "/health", &ctx).status, 200);
    }
}
