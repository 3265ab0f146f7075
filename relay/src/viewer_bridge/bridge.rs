use crate::viewer_bridge::hub::ViewerHub;
use crate::viewer_bridge::model::StatusBoard;
use anyhow::Context;
use dwellcore::detection::Classification;
use dwellcore::viewer::ViewerMessage;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use warp::hyper::body::Bytes;
use warp::ws::{Message, WebSocket, Ws};
use warp::{http::StatusCode, Filter, Rejection, Reply};

const MAX_FRAME_BYTES: u64 = 8 * 1024 * 1024;

/// HTTP surface: viewer WebSocket, status, and capture push endpoints.
pub fn routes(
    hub: ViewerHub,
    frames: mpsc::Sender<Classification>,
    status: Arc<StatusBoard>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let hub_filter = warp::any().map(move || hub.clone());
    let frames_filter = warp::any().map(move || frames.clone());
    let status_filter = warp::any().map(move || status.clone());

    let ws_route = warp::path("ws")
        .and(warp::ws())
        .and(hub_filter.clone())
        .map(|ws: Ws, hub: ViewerHub| ws.on_upgrade(move |socket| viewer_session(socket, hub)));

    let status_route = warp::path("status")
        .and(warp::get())
        .and(status_filter)
        .and(hub_filter.clone())
        .map(|status: Arc<StatusBoard>, hub: ViewerHub| {
            warp::reply::json(&status.snapshot(hub.viewer_count()))
        });

    let frame_route = warp::path("frame")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_FRAME_BYTES))
        .and(warp::body::bytes())
        .and(hub_filter)
        .map(|body: Bytes, hub: ViewerHub| {
            hub.publish_image(&body);
            warp::reply::with_status(
                warp::reply::json(&json!({"status": "ok"})),
                StatusCode::ACCEPTED,
            )
        });

    let classify_route = warp::path("classify")
        .and(warp::post())
        .and(warp::body::json())
        .and(frames_filter)
        .and_then(
            |classification: Classification, frames: mpsc::Sender<Classification>| async move {
                let (body, code) = match frames.send(classification).await {
                    Ok(()) => (json!({"status": "ok"}), StatusCode::ACCEPTED),
                    Err(_) => {
                        warn!("classification dropped: pipeline stopped");
                        (
                            json!({"status": "unavailable"}),
                            StatusCode::SERVICE_UNAVAILABLE,
                        )
                    }
                };
                Ok::<_, Rejection>(warp::reply::with_status(
                    warp::reply::json(&body),
                    code,
                ))
            },
        );

    ws_route
        .or(status_route)
        .or(frame_route)
        .or(classify_route)
}

/// Binds the server and runs it until `shutdown` flips.
pub fn spawn_server(
    hub: ViewerHub,
    frames: mpsc::Sender<Classification>,
    status: Arc<StatusBoard>,
    bind: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let (addr, server) = warp::serve(routes(hub, frames, status))
        .try_bind_with_graceful_shutdown(bind, async move {
            let _ = shutdown.changed().await;
        })
        .with_context(|| format!("binding viewer bridge on {}", bind))?;
    Ok((addr, tokio::spawn(server)))
}

async fn viewer_session(socket: WebSocket, hub: ViewerHub) {
    let (mut tx, mut rx) = socket.split();
    let mut updates = hub.subscribe();
    info!("viewer connected ({} watching)", hub.viewer_count());

    if let Err(err) = send_message(&mut tx, &hub.hello()).await {
        debug!("viewer left before hello: {}", err);
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(message) => {
                    if let Err(err) = send_message(&mut tx, &message).await {
                        debug!("viewer send failed: {}", err);
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("slow viewer skipped {} message(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = rx.next() => match incoming {
                Some(Ok(message)) if message.is_close() => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("viewer socket error: {}", err);
                    break;
                }
                None => break,
            },
        }
    }
    info!("viewer disconnected");
}

async fn send_message(
    tx: &mut SplitSink<WebSocket, Message>,
    message: &ViewerMessage,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(message).context("encoding viewer message")?;
    tx.send(Message::text(text))
        .await
        .context("writing to viewer socket")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewer_bridge::hub::tests::model;
    use dwellcore::telemetry::PipelineMetrics;

    fn fixture() -> (
        ViewerHub,
        mpsc::Receiver<Classification>,
        impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + 'static,
    ) {
        let metrics = Arc::new(PipelineMetrics::new());
        let hub = ViewerHub::new(8, &model(), metrics.clone());
        let status = Arc::new(StatusBoard::new(metrics, "memory".into()));
        let (tx, rx) = mpsc::channel(4);
        let filter = routes(hub.clone(), tx, status);
        (hub, rx, filter)
    }

    #[tokio::test]
    async fn classify_forwards_to_pipeline() {
        let (_hub, mut rx, filter) = fixture();
        let response = warp::test::request()
            .method("POST")
            .path("/classify")
            .json(&json!({
                "boundingBoxes": [{"label": "coffee-cup", "value": 0.9, "x": 1, "y": 2, "width": 3, "height": 4}],
                "timingMs": 9
            }))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.timing_ms, 9);
        assert_eq!(received.detections[0].label, "coffee-cup");
    }

    #[tokio::test]
    async fn classify_after_pipeline_stops_is_unavailable() {
        let (_hub, rx, filter) = fixture();
        drop(rx);
        let response = warp::test::request()
            .method("POST")
            .path("/classify")
            .json(&json!({"boundingBoxes": [], "timingMs": 1}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "unavailable");
    }

    #[tokio::test]
    async fn frame_push_reaches_viewers() {
        let (hub, _rx, filter) = fixture();
        let mut viewer = hub.subscribe();
        let response = warp::test::request()
            .method("POST")
            .path("/frame")
            .body(vec![0xff, 0xd8, 0xff])
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            viewer.recv().await.unwrap(),
            ViewerMessage::Image {
                data: "/9j/".into()
            }
        );
    }

    #[tokio::test]
    async fn status_reports_sink() {
        let (_hub, _rx, filter) = fixture();
        let response = warp::test::request()
            .method("GET")
            .path("/status")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["sink"], "memory");
    }

    #[tokio::test]
    async fn websocket_greets_then_forwards() {
        let (hub, _rx, filter) = fixture();
        let mut client = warp::test::ws()
            .path("/ws")
            .handshake(filter)
            .await
            .expect("handshake");

        let hello = client.recv().await.unwrap();
        let hello: serde_json::Value = serde_json::from_str(hello.to_str().unwrap()).unwrap();
        assert_eq!(hello["type"], "hello");
        assert_eq!(hello["projectName"], "desk cam");

        hub.publish_image_base64("AAAA".into());
        let image = client.recv().await.unwrap();
        let image: serde_json::Value = serde_json::from_str(image.to_str().unwrap()).unwrap();
        assert_eq!(image["type"], "image");
        assert_eq!(image["data"], "AAAA");
    }

    #[tokio::test]
    async fn server_binds_ephemeral_port_and_stops_on_shutdown() {
        let metrics = Arc::new(PipelineMetrics::new());
        let hub = ViewerHub::new(8, &model(), metrics.clone());
        let status = Arc::new(StatusBoard::new(metrics, "memory".into()));
        let (frames, _rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (addr, handle) = spawn_server(
            hub,
            frames,
            status,
            SocketAddr::from(([127, 0, 0, 1], 0)),
            shutdown_rx,
        )
        .unwrap();
        assert_ne!(addr.port(), 0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
