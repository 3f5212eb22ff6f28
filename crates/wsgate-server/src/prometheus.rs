//! Prometheus metrics HTTP endpoint.
//!
//! Provides a minimal HTTP server that exposes gateway metrics in
//! Prometheus exposition format. Runs in a dedicated thread with blocking
//! I/O and reads nothing but atomics.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::metrics::GatewayMetrics;

/// Start the Prometheus metrics HTTP server in a background thread.
pub fn start_metrics_server(bind: SocketAddr, metrics: Arc<GatewayMetrics>, start_time: Instant) {
    thread::Builder::new()
        .name("prometheus".to_string())
        .spawn(move || {
            if let Err(e) = run_metrics_server(bind, metrics, start_time) {
                error!("Prometheus metrics server error: {}", e);
            }
        })
        .expect("Failed to spawn prometheus thread");

    info!("Prometheus metrics endpoint enabled at http://{}/metrics", bind);
}

/// Run the metrics HTTP server (blocking).
fn run_metrics_server(
    bind: SocketAddr,
    metrics: Arc<GatewayMetrics>,
    start_time: Instant,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind)?;

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if let Err(e) = handle_request(stream, &metrics, start_time) {
                    debug!("Metrics request error: {}", e);
                }
            }
            Err(e) => {
                warn!("Metrics accept error: {}", e);
            }
        }
    }

    Ok(())
}

/// Handle a single HTTP request.
fn handle_request(
    mut stream: TcpStream,
    metrics: &GatewayMetrics,
    start_time: Instant,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(std::time::Duration::from_secs(5)))?;
    stream.set_write_timeout(Some(std::time::Duration::from_secs(5)))?;

    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    // Parse request line: "GET /metrics HTTP/1.1"
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return send_response(&mut stream, 400, "Bad Request", "Invalid request");
    }

    let method = parts[0];
    let path = parts[1];

    if method != "GET" {
        return send_response(&mut stream, 405, "Method Not Allowed", "Only GET is supported");
    }

    if path != "/metrics" && path != "/metrics/" {
        return send_response(&mut stream, 404, "Not Found", "Use /metrics");
    }

    // Drain the rest of the request headers
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.trim().is_empty() {
            break;
        }
    }

    let body = format_metrics(metrics, start_time);
    send_response(&mut stream, 200, "OK", &body)
}

/// Send an HTTP response.
fn send_response(
    stream: &mut TcpStream,
    status: u16,
    status_text: &str,
    body: &str,
) -> std::io::Result<()> {
    let content_type = if status == 200 {
        "text/plain; version=0.0.4; charset=utf-8"
    } else {
        "text/plain; charset=utf-8"
    };

    let response = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        content_type,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes())?;
    stream.flush()
}

/// Format all metrics in Prometheus exposition format.
fn format_metrics(metrics: &GatewayMetrics, start_time: Instant) -> String {
    let mut out = String::with_capacity(4096);

    macro_rules! counter {
        ($name:expr, $help:expr, $value:expr) => {
            out.push_str("# HELP ");
            out.push_str($name);
            out.push(' ');
            out.push_str($help);
            out.push('\n');
            out.push_str("# TYPE ");
            out.push_str($name);
            out.push_str(" counter\n");
            out.push_str($name);
            out.push(' ');
            out.push_str(&$value.to_string());
            out.push('\n');
        };
    }

    macro_rules! gauge {
        ($name:expr, $help:expr, $value:expr) => {
            out.push_str("# HELP ");
            out.push_str($name);
            out.push(' ');
            out.push_str($help);
            out.push('\n');
            out.push_str("# TYPE ");
            out.push_str($name);
            out.push_str(" gauge\n");
            out.push_str($name);
            out.push(' ');
            out.push_str(&$value.to_string());
            out.push('\n');
        };
    }

    gauge!(
        "wsgate_uptime_seconds",
        "Gateway uptime in seconds",
        start_time.elapsed().as_secs()
    );

    gauge!(
        "wsgate_connections_open",
        "Number of currently open connections",
        metrics.connections_open.load(Ordering::Relaxed)
    );

    counter!(
        "wsgate_connections_total",
        "Total accepted connections",
        metrics.connections_total.load(Ordering::Relaxed)
    );

    counter!(
        "wsgate_handshake_failures_total",
        "Upgrade handshakes that failed or were refused",
        metrics.handshake_failures.load(Ordering::Relaxed)
    );

    gauge!(
        "wsgate_subscriptions_active",
        "Currently active subscriptions",
        metrics.subscriptions_active.load(Ordering::Relaxed)
    );

    gauge!(
        "wsgate_topics_active",
        "Currently known topics",
        metrics.topics_active.load(Ordering::Relaxed)
    );

    counter!(
        "wsgate_subscribes_total",
        "Total subscribe requests accepted",
        metrics.subscribes_total.load(Ordering::Relaxed)
    );

    counter!(
        "wsgate_unsubscribes_total",
        "Total unsubscribe requests accepted",
        metrics.unsubscribes_total.load(Ordering::Relaxed)
    );

    counter!(
        "wsgate_publishes_received_total",
        "Publish frames received from local clients",
        metrics.publishes_received.load(Ordering::Relaxed)
    );

    counter!(
        "wsgate_remote_publishes_total",
        "Publishes forwarded in from other workers",
        metrics.remote_publishes.load(Ordering::Relaxed)
    );

    counter!(
        "wsgate_messages_delivered_total",
        "Messages handed to subscriber transports",
        metrics.messages_delivered.load(Ordering::Relaxed)
    );

    counter!(
        "wsgate_delivery_failures_total",
        "Deliveries that failed and evicted the subscriber",
        metrics.delivery_failures.load(Ordering::Relaxed)
    );

    counter!(
        "wsgate_rejects_total",
        "Requests rejected with an explicit reject frame",
        metrics.rejects_total.load(Ordering::Relaxed)
    );

    counter!(
        "wsgate_bridge_degraded_total",
        "Times the presence bridge dropped to local-only mode",
        metrics.bridge_degraded_total.load(Ordering::Relaxed)
    );

    counter!(
        "wsgate_forced_closes_total",
        "Connections force-closed at the shutdown deadline",
        metrics.forced_closes.load(Ordering::Relaxed)
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_metrics() {
        let metrics = Arc::new(GatewayMetrics::new());
        let start_time = Instant::now();

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.publish_received();
        metrics.delivered(5);

        let output = format_metrics(&metrics, start_time);

        assert!(output.contains("wsgate_uptime_seconds"));
        assert!(output.contains("wsgate_connections_open 2"));
        assert!(output.contains("wsgate_publishes_received_total 1"));
        assert!(output.contains("wsgate_messages_delivered_total 5"));
        assert!(output.contains("# TYPE wsgate_connections_open gauge"));
        assert!(output.contains("# TYPE wsgate_publishes_received_total counter"));
    }
}
