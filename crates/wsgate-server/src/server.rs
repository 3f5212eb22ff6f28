//! Gateway server - startup composition.
//!
//! Binds the listener, compiles the route table, starts the auxiliary
//! threads (presence bridge, metrics endpoint), and hands everything to
//! the worker event loop.

use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use mio::net::TcpListener;

use wsgate_core::{Error, Result};

use crate::auth::AuthProvider;
use crate::config::Config;
use crate::metrics::GatewayMetrics;
use crate::presence;
use crate::prometheus;
use crate::router::RouteTable;
use crate::shutdown::ShutdownToken;
use crate::worker::Worker;

/// The gateway server.
pub struct Server {
    listener: TcpListener,
    config: Arc<Config>,
    worker_id: String,
}

impl Server {
    /// Bind the listener and validate startup state.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let listener = TcpListener::bind(config.server.bind)?;
        info!("wsgate listening on {}", config.server.bind);

        let worker_id = if config.server.worker_id.is_empty() {
            format!("gw-{}", std::process::id())
        } else {
            config.server.worker_id.clone()
        };
        info!("Worker identity: {}", worker_id);

        Ok(Self {
            listener,
            config,
            worker_id,
        })
    }

    /// Run the gateway until the shutdown token stops the loop.
    pub fn run(self, shutdown: ShutdownToken) -> Result<()> {
        let metrics = Arc::new(GatewayMetrics::new());
        let start_time = Instant::now();

        let router = RouteTable::new(&self.config.route).map_err(Error::Config)?;
        if router.is_empty() {
            warn!("No routes configured; every request will be rejected as unknown");
        } else {
            info!("Compiled {} routes", router.len());
        }

        let auth = AuthProvider::from_config(&self.config);
        if auth.auth_enabled {
            info!(
                "Authentication enabled (allow_anonymous={})",
                auth.allow_anonymous
            );
        }
        if auth.acl_enabled {
            info!("Authorization checks enabled");
        }

        if self.config.prometheus.enabled {
            prometheus::start_metrics_server(
                self.config.prometheus.bind,
                Arc::clone(&metrics),
                start_time,
            );
        }

        let presence_handle = if self.config.presence.enabled {
            Some(presence::spawn(
                self.config.presence.clone(),
                self.worker_id.clone(),
            ))
        } else {
            info!("Presence bridge disabled, running local-only");
            None
        };

        let mut worker = Worker::new(
            self.listener,
            router,
            auth,
            presence_handle,
            metrics,
            Arc::clone(&self.config),
            shutdown,
        )?;

        worker.run()?;
        info!("Gateway stopped");
        Ok(())
    }
}
