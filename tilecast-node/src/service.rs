//! Render node service: connect, then tick until stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use glam::Vec3;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use tilecast_core::{FlatRenderer, NodeTick, RenderNode, TileRenderer, VolumeRenderer};

use crate::config::{NodeConfig, RendererKind};

// ── NodeService ──────────────────────────────────────────────────

pub struct NodeService {
    config: NodeConfig,
    running: Arc<AtomicBool>,
}

impl NodeService {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for stopping the service from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Build the configured tile renderer.
    pub fn renderer(&self) -> Box<dyn TileRenderer> {
        match self.config.render.renderer {
            RendererKind::Volume => {
                let [r, g, b] = self.config.render.background;
                Box::new(
                    VolumeRenderer::with_default_field(self.config.render.steps)
                        .with_background(Vec3::new(r, g, b)),
                )
            }
            RendererKind::Flat => Box::new(FlatRenderer::new()),
        }
    }

    /// Connect to the composer and run the frame loop until stopped or
    /// the composer goes away.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.running.store(true, Ordering::SeqCst);

        let network = &self.config.network;
        let mut node = tokio::select! {
            node = RenderNode::connect(
                &network.composer_address,
                network.port,
                self.config.to_session_config(),
                self.renderer(),
                self.config.to_node_options(),
            ) => node?,
            _ = Self::wait_for_stop(&self.running) => {
                info!("stopped before connecting");
                return Ok(());
            }
        };
        info!(
            composer = %format!("{}:{}", network.composer_address, network.port),
            local = %node.session().local_addr(),
            "render node connected"
        );

        let rate = self.config.render.tick_rate.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(rate)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut drain = tokio::time::interval(Duration::from_millis(network.poll_interval_ms.max(1)));
        drain.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = drain.tick() => {
                    node.pump(Instant::now());
                    continue;
                }
                _ = Self::wait_for_stop(&self.running) => break,
            }
            if node.tick(Instant::now()) == NodeTick::Disconnected {
                warn!("composer gone, exiting");
                break;
            }
        }

        info!(frames = node.frames_sent(), "render node stopping");
        node.shutdown();
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_configured_renderer() {
        let mut config = NodeConfig::default();
        config.render.renderer = RendererKind::Flat;
        let service = NodeService::new(config);
        assert!(service.renderer().tile().is_none());
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn unreachable_composer_fails() {
        let mut config = NodeConfig::default();
        config.network.connect_timeout_ms = 50;
        config.network.port = {
            let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            silent.local_addr().unwrap().port()
        };
        let service = NodeService::new(config);
        assert!(service.run().await.is_err());
    }
}
