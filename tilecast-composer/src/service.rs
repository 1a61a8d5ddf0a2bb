//! Composer service: the frame loop.
//!
//! Each frame advances the orbit camera, pushes the new scene state,
//! ticks the [`Composer`] into a software framebuffer and, when
//! configured, periodically saves that framebuffer as a PNG.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use tilecast_core::{Composer, Framebuffer, TileError};

use crate::camera::OrbitCamera;
use crate::config::ComposerConfig;

// ── ComposerService ──────────────────────────────────────────────

pub struct ComposerService {
    config: ComposerConfig,
    running: Arc<AtomicBool>,
}

impl ComposerService {
    pub fn new(config: ComposerConfig) -> Self {
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

    /// Bind and configure a composer from the loaded config.
    pub fn start_composer(&self) -> Result<Composer, TileError> {
        let mut composer = Composer::start(
            self.config.bind_addr()?,
            self.config.to_session_config(),
            self.config.camera_intrinsics(),
            self.config.network.updates_per_second,
            self.config.composite.background,
        )?;
        composer.set_render_parameters(self.config.render_parameters())?;
        if let Some([x, y]) = self.config.composite.tiles {
            // No nodes yet: the override sticks even though the regrid fails.
            if let Err(e) = composer.change_number_of_tiles(Some((x, y))) {
                debug!(error = %e, "tile override recorded");
            }
        }
        Ok(composer)
    }

    /// Run the frame loop until stopped.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.running.store(true, Ordering::SeqCst);

        let mut composer = self.start_composer()?;
        let intrinsics = self.config.camera_intrinsics();
        let mut camera = OrbitCamera::new(
            self.config.camera.orbit_radius,
            self.config.camera.orbit_height,
            self.config.camera.orbit_speed,
        );
        let mut framebuffer = Framebuffer::new(intrinsics.screen_width, intrinsics.screen_height);
        let snapshot = self.config.snapshot_path();
        let snapshot_every = Duration::from_secs(self.config.composite.snapshot_interval_secs.max(1));
        info!(
            local = %composer.local_addr(),
            width = intrinsics.screen_width,
            height = intrinsics.screen_height,
            "composer running"
        );

        let rate = self.config.composite.frame_rate.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(rate)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Paced sends and inbound fragments move between frames.
        let mut drain = tokio::time::interval(Duration::from_millis(self.config.network.poll_interval_ms.max(1)));
        drain.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_frame = Instant::now();
        let mut last_snapshot = Instant::now();
        let mut frames: u64 = 0;

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = drain.tick() => {
                    composer.pump(Instant::now());
                    continue;
                }
                _ = Self::wait_for_stop(&self.running) => break,
            }

            let now = Instant::now();
            let dt = now.saturating_duration_since(last_frame);
            last_frame = now;

            camera.advance(dt);
            match camera.scene_state(&intrinsics, dt) {
                Ok(state) => composer.set_scene_state(state),
                Err(e) => warn!(error = %e, "cannot build scene state"),
            }

            let summary = composer.tick(now, &mut framebuffer);
            if summary.joined > 0 || summary.left > 0 {
                info!(
                    peers = composer.topology().peers().len(),
                    grid = ?composer.grid(),
                    "render nodes changed"
                );
            }
            frames += 1;

            if let Some(path) = &snapshot {
                if composer.is_active() && now.saturating_duration_since(last_snapshot) >= snapshot_every {
                    last_snapshot = now;
                    Self::save_snapshot(&framebuffer, path);
                }
            }
        }

        info!(frames, "composer stopping");
        composer.shutdown();
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn save_snapshot(framebuffer: &Framebuffer, path: &Path) {
        match framebuffer.save_png(path) {
            Ok(()) => debug!(path = %path.display(), "snapshot written"),
            Err(e) => warn!(path = %path.display(), error = %e, "snapshot failed"),
        }
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

    fn config() -> ComposerConfig {
        let mut config = ComposerConfig::default();
        config.network.port = 0;
        config.camera.screen_width = 16;
        config.camera.screen_height = 16;
        config
    }

    #[test]
    fn starts_inactive_on_ephemeral_port() {
        let service = ComposerService::new(config());
        let composer = service.start_composer().unwrap();
        assert_ne!(composer.local_addr().port(), 0);
        assert!(!composer.is_active());
        assert_eq!(composer.render_parameters(), service.config.render_parameters());
    }

    #[test]
    fn invalid_render_parameters_refuse_start() {
        let mut cfg = config();
        cfg.render.opacity = 5.0;
        let service = ComposerService::new(cfg);
        assert!(matches!(
            service.start_composer(),
            Err(TileError::InvalidRenderParameters { .. })
        ));
    }

    #[tokio::test]
    async fn stop_handle_ends_loop() {
        let service = Arc::new(ComposerService::new(config()));
        let stop = service.stop_handle();
        let runner = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.run().await.map_err(|e| e.to_string()) })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(service.is_running());
        stop.store(false, Ordering::SeqCst);
        runner.await.unwrap().unwrap();
        assert!(!service.is_running());
    }
}
