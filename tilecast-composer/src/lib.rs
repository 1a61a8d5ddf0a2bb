//! # tilecast-composer: Composer
//!
//! Owns the full screen. Accepts render nodes, splits the screen into
//! tiles among them, animates an orbit camera whose scene state is
//! broadcast to every node, and stitches the returned tile images into
//! a software framebuffer that can be snapshotted to PNG.

pub mod camera;
pub mod config;
pub mod service;
