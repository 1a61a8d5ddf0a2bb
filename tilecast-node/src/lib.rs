//! # tilecast-node: Render Node
//!
//! Connects to a tilecast composer, receives a screen tile plus the
//! scene state, renders that tile with the CPU volume renderer and
//! streams the encoded image back. Exits when the composer goes away.

pub mod config;
pub mod service;
