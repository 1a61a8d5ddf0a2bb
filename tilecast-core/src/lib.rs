//! # tilecast-core
//!
//! Sort-first distributed volume rendering: a composer splits its screen
//! into a grid of tiles, hands each tile to a render node as an off-center
//! frustum, and stitches the returned images back together.
//!
//! This crate contains:
//! - **Tiles**: `ScreenTile`, off-center projections and NDC placement
//! - **Protocol**: tagged little-endian messages and `MessageCodec`
//! - **Net**: connection-layer datagrams, chunking and reassembly over UDP
//! - **Session**: `SessionManager` (connect, accept, broadcast, poll) and
//!   throttled `StateSync`
//! - **Topology**: grid shape and tile assignment on membership changes
//! - **Compositor**: tile cache and the software `Framebuffer`
//! - **Render**: the `TileRenderer` seam and a CPU ray-marching renderer
//! - **Orchestrators**: `Composer` and `RenderNode` frame loops
//! - **Error**: `TileError` and `DecodeError`

pub mod composer;
pub mod compositor;
pub mod error;
pub mod message;
pub mod net;
pub mod node;
pub mod protocol;
pub mod render;
pub mod session;
pub mod tile;
pub mod tile_image;
pub mod topology;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use composer::{Composer, ComposerTick};
pub use compositor::{CompositeTarget, Compositor, Framebuffer};
pub use error::{DecodeError, RejectReason, TileError};
pub use message::MessageTag;
pub use net::{DEFAULT_SOCKET_BUFFER, Pacing};
pub use node::{NodeOptions, NodeTick, RenderNode};
pub use protocol::{Message, MessageCodec, RenderParameters, SceneState, TileImageFragment};
pub use render::{FlatRenderer, TileRenderer, VolumeRenderer};
pub use session::{
    ConnectionId, ConnectionInfo, DEFAULT_HOST, DEFAULT_MAX_PEERS, DEFAULT_PORT, Role,
    SessionConfig, SessionEvent, SessionManager, StateSync,
};
pub use tile::{CameraIntrinsics, GridSize, NdcRect, ScreenTile, TileIndex};
pub use tile_image::{ImageEncoding, TileImage};
pub use topology::{Regrid, TopologyController, compute_grid};
