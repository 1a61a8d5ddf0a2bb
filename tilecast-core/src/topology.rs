//! Mapping connected render nodes onto a tile grid.
//!
//! The grid is recomputed from scratch on every membership or camera
//! change and every peer receives a fresh [`ScreenTile`]. Peers are
//! assigned tiles in connection order, tiles enumerated x-major.
//!
//! The default grid shape is `x = max(1, round(log2(n)))`, `y = n / x`.
//! For peer counts that do not factor that way the leftover peers get no
//! tile (8 peers → 3×2, two idle). An explicit override from
//! [`TopologyController::change_number_of_tiles`] replaces the heuristic.

use tracing::{info, warn};

use crate::error::TileError;
use crate::session::ConnectionId;
use crate::tile::{CameraIntrinsics, GridSize, ScreenTile};

/// Grid shape for `peers` render nodes.
pub fn compute_grid(peers: usize) -> Result<GridSize, TileError> {
    if peers == 0 {
        return Err(TileError::Topology("no render nodes connected".into()));
    }
    let x = ((peers as f64).log2().round() as usize).max(1);
    let y = peers / x;
    Ok(GridSize::new(x as u32, y as u32))
}

/// Outcome of one regrid.
#[derive(Debug, Clone, PartialEq)]
pub struct Regrid {
    pub grid: GridSize,
    /// Tiles in assignment order.
    pub assignments: Vec<(ConnectionId, ScreenTile)>,
    /// Peers left without a tile.
    pub unassigned: Vec<ConnectionId>,
}

pub struct TopologyController {
    camera: CameraIntrinsics,
    peers: Vec<ConnectionId>,
    override_grid: Option<GridSize>,
    current: Option<Regrid>,
}

impl TopologyController {
    pub fn new(camera: CameraIntrinsics) -> Self {
        Self {
            camera,
            peers: Vec::new(),
            override_grid: None,
            current: None,
        }
    }

    pub fn camera(&self) -> CameraIntrinsics {
        self.camera
    }

    /// Peers in connection order.
    pub fn peers(&self) -> &[ConnectionId] {
        &self.peers
    }

    pub fn grid(&self) -> Option<GridSize> {
        self.current.as_ref().map(|r| r.grid)
    }

    /// `false` while no grid is in effect.
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn assignments(&self) -> &[(ConnectionId, ScreenTile)] {
        self.current
            .as_ref()
            .map(|r| r.assignments.as_slice())
            .unwrap_or(&[])
    }

    pub fn tile_of(&self, peer: ConnectionId) -> Option<ScreenTile> {
        self.assignments()
            .iter()
            .find(|(id, _)| *id == peer)
            .map(|(_, tile)| *tile)
    }

    pub fn on_peer_connected(&mut self, peer: ConnectionId) -> Result<Regrid, TileError> {
        if !self.peers.contains(&peer) {
            self.peers.push(peer);
        }
        self.regrid()
    }

    pub fn on_peer_disconnected(&mut self, peer: ConnectionId) -> Result<Regrid, TileError> {
        self.peers.retain(|p| *p != peer);
        self.regrid()
    }

    /// Force a `w × h` grid, or restore the automatic shape with `None`.
    pub fn change_number_of_tiles(&mut self, tiles: Option<(u32, u32)>) -> Result<Regrid, TileError> {
        match tiles {
            Some((w, h)) if w == 0 || h == 0 => {
                return Err(TileError::Topology(format!("cannot use a {w}x{h} grid")));
            }
            Some((w, h)) => self.override_grid = Some(GridSize::new(w, h)),
            None => self.override_grid = None,
        }
        self.regrid()
    }

    /// Screen or camera change: every tile is recreated.
    pub fn set_camera(&mut self, camera: CameraIntrinsics) -> Result<Regrid, TileError> {
        self.camera = camera;
        self.regrid()
    }

    /// Recompute the grid and every assignment.
    pub fn regrid(&mut self) -> Result<Regrid, TileError> {
        self.current = None;
        if self.peers.is_empty() {
            info!("no render nodes, composer inactive");
            return Err(TileError::Topology("no render nodes connected".into()));
        }

        let grid = match self.override_grid {
            Some(grid) => grid,
            None => compute_grid(self.peers.len())?,
        };

        let mut assignments = Vec::with_capacity(grid.len().min(self.peers.len()));
        for (peer, index) in self.peers.iter().zip(grid.indices()) {
            assignments.push((*peer, ScreenTile::new(grid, index, self.camera)?));
        }
        let unassigned: Vec<ConnectionId> = self.peers.iter().skip(assignments.len()).copied().collect();

        info!(
            %grid,
            peers = self.peers.len(),
            assigned = assignments.len(),
            "regrid"
        );
        if !unassigned.is_empty() {
            warn!(
                %grid,
                idle = ?unassigned,
                "more render nodes than tiles, leftover peers receive no tile"
            );
        }

        let regrid = Regrid {
            grid,
            assignments,
            unassigned,
        };
        self.current = Some(regrid.clone());
        Ok(regrid)
    }
}

// ── Tests ────────────────────────────────────────────────────────
