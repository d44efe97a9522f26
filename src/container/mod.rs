pub mod grid;
pub mod models;
pub mod scheduler;

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Domain face an excluded agent left through.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EscapeFace {
    XMin,
    XMax,
    YMin,
    YMax,
    ZMin,
    ZMax,
}

impl EscapeFace {
    pub const ALL: [EscapeFace; 6] = [
        EscapeFace::XMin,
        EscapeFace::XMax,
        EscapeFace::YMin,
        EscapeFace::YMax,
        EscapeFace::ZMin,
        EscapeFace::ZMax,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// First face (in axis order) that `position` lies strictly beyond, if
    /// any. Positions exactly on a face count as inside.
    pub fn of_position(position: DVec3, bounds: &[DVec3; 2]) -> Option<EscapeFace> {
        if position.x < bounds[0].x {
            Some(EscapeFace::XMin)
        } else if position.x > bounds[1].x {
            Some(EscapeFace::XMax)
        } else if position.y < bounds[0].y {
            Some(EscapeFace::YMin)
        } else if position.y > bounds[1].y {
            Some(EscapeFace::YMax)
        } else if position.z < bounds[0].z {
            Some(EscapeFace::ZMin)
        } else if position.z > bounds[1].z {
            Some(EscapeFace::ZMax)
        } else {
            None
        }
    }
}

/// What happens to an agent whose position update leaves the domain.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum OutOfDomainPolicy {
    /// Park the agent in a per-face escape list. It stays addressable and
    /// keeps its state, but is deactivated and dropped from every scheduled
    /// pass.
    #[default]
    Exclude,
    /// Clamp the position onto the domain boundary and keep the agent active.
    ClampToBoundary,
}
