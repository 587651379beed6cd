use serde::{Deserialize, Serialize};

/// Neighbour search used to assemble corner candidates into a grid.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    /// Candidates closer than this (pixels) are never neighbours.
    pub min_spacing_pix: f32,
    /// Candidates farther than this (pixels) are never neighbours.
    pub max_spacing_pix: f32,
    /// How many nearest candidates to inspect per corner.
    pub k_neighbors: usize,
    /// Accept edges up to this multiple of a corner's nearest-neighbour distance.
    pub spacing_ratio: f32,
    /// Maximum deviation (degrees) of an edge from the dominant grid axes.
    pub orientation_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 4.0,
            max_spacing_pix: 400.0,
            k_neighbors: 8,
            spacing_ratio: 1.3,
            orientation_tolerance_deg: 30.0,
        }
    }
}

/// Gradient-based corner refinement.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SubPixParams {
    /// Half side of the search window; the window spans `2 * half_window + 1` pixels.
    pub half_window: u32,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self { half_window: 11 }
    }
}

/// Parameters of the chessboard detector.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    /// ChESS response threshold relative to the strongest response in the image.
    pub threshold_rel: f32,
    pub graph: GridGraphParams,
    pub subpix: SubPixParams,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            graph: GridGraphParams::default(),
            subpix: SubPixParams::default(),
        }
    }
}
