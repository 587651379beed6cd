//! 4-connected grid graph over corner candidates.
//!
//! Each candidate keeps at most one neighbour per grid direction. Directions
//! are measured in a frame rotated to the dominant edge orientation, so
//! boards rotated by any in-plane angle produce consistent labels. Only
//! reciprocal edges survive.

use crate::params::GridGraphParams;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Point2, Vector2};
use std::collections::{HashMap, VecDeque};
use std::f32::consts::{FRAC_PI_2, PI};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    pub fn opposite(self) -> Self {
        match self {
            Self::Right => Self::Left,
            Self::Left => Self::Right,
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    /// Grid step `(di, dj)` along this direction.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Self::Right => (1, 0),
            Self::Left => (-1, 0),
            Self::Up => (0, -1),
            Self::Down => (0, 1),
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Right => 0,
            Self::Left => 1,
            Self::Up => 2,
            Self::Down => 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    /// Angular deviation from the grid axis; smaller is better.
    pub score: f32,
}

fn direction_quadrant(v: &Vector2<f32>) -> NeighborDirection {
    if v.x.abs() > v.y.abs() {
        if v.x >= 0.0 {
            NeighborDirection::Right
        } else {
            NeighborDirection::Left
        }
    } else if v.y >= 0.0 {
        NeighborDirection::Down
    } else {
        NeighborDirection::Up
    }
}

fn rotate(v: &Vector2<f32>, angle: f32) -> Vector2<f32> {
    let (s, c) = angle.sin_cos();
    Vector2::new(c * v.x - s * v.y, s * v.x + c * v.y)
}

/// Deviation of `v` from the nearest of the x/y axes, in `[0, π/4]`.
fn axis_deviation(v: &Vector2<f32>) -> f32 {
    let a = v.y.abs().atan2(v.x.abs());
    a.min(FRAC_PI_2 - a)
}

/// Dominant grid axis angle from edge vectors, modulo π/2.
///
/// Edges along either grid axis agree in quadruple-angle space.
fn dominant_axis_angle(edges: &[Vector2<f32>]) -> f32 {
    let mut sum = Vector2::<f32>::zeros();
    for e in edges {
        let theta = e.y.atan2(e.x);
        sum += Vector2::new((4.0 * theta).cos(), (4.0 * theta).sin());
    }
    if sum.norm_squared() < 1e-12 {
        return 0.0;
    }
    let mut angle = 0.25 * sum.y.atan2(sum.x);
    // keep the axis closest to the image x axis
    while angle > PI / 4.0 {
        angle -= FRAC_PI_2;
    }
    while angle < -PI / 4.0 {
        angle += FRAC_PI_2;
    }
    angle
}

/// Keep at most one neighbor per direction, choosing the lowest-score candidate.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];

    for candidate in candidates {
        let slot = &mut best[candidate.direction.slot()];
        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.distance < current.distance
                    || (candidate.distance == current.distance && candidate.score < current.score)
            }
        };
        if replace {
            *slot = Some(candidate);
        }
    }

    best.into_iter().flatten().collect()
}

pub struct GridGraph {
    /// Rotation (radians) from image axes to grid axes.
    pub axis_angle: f32,
    pub neighbors: Vec<Vec<NodeNeighbor>>, // For each node, list of neighbors
}

impl GridGraph {
    pub fn new(points: &[Point2<f32>], params: &GridGraphParams) -> Self {
        let n = points.len();
        if n < 2 {
            return Self {
                axis_angle: 0.0,
                neighbors: vec![Vec::new(); n],
            };
        }

        let coords = points.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();
        let max_sq = params.max_spacing_pix * params.max_spacing_pix;

        // candidate edges within the spacing window of each node's nearest neighbour
        let mut candidates: Vec<Vec<(usize, Vector2<f32>, f32)>> = Vec::with_capacity(n);
        for (i, p) in points.iter().enumerate() {
            let found = tree.within::<SquaredEuclidean>(&[p.x, p.y], max_sq);
            let near: Vec<(usize, Vector2<f32>, f32)> = found
                .into_iter()
                .filter(|nn| nn.item as usize != i)
                .map(|nn| {
                    let j = nn.item as usize;
                    (j, points[j] - p, nn.distance.sqrt())
                })
                .filter(|(_, _, d)| *d >= params.min_spacing_pix)
                .take(params.k_neighbors)
                .collect();

            let nearest = near.iter().map(|c| c.2).fold(f32::INFINITY, f32::min);
            let limit = nearest * params.spacing_ratio;
            candidates.push(near.into_iter().filter(|c| c.2 <= limit).collect());
        }

        let edges: Vec<Vector2<f32>> = candidates
            .iter()
            .flat_map(|c| c.iter().map(|e| e.1))
            .collect();
        let axis_angle = dominant_axis_angle(&edges);
        let tol = params.orientation_tolerance_deg.to_radians();

        let mut neighbors: Vec<Vec<NodeNeighbor>> = candidates
            .into_iter()
            .map(|cands| {
                let kept = cands
                    .into_iter()
                    .filter_map(|(index, v, distance)| {
                        let local = rotate(&v, -axis_angle);
                        let score = axis_deviation(&local);
                        (score <= tol).then(|| NodeNeighbor {
                            direction: direction_quadrant(&local),
                            index,
                            distance,
                            score,
                        })
                    })
                    .collect();
                select_neighbors(kept)
            })
            .collect();

        // drop one-sided edges
        let lookup: Vec<[Option<usize>; 4]> = neighbors
            .iter()
            .map(|list| {
                let mut slots = [None; 4];
                for nb in list {
                    slots[nb.direction.slot()] = Some(nb.index);
                }
                slots
            })
            .collect();
        for (i, list) in neighbors.iter_mut().enumerate() {
            list.retain(|nb| lookup[nb.index][nb.direction.opposite().slot()] == Some(i));
        }

        Self {
            axis_angle,
            neighbors,
        }
    }

    pub fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut visited = vec![false; self.neighbors.len()];
        let mut components = Vec::new();

        for start in 0..self.neighbors.len() {
            if visited[start] {
                continue;
            }

            let mut component = Vec::new();
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                if visited[node] {
                    continue;
                }
                visited[node] = true;
                component.push(node);
                for neighbor in &self.neighbors[node] {
                    if !visited[neighbor.index] {
                        stack.push(neighbor.index);
                    }
                }
            }
            components.push(component);
        }

        components
    }

    /// BFS integer coordinates for one component, shifted so the minimum is `(0, 0)`.
    ///
    /// Returns `None` when two nodes claim the same cell or one node is
    /// reached with two different coordinates.
    pub fn assign_grid_coordinates(&self, component: &[usize]) -> Option<Vec<(usize, i32, i32)>> {
        let start = *component.first()?;
        let mut coords: HashMap<usize, (i32, i32)> = HashMap::with_capacity(component.len());
        let mut occupied: HashMap<(i32, i32), usize> = HashMap::with_capacity(component.len());
        let mut queue = VecDeque::new();

        coords.insert(start, (0, 0));
        occupied.insert((0, 0), start);
        queue.push_back(start);

        while let Some(node) = queue.pop_front() {
            let (i, j) = coords[&node];
            for neighbor in &self.neighbors[node] {
                let (di, dj) = neighbor.direction.offset();
                let cell = (i + di, j + dj);
                match coords.get(&neighbor.index) {
                    Some(&existing) if existing != cell => return None,
                    Some(_) => {}
                    None => {
                        if occupied.insert(cell, neighbor.index).is_some() {
                            return None;
                        }
                        coords.insert(neighbor.index, cell);
                        queue.push_back(neighbor.index);
                    }
                }
            }
        }

        let min_i = coords.values().map(|c| c.0).min()?;
        let min_j = coords.values().map(|c| c.1).min()?;
        let mut out: Vec<(usize, i32, i32)> = coords
            .into_iter()
            .map(|(idx, (i, j))| (idx, i - min_i, j - min_j))
            .collect();
        out.sort_by_key(|&(_, i, j)| (j, i));
        Some(out)
    }
}
