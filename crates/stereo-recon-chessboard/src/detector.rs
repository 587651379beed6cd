use crate::gridgraph::GridGraph;
use crate::params::ChessboardParams;
use crate::pattern::{CalibrationPattern, ObservedCorners};
use crate::subpix::refine_corners;
use chess_corners::{find_chess_corners_image, ChessConfig};
use log::debug;
use nalgebra::{Point2, Vector2};
use std::collections::HashMap;
use stereo_recon_core::{GrayImageView, TermCriteria};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Finds the full inner-corner grid of a known chessboard.
///
/// Pipeline: ChESS candidates → 4-connected grid graph → exact
/// `cols x rows` window → canonical ordering → sub-pixel refinement.
#[derive(Clone, Debug, Default)]
pub struct ChessboardDetector {
    pub params: ChessboardParams,
    /// Stops the sub-pixel refinement of every corner.
    pub criteria: TermCriteria,
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self {
            params,
            criteria: TermCriteria::default(),
        }
    }

    pub fn with_criteria(mut self, criteria: TermCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn chess_config(&self) -> ChessConfig {
        let mut cfg = ChessConfig::single_scale();
        cfg.params.threshold_rel = self.params.threshold_rel;
        cfg.params.nms_radius = 2;
        cfg
    }

    /// Detect `pattern` in `image`; `None` when the complete grid is not visible.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, image, pattern),
            fields(width = image.width(), height = image.height())
        )
    )]
    pub fn detect(
        &self,
        image: &image::GrayImage,
        pattern: &CalibrationPattern,
    ) -> Option<ObservedCorners> {
        let raw = find_chess_corners_image(image, &self.chess_config());
        let candidates: Vec<Point2<f32>> = raw.iter().map(|c| Point2::new(c.x, c.y)).collect();
        debug!("{} ChESS candidates", candidates.len());

        let mut corners = self.detect_from_points(&candidates, pattern)?;
        let view = GrayImageView::from_image(image);
        refine_corners(&view, &mut corners.points, &self.params.subpix, &self.criteria);
        Some(corners)
    }

    /// Grid assembly and ordering only, without image refinement.
    pub fn detect_from_points(
        &self,
        candidates: &[Point2<f32>],
        pattern: &CalibrationPattern,
    ) -> Option<ObservedCorners> {
        let cols = pattern.cols as i32;
        let rows = pattern.rows as i32;
        let needed = pattern.corner_count();
        if candidates.len() < needed {
            debug!("{} candidates, need {needed}", candidates.len());
            return None;
        }

        let graph = GridGraph::new(candidates, &self.params.graph);
        let mut components = graph.connected_components();
        components.sort_by_key(|c| std::cmp::Reverse(c.len()));

        for component in components.iter().take_while(|c| c.len() >= needed) {
            let Some(coords) = graph.assign_grid_coordinates(component) else {
                debug!("component of {} nodes has conflicting coordinates", component.len());
                continue;
            };
            let cells: HashMap<(i32, i32), usize> =
                coords.iter().map(|&(idx, i, j)| ((i, j), idx)).collect();
            let Some(grid) = extract_window(&cells, cols, rows) else {
                continue;
            };
            let order = canonical_order(candidates, grid, cols, rows);
            let points = order
                .iter()
                .map(|&idx| Point2::new(candidates[idx].x as f64, candidates[idx].y as f64))
                .collect();
            return Some(ObservedCorners {
                cols: pattern.cols,
                rows: pattern.rows,
                points,
            });
        }

        debug!("no component matches a {cols}x{rows} grid");
        None
    }
}

/// Row-major node indices of a fully occupied `w x h` grid.
struct Window {
    w: i32,
    h: i32,
    nodes: Vec<usize>,
}

/// Locate the single fully occupied `cols x rows` (or `rows x cols`) window.
fn extract_window(cells: &HashMap<(i32, i32), usize>, cols: i32, rows: i32) -> Option<Window> {
    let max_i = cells.keys().map(|c| c.0).max()?;
    let max_j = cells.keys().map(|c| c.1).max()?;

    let mut shapes = vec![(cols, rows)];
    if cols != rows {
        shapes.push((rows, cols));
    }

    let mut found: Option<Window> = None;
    for (w, h) in shapes {
        for j0 in 0..=(max_j + 1 - h) {
            for i0 in 0..=(max_i + 1 - w) {
                let nodes: Option<Vec<usize>> = (0..h)
                    .flat_map(|j| (0..w).map(move |i| (i0 + i, j0 + j)))
                    .map(|cell| cells.get(&cell).copied())
                    .collect();
                if let Some(nodes) = nodes {
                    if found.is_some() {
                        debug!("ambiguous grid window");
                        return None;
                    }
                    found = Some(Window { w, h, nodes });
                }
            }
        }
    }
    found
}

fn remap(win: &Window, w: i32, h: i32, f: impl Fn(i32, i32) -> (i32, i32)) -> Window {
    let nodes = (0..h)
        .flat_map(|j| (0..w).map(move |i| (i, j)))
        .map(|(i, j)| {
            let (si, sj) = f(i, j);
            win.nodes[(sj * win.w + si) as usize]
        })
        .collect();
    Window { w, h, nodes }
}

/// Order a grid window row-major as `cols x rows`, right-handed in the
/// image (x right, y down).
///
/// Of the orderings that satisfy this (the 180° flip, plus the two quarter
/// turns for square boards) the one whose first corner has the smallest
/// `x + y` wins. A board lying on its side can therefore start at the top
/// right corner: its rows run down the image.
fn canonical_order(points: &[Point2<f32>], win: Window, cols: i32, rows: i32) -> Vec<usize> {
    let mut win = if win.w == cols {
        win
    } else {
        remap(&win, cols, rows, |i, j| (j, i))
    };

    let at = |win: &Window, i: i32, j: i32| -> Vector2<f64> {
        let p = points[win.nodes[(j * win.w + i) as usize]];
        Vector2::new(p.x as f64, p.y as f64)
    };
    let mut ei = Vector2::zeros();
    let mut ej = Vector2::zeros();
    for j in 0..rows {
        ei += at(&win, cols - 1, j) - at(&win, 0, j);
    }
    for i in 0..cols {
        ej += at(&win, i, rows - 1) - at(&win, i, 0);
    }
    if ei.x * ej.y - ei.y * ej.x < 0.0 {
        win = remap(&win, cols, rows, |i, j| (i, rows - 1 - j));
    }

    let mut options = vec![
        remap(&win, cols, rows, |i, j| (i, j)),
        remap(&win, cols, rows, |i, j| (cols - 1 - i, rows - 1 - j)),
    ];
    if cols == rows {
        let n = cols;
        options.push(remap(&win, n, n, |i, j| (j, n - 1 - i)));
        options.push(remap(&win, n, n, |i, j| (n - 1 - j, i)));
    }

    let origin_score = |w: &Window| {
        let p = points[w.nodes[0]];
        p.x as f64 + p.y as f64
    };
    options
        .into_iter()
        .min_by(|a, b| origin_score(a).total_cmp(&origin_score(b)))
        .map(|w| w.nodes)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(
        cols: usize,
        rows: usize,
        spacing: f32,
        angle: f32,
        origin: (f32, f32),
    ) -> Vec<Point2<f32>> {
        let (s, c) = angle.sin_cos();
        (0..rows)
            .flat_map(|j| {
                (0..cols).map(move |i| {
                    let x = i as f32 * spacing;
                    let y = j as f32 * spacing;
                    Point2::new(origin.0 + c * x - s * y, origin.1 + s * x + c * y)
                })
            })
            .collect()
    }

    fn assert_right_handed(found: &ObservedCorners) {
        let first = found.at(0, 0);
        let ei = found.at(1, 0) - first;
        let ej = found.at(0, 1) - first;
        assert!(ei.x * ej.y - ei.y * ej.x > 0.0, "grid must be right-handed");
        // the 180° flip is right-handed too and must not start lower
        let last = found.at(found.cols - 1, found.rows - 1);
        assert!(first.x + first.y <= last.x + last.y);
    }

    fn assert_starts_at_min_corner(found: &ObservedCorners) {
        let corners = [
            found.at(0, 0),
            found.at(found.cols - 1, 0),
            found.at(0, found.rows - 1),
            found.at(found.cols - 1, found.rows - 1),
        ];
        let min_sum = corners
            .iter()
            .map(|p| p.x + p.y)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(found.at(0, 0).x + found.at(0, 0).y, min_sum);
    }

    fn assert_near(p: Point2<f64>, q: Point2<f32>) {
        assert!((p.x - q.x as f64).abs() < 1e-4 && (p.y - q.y as f64).abs() < 1e-4);
    }

    #[test]
    fn assembles_exact_pattern() {
        let pattern = CalibrationPattern::new(9, 6, 1.0).unwrap();
        let pts = grid(9, 6, 25.0, 0.15, (80.0, 60.0));
        let found = ChessboardDetector::default()
            .detect_from_points(&pts, &pattern)
            .expect("grid");
        assert_eq!(54, found.points.len());
        assert_right_handed(&found);
        assert_starts_at_min_corner(&found);
        assert!((found.at(0, 0).x - 80.0).abs() < 1e-4);
        assert!((found.at(8, 0).x - pts[8].x as f64).abs() < 1e-4);
    }

    #[test]
    fn transposed_board_is_reordered() {
        let pattern = CalibrationPattern::new(9, 6, 1.0).unwrap();
        // board lying on its side: 6 wide, 9 tall
        let pts = grid(6, 9, 20.0, 0.05, (100.0, 40.0));
        let found = ChessboardDetector::default()
            .detect_from_points(&pts, &pattern)
            .expect("grid");
        assert_eq!((9, 6), (found.cols, found.rows));
        assert_right_handed(&found);
        // rows run down the image from the top right corner
        assert_near(found.at(0, 0), pts[5]);
        assert_near(found.at(1, 0), pts[11]);
        assert_near(found.at(0, 1), pts[4]);
        assert_near(found.at(8, 5), pts[48]);
    }

    #[test]
    fn upside_down_board_starts_near_image_origin() {
        let pattern = CalibrationPattern::new(7, 5, 1.0).unwrap();
        let pts = grid(7, 5, 22.0, std::f32::consts::PI + 0.1, (400.0, 300.0));
        let found = ChessboardDetector::default()
            .detect_from_points(&pts, &pattern)
            .expect("grid");
        assert_right_handed(&found);
        assert_starts_at_min_corner(&found);
    }

    #[test]
    fn extra_row_of_candidates_is_ambiguous_or_trimmed() {
        let pattern = CalibrationPattern::new(5, 4, 1.0).unwrap();
        // a single stray candidate attached to the grid does not break detection
        let mut pts = grid(5, 4, 20.0, 0.0, (50.0, 50.0));
        pts.push(Point2::new(50.0 + 5.0 * 20.0, 50.0));
        let found = ChessboardDetector::default()
            .detect_from_points(&pts, &pattern)
            .expect("grid");
        assert!(found.points.iter().all(|p| p.x < 135.0));

        // a full extra column makes the window ambiguous
        let pts = grid(6, 4, 20.0, 0.0, (50.0, 50.0));
        assert!(ChessboardDetector::default()
            .detect_from_points(&pts, &pattern)
            .is_none());
    }

    #[test]
    fn incomplete_board_is_not_found() {
        let pattern = CalibrationPattern::new(9, 6, 1.0).unwrap();
        let mut pts = grid(9, 6, 25.0, 0.0, (80.0, 60.0));
        pts.remove(20);
        assert!(ChessboardDetector::default()
            .detect_from_points(&pts, &pattern)
            .is_none());
    }
}
