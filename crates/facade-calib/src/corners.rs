use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor, ThresholdMode};
use facade_core::GrayImageView;
use image::GrayImage;
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::board::CheckerboardSpec;
use crate::error::CornerError;
use crate::gridgraph::{find_full_window, GridGraph, GridGraphParams};
use crate::subpix::{refine_corners, SubPixParams};

/// Corner detection and refinement settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CornerParams {
    /// ChESS response threshold relative to the strongest response.
    pub threshold_rel: f32,
    pub nms_radius: u32,
    /// Candidates weaker than this are dropped before grid assembly.
    pub min_strength: f32,
    pub graph: GridGraphParams,
    pub subpix: SubPixParams,
}

impl Default for CornerParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
            min_strength: 0.0,
            graph: GridGraphParams::default(),
            subpix: SubPixParams::default(),
        }
    }
}

impl CornerParams {
    pub fn chess_config(&self) -> ChessConfig {
        let mut cfg = ChessConfig::single_scale();
        cfg.threshold_mode = ThresholdMode::Relative;
        cfg.threshold_value = self.threshold_rel as _;
        cfg.nms_radius = self.nms_radius as _;
        cfg
    }
}

/// Raw ChESS corner candidates.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, cfg), fields(width = img.width(), height = img.height()))
)]
pub fn detect_raw_corners(img: &GrayImage, cfg: &ChessConfig) -> Vec<CornerDescriptor> {
    // chess-corners 0.8 returns a Result; with a `GrayImage` input and no
    // upscaling configured, neither error variant is reachable.
    find_chess_corners_image(img, cfg).expect("chess-corners detection failed")
}

/// Relabel a row-major `cols × rows` lattice canonically.
///
/// Rows and columns keep the board's handedness in image coordinates (y
/// down), and among the remaining labellings the first corner is the one
/// nearest the image origin.
fn canonical_order(mut pts: Vec<Point2<f32>>, cols: usize, rows: usize) -> Vec<Point2<f32>> {
    let along_row = pts[cols - 1] - pts[0];
    let along_col = pts[(rows - 1) * cols] - pts[0];
    if along_row.x * along_col.y - along_row.y * along_col.x < 0.0 {
        for row in pts.chunks_mut(cols) {
            row.reverse();
        }
    }

    let reversed: Vec<_> = pts.iter().rev().copied().collect();
    let mut candidates = vec![pts, reversed];
    if cols == rows {
        let n = cols;
        let turned: Vec<_> = (0..n * n)
            .map(|k| candidates[0][(n - 1 - k % n) * n + k / n])
            .collect();
        candidates.push(turned.iter().rev().copied().collect());
        candidates.push(turned);
    }
    candidates
        .into_iter()
        .min_by(|a, b| {
            a[0].coords
                .norm_squared()
                .total_cmp(&b[0].coords.norm_squared())
        })
        .unwrap_or_default()
}

/// Order corner candidates into the board lattice.
///
/// Returns `cols * rows` points in row-major board order, or `None` when no
/// connected component contains a fully populated `cols × rows` window (or
/// its transpose). The labelling is canonical, see [`canonical_order`].
pub fn assemble_checkerboard(
    points: &[Point2<f32>],
    board: &CheckerboardSpec,
    params: &GridGraphParams,
) -> Option<Vec<Point2<f32>>> {
    let (cols, rows) = (board.cols as i32, board.rows as i32);
    if cols < 2 || rows < 2 || points.len() < board.corner_count() {
        return None;
    }
    let graph = GridGraph::new(points, params)?;
    let mut components = graph.components();
    components.sort_by_key(|c| std::cmp::Reverse(c.len()));

    let canonical = |pts| canonical_order(pts, board.cols as usize, board.rows as usize);
    for cells in &components {
        if let Some((i0, j0)) = find_full_window(cells, cols, rows) {
            let ordered = (0..rows)
                .flat_map(|r| (0..cols).map(move |c| (i0 + c, j0 + r)))
                .map(|cell| cells.get(&cell).map(|&idx| points[idx]))
                .collect::<Option<Vec<_>>>();
            if let Some(ordered) = ordered {
                return Some(canonical(ordered));
            }
        }
        if cols != rows {
            if let Some((i0, j0)) = find_full_window(cells, rows, cols) {
                let ordered = (0..rows)
                    .flat_map(|r| (0..cols).map(move |c| (i0 + r, j0 + c)))
                    .map(|cell| cells.get(&cell).map(|&idx| points[idx]))
                    .collect::<Option<Vec<_>>>();
                if let Some(ordered) = ordered {
                    return Some(canonical(ordered));
                }
            }
        }
    }
    None
}

/// Detect the board and refine its corners to sub-pixel accuracy.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(img, board, params), fields(width = img.width(), height = img.height()))
)]
pub fn find_checkerboard_corners(
    img: &GrayImage,
    board: &CheckerboardSpec,
    params: &CornerParams,
) -> Result<Vec<Point2<f32>>, CornerError> {
    let (width, height) = img.dimensions();
    if width < 16 || height < 16 {
        return Err(CornerError::ImageTooSmall { width, height });
    }

    let raw = detect_raw_corners(img, &params.chess_config());
    let candidates: Vec<Point2<f32>> = raw
        .iter()
        .filter(|c| c.response >= params.min_strength)
        .map(|c| Point2::new(c.x, c.y))
        .collect();
    debug!(
        "{} ChESS candidates ({} after strength filter)",
        raw.len(),
        candidates.len()
    );

    let not_found = || CornerError::PatternNotFound {
        cols: board.cols,
        rows: board.rows,
        candidates: candidates.len(),
    };
    let ordered = assemble_checkerboard(&candidates, board, &params.graph).ok_or_else(not_found)?;

    let view = GrayImageView::new(width as usize, height as usize, img.as_raw())
        .ok_or_else(not_found)?;
    Ok(refine_corners(&view, &ordered, &params.subpix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lattice(cols: usize, rows: usize, spacing: f32) -> Vec<Point2<f32>> {
        (0..rows)
            .flat_map(|r| {
                (0..cols).map(move |c| {
                    Point2::new(50.0 + c as f32 * spacing, 40.0 + r as f32 * spacing)
                })
            })
            .collect()
    }

    #[test]
    fn assembles_row_major_order_regardless_of_input_order() {
        let board = CheckerboardSpec {
            cols: 4,
            rows: 3,
            square_size: 1.0,
        };
        let truth = lattice(4, 3, 25.0);
        let mut shuffled = truth.clone();
        shuffled.reverse();
        shuffled.swap(2, 7);

        let ordered = assemble_checkerboard(&shuffled, &board, &GridGraphParams::default())
            .expect("board");
        assert_eq!(ordered, truth);
    }

    #[test]
    fn transposed_board_is_accepted() {
        let board = CheckerboardSpec {
            cols: 4,
            rows: 3,
            square_size: 1.0,
        };
        // Three image columns by four image rows.
        let pts = lattice(3, 4, 25.0);
        let ordered =
            assemble_checkerboard(&pts, &board, &GridGraphParams::default()).expect("board");
        assert_eq!(ordered.len(), 12);
        // Board row 0 runs down the last image column, starting at the top.
        assert_eq!(ordered[0], pts[2]);
        assert_eq!(ordered[1], pts[5]);
        assert_eq!(ordered[3], pts[11]);
        assert_eq!(ordered[4], pts[1]);
    }

    #[test]
    fn mirrored_and_turned_labellings_are_canonicalised() {
        let truth = lattice(4, 3, 25.0);
        let turned: Vec<_> = truth.iter().rev().copied().collect();
        assert_eq!(canonical_order(turned, 4, 3), truth);

        let mut mirrored = truth.clone();
        for row in mirrored.chunks_mut(4) {
            row.reverse();
        }
        assert_eq!(canonical_order(mirrored, 4, 3), truth);

        // A square lattice also has quarter-turn labellings.
        let square = lattice(3, 3, 25.0);
        let quarter: Vec<_> = (0..9).map(|k| square[(k % 3) * 3 + (2 - k / 3)]).collect();
        assert_eq!(canonical_order(quarter, 3, 3), square);
    }

    #[test]
    fn incomplete_board_is_rejected() {
        let board = CheckerboardSpec {
            cols: 4,
            rows: 3,
            square_size: 1.0,
        };
        let mut pts = lattice(4, 3, 25.0);
        pts.remove(5);
        assert!(assemble_checkerboard(&pts, &board, &GridGraphParams::default()).is_none());
    }
}
