//! 4-connected lattice graph over corner candidates.
//!
//! Edges come from k-nearest neighbours that sit at the local grid spacing
//! and run along one of two global axes. The axes are the dominant edge
//! direction modulo 90°, so they survive moderate perspective and any
//! in-plane rotation of the board.

use std::collections::{HashMap, VecDeque};
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridGraphParams {
    /// Neighbours examined per node (excluding the node itself).
    pub k_neighbors: usize,
    /// Accepted edge length relative to the nearest-neighbour distance of
    /// both endpoints, as `1 + spacing_tolerance`.
    pub spacing_tolerance: f32,
    /// Maximum edge deviation from the nearest grid axis.
    pub axis_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            k_neighbors: 8,
            spacing_tolerance: 0.5,
            axis_tolerance_deg: 15.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    /// `+u`
    Right,
    /// `-u`
    Left,
    /// `-v`
    Up,
    /// `+v`
    Down,
}

impl NeighborDirection {
    fn slot(self) -> usize {
        match self {
            NeighborDirection::Right => 0,
            NeighborDirection::Left => 1,
            NeighborDirection::Up => 2,
            NeighborDirection::Down => 3,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            NeighborDirection::Right => NeighborDirection::Left,
            NeighborDirection::Left => NeighborDirection::Right,
            NeighborDirection::Up => NeighborDirection::Down,
            NeighborDirection::Down => NeighborDirection::Up,
        }
    }

    /// Integer lattice step `(di, dj)`.
    pub fn step(self) -> (i32, i32) {
        match self {
            NeighborDirection::Right => (1, 0),
            NeighborDirection::Left => (-1, 0),
            NeighborDirection::Up => (0, -1),
            NeighborDirection::Down => (0, 1),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    pub score: f32,
}

/// Orthogonal image-space grid axes; `u` has a non-negative x component.
#[derive(Clone, Copy, Debug)]
pub struct GridAxes {
    pub theta: f32,
}

impl GridAxes {
    pub fn u(&self) -> Vector2<f32> {
        Vector2::new(self.theta.cos(), self.theta.sin())
    }

    pub fn v(&self) -> Vector2<f32> {
        Vector2::new(-self.theta.sin(), self.theta.cos())
    }

    /// Angular distance of `angle` from the closest axis, in `[0, π/4]`.
    fn deviation(&self, angle: f32) -> f32 {
        let d = (angle - self.theta).rem_euclid(FRAC_PI_2);
        d.min(FRAC_PI_2 - d)
    }
}

/// Dominant lattice direction from nearest-neighbour edges, via the
/// four-fold angle so that all four edge directions vote alike.
fn estimate_axes(points: &[Point2<f32>], nearest: &[Option<usize>]) -> Option<GridAxes> {
    let mut sum = Vector2::<f32>::zeros();
    let mut n = 0usize;
    for (i, nn) in nearest.iter().enumerate() {
        let Some(j) = *nn else { continue };
        let e = points[j] - points[i];
        let a = 4.0 * e.y.atan2(e.x);
        sum += Vector2::new(a.cos(), a.sin());
        n += 1;
    }
    if n == 0 {
        return None;
    }
    let mean = sum / n as f32;
    if mean.norm() < 0.3 {
        // No coherent lattice direction.
        return None;
    }
    let mut theta = 0.25 * mean.y.atan2(mean.x);
    // Keep theta in (-π/4, π/4] so that u points right and v points down.
    if theta <= -FRAC_PI_4 {
        theta += FRAC_PI_2;
    }
    Some(GridAxes { theta })
}

/// Keep at most one neighbour per direction, lowest score first.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];
    for candidate in candidates {
        let slot = &mut best[candidate.direction.slot()];
        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.score < current.score
                    || (candidate.score == current.score && candidate.distance < current.distance)
            }
        };
        if replace {
            *slot = Some(candidate);
        }
    }
    best.into_iter().flatten().collect()
}

pub struct GridGraph {
    pub axes: GridAxes,
    /// Mutual neighbours per node.
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

impl GridGraph {
    /// Build the graph; `None` when fewer than two points or no dominant
    /// axis exists.
    pub fn new(points: &[Point2<f32>], params: &GridGraphParams) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        let coords: Vec<[f32; 2]> = points.iter().map(|p| [p.x, p.y]).collect();
        let tree: KdTree<f32, 2> = (&coords).into();
        let k = params.k_neighbors.max(1) + 1;

        let knn: Vec<Vec<(usize, f32)>> = coords
            .iter()
            .enumerate()
            .map(|(i, q)| {
                tree.nearest_n::<SquaredEuclidean>(q, k)
                    .into_iter()
                    .map(|nn| (nn.item as usize, nn.distance.sqrt()))
                    .filter(|&(j, d)| j != i && d > 0.0)
                    .collect()
            })
            .collect();

        let nearest: Vec<Option<usize>> = knn
            .iter()
            .map(|list| {
                list.iter()
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|&(j, _)| j)
            })
            .collect();
        let nearest_dist: Vec<f32> = knn
            .iter()
            .map(|list| list.iter().map(|&(_, d)| d).fold(f32::INFINITY, f32::min))
            .collect();

        let axes = estimate_axes(points, &nearest)?;
        let (u, v) = (axes.u(), axes.v());
        let axis_tol = params.axis_tolerance_deg.to_radians();
        let max_ratio = 1.0 + params.spacing_tolerance;

        let selected: Vec<Vec<NodeNeighbor>> = knn
            .iter()
            .enumerate()
            .map(|(i, list)| {
                let candidates = list
                    .iter()
                    .filter_map(|&(j, distance)| {
                        if distance > max_ratio * nearest_dist[i]
                            || distance > max_ratio * nearest_dist[j]
                        {
                            return None;
                        }
                        let e = points[j] - points[i];
                        let dev = axes.deviation(e.y.atan2(e.x));
                        if dev > axis_tol {
                            return None;
                        }
                        let (du, dv) = (e.dot(&u), e.dot(&v));
                        let direction = if du.abs() >= dv.abs() {
                            if du >= 0.0 {
                                NeighborDirection::Right
                            } else {
                                NeighborDirection::Left
                            }
                        } else if dv >= 0.0 {
                            NeighborDirection::Down
                        } else {
                            NeighborDirection::Up
                        };
                        Some(NodeNeighbor {
                            direction,
                            index: j,
                            distance,
                            score: dev + (distance / nearest_dist[i] - 1.0).abs(),
                        })
                    })
                    .collect();
                select_neighbors(candidates)
            })
            .collect();

        // Keep only edges both endpoints agree on.
        let neighbors = selected
            .iter()
            .enumerate()
            .map(|(i, list)| {
                list.iter()
                    .filter(|n| {
                        selected[n.index]
                            .iter()
                            .any(|back| back.index == i && back.direction == n.direction.opposite())
                    })
                    .cloned()
                    .collect()
            })
            .collect();

        Some(Self { axes, neighbors })
    }

    /// Breadth-first integer coordinates for every connected component.
    ///
    /// A node reached at a cell already taken by another node is dropped
    /// from that component.
    pub fn components(&self) -> Vec<HashMap<(i32, i32), usize>> {
        let mut visited = vec![false; self.neighbors.len()];
        let mut out = Vec::new();

        for start in 0..self.neighbors.len() {
            if visited[start] || self.neighbors[start].is_empty() {
                continue;
            }
            let mut cells = HashMap::new();
            let mut queue = VecDeque::from([(start, 0i32, 0i32)]);
            while let Some((node, i, j)) = queue.pop_front() {
                if visited[node] {
                    continue;
                }
                visited[node] = true;
                if cells.contains_key(&(i, j)) {
                    continue;
                }
                cells.insert((i, j), node);
                for n in &self.neighbors[node] {
                    if !visited[n.index] {
                        let (di, dj) = n.direction.step();
                        queue.push_back((n.index, i + di, j + dj));
                    }
                }
            }
            out.push(cells);
        }
        out
    }
}

/// Origin of the first fully populated `w × h` window, scanning `j` then `i`.
pub fn find_full_window(cells: &HashMap<(i32, i32), usize>, w: i32, h: i32) -> Option<(i32, i32)> {
    if cells.len() < (w * h) as usize {
        return None;
    }
    let (min_i, max_i) = cells
        .keys()
        .fold((i32::MAX, i32::MIN), |(lo, hi), &(i, _)| (lo.min(i), hi.max(i)));
    let (min_j, max_j) = cells
        .keys()
        .fold((i32::MAX, i32::MIN), |(lo, hi), &(_, j)| (lo.min(j), hi.max(j)));

    for j0 in min_j..=(max_j - h + 1) {
        for i0 in min_i..=(max_i - w + 1) {
            let full = (0..h).all(|dj| (0..w).all(|di| cells.contains_key(&(i0 + di, j0 + dj))));
            if full {
                return Some((i0, j0));
            }
        }
    }
    None
}
