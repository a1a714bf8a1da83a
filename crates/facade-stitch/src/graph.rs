//! Chaining pairwise homographies into the anchor frame.

use facade_core::Homography;
use log::warn;

use crate::grid::{neighbor_of, GridPosition, ImageGrid};

/// Reference homography of every position, `None` where the chain to the
/// anchor is broken.
///
/// `reference(p) = reference(neighbor(p)) × pairwise(p)`. Neighbours always
/// precede their dependants in row-major order, so one pass suffices.
pub fn compose_references(
    pairwise: &ImageGrid<Option<Homography>>,
) -> ImageGrid<Option<Homography>> {
    let mut refs: ImageGrid<Option<Homography>> = pairwise.map(|_, _| None);
    for (pos, h) in pairwise.iter() {
        let reference = match neighbor_of(pos) {
            None => Some(h.unwrap_or_else(Homography::identity)),
            Some(n) => match (refs.get(n).copied().flatten(), h) {
                (Some(parent), Some(h)) => Some(parent * *h),
                (None, _) => {
                    warn!("{pos}: neighbour {n} is not connected to the anchor, excluded");
                    None
                }
                (Some(_), None) => {
                    warn!("{pos}: no homography to {n}, excluded");
                    None
                }
            },
        };
        if let Some(slot) = refs.get_mut(pos) {
            *slot = reference;
        }
    }
    refs
}

/// The positions along the neighbour chain from `pos` down to the anchor.
pub fn chain_to_anchor(pos: GridPosition) -> Vec<GridPosition> {
    let mut chain = vec![pos];
    let mut cur = pos;
    while let Some(n) = neighbor_of(cur) {
        chain.push(n);
        cur = n;
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn shift(tx: f64, ty: f64, s: f64) -> Homography {
        Homography::from_array([[s, 0.0, tx], [0.0, s, ty], [0.0, 0.0, 1.0]])
    }

    #[test]
    fn single_row_chains_left_to_right() {
        let h1 = shift(100.0, 2.0, 1.0);
        let h2 = Homography::from_array([[1.0, 0.1, 90.0], [0.0, 1.0, -3.0], [1e-4, 0.0, 1.0]]);
        let grid =
            ImageGrid::from_rows(vec![vec![Some(Homography::identity()), Some(h1), Some(h2)]]);
        let refs = compose_references(&grid);

        let r0 = refs.get(GridPosition::new(0, 0)).copied().flatten().expect("anchor");
        assert_eq!(r0, Homography::identity());
        let r2 = refs.get(GridPosition::new(0, 2)).copied().flatten().expect("r2");
        assert_relative_eq!(r2.h, (h1 * h2).h, epsilon = 1e-12);
        assert_relative_eq!(r2.h, h1.h * h2.h, epsilon = 1e-12);
    }

    #[test]
    fn vertical_chain_goes_through_column_zero() {
        let down1 = shift(0.0, 80.0, 1.0);
        let down2 = shift(1.0, 75.0, 1.0);
        let right = shift(95.0, 0.0, 1.02);
        let grid = ImageGrid::from_rows(vec![
            vec![None, Some(shift(99.0, 0.0, 1.0))],
            vec![Some(down1)],
            vec![Some(down2), Some(right)],
        ]);
        let refs = compose_references(&grid);
        let r = refs.get(GridPosition::new(2, 1)).copied().flatten().expect("r(2,1)");
        assert_relative_eq!(r.h, down1.h * down2.h * right.h, epsilon = 1e-12);
        assert_eq!(
            chain_to_anchor(GridPosition::new(2, 1)),
            vec![
                GridPosition::new(2, 1),
                GridPosition::new(2, 0),
                GridPosition::new(1, 0),
                GridPosition::new(0, 0)
            ]
        );
    }

    #[test]
    fn broken_edges_exclude_dependants() {
        let grid = ImageGrid::from_rows(vec![
            vec![None, None, Some(shift(90.0, 0.0, 1.0))],
            vec![Some(shift(0.0, 80.0, 1.0))],
        ]);
        let refs = compose_references(&grid);
        assert!(refs.get(GridPosition::new(0, 1)).copied().flatten().is_none());
        assert!(refs.get(GridPosition::new(0, 2)).copied().flatten().is_none());
        assert!(refs.get(GridPosition::new(1, 0)).copied().flatten().is_some());
    }
}
