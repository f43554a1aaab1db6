//! N-dimensional coordinate math for the input and column spaces.
//!
//! A `Topology` maps between coordinate tuples and flat indices through
//! precomputed dimension multipliers (suffix products of the dimension
//! sizes), in either row-major or column-major ordering. It also iterates
//! over the neighborhood of a center index within a radius, which is what
//! the potential-pool sampling and local inhibition are built on.
//!
//! Out-of-range coordinates and indices are addressing errors, never
//! silently wrapped or clamped.

use crate::error::{HtmError, Result};
use std::cmp::{max, min};

/// Bidirectional mapping between coordinate tuples and flat indices.
pub trait CoordinateMapper {
    /// The dimension sizes of the mapped space.
    fn dimensions(&self) -> &[usize];

    /// Converts coordinates to a flat index. Fails on out-of-range input.
    fn compute_index(&self, coordinates: &[usize]) -> Result<usize>;

    /// Converts a flat index back to coordinates. Fails on out-of-range input.
    fn coordinates(&self, index: usize) -> Result<Vec<usize>>;

    /// Number of addressable flat indices.
    fn size(&self) -> usize {
        self.dimensions().iter().product()
    }
}

/// The shape of an N-dimensional space with precomputed multipliers.
///
/// With column-major ordering the multipliers are built over the reversed
/// dimension list and coordinate results are reversed before use, so
/// `compute_index` and `coordinates` stay exact inverses in both modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    dims: Vec<usize>,
    multipliers: Vec<usize>,
    column_major: bool,
}

impl Topology {
    /// Creates a topology over the given dimension sizes.
    pub fn new(dimensions: &[usize], column_major: bool) -> Self {
        let dims = dimensions.to_vec();
        let multipliers = if column_major {
            let mut reversed = dims.clone();
            reversed.reverse();
            Self::multipliers(&reversed)
        } else {
            Self::multipliers(&dims)
        };

        Self {
            dims,
            multipliers,
            column_major,
        }
    }

    /// Whether coordinate math runs in column-major order.
    pub fn is_column_major(&self) -> bool {
        self.column_major
    }

    /// Suffix products of the dimension sizes, used to fold coordinates
    /// into a flat index.
    fn multipliers(dims: &[usize]) -> Vec<usize> {
        let mut multipliers = vec![1; dims.len()];

        for i in (0..dims.len().saturating_sub(1)).rev() {
            multipliers[i] = multipliers[i + 1] * dims[i + 1];
        }

        multipliers
    }

    fn check_coordinates(&self, coordinates: &[usize]) -> Result<()> {
        let in_range = coordinates.len() == self.dims.len()
            && coordinates.iter().zip(&self.dims).all(|(&c, &d)| c < d);

        if in_range {
            Ok(())
        } else {
            Err(HtmError::CoordinatesOutOfBounds {
                coordinates: coordinates.to_vec(),
                dimensions: self.dims.clone(),
            })
        }
    }

    /// `compute_index` without the bounds check, for callers that iterate
    /// over known-valid coordinates.
    fn index_unchecked(&self, coordinates: &[usize]) -> usize {
        if self.column_major {
            coordinates
                .iter()
                .rev()
                .zip(&self.multipliers)
                .map(|(&c, &m)| c * m)
                .sum()
        } else {
            coordinates
                .iter()
                .zip(&self.multipliers)
                .map(|(&c, &m)| c * m)
                .sum()
        }
    }

    /// Returns an iterator over all flat indices within `radius` of the
    /// `center` index. If `wrapping` is true the neighborhood wraps around
    /// the edges of the space, otherwise it is clipped at the borders.
    pub fn neighborhood(&self, center: usize, radius: usize, wrapping: bool) -> NeighborhoodIter {
        let center_coords = self
            .coordinates(center)
            .expect("neighborhood center must be a valid index");
        let radius = radius as isize;

        let bounds: Vec<(isize, isize)> = center_coords
            .iter()
            .zip(&self.dims)
            .map(|(&c, &dim)| {
                let c = c as isize;
                let dim = dim as isize;

                if wrapping {
                    (c - radius, (c - radius + dim).min(c + radius + 1))
                } else {
                    (max(c - radius, 0), min(c + radius + 1, dim))
                }
            })
            .collect();

        let current = bounds.iter().map(|&(low, _)| low).collect();

        NeighborhoodIter {
            topology: self,
            bounds,
            current: Some(current),
            wrapping,
        }
    }
}

impl CoordinateMapper for Topology {
    fn dimensions(&self) -> &[usize] {
        &self.dims
    }

    fn compute_index(&self, coordinates: &[usize]) -> Result<usize> {
        self.check_coordinates(coordinates)?;
        Ok(self.index_unchecked(coordinates))
    }

    fn coordinates(&self, index: usize) -> Result<Vec<usize>> {
        let size = self.size();
        if index >= size {
            return Err(HtmError::IndexOutOfBounds { index, size });
        }

        let mut remainder = index;
        let mut coords: Vec<usize> = self
            .multipliers
            .iter()
            .map(|&multiplier| {
                let coord = remainder / multiplier;
                remainder %= multiplier;
                coord
            })
            .collect();

        if self.column_major {
            coords.reverse();
        }

        Ok(coords)
    }
}

/// Iterator over all indices within a radius of a center index.
pub struct NeighborhoodIter<'a> {
    topology: &'a Topology,
    bounds: Vec<(isize, isize)>,
    current: Option<Vec<isize>>,
    wrapping: bool,
}

impl Iterator for NeighborhoodIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current.as_mut()?;

        let coords: Vec<usize> = current
            .iter()
            .enumerate()
            .map(|(i, &val)| {
                let dim = self.topology.dims[i] as isize;

                if self.wrapping {
                    val.rem_euclid(dim) as usize
                } else {
                    val.clamp(0, dim - 1) as usize
                }
            })
            .collect();

        let result = self.topology.index_unchecked(&coords);

        for i in (0..current.len()).rev() {
            if current[i] + 1 < self.bounds[i].1 {
                current[i] += 1;

                current
                    .iter_mut()
                    .enumerate()
                    .skip(i + 1)
                    .for_each(|(j, item)| *item = self.bounds[j].0);

                return Some(result);
            }
        }

        self.current.take();

        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let count = self
            .bounds
            .iter()
            .map(|&(low, high)| (high - low) as usize)
            .product();

        (count, Some(count))
    }
}
