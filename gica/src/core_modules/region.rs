// THEORY:
// A `Region` is the rectangular area of interest a measurement is restricted to.
// It is a plain value: the collaborator picks it (typically from a user's ROI),
// the engine only checks that it is non-empty and lies fully inside the maps.

use crate::error::{GicaError, GicaResult};
use std::fmt;

/// An axis-aligned rectangle in pixel coordinates, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The region covering a whole `width x height` map.
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Fails unless the region is non-empty and fits inside the map bounds.
    pub fn validate_within(&self, map_width: usize, map_height: usize) -> GicaResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GicaError::EmptyRegion);
        }
        let fits_x = self.x.checked_add(self.width).is_some_and(|end| end <= map_width);
        let fits_y = self.y.checked_add(self.height).is_some_and(|end| end <= map_height);
        if !(fits_x && fits_y) {
            return Err(GicaError::RegionOutOfBounds {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                map_width,
                map_height,
            });
        }
        Ok(())
    }

    /// Flat row-major indices of every pixel in the region, for a map of the
    /// given row width.
    pub fn indices(&self, map_width: usize) -> impl Iterator<Item = usize> + '_ {
        (self.y..self.y + self.height).flat_map(move |row| {
            let start = row * map_width + self.x;
            start..start + self.width
        })
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}\t{}", self.x, self.y, self.width, self.height)
    }
}
