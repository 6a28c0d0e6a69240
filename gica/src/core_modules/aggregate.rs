// THEORY:
// The aggregate maps summarise a whole channel set at every pixel:
// - `SumMap` counts how many channels are active there (0..=N).
// - `ColocMap` is 1 exactly where all channels are active.
// Both are pure reductions over the activation maps, with no randomness, so the
// invariant `SumMap[p] == N <=> ColocMap[p] == 1` holds by construction.
// Callers must pass maps of identical dimensions; `ChannelSet` checks that
// before building aggregates.

use crate::core_modules::activation_map::{ActivationMap, Cell, MapView};

/// Per-pixel count of active channels.
#[derive(Debug, Clone, PartialEq)]
pub struct SumMap {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl SumMap {
    pub fn from_channels(channels: &[ActivationMap]) -> Self {
        let (width, height) = dims(channels);
        let mut cells = vec![0 as Cell; width * height];
        for channel in channels {
            for (sum, &active) in cells.iter_mut().zip(channel.cells()) {
                *sum += active;
            }
        }
        Self {
            width,
            height,
            cells,
        }
    }
}

/// Binary mask of pixels active in every channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ColocMap {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl ColocMap {
    pub fn from_channels(channels: &[ActivationMap]) -> Self {
        let (width, height) = dims(channels);
        let mut cells = vec![Cell::from(!channels.is_empty()); width * height];
        for channel in channels {
            for (coloc, &active) in cells.iter_mut().zip(channel.cells()) {
                if active == 0 {
                    *coloc = 0;
                }
            }
        }
        Self {
            width,
            height,
            cells,
        }
    }
}

fn dims(channels: &[ActivationMap]) -> (usize, usize) {
    channels
        .first()
        .map(|c| (c.width(), c.height()))
        .unwrap_or((0, 0))
}

impl MapView for SumMap {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

impl MapView for ColocMap {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn cells(&self) -> &[Cell] {
        &self.cells
    }
}
