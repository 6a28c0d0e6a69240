// THEORY:
// The `ChannelSet` owns the full set of activation maps for one source image at
// one threshold factor, together with the aggregates derived from them. It is the
// unit the rest of the engine works on: it is built once, shared immutably (behind
// an `Arc`) between measurements and topology workers, and replaced wholesale
// when the threshold factor changes.
//
// Construction is where the input contract is enforced: 2..=8 channels, all of the
// same dimensions. Channel order is kept as given; it only matters for labels.

use crate::core_modules::activation_map::{ActivationMap, MapView};
use crate::core_modules::aggregate::{ColocMap, SumMap};
use crate::core_modules::plane::plane::IntensityPlane;
use crate::error::{GicaError, GicaResult};

pub const MIN_CHANNELS: usize = 2;
pub const MAX_CHANNELS: usize = 8;

/// Activation maps of 2..=8 aligned channels plus their aggregates.
#[derive(Debug, Clone)]
pub struct ChannelSet {
    channels: Vec<ActivationMap>,
    sum: SumMap,
    coloc: ColocMap,
    threshold_factor: f64,
}

impl ChannelSet {
    /// Thresholds every plane with the same factor and derives the aggregates.
    pub fn from_planes(planes: &[IntensityPlane], threshold_factor: f64) -> GicaResult<Self> {
        check_count(planes.len())?;
        let (width, height) = (planes[0].width(), planes[0].height());
        for (index, plane) in planes.iter().enumerate() {
            check_dims(index, plane.width(), plane.height(), width, height)?;
        }
        let channels = planes
            .iter()
            .map(|plane| ActivationMap::from_plane(plane, threshold_factor))
            .collect::<GicaResult<Vec<_>>>()?;
        Ok(Self::assemble(channels, threshold_factor))
    }

    /// Builds a set from maps that were thresholded elsewhere.
    pub fn from_maps(channels: Vec<ActivationMap>, threshold_factor: f64) -> GicaResult<Self> {
        check_count(channels.len())?;
        let (width, height) = (channels[0].width(), channels[0].height());
        for (index, map) in channels.iter().enumerate() {
            check_dims(index, map.width(), map.height(), width, height)?;
        }
        Ok(Self::assemble(channels, threshold_factor))
    }

    fn assemble(channels: Vec<ActivationMap>, threshold_factor: f64) -> Self {
        let sum = SumMap::from_channels(&channels);
        let coloc = ColocMap::from_channels(&channels);
        Self {
            channels,
            sum,
            coloc,
            threshold_factor,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Always false: a set holds at least `MIN_CHANNELS` maps.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn width(&self) -> usize {
        self.sum.width()
    }

    pub fn height(&self) -> usize {
        self.sum.height()
    }

    pub fn channel(&self, index: usize) -> Option<&ActivationMap> {
        self.channels.get(index)
    }

    pub fn channels(&self) -> &[ActivationMap] {
        &self.channels
    }

    pub fn sum(&self) -> &SumMap {
        &self.sum
    }

    pub fn coloc(&self) -> &ColocMap {
        &self.coloc
    }

    pub fn threshold_factor(&self) -> f64 {
        self.threshold_factor
    }
}

fn check_count(count: usize) -> GicaResult<()> {
    if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&count) {
        return Err(GicaError::ChannelCount {
            count,
            min: MIN_CHANNELS,
            max: MAX_CHANNELS,
        });
    }
    Ok(())
}

fn check_dims(
    index: usize,
    width: usize,
    height: usize,
    expected_width: usize,
    expected_height: usize,
) -> GicaResult<()> {
    if width != expected_width || height != expected_height {
        return Err(GicaError::DimensionMismatch {
            index,
            width,
            height,
            expected_width,
            expected_height,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(width: usize, height: usize, seed: usize) -> IntensityPlane {
        IntensityPlane::from_fn(width, height, |x, y| ((x * 31 + y * 17 + seed * 7) % 29) as f32)
    }

    #[test]
    fn builds_maps_in_channel_order() {
        let planes: Vec<_> = (0..3).map(|s| plane(10, 8, s)).collect();
        let set = ChannelSet::from_planes(&planes, 1.0).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!((set.width(), set.height()), (10, 8));
        for (i, p) in planes.iter().enumerate() {
            let direct = ActivationMap::from_plane(p, 1.0).unwrap();
            assert_eq!(set.channel(i), Some(&direct));
        }
        assert_eq!(set.threshold_factor(), 1.0);
    }

    #[test]
    fn channel_count_is_bounded() {
        let one = vec![plane(4, 4, 0)];
        assert!(matches!(
            ChannelSet::from_planes(&one, 2.0),
            Err(GicaError::ChannelCount { count: 1, .. })
        ));
        let nine: Vec<_> = (0..9).map(|s| plane(4, 4, s)).collect();
        assert!(matches!(
            ChannelSet::from_planes(&nine, 2.0),
            Err(GicaError::ChannelCount { count: 9, .. })
        ));
        let eight: Vec<_> = (0..8).map(|s| plane(4, 4, s)).collect();
        assert!(ChannelSet::from_planes(&eight, 2.0).is_ok());
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let planes = vec![plane(4, 4, 0), plane(4, 5, 1)];
        assert!(matches!(
            ChannelSet::from_planes(&planes, 2.0),
            Err(GicaError::DimensionMismatch { index: 1, .. })
        ));
    }
}
