// THEORY:
// This file is the entry point of the `gica` library crate, a gamma-norm
// colocalization engine for multi-channel fluorescence images.
//
// The high-level interface is `GammaNorm` (one analysis over one channel set)
// with its `AnalysisConfig`, the per-region `MeasurementResult` and the
// sliding-window `TopologyScanner`. The building blocks (activation maps,
// aggregate maps, correlation estimators, pair enumeration) live in
// `core_modules` and are public for callers that want to compose them directly.

pub mod core_modules;
pub mod error;
pub mod parallel_topology;
pub mod pipeline;

pub use core_modules::activation_map::{ActivationMap, FloatImage, MapView};
pub use core_modules::cache::ActivationCache;
pub use core_modules::channel_set::ChannelSet;
pub use core_modules::plane::plane::{split_channels, IntensityPlane};
pub use error::{GicaError, GicaResult};
pub use parallel_topology::{CancelHandle, ScanOutcome, ScanState, TopologyResult, TopologyScanner};
pub use pipeline::{AnalysisConfig, GammaNorm, MeasurementLog, MeasurementResult, Progress, Region};
