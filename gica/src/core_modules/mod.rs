pub mod activation_map;
pub mod aggregate;
pub mod cache;
pub mod channel_set;
pub mod correlation;
pub mod pairs;
pub mod plane;
pub mod region;
pub mod sampling;
pub mod utils;
