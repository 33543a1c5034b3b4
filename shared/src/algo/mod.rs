pub mod stats;

pub use stats::{sigma_clipped_stats, ClippedStats, SigmaClip};
