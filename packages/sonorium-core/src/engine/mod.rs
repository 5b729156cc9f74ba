//! The track stream engine: per-track PCM producers, the per-theme
//! exclusive-playback arbiter, and the theme mixer that sums them.

pub mod exclusion;
pub mod theme_stream;
pub mod track_stream;

pub use exclusion::ExclusionCoordinator;
pub use theme_stream::{SharedGain, ThemeStream};
pub use track_stream::TrackStreamKind;
