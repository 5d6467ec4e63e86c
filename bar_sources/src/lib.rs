//! Historical bar sources: the shared data model and every tier that can
//! supply bars for a chunk-aligned range.

pub mod models;
pub mod sources;

pub use models::{Bar, BarAspect, BarKind, HistoricalDataRequest, TimeFrame, TimeFrameError, TimeFrameUnit};
pub use sources::{BarSink, BarSource, SourceError, SourceInitError, TierCategory};
