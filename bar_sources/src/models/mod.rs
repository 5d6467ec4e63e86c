pub mod bar;
pub mod request;
pub mod timeframe;

pub use bar::{Bar, BarAspect, BarKind};
pub use request::HistoricalDataRequest;
pub use timeframe::{TimeFrame, TimeFrameError, TimeFrameUnit};
