mod candles;
mod technical;

pub use candles::Candles;
pub use technical::{IndicatorParams, IndicatorValues, TechnicalAnalysis, TechnicalError};
