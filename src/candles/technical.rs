//! Technical indicators over a candle buffer.
//!
//! Series are computed in `f64` with `NaN` marking undefined rows, the same
//! way a dataframe would, and converted to `Decimal` (two places) when read.
//! Boolean series never hold undefined rows: comparisons against `NaN` are
//! false.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::helpers::to_decimal;
use crate::models::Candle;

pub type IndicatorValues = BTreeMap<String, Option<Decimal>>;
pub type IndicatorParams = BTreeMap<String, Decimal>;

#[derive(Debug, Error, PartialEq)]
pub enum TechnicalError {
    #[error("Unknown indicator: {0}")]
    UnknownIndicator(String),

    #[error("Invalid period {period} for {indicator}: expected 5..=200")]
    InvalidPeriod { indicator: String, period: usize },

    #[error("Invalid parameter {field}={value}")]
    InvalidParameter { field: String, value: Decimal },
}

// ---------------------------------------------------------------------------
// Series primitives
// ---------------------------------------------------------------------------

fn shift(values: &[f64], n: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| if i >= n { values[i - n] } else { f64::NAN })
        .collect()
}

fn diff(values: &[f64], n: usize) -> Vec<f64> {
    let prev = shift(values, n);
    values.iter().zip(prev).map(|(v, p)| v - p).collect()
}

/// Applies `f` to every full window; rows with a short or undefined window
/// are `NaN` unless at least `min_periods` defined values are present.
fn rolling<F>(values: &[f64], window: usize, min_periods: usize, f: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let start = (i + 1).saturating_sub(window);
        let defined: Vec<f64> = values[start..=i].iter().copied().filter(|v| !v.is_nan()).collect();
        if window == 0 || defined.len() < min_periods.max(1) {
            out.push(f64::NAN);
        } else {
            out.push(f(&defined));
        }
    }
    out
}

fn rolling_max(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, window, |w| w.iter().copied().fold(f64::MIN, f64::max))
}

fn rolling_min(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, window, |w| w.iter().copied().fold(f64::MAX, f64::min))
}

fn rolling_mean(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling(values, window, min_periods, |w| w.iter().sum::<f64>() / w.len() as f64)
}

/// Sample standard deviation (ddof = 1).
fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, window, |w| {
        if w.len() < 2 {
            return f64::NAN;
        }
        let mean = w.iter().sum::<f64>() / w.len() as f64;
        let var = w.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (w.len() - 1) as f64;
        var.sqrt()
    })
}

/// Exponentially weighted mean.
///
/// `adjust = true` divides by the decaying sum of weights, `adjust = false`
/// uses the recursive form seeded with the first defined value.
fn ewm_mean(values: &[f64], alpha: f64, adjust: bool, min_periods: usize) -> Vec<f64> {
    let decay = 1.0 - alpha;
    let mut out = Vec::with_capacity(values.len());
    let mut num = 0.0;
    let mut den = 0.0;
    let mut last = f64::NAN;
    let mut observed = 0usize;

    for &x in values {
        if x.is_nan() {
            num *= decay;
            den *= decay;
        } else {
            observed += 1;
            if adjust {
                num = x + decay * num;
                den = 1.0 + decay * den;
                last = num / den;
            } else if last.is_nan() {
                last = x;
            } else {
                last = decay * last + alpha * x;
            }
        }
        out.push(if observed >= min_periods.max(1) { last } else { f64::NAN });
    }
    out
}

fn gt(a: &[f64], b: &[f64]) -> Vec<bool> {
    a.iter().zip(b).map(|(x, y)| x > y).collect()
}

fn lt(a: &[f64], b: &[f64]) -> Vec<bool> {
    a.iter().zip(b).map(|(x, y)| x < y).collect()
}

/// True only on the first row of each streak where `flags` holds.
fn crossover(flags: &[bool]) -> Vec<bool> {
    flags
        .iter()
        .enumerate()
        .map(|(i, &flag)| flag && (i == 0 || !flags[i - 1]))
        .collect()
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

fn check_period(indicator: &str, period: usize) -> Result<(), TechnicalError> {
    if (5..=200).contains(&period) {
        Ok(())
    } else {
        Err(TechnicalError::InvalidPeriod {
            indicator: indicator.to_string(),
            period,
        })
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

pub struct TechnicalAnalysis {
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
}

impl TechnicalAnalysis {
    pub fn new<'a>(candles: impl IntoIterator<Item = &'a Candle>) -> Self {
        use num_traits::ToPrimitive;

        let mut ta = Self {
            open: Vec::new(),
            high: Vec::new(),
            low: Vec::new(),
            close: Vec::new(),
            volume: Vec::new(),
        };
        let as_f64 = |d: Decimal| d.to_f64().unwrap_or(f64::NAN);
        for candle in candles {
            ta.open.push(as_f64(candle.open));
            ta.high.push(as_f64(candle.high));
            ta.low.push(as_f64(candle.low));
            ta.close.push(as_f64(candle.close));
            ta.volume.push(as_f64(candle.volume));
        }
        ta
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    fn position(&self, index: isize) -> Option<usize> {
        let len = self.len() as isize;
        let pos = if index < 0 { len + index } else { index };
        (0..len).contains(&pos).then_some(pos as usize)
    }

    fn value_at(&self, series: &[f64], index: isize) -> Option<Decimal> {
        let value = *series.get(self.position(index)?)?;
        if value.is_nan() {
            None
        } else {
            to_decimal(value, 2)
        }
    }

    fn flag_at(&self, series: &[bool], index: isize) -> Option<Decimal> {
        let flag = self.position(index).and_then(|pos| series.get(pos).copied()).unwrap_or(false);
        Some(if flag { Decimal::ONE } else { Decimal::ZERO })
    }

    pub fn rsi(&self, period: usize) -> Vec<f64> {
        let delta = diff(&self.close, 1);
        let mut gain = vec![f64::NAN; self.len()];
        let mut loss = vec![f64::NAN; self.len()];
        if self.len() > 1 {
            let up: Vec<f64> = delta[1..].iter().map(|d| d.max(0.0)).collect();
            let down: Vec<f64> = delta[1..].iter().map(|d| (-d).max(0.0)).collect();
            let alpha = 1.0 / period.max(1) as f64;
            gain[1..].copy_from_slice(&ewm_mean(&up, alpha, true, period));
            loss[1..].copy_from_slice(&ewm_mean(&down, alpha, true, period));
        }
        gain.iter()
            .zip(&loss)
            .map(|(g, l)| 100.0 - 100.0 / (1.0 + g / l))
            .collect()
    }

    /// Returns (%K, %D).
    pub fn stochastic(&self, k_period: usize, d_period: usize) -> (Vec<f64>, Vec<f64>) {
        let n_high = rolling_max(&self.high, k_period);
        let n_low = rolling_min(&self.low, k_period);
        let k: Vec<f64> = (0..self.len())
            .map(|i| (self.close[i] - n_low[i]) * 100.0 / (n_high[i] - n_low[i]))
            .collect();
        let d = rolling_mean(&k, d_period, d_period);
        (k, d)
    }

    pub fn roc(&self, period: usize) -> Vec<f64> {
        let prev = shift(&self.close, period);
        self.close.iter().zip(prev).map(|(c, p)| (c - p) / p * 100.0).collect()
    }

    pub fn ma(&self, period: usize) -> Result<Vec<f64>, TechnicalError> {
        check_period("ma", period)?;
        Ok(rolling_mean(&self.close, period, period))
    }

    pub fn ema(&self, period: usize) -> Result<Vec<f64>, TechnicalError> {
        check_period("ema", period)?;
        Ok(ewm_mean(&self.close, 2.0 / (period as f64 + 1.0), false, 0))
    }

    pub fn sma(&self, period: usize) -> Result<Vec<f64>, TechnicalError> {
        check_period("sma", period)?;
        Ok(rolling_mean(&self.close, period, 1))
    }

    /// Returns (macd, signal).
    pub fn macd(&self, fast: usize, slow: usize, signal: usize) -> Result<(Vec<f64>, Vec<f64>), TechnicalError> {
        let fast = self.ema(fast)?;
        let slow = self.ema(slow)?;
        let macd: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        let signal = ewm_mean(&macd, 2.0 / (signal as f64 + 1.0), true, 0);
        Ok((macd, signal))
    }

    /// Returns (obv, obv percentage change).
    pub fn obv(&self) -> (Vec<f64>, Vec<f64>) {
        let mut obv = Vec::with_capacity(self.len());
        let mut total = 0.0;
        for i in 0..self.len() {
            let step = if i == 0 {
                self.volume[0]
            } else if self.close[i] > self.close[i - 1] {
                self.volume[i]
            } else if self.close[i] < self.close[i - 1] {
                -self.volume[i]
            } else {
                0.0
            };
            total += step;
            obv.push(total);
        }
        let pc = (0..obv.len())
            .map(|i| {
                if i == 0 {
                    return 0.0;
                }
                let change = obv[i] / obv[i - 1] - 1.0;
                if change.is_nan() {
                    0.0
                } else {
                    change
                }
            })
            .collect();
        (obv, pc)
    }

    /// Returns (eri_buy, eri_sell).
    pub fn eri_signals(&self) -> Result<(Vec<bool>, Vec<bool>), TechnicalError> {
        let ema = self.ema(13)?;
        let bull: Vec<f64> = self.high.iter().zip(&ema).map(|(h, e)| h - e).collect();
        let bear: Vec<f64> = self.low.iter().zip(&ema).map(|(l, e)| l - e).collect();
        let bull_prev = shift(&bull, 1);
        let bear_prev = shift(&bear, 1);

        let buy = (0..self.len())
            .map(|i| (bear[i] < 0.0 && bear[i] > bear_prev[i]) || bull[i] > bull_prev[i])
            .collect();
        let sell = (0..self.len())
            .map(|i| (bull[i] > 0.0 && bull[i] < bull_prev[i]) || bear[i] < bear_prev[i])
            .collect();
        Ok((buy, sell))
    }

    fn cross_signals(&self, prefix: &str, fast: &[f64], slow: &[f64]) -> Vec<(String, Vec<bool>)> {
        let golden = gt(fast, slow);
        let death = lt(fast, slow);
        vec![
            (format!("{}_golden_cross_co", prefix), crossover(&golden)),
            (format!("{}_death_cross_co", prefix), crossover(&death)),
            (format!("{}_golden_cross", prefix), golden),
            (format!("{}_death_cross", prefix), death),
        ]
    }

    pub fn ema_signals(&self) -> Result<Vec<(String, Vec<bool>)>, TechnicalError> {
        Ok(self.cross_signals("ema", &self.ema(12)?, &self.ema(26)?))
    }

    pub fn sma_signals(&self) -> Result<Vec<(String, Vec<bool>)>, TechnicalError> {
        Ok(self.cross_signals("sma", &self.sma(50)?, &self.sma(200)?))
    }

    pub fn macd_signals(&self, fast: usize, slow: usize, signal: usize) -> Result<Vec<(String, Vec<bool>)>, TechnicalError> {
        let (macd, signal) = self.macd(fast, slow, signal)?;
        let above = gt(&macd, &signal);
        let below = lt(&macd, &signal);
        Ok(vec![
            ("macd_gt_signal_co".to_string(), crossover(&above)),
            ("macd_lt_signal_co".to_string(), crossover(&below)),
            ("macd_gt_signal".to_string(), above),
            ("macd_lt_signal".to_string(), below),
        ])
    }

    pub fn ichimoku_signals(&self) -> Vec<(String, Vec<bool>)> {
        let midpoint = |window: usize| -> Vec<f64> {
            let high = rolling_max(&self.high, window);
            let low = rolling_min(&self.low, window);
            high.iter().zip(low).map(|(h, l)| (h + l) / 2.0).collect()
        };
        let tenkan = midpoint(9);
        let kijun = midpoint(26);
        let span_a: Vec<f64> = tenkan.iter().zip(&kijun).map(|(t, k)| (t + k) / 2.0).collect();
        let span_a = shift(&span_a, 26);
        let span_b = shift(&midpoint(52), 26);

        let below = (0..self.len())
            .map(|i| self.close[i] < nan_min(span_a[i], span_b[i]))
            .collect();
        let above = (0..self.len())
            .map(|i| self.close[i] > nan_max(span_a[i], span_b[i]))
            .collect();

        vec![
            ("ichimoku_golden_cross".to_string(), gt(&tenkan, &kijun)),
            ("ichimoku_death_cross".to_string(), lt(&tenkan, &kijun)),
            ("price_below_cloud".to_string(), below),
            ("price_above_cloud".to_string(), above),
        ]
    }

    /// Returns (upper, middle, lower) bands over the typical price.
    pub fn bollinger_bands(&self, length: usize, width: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let tp: Vec<f64> = (0..self.len())
            .map(|i| (self.high[i] + self.low[i] + self.close[i]) / 3.0)
            .collect();
        let ma = rolling_mean(&tp, length, length);
        let sigma = rolling_std(&tp, length);
        let upper = ma.iter().zip(&sigma).map(|(m, s)| m + width * s).collect();
        let lower = ma.iter().zip(&sigma).map(|(m, s)| m - width * s).collect();
        (upper, ma, lower)
    }

    /// Returns (bb_buy, bb_sell).
    pub fn bollinger_bands_signals(&self, length: usize, width: f64) -> (Vec<bool>, Vec<bool>) {
        let (upper, _, lower) = self.bollinger_bands(length, width);
        (lt(&self.close, &lower), gt(&self.close, &upper))
    }

    fn pattern<F>(&self, f: F) -> Vec<bool>
    where
        F: Fn(usize) -> bool,
    {
        (0..self.len()).map(f).collect()
    }

    fn at(series: &[f64], i: usize, back: usize) -> f64 {
        if i >= back {
            series[i - back]
        } else {
            f64::NAN
        }
    }

    pub fn shooting_star(&self) -> Vec<bool> {
        let (o, h, l, c) = (&self.open, &self.high, &self.low, &self.close);
        self.pattern(|i| {
            let body = (o[i] - c[i]).abs();
            Self::at(o, i, 1) < Self::at(c, i, 1)
                && Self::at(c, i, 1) < o[i]
                && h[i] - o[i].max(c[i]) >= body * 3.0
                && c[i].min(o[i]) - l[i] <= body
        })
    }

    pub fn hanging_man(&self) -> Vec<bool> {
        let (o, h, l, c) = (&self.open, &self.high, &self.low, &self.close);
        self.pattern(|i| {
            let range = 0.001 + h[i] - l[i];
            h[i] - l[i] > 4.0 * (o[i] - c[i])
                && (c[i] - l[i]) / range >= 0.75
                && (o[i] - l[i]) / range >= 0.75
                && Self::at(h, i, 1) < o[i]
                && Self::at(h, i, 2) < o[i]
        })
    }

    pub fn evening_star(&self) -> Vec<bool> {
        let (o, c) = (&self.open, &self.close);
        self.pattern(|i| {
            let prev_low_body = nan_min(Self::at(o, i, 1), Self::at(c, i, 1));
            prev_low_body > Self::at(c, i, 2)
                && Self::at(c, i, 2) > Self::at(o, i, 2)
                && c[i] < o[i]
                && o[i] < prev_low_body
        })
    }

    pub fn hammer(&self) -> Vec<bool> {
        let (o, h, l, c) = (&self.open, &self.high, &self.low, &self.close);
        self.pattern(|i| {
            let range = 0.001 + h[i] - l[i];
            h[i] - l[i] > 3.0 * (o[i] - c[i]) && (c[i] - l[i]) / range > 0.6 && (o[i] - l[i]) / range > 0.6
        })
    }

    pub fn inverted_hammer(&self) -> Vec<bool> {
        let (o, h, l, c) = (&self.open, &self.high, &self.low, &self.close);
        self.pattern(|i| {
            let range = 0.001 + h[i] - l[i];
            h[i] - l[i] > 3.0 * (o[i] - c[i]) && (h[i] - c[i]) / range > 0.6 && (h[i] - o[i]) / range > 0.6
        })
    }

    pub fn morning_star(&self) -> Vec<bool> {
        let (o, c) = (&self.open, &self.close);
        self.pattern(|i| {
            let prev_high_body = nan_max(Self::at(o, i, 1), Self::at(c, i, 1));
            prev_high_body < Self::at(c, i, 2)
                && Self::at(c, i, 2) < Self::at(o, i, 2)
                && c[i] > o[i]
                && o[i] > prev_high_body
        })
    }

    pub fn abandoned_baby(&self) -> Vec<bool> {
        let (o, h, l, c) = (&self.open, &self.high, &self.low, &self.close);
        self.pattern(|i| {
            o[i] < c[i]
                && Self::at(h, i, 1) < l[i]
                && Self::at(o, i, 2) > Self::at(c, i, 2)
                && Self::at(h, i, 1) < Self::at(l, i, 2)
        })
    }

    /// ROC band 1..=5 reached on the way up, 0 when none.
    pub fn pump_level(&self, index: isize, period: usize, sensitivity: f64) -> Option<Decimal> {
        let roc = self.roc(period);
        let value = self.position(index).map(|pos| roc[pos]).unwrap_or(f64::NAN);
        let bands = [6.0, 9.0, 12.0, 20.0, 30.0].map(|b| b * sensitivity);
        let level = bands
            .iter()
            .enumerate()
            .find(|&(n, &low)| value >= low && bands.get(n + 1).map_or(true, |&high| value < high))
            .map_or(0, |(n, _)| n + 1);
        Some(Decimal::from(level))
    }

    /// ROC band 1..=5 reached on the way down, 0 when none.
    pub fn dump_level(&self, index: isize, period: usize, sensitivity: f64) -> Option<Decimal> {
        let roc = self.roc(period);
        let value = self.position(index).map(|pos| roc[pos]).unwrap_or(f64::NAN);
        let bands = [6.0, 9.0, 12.0, 20.0, 30.0].map(|b| -b * sensitivity);
        let level = bands
            .iter()
            .enumerate()
            .find(|&(n, &high)| value <= high && bands.get(n + 1).map_or(true, |&low| value > low))
            .map_or(0, |(n, _)| n + 1);
        Some(Decimal::from(level))
    }

    /// Fractal support and resistance levels as (row, price), keeping only
    /// levels at least one average candle range apart.
    pub fn support_resistance_levels(&self) -> Vec<(usize, Decimal)> {
        let mut levels: Vec<(usize, f64)> = Vec::new();
        if self.len() < 5 {
            return Vec::new();
        }
        let spread = (0..self.len()).map(|i| self.high[i] - self.low[i]).sum::<f64>() / self.len() as f64;
        let is_far = |price: f64, levels: &[(usize, f64)]| levels.iter().all(|(_, l)| (price - l).abs() >= spread);

        for i in 2..self.len() - 2 {
            let (l, h) = (&self.low, &self.high);
            let support = l[i] < l[i - 1] && l[i] < l[i + 1] && l[i + 1] < l[i + 2] && l[i - 1] < l[i - 2];
            let resistance = h[i] > h[i - 1] && h[i] > h[i + 1] && h[i + 1] > h[i + 2] && h[i - 1] > h[i - 2];
            if support {
                if is_far(l[i], &levels) {
                    levels.push((i, l[i]));
                }
            } else if resistance && is_far(h[i], &levels) {
                levels.push((i, h[i]));
            }
        }

        levels
            .into_iter()
            .filter_map(|(i, price)| to_decimal(price, 2).map(|p| (i, p)))
            .collect()
    }

    /// Evaluates indicator `name` at row `index` (negative counts from the end).
    pub fn indicator(&self, name: &str, params: &IndicatorParams, index: isize) -> Result<IndicatorValues, TechnicalError> {
        let mut out = IndicatorValues::new();
        let flags = |out: &mut IndicatorValues, series: Vec<(String, Vec<bool>)>| {
            for (key, values) in series {
                out.insert(key, self.flag_at(&values, index));
            }
        };

        match name {
            "rsi" => {
                let rsi = self.rsi(param_usize(params, "period", 14)?);
                out.insert("rsi".into(), self.value_at(&rsi, index));
            }
            "stochastic" => {
                let (k, d) = self.stochastic(param_usize(params, "k_period", 14)?, param_usize(params, "d_period", 3)?);
                out.insert("%K".into(), self.value_at(&k, index));
                out.insert("%D".into(), self.value_at(&d, index));
            }
            "roc" => {
                let roc = self.roc(param_usize(params, "period", 18)?);
                out.insert("roc".into(), self.value_at(&roc, index));
            }
            "ma" => {
                let ma = self.ma(param_usize(params, "period", 12)?)?;
                out.insert("ma".into(), self.value_at(&ma, index));
            }
            "ema" => {
                let ema = self.ema(param_usize(params, "period", 12)?)?;
                out.insert("ema".into(), self.value_at(&ema, index));
            }
            "sma" => {
                let sma = self.sma(param_usize(params, "period", 12)?)?;
                out.insert("sma".into(), self.value_at(&sma, index));
            }
            "obv" => {
                let (obv, pc) = self.obv();
                out.insert("obv".into(), self.value_at(&obv, index));
                out.insert("obv_pc".into(), self.value_at(&pc, index));
            }
            "eri" => {
                let (buy, sell) = self.eri_signals()?;
                flags(&mut out, vec![("eri_buy".into(), buy), ("eri_sell".into(), sell)]);
            }
            "ema_signals" => flags(&mut out, self.ema_signals()?),
            "sma_signals" => flags(&mut out, self.sma_signals()?),
            "macd" => flags(
                &mut out,
                self.macd_signals(
                    param_usize(params, "fast_length", 12)?,
                    param_usize(params, "slow_length", 26)?,
                    param_usize(params, "signal_smoothing", 9)?,
                )?,
            ),
            "ichimoku" => flags(&mut out, self.ichimoku_signals()),
            "bollinger_bands" => {
                let (upper, ma, lower) =
                    self.bollinger_bands(param_usize(params, "length", 20)?, param_f64(params, "width", 2.0));
                out.insert("bb_upper".into(), self.value_at(&upper, index));
                out.insert("bb_ma".into(), self.value_at(&ma, index));
                out.insert("bb_lower".into(), self.value_at(&lower, index));
            }
            "bollinger_bands_signals" => {
                let (buy, sell) =
                    self.bollinger_bands_signals(param_usize(params, "length", 20)?, param_f64(params, "width", 2.0));
                flags(&mut out, vec![("bb_buy".into(), buy), ("bb_sell".into(), sell)]);
            }
            "shooting_star" => flags(&mut out, vec![(name.into(), self.shooting_star())]),
            "hanging_man" => flags(&mut out, vec![(name.into(), self.hanging_man())]),
            "evening_star" => flags(&mut out, vec![(name.into(), self.evening_star())]),
            "hammer" => flags(&mut out, vec![(name.into(), self.hammer())]),
            "inverted_hammer" => flags(&mut out, vec![(name.into(), self.inverted_hammer())]),
            "morning_star" => flags(&mut out, vec![(name.into(), self.morning_star())]),
            "abandoned_baby" => flags(&mut out, vec![(name.into(), self.abandoned_baby())]),
            "pump_level" => {
                let level = self.pump_level(
                    index,
                    param_usize(params, "period", 18)?,
                    param_f64(params, "sensitivity_factor", 1.0),
                );
                out.insert("pump_level".into(), level);
            }
            "dump_level" => {
                let level = self.dump_level(
                    index,
                    param_usize(params, "period", 18)?,
                    param_f64(params, "sensitivity_factor", 1.0),
                );
                out.insert("dump_level".into(), level);
            }
            other => return Err(TechnicalError::UnknownIndicator(other.to_string())),
        }

        Ok(out)
    }
}

fn param_usize(params: &IndicatorParams, field: &str, default: usize) -> Result<usize, TechnicalError> {
    use num_traits::ToPrimitive;

    match params.get(field) {
        None => Ok(default),
        Some(value) => value
            .trunc()
            .to_usize()
            .filter(|v| *v > 0 && value.fract().is_zero())
            .ok_or_else(|| TechnicalError::InvalidParameter {
                field: field.to_string(),
                value: *value,
            }),
    }
}

fn param_f64(params: &IndicatorParams, field: &str, default: f64) -> f64 {
    use num_traits::ToPrimitive;

    params.get(field).and_then(|v| v.to_f64()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let close = Decimal::try_from(c).unwrap();
                Candle {
                    timestamp: i as i64 * 60_000,
                    open: close,
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: dec!(10),
                }
            })
            .collect()
    }

    #[test]
    fn test_ewm_adjusted_matches_weighted_average() {
        // alpha 0.5: (3 + 0.5 * 1) / (1 + 0.5)
        let values = ewm_mean(&[1.0, 3.0], 0.5, true, 0);
        assert!((values[1] - 3.5 / 1.5).abs() < 1e-12);
        let recursive = ewm_mean(&[1.0, 3.0], 0.5, false, 0);
        assert_eq!(recursive, vec![1.0, 2.0]);
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (1..=20).map(|v| v as f64).collect();
        let ta = TechnicalAnalysis::new(&candles(&rising));
        let values = ta.indicator("rsi", &IndicatorParams::new(), -1).unwrap();
        assert_eq!(values["rsi"], Some(dec!(100)));

        let flat = vec![5.0; 20];
        let ta = TechnicalAnalysis::new(&candles(&flat));
        assert_eq!(ta.indicator("rsi", &IndicatorParams::new(), -1).unwrap()["rsi"], None);
    }

    #[test]
    fn test_rsi_requires_warmup() {
        let closes: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let ta = TechnicalAnalysis::new(&candles(&closes));
        let rsi = ta.rsi(14);
        assert!(rsi.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_roc_and_pump_levels() {
        let mut closes = vec![100.0; 18];
        closes.push(110.0);
        let ta = TechnicalAnalysis::new(&candles(&closes));
        let mut params = IndicatorParams::new();
        params.insert("period".into(), dec!(18));
        assert_eq!(ta.indicator("roc", &params, -1).unwrap()["roc"], Some(dec!(10)));
        // 10% sits in the 9..12 band
        assert_eq!(ta.indicator("pump_level", &params, -1).unwrap()["pump_level"], Some(dec!(2)));
        assert_eq!(ta.indicator("dump_level", &params, -1).unwrap()["dump_level"], Some(dec!(0)));
    }

    #[test]
    fn test_stochastic_window() {
        let closes = [10.0, 11.0, 12.0, 13.0];
        let ta = TechnicalAnalysis::new(&candles(&closes));
        let (k, d) = ta.stochastic(3, 2);
        assert!(k[1].is_nan());
        // highest high 14, lowest low 10, close 13
        assert!((k[3] - 75.0).abs() < 1e-9);
        assert!((d[3] - (k[2] + k[3]) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_crossover_marks_first_row_of_streak() {
        let flags = [true, true, false, true, true];
        assert_eq!(crossover(&flags), vec![true, false, false, true, false]);
    }

    #[test]
    fn test_ma_period_bounds() {
        let ta = TechnicalAnalysis::new(&candles(&[1.0, 2.0]));
        let mut params = IndicatorParams::new();
        params.insert("period".into(), dec!(3));
        assert_eq!(
            ta.indicator("ma", &params, -1),
            Err(TechnicalError::InvalidPeriod { indicator: "ma".into(), period: 3 })
        );
        assert_eq!(
            ta.indicator("unknown", &params, -1),
            Err(TechnicalError::UnknownIndicator("unknown".into()))
        );
    }

    #[test]
    fn test_obv_accumulates_signed_volume() {
        let ta = TechnicalAnalysis::new(&candles(&[10.0, 11.0, 10.0, 10.0]));
        let (obv, pc) = ta.obv();
        assert_eq!(obv, vec![10.0, 20.0, 10.0, 10.0]);
        assert_eq!(pc[0], 0.0);
        assert!((pc[1] - 1.0).abs() < 1e-12);
        assert!((pc[2] + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_bollinger_bands_flat_series() {
        let ta = TechnicalAnalysis::new(&candles(&[50.0; 25]));
        let values = ta.indicator("bollinger_bands", &IndicatorParams::new(), -1).unwrap();
        assert_eq!(values["bb_ma"], Some(dec!(50)));
        assert_eq!(values["bb_upper"], Some(dec!(50)));
        let signals = ta.indicator("bollinger_bands_signals", &IndicatorParams::new(), -1).unwrap();
        assert_eq!(signals["bb_buy"], Some(Decimal::ZERO));
    }

    #[test]
    fn test_short_buffer_returns_none() {
        let ta = TechnicalAnalysis::new(&candles(&[1.0, 2.0]));
        let values = ta.indicator("roc", &IndicatorParams::new(), -5).unwrap();
        assert_eq!(values["roc"], None);
    }

    #[test]
    fn test_hammer_pattern() {
        let candle = Candle {
            timestamp: 0,
            open: dec!(9.8),
            high: dec!(10),
            low: dec!(5),
            close: dec!(9.9),
            volume: dec!(1),
        };
        let ta = TechnicalAnalysis::new(&[candle]);
        assert_eq!(ta.indicator("hammer", &IndicatorParams::new(), -1).unwrap()["hammer"], Some(Decimal::ONE));
    }

    #[test]
    fn test_support_levels_are_spaced() {
        let lows = [10.0, 8.0, 5.0, 8.0, 10.0, 9.0, 5.2, 9.0, 10.0];
        let ta = TechnicalAnalysis::new(&candles(&lows));
        let levels = ta.support_resistance_levels();
        // the second dip is within one average range of the first
        assert_eq!(levels, vec![(2, dec!(4)), (4, dec!(11))]);
    }
}
