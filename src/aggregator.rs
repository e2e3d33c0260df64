//! Per-symbol snapshots and rolling sample buffers.
//!
//! The aggregator is the sole writer of this state: trade events append to
//! the bounded FIFO buffers and refresh the derived statistics, quote events
//! touch only the book side. Everything downstream reads immutable copies.

use std::collections::{HashMap, VecDeque};

use crate::config::Config;
use crate::events::MarketEvent;

/// Latest known state for one symbol. Overwritten in place as events arrive.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub last_price: f64,
    pub last_volume: f64,
    pub bid: f64,
    pub ask: f64,
    pub spread: f64,
    /// Coefficient of variation over the stats window; `None` below the
    /// minimum sample count.
    pub volatility: Option<f64>,
    /// Fractional change oldest→newest over the stats window.
    pub momentum: Option<f64>,
    pub updated_ms: u64,
}

impl MarketSnapshot {
    fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            last_price: 0.0,
            last_volume: 0.0,
            bid: 0.0,
            ask: 0.0,
            spread: 0.0,
            volatility: None,
            momentum: None,
            updated_ms: 0,
        }
    }
}

/// Copies of the recent sample series, handed to the anomaly analyzer.
#[derive(Debug, Clone, Default)]
pub struct SeriesView {
    pub prices: Vec<f64>,
    pub volumes: Vec<f64>,
    pub timestamps: Vec<u64>,
    pub field: Vec<f64>,
}

struct SymbolState {
    prices: VecDeque<f64>,
    volumes: VecDeque<f64>,
    timestamps: VecDeque<u64>,
    field_series: VecDeque<f64>,
    snapshot: MarketSnapshot,
}

impl SymbolState {
    fn new(symbol: &str, price_cap: usize, field_cap: usize) -> Self {
        Self {
            prices: VecDeque::with_capacity(price_cap),
            volumes: VecDeque::with_capacity(price_cap),
            timestamps: VecDeque::with_capacity(price_cap),
            field_series: VecDeque::with_capacity(field_cap),
            snapshot: MarketSnapshot::empty(symbol),
        }
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, cap: usize, value: T) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(value);
}

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

pub fn stddev(xs: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    var.sqrt()
}

pub struct SnapshotAggregator {
    price_cap: usize,
    field_cap: usize,
    window: usize,
    min_samples: usize,
    books: HashMap<String, SymbolState>,
}

impl SnapshotAggregator {
    pub fn new(cfg: &Config) -> Self {
        Self {
            price_cap: cfg.price_buffer_cap,
            field_cap: cfg.field_series_cap,
            window: cfg.stats_window,
            min_samples: cfg.min_samples,
            books: HashMap::new(),
        }
    }

    /// Ingest one decoded event; updates exactly one symbol's state.
    /// Out-of-order timestamps are taken as-is, last write wins.
    pub fn on_event(&mut self, event: &MarketEvent) {
        let price_cap = self.price_cap;
        let field_cap = self.field_cap;
        let window = self.window;
        let min_samples = self.min_samples;
        let state = self
            .books
            .entry(event.symbol().to_string())
            .or_insert_with(|| SymbolState::new(event.symbol(), price_cap, field_cap));

        match event {
            MarketEvent::Trade { price, qty, ts_ms, .. } => {
                push_bounded(&mut state.prices, price_cap, *price);
                push_bounded(&mut state.volumes, price_cap, *qty);
                push_bounded(&mut state.timestamps, price_cap, *ts_ms);
                state.snapshot.last_price = *price;
                state.snapshot.last_volume = *qty;
                state.snapshot.updated_ms = *ts_ms;

                if state.prices.len() >= min_samples {
                    let recent: Vec<f64> = state
                        .prices
                        .iter()
                        .rev()
                        .take(window)
                        .rev()
                        .copied()
                        .collect();
                    let m = mean(&recent);
                    state.snapshot.volatility =
                        if m > 0.0 { Some(stddev(&recent) / m) } else { None };
                    let oldest = recent[0];
                    let newest = recent[recent.len() - 1];
                    let momentum = if oldest != 0.0 {
                        Some((newest - oldest) / oldest)
                    } else {
                        None
                    };
                    state.snapshot.momentum = momentum;
                    if let Some(f) = momentum {
                        push_bounded(&mut state.field_series, field_cap, f);
                    }
                }
            }
            MarketEvent::Quote { bid, ask, .. } => {
                state.snapshot.bid = *bid;
                state.snapshot.ask = *ask;
                state.snapshot.spread = (ask - bid).max(0.0);
            }
        }
    }

    /// Latest immutable copy for `symbol`, if any event has been seen.
    pub fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.books.get(symbol).map(|s| s.snapshot.clone())
    }

    /// Copies of the recent sample series for the analyzer.
    pub fn series(&self, symbol: &str) -> SeriesView {
        match self.books.get(symbol) {
            Some(s) => SeriesView {
                prices: s.prices.iter().copied().collect(),
                volumes: s.volumes.iter().copied().collect(),
                timestamps: s.timestamps.iter().copied().collect(),
                field: s.field_series.iter().copied().collect(),
            },
            None => SeriesView::default(),
        }
    }

    #[cfg(test)]
    fn buffer_lens(&self, symbol: &str) -> (usize, usize, usize, usize) {
        let s = &self.books[symbol];
        (
            s.prices.len(),
            s.volumes.len(),
            s.timestamps.len(),
            s.field_series.len(),
        )
    }
}
