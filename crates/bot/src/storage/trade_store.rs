//! File-backed persistence: CSV trade log, JSON position/insight stores.
//!
//! The trade log is append-only CSV — the durable ground truth consumed by
//! the learning engine and the position sizer. Positions, learning insights
//! and the predictor model are whole-file JSON overwrites, last-writer-wins;
//! exactly one bot process is assumed to run per account.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::learning::LearningInsights;
use crate::core::predictor::TrainedModel;
use crate::types::{DailyStats, Position, TradeRecord};

const TRADE_FILE: &str = "trades.csv";
const POSITION_FILE: &str = "positions.json";
const INSIGHTS_FILE: &str = "learning_insights.json";
const MODEL_FILE: &str = "predictor_model.json";

/// Envelope for the positions file.
#[derive(Debug, Serialize, Deserialize)]
struct PositionsDocument {
    last_updated: String,
    positions: Vec<Position>,
}

/// All on-disk stores under one data directory.
pub struct TradeStore {
    trade_path: PathBuf,
    position_path: PathBuf,
    insights_path: PathBuf,
    model_path: PathBuf,
}

impl TradeStore {
    /// Open (creating the directory and CSV header if needed).
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let store = Self {
            trade_path: data_dir.join(TRADE_FILE),
            position_path: data_dir.join(POSITION_FILE),
            insights_path: data_dir.join(INSIGHTS_FILE),
            model_path: data_dir.join(MODEL_FILE),
        };
        store.ensure_trade_header()?;
        Ok(store)
    }

    fn ensure_trade_header(&self) -> Result<()> {
        if self.trade_path.exists() {
            return Ok(());
        }
        let mut writer = csv::Writer::from_path(&self.trade_path)
            .with_context(|| format!("failed to create {}", self.trade_path.display()))?;
        writer.write_record([
            "timestamp",
            "symbol",
            "action",
            "quantity",
            "price",
            "signal_type",
            "reason",
            "pnl",
            "rsi",
            "macd",
            "macd_signal",
            "sma_5",
            "sma_20",
            "volume",
            "volume_avg",
            "atr",
            "mode",
        ])?;
        writer.flush()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Trade log
    // -----------------------------------------------------------------------

    /// Append one immutable record to the trade log.
    pub fn append_trade(&self, record: &TradeRecord) -> Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.trade_path)
            .with_context(|| format!("failed to open {}", self.trade_path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        debug!(
            symbol = %record.symbol,
            action = %record.action,
            quantity = record.quantity,
            price = %record.price,
            "trade logged"
        );
        Ok(())
    }

    /// Load the full trade history. Unparseable rows are skipped with a
    /// warning rather than poisoning the whole history.
    pub fn load_trades(&self) -> Result<Vec<TradeRecord>> {
        if !self.trade_path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.trade_path)
            .with_context(|| format!("failed to open {}", self.trade_path.display()))?;

        let mut records = Vec::new();
        for row in reader.deserialize::<TradeRecord>() {
            match row {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "skipping malformed trade row"),
            }
        }
        Ok(records)
    }

    /// Closed-trade stats for one calendar day (prefix match on the
    /// RFC 3339 timestamp, e.g. "2026-08-06").
    pub fn daily_stats(&self, date_prefix: &str) -> Result<DailyStats> {
        let mut stats = DailyStats::default();
        for record in self.load_trades()? {
            if !record.timestamp.starts_with(date_prefix) || !record.is_closed_trade() {
                continue;
            }
            stats.trades += 1;
            stats.pnl += record.pnl;
            if record.pnl > Decimal::ZERO {
                stats.wins += 1;
            } else if record.pnl < Decimal::ZERO {
                stats.losses += 1;
            }
        }
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Positions
    // -----------------------------------------------------------------------

    /// Whole-file overwrite of the open-position set.
    pub fn save_positions(&self, positions: &[Position], now: &str) -> Result<()> {
        let document = PositionsDocument {
            last_updated: now.to_string(),
            positions: positions.to_vec(),
        };
        let json = serde_json::to_string_pretty(&document)?;
        std::fs::write(&self.position_path, json)
            .with_context(|| format!("failed to write {}", self.position_path.display()))?;
        Ok(())
    }

    /// Load the open-position set from the last save (restart recovery).
    pub fn load_positions(&self) -> Result<Vec<Position>> {
        if !self.position_path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.position_path)?;
        let document: PositionsDocument = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", self.position_path.display()))?;
        Ok(document.positions)
    }

    // -----------------------------------------------------------------------
    // Learning insights / predictor model
    // -----------------------------------------------------------------------

    pub fn save_insights(&self, insights: &LearningInsights) -> Result<()> {
        let json = serde_json::to_string_pretty(insights)?;
        std::fs::write(&self.insights_path, json)
            .with_context(|| format!("failed to write {}", self.insights_path.display()))?;
        Ok(())
    }

    pub fn load_insights(&self) -> Result<Option<LearningInsights>> {
        if !self.insights_path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.insights_path)?;
        Ok(Some(serde_json::from_str(&contents).with_context(|| {
            format!("failed to parse {}", self.insights_path.display())
        })?))
    }

    pub fn save_model(&self, model: &TrainedModel) -> Result<()> {
        let json = serde_json::to_string_pretty(model)?;
        std::fs::write(&self.model_path, json)
            .with_context(|| format!("failed to write {}", self.model_path.display()))?;
        Ok(())
    }

    /// A corrupt model file degrades to `None` (retrain) instead of failing
    /// startup.
    pub fn load_model(&self) -> Option<TrainedModel> {
        if !self.model_path.exists() {
            return None;
        }
        match std::fs::read_to_string(&self.model_path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(model) => Some(model),
                Err(e) => {
                    warn!(error = %e, "predictor model file corrupt, will retrain");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "could not read predictor model file");
                None
            }
        }
    }
}
