pub mod data_service;
pub mod events;
pub mod indicators;
pub mod learning;
pub mod position_manager;
pub mod position_sizing;
pub mod predictor;
pub mod signal_engine;
pub mod strategy;
pub mod support_resistance;
pub mod trend;
