pub mod broker_client;

pub use broker_client::{BrokerClient, OrderOutcome, OrderRejection};
