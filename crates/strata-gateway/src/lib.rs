//! HTTP gateway that receives provider webhooks and serves activity queries.

pub mod webhook_gateway;

pub use webhook_gateway::*;
