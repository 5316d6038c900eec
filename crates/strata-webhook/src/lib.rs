//! Webhook delivery classification and dispatch.
//!
//! The dispatcher takes raw provider deliveries (event type, optional delivery
//! id, JSON body), records them through [`strata_store::ActivityStore`], and
//! applies the domain write each event kind implies. Push events land in the
//! git activity log, issue events drive the task ledger, and everything else
//! is recorded without a handler.

pub mod delivery_dispatch;
pub mod webhook_payloads;

pub use delivery_dispatch::{
    DeliveryAck, DeliveryOutcome, DeployHook, DispatchError, WebhookDelivery, WebhookDispatcher,
    WebhookDispatcherConfig, WebhookEventKind,
};
pub use webhook_payloads::branch_from_ref;
