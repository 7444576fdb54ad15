//! Usage metering and daily quota admission control for a text-generation and
//! speech-synthesis gateway.
//!
//! Control flow per request: [`quota::QuotaGate`] admits or rejects, the
//! business logic performs billable work, and [`recorder::SpendingRecorder`]
//! books each completed sub-operation into the [`ledger::UsageLedger`].

pub mod accumulator;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod pricing;
pub mod quota;
pub mod recorder;
pub mod service;
pub mod storage;
