//! Outpatient queue management: walk-in and appointment registration,
//! per-doctor token queues, staff accounts and an audit trail, served
//! through a Telegram bot over PostgreSQL.

pub mod config;
pub mod db;
pub mod handlers;
pub mod i18n;
pub mod services;
pub mod utils;
