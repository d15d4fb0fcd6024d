//! Teapot - HTCPCP Tea Pot Control Service
//!
//! This crate implements a tea pot speaking the Hyper Text Coffee Pot Control
//! Protocol (RFC 2324, extended for tea by RFC 7168). Every tea variant is a
//! pot that is either idle or brewing, and gated variants only start brewing
//! once enough requests have arrived within the current second.

pub mod brewing;
pub mod config;
pub mod error;
pub mod htcpcp;
