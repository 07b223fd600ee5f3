#![warn(missing_docs)]

//! Flowlink API: connection configuration, OpenFlow codec capability traits and registry keys

pub mod config;
pub mod connection;
pub mod extensibility;
pub mod keys;
pub mod protocol;
