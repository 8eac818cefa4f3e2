//! sprinklerd — broker-driven irrigation zone control.

pub mod broker;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gpio;
pub mod logging;
pub mod registry;
pub mod schedule;
pub mod supervisor;
pub mod worker;
