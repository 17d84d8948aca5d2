pub mod aggregator;
pub mod config;
pub mod controller;
pub mod error;
pub mod feed;
pub mod fixture;
pub mod journal;
pub mod limits;
pub mod lockengine;
pub mod model;
pub mod notify;
pub mod observability;
pub mod ports;
pub mod runner;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod testing;
