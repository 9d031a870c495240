pub mod cfg;
pub mod cmd;
pub mod histogram;
pub mod job;
mod limits;
pub mod loadgen;
pub mod logging;
pub mod nethttp;
pub mod report;
mod shaper;
mod stat;
pub mod ui;
