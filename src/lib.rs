pub mod config;
pub mod csv;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod tdms;
