pub mod chunk;
pub mod cli;
pub mod config;
pub mod constants;
pub mod encoding;
pub mod engine;
pub mod extract;
pub mod logging;
pub mod pipeline;
pub mod pool;
pub mod report;
pub mod sanitize;
pub mod schema;
pub mod source;
pub mod statement;
pub mod store;
