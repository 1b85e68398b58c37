pub mod cache;
pub mod config;
pub mod dedupe;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod ncbi;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod relational;
pub mod retry;
pub mod search;
