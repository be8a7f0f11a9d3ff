pub mod client;
pub mod config;
pub mod corpus;
pub mod dispatch;
pub mod logging;
pub mod report;
pub mod sampler;
