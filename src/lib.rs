pub mod config;
pub mod embedding;
pub mod error;
pub mod fbref;
pub mod freshness;
pub mod http_client;
pub mod identity;
pub mod market_value;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod predict;
pub mod regressors;
pub mod schema;
pub mod sofascore;
pub mod source;
pub mod standings;
pub mod store;
pub mod table;
pub mod transfermarkt;
