pub mod backend;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod errors;
pub mod evaluation;
pub mod fingerprint;
pub mod generation;
pub mod model;
pub mod normalize;
pub mod prompt;
pub mod providers;
pub mod report;
pub mod sql_parse;
pub mod storage;
pub mod validity;
