#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod atlas;
pub mod batch;
pub mod config;
pub mod data;
pub mod export;
pub mod filter;
pub mod hook;
pub mod organize;
pub mod pnames;
pub mod posterior;
pub mod progress;
pub mod reshape;
pub mod transform;
