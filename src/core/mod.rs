//! Core data model and algorithms of the Spatial Pooler.

pub mod column;
pub mod config;
pub mod connections;
pub mod homeostasis;
pub mod matrix;
pub mod serialization;
pub mod spatial_pooler;
pub mod store;
pub mod synapses;
pub mod topology;
