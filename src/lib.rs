pub mod config;
pub mod model;
pub mod mrc;
pub mod pipeline;
pub mod points;
pub mod raster;
pub mod tools;
