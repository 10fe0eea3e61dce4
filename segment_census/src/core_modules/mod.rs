pub mod blob_detector;
pub mod colorizer;
pub mod label_map;
pub mod overlay;
pub mod results;
