pub mod params;
pub mod types;
pub mod work;
