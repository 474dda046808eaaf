pub mod config;
pub mod gates;
pub mod params;
pub mod run;
