pub mod consts;
pub mod descriptor;
pub mod error;
pub mod gates;
pub mod geometry;
pub mod meta;
pub mod pipeline;
pub mod session;
