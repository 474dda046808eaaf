//! Session inputs: the per-lab config file, the per-recording descriptor and
//! the directory layout derived from both.

mod config;
mod context;
mod descriptor;
mod layout;

pub use config::{SessionConfig, REQUIRED_CONFIG_KEYS};
pub use context::SessionContext;
pub use descriptor::{ModuleFlags, SessionDescriptor, SurveyLayout};
pub use layout::SessionLayout;
