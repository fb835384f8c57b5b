pub mod config;
pub mod converters;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::ConvertError;
pub use pipeline::Orchestrator;
