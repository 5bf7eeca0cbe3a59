pub mod client;
pub mod config;
pub mod domains;
pub mod error;
pub mod interfaces;
pub mod relay;
pub mod services;

pub use crate::client::{HostInputs, HostOutputs, Participant};
pub use crate::config::Config;
pub use crate::domains::envelope::{Envelope, GameEvent, MessageKind};
pub use crate::error::{BedlamError, Result};
