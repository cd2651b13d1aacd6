pub mod error;
pub mod types;
pub mod freq;
pub mod paths;
pub mod protocol;
pub mod traits;
pub mod net;
pub mod engine;
pub mod controller;
pub mod status;
pub mod config;

pub use controller::MeasurementController;
pub use error::{AvmuError, AvmuResult, ErrorKind};
pub use types::{Path, RxPort, TxPort};
