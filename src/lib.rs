pub mod audio;
pub mod error;
pub mod model;
pub mod transport;

pub use audio::{EngineConfig, EngineEvent};
pub use error::{LooperError, Result};
pub use model::{Loop, Track};
pub use transport::{Looper, LooperState};
