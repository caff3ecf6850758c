//! Capture module
//!
//! Device capability traits, the streaming session and its circular
//! sample buffer, and time-window extraction.

pub mod buffer;
pub mod device;
pub mod gain;
pub mod session;
pub mod sim;
pub mod window;

pub use buffer::{BufferError, BufferInfo, CircularTimestampBuffer, SampleChunk, Window};
pub use device::{
    DeviceDriver, DeviceError, ReadResult, SampleFormat, SdrDevice, StreamDirection, StreamError,
    StreamHandle,
};
pub use gain::{apply_gains, GainOutcome, GainSettings, GainStage};
pub use session::{SessionError, SessionState, SessionStatus, StreamingSession};
pub use sim::{Pacing, SimulatedConfig, SimulatedDevice, SimulatedDriver, SimulatedStats};
pub use window::{extract, WindowExtractor, WindowQuery};
