//! Recording system module
//!
//! - `BoundedBuffer` between each capture loop and its drain
//! - `Clock` as the pause-aware time authority
//! - `Synchronizer` for nearest-timestamp frame lookup
//! - `RecordingCoordinator` running the session state machine

pub mod buffer;
pub mod clock;
pub mod coordinator;
pub mod state;
pub mod sync;

pub use buffer::{BoundedBuffer, BufferStats};
pub use clock::{Clock, ManualTime, SystemTime, TimeSource};
pub use coordinator::{RecordingCoordinator, RecordingEvent};
pub use state::{
    AudioDeviceSelector, Progress, ProgressCallback, RecordingConfig, RecordingOutput,
    RecordingState, Region, Session,
};
pub use sync::Synchronizer;
