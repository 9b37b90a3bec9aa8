mod governor;
pub mod preview;
mod recent;
mod source;
pub mod transport;
mod types;

pub use governor::{CadenceGovernor, HealthTracker};
pub use recent::RecentFrames;
pub use source::{FrameSource, SourceSettings};
pub use transport::{CameraTransport, MockStep, MockTransport};
pub use types::{Frame, FramePreview, FrameStatus, RawFrame, SourceHealth, SourceTag};
