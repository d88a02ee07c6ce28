pub mod format;
pub mod compress;
pub mod encode;
pub mod signal;
pub mod source;
pub mod session;

pub use encode::{delay_hundredths, StreamEncoder};
pub use format::{Bounds, Color, Frame, FormatError, Palette};
pub use session::{run_session, SessionState, StreamConfig, StreamError, StreamSession};
pub use signal::Shutdown;
pub use source::{FrameProducer, FrameSource, Snapshot};
