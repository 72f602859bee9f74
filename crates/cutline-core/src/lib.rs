//! Cutline Core - Foundation types for the render pipeline
//!
//! This crate provides the fundamental types shared by the frame index and
//! render backend crates:
//! - Time representation (RationalTime, FrameRate, Timebase, TimeRange)
//! - Rendering parameter tuples (AudioParams, VideoParams)
//! - Stream identity (StreamId, StreamDescriptor)
//! - The synchronous signal surface used for change notifications

pub mod error;
pub mod params;
pub mod signal;
pub mod stream;
pub mod time;

pub use error::{CutlineError, Result};
pub use params::{AudioParams, ChannelLayout, RenderParams, SampleFormat, VideoParams};
pub use signal::{BackendEvent, IndexEvent, SignalHub, SubscriptionId};
pub use stream::{StreamDescriptor, StreamId, StreamKind};
pub use time::{FrameRate, RationalTime, TimeRange, Timebase};
