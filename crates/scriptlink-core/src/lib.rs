pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod normalize;
pub mod retry;
pub mod wire;

pub use config::{
    ConfigError, CursorConfig, DedupConfig, DriverConfig, HarvestConfig, HookConfig,
    RetryConfig, SnapshotConfig,
};
pub use dedup::DedupCache;
pub use error::{DriverError, ErrorClassifier};
pub use event::{CanonicalEvent, Direction, EventKind, HarvestSource, RawCandidateEvent, Scene};
pub use normalize::Normalizer;
pub use retry::{CallSite, RetryOutcome, RetryState};
pub use wire::{Command, Dialect, EvalMode, EventFrame, FrameError, InboundFrame, ReplyFrame};
