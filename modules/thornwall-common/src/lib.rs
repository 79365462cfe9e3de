pub mod config;
pub mod error;
pub mod normalize;
pub mod reason;
pub mod retry;
pub mod translate;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
pub use normalize::{contains_normalized, normalize_name};
pub use reason::{clamp01, round2, GroupReasonType, Reason, Reasons, UserReasonType};
pub use retry::{context_sleep, with_retry, RetryOptions, SleepOutcome};
pub use translate::{decode_binary, decode_morse, TranslateError, Translator};
pub use types::{
    ActivityLog, ActivityTarget, ActivityType, Group, GroupMembershipRecord, OutfitRecord,
    Priority, QueueItem, QueueStatus, SubjectId, SubjectStatus, User, THUMBNAIL_PLACEHOLDER,
};
