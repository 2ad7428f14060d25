pub mod api;
pub mod errors;
pub mod frames;
pub mod id;
pub mod notifications;

pub use api::{
    JoinResponse, MatchNotice, MatchResponse, QueueOp, QueueReply, QueueStatus, StatusResponse,
};
pub use errors::{ConfigError, Disposition, QueueError, SessionError, SparkError};
pub use frames::{ClientFrame, ServerFrame};
pub use id::{new_correlation_id, new_id, EventId, ParticipantId, RoomId};
pub use notifications::{Notification, NotificationAction, NotificationLevel, NotificationQueue};

pub type Result<T> = std::result::Result<T, SparkError>;
