//! Call bounded context - one cellular call as seen by call-control clients

pub mod addressing;
pub mod backend;
pub mod cause;
pub mod content;
pub mod event;
pub mod hold;
pub mod member;
pub mod request_queue;
pub mod session;
pub mod tone;
pub mod value_object;

pub use backend::{BackendNotification, CallService, PendingRequest};
pub use cause::{BackendError, CallCause};
pub use event::{CallEvent, EventBus, Notification};
pub use session::{CallSession, SessionContext};
pub use value_object::{CallState, ChangeReason, HoldReason, HoldState, ReleaseReason};
