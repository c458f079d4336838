// Topic subscriptions, routing and delivery

mod dispatch;
mod handle;
pub mod protocol;
pub(crate) mod registry;


pub use dispatch::decode_payload;
pub use handle::{SubscribeError, SubscriptionHandle, SubscriptionId};
pub use protocol::{topics, GitPhase, TaskStatus, TaskStatusUpdate};

pub(crate) use dispatch::deliver;
pub(crate) use registry::{Callback, RouteOutcome, TopicRegistry};
