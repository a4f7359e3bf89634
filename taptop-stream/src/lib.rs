pub mod controller;
pub mod driver;
pub mod status;
pub mod subscription;

pub use controller::{CLOSE_ABNORMAL, CLOSE_NORMAL, StreamInput, StreamLifecycleController, StreamState};
pub use driver::{TapCommand, TapDriver, TapHandle, spawn_tap};
pub use status::{ErrorBanner, TapStatus};
pub use subscription::{MAX_RPS, SUBSCRIPTION_ID, SubscriptionRequest};
