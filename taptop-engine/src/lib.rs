mod stamp;

pub mod neighbors;
pub mod pending;
pub mod scheduler;
pub mod session;
pub mod top;

pub use neighbors::{Neighbor, NeighborObserver, NeighborSet, NoopNeighbors};
pub use pending::{CompletedRequest, PendingRequest, PendingRequestIndex};
pub use scheduler::{DEFAULT_PUBLISH_INTERVAL, SnapshotScheduler};
pub use session::{AggregationSession, SessionStats, TopSnapshot};
pub use top::{RouteKey, TopRouteAggregator, TopRouteRow};
