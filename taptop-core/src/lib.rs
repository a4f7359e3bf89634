pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod outcome;
pub mod parse;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TaptopConfig;
pub use error::{ParseError, TapError};
pub use event::{Direction, Endpoint, EventKind, LifecycleEvent};
pub use outcome::{Outcome, classify};
pub use parse::parse_event;
