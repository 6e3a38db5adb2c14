//! Rate limiting logic and state management.

mod clock;
mod decision;
mod key;
mod store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{decide, CounterEntry, Decision, Policy};
pub use key::ClientKey;
pub use store::CounterStore;
pub use sweeper::SweeperConfig;
