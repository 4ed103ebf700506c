//! User CRUD service.

mod instrumented;
mod routes;
mod store;

pub use instrumented::InstrumentedUserStore;
pub use routes::{router, UserMetrics};
pub use store::{InMemoryUserStore, NewUser, StoreError, User, UserId, UserStore, UserUpdate};
