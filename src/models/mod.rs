pub mod event;
pub mod tenant;

pub use event::{EventQuery, NewRequestEvent, RequestEvent};
pub use tenant::{Domain, IpFilter, PathFilter, Tenant};
