//! Page-view capture pipeline
//!
//! A capture request passes through, in order: tenant resolution, referring
//! domain validation, IP and path filters, identity resolution and event
//! recording. Each stage may end the request; nothing is written unless every
//! stage before recording has passed.

pub mod cookies;
pub mod error;
pub mod filters;
pub mod handlers;
pub mod identity;
pub mod ip_extractor;
pub mod recorder;
pub mod routes;
pub mod validator;

pub use error::CaptureError;
pub use handlers::{CaptureResponse, CaptureState};
pub use identity::{TrackingIdentity, TRACKING_KEY_SESSION_KEY};
pub use routes::create_capture_router;
