//! Core module containing the fundamental types of the notification core

pub mod annotation;
pub mod auth;
pub mod error;
pub mod events;
pub mod filter;

pub use annotation::{Annotation, AnnotationConverter, AnnotationLookup, JsonAnnotationConverter};
pub use auth::{Authenticator, StaticTokenAuthenticator, UserContext};
pub use error::{FilterError, NotifyError, NotifyResult};
pub use events::{AnnotationAction, EventQueue, PendingEvent};
pub use filter::{RawClause, RawFilter, SubscriptionFilter, parse_filter};
