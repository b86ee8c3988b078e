//! LDAP directory client over a native client library
//!
//! Requests are dispatched as asynchronous native operations and their
//! results polled to completion by message id. [`LdapConnection`] is the
//! blocking surface; [`AsyncLdapConnection`] runs the same loop on tokio's
//! blocking pool and adds cancellation by dropping the future.

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod logging;

pub use config::{ClientConfig, LoggingConfig};
pub use domain::*;
pub use error::{ErrorReport, LdapError, LdapResult};
pub use infrastructure::{AsyncLdapConnection, LdapConnection, LdapLibrary, NativeHandle};
pub use logging::init_logging;

#[cfg(all(feature = "native", unix))]
pub use infrastructure::{OpenLdap, OpenLdapHandle};

pub use tokio_util::sync::CancellationToken;
