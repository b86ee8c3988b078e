pub mod async_client;
pub mod connection;
pub mod dispatch;
pub mod handlers;
pub mod marshal;
pub mod native;
pub mod polling;
pub mod translate;

#[cfg(all(feature = "native", unix))]
pub mod openldap;

#[cfg(test)]
pub(crate) mod mock;

pub use async_client::*;
pub use connection::*;
pub use dispatch::*;
pub use handlers::*;
pub use marshal::*;
pub use native::*;
pub use polling::*;
pub use translate::*;

#[cfg(all(feature = "native", unix))]
pub use openldap::{OpenLdap, OpenLdapHandle};
