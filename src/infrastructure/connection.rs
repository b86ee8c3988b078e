//! Directory connection over a native LDAP client library
//!
//! An `LdapConnection` owns one native handle and walks it through
//! initialise, bind, any number of operations, and release. Methods take
//! `&mut self`, so at most one operation is in flight on a handle.

use super::dispatch::{dispatch, Dispatched};
use super::native::{LdapLibrary, LdapOption, NativeHandle, LDAP_NOT_SUPPORTED, LDAP_SUCCESS};
use super::polling::{poll, PollTiming};
use super::translate::check;
use crate::config::ClientConfig;
use crate::domain::{
    AddRequest, BindCredentials, CompareRequest, DeleteRequest, DirectoryRequest,
    DirectoryResponse, ModifyRequest, OperationKind, RenameRequest, ResultCode, ResultStatus,
    SearchRequest, SearchResponse, SessionState,
};
use crate::error::{LdapError, LdapResult};
use std::ffi::CString;
use tokio_util::sync::CancellationToken;

/// LDAP connection handle
pub struct LdapConnection<L: LdapLibrary> {
    library: L,
    config: ClientConfig,
    handle: Option<L::Handle>,
    state: SessionState,
}

impl<L: LdapLibrary> LdapConnection<L> {
    /// Create an uninitialised connection; no native call is made
    pub fn new(library: L, config: ClientConfig) -> Self {
        Self {
            library,
            config,
            handle: None,
            state: SessionState::Uninitialized,
        }
    }

    /// Create and initialise a connection in one step
    pub fn connect(library: L, config: ClientConfig) -> LdapResult<Self> {
        let mut connection = Self::new(library, config);
        connection.initialize()?;
        Ok(connection)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Obtain a native handle for the configured server and apply the
    /// connection options. Does nothing on an already initialised connection.
    pub fn initialize(&mut self) -> LdapResult<()> {
        match self.state {
            SessionState::Uninitialized => {}
            SessionState::Disposed => return Err(LdapError::Disposed),
            SessionState::Initialized | SessionState::Bound => return Ok(()),
        }
        self.config.validate()?;

        let host = self.config.host.clone();
        let port = self.config.port;
        tracing::debug!(host = %host, port = port, "Initializing LDAP connection");

        let mut handle = self.library.initialize(&host, port).map_err(|status| {
            let message = self.library.error_string(status);
            tracing::error!(host = %host, port = port, error = %message, "Failed to initialize LDAP handle");
            LdapError::Initialization {
                host: host.clone(),
                port,
                code: Some(ResultCode(status)),
                message,
            }
        })?;

        let mut options = vec![
            LdapOption::ProtocolVersion(self.config.protocol_version),
            LdapOption::Referrals(self.config.chase_referrals),
        ];
        if let Some(timeout) = self.config.network_timeout() {
            options.push(LdapOption::NetworkTimeout(timeout));
        }

        for option in &options {
            let status = handle.set_option(option);
            if status != LDAP_SUCCESS {
                let message = handle.error_string(status);
                tracing::error!(
                    host = %host,
                    port = port,
                    option = option.name(),
                    error = %message,
                    "Failed to set connection option"
                );
                handle.unbind();
                return Err(LdapError::Initialization {
                    host,
                    port,
                    code: Some(ResultCode(status)),
                    message: format!("failed to set {}: {}", option.name(), message),
                });
            }
        }

        self.handle = Some(handle);
        self.state = SessionState::Initialized;
        tracing::info!(
            host = %host,
            port = port,
            protocol_version = self.config.protocol_version,
            "LDAP connection initialized"
        );
        Ok(())
    }

    /// Authenticate the session. A bound session may bind again; a failed
    /// bind leaves it initialised but unbound.
    pub fn bind(&mut self, credentials: &BindCredentials) -> LdapResult<()> {
        self.state.require_initialized()?;
        let mechanism = credentials.mechanism();
        let handle = self.handle.as_mut().ok_or(LdapError::NotConnected)?;

        let status = match credentials {
            BindCredentials::Anonymous => handle.simple_bind(None, None),
            BindCredentials::Simple { dn, password } => {
                if password.is_empty() {
                    // An empty password is an unauthenticated bind (RFC 4513 5.1.2)
                    tracing::error!(dn = %dn, "Simple bind attempted without a password");
                    return Err(LdapError::Authentication {
                        mechanism: mechanism.to_string(),
                        code: None,
                        message: "simple bind requires a non-empty password".to_string(),
                    });
                }
                let dn = bind_string(mechanism, "dn", dn)?;
                let password = bind_string(mechanism, "password", password)?;
                handle.simple_bind(Some(&dn), Some(&password))
            }
            BindCredentials::Gssapi => {
                let name = bind_string(mechanism, "mechanism", mechanism)?;
                handle.sasl_bind(&name)
            }
        };

        match status {
            LDAP_SUCCESS => {
                self.state = SessionState::Bound;
                tracing::info!(mechanism = mechanism, credentials = ?credentials, "LDAP bind successful");
                Ok(())
            }
            LDAP_NOT_SUPPORTED => {
                self.state = SessionState::Initialized;
                tracing::error!(mechanism = mechanism, "Bind mechanism not supported by native library");
                Err(LdapError::UnsupportedMechanism(mechanism.to_string()))
            }
            _ => {
                self.state = SessionState::Initialized;
                let message = handle.error_string(status);
                tracing::error!(
                    mechanism = mechanism,
                    code = status,
                    error = %message,
                    "LDAP bind failed"
                );
                Err(LdapError::Authentication {
                    mechanism: mechanism.to_string(),
                    code: Some(ResultCode(status)),
                    message,
                })
            }
        }
    }

    /// Run one directory operation to completion.
    ///
    /// Session state and request fields are checked before any native call.
    /// A token cancelled before dispatch returns `Cancelled` without touching
    /// the handle; once dispatched, cancellation abandons the operation and
    /// the connection stays usable.
    pub fn execute(
        &mut self,
        request: &DirectoryRequest,
        cancel: &CancellationToken,
    ) -> LdapResult<DirectoryResponse> {
        self.state.require_bound()?;
        request.validate()?;

        let operation = request.kind();
        if cancel.is_cancelled() {
            tracing::debug!(operation = %operation, "Operation cancelled before dispatch");
            return Err(LdapError::Cancelled {
                operation,
                message_id: None,
            });
        }

        let timing = PollTiming {
            timeout: self.config.operation_timeout(),
            interval: self.config.poll_interval(),
        };
        let handle = self.handle.as_mut().ok_or(LdapError::NotConnected)?;
        let Dispatched {
            message_id,
            mut handler,
        } = dispatch(handle, request)?;
        poll(handle, message_id, &mut *handler, cancel, timing)
    }

    pub fn search(&mut self, request: SearchRequest) -> LdapResult<SearchResponse> {
        let response = self.execute(&request.into(), &CancellationToken::new())?;
        response
            .into_search()
            .ok_or_else(|| mismatched(OperationKind::Search))
    }

    pub fn add(&mut self, request: AddRequest) -> LdapResult<ResultStatus> {
        self.run_status(request.into())
    }

    pub fn modify(&mut self, request: ModifyRequest) -> LdapResult<ResultStatus> {
        self.run_status(request.into())
    }

    pub fn delete(&mut self, request: DeleteRequest) -> LdapResult<ResultStatus> {
        self.run_status(request.into())
    }

    pub fn rename(&mut self, request: RenameRequest) -> LdapResult<ResultStatus> {
        self.run_status(request.into())
    }

    /// True when the entry holds the asserted value
    pub fn compare(&mut self, request: CompareRequest) -> LdapResult<bool> {
        let response = self.execute(&request.into(), &CancellationToken::new())?;
        response
            .into_compare()
            .map(|c| c.matched)
            .ok_or_else(|| mismatched(OperationKind::Compare))
    }

    fn run_status(&mut self, request: DirectoryRequest) -> LdapResult<ResultStatus> {
        let response = self.execute(&request, &CancellationToken::new())?;
        Ok(response.status().clone())
    }

    /// Release the native handle. Safe to call more than once.
    pub fn unbind(&mut self) -> LdapResult<()> {
        self.state = SessionState::Disposed;
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };
        let status = handle.unbind();
        tracing::info!(host = %self.config.host, "LDAP connection released");
        check(&handle, status, "ldap_unbind_ext", &[("host", self.config.host.clone())])
    }
}

impl<L: LdapLibrary> Drop for LdapConnection<L> {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            let status = handle.unbind();
            if status != LDAP_SUCCESS {
                tracing::warn!(
                    host = %self.config.host,
                    error = %handle.error_string(status),
                    "Failed to release LDAP handle"
                );
            }
        }
    }
}

fn bind_string(mechanism: &str, field: &str, value: &str) -> LdapResult<CString> {
    CString::new(value).map_err(|_| LdapError::Authentication {
        mechanism: mechanism.to_string(),
        code: None,
        message: format!("{} contains a NUL byte", field),
    })
}

fn mismatched(operation: OperationKind) -> LdapError {
    LdapError::UnsupportedOperation(format!("{} produced a response of another kind", operation))
}
