//! Raw call surface of the native LDAP client library
//!
//! Everything above this module talks to the library only through
//! [`LdapLibrary`] and [`NativeHandle`]. Status values are the library's own
//! `int` codes; translation into [`crate::error::LdapError`] happens in
//! `translate`.

use super::marshal::{ForeignHeap, LibcHeap, ModificationList, StringArray};
use crate::domain::{ResultStatus, SearchEntry};
use std::ffi::CStr;
use std::fmt;
use std::os::raw::c_int;
use std::sync::Arc;
use std::time::Duration;

/// Raw status returned by a native call
pub type NativeStatus = c_int;

pub const LDAP_SUCCESS: NativeStatus = 0;
pub const LDAP_NOT_SUPPORTED: NativeStatus = -12;

/// Correlation token returned by an asynchronous native call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub c_int);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result message type reported by the result-fetch primitive (`LDAP_RES_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Bind,
    SearchEntry,
    SearchReference,
    SearchResult,
    Modify,
    Add,
    Delete,
    ModDn,
    Compare,
    Extended,
    Intermediate,
    Other(c_int),
}

impl ResultKind {
    pub fn from_native(tag: c_int) -> Self {
        match tag {
            0x61 => ResultKind::Bind,
            0x64 => ResultKind::SearchEntry,
            0x73 => ResultKind::SearchReference,
            0x65 => ResultKind::SearchResult,
            0x67 => ResultKind::Modify,
            0x69 => ResultKind::Add,
            0x6b => ResultKind::Delete,
            0x6d => ResultKind::ModDn,
            0x6f => ResultKind::Compare,
            0x78 => ResultKind::Extended,
            0x79 => ResultKind::Intermediate,
            other => ResultKind::Other(other),
        }
    }

    pub fn to_native(self) -> c_int {
        match self {
            ResultKind::Bind => 0x61,
            ResultKind::SearchEntry => 0x64,
            ResultKind::SearchReference => 0x73,
            ResultKind::SearchResult => 0x65,
            ResultKind::Modify => 0x67,
            ResultKind::Add => 0x69,
            ResultKind::Delete => 0x6b,
            ResultKind::ModDn => 0x6d,
            ResultKind::Compare => 0x6f,
            ResultKind::Extended => 0x78,
            ResultKind::Intermediate => 0x79,
            ResultKind::Other(tag) => tag,
        }
    }

    /// Whether a message of this type ends the operation that produced it
    pub fn is_final(self) -> bool {
        !matches!(
            self,
            ResultKind::SearchEntry | ResultKind::SearchReference | ResultKind::Intermediate
        )
    }
}

/// Classified return of one result fetch
#[derive(Debug)]
pub enum FetchOutcome<M> {
    /// The fetch itself failed; carries the library's error code
    Failed(NativeStatus),
    /// Nothing arrived within the wait
    TimedOut,
    Received(ResultKind, M),
}

/// Connection options applied after initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdapOption {
    ProtocolVersion(i32),
    Referrals(bool),
    NetworkTimeout(Duration),
}

impl LdapOption {
    pub fn name(&self) -> &'static str {
        match self {
            LdapOption::ProtocolVersion(_) => "protocol_version",
            LdapOption::Referrals(_) => "referrals",
            LdapOption::NetworkTimeout(_) => "network_timeout",
        }
    }
}

/// Arguments of the native search call
pub struct SearchParams<'a> {
    pub base: &'a CStr,
    pub scope: c_int,
    pub filter: &'a CStr,
    /// Null-terminated attribute list; `None` requests all user attributes
    pub attributes: Option<&'a StringArray>,
    pub attrs_only: bool,
    pub time_limit: Option<Duration>,
    pub size_limit: c_int,
}

/// Entry point of the native library: produces connection handles
pub trait LdapLibrary: Send + Sync + 'static {
    type Handle: NativeHandle;

    fn initialize(&self, host: &str, port: u16) -> Result<Self::Handle, NativeStatus>;

    /// Human-readable text for a status when no handle exists yet
    fn error_string(&self, status: NativeStatus) -> String {
        format!("native error {}", status)
    }
}

/// One native connection handle.
///
/// Every method maps onto a single library call. Initiating calls write the
/// message id through `msgid` and return the call status; the operation's
/// results are retrieved afterwards with [`NativeHandle::result`].
/// Operations a binding cannot start return [`LDAP_NOT_SUPPORTED`].
pub trait NativeHandle: Send + 'static {
    /// Raw result buffer; released when dropped
    type Message: Send;

    /// Heap the marshaled argument arrays are allocated from
    fn heap(&self) -> Arc<dyn ForeignHeap> {
        Arc::new(LibcHeap)
    }

    fn set_option(&mut self, option: &LdapOption) -> NativeStatus;

    fn simple_bind(&mut self, dn: Option<&CStr>, password: Option<&CStr>) -> NativeStatus;

    fn sasl_bind(&mut self, _mechanism: &CStr) -> NativeStatus {
        LDAP_NOT_SUPPORTED
    }

    fn search_ext(&mut self, params: &SearchParams<'_>, msgid: &mut c_int) -> NativeStatus;

    fn add_ext(&mut self, dn: &CStr, mods: &ModificationList, msgid: &mut c_int) -> NativeStatus;

    fn modify_ext(&mut self, dn: &CStr, mods: &ModificationList, msgid: &mut c_int)
        -> NativeStatus;

    fn delete_ext(&mut self, dn: &CStr, msgid: &mut c_int) -> NativeStatus;

    fn rename(
        &mut self,
        dn: &CStr,
        new_rdn: &CStr,
        new_superior: Option<&CStr>,
        delete_old_rdn: bool,
        msgid: &mut c_int,
    ) -> NativeStatus;

    fn compare_ext(
        &mut self,
        _dn: &CStr,
        _attribute: &CStr,
        _value: &[u8],
        _msgid: &mut c_int,
    ) -> NativeStatus {
        LDAP_NOT_SUPPORTED
    }

    /// Fetch the next result for `msgid`. `all` asks for every outstanding
    /// result of a search at once; the polling loop always passes `false`.
    fn result(
        &mut self,
        msgid: MessageId,
        all: bool,
        timeout: Option<Duration>,
    ) -> FetchOutcome<Self::Message>;

    /// Extract result code, matched DN and diagnostic text from a terminal
    /// message without freeing it
    fn parse_result(&mut self, message: &Self::Message) -> Result<ResultStatus, NativeStatus>;

    fn decode_entry(&mut self, message: &Self::Message) -> Result<SearchEntry, NativeStatus>;

    fn decode_reference(&mut self, message: &Self::Message) -> Result<Vec<String>, NativeStatus>;

    fn abandon(&mut self, msgid: MessageId) -> NativeStatus;

    /// Release the handle. Calling it again after a release is a no-op.
    fn unbind(&mut self) -> NativeStatus;

    fn error_string(&self, status: NativeStatus) -> String;
}
