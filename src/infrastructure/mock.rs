//! Scripted stand-in for the native library, used by the unit tests
//!
//! `MockLibrary` hands out `MockHandle`s sharing one `MockState`, so a test can
//! keep a clone of the library, run operations through a connection and then
//! inspect every native call that was made, the marshaled arrays that were
//! passed, and the foreign allocations still outstanding.

use super::marshal::{ForeignHeap, LdapMod, ModificationList};
use super::native::{
    FetchOutcome, LdapLibrary, LdapOption, MessageId, NativeHandle, NativeStatus, ResultKind,
    SearchParams, LDAP_NOT_SUPPORTED, LDAP_SUCCESS,
};
use crate::domain::{ResultCode, ResultStatus, SearchEntry};
use std::collections::VecDeque;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Heap that counts live blocks and can be told to fail
pub struct CountingHeap {
    outstanding: AtomicIsize,
    total: AtomicUsize,
    fail_after: Option<usize>,
}

impl CountingHeap {
    pub fn new() -> Self {
        Self {
            outstanding: AtomicIsize::new(0),
            total: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    /// Allocation number `n` (1-based) and every later one returns null
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new()
        }
    }

    pub fn outstanding(&self) -> isize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn total_allocations(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl ForeignHeap for CountingHeap {
    fn allocate(&self, size: usize) -> *mut c_void {
        let n = self.total.fetch_add(1, Ordering::SeqCst) + 1;
        if matches!(self.fail_after, Some(limit) if n >= limit) {
            return std::ptr::null_mut();
        }
        let block = unsafe { libc::calloc(1, size.max(1)) };
        if !block.is_null() {
            self.outstanding.fetch_add(1, Ordering::SeqCst);
        }
        block
    }

    unsafe fn release(&self, block: *mut c_void) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        libc::free(block)
    }
}

/// A record read back from a marshaled `LDAPMod **` array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarshaledRecord {
    pub op: c_int,
    pub attribute: String,
    pub values: Vec<String>,
}

unsafe fn read_string_array(array: *mut *mut c_char) -> Vec<String> {
    let mut values = Vec::new();
    if array.is_null() {
        return values;
    }
    let mut i = 0;
    while !(*array.add(i)).is_null() {
        values.push(CStr::from_ptr(*array.add(i)).to_string_lossy().into_owned());
        i += 1;
    }
    values
}

/// Walk a null-terminated modification array the way the native library does.
///
/// # Safety
///
/// `records` must point to a live array built by `ModificationList`.
pub unsafe fn read_modifications(records: *mut *mut LdapMod) -> Vec<MarshaledRecord> {
    let mut out = Vec::new();
    let mut i = 0;
    while !(*records.add(i)).is_null() {
        let record = &**records.add(i);
        out.push(MarshaledRecord {
            op: record.mod_op,
            attribute: CStr::from_ptr(record.mod_type).to_string_lossy().into_owned(),
            values: read_string_array(record.mod_vals),
        });
        i += 1;
    }
    out
}

/// One scripted answer of the result-fetch primitive
#[derive(Debug, Clone)]
pub enum Delivery {
    Entry(SearchEntry),
    Reference(Vec<String>),
    Terminal(ResultKind, ResultStatus),
    /// A message of the given type with nothing to decode
    Bare(ResultKind),
    Timeout,
    Fail(NativeStatus),
}

impl Delivery {
    pub fn success(kind: ResultKind) -> Self {
        Delivery::Terminal(kind, ResultStatus::success())
    }

    pub fn failure(kind: ResultKind, code: ResultCode, matched: &str, diagnostic: &str) -> Self {
        Delivery::Terminal(
            kind,
            ResultStatus {
                code,
                matched_dn: matched.to_string(),
                diagnostic: diagnostic.to_string(),
                referrals: Vec::new(),
            },
        )
    }

    /// Entry from (attribute, value) pairs; repeated names add values
    pub fn entry(dn: &str, attributes: &[(&str, &str)]) -> Self {
        let mut entry = SearchEntry::new(dn);
        for (name, value) in attributes {
            entry.insert(name, vec![value.to_string()]);
        }
        Delivery::Entry(entry)
    }
}

/// Arguments of the last search initiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCall {
    pub scope: c_int,
    pub filter: String,
    pub attrs_only: bool,
    pub size_limit: c_int,
    pub time_limit: Option<Duration>,
}

/// Arguments of the last rename initiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameCall {
    pub new_rdn: String,
    pub new_superior: Option<String>,
    pub delete_old_rdn: bool,
}

/// Arguments of the last compare initiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareCall {
    pub attribute: String,
    pub value: Vec<u8>,
}

fn owned(value: &CStr) -> String {
    value.to_string_lossy().into_owned()
}

#[derive(Default)]
pub struct MockState {
    pub calls: Vec<&'static str>,
    pub script: VecDeque<Delivery>,
    pub init_status: Option<NativeStatus>,
    pub option_status: NativeStatus,
    pub bind_status: NativeStatus,
    pub sasl_supported: bool,
    pub initiate_status: NativeStatus,
    pub next_msgid: c_int,
    pub fetches: usize,
    pub fetch_timeouts: Vec<Option<Duration>>,
    pub options: Vec<LdapOption>,
    pub bound_dn: Option<String>,
    pub last_dn: Option<String>,
    pub last_modifications: Vec<MarshaledRecord>,
    pub last_search_attributes: Vec<String>,
    pub last_search: Option<SearchCall>,
    pub last_rename: Option<RenameCall>,
    pub last_compare: Option<CompareCall>,
    pub abandoned: Vec<c_int>,
    pub unbinds: usize,
    /// Cancel this token once `fetches` reaches the given count
    pub cancel_after: Option<(usize, CancellationToken)>,
}

impl MockState {
    pub fn native_calls(&self) -> usize {
        self.calls.len()
    }
}

#[derive(Clone)]
pub struct MockLibrary {
    state: Arc<Mutex<MockState>>,
    heap: Arc<CountingHeap>,
    messages_live: Arc<AtomicIsize>,
}

impl MockLibrary {
    pub fn new() -> Self {
        let state = MockState {
            next_msgid: 1,
            sasl_supported: true,
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            heap: Arc::new(CountingHeap::new()),
            messages_live: Arc::new(AtomicIsize::new(0)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn script<I: IntoIterator<Item = Delivery>>(&self, deliveries: I) {
        self.state().script.extend(deliveries);
    }

    pub fn heap(&self) -> &CountingHeap {
        &self.heap
    }

    /// Result messages handed out and not yet dropped
    pub fn messages_live(&self) -> isize {
        self.messages_live.load(Ordering::SeqCst)
    }
}

impl LdapLibrary for MockLibrary {
    type Handle = MockHandle;

    fn initialize(&self, _host: &str, _port: u16) -> Result<MockHandle, NativeStatus> {
        let mut state = self.state();
        state.calls.push("initialize");
        if let Some(status) = state.init_status {
            return Err(status);
        }
        Ok(MockHandle {
            state: Arc::clone(&self.state),
            heap: Arc::clone(&self.heap),
            messages_live: Arc::clone(&self.messages_live),
            released: false,
        })
    }

    fn error_string(&self, status: NativeStatus) -> String {
        format!("mock error {}", status)
    }
}

pub struct MockMessage {
    delivery: Delivery,
    live: Arc<AtomicIsize>,
}

impl Drop for MockMessage {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    heap: Arc<CountingHeap>,
    messages_live: Arc<AtomicIsize>,
    released: bool,
}

impl MockHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn initiate(&mut self, call: &'static str, dn: &CStr, msgid: &mut c_int) -> NativeStatus {
        let mut state = self.state();
        state.calls.push(call);
        state.last_dn = Some(owned(dn));
        if state.initiate_status != LDAP_SUCCESS {
            return state.initiate_status;
        }
        *msgid = state.next_msgid;
        state.next_msgid += 1;
        LDAP_SUCCESS
    }
}

impl NativeHandle for MockHandle {
    type Message = MockMessage;

    fn heap(&self) -> Arc<dyn ForeignHeap> {
        self.heap.clone()
    }

    fn set_option(&mut self, option: &LdapOption) -> NativeStatus {
        let mut state = self.state();
        state.calls.push("set_option");
        state.options.push(option.clone());
        state.option_status
    }

    fn simple_bind(&mut self, dn: Option<&CStr>, _password: Option<&CStr>) -> NativeStatus {
        let mut state = self.state();
        state.calls.push("simple_bind");
        state.bound_dn = dn.map(|d| d.to_string_lossy().into_owned());
        state.bind_status
    }

    fn sasl_bind(&mut self, _mechanism: &CStr) -> NativeStatus {
        let mut state = self.state();
        state.calls.push("sasl_bind");
        if !state.sasl_supported {
            return LDAP_NOT_SUPPORTED;
        }
        state.bind_status
    }

    fn search_ext(&mut self, params: &SearchParams<'_>, msgid: &mut c_int) -> NativeStatus {
        let attributes = params
            .attributes
            // SAFETY: the array is alive for the duration of this call
            .map(|a| unsafe { read_string_array(a.as_ptr()) })
            .unwrap_or_default();
        let mut state = self.state();
        state.last_search_attributes = attributes;
        state.last_search = Some(SearchCall {
            scope: params.scope,
            filter: owned(params.filter),
            attrs_only: params.attrs_only,
            size_limit: params.size_limit,
            time_limit: params.time_limit,
        });
        drop(state);
        self.initiate("search_ext", params.base, msgid)
    }

    fn add_ext(&mut self, dn: &CStr, mods: &ModificationList, msgid: &mut c_int) -> NativeStatus {
        // SAFETY: mods is alive for the duration of this call
        let records = unsafe { read_modifications(mods.as_ptr()) };
        self.state().last_modifications = records;
        self.initiate("add_ext", dn, msgid)
    }

    fn modify_ext(
        &mut self,
        dn: &CStr,
        mods: &ModificationList,
        msgid: &mut c_int,
    ) -> NativeStatus {
        // SAFETY: mods is alive for the duration of this call
        let records = unsafe { read_modifications(mods.as_ptr()) };
        self.state().last_modifications = records;
        self.initiate("modify_ext", dn, msgid)
    }

    fn delete_ext(&mut self, dn: &CStr, msgid: &mut c_int) -> NativeStatus {
        self.initiate("delete_ext", dn, msgid)
    }

    fn rename(
        &mut self,
        dn: &CStr,
        new_rdn: &CStr,
        new_superior: Option<&CStr>,
        delete_old_rdn: bool,
        msgid: &mut c_int,
    ) -> NativeStatus {
        self.state().last_rename = Some(RenameCall {
            new_rdn: owned(new_rdn),
            new_superior: new_superior.map(owned),
            delete_old_rdn,
        });
        self.initiate("rename", dn, msgid)
    }

    fn compare_ext(
        &mut self,
        dn: &CStr,
        attribute: &CStr,
        value: &[u8],
        msgid: &mut c_int,
    ) -> NativeStatus {
        self.state().last_compare = Some(CompareCall {
            attribute: owned(attribute),
            value: value.to_vec(),
        });
        self.initiate("compare_ext", dn, msgid)
    }

    fn result(
        &mut self,
        _msgid: MessageId,
        _all: bool,
        timeout: Option<Duration>,
    ) -> FetchOutcome<MockMessage> {
        let mut state = self.state();
        state.calls.push("result");
        state.fetches += 1;
        state.fetch_timeouts.push(timeout);
        if let Some((after, token)) = &state.cancel_after {
            if state.fetches >= *after {
                token.cancel();
            }
        }

        let delivery = match state.script.pop_front() {
            Some(d) => d,
            None => {
                // Nothing scripted: behave like an idle server and use up the wait
                drop(state);
                std::thread::sleep(timeout.unwrap_or_default());
                return FetchOutcome::TimedOut;
            }
        };
        let kind = match &delivery {
            Delivery::Timeout => return FetchOutcome::TimedOut,
            Delivery::Fail(code) => return FetchOutcome::Failed(*code),
            Delivery::Entry(_) => ResultKind::SearchEntry,
            Delivery::Reference(_) => ResultKind::SearchReference,
            Delivery::Terminal(kind, _) | Delivery::Bare(kind) => *kind,
        };
        self.messages_live.fetch_add(1, Ordering::SeqCst);
        FetchOutcome::Received(
            kind,
            MockMessage {
                delivery,
                live: Arc::clone(&self.messages_live),
            },
        )
    }

    fn parse_result(&mut self, message: &MockMessage) -> Result<ResultStatus, NativeStatus> {
        self.state().calls.push("parse_result");
        match &message.delivery {
            Delivery::Terminal(_, status) => Ok(status.clone()),
            _ => Err(-4),
        }
    }

    fn decode_entry(&mut self, message: &MockMessage) -> Result<SearchEntry, NativeStatus> {
        self.state().calls.push("decode_entry");
        match &message.delivery {
            Delivery::Entry(entry) => Ok(entry.clone()),
            _ => Err(-4),
        }
    }

    fn decode_reference(&mut self, message: &MockMessage) -> Result<Vec<String>, NativeStatus> {
        self.state().calls.push("decode_reference");
        match &message.delivery {
            Delivery::Reference(urls) => Ok(urls.clone()),
            _ => Err(-4),
        }
    }

    fn abandon(&mut self, msgid: MessageId) -> NativeStatus {
        let mut state = self.state();
        state.calls.push("abandon");
        state.abandoned.push(msgid.0);
        LDAP_SUCCESS
    }

    fn unbind(&mut self) -> NativeStatus {
        if self.released {
            return LDAP_SUCCESS;
        }
        self.released = true;
        let mut state = self.state();
        state.calls.push("unbind");
        state.unbinds += 1;
        LDAP_SUCCESS
    }

    fn error_string(&self, status: NativeStatus) -> String {
        format!("mock error {}", status)
    }
}
