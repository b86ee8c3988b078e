//! Binding to OpenLDAP's `libldap`
//!
//! Only compiled with the `native` feature on unix targets; the crate links
//! against `libldap` and `liblber` in that case.

use super::marshal::ModificationList;
use super::native::{
    FetchOutcome, LdapLibrary, LdapOption, MessageId, NativeHandle, NativeStatus, ResultKind,
    SearchParams, LDAP_SUCCESS,
};
use crate::domain::{ResultCode, ResultStatus, SearchEntry};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint, c_ulong, c_void};
use std::ptr;
use std::time::Duration;

#[repr(C)]
pub struct Ldap {
    _private: [u8; 0],
}

#[repr(C)]
pub struct LdapMessage {
    _private: [u8; 0],
}

#[repr(C)]
pub struct BerElement {
    _private: [u8; 0],
}

#[repr(C)]
struct BerVal {
    bv_len: c_ulong,
    bv_val: *mut c_char,
}

type InteractProc =
    extern "C" fn(ld: *mut Ldap, flags: c_uint, defaults: *mut c_void, interact: *mut c_void) -> c_int;

const LDAP_OPT_REFERRALS: c_int = 0x0008;
const LDAP_OPT_PROTOCOL_VERSION: c_int = 0x0011;
const LDAP_OPT_RESULT_CODE: c_int = 0x0031;
const LDAP_OPT_NETWORK_TIMEOUT: c_int = 0x5005;
const LDAP_SASL_QUIET: c_uint = 2;
const LDAP_PARAM_ERROR: NativeStatus = -9;

/// Any non-null pointer switches a boolean option on
static OPT_ON: c_int = 1;

#[link(name = "ldap")]
extern "C" {
    fn ldap_initialize(ldp: *mut *mut Ldap, uri: *const c_char) -> c_int;
    fn ldap_set_option(ld: *mut Ldap, option: c_int, invalue: *const c_void) -> c_int;
    fn ldap_get_option(ld: *mut Ldap, option: c_int, outvalue: *mut c_void) -> c_int;
    fn ldap_sasl_bind_s(
        ld: *mut Ldap,
        dn: *const c_char,
        mechanism: *const c_char,
        cred: *mut BerVal,
        sctrls: *mut *mut c_void,
        cctrls: *mut *mut c_void,
        servercredp: *mut *mut BerVal,
    ) -> c_int;
    fn ldap_sasl_interactive_bind_s(
        ld: *mut Ldap,
        dn: *const c_char,
        mechs: *const c_char,
        sctrls: *mut *mut c_void,
        cctrls: *mut *mut c_void,
        flags: c_uint,
        interact: Option<InteractProc>,
        defaults: *mut c_void,
    ) -> c_int;
    fn ldap_search_ext(
        ld: *mut Ldap,
        base: *const c_char,
        scope: c_int,
        filter: *const c_char,
        attrs: *mut *mut c_char,
        attrsonly: c_int,
        sctrls: *mut *mut c_void,
        cctrls: *mut *mut c_void,
        timeout: *mut libc::timeval,
        sizelimit: c_int,
        msgidp: *mut c_int,
    ) -> c_int;
    fn ldap_add_ext(
        ld: *mut Ldap,
        dn: *const c_char,
        attrs: *mut *mut super::marshal::LdapMod,
        sctrls: *mut *mut c_void,
        cctrls: *mut *mut c_void,
        msgidp: *mut c_int,
    ) -> c_int;
    fn ldap_modify_ext(
        ld: *mut Ldap,
        dn: *const c_char,
        mods: *mut *mut super::marshal::LdapMod,
        sctrls: *mut *mut c_void,
        cctrls: *mut *mut c_void,
        msgidp: *mut c_int,
    ) -> c_int;
    fn ldap_delete_ext(
        ld: *mut Ldap,
        dn: *const c_char,
        sctrls: *mut *mut c_void,
        cctrls: *mut *mut c_void,
        msgidp: *mut c_int,
    ) -> c_int;
    fn ldap_rename(
        ld: *mut Ldap,
        dn: *const c_char,
        newrdn: *const c_char,
        newsuperior: *const c_char,
        deleteoldrdn: c_int,
        sctrls: *mut *mut c_void,
        cctrls: *mut *mut c_void,
        msgidp: *mut c_int,
    ) -> c_int;
    fn ldap_compare_ext(
        ld: *mut Ldap,
        dn: *const c_char,
        attr: *const c_char,
        bvalue: *mut BerVal,
        sctrls: *mut *mut c_void,
        cctrls: *mut *mut c_void,
        msgidp: *mut c_int,
    ) -> c_int;
    fn ldap_result(
        ld: *mut Ldap,
        msgid: c_int,
        all: c_int,
        timeout: *mut libc::timeval,
        result: *mut *mut LdapMessage,
    ) -> c_int;
    fn ldap_parse_result(
        ld: *mut Ldap,
        result: *mut LdapMessage,
        errcodep: *mut c_int,
        matcheddnp: *mut *mut c_char,
        errmsgp: *mut *mut c_char,
        referralsp: *mut *mut *mut c_char,
        serverctrlsp: *mut *mut *mut c_void,
        freeit: c_int,
    ) -> c_int;
    fn ldap_parse_reference(
        ld: *mut Ldap,
        reference: *mut LdapMessage,
        referralsp: *mut *mut *mut c_char,
        serverctrlsp: *mut *mut *mut c_void,
        freeit: c_int,
    ) -> c_int;
    fn ldap_get_dn(ld: *mut Ldap, entry: *mut LdapMessage) -> *mut c_char;
    fn ldap_first_attribute(
        ld: *mut Ldap,
        entry: *mut LdapMessage,
        berptr: *mut *mut BerElement,
    ) -> *mut c_char;
    fn ldap_next_attribute(
        ld: *mut Ldap,
        entry: *mut LdapMessage,
        ber: *mut BerElement,
    ) -> *mut c_char;
    fn ldap_get_values_len(
        ld: *mut Ldap,
        entry: *mut LdapMessage,
        attr: *const c_char,
    ) -> *mut *mut BerVal;
    fn ldap_value_free_len(vals: *mut *mut BerVal);
    fn ldap_msgfree(msg: *mut LdapMessage) -> c_int;
    fn ldap_memfree(p: *mut c_void);
    fn ldap_memvfree(v: *mut *mut c_void);
    fn ldap_abandon_ext(
        ld: *mut Ldap,
        msgid: c_int,
        sctrls: *mut *mut c_void,
        cctrls: *mut *mut c_void,
    ) -> c_int;
    fn ldap_unbind_ext(ld: *mut Ldap, sctrls: *mut *mut c_void, cctrls: *mut *mut c_void)
        -> c_int;
    fn ldap_err2string(err: c_int) -> *const c_char;
}

#[link(name = "lber")]
extern "C" {
    fn ber_free(ber: *mut BerElement, freebuf: c_int);
}

extern "C" fn sasl_no_prompts(
    _ld: *mut Ldap,
    _flags: c_uint,
    _defaults: *mut c_void,
    _interact: *mut c_void,
) -> c_int {
    LDAP_SUCCESS
}

fn timeval(duration: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_usec: duration.subsec_micros() as libc::suseconds_t,
    }
}

/// `ldap://host:port`, bracketing IPv6 literals
fn server_uri(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("ldap://[{}]:{}", host, port)
    } else {
        format!("ldap://{}:{}", host, port)
    }
}

fn err2string(status: NativeStatus) -> String {
    // SAFETY: ldap_err2string returns a pointer to a static string
    unsafe {
        let text = ldap_err2string(status);
        if text.is_null() {
            format!("LDAP error {}", status)
        } else {
            CStr::from_ptr(text).to_string_lossy().into_owned()
        }
    }
}

/// Copy a library-allocated string and free the original
///
/// # Safety
///
/// `value` must be null or a string allocated by libldap.
unsafe fn take_string(value: *mut c_char) -> String {
    if value.is_null() {
        return String::new();
    }
    let owned = CStr::from_ptr(value).to_string_lossy().into_owned();
    ldap_memfree(value as *mut c_void);
    owned
}

/// Copy a library-allocated `char **` and free it
///
/// # Safety
///
/// `values` must be null or a null-terminated array allocated by libldap.
unsafe fn take_string_array(values: *mut *mut c_char) -> Vec<String> {
    let mut out = Vec::new();
    if values.is_null() {
        return out;
    }
    let mut i = 0;
    while !(*values.add(i)).is_null() {
        out.push(CStr::from_ptr(*values.add(i)).to_string_lossy().into_owned());
        i += 1;
    }
    ldap_memvfree(values as *mut *mut c_void);
    out
}

/// The system's OpenLDAP client library
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenLdap;

impl LdapLibrary for OpenLdap {
    type Handle = OpenLdapHandle;

    fn initialize(&self, host: &str, port: u16) -> Result<OpenLdapHandle, NativeStatus> {
        let uri = CString::new(server_uri(host, port)).map_err(|_| LDAP_PARAM_ERROR)?;
        let mut ld: *mut Ldap = ptr::null_mut();
        // SAFETY: uri is a valid C string; ld receives a new handle on success
        let status = unsafe { ldap_initialize(&mut ld, uri.as_ptr()) };
        if status != LDAP_SUCCESS || ld.is_null() {
            return Err(if status == LDAP_SUCCESS { LDAP_PARAM_ERROR } else { status });
        }
        Ok(OpenLdapHandle {
            ld,
            released: false,
        })
    }

    fn error_string(&self, status: NativeStatus) -> String {
        err2string(status)
    }
}

/// One `LDAP *` session
pub struct OpenLdapHandle {
    ld: *mut Ldap,
    released: bool,
}

// SAFETY: the handle is only ever used by one thread at a time; every
// operation goes through `&mut self`
unsafe impl Send for OpenLdapHandle {}

impl OpenLdapHandle {
    /// Error code recorded on the session by the last failed call
    fn last_error(&self) -> NativeStatus {
        let mut code: c_int = LDAP_SUCCESS;
        // SAFETY: LDAP_OPT_RESULT_CODE writes a single int
        unsafe {
            ldap_get_option(self.ld, LDAP_OPT_RESULT_CODE, &mut code as *mut c_int as *mut c_void)
        };
        code
    }
}

/// A result message owned by the caller of `ldap_result`
pub struct OpenLdapMessage {
    msg: *mut LdapMessage,
}

// SAFETY: the message is an independent heap block, freed exactly once
unsafe impl Send for OpenLdapMessage {}

impl Drop for OpenLdapMessage {
    fn drop(&mut self) {
        // SAFETY: msg came from ldap_result and is freed only here
        unsafe { ldap_msgfree(self.msg) };
    }
}

impl NativeHandle for OpenLdapHandle {
    type Message = OpenLdapMessage;

    fn set_option(&mut self, option: &LdapOption) -> NativeStatus {
        // SAFETY: each option receives a pointer to the value type libldap
        // expects; libldap copies the value
        unsafe {
            match option {
                LdapOption::ProtocolVersion(version) => {
                    let version: c_int = *version;
                    ldap_set_option(
                        self.ld,
                        LDAP_OPT_PROTOCOL_VERSION,
                        &version as *const c_int as *const c_void,
                    )
                }
                LdapOption::Referrals(on) => {
                    let value = if *on {
                        &OPT_ON as *const c_int as *const c_void
                    } else {
                        ptr::null()
                    };
                    ldap_set_option(self.ld, LDAP_OPT_REFERRALS, value)
                }
                LdapOption::NetworkTimeout(timeout) => {
                    let tv = timeval(*timeout);
                    ldap_set_option(
                        self.ld,
                        LDAP_OPT_NETWORK_TIMEOUT,
                        &tv as *const libc::timeval as *const c_void,
                    )
                }
            }
        }
    }

    fn simple_bind(&mut self, dn: Option<&CStr>, password: Option<&CStr>) -> NativeStatus {
        let mut cred = match password {
            Some(p) => BerVal {
                bv_len: p.to_bytes().len() as c_ulong,
                bv_val: p.as_ptr() as *mut c_char,
            },
            None => BerVal {
                bv_len: 0,
                bv_val: ptr::null_mut(),
            },
        };
        // SAFETY: a null mechanism selects a simple bind; cred outlives the call
        unsafe {
            ldap_sasl_bind_s(
                self.ld,
                dn.map_or(ptr::null(), CStr::as_ptr),
                ptr::null(),
                &mut cred,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        }
    }

    fn sasl_bind(&mut self, mechanism: &CStr) -> NativeStatus {
        // SAFETY: quiet mode with a callback that supplies no answers
        unsafe {
            ldap_sasl_interactive_bind_s(
                self.ld,
                ptr::null(),
                mechanism.as_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
                LDAP_SASL_QUIET,
                Some(sasl_no_prompts),
                ptr::null_mut(),
            )
        }
    }

    fn search_ext(&mut self, params: &SearchParams<'_>, msgid: &mut c_int) -> NativeStatus {
        let mut limit = params.time_limit.map(timeval);
        let limit_ptr = limit
            .as_mut()
            .map_or(ptr::null_mut(), |tv| tv as *mut libc::timeval);
        let attrs = params.attributes.map_or(ptr::null_mut(), |a| a.as_ptr());
        // SAFETY: every pointer is valid for the duration of the call
        unsafe {
            ldap_search_ext(
                self.ld,
                params.base.as_ptr(),
                params.scope,
                params.filter.as_ptr(),
                attrs,
                params.attrs_only as c_int,
                ptr::null_mut(),
                ptr::null_mut(),
                limit_ptr,
                params.size_limit,
                msgid,
            )
        }
    }

    fn add_ext(&mut self, dn: &CStr, mods: &ModificationList, msgid: &mut c_int) -> NativeStatus {
        // SAFETY: mods is a null-terminated LDAPMod array alive for the call
        unsafe {
            ldap_add_ext(
                self.ld,
                dn.as_ptr(),
                mods.as_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
                msgid,
            )
        }
    }

    fn modify_ext(
        &mut self,
        dn: &CStr,
        mods: &ModificationList,
        msgid: &mut c_int,
    ) -> NativeStatus {
        // SAFETY: mods is a null-terminated LDAPMod array alive for the call
        unsafe {
            ldap_modify_ext(
                self.ld,
                dn.as_ptr(),
                mods.as_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
                msgid,
            )
        }
    }

    fn delete_ext(&mut self, dn: &CStr, msgid: &mut c_int) -> NativeStatus {
        // SAFETY: dn is a valid C string
        unsafe { ldap_delete_ext(self.ld, dn.as_ptr(), ptr::null_mut(), ptr::null_mut(), msgid) }
    }

    fn rename(
        &mut self,
        dn: &CStr,
        new_rdn: &CStr,
        new_superior: Option<&CStr>,
        delete_old_rdn: bool,
        msgid: &mut c_int,
    ) -> NativeStatus {
        // SAFETY: all strings are valid for the duration of the call
        unsafe {
            ldap_rename(
                self.ld,
                dn.as_ptr(),
                new_rdn.as_ptr(),
                new_superior.map_or(ptr::null(), CStr::as_ptr),
                delete_old_rdn as c_int,
                ptr::null_mut(),
                ptr::null_mut(),
                msgid,
            )
        }
    }

    fn compare_ext(
        &mut self,
        dn: &CStr,
        attribute: &CStr,
        value: &[u8],
        msgid: &mut c_int,
    ) -> NativeStatus {
        let mut assertion = BerVal {
            bv_len: value.len() as c_ulong,
            bv_val: value.as_ptr() as *mut c_char,
        };
        // SAFETY: libldap only reads the assertion value
        unsafe {
            ldap_compare_ext(
                self.ld,
                dn.as_ptr(),
                attribute.as_ptr(),
                &mut assertion,
                ptr::null_mut(),
                ptr::null_mut(),
                msgid,
            )
        }
    }

    fn result(
        &mut self,
        msgid: MessageId,
        all: bool,
        timeout: Option<Duration>,
    ) -> FetchOutcome<OpenLdapMessage> {
        let mut wait = timeout.map(timeval);
        let wait_ptr = wait
            .as_mut()
            .map_or(ptr::null_mut(), |tv| tv as *mut libc::timeval);
        let mut msg: *mut LdapMessage = ptr::null_mut();
        // SAFETY: msg receives a message we own on a positive return
        let rc = unsafe { ldap_result(self.ld, msgid.0, all as c_int, wait_ptr, &mut msg) };
        match rc {
            -1 => FetchOutcome::Failed(self.last_error()),
            0 => {
                if !msg.is_null() {
                    // SAFETY: not handed out, freed here
                    unsafe { ldap_msgfree(msg) };
                }
                FetchOutcome::TimedOut
            }
            _ if msg.is_null() => FetchOutcome::Failed(self.last_error()),
            tag => FetchOutcome::Received(ResultKind::from_native(tag), OpenLdapMessage { msg }),
        }
    }

    fn parse_result(&mut self, message: &OpenLdapMessage) -> Result<ResultStatus, NativeStatus> {
        let mut code: c_int = LDAP_SUCCESS;
        let mut matched: *mut c_char = ptr::null_mut();
        let mut diagnostic: *mut c_char = ptr::null_mut();
        let mut referrals: *mut *mut c_char = ptr::null_mut();
        // SAFETY: freeit = 0 leaves the message to OpenLdapMessage's Drop;
        // the out-strings are ours to free
        unsafe {
            let status = ldap_parse_result(
                self.ld,
                message.msg,
                &mut code,
                &mut matched,
                &mut diagnostic,
                &mut referrals,
                ptr::null_mut(),
                0,
            );
            let matched_dn = take_string(matched);
            let diagnostic = take_string(diagnostic);
            let referrals = take_string_array(referrals);
            if status != LDAP_SUCCESS {
                return Err(status);
            }
            Ok(ResultStatus {
                code: ResultCode(code),
                matched_dn,
                diagnostic,
                referrals,
            })
        }
    }

    fn decode_entry(&mut self, message: &OpenLdapMessage) -> Result<SearchEntry, NativeStatus> {
        // SAFETY: message is a live search entry; every string and value
        // array returned by libldap is freed after copying
        unsafe {
            let dn = ldap_get_dn(self.ld, message.msg);
            if dn.is_null() {
                return Err(self.last_error());
            }
            let mut entry = SearchEntry::new(take_string(dn));

            let mut ber: *mut BerElement = ptr::null_mut();
            let mut attr = ldap_first_attribute(self.ld, message.msg, &mut ber);
            while !attr.is_null() {
                let name = CStr::from_ptr(attr).to_string_lossy().into_owned();
                let values = ldap_get_values_len(self.ld, message.msg, attr);
                let mut collected = Vec::new();
                if !values.is_null() {
                    let mut i = 0;
                    while !(*values.add(i)).is_null() {
                        let value = &**values.add(i);
                        let bytes = if value.bv_val.is_null() {
                            &[][..]
                        } else {
                            std::slice::from_raw_parts(value.bv_val as *const u8, value.bv_len as usize)
                        };
                        collected.push(String::from_utf8_lossy(bytes).into_owned());
                        i += 1;
                    }
                    ldap_value_free_len(values);
                }
                entry.insert(&name, collected);
                ldap_memfree(attr as *mut c_void);
                attr = ldap_next_attribute(self.ld, message.msg, ber);
            }
            if !ber.is_null() {
                ber_free(ber, 0);
            }
            Ok(entry)
        }
    }

    fn decode_reference(&mut self, message: &OpenLdapMessage) -> Result<Vec<String>, NativeStatus> {
        let mut referrals: *mut *mut c_char = ptr::null_mut();
        // SAFETY: freeit = 0; the referral array is ours to free
        unsafe {
            let status =
                ldap_parse_reference(self.ld, message.msg, &mut referrals, ptr::null_mut(), 0);
            let urls = take_string_array(referrals);
            if status != LDAP_SUCCESS {
                return Err(status);
            }
            Ok(urls)
        }
    }

    fn abandon(&mut self, msgid: MessageId) -> NativeStatus {
        // SAFETY: abandoning an unknown id is harmless
        unsafe { ldap_abandon_ext(self.ld, msgid.0, ptr::null_mut(), ptr::null_mut()) }
    }

    fn unbind(&mut self) -> NativeStatus {
        if self.released {
            return LDAP_SUCCESS;
        }
        self.released = true;
        // SAFETY: ld is live; ldap_unbind_ext frees it
        unsafe { ldap_unbind_ext(self.ld, ptr::null_mut(), ptr::null_mut()) }
    }

    fn error_string(&self, status: NativeStatus) -> String {
        err2string(status)
    }
}

impl Drop for OpenLdapHandle {
    fn drop(&mut self) {
        self.unbind();
    }
}
