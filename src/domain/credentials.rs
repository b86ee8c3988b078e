use crate::error::{LdapError, LdapResult};
use std::fmt;

/// How a session authenticates
#[derive(Clone, PartialEq, Eq)]
pub enum BindCredentials {
    Anonymous,
    Simple { dn: String, password: String },
    /// Negotiated Kerberos bind using the caller's ticket cache
    Gssapi,
}

impl BindCredentials {
    pub fn simple(dn: impl Into<String>, password: impl Into<String>) -> Self {
        BindCredentials::Simple {
            dn: dn.into(),
            password: password.into(),
        }
    }

    /// Resolve a mechanism name as found in configuration
    pub fn from_mechanism(
        mechanism: &str,
        dn: Option<&str>,
        password: Option<&str>,
    ) -> LdapResult<Self> {
        match mechanism.to_lowercase().as_str() {
            "anonymous" | "none" => Ok(BindCredentials::Anonymous),
            "simple" => match (dn, password) {
                (Some(dn), Some(password)) if !password.is_empty() => {
                    Ok(BindCredentials::simple(dn, password))
                }
                _ => Err(LdapError::Authentication {
                    mechanism: "simple".to_string(),
                    code: None,
                    message: "simple bind requires a dn and a non-empty password".to_string(),
                }),
            },
            "gssapi" | "kerberos" | "negotiate" => Ok(BindCredentials::Gssapi),
            other => Err(LdapError::UnsupportedMechanism(other.to_string())),
        }
    }

    pub fn mechanism(&self) -> &'static str {
        match self {
            BindCredentials::Anonymous => "anonymous",
            BindCredentials::Simple { .. } => "simple",
            BindCredentials::Gssapi => "GSSAPI",
        }
    }
}

// Keep passwords out of logs
impl fmt::Debug for BindCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindCredentials::Anonymous => write!(f, "Anonymous"),
            BindCredentials::Simple { dn, .. } => f
                .debug_struct("Simple")
                .field("dn", dn)
                .field("password", &"<redacted>")
                .finish(),
            BindCredentials::Gssapi => write!(f, "Gssapi"),
        }
    }
}
