use crate::error::{LdapError, LdapResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Kind of directory operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Search,
    Add,
    Modify,
    Delete,
    Rename,
    Compare,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Search => "search",
            OperationKind::Add => "add",
            OperationKind::Modify => "modify",
            OperationKind::Delete => "delete",
            OperationKind::Rename => "rename",
            OperationKind::Compare => "compare",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// LDAP search scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

impl SearchScope {
    /// Parse scope from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "base" => Some(SearchScope::Base),
            "one" | "onelevel" | "one_level" => Some(SearchScope::OneLevel),
            "sub" | "subtree" => Some(SearchScope::Subtree),
            _ => None,
        }
    }

    /// Value of `LDAP_SCOPE_*` for the native call
    pub fn to_native(&self) -> i32 {
        match self {
            SearchScope::Base => 0x0000,
            SearchScope::OneLevel => 0x0001,
            SearchScope::Subtree => 0x0002,
        }
    }
}

/// Search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub base_dn: String,
    pub filter: String,
    pub scope: SearchScope,
    /// Attributes to return; empty means all user attributes
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub types_only: bool,
    /// Zero means no client-requested limit
    #[serde(default)]
    pub size_limit: i32,
    #[serde(default)]
    pub time_limit: Option<Duration>,
}

impl SearchRequest {
    pub fn new(base_dn: impl Into<String>, filter: impl Into<String>, scope: SearchScope) -> Self {
        Self {
            base_dn: base_dn.into(),
            filter: filter.into(),
            scope,
            attributes: Vec::new(),
            types_only: false,
            size_limit: 0,
            time_limit: None,
        }
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_size_limit(mut self, limit: i32) -> Self {
        self.size_limit = limit;
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn types_only(mut self) -> Self {
        self.types_only = true;
        self
    }
}

/// Modification operation tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
}

impl ModOp {
    /// Value of `LDAP_MOD_*` for the native call
    pub fn to_native(&self) -> i32 {
        match self {
            ModOp::Add => 0x0000,
            ModOp::Delete => 0x0001,
            ModOp::Replace => 0x0002,
        }
    }
}

/// One attribute-level change of a modify request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub op: ModOp,
    pub attribute: String,
    pub values: Vec<String>,
}

impl Modification {
    pub fn new<I, S>(op: ModOp, attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op,
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ModOp::Add, attribute, values)
    }

    pub fn replace<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ModOp::Replace, attribute, values)
    }

    /// Remove the given values, or the whole attribute when `values` is empty
    pub fn delete<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ModOp::Delete, attribute, values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRequest {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl AddRequest {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyRequest {
    pub dn: String,
    pub modifications: Vec<Modification>,
}

impl ModifyRequest {
    pub fn new(dn: impl Into<String>, modifications: Vec<Modification>) -> Self {
        Self {
            dn: dn.into(),
            modifications,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub dn: String,
}

impl DeleteRequest {
    pub fn new(dn: impl Into<String>) -> Self {
        Self { dn: dn.into() }
    }
}

/// Rename (modify DN) parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    pub dn: String,
    pub new_rdn: String,
    /// Move the entry under this parent when set
    #[serde(default)]
    pub new_superior: Option<String>,
    #[serde(default = "default_delete_old_rdn")]
    pub delete_old_rdn: bool,
}

fn default_delete_old_rdn() -> bool {
    true
}

impl RenameRequest {
    pub fn new(dn: impl Into<String>, new_rdn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            new_rdn: new_rdn.into(),
            new_superior: None,
            delete_old_rdn: true,
        }
    }

    pub fn with_new_superior(mut self, parent_dn: impl Into<String>) -> Self {
        self.new_superior = Some(parent_dn.into());
        self
    }

    pub fn keep_old_rdn(mut self) -> Self {
        self.delete_old_rdn = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareRequest {
    pub dn: String,
    pub attribute: String,
    pub value: String,
}

impl CompareRequest {
    pub fn new(dn: impl Into<String>, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

/// A single directory operation. Consumed by one call to `execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DirectoryRequest {
    Search(SearchRequest),
    Add(AddRequest),
    Modify(ModifyRequest),
    Delete(DeleteRequest),
    Rename(RenameRequest),
    Compare(CompareRequest),
}

impl DirectoryRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            DirectoryRequest::Search(_) => OperationKind::Search,
            DirectoryRequest::Add(_) => OperationKind::Add,
            DirectoryRequest::Modify(_) => OperationKind::Modify,
            DirectoryRequest::Delete(_) => OperationKind::Delete,
            DirectoryRequest::Rename(_) => OperationKind::Rename,
            DirectoryRequest::Compare(_) => OperationKind::Compare,
        }
    }

    /// Target DN of the operation (search base for searches)
    pub fn dn(&self) -> &str {
        match self {
            DirectoryRequest::Search(r) => &r.base_dn,
            DirectoryRequest::Add(r) => &r.dn,
            DirectoryRequest::Modify(r) => &r.dn,
            DirectoryRequest::Delete(r) => &r.dn,
            DirectoryRequest::Rename(r) => &r.dn,
            DirectoryRequest::Compare(r) => &r.dn,
        }
    }

    /// Reject requests with missing required fields before any native call.
    ///
    /// An empty search base is allowed: it addresses the root DSE.
    pub fn validate(&self) -> LdapResult<()> {
        let kind = self.kind();
        match self {
            DirectoryRequest::Search(r) => {
                require(kind, "filter", &r.filter)?;
                if r.size_limit < 0 {
                    return Err(invalid(kind, "size limit must not be negative"));
                }
            }
            DirectoryRequest::Add(r) => {
                require(kind, "dn", &r.dn)?;
                if r.attributes.is_empty() {
                    return Err(invalid(kind, "at least one attribute is required"));
                }
                for (name, values) in &r.attributes {
                    require(kind, "attribute name", name)?;
                    if values.is_empty() {
                        return Err(invalid(kind, &format!("attribute {} has no values", name)));
                    }
                }
            }
            DirectoryRequest::Modify(r) => {
                require(kind, "dn", &r.dn)?;
                if r.modifications.is_empty() {
                    return Err(invalid(kind, "at least one modification is required"));
                }
                for m in &r.modifications {
                    require(kind, "attribute name", &m.attribute)?;
                    if m.op == ModOp::Add && m.values.is_empty() {
                        return Err(invalid(
                            kind,
                            &format!("add of {} has no values", m.attribute),
                        ));
                    }
                }
            }
            DirectoryRequest::Delete(r) => require(kind, "dn", &r.dn)?,
            DirectoryRequest::Rename(r) => {
                require(kind, "dn", &r.dn)?;
                require(kind, "new rdn", &r.new_rdn)?;
            }
            DirectoryRequest::Compare(r) => {
                require(kind, "dn", &r.dn)?;
                require(kind, "attribute", &r.attribute)?;
            }
        }
        Ok(())
    }
}

fn require(kind: OperationKind, field: &str, value: &str) -> LdapResult<()> {
    if value.trim().is_empty() {
        return Err(invalid(kind, &format!("{} is required", field)));
    }
    Ok(())
}

fn invalid(kind: OperationKind, reason: &str) -> LdapError {
    LdapError::InvalidRequest(format!("{}: {}", kind, reason))
}

impl From<SearchRequest> for DirectoryRequest {
    fn from(r: SearchRequest) -> Self {
        DirectoryRequest::Search(r)
    }
}

impl From<AddRequest> for DirectoryRequest {
    fn from(r: AddRequest) -> Self {
        DirectoryRequest::Add(r)
    }
}

impl From<ModifyRequest> for DirectoryRequest {
    fn from(r: ModifyRequest) -> Self {
        DirectoryRequest::Modify(r)
    }
}

impl From<DeleteRequest> for DirectoryRequest {
    fn from(r: DeleteRequest) -> Self {
        DirectoryRequest::Delete(r)
    }
}

impl From<RenameRequest> for DirectoryRequest {
    fn from(r: RenameRequest) -> Self {
        DirectoryRequest::Rename(r)
    }
}

impl From<CompareRequest> for DirectoryRequest {
    fn from(r: CompareRequest) -> Self {
        DirectoryRequest::Compare(r)
    }
}
