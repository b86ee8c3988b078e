use super::request::OperationKind;
use super::result_code::ResultCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Terminal status of an operation as parsed from the final result message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultStatus {
    pub code: ResultCode,
    pub matched_dn: String,
    pub diagnostic: String,
    #[serde(default)]
    pub referrals: Vec<String>,
}

impl ResultStatus {
    pub fn success() -> Self {
        Self::with_code(ResultCode::SUCCESS)
    }

    pub fn with_code(code: ResultCode) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            diagnostic: String::new(),
            referrals: Vec::new(),
        }
    }
}

/// One entry returned by a search.
///
/// Attribute names are stored lowercased; lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl SearchEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    /// Append values to an attribute, merging with values already present
    pub fn insert(&mut self, attr: &str, values: Vec<String>) {
        self.attributes
            .entry(attr.to_lowercase())
            .or_default()
            .extend(values);
    }

    pub fn get(&self, attr: &str) -> Option<&String> {
        self.attributes.get(&attr.to_lowercase()).and_then(|v| v.first())
    }

    pub fn get_all(&self, attr: &str) -> Option<&Vec<String>> {
        self.attributes.get(&attr.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Entries in delivery order
    pub entries: Vec<SearchEntry>,
    /// Continuation references returned alongside the entries
    pub references: Vec<String>,
    pub status: ResultStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareResponse {
    pub matched: bool,
    pub status: ResultStatus,
}

/// Typed outcome of a directory operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryResponse {
    Search(SearchResponse),
    Add(ResultStatus),
    Modify(ResultStatus),
    Delete(ResultStatus),
    Rename(ResultStatus),
    Compare(CompareResponse),
}

impl DirectoryResponse {
    pub fn kind(&self) -> OperationKind {
        match self {
            DirectoryResponse::Search(_) => OperationKind::Search,
            DirectoryResponse::Add(_) => OperationKind::Add,
            DirectoryResponse::Modify(_) => OperationKind::Modify,
            DirectoryResponse::Delete(_) => OperationKind::Delete,
            DirectoryResponse::Rename(_) => OperationKind::Rename,
            DirectoryResponse::Compare(_) => OperationKind::Compare,
        }
    }

    /// Build the status-only response for a mutating operation.
    ///
    /// Returns `None` for kinds that carry more than a status.
    pub fn status_only(kind: OperationKind, status: ResultStatus) -> Option<Self> {
        match kind {
            OperationKind::Add => Some(DirectoryResponse::Add(status)),
            OperationKind::Modify => Some(DirectoryResponse::Modify(status)),
            OperationKind::Delete => Some(DirectoryResponse::Delete(status)),
            OperationKind::Rename => Some(DirectoryResponse::Rename(status)),
            OperationKind::Search | OperationKind::Compare => None,
        }
    }

    pub fn status(&self) -> &ResultStatus {
        match self {
            DirectoryResponse::Search(r) => &r.status,
            DirectoryResponse::Compare(r) => &r.status,
            DirectoryResponse::Add(s)
            | DirectoryResponse::Modify(s)
            | DirectoryResponse::Delete(s)
            | DirectoryResponse::Rename(s) => s,
        }
    }

    pub fn into_search(self) -> Option<SearchResponse> {
        match self {
            DirectoryResponse::Search(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_compare(self) -> Option<CompareResponse> {
        match self {
            DirectoryResponse::Compare(r) => Some(r),
            _ => None,
        }
    }
}
