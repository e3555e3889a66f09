/*!
 * API Allow-list
 *
 * Protobuf allow-list documents keyed by target SDK version, and their
 * compiled trie form. A rule such as `android.os.Bundle#putString` becomes
 * the token path `[android, os, Bundle, putString, *]`.
 */

use super::dex::MethodRef;
use super::trie::{AllowlistTrie, PathToken};
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::types::TargetSdkVersion;
use prost::Message;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const WILDCARD: &str = "*";

/// Parameter list of an allowed method
#[derive(Clone, PartialEq, Eq, Message)]
pub struct ParameterTypes {
    #[prost(string, repeated, tag = "1")]
    pub types: Vec<String>,
}

/// One allowed API
///
/// Absent `method_name` allows every member of the class. Absent
/// `parameters` allows every overload. `"*"` as class or method name
/// matches any single name at that position.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct AllowedApi {
    /// Dotted class name
    #[prost(string, tag = "1")]
    pub class_name: String,
    #[prost(string, optional, tag = "2")]
    pub method_name: Option<String>,
    #[prost(message, optional, tag = "3")]
    pub parameters: Option<ParameterTypes>,
    #[prost(string, optional, tag = "4")]
    pub return_type: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AllowedApisList {
    #[prost(message, repeated, tag = "1")]
    pub allowed_apis: Vec<AllowedApi>,
}

/// Top-level document: target SDK version to allowed APIs
#[derive(Clone, PartialEq, Message)]
pub struct AllowedApisPerTargetSdk {
    #[prost(map = "int32, message", tag = "1")]
    pub allowlist_per_target_sdk: HashMap<i32, AllowedApisList>,
}

impl AllowedApi {
    /// Rule covering every member of a class
    pub fn class(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: None,
            parameters: None,
            return_type: None,
        }
    }

    /// Rule covering every overload of one method
    pub fn method(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            method_name: Some(method_name.into()),
            ..Self::class(class_name)
        }
    }

    /// Restrict the rule to one exact signature
    pub fn with_signature(mut self, parameters: Vec<String>, return_type: impl Into<String>) -> Self {
        self.parameters = Some(ParameterTypes { types: parameters });
        self.return_type = Some(return_type.into());
        self
    }

    /// Trie path for this rule
    pub fn token_path(&self) -> Vec<PathToken> {
        let mut path: Vec<PathToken> = self.class_name.split('.').map(name_token).collect();

        let Some(method) = self.method_name.as_deref() else {
            path.push(PathToken::Wildcard);
            return path;
        };
        path.push(name_token(method));

        let Some(parameters) = &self.parameters else {
            path.push(PathToken::Wildcard);
            return path;
        };
        path.extend(parameters.types.iter().cloned().map(PathToken::Literal));

        path.push(match self.return_type.as_deref() {
            Some(return_type) => PathToken::literal(return_type),
            None => PathToken::Single,
        });
        path
    }
}

impl fmt::Display for AllowedApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class_name)?;
        if let Some(method) = &self.method_name {
            write!(f, "#{}", method)?;
        }
        if let Some(parameters) = &self.parameters {
            write!(f, "({})", parameters.types.join(", "))?;
        }
        if let Some(return_type) = &self.return_type {
            write!(f, " -> {}", return_type)?;
        }
        Ok(())
    }
}

fn name_token(name: &str) -> PathToken {
    if name == WILDCARD {
        PathToken::Wildcard
    } else {
        PathToken::literal(name)
    }
}

/// Compiled allow-list for one target SDK version
#[derive(Debug, Default)]
pub struct ApiAllowlist {
    trie: AllowlistTrie<AllowedApi>,
}

impl ApiAllowlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_apis(apis: impl IntoIterator<Item = AllowedApi>) -> Self {
        let mut allowlist = Self::new();
        for api in apis {
            allowlist.insert(api);
        }
        allowlist
    }

    pub fn insert(&mut self, api: AllowedApi) {
        let path = api.token_path();
        self.trie.put(api, &path);
    }

    /// The rule that allows `method`, if any
    pub fn matching_rule(&self, method: &MethodRef) -> Option<&AllowedApi> {
        self.trie.retrieve(&method.token_path())
    }

    pub fn is_allowed(&self, method: &MethodRef) -> bool {
        self.matching_rule(method).is_some()
    }

    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }
}

/// Compiled allow-lists for every target SDK version in a document
#[derive(Debug, Default, Clone)]
pub struct AllowlistCatalog {
    per_target_sdk: BTreeMap<TargetSdkVersion, Arc<ApiAllowlist>>,
}

impl AllowlistCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a serialized `AllowedApisPerTargetSdk` document
    pub fn decode(bytes: &[u8]) -> SandboxResult<Self> {
        let document = AllowedApisPerTargetSdk::decode(bytes)?;
        Ok(Self::from_document(document))
    }

    pub fn from_document(document: AllowedApisPerTargetSdk) -> Self {
        let mut catalog = Self::new();
        for (target_sdk, list) in document.allowlist_per_target_sdk {
            catalog.insert(target_sdk, ApiAllowlist::from_apis(list.allowed_apis));
        }
        debug!(versions = ?catalog.versions(), "API allow-list catalog built");
        catalog
    }

    pub fn insert(&mut self, target_sdk: TargetSdkVersion, allowlist: ApiAllowlist) {
        self.per_target_sdk.insert(target_sdk, Arc::new(allowlist));
    }

    /// Allow-list for `target_sdk`: the exact version, otherwise the newest
    /// version below it
    pub fn select(&self, target_sdk: TargetSdkVersion) -> SandboxResult<Arc<ApiAllowlist>> {
        self.per_target_sdk
            .range(..=target_sdk)
            .next_back()
            .map(|(_, allowlist)| Arc::clone(allowlist))
            .ok_or_else(|| {
                SandboxError::NotFound(format!(
                    "no API allow-list for target SDK {}",
                    target_sdk
                ))
            })
    }

    pub fn versions(&self) -> Vec<TargetSdkVersion> {
        self.per_target_sdk.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.per_target_sdk.is_empty()
    }
}
