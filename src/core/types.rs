/*!
 * Core Types
 * Identity types shared by verification, sessions and restrictions
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Application user id
pub type Uid = u32;

/// Target SDK version of the client application
pub type TargetSdkVersion = i32;

/// Identity of the calling application
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallingInfo {
    pub uid: Uid,
    pub package_name: String,
}

impl CallingInfo {
    pub fn new(uid: Uid, package_name: impl Into<String>) -> Self {
        Self {
            uid,
            package_name: package_name.into(),
        }
    }
}

impl fmt::Display for CallingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[uid={}]", self.package_name, self.uid)
    }
}

/// Application info handed to the isolated process when loading a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub package_name: String,
    pub uid: Uid,
    /// Path of the module's code container, if it has one
    pub source_dir: Option<PathBuf>,
    pub target_sdk_version: TargetSdkVersion,
}

/// Resolved description of a sandboxed module provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkProviderInfo {
    pub module_name: String,
    pub provider_class_name: String,
    pub application_info: ApplicationInfo,
}

impl SdkProviderInfo {
    pub fn new(
        module_name: impl Into<String>,
        provider_class_name: impl Into<String>,
        application_info: ApplicationInfo,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            provider_class_name: provider_class_name.into(),
            application_info,
        }
    }
}
