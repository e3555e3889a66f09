/*!
 * Restriction Allow-list Documents
 *
 * Protobuf messages pushed through the property source. Versioned documents
 * map a target SDK version to one list; "next" documents are a single list.
 */

use prost::Message;
use std::collections::HashMap;

#[derive(Clone, PartialEq, Eq, Message)]
pub struct AllowedService {
    #[prost(string, tag = "1")]
    pub action: String,
    #[prost(string, tag = "2")]
    pub package_name: String,
    #[prost(string, tag = "3")]
    pub component_class_name: String,
    #[prost(string, tag = "4")]
    pub component_package_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct AllowedServices {
    #[prost(message, repeated, tag = "1")]
    pub allowed_services: Vec<AllowedService>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ServiceAllowlists {
    #[prost(map = "int32, message", tag = "1")]
    pub allowlist_per_target_sdk: HashMap<i32, AllowedServices>,
}

#[derive(Clone, PartialEq, Eq, Message)]
pub struct AllowedActivities {
    #[prost(string, repeated, tag = "1")]
    pub actions: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ActivityAllowlists {
    #[prost(map = "int32, message", tag = "1")]
    pub allowlist_per_target_sdk: HashMap<i32, AllowedActivities>,
}

#[derive(Clone, PartialEq, Eq, Message)]
pub struct AllowedBroadcastReceivers {
    #[prost(string, repeated, tag = "1")]
    pub intent_actions: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct BroadcastReceiverAllowlists {
    #[prost(map = "int32, message", tag = "1")]
    pub allowlist_per_target_sdk: HashMap<i32, AllowedBroadcastReceivers>,
}

#[derive(Clone, PartialEq, Eq, Message)]
pub struct AllowedContentProviders {
    #[prost(string, repeated, tag = "1")]
    pub authorities: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ContentProviderAllowlists {
    #[prost(map = "int32, message", tag = "1")]
    pub allowlist_per_target_sdk: HashMap<i32, AllowedContentProviders>,
}
