/*!
 * Restriction Rules
 *
 * Field patterns and the dispatch descriptors they are matched against.
 */

use super::proto::AllowedService;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel accepted by every pattern field
pub const WILDCARD: &str = "*";

/// One pattern field of a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPattern {
    /// `*`, or a field the rule leaves empty
    Any,
    /// `prefix*`
    Prefix(String),
    Literal(String),
}

impl FieldPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern.is_empty() || pattern == WILDCARD {
            Self::Any
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            Self::Prefix(prefix.to_string())
        } else {
            Self::Literal(pattern.to_string())
        }
    }

    /// An unset request field is only accepted by [`FieldPattern::Any`]
    #[inline]
    pub fn matches(&self, input: Option<&str>) -> bool {
        match (self, input) {
            (Self::Any, _) => true,
            (_, None) => false,
            (Self::Prefix(prefix), Some(value)) => value.starts_with(prefix.as_str()),
            (Self::Literal(literal), Some(value)) => literal == value,
        }
    }

    #[inline]
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl From<&str> for FieldPattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

impl fmt::Display for FieldPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(WILDCARD),
            Self::Prefix(prefix) => write!(f, "{}*", prefix),
            Self::Literal(literal) => f.write_str(literal),
        }
    }
}

/// True when any pattern accepts the input
pub fn matches_any(patterns: &[FieldPattern], input: Option<&str>) -> bool {
    patterns.iter().any(|pattern| pattern.matches(input))
}

pub fn parse_patterns<I, S>(patterns: I) -> Vec<FieldPattern>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| FieldPattern::parse(p.as_ref()))
        .collect()
}

/// Explicit component target of an intent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentName {
    pub package_name: String,
    pub class_name: String,
}

impl ComponentName {
    pub fn new(package_name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            class_name: class_name.into(),
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package_name, self.class_name)
    }
}

/// Action and target of an attempted cross-process call
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Intent {
    pub action: Option<String>,
    pub package: Option<String>,
    pub component: Option<ComponentName>,
}

impl Intent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_component(mut self, component: ComponentName) -> Self {
        self.component = Some(component);
        self
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    pub fn component_package(&self) -> Option<&str> {
        self.component.as_ref().map(|c| c.package_name.as_str())
    }

    pub fn component_class(&self) -> Option<&str> {
        self.component.as_ref().map(|c| c.class_name.as_str())
    }
}

/// What the sandboxed module is trying to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchDescriptor {
    StartActivity(Intent),
    StartOrBindService(Intent),
    SendBroadcast(Intent),
    RegisterReceiver { actions: Vec<String> },
    AccessContentProvider { authority: String },
}

impl DispatchDescriptor {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StartActivity(_) => "start_activity",
            Self::StartOrBindService(_) => "start_or_bind_service",
            Self::SendBroadcast(_) => "send_broadcast",
            Self::RegisterReceiver { .. } => "register_receiver",
            Self::AccessContentProvider { .. } => "access_content_provider",
        }
    }
}

impl fmt::Display for DispatchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartActivity(intent)
            | Self::StartOrBindService(intent)
            | Self::SendBroadcast(intent) => write!(
                f,
                "{}(action={}, package={}, component={})",
                self.kind(),
                intent.action().unwrap_or("-"),
                intent.package().unwrap_or("-"),
                intent
                    .component
                    .as_ref()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string())
            ),
            Self::RegisterReceiver { actions } => {
                write!(f, "{}([{}])", self.kind(), actions.join(", "))
            }
            Self::AccessContentProvider { authority } => {
                write!(f, "{}({})", self.kind(), authority)
            }
        }
    }
}

/// Four-field service rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RestrictionRule {
    pub action: FieldPattern,
    pub package_name: FieldPattern,
    pub component_class_name: FieldPattern,
    pub component_package_name: FieldPattern,
}

impl RestrictionRule {
    pub fn new(
        action: &str,
        package_name: &str,
        component_class_name: &str,
        component_package_name: &str,
    ) -> Self {
        Self {
            action: FieldPattern::parse(action),
            package_name: FieldPattern::parse(package_name),
            component_class_name: FieldPattern::parse(component_class_name),
            component_package_name: FieldPattern::parse(component_package_name),
        }
    }

    /// Rule accepting every intent
    pub fn allow_all() -> Self {
        Self::new(WILDCARD, WILDCARD, WILDCARD, WILDCARD)
    }

    pub fn matches(&self, intent: &Intent) -> bool {
        self.action.matches(intent.action())
            && self.package_name.matches(intent.package())
            && self.component_class_name.matches(intent.component_class())
            && self.component_package_name.matches(intent.component_package())
    }
}

impl From<&AllowedService> for RestrictionRule {
    fn from(service: &AllowedService) -> Self {
        Self::new(
            &service.action,
            &service.package_name,
            &service.component_class_name,
            &service.component_package_name,
        )
    }
}

impl fmt::Display for RestrictionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{action={}, package={}, class={}, component_package={}}}",
            self.action, self.package_name, self.component_class_name, self.component_package_name
        )
    }
}
