//! Cluster resource records.
//!
//! Records are the immutable facts a snapshot is made of. They carry only the
//! metadata and spec/status fields rules look at, and they deserialize from
//! Kubernetes-flavoured YAML/JSON tagged by `kind`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The resource kinds a snapshot can contain.
///
/// Deserializes from the canonical name or any short name `FromStr` accepts,
/// so configuration may say `pvc` or `pods`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum ResourceKind {
    Deployment,
    StatefulSet,
    Pod,
    PersistentVolumeClaim,
    Service,
    ConfigMap,
}

impl ResourceKind {
    /// Every supported kind, in collection order.
    pub const ALL: [Self; 6] = [
        Self::Deployment,
        Self::StatefulSet,
        Self::Pod,
        Self::PersistentVolumeClaim,
        Self::Service,
        Self::ConfigMap,
    ];

    /// The canonical kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::Pod => "Pod",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Service => "Service",
            Self::ConfigMap => "ConfigMap",
        }
    }

    /// The scope a kind is listed in unless configured otherwise.
    ///
    /// Pods and ConfigMaps are listed across all namespaces; everything else
    /// is listed in the given namespace.
    #[must_use]
    pub fn default_scope(self, namespace: &str) -> ResourceScope {
        match self {
            Self::Pod | Self::ConfigMap => ResourceScope::AnyNamespace,
            _ => ResourceScope::Namespace(namespace.to_string()),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" | "deployments" | "deploy" => Ok(Self::Deployment),
            "statefulset" | "statefulsets" | "sts" => Ok(Self::StatefulSet),
            "pod" | "pods" | "po" => Ok(Self::Pod),
            "persistentvolumeclaim" | "persistentvolumeclaims" | "pvc" => {
                Ok(Self::PersistentVolumeClaim)
            }
            "service" | "services" | "svc" => Ok(Self::Service),
            "configmap" | "configmaps" | "cm" => Ok(Self::ConfigMap),
            _ => Err(Error::UnknownKind(s.to_string())),
        }
    }
}

impl TryFrom<String> for ResourceKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Where a kind is listed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceScope {
    /// Every namespace the client can see.
    AnyNamespace,
    /// A single namespace.
    Namespace(String),
}

impl ResourceScope {
    /// Whether a record living in `namespace` falls inside this scope.
    #[must_use]
    pub fn contains(&self, namespace: Option<&str>) -> bool {
        match self {
            Self::AnyNamespace => true,
            Self::Namespace(ns) => namespace.is_some_and(|n| n == ns),
        }
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyNamespace => write!(f, "*"),
            Self::Namespace(ns) => write!(f, "{ns}"),
        }
    }
}

/// Metadata common to every record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Create metadata with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the namespace.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set the creation timestamp.
    #[must_use]
    pub const fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.creation_timestamp = Some(at);
        self
    }

    /// Equality-based selector match. An empty selector selects nothing.
    #[must_use]
    pub fn matches_selector(&self, selector: &BTreeMap<String, String>) -> bool {
        !selector.is_empty()
            && selector
                .iter()
                .all(|(k, v)| self.labels.get(k).is_some_and(|l| l == v))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub ready_replicas: u32,
    #[serde(default)]
    pub available_replicas: u32,
    #[serde(default)]
    pub updated_replicas: u32,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSet {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub ready_replicas: u32,
    #[serde(default)]
    pub current_replicas: u32,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

/// Pod lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub waiting_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub containers: Vec<ContainerStatus>,
    /// PersistentVolumeClaims mounted by the pod.
    #[serde(default)]
    pub claim_names: Vec<String>,
    /// ConfigMaps mounted or referenced from env.
    #[serde(default)]
    pub config_map_names: Vec<String>,
}

impl Pod {
    /// How long the pod has been Pending as of `now`.
    ///
    /// Measured from the start time, falling back to the creation timestamp.
    /// `None` when the pod is not Pending or carries no timestamp.
    #[must_use]
    pub fn pending_for(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        if self.phase != PodPhase::Pending {
            return None;
        }
        self.start_time
            .or(self.metadata.creation_timestamp)
            .map(|since| now.signed_duration_since(since))
    }

    /// Total restarts across all containers.
    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.containers
            .iter()
            .fold(0u32, |acc, c| acc.saturating_add(c.restart_count))
    }
}

/// PersistentVolumeClaim phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClaimPhase {
    #[default]
    Pending,
    Bound,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaim {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub phase: ClaimPhase,
    #[serde(default)]
    pub storage_class: Option<String>,
    #[serde(default)]
    pub requested_storage: Option<String>,
    #[serde(default)]
    pub volume_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    NodePort,
    LoadBalancer,
    ExternalName,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default)]
    pub name: Option<String>,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub metadata: ObjectMeta,
    #[serde(default, rename = "type")]
    pub service_type: ServiceType,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// One fetched resource, tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ResourceRecord {
    Deployment(Deployment),
    StatefulSet(StatefulSet),
    Pod(Pod),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Service(Service),
    ConfigMap(ConfigMap),
}

impl ResourceRecord {
    /// The kind tag of this record.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::StatefulSet(_) => ResourceKind::StatefulSet,
            Self::Pod(_) => ResourceKind::Pod,
            Self::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            Self::Service(_) => ResourceKind::Service,
            Self::ConfigMap(_) => ResourceKind::ConfigMap,
        }
    }

    #[must_use]
    pub const fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Deployment(r) => &r.metadata,
            Self::StatefulSet(r) => &r.metadata,
            Self::Pod(r) => &r.metadata,
            Self::PersistentVolumeClaim(r) => &r.metadata,
            Self::Service(r) => &r.metadata,
            Self::ConfigMap(r) => &r.metadata,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata().name
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// A lightweight reference to this record, suitable for advice.
    #[must_use]
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            kind: self.kind(),
            namespace: self.metadata().namespace.clone(),
            name: self.metadata().name.clone(),
        }
    }

    #[must_use]
    pub const fn as_pod(&self) -> Option<&Pod> {
        match self {
            Self::Pod(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_deployment(&self) -> Option<&Deployment> {
        match self {
            Self::Deployment(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_stateful_set(&self) -> Option<&StatefulSet> {
        match self {
            Self::StatefulSet(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_claim(&self) -> Option<&PersistentVolumeClaim> {
        match self {
            Self::PersistentVolumeClaim(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_service(&self) -> Option<&Service> {
        match self {
            Self::Service(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_config_map(&self) -> Option<&ConfigMap> {
        match self {
            Self::ConfigMap(c) => Some(c),
            _ => None,
        }
    }

    /// Parse a multi-document YAML stream (or a single JSON value/array) into records.
    ///
    /// # Errors
    ///
    /// Returns a parse error naming the offending document.
    pub fn parse_yaml_stream(content: &str) -> crate::Result<Vec<Self>> {
        serde_yaml::Deserializer::from_str(content)
            .enumerate()
            .map(|(index, doc)| {
                let value = serde_yaml::Value::deserialize(doc)
                    .map_err(|e| Error::yaml_parse_failed(format!("document {index}: {e}")))?;
                Self::from_yaml_value(value, index)
            })
            .collect::<crate::Result<Vec<Vec<Self>>>>()
            .map(|docs| docs.into_iter().flatten().collect())
    }

    /// Parse JSON holding either one record or an array of records.
    ///
    /// # Errors
    ///
    /// Returns a JSON parse error.
    pub fn parse_json(content: &str) -> crate::Result<Vec<Self>> {
        let value: serde_json::Value =
            serde_json::from_str(content).map_err(|e| Error::json_parse_failed(e.to_string()))?;
        match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    serde_json::from_value(item).map_err(|e| Error::json_parse_failed(e.to_string()))
                })
                .collect(),
            serde_json::Value::Null => Ok(Vec::new()),
            other => serde_json::from_value(other)
                .map(|record| vec![record])
                .map_err(|e| Error::json_parse_failed(e.to_string())),
        }
    }

    fn from_yaml_value(value: serde_yaml::Value, index: usize) -> crate::Result<Vec<Self>> {
        match value {
            serde_yaml::Value::Null => Ok(Vec::new()),
            serde_yaml::Value::Sequence(items) => items
                .into_iter()
                .map(|item| {
                    serde_yaml::from_value(item)
                        .map_err(|e| Error::yaml_parse_failed(format!("document {index}: {e}")))
                })
                .collect(),
            other => serde_yaml::from_value(other)
                .map(|record| vec![record])
                .map_err(|e| Error::yaml_parse_failed(format!("document {index}: {e}"))),
        }
    }
}

/// Reference to a resource: kind, namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::indexing_slicing)]

    use super::*;

    #[test]
    fn kind_parses_short_names() {
        assert_eq!("pvc".parse::<ResourceKind>().ok(), Some(ResourceKind::PersistentVolumeClaim));
        assert_eq!("Pods".parse::<ResourceKind>().ok(), Some(ResourceKind::Pod));
        assert!("widget".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn kind_deserializes_from_short_names() {
        let kinds: Vec<ResourceKind> = serde_json::from_str(r#"["pvc", "Pod", "svc"]"#).unwrap();
        assert_eq!(
            kinds,
            vec![ResourceKind::PersistentVolumeClaim, ResourceKind::Pod, ResourceKind::Service]
        );
        assert_eq!(serde_json::to_string(&ResourceKind::ConfigMap).unwrap(), r#""ConfigMap""#);
        assert!(serde_json::from_str::<ResourceKind>(r#""widget""#).is_err());
    }

    #[test]
    fn default_scope_matches_listing_rules() {
        assert_eq!(ResourceKind::Pod.default_scope("prod"), ResourceScope::AnyNamespace);
        assert_eq!(
            ResourceKind::Service.default_scope("prod"),
            ResourceScope::Namespace("prod".to_string())
        );
    }

    #[test]
    fn scope_contains() {
        let scope = ResourceScope::Namespace("a".to_string());
        assert!(scope.contains(Some("a")));
        assert!(!scope.contains(Some("b")));
        assert!(!scope.contains(None));
        assert!(ResourceScope::AnyNamespace.contains(None));
    }

    #[test]
    fn empty_selector_selects_nothing() {
        let meta = ObjectMeta::new("web").with_label("app", "web");
        assert!(!meta.matches_selector(&BTreeMap::new()));

        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "web".to_string());
        assert!(meta.matches_selector(&selector));

        selector.insert("tier".to_string(), "front".to_string());
        assert!(!meta.matches_selector(&selector));
    }

    #[test]
    fn pending_for_uses_start_time_then_creation() {
        let now = Utc::now();
        let mut pod = Pod {
            metadata: ObjectMeta::new("p").created_at(now - TimeDelta::minutes(10)),
            ..Pod::default()
        };
        assert_eq!(pod.pending_for(now), Some(TimeDelta::minutes(10)));

        pod.start_time = Some(now - TimeDelta::minutes(3));
        assert_eq!(pod.pending_for(now), Some(TimeDelta::minutes(3)));

        pod.phase = PodPhase::Running;
        assert_eq!(pod.pending_for(now), None);
    }

    #[test]
    fn parses_tagged_yaml_stream() {
        let yaml = r"
kind: Pod
metadata:
  name: api-0
  namespace: shop
phase: Running
containers:
  - name: api
    ready: true
    restartCount: 2
---
- kind: ConfigMap
  metadata:
    name: api-config
  data:
    LOG_LEVEL: debug
- kind: Service
  metadata:
    name: api
  type: NodePort
  selector:
    app: api
  ports:
    - port: 8080
";
        let records = ResourceRecord::parse_yaml_stream(yaml).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].kind(), ResourceKind::Pod);
        assert_eq!(records[0].as_pod().unwrap().restart_count(), 2);
        assert_eq!(records[1].kind(), ResourceKind::ConfigMap);
        let svc = records[2].as_service().unwrap();
        assert_eq!(svc.service_type, ServiceType::NodePort);
        assert_eq!(svc.ports[0].protocol, "TCP");
    }

    #[test]
    fn rejects_unknown_kind_in_yaml() {
        let result = ResourceRecord::parse_yaml_stream("kind: Widget\nmetadata:\n  name: w\n");
        assert!(matches!(result, Err(Error::YamlParseFailed { .. })));
    }

    #[test]
    fn parses_json_array() {
        let json = r#"[{"kind":"PersistentVolumeClaim","metadata":{"name":"data"},"phase":"Lost"}]"#;
        let records = ResourceRecord::parse_json(json).unwrap();
        assert_eq!(records[0].as_claim().unwrap().phase, ClaimPhase::Lost);
    }

    #[test]
    fn resource_ref_display() {
        let record = ResourceRecord::Pod(Pod {
            metadata: ObjectMeta::new("api-0").in_namespace("shop"),
            ..Pod::default()
        });
        assert_eq!(record.resource_ref().to_string(), "Pod/shop/api-0");
    }
}
