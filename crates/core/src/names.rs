//! Well-known names, labels and annotations shared by every crate.

/// The only operator configuration name that is ever reconciled.
pub const OPERATOR_CONFIG: &str = "cluster";

/// Name of the cluster-wide network config object.
pub const CLUSTER_CONFIG: &str = "cluster";

/// Namespace holding the applied-snapshot record, MTU record and operator leases.
pub const APPLIED_NAMESPACE: &str = "openshift-network-operator";

/// Prefix of the applied-snapshot ConfigMap; the config name is appended.
pub const APPLIED_PREFIX: &str = "applied-";

/// Data key of the applied-snapshot ConfigMap.
pub const APPLIED_DATA_KEY: &str = "applied";

/// ConfigMap the MTU prober reports into.
pub const MTU_CM_NAME: &str = "mtu";
pub const MTU_CM_KEY: &str = "mtu";

/// Lease/lock ConfigMap; changes to it never trigger a cycle.
pub const OPERATOR_LOCK: &str = "network-operator-lock";

/// Namespace rendered elsewhere but operated by us.
pub const CLOUD_NETWORK_CONFIG_NAMESPACE: &str = "openshift-cloud-network-config-controller";

/// Label on workloads whose rollout feeds status. An empty value opts out.
pub const GENERATE_STATUS_LABEL: &str = "networkoperator.openshift.io/generate-status";

/// Status scope for objects deployed to the cluster we run in.
pub const STANDALONE_CLUSTER_NAME: &str = "default";

/// Objects carrying this annotation never degrade the operator when they fail to apply.
pub const IGNORE_OBJECT_ERROR_ANNOTATION: &str = "networkoperator.openshift.io/ignore-errors";

/// Objects carrying this annotation belong to another (remote) cluster.
pub const CLUSTER_NAME_ANNOTATION: &str = "network.operator.openshift.io/cluster-name";

/// Role label on machine configs.
pub const MACHINE_CONFIG_ROLE_LABEL: &str = "machineconfiguration.openshift.io/role";

pub const OPERATOR_GROUP: &str = "operator.openshift.io";
pub const CONFIG_GROUP: &str = "config.openshift.io";
pub const MACHINE_CONFIG_GROUP: &str = "machineconfiguration.openshift.io";

pub const NETWORK_TYPE_OVN: &str = "OVNKubernetes";
pub const NETWORK_TYPE_SDN: &str = "OpenShiftSDN";
