//! Manifest document patching
//!
//! Documents are patched as `serde_json::Value` before they are applied.
//! [`patch_item`] moves namespaced objects into the test namespace and makes
//! cluster-scoped RBAC and StorageClass names unique to the framework.
//! [`patch_csi_deployment`] additionally rewrites a CSI driver's identity,
//! container images and arguments, and pins its pods to one node.

use std::collections::BTreeMap;

use serde_json::Value;

use storage_e2e_common::Error;

use crate::framework::Framework;

/// Kinds that live in the test namespace
const NAMESPACED_KINDS: &[&str] = &[
    "ServiceAccount",
    "Role",
    "RoleBinding",
    "Service",
    "ConfigMap",
    "Secret",
    "Pod",
    "Deployment",
    "StatefulSet",
    "DaemonSet",
    "ReplicaSet",
];

/// Kinds whose pod template sits at `spec.template.spec`
const WORKLOAD_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet"];

const NODE_ID_ARG: &str = "--nodeid=";
const PROVISIONER_ARG: &str = "--provisioner=";
const DRIVER_NAME_ARG: &str = "--drivername=";

/// How a CSI driver's manifests are rewritten for one installation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchOptions {
    /// Driver name used in the stock manifests
    pub old_driver_name: String,
    /// Run-unique driver name to register instead
    pub new_driver_name: String,
    /// Container running the driver itself
    pub driver_container_name: String,
    /// Container running the external provisioner
    pub provisioner_container_name: String,
    /// Node the driver's pods are pinned to
    pub node_name: Option<String>,
    /// Image overrides keyed by container name
    pub images: BTreeMap<String, String>,
}

fn kind_and_name(doc: &Value) -> (String, String) {
    (
        doc["kind"].as_str().unwrap_or("<unknown>").to_string(),
        doc["metadata"]["name"]
            .as_str()
            .unwrap_or("<unnamed>")
            .to_string(),
    )
}

fn set_string(target: &mut Value, key: &str, value: &str) -> bool {
    match target.as_object_mut() {
        Some(map) => {
            map.insert(key.to_string(), Value::String(value.to_string()));
            true
        }
        None => false,
    }
}

fn set_metadata(doc: &mut Value, key: &str, value: &str) -> Result<(), Error> {
    if set_string(&mut doc["metadata"], key, value) {
        return Ok(());
    }
    let (kind, name) = kind_and_name(doc);
    Err(Error::patch(kind, name, "document has no metadata"))
}

fn patch_metadata_name(framework: &Framework, doc: &mut Value) -> Result<(), Error> {
    let (kind, name) = kind_and_name(doc);
    if doc["metadata"]["name"].as_str().is_none() {
        return Err(Error::patch(kind, name, "document has no metadata.name"));
    }
    set_metadata(doc, "name", &framework.patch_name(&name))
}

fn patch_subjects(framework: &Framework, doc: &mut Value) {
    if let Some(subjects) = doc.get_mut("subjects").and_then(Value::as_array_mut) {
        for subject in subjects {
            if subject["kind"] == "ServiceAccount" {
                set_string(subject, "namespace", framework.namespace());
            }
        }
    }
}

fn patch_cluster_role_ref(framework: &Framework, doc: &mut Value) {
    let Some(role_ref) = doc.get_mut("roleRef") else {
        return;
    };
    if role_ref["kind"] != "ClusterRole" {
        return;
    }
    if let Some(name) = role_ref["name"].as_str().map(str::to_string) {
        set_string(role_ref, "name", &framework.patch_name(&name));
    }
}

/// Generic patching every deployed document goes through
///
/// Namespaced kinds are moved into the test namespace, ClusterRole,
/// ClusterRoleBinding and StorageClass names are made unique, and binding
/// subjects and role references follow. Unknown kinds are rejected.
pub fn patch_item(framework: &Framework, doc: &mut Value) -> Result<(), Error> {
    let (kind, name) = kind_and_name(doc);
    if !doc.is_object() {
        return Err(Error::patch(kind, name, "document is not a mapping"));
    }

    if NAMESPACED_KINDS.contains(&kind.as_str()) {
        set_metadata(doc, "namespace", framework.namespace())?;
    }

    match kind.as_str() {
        "RoleBinding" => {
            patch_subjects(framework, doc);
            patch_cluster_role_ref(framework, doc);
        }
        "ClusterRoleBinding" => {
            patch_metadata_name(framework, doc)?;
            patch_subjects(framework, doc);
            patch_cluster_role_ref(framework, doc);
        }
        "ClusterRole" | "StorageClass" => patch_metadata_name(framework, doc)?,
        "CSIDriver" => {}
        k if NAMESPACED_KINDS.contains(&k) => {}
        _ => {
            return Err(Error::patch(
                kind,
                name,
                "missing support for patching item of this kind",
            ))
        }
    }
    Ok(())
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn rename_tokens(s: &str, old: &str, new: &str) -> (String, usize) {
    if old.is_empty() || old == new {
        return (s.to_string(), 0);
    }
    let mut out = String::with_capacity(s.len());
    let mut renamed = 0;
    let mut rest = s;
    let mut prev: Option<char> = None;
    while let Some(pos) = rest.find(old) {
        let before = rest[..pos].chars().next_back().or(prev);
        let after = rest[pos + old.len()..].chars().next();
        let whole = !before.is_some_and(is_name_char) && !after.is_some_and(is_name_char);
        out.push_str(&rest[..pos]);
        if whole {
            out.push_str(new);
            renamed += 1;
        } else {
            out.push_str(old);
        }
        prev = old.chars().next_back();
        rest = &rest[pos + old.len()..];
    }
    out.push_str(rest);
    (out, renamed)
}

/// Replace every reference to the name `old` in `s` with `new`
///
/// A reference is an occurrence not embedded in a longer name, so
/// `csi-hostpathplugin` and `csi-hostpath-sc` are left alone while
/// `/plugins/csi-hostpath/csi.sock` is rewritten. Because a derived name like
/// `csi-hostpath-<suffix>` is itself not a reference, renaming is idempotent.
pub fn rename_in_str(s: &str, old: &str, new: &str) -> String {
    rename_tokens(s, old, new).0
}

/// Rename the driver in every string value of a document
///
/// Returns the number of references rewritten.
pub fn rename_driver(doc: &mut Value, old: &str, new: &str) -> usize {
    match doc {
        Value::String(s) if s.contains(old) => {
            let (renamed, count) = rename_tokens(s, old, new);
            *s = renamed;
            count
        }
        Value::Array(items) => items.iter_mut().map(|v| rename_driver(v, old, new)).sum(),
        Value::Object(map) => map.values_mut().map(|v| rename_driver(v, old, new)).sum(),
        _ => 0,
    }
}

fn pod_spec_mut<'a>(kind: &str, doc: &'a mut Value) -> Option<&'a mut Value> {
    if kind == "Pod" {
        doc.pointer_mut("/spec")
    } else if WORKLOAD_KINDS.contains(&kind) {
        doc.pointer_mut("/spec/template/spec")
    } else {
        None
    }
}

fn container_args_mut(container: &mut Value) -> Option<&mut Vec<Value>> {
    let map = container.as_object_mut()?;
    map.entry("args")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
}

/// Set `flag` to `value`, replacing an existing occurrence or appending one
fn set_flag(args: &mut Vec<Value>, flag: &str, value: &str) {
    let wanted = Value::String(format!("{}{}", flag, value));
    match args
        .iter_mut()
        .find(|a| a.as_str().is_some_and(|a| a.starts_with(flag)))
    {
        Some(arg) => *arg = wanted,
        None => args.push(wanted),
    }
}

fn patch_container(opts: &PatchOptions, container: &mut Value) {
    let Some(name) = container["name"].as_str().map(str::to_string) else {
        return;
    };

    if let Some(image) = opts.images.get(&name) {
        set_string(container, "image", image);
    }

    if name == opts.driver_container_name {
        let Some(args) = container_args_mut(container) else {
            return;
        };
        if let Some(node) = &opts.node_name {
            for arg in args.iter_mut() {
                if arg.as_str().is_some_and(|a| a.starts_with(NODE_ID_ARG)) {
                    *arg = Value::String(format!("{}{}", NODE_ID_ARG, node));
                }
            }
        }
        if !opts.new_driver_name.is_empty() {
            set_flag(args, DRIVER_NAME_ARG, &opts.new_driver_name);
        }
    } else if name == opts.provisioner_container_name && !opts.new_driver_name.is_empty() {
        if let Some(args) = container_args_mut(container) {
            let wanted = format!("{}{}", PROVISIONER_ARG, opts.new_driver_name);
            if !args.iter().any(|a| a.as_str() == Some(wanted.as_str())) {
                args.push(Value::String(wanted));
            }
        }
    }
}

/// Patch one document of a CSI driver deployment
///
/// Runs [`patch_item`] first, then renames the driver, rewrites containers
/// matched by name and pins pod templates to `opts.node_name`. StorageClass
/// documents get the new driver name as provisioner.
pub fn patch_csi_deployment(
    framework: &Framework,
    opts: &PatchOptions,
    doc: &mut Value,
) -> Result<(), Error> {
    patch_item(framework, doc)?;

    if !opts.new_driver_name.is_empty() {
        rename_driver(doc, &opts.old_driver_name, &opts.new_driver_name);
    }

    let kind = doc["kind"].as_str().unwrap_or_default().to_string();
    if kind == "StorageClass" && !opts.new_driver_name.is_empty() {
        set_string(doc, "provisioner", &opts.new_driver_name);
    }

    if let Some(spec) = pod_spec_mut(&kind, doc) {
        for field in ["initContainers", "containers"] {
            if let Some(containers) = spec.get_mut(field).and_then(Value::as_array_mut) {
                containers
                    .iter_mut()
                    .for_each(|container| patch_container(opts, container));
            }
        }
        if let Some(node) = &opts.node_name {
            set_string(spec, "nodeName", node);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::cluster::MockClusterClient;
    use crate::config::RunConfig;

    const NS: &str = "e2e-tests-csi-volumes-q2x9z";

    fn framework() -> Framework {
        Framework::for_namespace(
            Arc::new(MockClusterClient::new()),
            Arc::new(RunConfig::default()),
            NS,
        )
    }

    fn options() -> PatchOptions {
        PatchOptions {
            old_driver_name: "csi-hostpath".to_string(),
            new_driver_name: format!("csi-hostpath-{}", NS),
            driver_container_name: "hostpath".to_string(),
            provisioner_container_name: "csi-provisioner".to_string(),
            node_name: Some("worker-2".to_string()),
            images: BTreeMap::from([(
                "hostpath".to_string(),
                "registry.k8s.io/sig-storage/hostpathplugin:v1.14.0".to_string(),
            )]),
        }
    }

    fn plugin() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": {"name": "csi-hostpathplugin", "namespace": "default"},
            "spec": {
                "template": {
                    "spec": {
                        "serviceAccountName": "csi-service-account",
                        "containers": [
                            {
                                "name": "driver-registrar",
                                "image": "quay.io/k8scsi/driver-registrar:v0.3.0",
                                "args": [
                                    concat!(
                                        "--kubelet-registration-path=",
                                        "/var/lib/kubelet/plugins/csi-hostpath/csi.sock"
                                    )
                                ]
                            },
                            {
                                "name": "hostpath",
                                "image": "quay.io/k8scsi/hostpathplugin:v0.3.0",
                                "args": [
                                    "--v=5",
                                    "--endpoint=$(CSI_ENDPOINT)",
                                    "--nodeid=$(KUBE_NODE_NAME)"
                                ]
                            }
                        ],
                        "volumes": [
                            {
                                "name": "socket-dir",
                                "hostPath": {
                                    "path": "/var/lib/kubelet/plugins/csi-hostpath",
                                    "type": "DirectoryOrCreate"
                                }
                            }
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn test_namespaced_kinds_move_into_test_namespace() {
        let fw = framework();
        for kind in ["ServiceAccount", "Role", "Service", "Deployment", "DaemonSet"] {
            let mut doc = json!({"kind": kind, "metadata": {"name": "x", "namespace": "default"}});
            patch_item(&fw, &mut doc).unwrap();
            assert_eq!(doc["metadata"]["namespace"], NS, "{kind}");
            assert_eq!(doc["metadata"]["name"], "x", "{kind}");
        }
    }

    #[test]
    fn test_cluster_scoped_rbac_names_are_made_unique() {
        let fw = framework();
        let mut role = json!({
            "kind": "ClusterRole",
            "metadata": {"name": "external-provisioner-runner"}
        });
        patch_item(&fw, &mut role).unwrap();
        assert_eq!(
            role["metadata"]["name"],
            format!("external-provisioner-runner-{}", NS)
        );
        assert!(role["metadata"].get("namespace").is_none());

        let mut binding = json!({
            "kind": "ClusterRoleBinding",
            "metadata": {"name": "csi-provisioner-role"},
            "subjects": [
                {"kind": "ServiceAccount", "name": "csi-provisioner", "namespace": "default"},
                {"kind": "User", "name": "admin"}
            ],
            "roleRef": {
                "kind": "ClusterRole",
                "name": "external-provisioner-runner",
                "apiGroup": "rbac.authorization.k8s.io"
            }
        });
        patch_item(&fw, &mut binding).unwrap();
        assert_eq!(binding["metadata"]["name"], format!("csi-provisioner-role-{}", NS));
        assert_eq!(binding["subjects"][0]["namespace"], NS);
        assert!(binding["subjects"][1].get("namespace").is_none());
        assert_eq!(
            binding["roleRef"]["name"],
            format!("external-provisioner-runner-{}", NS)
        );
    }

    #[test]
    fn test_role_binding_keeps_namespaced_role_ref() {
        let fw = framework();
        let mut binding = json!({
            "kind": "RoleBinding",
            "metadata": {"name": "csi-provisioner-cfg", "namespace": "default"},
            "subjects": [
                {"kind": "ServiceAccount", "name": "csi-provisioner", "namespace": "default"}
            ],
            "roleRef": {"kind": "Role", "name": "external-provisioner-cfg"}
        });
        patch_item(&fw, &mut binding).unwrap();
        assert_eq!(binding["metadata"]["namespace"], NS);
        assert_eq!(binding["subjects"][0]["namespace"], NS);
        assert_eq!(binding["roleRef"]["name"], "external-provisioner-cfg");
    }

    #[test]
    fn test_unknown_kind_is_a_patch_error() {
        let mut doc = json!({
            "kind": "CustomResourceDefinition",
            "metadata": {"name": "widgets.example.com"}
        });
        let err = patch_item(&framework(), &mut doc).unwrap_err();
        assert!(matches!(err, Error::Patch { .. }));
        assert!(err.is_driver_fatal());
        assert!(err.to_string().contains("CustomResourceDefinition/widgets.example.com"));
    }

    #[test]
    fn test_rename_is_idempotent() {
        let new = format!("csi-hostpath-{}", NS);
        let once = rename_in_str("/plugins/csi-hostpath/csi.sock", "csi-hostpath", &new);
        let twice = rename_in_str(&once, "csi-hostpath", &new);
        assert_eq!(once, format!("/plugins/{}/csi.sock", new));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_rename_skips_longer_names() {
        assert_eq!(
            rename_in_str("csi-hostpathplugin", "csi-hostpath", "csi-hostpath-ns"),
            "csi-hostpathplugin"
        );
        assert_eq!(
            rename_in_str("--drivername=csi-hostpath", "csi-hostpath", "csi-hostpath-ns"),
            "--drivername=csi-hostpath-ns"
        );
        assert_eq!(
            rename_in_str("csi-hostpath,csi-hostpath", "csi-hostpath", "x"),
            "x,x"
        );
    }

    /// Story: renaming the driver in a plugin manifest
    ///
    /// The stock manifest references the driver name in a registration path
    /// and a host path. After patching, every one of those K references
    /// carries the run-unique name and no bare reference remains.
    #[test]
    fn test_csi_patch_renames_every_reference() {
        let opts = options();
        let mut doc = plugin();
        let mut scratch = doc.clone();
        let k = rename_driver(&mut scratch, &opts.old_driver_name, &opts.new_driver_name);
        assert_eq!(k, 2);

        patch_csi_deployment(&framework(), &opts, &mut doc).unwrap();

        let remaining =
            rename_driver(&mut doc.clone(), &opts.old_driver_name, &opts.new_driver_name);
        assert_eq!(remaining, 0);
        // The K renamed references plus the appended --drivername flag
        assert_eq!(doc.to_string().matches(&opts.new_driver_name).count(), k + 1);
        assert_eq!(doc["metadata"]["name"], "csi-hostpathplugin");
    }

    #[test]
    fn test_csi_patch_rewrites_containers_and_pins_node() {
        let opts = options();
        let mut doc = plugin();
        patch_csi_deployment(&framework(), &opts, &mut doc).unwrap();

        let spec = &doc["spec"]["template"]["spec"];
        assert_eq!(spec["nodeName"], "worker-2");
        assert_eq!(doc["metadata"]["namespace"], NS);

        let hostpath = &spec["containers"][1];
        assert_eq!(
            hostpath["image"],
            "registry.k8s.io/sig-storage/hostpathplugin:v1.14.0"
        );
        assert_eq!(hostpath["args"][2], "--nodeid=worker-2");

        // Unmatched containers keep their image
        assert_eq!(
            spec["containers"][0]["image"],
            "quay.io/k8scsi/driver-registrar:v0.3.0"
        );
    }

    /// Story: the plugin registers under the run-unique name
    ///
    /// Stock plugin args never mention the driver name, so renaming alone
    /// leaves the plugin registering as `csi-hostpath`. Patching appends the
    /// name flag once and a second patch leaves it alone.
    #[test]
    fn test_driver_container_gets_unique_driver_name_once() {
        let opts = options();
        let mut doc = plugin();
        patch_csi_deployment(&framework(), &opts, &mut doc).unwrap();
        patch_csi_deployment(&framework(), &opts, &mut doc).unwrap();

        let args = doc["spec"]["template"]["spec"]["containers"][1]["args"]
            .as_array()
            .unwrap();
        let wanted = format!("--drivername={}", opts.new_driver_name);
        assert_eq!(args.iter().filter(|a| **a == wanted.as_str()).count(), 1);
        assert_eq!(
            args.iter()
                .filter(|a| a.as_str().unwrap().starts_with("--drivername="))
                .count(),
            1
        );

        // The sidecar is not the plugin and gets no name flag
        let registrar = doc["spec"]["template"]["spec"]["containers"][0]["args"]
            .as_array()
            .unwrap();
        assert!(!registrar
            .iter()
            .any(|a| a.as_str().unwrap().starts_with("--drivername=")));
    }

    #[test]
    fn test_existing_driver_name_flag_is_replaced() {
        let opts = options();
        let mut doc = json!({
            "kind": "DaemonSet",
            "metadata": {"name": "csi-hostpathplugin"},
            "spec": {"template": {"spec": {"containers": [
                {"name": "hostpath", "args": ["--drivername=hostpath.csi.k8s.io"]}
            ]}}}
        });
        patch_csi_deployment(&framework(), &opts, &mut doc).unwrap();
        assert_eq!(
            doc["spec"]["template"]["spec"]["containers"][0]["args"],
            json!([format!("--drivername={}", opts.new_driver_name)])
        );
    }

    #[test]
    fn test_provisioner_argument_is_appended_once() {
        let opts = options();
        let mut doc = json!({
            "kind": "StatefulSet",
            "metadata": {"name": "csi-hostpath-provisioner"},
            "spec": {"template": {"spec": {"containers": [
                {"name": "csi-provisioner", "image": "quay.io/k8scsi/csi-provisioner:v0.3.0"}
            ]}}}
        });
        patch_csi_deployment(&framework(), &opts, &mut doc).unwrap();
        patch_csi_deployment(&framework(), &opts, &mut doc).unwrap();

        let args = doc["spec"]["template"]["spec"]["containers"][0]["args"]
            .as_array()
            .unwrap();
        let wanted = format!("--provisioner={}", opts.new_driver_name);
        assert_eq!(args.iter().filter(|a| **a == wanted.as_str()).count(), 1);
    }

    #[test]
    fn test_storage_class_gets_unique_name_and_provisioner() {
        let opts = options();
        let mut doc = json!({
            "apiVersion": "storage.k8s.io/v1",
            "kind": "StorageClass",
            "metadata": {"name": "csi-hostpath-sc"},
            "provisioner": "csi-hostpath"
        });
        patch_csi_deployment(&framework(), &opts, &mut doc).unwrap();
        assert_eq!(doc["provisioner"], opts.new_driver_name.as_str());
        assert!(doc["metadata"]["name"]
            .as_str()
            .unwrap()
            .ends_with(&format!("-sc-{}", NS)));
    }
}
