use drover_domain::labels::{
    ANNOTATION_COMPAT_DISABLE_PREDICTABLE_INTERFACES, ANNOTATION_COMPAT_KEEP_LEGACY_RESOLVERS,
    LABEL_ROLE_CONTROL_PLANE,
};
use drover_domain::{
    Cluster, ClusterConfigVersion, ClusterMachine, ClusterSecrets, InstallImage, JoinConfig,
    Link, LoadBalancerConfig, MachineConfigGenOptions, Resource,
};
use serde_json::json;
use serde_yaml::Value;
use tracing::debug;

use crate::error::GenError;
use crate::join::render_join_document;
use crate::patch::{apply_patches, merge};
use crate::secrets::SecretBundle;
use crate::version::at_least;

/// Everything the generator reads. The Talos contract version
/// (`config_version`) and the machine's Kubernetes version are cluster- and
/// join-lifetime constants; they never drift between applies.
pub struct GenerationInput {
    pub cluster: Resource<Cluster>,
    pub secrets: Resource<ClusterSecrets>,
    pub config_version: Resource<ClusterConfigVersion>,
    pub cluster_machine: Resource<ClusterMachine>,
    pub patches: Vec<String>,
    pub gen_options: Resource<MachineConfigGenOptions>,
    pub load_balancer: Option<Resource<LoadBalancerConfig>>,
    pub join_config: Option<Resource<JoinConfig>>,
    pub link: Option<Resource<Link>>,
    pub registry_mirrors: Vec<String>,
    pub image_factory_host: String,
    pub default_installer: String,
}

/// Compose the installer image reference for an install image. Schematic-less
/// (pre-factory) nodes fall back to the default installer; the installer name
/// differs under secure boot.
pub fn install_image_ref(
    image_factory_host: &str,
    default_installer: &str,
    image: &InstallImage,
) -> String {
    if image.schematic_id.is_empty() {
        return format!("{}:v{}", default_installer, image.talos_version);
    }
    let installer = if image.secure_boot { "installer-secureboot" } else { "installer" };
    format!("{}/{}/{}:v{}", image_factory_host, installer, image.schematic_id, image.talos_version)
}

/// Produce the uncompressed on-node config document for one machine.
pub fn generate(input: &GenerationInput) -> Result<Vec<u8>, GenError> {
    let contract = &input.config_version.spec.version;
    if contract.is_empty() {
        return Err(GenError::MissingInput("cluster config version contract"));
    }
    let install_image = input
        .gen_options
        .spec
        .install_image
        .as_ref()
        .ok_or(GenError::MissingInput("install image"))?;
    let endpoint = input
        .load_balancer
        .as_ref()
        .map(|lb| lb.spec.endpoint.clone())
        .ok_or(GenError::MissingInput("load balancer endpoint"))?;
    let bundle = SecretBundle::from_bytes(&input.secrets.spec.data)?;

    let is_control_plane = input.cluster_machine.meta.has_label(LABEL_ROLE_CONTROL_PLANE);
    let machine_type = if is_control_plane { "controlplane" } else { "worker" };
    let kubernetes_version = if input.cluster_machine.spec.kubernetes_version.is_empty() {
        input.cluster.spec.kubernetes_version.clone()
    } else {
        input.cluster_machine.spec.kubernetes_version.clone()
    };

    let mut features = json!({});
    // KubePrism ships with everything newer than the 1.4 line.
    if at_least(contract, 1, 5) {
        features["kubePrism"] = json!({ "enabled": true, "port": 7445 });
    }
    if input.cluster.spec.features.encrypt_disks {
        features["diskEncryption"] = json!({ "state": true, "ephemeral": true });
    }

    let mirrors: serde_json::Map<String, serde_json::Value> = input
        .registry_mirrors
        .iter()
        .filter_map(|mirror| {
            mirror.split_once('=').map(|(registry, endpoint)| {
                (registry.to_string(), json!({ "endpoints": [endpoint] }))
            })
        })
        .collect();

    let document = json!({
        "version": "v1alpha1",
        "machine": {
            "type": machine_type,
            "token": bundle.trustd_token,
            "ca": { "crt": bundle.ca_crt },
            "install": {
                "disk": input.gen_options.spec.install_disk,
                "image": install_image_ref(
                    &input.image_factory_host,
                    &input.default_installer,
                    install_image,
                ),
            },
            "features": features,
            "registries": { "mirrors": mirrors },
        },
        "cluster": {
            "id": input.cluster.meta.id,
            "clusterName": input.cluster.meta.id,
            "controlPlane": { "endpoint": endpoint },
            "token": bundle.bootstrap_token,
            "secretboxEncryptionSecret": bundle.secretbox_key,
            "kubernetesVersion": kubernetes_version,
            "talosVersion": contract,
        },
    });
    let mut document: Value = serde_yaml::to_value(&document).map_err(GenError::Render)?;

    // Patch order: machine compat opt-ins, then user patches.
    apply_patches(&mut document, &compat_patches(&input.cluster_machine))?;
    apply_patches(&mut document, &input.patches)?;

    strip_os_admin_role(&mut document);

    let mut rendered = serde_yaml::to_string(&document).map_err(GenError::Render)?;

    if let Some(join_config) = &input.join_config {
        let join_doc = render_join_document(
            &join_config.spec,
            input.link.as_ref().map(|l| &l.spec),
            contract,
        )?;
        if let Some(join_doc) = join_doc {
            rendered.push_str("---\n");
            rendered.push_str(&join_doc);
        }
    }

    debug!(
        machine = %input.cluster_machine.meta.id,
        machine_type,
        contract = %contract,
        "generated machine config"
    );
    Ok(rendered.into_bytes())
}

fn compat_patches(cluster_machine: &Resource<ClusterMachine>) -> Vec<String> {
    let mut patches = Vec::new();
    if cluster_machine
        .meta
        .annotation(ANNOTATION_COMPAT_DISABLE_PREDICTABLE_INTERFACES)
        .is_some()
    {
        patches.push("machine:\n  install:\n    extraKernelArgs:\n      - net.ifnames=0\n".to_string());
    }
    if cluster_machine.meta.annotation(ANNOTATION_COMPAT_KEEP_LEGACY_RESOLVERS).is_some() {
        patches.push(
            "machine:\n  network:\n    nameservers:\n      - 8.8.8.8\n      - 1.1.1.1\n"
                .to_string(),
        );
    }
    patches
}

/// Remove the os admin role from any Talos-API-access allowed-roles list,
/// wherever a patch may have put one.
fn strip_os_admin_role(value: &mut Value) {
    match value {
        Value::Mapping(map) => {
            for (key, entry) in map.iter_mut() {
                if key.as_str() == Some("kubernetesTalosAPIAccess") {
                    if let Some(Value::Sequence(roles)) = entry.get_mut("allowedRoles") {
                        roles.retain(|role| role.as_str() != Some("os:admin"));
                    }
                }
                strip_os_admin_role(entry);
            }
        }
        Value::Sequence(seq) => {
            for entry in seq.iter_mut() {
                strip_os_admin_role(entry);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_domain::{ClusterFeatures, MachineConfigGenOptions};

    fn input(contract: &str) -> GenerationInput {
        let bundle = SecretBundle {
            bootstrap_token: "btok".into(),
            trustd_token: "ttok".into(),
            secretbox_key: "skey".into(),
            ca_crt: "CERT".into(),
            ca_key: "KEY".into(),
        };
        let mut cluster_machine = Resource::new("m1", ClusterMachine {
            kubernetes_version: "1.31.1".into(),
        });
        cluster_machine.meta.set_label(LABEL_ROLE_CONTROL_PLANE, "");

        GenerationInput {
            cluster: Resource::new("c1", Cluster {
                talos_version: contract.to_string(),
                kubernetes_version: "1.31.0".into(),
                features: ClusterFeatures::default(),
                locked: false,
            }),
            secrets: Resource::new("c1", ClusterSecrets {
                data: bundle.to_bytes().unwrap(),
                imported: false,
            }),
            config_version: Resource::new("c1", ClusterConfigVersion {
                version: contract.to_string(),
            }),
            cluster_machine,
            patches: Vec::new(),
            gen_options: Resource::new("m1", MachineConfigGenOptions {
                install_disk: "/dev/sda".into(),
                install_image: Some(InstallImage {
                    talos_version: contract.to_string(),
                    schematic_id: "abcd1234".into(),
                    schematic_initialized: true,
                    secure_boot: false,
                    compare_full_schematic_id: false,
                }),
            }),
            load_balancer: Some(Resource::new("c1", LoadBalancerConfig {
                endpoint: "https://10.0.0.100:6443".into(),
            })),
            join_config: Some(Resource::new("c1", JoinConfig {
                siderolink_api_url: "https://drover.example:8090".into(),
                event_sink_port: 8091,
                kmsg_log_url: String::new(),
                use_grpc_tunnel: false,
            })),
            link: None,
            registry_mirrors: vec!["docker.io=https://mirror.example".into()],
            image_factory_host: "factory.example".into(),
            default_installer: "registry.example/node-os/installer".into(),
        }
    }

    fn doc(bytes: &[u8]) -> Value {
        // First document only.
        let text = std::str::from_utf8(bytes).unwrap();
        let first = text.split("\n---\n").next().unwrap();
        serde_yaml::from_str(first).unwrap()
    }

    #[test]
    fn control_plane_document_carries_contract_and_secrets() {
        let bytes = generate(&input("1.9.3")).unwrap();
        let config = doc(&bytes);
        assert_eq!(config["machine"]["type"], Value::from("controlplane"));
        assert_eq!(config["cluster"]["talosVersion"], Value::from("1.9.3"));
        assert_eq!(config["cluster"]["token"], Value::from("btok"));
        assert_eq!(config["cluster"]["kubernetesVersion"], Value::from("1.31.1"));
        assert_eq!(
            config["machine"]["install"]["image"],
            Value::from("factory.example/installer/abcd1234:v1.9.3")
        );
    }

    #[test]
    fn kube_prism_gated_on_the_contract_version() {
        let with = doc(&generate(&input("1.9.3")).unwrap());
        assert_eq!(with["machine"]["features"]["kubePrism"]["enabled"], Value::from(true));

        let without = doc(&generate(&input("1.4.8")).unwrap());
        assert!(without["machine"]["features"].get("kubePrism").is_none());
    }

    #[test]
    fn secure_boot_selects_the_other_installer() {
        let mut gen_input = input("1.9.3");
        gen_input.gen_options.spec.install_image.as_mut().unwrap().secure_boot = true;
        let config = doc(&generate(&gen_input).unwrap());
        assert_eq!(
            config["machine"]["install"]["image"],
            Value::from("factory.example/installer-secureboot/abcd1234:v1.9.3")
        );
    }

    #[test]
    fn schematic_less_nodes_use_the_default_installer() {
        let mut gen_input = input("1.9.3");
        gen_input.gen_options.spec.install_image.as_mut().unwrap().schematic_id = String::new();
        let config = doc(&generate(&gen_input).unwrap());
        assert_eq!(
            config["machine"]["install"]["image"],
            Value::from("registry.example/node-os/installer:v1.9.3")
        );
    }

    #[test]
    fn user_patches_apply_after_compat_patches() {
        let mut gen_input = input("1.9.3");
        gen_input
            .cluster_machine
            .meta
            .set_annotation(ANNOTATION_COMPAT_DISABLE_PREDICTABLE_INTERFACES, "");
        gen_input.patches =
            vec!["machine:\n  install:\n    extraKernelArgs:\n      - console=ttyS0\n".into()];
        let config = doc(&generate(&gen_input).unwrap());
        // The user patch replaces the compat sequence wholesale.
        assert_eq!(
            config["machine"]["install"]["extraKernelArgs"],
            serde_yaml::from_str::<Value>("[console=ttyS0]").unwrap()
        );
    }

    #[test]
    fn os_admin_role_is_always_stripped() {
        let mut gen_input = input("1.9.3");
        gen_input.patches = vec![
            "machine:\n  features:\n    kubernetesTalosAPIAccess:\n      enabled: true\n      allowedRoles:\n        - os:admin\n        - os:reader\n"
                .into(),
        ];
        let config = doc(&generate(&gen_input).unwrap());
        let roles = &config["machine"]["features"]["kubernetesTalosAPIAccess"]["allowedRoles"];
        assert_eq!(roles, &serde_yaml::from_str::<Value>("[os:reader]").unwrap());
    }

    #[test]
    fn join_document_is_appended_for_multi_doc_versions() {
        let bytes = generate(&input("1.9.3")).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("SideroLinkConfig"));

        let bytes = generate(&input("1.4.8")).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(!text.contains("SideroLinkConfig"));
    }

    #[test]
    fn missing_load_balancer_is_a_generation_error() {
        let mut gen_input = input("1.9.3");
        gen_input.load_balancer = None;
        assert!(matches!(generate(&gen_input), Err(GenError::MissingInput(_))));
    }
}
