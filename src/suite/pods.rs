//! Run-to-completion pods used by the suites

use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimVolumeSource, Pod, PodSecurityContext, PodSpec, Volume,
    VolumeDevice, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Where filesystem volumes are mounted inside test pods
pub const MOUNT_PATH: &str = "/mnt/volume";

/// Where block volumes are attached inside test pods
pub const DEVICE_PATH: &str = "/dev/e2e-block";

/// Name of the volume inside test pods
const VOLUME_NAME: &str = "test-volume";

/// Quote `s` for a POSIX shell
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Volume that mounts a claim
pub fn claim_volume(claim_name: &str) -> Volume {
    Volume {
        name: VOLUME_NAME.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            read_only: None,
        }),
        ..Default::default()
    }
}

/// Pod running `script` with `volume` mounted (or attached as a device)
#[derive(Debug, Clone)]
pub struct TestPod<'a> {
    /// Prefix for the generated pod name
    pub name_prefix: &'a str,
    /// Container image; needs a POSIX shell
    pub image: &'a str,
    /// Shell script run by the container
    pub script: String,
    /// Volume under test
    pub volume: Volume,
    /// Attach the volume as a raw block device instead of mounting it
    pub block: bool,
    /// Node to run on
    pub node_name: Option<&'a str>,
    /// fsGroup for the pod
    pub fs_group: Option<i64>,
}

impl TestPod<'_> {
    /// Build the pod
    pub fn build(self) -> Pod {
        let mut volume = self.volume;
        volume.name = VOLUME_NAME.to_string();

        let (volume_mounts, volume_devices) = if self.block {
            (
                None,
                Some(vec![VolumeDevice {
                    name: VOLUME_NAME.to_string(),
                    device_path: DEVICE_PATH.to_string(),
                }]),
            )
        } else {
            (
                Some(vec![VolumeMount {
                    name: VOLUME_NAME.to_string(),
                    mount_path: MOUNT_PATH.to_string(),
                    ..Default::default()
                }]),
                None,
            )
        };

        Pod {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", self.name_prefix)),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                node_name: self.node_name.map(str::to_string),
                security_context: self.fs_group.map(|group| PodSecurityContext {
                    fs_group: Some(group),
                    ..Default::default()
                }),
                containers: vec![Container {
                    name: self.name_prefix.to_string(),
                    image: Some(self.image.to_string()),
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        self.script,
                    ]),
                    volume_mounts,
                    volume_devices,
                    ..Default::default()
                }],
                volumes: Some(vec![volume]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Script writing `content` to `file` on the mounted volume
pub fn write_script(file: &str, content: &str) -> String {
    format!(
        "echo {} > {}/{}",
        shell_quote(content),
        MOUNT_PATH,
        file
    )
}

/// Script failing unless `file` on the mounted volume holds exactly `content`
pub fn verify_script(file: &str, content: &str, fs_group: Option<i64>) -> String {
    let mut script = format!(
        "grep -qxF {} {}/{}",
        shell_quote(content),
        MOUNT_PATH,
        file
    );
    if let Some(group) = fs_group {
        script.push_str(&format!(
            " && test \"$(stat -c %g {}/{})\" = {}",
            MOUNT_PATH, file, group
        ));
    }
    script
}

/// Script filling `file` on the mounted volume with `bytes` zero bytes
pub fn fill_script(file: &str, bytes: u64) -> String {
    format!("head -c {} /dev/zero > {}/{}", bytes, MOUNT_PATH, file)
}

/// Script failing unless `file` on the mounted volume is exactly `bytes` long
pub fn size_check_script(file: &str, bytes: u64) -> String {
    format!("test \"$(stat -c %s {}/{})\" = {}", MOUNT_PATH, file, bytes)
}

/// Script failing unless the block device is attached and writable
pub fn block_script() -> String {
    format!(
        "test -b {dev} && dd if=/dev/zero of={dev} bs=4096 count=1",
        dev = DEVICE_PATH
    )
}
