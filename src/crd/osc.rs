//! OperatingSystemConfig Custom Resource Definition
//!
//! An OperatingSystemConfig carries the systemd units and configuration files
//! that make up a worker node's operating system setup. Providers adjust the
//! embedded payloads through the mutation pipeline; the object itself is
//! owned and created elsewhere.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for an OperatingSystemConfig
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "extensions.trellis.dev",
    version = "v1alpha1",
    kind = "OperatingSystemConfig",
    plural = "operatingsystemconfigs",
    shortname = "osc",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Purpose","type":"string","jsonPath":".spec.purpose"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystemConfigSpec {
    /// What this configuration is for; only `reconcile` configs are mutated
    pub purpose: OperatingSystemConfigPurpose,

    /// Systemd units to install on the node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<Unit>,

    /// Files to install on the node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
}

/// Purpose of an OperatingSystemConfig
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperatingSystemConfigPurpose {
    /// Initial node provisioning (cloud-init); never mutated by providers
    Provision,
    /// Steady-state reconciliation of an existing node
    #[default]
    Reconcile,
}

/// A systemd unit carried by an OperatingSystemConfig
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    /// Unit file name, e.g. "kubelet.service"
    pub name: String,

    /// Whether the unit should be enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,

    /// Systemctl command to run for the unit (start, stop, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// The unit file content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A file carried by an OperatingSystemConfig
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct File {
    /// Absolute path of the file on the node
    pub path: String,

    /// File permissions in octal (e.g. 0644)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<i32>,

    /// The file content
    #[serde(default)]
    pub content: FileContent,
}

/// Content of a [`File`]
///
/// Only inline content is understood by the core; other sources (secret
/// references, image references) pass through untouched.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    /// Inline content, encoded per its encoding tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<FileContentInline>,
}

/// An embedded, encoded configuration payload plus its encoding tag
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileContentInline {
    /// How `data` is encoded: "" for plain text, "b64" for base64
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encoding: String,

    /// The encoded payload
    pub data: String,
}

/// Find the unit with the given name
pub fn unit_with_name<'a>(units: &'a mut [Unit], name: &str) -> Option<&'a mut Unit> {
    units.iter_mut().find(|u| u.name == name)
}

/// Find the file with the given path
pub fn file_with_path<'a>(files: &'a mut [File], path: &str) -> Option<&'a mut File> {
    files.iter_mut().find(|f| f.path == path)
}

/// Insert-or-replace a file by path
///
/// Replaces an existing entry with the same path in place, otherwise appends.
/// The file list never grows a duplicate path through this function.
pub fn ensure_file_with_path(files: &mut Vec<File>, file: File) {
    match files.iter_mut().find(|f| f.path == file.path) {
        Some(existing) => *existing = file,
        None => files.push(file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_at(path: &str, data: &str) -> File {
        File {
            path: path.to_string(),
            permissions: Some(0o644),
            content: FileContent {
                inline: Some(FileContentInline {
                    encoding: String::new(),
                    data: data.to_string(),
                }),
            },
        }
    }

    #[test]
    fn test_unit_with_name_finds_match() {
        let mut units = vec![
            Unit {
                name: "docker.service".to_string(),
                ..Default::default()
            },
            Unit {
                name: "kubelet.service".to_string(),
                content: Some("[Unit]\n".to_string()),
                ..Default::default()
            },
        ];

        let unit = unit_with_name(&mut units, "kubelet.service").expect("should find unit");
        assert_eq!(unit.content.as_deref(), Some("[Unit]\n"));
        assert!(unit_with_name(&mut units, "crio.service").is_none());
    }

    #[test]
    fn test_file_with_path_finds_match() {
        let mut files = vec![file_at("/etc/hosts", "127.0.0.1"), file_at("/etc/foo", "x")];
        assert!(file_with_path(&mut files, "/etc/foo").is_some());
        assert!(file_with_path(&mut files, "/etc/bar").is_none());
    }

    #[test]
    fn test_ensure_file_with_path_replaces_not_duplicates() {
        let mut files = vec![file_at("/etc/foo", "old")];

        ensure_file_with_path(&mut files, file_at("/etc/foo", "new"));
        assert_eq!(files.len(), 1);
        assert_eq!(
            files[0].content.inline.as_ref().unwrap().data.as_str(),
            "new"
        );

        ensure_file_with_path(&mut files, file_at("/etc/bar", "other"));
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_purpose_serializes_lowercase() {
        let json = serde_json::to_string(&OperatingSystemConfigPurpose::Reconcile).unwrap();
        assert_eq!(json, "\"reconcile\"");
        let json = serde_json::to_string(&OperatingSystemConfigPurpose::Provision).unwrap();
        assert_eq!(json, "\"provision\"");
    }

    #[test]
    fn test_inline_encoding_omitted_when_plain() {
        let fci = FileContentInline {
            encoding: String::new(),
            data: "abc".to_string(),
        };
        let json = serde_json::to_value(&fci).unwrap();
        assert!(json.get("encoding").is_none());

        let fci = FileContentInline {
            encoding: "b64".to_string(),
            data: "YWJj".to_string(),
        };
        let json = serde_json::to_value(&fci).unwrap();
        assert_eq!(json["encoding"], "b64");
    }
}
