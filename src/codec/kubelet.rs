//! Kubelet configuration codec
//!
//! The kubelet configuration travels inside an OperatingSystemConfig as an
//! encoded YAML document. This codec decodes it into a typed value providers
//! can mutate in place, then re-encodes it with the payload's original
//! declared encoding. Fields the type does not model are preserved through a
//! flattened map so a provider touching one knob does not erase the rest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::FileContentInlineCodec;
use crate::crd::FileContentInline;
use crate::{Error, Result};

const PAYLOAD: &str = "kubelet configuration";

/// The kubelet's component configuration
///
/// Models the fields providers commonly adjust; everything else rides along
/// in `extra` untouched.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfiguration {
    /// API version of the configuration schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the configuration document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Cluster DNS server addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_dns: Vec<String>,

    /// Cluster domain suffix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,

    /// Maximum number of pods per node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pods: Option<i32>,

    /// Enabled/disabled feature gates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feature_gates: BTreeMap<String, bool>,

    /// Fields not modelled above, preserved verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Codec between encoded inline content and [`KubeletConfiguration`]
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeletConfigCodec {
    fci: FileContentInlineCodec,
}

impl KubeletConfigCodec {
    /// Decode inline content into a kubelet configuration
    pub fn decode(&self, fci: &FileContentInline) -> Result<KubeletConfiguration> {
        let data = self.fci.decode(fci)?;
        serde_yaml::from_slice(&data).map_err(|e| Error::decode(PAYLOAD, e))
    }

    /// Encode a kubelet configuration with the given encoding tag
    ///
    /// The tag is the one the payload arrived with, so the object keeps its
    /// declared encoding across a mutation.
    pub fn encode(&self, config: &KubeletConfiguration, encoding: &str) -> Result<FileContentInline> {
        let data = serde_yaml::to_string(config).map_err(|e| Error::encode(PAYLOAD, e))?;
        self.fci.encode(data.as_bytes(), encoding)
    }
}
