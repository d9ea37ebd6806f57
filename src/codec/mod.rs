//! Codecs for embedded configuration payloads
//!
//! An OperatingSystemConfig carries its payloads as opaque encoded blobs with
//! an encoding tag. These codecs do the bidirectional transforms the mutation
//! pipeline needs: raw bytes, systemd unit options, and the typed kubelet
//! configuration. All of them preserve the declared encoding on re-encode so
//! an untouched payload round-trips unchanged.

mod kubelet;
mod unit;

pub use kubelet::{KubeletConfigCodec, KubeletConfiguration};
pub use unit::{UnitOption, UnitSerializer};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::crd::FileContentInline;
use crate::{Error, Result};

/// Encoding tag for base64-encoded inline content
pub const B64_ENCODING: &str = "b64";

/// Encoding tag for plain (unencoded) inline content
pub const PLAIN_ENCODING: &str = "";

/// Codec between raw bytes and encoded inline file content
///
/// Understands plain and base64 encodings. Decoding an unknown encoding tag
/// is an error rather than a guess; the tag travels with the payload and a
/// mismatch means the object is corrupt.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileContentInlineCodec;

impl FileContentInlineCodec {
    /// Decode inline content into raw bytes
    pub fn decode(&self, fci: &FileContentInline) -> Result<Vec<u8>> {
        match fci.encoding.as_str() {
            PLAIN_ENCODING => Ok(fci.data.as_bytes().to_vec()),
            B64_ENCODING => STANDARD
                .decode(&fci.data)
                .map_err(|e| Error::decode("inline file content", e)),
            other => Err(Error::decode(
                "inline file content",
                format!("unknown encoding {other:?}"),
            )),
        }
    }

    /// Encode raw bytes into inline content with the given encoding tag
    pub fn encode(&self, data: &[u8], encoding: &str) -> Result<FileContentInline> {
        let encoded = match encoding {
            PLAIN_ENCODING => String::from_utf8(data.to_vec())
                .map_err(|e| Error::encode("inline file content", e))?,
            B64_ENCODING => STANDARD.encode(data),
            other => {
                return Err(Error::encode(
                    "inline file content",
                    format!("unknown encoding {other:?}"),
                ))
            }
        };

        Ok(FileContentInline {
            encoding: encoding.to_string(),
            data: encoded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_roundtrip() {
        let codec = FileContentInlineCodec;
        let fci = FileContentInline {
            encoding: String::new(),
            data: "net.ipv4.ip_forward = 1\n".to_string(),
        };

        let bytes = codec.decode(&fci).unwrap();
        let back = codec.encode(&bytes, &fci.encoding).unwrap();
        assert_eq!(back, fci);
    }

    #[test]
    fn test_b64_roundtrip() {
        let codec = FileContentInlineCodec;
        let original = codec.encode(b"vm.max_map_count = 262144", B64_ENCODING).unwrap();
        assert_eq!(original.encoding, "b64");

        let bytes = codec.decode(&original).unwrap();
        assert_eq!(bytes, b"vm.max_map_count = 262144");

        let back = codec.encode(&bytes, &original.encoding).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_unknown_encoding_is_an_error() {
        let codec = FileContentInlineCodec;
        let fci = FileContentInline {
            encoding: "gzip".to_string(),
            data: "xxxx".to_string(),
        };

        let err = codec.decode(&fci).unwrap_err();
        assert!(err.to_string().contains("could not decode inline file content"));
        assert!(err.to_string().contains("gzip"));

        let err = codec.encode(b"x", "gzip").unwrap_err();
        assert!(err.to_string().contains("could not encode inline file content"));
    }

    #[test]
    fn test_invalid_base64_is_an_error() {
        let codec = FileContentInlineCodec;
        let fci = FileContentInline {
            encoding: "b64".to_string(),
            data: "not base64 at all!".to_string(),
        };
        assert!(codec.decode(&fci).is_err());
    }
}
