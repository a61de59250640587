//! Serialization backends and decoded result artifacts.
//!
//! [`Backend`] is a closed enum: every variant carries its own decode
//! function, selected by a single `match` with no default arm, so adding
//! a backend is a compile-time-checked change rather than a string
//! comparison scattered across call sites.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Serialization technology used to produce or load a result payload.
///
/// The crate treats payloads as opaque bytes; the backend tag records
/// which decoder applies when a consumer materializes the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    /// Pickle-protocol byte stream (Python-produced model objects).
    Pickle,
    /// ONNX protobuf model graph.
    Onnx,
    /// Caller-defined encoding; passed through untouched.
    Custom,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Backend {
    /// Canonical string form, used for file names and relational storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pickle => "Pickle",
            Self::Onnx => "Onnx",
            Self::Custom => "Custom",
        }
    }

    /// Parses the canonical string form. Returns `None` for anything else.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pickle" => Some(Self::Pickle),
            "Onnx" => Some(Self::Onnx),
            "Custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Decodes a result payload into a typed [`Artifact`].
    ///
    /// Each variant dispatches to its own decode function; there is no
    /// default arm, so a new backend cannot silently fall through to the
    /// wrong decoder.
    ///
    /// # Errors
    ///
    /// [`JobError::Storage`] when the payload fails the backend's framing
    /// checks (empty payload, or a pickle stream without its protocol
    /// marker).
    ///
    /// # Examples
    ///
    /// ```
    /// use mljobs::{Artifact, Backend};
    ///
    /// let artifact = Backend::Custom.decode(b"model-bytes").unwrap();
    /// assert_eq!(artifact, Artifact::Custom(b"model-bytes".to_vec()));
    ///
    /// assert!(Backend::Pickle.decode(b"not a pickle").is_err());
    /// ```
    pub fn decode(&self, bytes: &[u8]) -> Result<Artifact, JobError> {
        match self {
            Self::Pickle => decode_pickle(bytes),
            Self::Onnx => decode_onnx(bytes),
            Self::Custom => decode_custom(bytes),
        }
    }
}

/// A result payload decoded through its backend's framing checks.
///
/// The crate does not interpret model content (fit/predict and full
/// deserialization stay with the consumer); an `Artifact` is the payload
/// bytes tagged with the backend that validated them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// A validated pickle-protocol byte stream.
    Pickle(Vec<u8>),
    /// An ONNX model graph.
    Onnx(Vec<u8>),
    /// Caller-defined bytes, passed through untouched.
    Custom(Vec<u8>),
}

impl Artifact {
    /// The raw payload bytes.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Pickle(b) | Self::Onnx(b) | Self::Custom(b) => b,
        }
    }

    /// The backend that produced this artifact.
    pub fn backend(&self) -> Backend {
        match self {
            Self::Pickle(_) => Backend::Pickle,
            Self::Onnx(_) => Backend::Onnx,
            Self::Custom(_) => Backend::Custom,
        }
    }
}

// Pickle protocol 2+ streams begin with the PROTO opcode (0x80).
const PICKLE_PROTO_OPCODE: u8 = 0x80;

fn decode_pickle(bytes: &[u8]) -> Result<Artifact, JobError> {
    match bytes.first() {
        Some(&PICKLE_PROTO_OPCODE) => Ok(Artifact::Pickle(bytes.to_vec())),
        Some(_) => Err(JobError::Storage(
            "payload is not a pickle protocol 2+ stream".to_string(),
        )),
        None => Err(JobError::Storage("empty pickle payload".to_string())),
    }
}

fn decode_onnx(bytes: &[u8]) -> Result<Artifact, JobError> {
    if bytes.is_empty() {
        return Err(JobError::Storage("empty onnx payload".to_string()));
    }
    Ok(Artifact::Onnx(bytes.to_vec()))
}

fn decode_custom(bytes: &[u8]) -> Result<Artifact, JobError> {
    Ok(Artifact::Custom(bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_as_str() {
        assert_eq!(Backend::Pickle.to_string(), "Pickle");
        assert_eq!(Backend::Onnx.to_string(), "Onnx");
        assert_eq!(Backend::Custom.to_string(), "Custom");
    }

    #[test]
    fn parse_round_trips() {
        for backend in [Backend::Pickle, Backend::Onnx, Backend::Custom] {
            assert_eq!(Backend::parse(backend.as_str()), Some(backend));
        }
        assert_eq!(Backend::parse("pickle"), None);
    }

    #[test]
    fn pickle_decode_accepts_proto_marker() {
        let payload = [0x80u8, 0x05, 0x95, 0x01];
        let artifact = Backend::Pickle.decode(&payload).unwrap();
        assert_eq!(artifact.backend(), Backend::Pickle);
        assert_eq!(artifact.bytes(), payload);
    }

    #[test]
    fn pickle_decode_rejects_unmarked_bytes() {
        let err = Backend::Pickle.decode(b"plain text").unwrap_err();
        assert!(err.to_string().contains("pickle"));
    }

    #[test]
    fn pickle_decode_rejects_empty() {
        assert!(Backend::Pickle.decode(b"").is_err());
    }

    #[test]
    fn onnx_decode_rejects_empty() {
        assert!(Backend::Onnx.decode(b"").is_err());
        assert!(Backend::Onnx.decode(&[0x08, 0x07]).is_ok());
    }

    #[test]
    fn custom_decode_is_passthrough() {
        let artifact = Backend::Custom.decode(b"").unwrap();
        assert_eq!(artifact, Artifact::Custom(vec![]));
        let artifact = Backend::Custom.decode(b"anything").unwrap();
        assert_eq!(artifact.bytes(), b"anything");
    }

    #[test]
    fn artifact_backend_tags_match() {
        assert_eq!(Artifact::Pickle(vec![0x80]).backend(), Backend::Pickle);
        assert_eq!(Artifact::Onnx(vec![1]).backend(), Backend::Onnx);
        assert_eq!(Artifact::Custom(vec![]).backend(), Backend::Custom);
    }
}
