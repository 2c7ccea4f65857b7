use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{ArtifactSignature, Error, Program, Result};

pub const ARTIFACT_EXTENSION: &str = "gpa";
pub const FORMAT_VERSION: u32 = 1;
const MAGIC: &[u8; 8] = b"GPARTF\0\x01";
const HEADER_LEN: usize = 8 + 4;

/// Side record describing the entry point, readable without decoding or
/// running the program.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub format_version: u32,
    pub producer: String,
    pub function: String,
    pub entry_symbol: String,
    pub signature: ArtifactSignature,
    pub opt_level: u8,
}

impl ArtifactMetadata {
    pub fn num_inputs(&self) -> usize {
        self.signature.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.signature.outputs.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub metadata: ArtifactMetadata,
    pub program: Program,
}

impl CompiledArtifact {
    /// `magic | version:u32 | len:u64 metadata json | len:u64 program json`
    pub fn encode(&self) -> Result<Bytes> {
        let metadata = serde_json::to_vec(&self.metadata)?;
        let program = serde_json::to_vec(&self.program)?;
        let mut out = BytesMut::with_capacity(HEADER_LEN + 16 + metadata.len() + program.len());
        out.put_slice(MAGIC);
        out.put_u32_le(FORMAT_VERSION);
        out.put_u64_le(metadata.len() as u64);
        out.put_slice(&metadata);
        out.put_u64_le(program.len() as u64);
        out.put_slice(&program);
        Ok(out.freeze())
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        check_header(&mut buf)?;
        let metadata = take_section(&mut buf, "metadata")?;
        let metadata: ArtifactMetadata = serde_json::from_slice(metadata)?;
        let program = take_section(&mut buf, "program")?;
        let program: Program = serde_json::from_slice(program)?;
        if buf.has_remaining() {
            return Err(Error::InvalidArtifact(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }
        Ok(Self { metadata, program })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::decode(&bytes)
    }
}

/// Read only the header and metadata record of an artifact file.
pub fn read_metadata(path: &Path) -> Result<ArtifactMetadata> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut head = [0u8; HEADER_LEN + 8];
    reader.read_exact(&mut head).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            Error::InvalidArtifact("file too short for an artifact header".to_string())
        }
        _ => Error::Io(e),
    })?;
    let mut buf = &head[..];
    check_header(&mut buf)?;
    let len = section_len(buf.get_u64_le())?;
    let mut metadata = Vec::new();
    reader.take(len as u64).read_to_end(&mut metadata)?;
    if metadata.len() != len {
        return Err(Error::InvalidArtifact("truncated metadata".to_string()));
    }
    Ok(serde_json::from_slice(&metadata)?)
}

/// `base` with the artifact extension appended.
pub fn artifact_path(base: impl AsRef<Path>) -> PathBuf {
    let mut name = base.as_ref().as_os_str().to_owned();
    name.push(".");
    name.push(ARTIFACT_EXTENSION);
    PathBuf::from(name)
}

fn check_header(buf: &mut &[u8]) -> Result<()> {
    if buf.remaining() < HEADER_LEN || &buf[..MAGIC.len()] != MAGIC {
        return Err(Error::InvalidArtifact("bad magic".to_string()));
    }
    buf.advance(MAGIC.len());
    let version = buf.get_u32_le();
    if version != FORMAT_VERSION {
        return Err(Error::InvalidArtifact(format!(
            "format version {version}, expected {FORMAT_VERSION}"
        )));
    }
    Ok(())
}

fn section_len(raw: u64) -> Result<usize> {
    usize::try_from(raw).map_err(|_| Error::InvalidArtifact("section length overflows".to_string()))
}

fn take_section<'a>(buf: &mut &'a [u8], what: &str) -> Result<&'a [u8]> {
    if buf.remaining() < 8 {
        return Err(Error::InvalidArtifact(format!("missing {what} section")));
    }
    let len = section_len(buf.get_u64_le())?;
    if buf.remaining() < len {
        return Err(Error::InvalidArtifact(format!("truncated {what} section")));
    }
    let (section, rest) = buf.split_at(len);
    *buf = rest;
    Ok(section)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Export, Function, TensorSpec, TensorType};

    fn sample() -> CompiledArtifact {
        CompiledArtifact {
            metadata: ArtifactMetadata {
                format_version: FORMAT_VERSION,
                producer: "test".into(),
                function: "main_graph".into(),
                entry_symbol: "run_main_graph".into(),
                signature: ArtifactSignature {
                    inputs: vec![TensorSpec::new("x", TensorType::fixed(DType::I64, &[3]))],
                    outputs: vec![TensorSpec::new("y", TensorType::fixed(DType::I64, &[3]))],
                },
                opt_level: 0,
            },
            program: Program {
                functions: vec![Function {
                    name: "main_graph".into(),
                    num_slots: 1,
                    inputs: vec![0],
                    outputs: vec![0],
                    body: vec![],
                }],
                exports: vec![Export {
                    symbol: "run_main_graph".into(),
                    function: "main_graph".into(),
                }],
                constants: vec![],
            },
        }
    }

    #[test]
    fn metadata_is_readable_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact_path(dir.path().join("model"));
        assert_eq!(path.extension().unwrap(), ARTIFACT_EXTENSION);

        let artifact = sample();
        std::fs::write(&path, artifact.encode().unwrap()).unwrap();
        let metadata = read_metadata(&path).unwrap();
        assert_eq!(metadata, artifact.metadata);
        assert_eq!(metadata.num_inputs(), 1);
        assert_eq!(CompiledArtifact::read(&path).unwrap(), artifact);
    }

    #[test]
    fn rejects_foreign_and_truncated_files() {
        assert!(matches!(
            CompiledArtifact::decode(b"not an artifact at all"),
            Err(Error::InvalidArtifact(_))
        ));
        let bytes = sample().encode().unwrap();
        assert!(CompiledArtifact::decode(&bytes[..bytes.len() - 1]).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.gpa");
        std::fs::write(&path, &bytes[..10]).unwrap();
        assert!(matches!(
            read_metadata(&path),
            Err(Error::InvalidArtifact(_))
        ));
    }
}
