use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Mirror backend types
///
/// Defined in core because configuration selects it and the storage crate
/// reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorBackend {
    S3,
    Local,
}

impl FromStr for MirrorBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(MirrorBackend::S3),
            "local" => Ok(MirrorBackend::Local),
            _ => Err(anyhow::anyhow!("Invalid mirror backend: {}", s)),
        }
    }
}

impl Display for MirrorBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MirrorBackend::S3 => write!(f, "s3"),
            MirrorBackend::Local => write!(f, "local"),
        }
    }
}
