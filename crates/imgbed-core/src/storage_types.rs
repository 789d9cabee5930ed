use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Storage backend kinds
///
/// The closed set of backend kinds the gateway knows how to talk to. It's
/// defined in core because it is persisted on both backends and storage
/// locations (denormalized, so delete and health logic never needs a join).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Local,
    ObjectStore,
    ThirdPartyHost,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::ObjectStore => "object-store",
            BackendKind::ThirdPartyHost => "third-party-host",
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "oss"/"s3" and "sm.ms"/"smms" are the tags older rows were written with.
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "object-store" | "object_store" | "oss" | "s3" => Ok(BackendKind::ObjectStore),
            "third-party-host" | "third_party_host" | "sm.ms" | "smms" => {
                Ok(BackendKind::ThirdPartyHost)
            }
            _ => Err(anyhow::anyhow!("Invalid backend kind: {}", s)),
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_and_legacy_tags() {
        assert_eq!("local".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert_eq!(
            "object-store".parse::<BackendKind>().unwrap(),
            BackendKind::ObjectStore
        );
        assert_eq!("OSS".parse::<BackendKind>().unwrap(), BackendKind::ObjectStore);
        assert_eq!(
            "sm.ms".parse::<BackendKind>().unwrap(),
            BackendKind::ThirdPartyHost
        );
        assert!("ftp".parse::<BackendKind>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for kind in [
            BackendKind::Local,
            BackendKind::ObjectStore,
            BackendKind::ThirdPartyHost,
        ] {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }
}
