use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Network identifier the indexer is pointed at.
///
/// Stellar operates several long-lived public networks plus arbitrary
/// operator-run standalone networks (local sandboxes, custom testnets);
/// `Custom` keeps the type total without needing a crate release for every
/// new passphrase an operator wants to index. Serialized as its plain
/// lowercase string form (not as an internally-tagged enum), matching how
/// the repository stores and compares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Futurenet,
    Custom(String),
}

impl Serialize for Network {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Network {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().expect("Network::from_str is infallible"))
    }
}

impl Network {
    pub fn as_str(&self) -> &str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Futurenet => "futurenet",
            Network::Custom(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "mainnet" => Network::Mainnet,
            "testnet" => Network::Testnet,
            "futurenet" => Network::Futurenet,
            other => Network::Custom(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_networks_case_insensitively() {
        assert_eq!("MainNet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("testnet".parse::<Network>().unwrap(), Network::Testnet);
        assert_eq!("FUTURENET".parse::<Network>().unwrap(), Network::Futurenet);
    }

    #[test]
    fn unknown_network_becomes_custom() {
        assert_eq!(
            "sandbox".parse::<Network>().unwrap(),
            Network::Custom("sandbox".to_string())
        );
    }

    #[test]
    fn display_round_trips_through_as_str() {
        assert_eq!(Network::Mainnet.to_string(), "mainnet");
        assert_eq!(Network::Custom("local".into()).to_string(), "local");
    }
}
