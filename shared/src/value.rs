use serde::{Deserialize, Serialize};

/// A generic, JSON-friendly decoding of a Soroban `ScVal`.
///
/// The extractor's recursive decode (spec §4.5, §9) never fails: every
/// value kind it cannot interpret becomes `Unknown(type_name)` rather than
/// an error, so a persisted event or storage value is always representable
/// even as the wire format gains new `ScVal` cases this crate doesn't know
/// about yet. Integers wider than 64 bits are kept as both structured
/// limb parts and a hex string — converting to `f64` would silently lose
/// precision for anything on-chain treats as exact (token amounts, nonces).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodedValue {
    Void,
    Bool(bool),
    /// `width` is the bit width (32/64/128/256); `parts` are big-endian
    /// 64-bit limbs (most significant first) of the two's-complement
    /// representation; `hex` is the same value as a `0x`-prefixed string.
    Int {
        width: u16,
        signed: bool,
        parts: Vec<u64>,
        hex: String,
    },
    Symbol(String),
    String(String),
    /// Raw bytes, hex-encoded.
    Bytes(String),
    /// Canonical strkey textual form of a contract or account address.
    Address(String),
    Vec(Vec<DecodedValue>),
    Map(Vec<(DecodedValue, DecodedValue)>),
    /// A value kind this crate does not decode further, named by its
    /// `ScVal` variant so the row is still auditable.
    Unknown(String),
}

impl DecodedValue {
    pub fn int_u32(v: u32) -> Self {
        DecodedValue::Int {
            width: 32,
            signed: false,
            parts: vec![v as u64],
            hex: format!("0x{:x}", v),
        }
    }

    pub fn int_i32(v: i32) -> Self {
        DecodedValue::Int {
            width: 32,
            signed: true,
            parts: vec![v as i64 as u64],
            hex: format!("0x{:x}", v as i64 as u64),
        }
    }

    pub fn int_u64(v: u64) -> Self {
        DecodedValue::Int {
            width: 64,
            signed: false,
            parts: vec![v],
            hex: format!("0x{:x}", v),
        }
    }

    pub fn int_i64(v: i64) -> Self {
        DecodedValue::Int {
            width: 64,
            signed: true,
            parts: vec![v as u64],
            hex: format!("0x{:x}", v as u64),
        }
    }

    pub fn int_u128(v: u128) -> Self {
        let hi = (v >> 64) as u64;
        let lo = v as u64;
        DecodedValue::Int {
            width: 128,
            signed: false,
            parts: vec![hi, lo],
            hex: format!("0x{:x}", v),
        }
    }

    pub fn int_i128(v: i128) -> Self {
        let bits = v as u128;
        let hi = (bits >> 64) as u64;
        let lo = bits as u64;
        DecodedValue::Int {
            width: 128,
            signed: true,
            parts: vec![hi, lo],
            hex: format!("0x{:x}", bits),
        }
    }

    pub fn int_u256_parts(parts: [u64; 4]) -> Self {
        let hex = parts
            .iter()
            .map(|p| format!("{:016x}", p))
            .collect::<Vec<_>>()
            .join("");
        DecodedValue::Int {
            width: 256,
            signed: false,
            parts: parts.to_vec(),
            hex: format!("0x{}", hex),
        }
    }

    pub fn int_i256_parts(parts: [u64; 4]) -> Self {
        let hex = parts
            .iter()
            .map(|p| format!("{:016x}", p))
            .collect::<Vec<_>>()
            .join("");
        DecodedValue::Int {
            width: 256,
            signed: true,
            parts: parts.to_vec(),
            hex: format!("0x{}", hex),
        }
    }

    /// The type-name string used for the first-topic event-type match
    /// (spec §4.4.3) when the value is a `Symbol`; `None` otherwise.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            DecodedValue::Symbol(s) => Some(s.as_str()),
            _ => None,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u128_round_trips_through_limbs() {
        let v: u128 = 0x0102030405060708_090a0b0c0d0e0f10;
        match DecodedValue::int_u128(v) {
            DecodedValue::Int { parts, hex, width, .. } => {
                assert_eq!(width, 128);
                assert_eq!(parts.len(), 2);
                let reassembled = ((parts[0] as u128) << 64) | parts[1] as u128;
                assert_eq!(reassembled, v);
                assert_eq!(hex, format!("0x{:x}", v));
            }
            _ => panic!("expected Int"),
        }
    }

    #[test]
    fn symbol_extraction() {
        let v = DecodedValue::Symbol("tw_init".to_string());
        assert_eq!(v.as_symbol(), Some("tw_init"));
        assert_eq!(DecodedValue::Void.as_symbol(), None);
    }

    #[test]
    fn serializes_with_kind_tag() {
        let v = DecodedValue::Bool(true);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "bool");
    }
}
