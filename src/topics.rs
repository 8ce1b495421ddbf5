//! Event signature parsing and topic filter encoding.
//!
//! An event signature is given in its full textual form, e.g.
//! `Transfer(address indexed from, address indexed to, uint256 value)`.
//! Topic 0 of a matching log is the keccak-256 hash of the *canonical*
//! signature (names and `indexed` markers stripped, integer widths expanded).
//! Filter values for the remaining topic slots align with the indexed
//! parameters only; a missing value is a wildcard.

use alloy::primitives::{B256, U256, keccak256};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::chain::parse_address;
use crate::error::{Error, ErrorCode, Result};

static SIGNATURE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*$").expect("event signature regex")
});

static PARAM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9\[\]]+)(?:\s+(indexed))?(?:\s+([A-Za-z_][A-Za-z0-9_]*))?\s*$")
        .expect("event parameter regex")
});

/// One declared event parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventParam {
    /// Canonical solidity type, e.g. `uint256`.
    pub ty: String,
    pub indexed: bool,
    pub name: Option<String>,
}

/// A parsed event signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSignature {
    name: String,
    params: Vec<EventParam>,
    canonical: String,
    topic0: B256,
}

/// A filter value for one indexed topic slot.
///
/// The encoding follows the value, mirroring how callers hand loosely typed
/// filters to the monitor: strings shaped like an address are padded, any
/// other string is hashed, raw 32-byte values pass through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventArg {
    /// `0x…` address string or arbitrary text.
    Str(String),
    /// Dynamic byte content, hashed like solidity hashes indexed `bytes`.
    Bytes(Vec<u8>),
    /// Unsigned integer of any width.
    Uint(U256),
    /// Signed integer, encoded two's-complement.
    Int(i64),
    /// A ready 32-byte topic.
    Hash(B256),
}

impl EventSignature {
    /// Parse the full textual form.
    pub fn parse(signature: &str) -> Result<Self> {
        let captures = SIGNATURE_REGEX.captures(signature).ok_or_else(|| {
            Error::new(
                ErrorCode::InvalidEventSignature,
                format!("malformed event signature {signature:?}"),
            )
        })?;
        let name = captures[1].to_owned();
        let body = captures[2].trim();

        let mut params = Vec::new();
        if !body.is_empty() {
            for raw in body.split(',') {
                let captures = PARAM_REGEX.captures(raw).ok_or_else(|| {
                    Error::new(
                        ErrorCode::InvalidEventSignature,
                        format!("malformed event parameter {raw:?} in {signature:?}"),
                    )
                })?;
                params.push(EventParam {
                    ty: canonical_type(&captures[1]),
                    indexed: captures.get(2).is_some(),
                    name: captures.get(3).map(|m| m.as_str().to_owned()),
                });
            }
        }

        let canonical = format!(
            "{name}({})",
            params.iter().map(|p| p.ty.as_str()).collect::<Vec<_>>().join(",")
        );
        let topic0 = keccak256(canonical.as_bytes());
        Ok(Self {
            name,
            params,
            canonical,
            topic0,
        })
    }

    /// Event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters in order.
    pub fn params(&self) -> &[EventParam] {
        &self.params
    }

    /// Canonical signature string, e.g. `Transfer(address,address,uint256)`.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// keccak-256 of the canonical signature.
    pub fn topic0(&self) -> B256 {
        self.topic0
    }

    /// Build the ragged topic filter for this event.
    ///
    /// `args` aligns with the *indexed* parameters only; `None` entries (and
    /// missing trailing entries) are wildcards. Supplying more values than
    /// there are indexed parameters is [`ErrorCode::InvalidEventArgs`].
    pub fn topic_filter(&self, args: &[Option<EventArg>]) -> Result<Vec<Option<Vec<B256>>>> {
        let indexed: Vec<&EventParam> = self.params.iter().filter(|p| p.indexed).collect();
        if args.len() > indexed.len() {
            return Err(Error::new(
                ErrorCode::InvalidEventArgs,
                format!(
                    "{} filter values supplied for {} indexed parameters of {}",
                    args.len(),
                    indexed.len(),
                    self.canonical
                ),
            ));
        }

        let mut filter: Vec<Option<Vec<B256>>> = vec![Some(vec![self.topic0])];
        for (position, arg) in args.iter().enumerate() {
            match arg {
                None => filter.push(None),
                Some(value) => {
                    let topic = encode_topic_value(indexed[position], position, value)?;
                    filter.push(Some(vec![topic]));
                }
            }
        }
        Ok(filter)
    }
}

fn canonical_type(raw: &str) -> String {
    match raw {
        "uint" => "uint256".to_owned(),
        "int" => "int256".to_owned(),
        other => other.to_owned(),
    }
}

/// Coerce one filter value into a 32-byte topic.
fn encode_topic_value(param: &EventParam, position: usize, value: &EventArg) -> Result<B256> {
    // Array- and tuple-typed indexed parameters cannot be matched from a
    // scalar filter value.
    if param.ty.contains('[') || param.ty.starts_with("tuple") {
        return Err(Error::new(
            ErrorCode::UnsupportedEventArgType,
            format!(
                "indexed parameter {position} of type {} cannot be used as a topic filter",
                param.ty
            ),
        )
        .with_detail("param_index", position as u64));
    }

    let topic = match value {
        EventArg::Str(s) if looks_like_address(s) => {
            let address = parse_address(s)?;
            B256::left_padding_from(address.as_slice())
        }
        EventArg::Str(s) => keccak256(s.as_bytes()),
        EventArg::Bytes(content) => keccak256(content),
        EventArg::Uint(value) => B256::from(value.to_be_bytes::<32>()),
        EventArg::Int(value) => B256::from(twos_complement(*value).to_be_bytes::<32>()),
        EventArg::Hash(hash) => *hash,
    };
    Ok(topic)
}

fn looks_like_address(s: &str) -> bool {
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn twos_complement(value: i64) -> U256 {
    if value >= 0 {
        U256::from(value as u64)
    } else {
        U256::MAX - U256::from(value.unsigned_abs() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::b256;

    const TRANSFER_FULL: &str = "Transfer(address indexed from, address indexed to, uint256 value)";

    #[test]
    fn canonical_form_strips_names_and_markers() {
        let sig = EventSignature::parse(TRANSFER_FULL).expect("signature");
        assert_eq!(sig.canonical(), "Transfer(address,address,uint256)");
        assert_eq!(sig.name(), "Transfer");
        assert_eq!(sig.params().len(), 3);
        assert!(sig.params()[0].indexed);
        assert!(!sig.params()[2].indexed);
    }

    #[test]
    fn transfer_topic0_matches_known_hash() {
        // keccak256("Transfer(address,address,uint256)")
        let sig = EventSignature::parse(TRANSFER_FULL).expect("signature");
        assert_eq!(
            sig.topic0(),
            b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
        );
    }

    #[test]
    fn integer_widths_expand() {
        let sig = EventSignature::parse("Minted(uint indexed id, int amount)").expect("signature");
        assert_eq!(sig.canonical(), "Minted(uint256,int256)");
    }

    #[test]
    fn parameterless_events_parse() {
        let sig = EventSignature::parse("Paused()").expect("signature");
        assert_eq!(sig.canonical(), "Paused()");
        let filter = sig.topic_filter(&[]).expect("filter");
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn malformed_signature_is_rejected() {
        for raw in ["Transfer", "Transfer(", "(address)", "Trans fer(address)"] {
            let err = EventSignature::parse(raw).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidEventSignature, "input {raw:?}");
        }
    }

    #[test]
    fn address_strings_are_left_padded() {
        let sig = EventSignature::parse(TRANSFER_FULL).expect("signature");
        let filter = sig
            .topic_filter(&[
                Some(EventArg::Str("0xd8da6bf26964af9d7eed9e03e53415d37aa96045".into())),
                None,
            ])
            .expect("filter");
        assert_eq!(filter.len(), 3);
        assert_eq!(
            filter[1].as_ref().expect("from slot")[0],
            b256!("0x000000000000000000000000d8da6bf26964af9d7eed9e03e53415d37aa96045")
        );
        assert!(filter[2].is_none());
    }

    #[test]
    fn non_address_strings_are_hashed() {
        let sig = EventSignature::parse("Named(string indexed name)").expect("signature");
        let filter = sig
            .topic_filter(&[Some(EventArg::Str("alice".into()))])
            .expect("filter");
        assert_eq!(filter[1].as_ref().expect("slot")[0], keccak256(b"alice"));
    }

    #[test]
    fn uint_values_are_big_endian_padded() {
        let sig = EventSignature::parse("Burned(uint256 indexed amount)").expect("signature");
        let filter = sig
            .topic_filter(&[Some(EventArg::Uint(U256::from(100u64)))])
            .expect("filter");
        assert_eq!(
            filter[1].as_ref().expect("slot")[0],
            b256!("0x0000000000000000000000000000000000000000000000000000000000000064")
        );
    }

    #[test]
    fn negative_int_is_twos_complement() {
        let sig = EventSignature::parse("Adjusted(int256 indexed delta)").expect("signature");
        let filter = sig
            .topic_filter(&[Some(EventArg::Int(-1))])
            .expect("filter");
        assert_eq!(
            filter[1].as_ref().expect("slot")[0],
            b256!("0xffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
        );
    }

    #[test]
    fn raw_hash_passes_through() {
        let topic = B256::repeat_byte(7);
        let sig = EventSignature::parse("Signed(bytes32 indexed digest)").expect("signature");
        let filter = sig
            .topic_filter(&[Some(EventArg::Hash(topic))])
            .expect("filter");
        assert_eq!(filter[1].as_ref().expect("slot")[0], topic);
    }

    #[test]
    fn bytes_content_is_hashed() {
        let sig = EventSignature::parse("Posted(bytes indexed payload)").expect("signature");
        let filter = sig
            .topic_filter(&[Some(EventArg::Bytes(vec![1, 2, 3]))])
            .expect("filter");
        assert_eq!(filter[1].as_ref().expect("slot")[0], keccak256([1, 2, 3]));
    }

    #[test]
    fn too_many_args_is_invalid() {
        let sig = EventSignature::parse(TRANSFER_FULL).expect("signature");
        let err = sig
            .topic_filter(&[
                Some(EventArg::Int(1)),
                Some(EventArg::Int(2)),
                Some(EventArg::Int(3)),
            ])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidEventArgs);
    }

    #[test]
    fn array_typed_indexed_param_is_unsupported() {
        let sig = EventSignature::parse("Batch(uint256[] indexed ids)").expect("signature");
        let err = sig
            .topic_filter(&[Some(EventArg::Uint(U256::from(1u64)))])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedEventArgType);
        assert_eq!(
            err.details().get("param_index").and_then(|v| v.as_u64()),
            Some(0)
        );
    }
}
