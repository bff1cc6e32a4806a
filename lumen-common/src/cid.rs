//! CID parsing, canonicalization, and variant expansion.
//!
//! A CID has a canonical v0 string form (`Qm…`, base58btc, dag-pb +
//! sha2-256 only) and a canonical v1 string form (`b…`, base32 lower).
//! Ownership bookkeeping must never depend on how a client spelled a CID,
//! so every DB join fans over [`expand_variants`].

use std::str::FromStr;

use cid::{Cid, Version};

/// The dag-pb multicodec, the only codec CIDv0 can express.
const DAG_PB: u64 = 0x70;
/// The sha2-256 multihash code.
const SHA2_256: u64 = 0x12;

/// Parse any CID string form, v0 or v1.
pub fn parse(s: &str) -> Option<Cid> {
    Cid::from_str(s).ok()
}

/// Whether the string is plausibly a CID at all. Cheap shape check first so
/// arbitrary search queries don't pay for a full parse.
pub fn is_cid_shaped(s: &str) -> bool {
    let looks_v0 = s.len() == 46 && s.starts_with("Qm");
    let looks_v1 = s.len() >= 10
        && s.starts_with('b')
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    (looks_v0 || looks_v1) && parse(s).is_some()
}

/// The canonical v1 string for any CID string, when it parses.
pub fn canonical_v1(s: &str) -> Option<String> {
    let c = parse(s)?;
    Some(to_v1(&c).to_string())
}

/// The canonical v0 string, defined only for dag-pb + sha2-256 CIDs.
pub fn canonical_v0(s: &str) -> Option<String> {
    let c = parse(s)?;
    to_v0(&c).map(|v0| v0.to_string())
}

/// Expand a CID string to all of its spellings: the original, the canonical
/// v1, and the canonical v0 when defined. Unparseable strings expand to
/// just themselves so lookups of malformed history still hit exact rows.
pub fn expand_variants(s: &str) -> Vec<String> {
    let mut variants = vec![s.to_owned()];
    if let Some(c) = parse(s) {
        for variant in
            [Some(to_v1(&c).to_string()), to_v0(&c).map(|v0| v0.to_string())]
                .into_iter()
                .flatten()
        {
            if !variants.contains(&variant) {
                variants.push(variant);
            }
        }
    }
    variants
}

fn to_v1(c: &Cid) -> Cid {
    match c.version() {
        Version::V1 => *c,
        Version::V0 => Cid::new_v1(c.codec(), *c.hash()),
    }
}

fn to_v0(c: &Cid) -> Option<Cid> {
    match c.version() {
        Version::V0 => Some(*c),
        Version::V1 => {
            if c.codec() != DAG_PB || c.hash().code() != SHA2_256 {
                return None;
            }
            Cid::new_v0(*c.hash()).ok()
        }
    }
}

#[cfg(test)]
mod test {
    use cid::multihash::Multihash;

    use super::*;

    fn sample_mh(fill: u8) -> Multihash<64> {
        Multihash::wrap(SHA2_256, &[fill; 32]).unwrap()
    }

    #[test]
    fn v0_v1_roundtrip() {
        let mh = sample_mh(0x42);
        let v0 = Cid::new_v0(mh).unwrap();
        let v1 = Cid::new_v1(DAG_PB, mh);

        let v0_str = v0.to_string();
        let v1_str = v1.to_string();
        assert!(v0_str.starts_with("Qm"));
        assert!(v1_str.starts_with('b'));

        // Either spelling canonicalizes to the other.
        assert_eq!(canonical_v1(&v0_str).unwrap(), v1_str);
        assert_eq!(canonical_v0(&v1_str).unwrap(), v0_str);

        // Expansion is spelling-independent (modulo which came first).
        let mut from_v0 = expand_variants(&v0_str);
        let mut from_v1 = expand_variants(&v1_str);
        from_v0.sort();
        from_v1.sort();
        assert_eq!(from_v0, from_v1);
        assert_eq!(from_v0.len(), 2);
    }

    #[test]
    fn non_dag_pb_has_no_v0() {
        // raw codec (0x55) can't be spelled as CIDv0
        let v1 = Cid::new_v1(0x55, sample_mh(0x01));
        let v1_str = v1.to_string();
        assert_eq!(canonical_v0(&v1_str), None);
        assert_eq!(expand_variants(&v1_str).len(), 1);
    }

    #[test]
    fn malformed_expands_to_itself() {
        assert_eq!(expand_variants("not-a-cid"), vec!["not-a-cid"]);
        assert!(!is_cid_shaped("not-a-cid"));
        assert!(!is_cid_shaped(""));
    }

    #[test]
    fn shape_check_matches_real_cids() {
        let v0 = Cid::new_v0(sample_mh(0x07)).unwrap().to_string();
        let v1 = Cid::new_v1(DAG_PB, sample_mh(0x07)).to_string();
        assert!(is_cid_shaped(&v0));
        assert!(is_cid_shaped(&v1));
    }
}
