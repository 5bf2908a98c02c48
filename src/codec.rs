use serde::de::{Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Runs of consecutive pincodes shorter than this emit as singles.
pub const RUN_THRESHOLD: usize = 3;

/// An inclusive pincode range.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PinRange {
    pub s: u32,
    pub e: u32,
}

/// Compresses a pincode set into sorted ranges and singles.
///
/// Deduplicates and sorts, then collapses runs of consecutive values. A run
/// of length >= `threshold` becomes a range; shorter runs emit as singles.
pub fn compress(pincodes: &[u32], threshold: usize) -> (Vec<PinRange>, Vec<u32>) {
    let mut pins: Vec<u32> = pincodes.to_vec();
    pins.sort_unstable();
    pins.dedup();

    let threshold = threshold.max(2);
    let mut ranges = Vec::new();
    let mut singles = Vec::new();

    let mut idx = 0;
    while idx < pins.len() {
        // Extend the run of consecutive values.
        let mut end = idx;
        while end + 1 < pins.len() && pins[end + 1] == pins[end] + 1 {
            end += 1;
        }

        let run_len = end - idx + 1;
        if run_len >= threshold {
            ranges.push(PinRange {
                s: pins[idx],
                e: pins[end],
            });
        } else {
            singles.extend_from_slice(&pins[idx..=end]);
        }
        idx = end + 1;
    }

    (ranges, singles)
}

/// Expands ranges and singles back into the full pincode set. Inclusive.
pub fn expand(ranges: &[PinRange], singles: &[u32]) -> BTreeSet<u32> {
    let mut set = BTreeSet::new();
    for r in ranges {
        if r.s <= r.e {
            set.extend(r.s..=r.e);
        }
    }
    set.extend(singles.iter().copied());
    set
}

/// Deserializes a range array tolerating `{s, e}` objects and `[s, e]` pairs.
///
/// Non-numeric or malformed entries are ignored.
pub fn de_ranges<'de, D>(deserializer: D) -> Result<Vec<PinRange>, D::Error>
where
    D: Deserializer<'de>,
{
    struct RangesVisitor;

    impl<'de> Visitor<'de> for RangesVisitor {
        type Value = Vec<PinRange>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a sequence of {s, e} objects or [s, e] pairs")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut ranges = Vec::new();
            while let Some(v) = seq.next_element::<Value>()? {
                if let Some(r) = range_from_value(&v) {
                    ranges.push(r);
                }
            }
            Ok(ranges)
        }
    }

    deserializer.deserialize_seq(RangesVisitor)
}

fn range_from_value(v: &Value) -> Option<PinRange> {
    let as_u32 = |v: &Value| -> Option<u32> { v.as_u64().and_then(|n| u32::try_from(n).ok()) };
    match v {
        Value::Object(map) => Some(PinRange {
            s: as_u32(map.get("s")?)?,
            e: as_u32(map.get("e")?)?,
        }),
        Value::Array(items) if items.len() == 2 => Some(PinRange {
            s: as_u32(&items[0])?,
            e: as_u32(&items[1])?,
        }),
        _ => None,
    }
}

/// Deserializes a singles array, ignoring non-numeric entries.
pub fn de_singles<'de, D>(deserializer: D) -> Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Value> = Vec::deserialize(deserializer)?;
    Ok(raw
        .iter()
        .filter_map(|v| v.as_u64().and_then(|n| u32::try_from(n).ok()))
        .collect())
}
