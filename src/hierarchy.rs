//! Prefix arithmetic over variable-length sector codes.
//!
//! The hierarchy is implicit in the codes themselves: a code's ancestor at
//! depth `d` is its first `d` characters. Grouping is done with maps keyed by
//! truncated prefixes, one depth at a time.
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Shallowest depth of the sector hierarchy.
pub const MIN_DEPTH: usize = 2;

/// Ancestor of `code` at `depth`; codes shorter than `depth` are their own ancestor.
pub fn truncate_code(code: &str, depth: usize) -> &str {
    match code.char_indices().nth(depth) {
        Some((idx, _)) => &code[..idx],
        None => code,
    }
}

pub fn code_depth(code: &str) -> usize {
    code.chars().count()
}

/// Fraction of a unit amount each distinct code receives under a
/// digit-by-digit equal split.
///
/// The unit is first split equally across distinct depth-2 prefixes, then
/// each prefix's share equally across its distinct depth-3 prefixes, and so
/// on down to the longest code. Candidates sharing a partial prefix therefore
/// split their branch's share between them rather than each taking a full
/// flat share.
pub fn equal_shares<'a, I>(codes: I) -> HashMap<String, f64>
where
    I: IntoIterator<Item = &'a str>,
{
    let distinct: BTreeSet<&str> = codes.into_iter().collect();
    let max_depth = distinct.iter().map(|c| code_depth(c)).max().unwrap_or(0);

    // prefix -> (share, members)
    let mut partitions: BTreeMap<&str, (f64, Vec<&str>)> = BTreeMap::new();
    partitions.insert("", (1.0, distinct.into_iter().collect()));

    for depth in MIN_DEPTH..=max_depth.max(MIN_DEPTH) {
        let mut next: BTreeMap<&str, (f64, Vec<&str>)> = BTreeMap::new();
        for (_, (share, members)) in partitions {
            let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for code in members {
                children
                    .entry(truncate_code(code, depth))
                    .or_default()
                    .push(code);
            }
            let child_share = share / children.len() as f64;
            for (prefix, members) in children {
                next.insert(prefix, (child_share, members));
            }
        }
        partitions = next;
    }

    partitions
        .into_values()
        .flat_map(|(share, members)| members.into_iter().map(move |c| (c.to_string(), share)))
        .collect()
}
