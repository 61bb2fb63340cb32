// src/history/spec.rs

//! Transaction id specifications
//!
//! A spec is `TERM` or `TERM..TERM` where `TERM` is a transaction id, `last`
//! or `last-N`. Symbolic terms are encoded as negative sentinels (`last` is
//! -1, `last-N` is -(N+1)) and resolved against the ascending id list, which
//! is fetched at most once per batch of specs.

use super::TransactionHistory;
use crate::db::models::TransactionRecord;
use crate::error::{Error, Result};

/// A parsed spec; `second` is 0 unless the spec is a range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSpec {
    pub first: i64,
    pub second: i64,
}

impl IdSpec {
    /// Parse `TERM` or `TERM..TERM`
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = || Error::InvalidIdRange {
            spec: spec.to_string(),
        };

        match spec.split_once("..") {
            Some((first, second)) => Ok(Self {
                first: parse_term(first).ok_or_else(invalid)?,
                second: parse_term(second).ok_or_else(invalid)?,
            }),
            None => Ok(Self {
                first: parse_term(spec).ok_or_else(invalid)?,
                second: 0,
            }),
        }
    }

    fn needs_id_list(&self) -> bool {
        self.first < 0 || self.second < 0
    }
}

fn parse_number(s: &str) -> Option<i64> {
    // A sign would collide with the sentinel encoding
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_term(term: &str) -> Option<i64> {
    if term == "last" {
        return Some(-1);
    }
    if let Some(offset) = term.strip_prefix("last-") {
        return parse_number(offset).and_then(|n| n.checked_add(1)).map(|n| -n);
    }
    parse_number(term)
}

/// Map a sentinel onto the ascending id list; out-of-range sentinels become 0
fn resolve_term(term: i64, ids: &[i64]) -> i64 {
    if term >= 0 {
        return term;
    }
    let back = term.unsigned_abs() as usize;
    if back > ids.len() {
        0
    } else {
        ids[ids.len() - back]
    }
}

/// Resolve a batch of specs into records
///
/// Ranges come first, in spec order, followed by all single ids, fetched
/// together and kept in spec order. A malformed spec fails the whole batch.
pub fn resolve_transaction_specs(
    history: &TransactionHistory<'_>,
    specs: &[String],
) -> Result<Vec<TransactionRecord>> {
    let parsed = specs
        .iter()
        .map(|spec| IdSpec::parse(spec))
        .collect::<Result<Vec<_>>>()?;

    let ids = if parsed.iter().any(IdSpec::needs_id_list) {
        history.list_transaction_ids()?
    } else {
        Vec::new()
    };

    let mut result = Vec::new();
    let mut singles = Vec::new();

    for spec in parsed {
        let first = resolve_term(spec.first, &ids);
        let second = resolve_term(spec.second, &ids);

        if second != 0 {
            let (start, end) = if first > second {
                (second, first)
            } else {
                (first, second)
            };
            result.extend(history.list_transactions_range(start, end)?);
        } else {
            singles.push(first);
        }
    }

    result.extend(history.list_transactions(&singles)?);
    Ok(result)
}

/// The one record `specs` name, with its items loaded
///
/// Specs naming the same record more than once count it once.
pub fn select_one(history: &TransactionHistory<'_>, specs: &[String]) -> Result<TransactionRecord> {
    let mut records = resolve_transaction_specs(history, specs)?;
    records.sort_by_key(|t| t.id);
    records.dedup_by_key(|t| t.id);

    match records.len() {
        0 => Err(Error::NoMatchingTransaction),
        1 => {
            history.load_items(&mut records)?;
            Ok(records.remove(0))
        }
        _ => Err(Error::AmbiguousTransaction),
    }
}
