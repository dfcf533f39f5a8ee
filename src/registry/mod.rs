//! Typed resource registry: named resource classes, availability arbitration,
//! and the live claims table.
//!
//! Every claim is a `(type, value, owner)` record keyed `type:value`; the
//! registry guarantees that a value is handed out to at most one owner at a
//! time. Counter types scan an inclusive integer range behind a persistent
//! cursor that never rewinds, so released values are not reused while the
//! cursor sits above them.

mod check;

pub use check::{AvailabilityCheck, ShellCheck};

use crate::error::{Error, Result};
use crate::state::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Schema for a class of scarce local resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceType {
    pub name: String,
    /// Shell expression with a `${value}` placeholder; exit code inverted
    /// (non-zero = available). Empty = always available.
    #[serde(default)]
    pub check: String,
    /// Counter types auto-allocate out of `[start, end]`.
    #[serde(default)]
    pub counter: bool,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
}

/// One live claim: this `(type, value)` pair belongs to `owner`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub rtype: String,
    pub value: String,
    pub owner: String,
}

/// Claims-table key for a `(type, value)` pair.
pub fn claim_key(rtype: &str, value: &str) -> String {
    format!("{}:{}", rtype, value)
}

/// The built-in resource types, seeded into any state that lacks them.
pub fn default_resource_types() -> HashMap<String, ResourceType> {
    let mut types = HashMap::new();
    let mut add = |name: &str, check: &str, counter: bool, start: i64, end: i64| {
        types.insert(
            name.to_string(),
            ResourceType {
                name: name.to_string(),
                check: check.to_string(),
                counter,
                start,
                end,
            },
        );
    };

    // nc exits 0 when the port accepts a connection, i.e. when it is taken.
    add("tcpport", "nc -z localhost ${value}", true, 3000, 9999);
    add("vncport", "nc -z localhost ${value}", true, 5900, 5999);
    add("serialport", "nc -z localhost ${value}", true, 9600, 9699);
    add("dbfile", "test -f ${value}", false, 0, 0);
    add("socket", "test -S ${value}", false, 0, 0);
    add("datadir", "", false, 0, 0);
    add("workdir", "", false, 0, 0);

    types
}

/// Resolve a resource-map key back to its type name.
///
/// Instances holding several values of one counter type store the extras
/// under indexed keys (`tcpport1`, `tcpport2`, ...). A key that is not a
/// known type but whose digit-stripped prefix is one resolves to the prefix.
pub fn base_type_name(types: &HashMap<String, ResourceType>, key: &str) -> String {
    if types.contains_key(key) {
        return key.to_string();
    }
    let stripped = key.trim_end_matches(|c: char| c.is_ascii_digit());
    if !stripped.is_empty() && stripped != key && types.contains_key(stripped) {
        return stripped.to_string();
    }
    key.to_string()
}

/// Allocate a value of `rtype` for `owner`, claiming it under the type name.
pub async fn allocate(
    store: &Store,
    check: &dyn AvailabilityCheck,
    rtype: &str,
    requested: &str,
    owner: &str,
) -> Result<String> {
    allocate_as(store, check, rtype, requested, owner, rtype).await
}

/// Allocate a value of `rtype` for `owner`, claiming it under `alias`.
///
/// `alias` differs from the type name only when an instance holds several
/// values of the same counter type and stores the extras under indexed keys.
///
/// The availability check runs outside the state mutex (it can take hundreds
/// of milliseconds); the claim is inserted under the mutex afterwards. Two
/// concurrent allocations may probe the same candidate, but only one wins the
/// claim — the loser re-enters the scan.
pub async fn allocate_as(
    store: &Store,
    check: &dyn AvailabilityCheck,
    rtype: &str,
    requested: &str,
    owner: &str,
    alias: &str,
) -> Result<String> {
    let rt = store
        .resource_type(rtype)
        .ok_or_else(|| Error::UnknownResourceType(rtype.to_string()))?;

    if rt.counter && requested.is_empty() {
        allocate_counter(store, check, &rt, owner, alias).await
    } else {
        allocate_explicit(store, check, &rt, requested, owner, alias).await
    }
}

async fn allocate_counter(
    store: &Store,
    check: &dyn AvailabilityCheck,
    rt: &ResourceType,
    owner: &str,
    alias: &str,
) -> Result<String> {
    loop {
        // Pick the first candidate at or above the cursor that no claim
        // already covers. The cursor itself only moves forward.
        let candidate = store.with(|doc| {
            let cursor = doc.counters.get(&rt.name).copied().unwrap_or(0);
            let mut v = cursor.max(rt.start);
            while v <= rt.end && value_claimed(doc, &rt.name, &v.to_string()) {
                v += 1;
            }
            (v <= rt.end).then_some(v)
        });

        let Some(v) = candidate else {
            return Err(Error::NoAvailable {
                rtype: rt.name.clone(),
                start: rt.start,
                end: rt.end,
            });
        };
        let value = v.to_string();

        if check.is_available(rt, &value).await {
            let claimed = store.with_mut(|doc| {
                if value_claimed(doc, &rt.name, &value) {
                    return false;
                }
                doc.resources.insert(
                    claim_key(alias, &value),
                    Resource {
                        rtype: alias.to_string(),
                        value: value.clone(),
                        owner: owner.to_string(),
                    },
                );
                let cursor = doc.counters.entry(rt.name.clone()).or_insert(0);
                *cursor = (*cursor).max(v + 1);
                true
            });
            if claimed {
                tracing::debug!("allocated {} {} for {}", rt.name, value, owner);
                return Ok(value);
            }
            // Lost the race to a concurrent allocation; scan again.
        } else {
            // Occupied by something outside the claims table; move the
            // cursor past it so the scan does not revisit.
            store.with_mut(|doc| {
                let cursor = doc.counters.entry(rt.name.clone()).or_insert(0);
                *cursor = (*cursor).max(v + 1);
            });
        }
    }
}

async fn allocate_explicit(
    store: &Store,
    check: &dyn AvailabilityCheck,
    rt: &ResourceType,
    requested: &str,
    owner: &str,
    alias: &str,
) -> Result<String> {
    if requested.is_empty() {
        return Err(Error::ExplicitValueRequired(rt.name.clone()));
    }

    let not_available = || Error::NotAvailable {
        rtype: rt.name.clone(),
        value: requested.to_string(),
    };

    if store.with(|doc| value_claimed(doc, &rt.name, requested)) {
        return Err(not_available());
    }

    if !check.is_available(rt, requested).await {
        return Err(not_available());
    }

    let claimed = store.with_mut(|doc| {
        if value_claimed(doc, &rt.name, requested) {
            return false;
        }
        doc.resources.insert(
            claim_key(alias, requested),
            Resource {
                rtype: alias.to_string(),
                value: requested.to_string(),
                owner: owner.to_string(),
            },
        );
        true
    });

    if !claimed {
        return Err(not_available());
    }
    tracing::debug!("claimed {} {} for {}", rt.name, requested, owner);
    Ok(requested.to_string())
}

/// Owner of the live claim covering this `(type, value)` pair, if any.
/// Indexed aliases (`tcpport1`) count against their base type.
pub fn claim_owner(doc: &crate::state::StateDoc, rtype: &str, value: &str) -> Option<String> {
    doc.resources
        .values()
        .find(|r| r.value == value && base_type_name(&doc.types, &r.rtype) == rtype)
        .map(|r| r.owner.clone())
}

fn value_claimed(doc: &crate::state::StateDoc, rtype: &str, value: &str) -> bool {
    claim_owner(doc, rtype, value).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_key_format() {
        assert_eq!(claim_key("tcpport", "3000"), "tcpport:3000");
    }

    #[test]
    fn builtin_types_present() {
        let types = default_resource_types();
        assert!(types["tcpport"].counter);
        assert_eq!(types["tcpport"].start, 3000);
        assert_eq!(types["tcpport"].end, 9999);
        assert_eq!(types["vncport"].start, 5900);
        assert_eq!(types["serialport"].start, 9600);
        assert!(!types["dbfile"].counter);
        assert!(types["datadir"].check.is_empty());
        assert!(types["workdir"].check.is_empty());
        assert_eq!(types["socket"].check, "test -S ${value}");
    }

    #[test]
    fn base_type_resolution() {
        let types = default_resource_types();
        assert_eq!(base_type_name(&types, "tcpport"), "tcpport");
        assert_eq!(base_type_name(&types, "tcpport1"), "tcpport");
        assert_eq!(base_type_name(&types, "tcpport12"), "tcpport");
        assert_eq!(base_type_name(&types, "workdir"), "workdir");
        // Unknown keys resolve to themselves.
        assert_eq!(base_type_name(&types, "gpu0"), "gpu0");
    }
}
