//! Modification engine
//!
//! Turns a stored packet plus a list of [`ModificationRule`]s into the
//! request that is actually dispatched. Every rule is compiled before any
//! edit is applied, so a bad rule anywhere in the list leaves nothing half
//! done.

use regex::{bytes, Regex};

use crate::error::{PacketError, PacketResult};
use crate::models::{HeaderPolicy, HttpMethod, ModificationRule, PacketRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Set,
    Add,
    Remove,
    Replace,
    RegexReplace,
}

impl Operation {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "set" => Some(Operation::Set),
            "add" => Some(Operation::Add),
            "remove" => Some(Operation::Remove),
            "replace" => Some(Operation::Replace),
            "regex_replace" => Some(Operation::RegexReplace),
            _ => None,
        }
    }
}

/// A rule after validation
#[derive(Debug)]
enum Edit {
    SetHeader { name: String, value: String },
    AddHeader { name: String, value: String },
    RemoveHeader { name: String },
    SetUrl(String),
    ReplaceInUrl { pattern: String, value: String },
    RegexInUrl { regex: Regex, value: String },
    SetBody(Vec<u8>),
    AppendBody(Vec<u8>),
    RemoveBody,
    ReplaceInBody { pattern: Vec<u8>, value: Vec<u8> },
    RegexInBody { regex: bytes::Regex, value: Vec<u8> },
    SetMethod(HttpMethod),
}

/// Apply `rules` in order to a copy of `source`.
///
/// The source record is never touched. An empty rule list returns a copy
/// identical to the source.
pub fn apply(
    source: &PacketRecord,
    rules: &[ModificationRule],
    policy: HeaderPolicy,
) -> PacketResult<PacketRecord> {
    let edits = rules
        .iter()
        .enumerate()
        .map(|(index, rule)| compile(index, rule))
        .collect::<PacketResult<Vec<_>>>()?;

    let mut packet = source.clone();
    for edit in edits {
        apply_edit(&mut packet, edit, policy);
    }
    Ok(packet)
}

fn compile(index: usize, rule: &ModificationRule) -> PacketResult<Edit> {
    let operation = Operation::parse(&rule.operation).ok_or_else(|| {
        PacketError::invalid_rule(index, format!("unknown operation '{}'", rule.operation))
    })?;
    let target = rule.target.trim();

    let value = || {
        rule.value.clone().ok_or_else(|| {
            PacketError::invalid_rule(index, format!("'{}' requires a value", rule.operation))
        })
    };
    let pattern = || match rule.pattern.as_deref() {
        Some(p) if !p.is_empty() => Ok(p.to_string()),
        _ => Err(PacketError::invalid_rule(
            index,
            format!("'{}' requires a non-empty pattern", op_name(operation)),
        )),
    };
    let bad_regex =
        |e: regex::Error| PacketError::invalid_rule(index, format!("invalid pattern: {e}"));

    if let Some(name) = header_target(target) {
        let name = name.trim();
        if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(PacketError::invalid_rule(
                index,
                format!("invalid header name '{name}'"),
            ));
        }
        let name = name.to_string();
        return match operation {
            Operation::Set => Ok(Edit::SetHeader {
                name,
                value: header_value(index, value()?)?,
            }),
            Operation::Add => Ok(Edit::AddHeader {
                name,
                value: header_value(index, value()?)?,
            }),
            Operation::Remove => Ok(Edit::RemoveHeader { name }),
            op @ (Operation::Replace | Operation::RegexReplace) => Err(
                PacketError::invalid_rule(
                    index,
                    format!("'{}' is not supported for headers", op_name(op)),
                ),
            ),
        };
    }

    match (target.to_ascii_lowercase().as_str(), operation) {
        ("url", Operation::Set) => {
            let url = value()?;
            if url.trim().is_empty() {
                return Err(PacketError::invalid_rule(index, "url must not be empty"));
            }
            Ok(Edit::SetUrl(url))
        }
        ("url", Operation::Replace) => Ok(Edit::ReplaceInUrl {
            pattern: pattern()?,
            value: value()?,
        }),
        ("url", Operation::RegexReplace) => Ok(Edit::RegexInUrl {
            regex: Regex::new(&pattern()?).map_err(bad_regex)?,
            value: value()?,
        }),
        ("url", op) => Err(PacketError::invalid_rule(
            index,
            format!("'{}' is not supported for url", op_name(op)),
        )),
        ("body", Operation::Set) => Ok(Edit::SetBody(value()?.into_bytes())),
        ("body", Operation::Add) => Ok(Edit::AppendBody(value()?.into_bytes())),
        ("body", Operation::Remove) => Ok(Edit::RemoveBody),
        ("body", Operation::Replace) => Ok(Edit::ReplaceInBody {
            pattern: pattern()?.into_bytes(),
            value: value()?.into_bytes(),
        }),
        ("body", Operation::RegexReplace) => Ok(Edit::RegexInBody {
            regex: bytes::Regex::new(&pattern()?).map_err(bad_regex)?,
            value: value()?.into_bytes(),
        }),
        ("method", Operation::Set) => {
            let method = value()?
                .parse::<HttpMethod>()
                .map_err(|e| PacketError::invalid_rule(index, e))?;
            Ok(Edit::SetMethod(method))
        }
        ("method", op) => Err(PacketError::invalid_rule(
            index,
            format!("'{}' is not supported for method", op_name(op)),
        )),
        _ => Err(PacketError::invalid_rule(
            index,
            format!("unknown target '{}'", rule.target),
        )),
    }
}

fn header_target(target: &str) -> Option<&str> {
    let (prefix, name) = target.split_once(':')?;
    prefix.eq_ignore_ascii_case("header").then_some(name)
}

fn header_value(index: usize, value: String) -> PacketResult<String> {
    if http::HeaderValue::from_str(&value).is_err() {
        return Err(PacketError::invalid_rule(
            index,
            "header value contains forbidden characters",
        ));
    }
    Ok(value)
}

fn op_name(op: Operation) -> &'static str {
    match op {
        Operation::Set => "set",
        Operation::Add => "add",
        Operation::Remove => "remove",
        Operation::Replace => "replace",
        Operation::RegexReplace => "regex_replace",
    }
}

fn apply_edit(packet: &mut PacketRecord, edit: Edit, policy: HeaderPolicy) {
    match edit {
        Edit::SetHeader { name, value } => set_header(packet, &name, &value),
        Edit::AddHeader { name, value } => match policy {
            HeaderPolicy::AllowDuplicates => packet.headers.append(name, value),
            HeaderPolicy::ReplaceExisting => set_header(packet, &name, &value),
        },
        Edit::RemoveHeader { name } => {
            packet.headers.remove_all(&name);
        }
        Edit::SetUrl(url) => packet.url = url,
        Edit::ReplaceInUrl { pattern, value } => {
            packet.url = packet.url.replace(&pattern, &value);
        }
        Edit::RegexInUrl { regex, value } => {
            packet.url = regex.replace_all(&packet.url, value.as_str()).into_owned();
        }
        Edit::SetBody(body) => packet.body = Some(body),
        Edit::AppendBody(extra) => packet.body.get_or_insert_with(Vec::new).extend(extra),
        Edit::RemoveBody => packet.body = None,
        Edit::ReplaceInBody { pattern, value } => {
            if let Some(body) = packet.body.as_mut() {
                *body = replace_bytes(body, &pattern, &value);
            }
        }
        Edit::RegexInBody { regex, value } => {
            if let Some(body) = packet.body.as_mut() {
                *body = regex.replace_all(body.as_slice(), value.as_slice()).into_owned();
            }
        }
        Edit::SetMethod(method) => packet.method = method,
    }
}

/// `set` overwrites the first entry in place and drops any other entries of
/// the same name, or appends when the header is absent.
fn set_header(packet: &mut PacketRecord, name: &str, value: &str) {
    if packet.headers.replace_first(name, value) {
        packet.headers.dedup_name(name);
    } else {
        packet.headers.append(name, value);
    }
}

fn replace_bytes(haystack: &[u8], pattern: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(pattern) {
            out.extend_from_slice(value);
            i += pattern.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PacketDraft;

    fn source() -> PacketRecord {
        PacketDraft::request(HttpMethod::Get, "https://example.com/api/test?user=alice")
            .with_header("Host", "example.com")
            .with_header("X-Trace", "one")
            .with_header("x-trace", "two")
            .with_body("user=alice&role=guest")
            .into_record(1)
    }

    #[test]
    fn empty_rule_list_is_identity() {
        let src = source();
        let out = apply(&src, &[], HeaderPolicy::default()).expect("apply ok");
        assert_eq!(out, src);
    }

    #[test]
    fn set_header_overwrites_and_collapses_duplicates() {
        let src = source();
        let out = apply(
            &src,
            &[ModificationRule::set_header("X-Trace", "three")],
            HeaderPolicy::default(),
        )
        .expect("apply ok");
        assert_eq!(out.headers.get_all("x-trace"), vec!["three"]);
        // Source untouched.
        assert_eq!(src.headers.get_all("x-trace"), vec!["one", "two"]);
    }

    #[test]
    fn set_header_appends_when_absent() {
        let out = apply(
            &source(),
            &[ModificationRule::set_header("X-Test", "1")],
            HeaderPolicy::default(),
        )
        .expect("apply ok");
        assert_eq!(out.headers.get("X-Test"), Some("1"));
        assert_eq!(out.headers.len(), 4);
    }

    #[test]
    fn add_header_follows_policy() {
        let rule = [ModificationRule::add_header("X-Trace", "extra")];

        let replaced = apply(&source(), &rule, HeaderPolicy::ReplaceExisting).expect("apply ok");
        assert_eq!(replaced.headers.get_all("x-trace"), vec!["extra"]);

        let appended = apply(&source(), &rule, HeaderPolicy::AllowDuplicates).expect("apply ok");
        assert_eq!(
            appended.headers.get_all("x-trace"),
            vec!["one", "two", "extra"]
        );
    }

    #[test]
    fn add_then_remove_leaves_no_header() {
        let out = apply(
            &source(),
            &[
                ModificationRule::add_header("X-Debug", "1"),
                ModificationRule::remove_header("x-debug"),
            ],
            HeaderPolicy::AllowDuplicates,
        )
        .expect("apply ok");
        assert!(!out.headers.contains("X-Debug"));
    }

    #[test]
    fn rules_apply_in_order() {
        let out = apply(
            &source(),
            &[
                ModificationRule::set_header("X-Order", "first"),
                ModificationRule::set_header("X-Order", "second"),
            ],
            HeaderPolicy::default(),
        )
        .expect("apply ok");
        assert_eq!(out.headers.get_all("x-order"), vec!["second"]);
    }

    #[test]
    fn url_body_and_method_edits() {
        let out = apply(
            &source(),
            &[
                ModificationRule::new("url", "replace")
                    .with_pattern("alice")
                    .with_value("bob"),
                ModificationRule::new("body", "replace")
                    .with_pattern("guest")
                    .with_value("admin"),
                ModificationRule::new("body", "add").with_value("&debug=1"),
                ModificationRule::new("method", "set").with_value("post"),
            ],
            HeaderPolicy::default(),
        )
        .expect("apply ok");
        assert_eq!(out.url, "https://example.com/api/test?user=bob");
        assert_eq!(
            out.body.as_deref(),
            Some(&b"user=alice&role=admin&debug=1"[..])
        );
        assert_eq!(out.method, HttpMethod::Post);

        let cleared = apply(
            &source(),
            &[ModificationRule::new("body", "remove")],
            HeaderPolicy::default(),
        )
        .expect("apply ok");
        assert!(cleared.body.is_none());
    }

    #[test]
    fn invalid_rule_reports_its_index_and_applies_nothing() {
        let rules = [
            ModificationRule::set_header("X-Ok", "1"),
            ModificationRule::new("cookie", "set").with_value("a=b"),
        ];
        let err = apply(&source(), &rules, HeaderPolicy::default()).expect_err("bad target");
        assert!(matches!(err, PacketError::InvalidRule { index: 1, .. }));
    }

    #[test]
    fn malformed_rules_are_rejected() {
        let cases = [
            ModificationRule::new("header:X-A", "set"),
            ModificationRule::new("header:Bad Name", "set").with_value("1"),
            ModificationRule::new("header:X-A", "replace").with_value("1"),
            ModificationRule::new("header:X-A", "set").with_value("line\nbreak"),
            ModificationRule::new("url", "remove"),
            ModificationRule::new("url", "replace").with_value("x"),
            ModificationRule::new("method", "set").with_value("BREW"),
            ModificationRule::new("body", "upsert").with_value("x"),
            ModificationRule::new("header:X-A", "regex_replace")
                .with_pattern("a")
                .with_value("b"),
            ModificationRule::new("body", "regex_replace").with_value("x"),
            ModificationRule::new("method", "regex_replace")
                .with_pattern("GET")
                .with_value("POST"),
        ];
        for rule in cases {
            let err = apply(&source(), std::slice::from_ref(&rule), HeaderPolicy::default())
                .expect_err("rule should be rejected");
            assert!(
                matches!(err, PacketError::InvalidRule { index: 0, .. }),
                "unexpected result for {rule:?}: {err}"
            );
        }
    }

    #[test]
    fn replace_bytes_handles_repeats_and_misses() {
        assert_eq!(replace_bytes(b"aXbXc", b"X", b"--"), b"a--b--c".to_vec());
        assert_eq!(replace_bytes(b"abc", b"zz", b"y"), b"abc".to_vec());
    }

    #[test]
    fn regex_replace_rewrites_url_and_body_with_captures() {
        let out = apply(
            &source(),
            &[
                ModificationRule::new("url", "regex_replace")
                    .with_pattern(r"user=(\w+)")
                    .with_value("user=${1}_2"),
                ModificationRule::new("body", "regex_replace")
                    .with_pattern(r"role=[a-z]+")
                    .with_value("role=admin"),
            ],
            HeaderPolicy::default(),
        )
        .expect("apply ok");
        assert_eq!(out.url, "https://example.com/api/test?user=alice_2");
        assert_eq!(out.body.as_deref(), Some(&b"user=alice&role=admin"[..]));

        // Literal replace leaves regex syntax alone.
        let literal = apply(
            &source(),
            &[ModificationRule::new("url", "replace")
                .with_pattern(r"\w+")
                .with_value("x")],
            HeaderPolicy::default(),
        )
        .expect("apply ok");
        assert_eq!(literal.url, source().url);
    }

    #[test]
    fn bad_regex_is_reported_before_any_edit() {
        let rules = [
            ModificationRule::set_header("X-Ok", "1"),
            ModificationRule::new("body", "regex_replace")
                .with_pattern("(unclosed")
                .with_value("x"),
        ];
        let err = apply(&source(), &rules, HeaderPolicy::default()).expect_err("bad pattern");
        match err {
            PacketError::InvalidRule { index, reason } => {
                assert_eq!(index, 1);
                assert!(reason.contains("invalid pattern"), "reason: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
