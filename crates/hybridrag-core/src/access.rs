//! Access control over chunk metadata.
//!
//! [`AccessFilter`] turns a [`Principal`] into a [`Predicate`] that the search
//! backends evaluate before scoring (pre-filter) and that the retriever
//! evaluates again on fused results (post-filter). Rules are checked in a fixed
//! order and the first one that matches decides:
//!
//! 1. principal listed in `denied_principals` → deny
//! 2. `visibility = public` → allow
//! 3. `allowed_groups` shares a group with the principal → allow
//! 4. `department` equals the principal's department → allow
//! 5. principal clearance ≥ `classification_level` (when present) → allow
//! 6. deny
//!
//! List fields (`denied_principals`, `allowed_groups`) are either a JSON array
//! of strings or a comma-separated string. Any metadata or principal that
//! cannot be evaluated denies access.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{meta_keys, ClearanceLevel, Meta, Principal};

/// Composable boolean function over chunk metadata.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&Meta) -> bool + Send + Sync>);

impl Predicate {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Meta) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn always() -> Self { Self::new(|_| true) }

    pub fn never() -> Self { Self::new(|_| false) }

    /// Matches when `key` is present with exactly `value`.
    pub fn metadata_eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        Self::new(move |m| m.get(&key).is_some_and(|v| *v == value))
    }

    /// Matches when every `(key, value)` pair matches. An empty map matches everything.
    pub fn all_eq(filters: &HashMap<String, String>) -> Self {
        let filters: Vec<(String, String)> = filters.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Self::new(move |m| filters.iter().all(|(k, v)| m.get(k).is_some_and(|x| x == v)))
    }

    #[must_use]
    pub fn and(self, other: Predicate) -> Self { Self::new(move |m| self.matches(m) && other.matches(m)) }

    #[must_use]
    pub fn or(self, other: Predicate) -> Self { Self::new(move |m| self.matches(m) || other.matches(m)) }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self { Self::new(move |m| !self.matches(m)) }

    pub fn matches(&self, meta: &Meta) -> bool { (self.0)(meta) }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Predicate(..)") }
}

/// The rule that decided an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRule {
    DeniedPrincipal,
    PublicVisibility,
    AllowedGroup,
    Department,
    Clearance,
    DefaultDeny,
    EvaluationError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub rule: AccessRule,
}

impl AccessDecision {
    fn allow(rule: AccessRule) -> Self { Self { allowed: true, rule } }
    fn deny(rule: AccessRule) -> Self { Self { allowed: false, rule } }
}

/// Which side of the search a predicate was built for; only used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessFilter;

impl AccessFilter {
    pub fn new() -> Self { Self }

    /// Predicate pushed down into the search backends.
    pub fn pre_filter_predicate(&self, principal: &Principal) -> Predicate { self.predicate(principal, FilterPhase::Pre) }

    /// Predicate re-evaluated on fused results against current metadata.
    pub fn post_filter_predicate(&self, principal: &Principal) -> Predicate { self.predicate(principal, FilterPhase::Post) }

    fn predicate(&self, principal: &Principal, phase: FilterPhase) -> Predicate {
        let filter = *self;
        let principal = Arc::new(principal.clone());
        Predicate::new(move |meta| {
            let decision = filter.evaluate_logged(&principal, meta, phase);
            decision.allowed
        })
    }

    /// Decide access, converting evaluation errors into a deny.
    pub fn evaluate(&self, principal: &Principal, meta: &Meta) -> AccessDecision {
        self.try_evaluate(principal, meta).unwrap_or(AccessDecision::deny(AccessRule::EvaluationError))
    }

    fn evaluate_logged(&self, principal: &Principal, meta: &Meta, phase: FilterPhase) -> AccessDecision {
        match self.try_evaluate(principal, meta) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(principal = %principal.id, ?phase, error = %e, "access check failed; denying");
                AccessDecision::deny(AccessRule::EvaluationError)
            }
        }
    }

    /// Decide access, surfacing malformed input as [`Error::FilterEvaluation`].
    pub fn try_evaluate(&self, principal: &Principal, meta: &Meta) -> Result<AccessDecision> {
        if principal.id.trim().is_empty() {
            return Err(Error::FilterEvaluation("principal has no id".into()));
        }
        let denied = list_values(meta, meta_keys::DENIED_PRINCIPALS)?;
        if denied.is_comma_separated() && principal.id.contains(',') {
            return Err(Error::FilterEvaluation(format!(
                "principal '{}' contains ',' and cannot be matched against a comma-separated deny list",
                principal.id
            )));
        }
        if denied.contains(&principal.id) {
            return Ok(AccessDecision::deny(AccessRule::DeniedPrincipal));
        }
        if is_public(meta) {
            return Ok(AccessDecision::allow(AccessRule::PublicVisibility));
        }
        if list_values(meta, meta_keys::ALLOWED_GROUPS)?.iter().any(|g| principal.groups.contains(g)) {
            return Ok(AccessDecision::allow(AccessRule::AllowedGroup));
        }
        let department = meta.get(meta_keys::DEPARTMENT).map_or("", |d| d.trim());
        if !department.is_empty() && department == principal.department.trim() {
            return Ok(AccessDecision::allow(AccessRule::Department));
        }
        if classification_level(meta)?.is_some_and(|level| principal.clearance_level >= level) {
            return Ok(AccessDecision::allow(AccessRule::Clearance));
        }
        Ok(AccessDecision::deny(AccessRule::DefaultDeny))
    }
}

/// Parsed value of a list-valued metadata field.
#[derive(Debug)]
enum ListValue {
    Absent,
    Json(Vec<String>),
    CommaSeparated(Vec<String>),
}

impl ListValue {
    fn items(&self) -> &[String] {
        match self {
            Self::Absent => &[],
            Self::Json(items) | Self::CommaSeparated(items) => items.as_slice(),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &str> { self.items().iter().map(String::as_str) }

    fn contains(&self, value: &str) -> bool { self.iter().any(|item| item == value) }

    fn is_comma_separated(&self) -> bool { matches!(self, Self::CommaSeparated(items) if !items.is_empty()) }
}

fn list_values(meta: &Meta, key: &str) -> Result<ListValue> {
    let Some(raw) = meta.get(key).map(|s| s.trim()) else { return Ok(ListValue::Absent) };
    if raw.starts_with('[') {
        let items: Vec<String> = serde_json::from_str(raw)
            .map_err(|e| Error::FilterEvaluation(format!("{key} is not a JSON array of strings: {e}")))?;
        return Ok(ListValue::Json(items.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()));
    }
    Ok(ListValue::CommaSeparated(raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()))
}

fn is_public(meta: &Meta) -> bool {
    let Some(raw) = meta.get(meta_keys::VISIBILITY) else { return false };
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("public") {
        return true;
    }
    if !matches!(raw.to_ascii_lowercase().as_str(), "" | "internal" | "restricted" | "private") {
        debug!(visibility = raw, "unrecognised visibility; treating as not public");
    }
    false
}

/// `None` when the chunk carries no classification; the clearance rule then never allows.
fn classification_level(meta: &Meta) -> Result<Option<ClearanceLevel>> {
    match meta.get(meta_keys::CLASSIFICATION_LEVEL).map(|s| s.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<u8>()
            .map(|level| Some(ClearanceLevel(level)))
            .map_err(|e| Error::FilterEvaluation(format!("classification_level '{raw}': {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> Meta { pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect() }

    fn alice() -> Principal { Principal::new("alice").with_groups(["eng"]).with_department("research").with_clearance(2) }

    #[test]
    fn denied_principal_beats_public() {
        let m = meta(&[("visibility", "public"), ("denied_principals", "bob, alice")]);
        let d = AccessFilter::new().evaluate(&alice(), &m);
        assert_eq!(d, AccessDecision { allowed: false, rule: AccessRule::DeniedPrincipal });
    }

    #[test]
    fn rules_fire_in_order() {
        let f = AccessFilter::new();
        let p = alice();
        assert_eq!(f.evaluate(&p, &meta(&[("visibility", "Public"), ("classification_level", "9")])).rule, AccessRule::PublicVisibility);
        assert_eq!(f.evaluate(&p, &meta(&[("allowed_groups", "ops,eng"), ("classification_level", "9")])).rule, AccessRule::AllowedGroup);
        assert_eq!(f.evaluate(&p, &meta(&[("department", "research"), ("classification_level", "9")])).rule, AccessRule::Department);
        assert_eq!(f.evaluate(&p, &meta(&[("classification_level", "2")])).rule, AccessRule::Clearance);
        assert_eq!(f.evaluate(&p, &meta(&[("classification_level", "3")])).rule, AccessRule::DefaultDeny);
    }

    #[test]
    fn low_clearance_is_denied() {
        let p = Principal::new("carol").with_clearance(1);
        let m = meta(&[("visibility", "internal"), ("department", "finance"), ("allowed_groups", "board"), ("classification_level", "3")]);
        assert!(!AccessFilter::new().evaluate(&p, &m).allowed);
    }

    #[test]
    fn unclassified_chunk_needs_another_grant() {
        let p = Principal::new("erin").with_clearance(9);
        assert_eq!(AccessFilter::new().evaluate(&p, &meta(&[("visibility", "internal")])).rule, AccessRule::DefaultDeny);
    }

    #[test]
    fn empty_department_never_matches() {
        let p = Principal::new("dave");
        let m = meta(&[("department", ""), ("classification_level", "1")]);
        assert!(!AccessFilter::new().evaluate(&p, &m).allowed);
    }

    #[test]
    fn malformed_metadata_fails_closed() {
        let f = AccessFilter::new();
        let p = alice();
        let bad_level = meta(&[("classification_level", "top-secret")]);
        assert_eq!(f.evaluate(&p, &bad_level), AccessDecision { allowed: false, rule: AccessRule::EvaluationError });
        assert!(matches!(f.try_evaluate(&p, &bad_level), Err(Error::FilterEvaluation(_))));
        let bad_list = meta(&[("visibility", "public"), ("denied_principals", "[\"alice\",")]);
        assert!(!f.pre_filter_predicate(&p).matches(&bad_list));
        assert!(!f.post_filter_predicate(&Principal::default()).matches(&meta(&[("visibility", "public")])));
    }

    #[test]
    fn unknown_visibility_falls_through_to_later_rules() {
        let f = AccessFilter::new();
        let bob = Principal::new("bob").with_department("finance");
        let m = meta(&[("visibility", "confidential"), ("department", "finance")]);
        assert_eq!(f.evaluate(&bob, &m), AccessDecision { allowed: true, rule: AccessRule::Department });
        let stranger = Principal::new("eve").with_department("sales");
        assert_eq!(f.evaluate(&stranger, &m), AccessDecision { allowed: false, rule: AccessRule::DefaultDeny });
    }

    #[test]
    fn comma_in_principal_id_never_bypasses_deny_list() {
        let f = AccessFilter::new();
        let ldap = Principal::new("cn=alice,ou=eng,dc=corp");
        let comma_list = meta(&[("visibility", "public"), ("denied_principals", "cn=alice,ou=eng,dc=corp")]);
        assert_eq!(f.evaluate(&ldap, &comma_list), AccessDecision { allowed: false, rule: AccessRule::EvaluationError });
        assert!(!f.pre_filter_predicate(&ldap).matches(&comma_list));

        let json_list = meta(&[("visibility", "public"), ("denied_principals", r#"["cn=alice,ou=eng,dc=corp", "bob"]"#)]);
        assert_eq!(f.evaluate(&ldap, &json_list), AccessDecision { allowed: false, rule: AccessRule::DeniedPrincipal });
        let other = Principal::new("cn=carol,ou=eng,dc=corp");
        assert_eq!(f.evaluate(&other, &json_list).rule, AccessRule::PublicVisibility);

        // no deny list at all: nothing to confuse the id with
        assert!(f.evaluate(&ldap, &meta(&[("visibility", "public")])).allowed);
    }

    #[test]
    fn json_group_lists() {
        let m = meta(&[("allowed_groups", r#"["ops", "eng"]"#)]);
        assert_eq!(AccessFilter::new().evaluate(&alice(), &m).rule, AccessRule::AllowedGroup);
    }

    #[test]
    fn predicate_combinators() {
        let m = meta(&[("lang", "en"), ("kind", "faq")]);
        assert!(Predicate::metadata_eq("lang", "en").and(Predicate::metadata_eq("kind", "faq")).matches(&m));
        assert!(!Predicate::metadata_eq("lang", "de").matches(&m));
        assert!(Predicate::metadata_eq("lang", "de").or(Predicate::always()).matches(&m));
        assert!(Predicate::never().not().matches(&m));
        assert!(Predicate::all_eq(&HashMap::new()).matches(&m));
        let wanted: HashMap<String, String> = [("lang".to_string(), "en".to_string())].into_iter().collect();
        assert!(Predicate::all_eq(&wanted).matches(&m));
    }
}
