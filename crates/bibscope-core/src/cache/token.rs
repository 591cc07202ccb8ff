//! Validity tokens and the checkers that mint and compare them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::CacheError;
use super::store::CacheValue;
use crate::models::Entries;

/// Freshness marker stored next to every cached value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ValidityToken {
    Always,
    Created(DateTime<Utc>),
    Digest(String),
    Version(String),
    All(Vec<ValidityToken>),
}

/// What a checker may look at when minting a fresh token.
#[derive(Debug, Clone, Copy)]
pub struct TokenContext<'a> {
    pub now: DateTime<Utc>,
    pub entries: Option<&'a Entries>,
}

impl<'a> TokenContext<'a> {
    pub fn new() -> Self {
        Self {
            now: Utc::now(),
            entries: None,
        }
    }

    pub fn with_entries(entries: &'a Entries) -> Self {
        Self {
            now: Utc::now(),
            entries: Some(entries),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

impl Default for TokenContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Mints validity tokens for cache writes and decides whether a stored token
/// still agrees with a freshly minted one.
pub trait TokenChecker: fmt::Debug + Send + Sync {
    fn new_token(
        &self,
        key: &str,
        value: &CacheValue,
        ctx: &TokenContext<'_>,
    ) -> Result<ValidityToken, CacheError>;

    fn is_valid(
        &self,
        _key: &str,
        stored: &ValidityToken,
        fresh: &ValidityToken,
    ) -> Result<bool, CacheError> {
        Ok(stored == fresh)
    }
}

/// Default checker: everything stays valid forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysValid;

impl TokenChecker for AlwaysValid {
    fn new_token(
        &self,
        _key: &str,
        _value: &CacheValue,
        _ctx: &TokenContext<'_>,
    ) -> Result<ValidityToken, CacheError> {
        Ok(ValidityToken::Always)
    }
}

/// Valid while `now - created < ttl`.
#[derive(Debug, Clone, Copy)]
pub struct DateChecker {
    ttl: Duration,
}

impl DateChecker {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn days(days: i64) -> Self {
        Self::new(Duration::days(days))
    }
}

impl TokenChecker for DateChecker {
    fn new_token(
        &self,
        _key: &str,
        _value: &CacheValue,
        ctx: &TokenContext<'_>,
    ) -> Result<ValidityToken, CacheError> {
        Ok(ValidityToken::Created(ctx.now))
    }

    fn is_valid(
        &self,
        _key: &str,
        stored: &ValidityToken,
        fresh: &ValidityToken,
    ) -> Result<bool, CacheError> {
        match (stored, fresh) {
            (ValidityToken::Created(created), ValidityToken::Created(now)) => {
                Ok(*now - *created < self.ttl)
            }
            _ => Err(CacheError::TokenMismatch),
        }
    }
}

/// Valid while the hash of selected fields of the entry named by the cache key
/// is unchanged.
#[derive(Debug, Clone, Default)]
pub struct EntryHashChecker {
    fields: Vec<String>,
    include_entry_type: bool,
    person_roles: Vec<String>,
}

impl EntryHashChecker {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(|f| f.into().to_lowercase()).collect(),
            ..Self::default()
        }
    }

    pub fn with_entry_type(mut self) -> Self {
        self.include_entry_type = true;
        self
    }

    pub fn with_person_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.person_roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

impl TokenChecker for EntryHashChecker {
    fn new_token(
        &self,
        key: &str,
        _value: &CacheValue,
        ctx: &TokenContext<'_>,
    ) -> Result<ValidityToken, CacheError> {
        let entry = ctx
            .entries
            .and_then(|entries| entries.get(key))
            .ok_or_else(|| CacheError::MissingEntry(key.to_string()))?;

        let mut hasher = blake3::Hasher::new();
        if self.include_entry_type {
            hasher.update(b"@type\0");
            hasher.update(entry.entry_type.as_bytes());
            hasher.update(b"\n");
        }
        for field in &self.fields {
            hasher.update(field.as_bytes());
            hasher.update(b"\0");
            hasher.update(entry.field(field).unwrap_or_default().as_bytes());
            hasher.update(b"\n");
        }
        for role in &self.person_roles {
            hasher.update(b"@");
            hasher.update(role.as_bytes());
            hasher.update(b"\0");
            for person in entry.persons(role) {
                hasher.update(person.to_bibtex().as_bytes());
                hasher.update(b"\x1f");
            }
            hasher.update(b"\n");
        }
        Ok(ValidityToken::Digest(hasher.finalize().to_hex().to_string()))
    }
}

/// Valid while the stored version equals the fixed one.
#[derive(Debug, Clone)]
pub struct VersionChecker {
    version: String,
}

impl VersionChecker {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl TokenChecker for VersionChecker {
    fn new_token(
        &self,
        _key: &str,
        _value: &CacheValue,
        _ctx: &TokenContext<'_>,
    ) -> Result<ValidityToken, CacheError> {
        Ok(ValidityToken::Version(self.version.clone()))
    }
}

/// Combines checkers with AND semantics: one failing sub-check invalidates.
#[derive(Debug, Clone, Default)]
pub struct AllOf {
    checkers: Vec<Arc<dyn TokenChecker>>,
}

impl AllOf {
    pub fn new(checkers: Vec<Arc<dyn TokenChecker>>) -> Self {
        Self { checkers }
    }

    pub fn and(mut self, checker: impl TokenChecker + 'static) -> Self {
        self.checkers.push(Arc::new(checker));
        self
    }
}

impl TokenChecker for AllOf {
    fn new_token(
        &self,
        key: &str,
        value: &CacheValue,
        ctx: &TokenContext<'_>,
    ) -> Result<ValidityToken, CacheError> {
        let tokens = self
            .checkers
            .iter()
            .map(|c| c.new_token(key, value, ctx))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ValidityToken::All(tokens))
    }

    fn is_valid(
        &self,
        key: &str,
        stored: &ValidityToken,
        fresh: &ValidityToken,
    ) -> Result<bool, CacheError> {
        let (ValidityToken::All(stored), ValidityToken::All(fresh)) = (stored, fresh) else {
            return Err(CacheError::TokenMismatch);
        };
        if stored.len() != self.checkers.len() || fresh.len() != self.checkers.len() {
            return Ok(false);
        }
        for ((checker, stored), fresh) in self.checkers.iter().zip(stored).zip(fresh) {
            if !checker.is_valid(key, stored, fresh)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Per-key overrides; keys without an override are always valid.
#[derive(Debug, Clone, Default)]
pub struct PerEntry {
    checkers: HashMap<String, Arc<dyn TokenChecker>>,
}

impl PerEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, checker: Arc<dyn TokenChecker>) {
        self.checkers.insert(key.into(), checker);
    }

    pub fn with(mut self, key: impl Into<String>, checker: impl TokenChecker + 'static) -> Self {
        self.set(key, Arc::new(checker));
        self
    }
}

impl TokenChecker for PerEntry {
    fn new_token(
        &self,
        key: &str,
        value: &CacheValue,
        ctx: &TokenContext<'_>,
    ) -> Result<ValidityToken, CacheError> {
        match self.checkers.get(key) {
            Some(checker) => checker.new_token(key, value, ctx),
            None => Ok(ValidityToken::Always),
        }
    }

    fn is_valid(
        &self,
        key: &str,
        stored: &ValidityToken,
        fresh: &ValidityToken,
    ) -> Result<bool, CacheError> {
        match self.checkers.get(key) {
            Some(checker) => checker.is_valid(key, stored, fresh),
            None => Ok(stored == fresh),
        }
    }
}

/// Mint a fresh token and compare; any error counts as invalid.
pub fn check(
    checker: &dyn TokenChecker,
    key: &str,
    value: &CacheValue,
    stored: Option<&ValidityToken>,
    ctx: &TokenContext<'_>,
) -> bool {
    let Some(stored) = stored else {
        return false;
    };
    let verdict = checker
        .new_token(key, value, ctx)
        .and_then(|fresh| checker.is_valid(key, stored, &fresh));
    match verdict {
        Ok(valid) => valid,
        Err(err) => {
            tracing::debug!(key, error = %err, "cache token check failed; treating as invalid");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Entry;

    fn leaf() -> CacheValue {
        CacheValue::Leaf(serde_json::json!(1))
    }

    #[derive(Debug)]
    struct Never;

    impl TokenChecker for Never {
        fn new_token(
            &self,
            _key: &str,
            _value: &CacheValue,
            _ctx: &TokenContext<'_>,
        ) -> Result<ValidityToken, CacheError> {
            Ok(ValidityToken::Always)
        }

        fn is_valid(
            &self,
            _key: &str,
            _stored: &ValidityToken,
            _fresh: &ValidityToken,
        ) -> Result<bool, CacheError> {
            Ok(false)
        }
    }

    #[test]
    fn date_checker_expires_after_ttl() {
        let checker = DateChecker::days(2);
        let created = Utc::now();
        let ctx = TokenContext::new().at(created);
        let token = checker.new_token("k", &leaf(), &ctx).unwrap();

        let one_day_later = TokenContext::new().at(created + Duration::days(1));
        assert!(check(&checker, "k", &leaf(), Some(&token), &one_day_later));

        let three_days_later = TokenContext::new().at(created + Duration::days(3));
        assert!(!check(&checker, "k", &leaf(), Some(&token), &three_days_later));
    }

    #[test]
    fn hash_checker_tracks_selected_fields_only() {
        let checker = EntryHashChecker::new(["doi"]).with_entry_type();
        let entries: Entries = [Entry::new("a", "article")
            .with_field("doi", "10.1/x")
            .with_field("title", "T")]
        .into_iter()
        .collect();
        let ctx = TokenContext::with_entries(&entries);
        let token = checker.new_token("a", &leaf(), &ctx).unwrap();

        let mut retitled = entries.clone();
        retitled.get_mut("a").unwrap().set_field("title", "Other");
        let ctx = TokenContext::with_entries(&retitled);
        assert!(check(&checker, "a", &leaf(), Some(&token), &ctx));

        let mut new_doi = entries.clone();
        new_doi.get_mut("a").unwrap().set_field("doi", "10.1/y");
        let ctx = TokenContext::with_entries(&new_doi);
        assert!(!check(&checker, "a", &leaf(), Some(&token), &ctx));
    }

    #[test]
    fn hash_checker_includes_person_roles() {
        let checker = EntryHashChecker::new(Vec::<String>::new()).with_person_roles(["author"]);
        let entries: Entries = [Entry::new("a", "article").with_field("author", "John Doe")]
            .into_iter()
            .collect();
        let token = checker
            .new_token("a", &leaf(), &TokenContext::with_entries(&entries))
            .unwrap();

        let mut renamed = entries.clone();
        renamed.get_mut("a").unwrap().set_field("author", "Jane Doe");
        let ctx = TokenContext::with_entries(&renamed);
        assert!(!check(&checker, "a", &leaf(), Some(&token), &ctx));
    }

    #[test]
    fn missing_entry_is_invalid_not_an_error() {
        let checker = EntryHashChecker::new(["doi"]);
        let entries = Entries::new();
        let ctx = TokenContext::with_entries(&entries);
        let stored = ValidityToken::Digest("abc".to_string());
        assert!(!check(&checker, "gone", &leaf(), Some(&stored), &ctx));
    }

    #[test]
    fn version_checker_compares_versions() {
        let old = VersionChecker::new("1")
            .new_token("k", &leaf(), &TokenContext::new())
            .unwrap();
        assert!(check(&VersionChecker::new("1"), "k", &leaf(), Some(&old), &TokenContext::new()));
        assert!(!check(&VersionChecker::new("2"), "k", &leaf(), Some(&old), &TokenContext::new()));
    }

    #[test]
    fn all_of_requires_every_checker() {
        let ctx = TokenContext::new();
        let passing = AllOf::default().and(VersionChecker::new("1")).and(AlwaysValid);
        let token = passing.new_token("k", &leaf(), &ctx).unwrap();
        assert!(check(&passing, "k", &leaf(), Some(&token), &ctx));

        let failing = AllOf::default().and(VersionChecker::new("1")).and(Never);
        let token = failing.new_token("k", &leaf(), &ctx).unwrap();
        assert!(!check(&failing, "k", &leaf(), Some(&token), &ctx));
    }

    #[test]
    fn per_entry_overrides_single_keys() {
        let ctx = TokenContext::new();
        let checker = PerEntry::new().with("special", Never);
        let token = checker.new_token("special", &leaf(), &ctx).unwrap();
        assert!(!check(&checker, "special", &leaf(), Some(&token), &ctx));

        let token = checker.new_token("plain", &leaf(), &ctx).unwrap();
        assert!(check(&checker, "plain", &leaf(), Some(&token), &ctx));
    }

    #[test]
    fn missing_stored_token_is_invalid() {
        assert!(!check(&AlwaysValid, "k", &leaf(), None, &TokenContext::new()));
    }
}
