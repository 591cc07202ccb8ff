use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::CacheError;
use super::token::{AlwaysValid, TokenChecker, TokenContext, ValidityToken, check};

/// Bumped whenever the on-disk layout changes; other versions load as empty.
pub const CACHE_FORMAT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheValue {
    Leaf(serde_json::Value),
    Namespace(CacheNamespace),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSlot {
    pub value: CacheValue,
    /// `None` when minting the token failed; such slots never validate.
    pub token: Option<ValidityToken>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheNamespace {
    entries: IndexMap<String, CacheSlot>,
}

impl CacheNamespace {
    pub fn get(&self, key: &str) -> Option<&CacheValue> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    pub fn slot(&self, key: &str) -> Option<&CacheSlot> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn child(&self, key: &str) -> Option<&CacheNamespace> {
        match self.get(key) {
            Some(CacheValue::Namespace(ns)) => Some(ns),
            _ => None,
        }
    }
}

/// Path of a (possibly not yet existing) namespace inside a [`CacheStore`].
///
/// Holding a path never creates anything: the namespace is committed into its
/// parent by the first write below it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CachePath(Vec<String>);

impl CachePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for CachePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    format: u32,
    root: CacheNamespace,
}

/// Nested, persisted key-value store shared by all filters of one run.
#[derive(Debug, Default)]
pub struct CacheStore {
    root: CacheNamespace,
    checkers: HashMap<Vec<String>, Arc<dyn TokenChecker>>,
}

static EMPTY: Lazy<CacheNamespace> = Lazy::new(CacheNamespace::default);

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn clear(&mut self) {
        self.root = CacheNamespace::default();
    }

    /// Unchecked view of the namespace at `path`; a missing namespace reads
    /// as empty and is not created.
    pub fn namespace(&self, path: &CachePath) -> &CacheNamespace {
        let mut ns = &self.root;
        for segment in path.segments() {
            match ns.child(segment) {
                Some(child) => ns = child,
                None => return &EMPTY,
            }
        }
        ns
    }

    /// Value at `path/key`. Entries whose token no longer validates against
    /// the checker installed for their namespace read as absent, and so does
    /// anything below a stale namespace.
    pub fn get(&self, path: &CachePath, key: &str, ctx: &TokenContext<'_>) -> Option<&CacheValue> {
        let segments = path.segments();
        let mut ns = &self.root;
        for (depth, segment) in segments.iter().enumerate() {
            let slot = ns.slot(segment)?;
            if !self.is_fresh(&segments[..depth], segment, slot, ctx) {
                return None;
            }
            match &slot.value {
                CacheValue::Namespace(child) => ns = child,
                CacheValue::Leaf(_) => return None,
            }
        }
        let slot = ns.slot(key)?;
        if !self.is_fresh(segments, key, slot, ctx) {
            debug!(%path, key, "cached value is stale");
            return None;
        }
        Some(&slot.value)
    }

    /// Deserialize a fresh leaf; a value of the wrong shape reads as absent.
    pub fn get_as<T: DeserializeOwned>(
        &self,
        path: &CachePath,
        key: &str,
        ctx: &TokenContext<'_>,
    ) -> Option<T> {
        match self.get(path, key, ctx)? {
            CacheValue::Leaf(value) => match serde_json::from_value(value.clone()) {
                Ok(v) => Some(v),
                Err(err) => {
                    debug!(%path, key, error = %err, "cached value has unexpected shape");
                    None
                }
            },
            CacheValue::Namespace(_) => None,
        }
    }

    fn is_fresh(
        &self,
        parent: &[String],
        key: &str,
        slot: &CacheSlot,
        ctx: &TokenContext<'_>,
    ) -> bool {
        match self.checkers.get(parent) {
            Some(checker) => check(checker.as_ref(), key, &slot.value, slot.token.as_ref(), ctx),
            None => true,
        }
    }

    /// Install the token checker used for entries directly inside `path`.
    /// It applies to every later read; `validate` also prunes what it rejects.
    pub fn set_checker(&mut self, path: &CachePath, checker: Arc<dyn TokenChecker>) {
        self.checkers.insert(path.segments().to_vec(), checker);
    }

    fn checker_for(&self, segments: &[String]) -> Arc<dyn TokenChecker> {
        self.checkers
            .get(segments)
            .cloned()
            .unwrap_or_else(|| Arc::new(AlwaysValid))
    }

    /// Store `value` under `path/key`, creating missing namespaces along the way.
    pub fn set(
        &mut self,
        path: &CachePath,
        key: &str,
        value: impl Serialize,
        ctx: &TokenContext<'_>,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_value(value).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        self.store(path, key, CacheValue::Leaf(value), ctx);
        Ok(())
    }

    fn store(&mut self, path: &CachePath, key: &str, value: CacheValue, ctx: &TokenContext<'_>) {
        // Mint tokens for every namespace this write commits, outermost first.
        let mut commits = Vec::new();
        let mut ns = &self.root;
        for (depth, segment) in path.segments().iter().enumerate() {
            match ns.child(segment) {
                Some(child) => ns = child,
                None => {
                    for idx in depth..path.segments().len() {
                        let parent = &path.segments()[..idx];
                        let name = &path.segments()[idx];
                        let placeholder = CacheValue::Namespace(CacheNamespace::default());
                        commits.push(mint(&self.checker_for(parent), name, &placeholder, ctx));
                    }
                    break;
                }
            }
        }
        let token = mint(&self.checker_for(path.segments()), key, &value, ctx);

        let mut commits = commits.into_iter();
        let mut ns = &mut self.root;
        for segment in path.segments() {
            let exists = matches!(ns.get(segment), Some(CacheValue::Namespace(_)));
            if !exists {
                let token = commits.next().flatten();
                ns.entries.insert(
                    segment.clone(),
                    CacheSlot {
                        value: CacheValue::Namespace(CacheNamespace::default()),
                        token,
                    },
                );
            }
            let Some(CacheSlot {
                value: CacheValue::Namespace(child),
                ..
            }) = ns.entries.get_mut(segment)
            else {
                unreachable!("namespace inserted above");
            };
            ns = child;
        }
        ns.entries.insert(key.to_string(), CacheSlot { value, token });
    }

    pub fn remove(&mut self, path: &CachePath, key: &str) -> Option<CacheValue> {
        let mut ns = &mut self.root;
        for segment in path.segments() {
            match ns.entries.get_mut(segment) {
                Some(CacheSlot {
                    value: CacheValue::Namespace(child),
                    ..
                }) => ns = child,
                _ => return None,
            }
        }
        ns.entries.shift_remove(key).map(|slot| slot.value)
    }

    /// Drop every entry under `path` (recursively) whose token no longer
    /// validates. Returns the number of dropped entries.
    pub fn validate(&mut self, path: &CachePath, ctx: &TokenContext<'_>) -> usize {
        let Self { root, checkers } = self;
        let mut ns = root;
        for segment in path.segments() {
            match ns.entries.get_mut(segment) {
                Some(CacheSlot {
                    value: CacheValue::Namespace(child),
                    ..
                }) => ns = child,
                _ => return 0,
            }
        }
        let mut segments = path.segments().to_vec();
        let removed = validate_namespace(ns, &mut segments, checkers, ctx);
        if removed > 0 {
            info!(%path, removed, "invalidated stale cache entries");
        }
        removed
    }

    pub fn validate_all(&mut self, ctx: &TokenContext<'_>) -> usize {
        self.validate(&CachePath::root(), ctx)
    }

    // ─── Persistence ──────────────────────────────────────

    /// Load a cache file; a missing, unreadable or corrupt file yields an empty store.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(store) => {
                debug!(path = %path.display(), "loaded cache");
                store
            }
            Err(CacheError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cache file, starting empty");
                Self::new()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unusable cache file");
                Self::new()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self, CacheError> {
        let data = std::fs::read(path)?;
        let file: CacheFile =
            serde_json::from_slice(&data).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        if file.format != CACHE_FORMAT {
            return Err(CacheError::UnsupportedFormat(file.format));
        }
        Ok(Self {
            root: file.root,
            checkers: HashMap::new(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let file = CacheFile {
            format: CACHE_FORMAT,
            root: self.root.clone(),
        };
        let data = serde_json::to_vec(&file).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

fn mint(
    checker: &Arc<dyn TokenChecker>,
    key: &str,
    value: &CacheValue,
    ctx: &TokenContext<'_>,
) -> Option<ValidityToken> {
    match checker.new_token(key, value, ctx) {
        Ok(token) => Some(token),
        Err(err) => {
            debug!(key, error = %err, "could not mint cache token");
            None
        }
    }
}

fn validate_namespace(
    ns: &mut CacheNamespace,
    segments: &mut Vec<String>,
    checkers: &HashMap<Vec<String>, Arc<dyn TokenChecker>>,
    ctx: &TokenContext<'_>,
) -> usize {
    let checker = checkers.get(segments.as_slice()).cloned();
    let mut removed = 0;
    let mut stale = Vec::new();
    for (key, slot) in ns.entries.iter_mut() {
        if let CacheValue::Namespace(child) = &mut slot.value {
            segments.push(key.clone());
            removed += validate_namespace(child, segments, checkers, ctx);
            segments.pop();
        }
        if let Some(checker) = &checker
            && !check(checker.as_ref(), key, &slot.value, slot.token.as_ref(), ctx)
        {
            stale.push(key.clone());
        }
    }
    for key in stale {
        ns.entries.shift_remove(&key);
        removed += 1;
    }
    removed
}
