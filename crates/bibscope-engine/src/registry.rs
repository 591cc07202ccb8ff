//! Filter packages and the registry that resolves and builds filters.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::document::FilterDecl;
use crate::error::{EngineError, Result};
use crate::filter::{FilterAction, FilterInstance};
use crate::options::{BoundArgs, FilterArgs, OptionSchema, parse_option_string};

/// Builds one kind of filter from bound options.
pub trait FilterFactory: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn action(&self) -> FilterAction;

    fn schema(&self) -> OptionSchema;

    /// A filter-specific option parser. `None` selects the generic one.
    fn parse_options(&self, _text: &str) -> Option<std::result::Result<FilterArgs, String>> {
        None
    }

    fn build(&self, args: &BoundArgs) -> anyhow::Result<FilterInstance>;
}

/// A named group of filters.
#[derive(Clone)]
pub struct FilterPackage {
    pub name: String,
    pub description: String,
    filters: Vec<Arc<dyn FilterFactory>>,
}

impl FilterPackage {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            filters: Vec::new(),
        }
    }

    pub fn with(mut self, factory: impl FilterFactory + 'static) -> Self {
        self.filters.push(Arc::new(factory));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn FilterFactory>> {
        self.filters.iter().find(|f| f.name() == name)
    }

    pub fn filters(&self) -> &[Arc<dyn FilterFactory>] {
        &self.filters
    }
}

/// A filter found by [`FilterRegistry::resolve`].
#[derive(Clone)]
pub struct ResolvedFilter {
    pub package: String,
    pub factory: Arc<dyn FilterFactory>,
}

/// Explicitly populated set of filter packages.
#[derive(Default)]
pub struct FilterRegistry {
    packages: Vec<FilterPackage>,
    /// Package search order for unqualified names; registration order if unset.
    search_order: Option<Vec<String>>,
    resolved: RefCell<HashMap<String, ResolvedFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package; a package with the same name is replaced.
    pub fn register(&mut self, package: FilterPackage) {
        self.resolved.borrow_mut().clear();
        match self.packages.iter_mut().find(|p| p.name == package.name) {
            Some(existing) => *existing = package,
            None => self.packages.push(package),
        }
    }

    /// Restrict and reorder the packages searched for unqualified names.
    pub fn set_package_order<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        let mut order = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if self.package(name).is_none() {
                return Err(EngineError::NoSuchFilterPackage(name.to_string()));
            }
            order.push(name.to_string());
        }
        self.resolved.borrow_mut().clear();
        self.search_order = Some(order);
        Ok(())
    }

    pub fn package(&self, name: &str) -> Option<&FilterPackage> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn packages(&self) -> &[FilterPackage] {
        &self.packages
    }

    fn search_packages(&self) -> Vec<&FilterPackage> {
        match &self.search_order {
            Some(order) => order.iter().filter_map(|name| self.package(name)).collect(),
            None => self.packages.iter().collect(),
        }
    }

    /// Find a filter by name. `package:name` looks only in that package;
    /// a bare name searches the packages in order and the first hit wins.
    pub fn resolve(&self, name: &str) -> Result<ResolvedFilter> {
        if let Some(hit) = self.resolved.borrow().get(name) {
            return Ok(hit.clone());
        }

        let resolved = match name.split_once(':') {
            Some((package_name, filter_name)) => {
                let package = self
                    .package(package_name)
                    .ok_or_else(|| EngineError::NoSuchFilterPackage(package_name.to_string()))?;
                let factory = package.get(filter_name).ok_or_else(|| EngineError::NoSuchFilter {
                    name: name.to_string(),
                    tried: vec![format!("package '{package_name}' has no filter '{filter_name}'")],
                })?;
                ResolvedFilter {
                    package: package.name.clone(),
                    factory: factory.clone(),
                }
            }
            None => {
                let mut tried = Vec::new();
                let mut found = None;
                for package in self.search_packages() {
                    match package.get(name) {
                        Some(factory) => {
                            found = Some(ResolvedFilter {
                                package: package.name.clone(),
                                factory: factory.clone(),
                            });
                            break;
                        }
                        None => tried.push(format!("not in package '{}'", package.name)),
                    }
                }
                if tried.is_empty() && found.is_none() {
                    tried.push("no filter packages registered".to_string());
                }
                found.ok_or_else(|| EngineError::NoSuchFilter {
                    name: name.to_string(),
                    tried,
                })?
            }
        };

        debug!(filter = name, package = %resolved.package, "resolved filter");
        self.resolved
            .borrow_mut()
            .insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Resolve, parse options, bind and build. Each stage fails with its own
    /// error kind.
    pub fn instantiate(&self, decl: &FilterDecl) -> Result<FilterInstance> {
        let resolved = self.resolve(&decl.name)?;
        let factory = &resolved.factory;
        let schema = factory.schema();

        let args = factory
            .parse_options(&decl.options)
            .unwrap_or_else(|| parse_option_string(&schema, &decl.options))
            .map_err(|message| EngineError::FilterOptions {
                filter: decl.name.clone(),
                message,
            })?;

        let bound = schema.bind(args).map_err(|message| EngineError::FilterBind {
            filter: decl.name.clone(),
            message,
        })?;

        let instance = factory
            .build(&bound)
            .map_err(|e| EngineError::FilterConstruction {
                filter: decl.name.clone(),
                message: format!("{e:#}"),
            })?;

        if instance.action() != factory.action() {
            return Err(EngineError::FilterConstruction {
                filter: decl.name.clone(),
                message: format!(
                    "declared as {} but built a {} filter",
                    factory.action(),
                    instance.action()
                ),
            });
        }
        Ok(instance)
    }

    /// Usage text for one filter.
    pub fn help(&self, name: &str) -> Result<String> {
        let resolved = self.resolve(name)?;
        let factory = &resolved.factory;
        let mut out = format!(
            "{}:{} ({})\n\n{}\n",
            resolved.package,
            factory.name(),
            factory.action(),
            factory.description().trim_end()
        );
        let usage = factory.schema().usage();
        if !usage.is_empty() {
            out.push_str("\nOptions:\n");
            out.push_str(&usage);
        }
        Ok(out)
    }

    /// `(package, filter)` pairs in package order.
    pub fn list(&self) -> Vec<(&str, &dyn FilterFactory)> {
        self.packages
            .iter()
            .flat_map(|p| p.filters.iter().map(move |f| (p.name.as_str(), f.as_ref())))
            .collect()
    }
}
