//! Build manifest generation.
//!
//! [`ManifestGenerator`] turns an [`ExecutionContext`] into the `Cargo.toml`
//! for a submission. It is a pure transform with no failure mode:
//!
//! - Dependencies resolve against [`TRUSTED_DEPENDENCIES`]; any other name
//!   is left out of the manifest and later fails to resolve at compile time.
//! - Feature flags that are not valid feature names are left out the same way.
//! - Both `dev` and `release` profiles are always written; the optimization
//!   level decides the `release` settings and which one the build uses.

use std::collections::{BTreeMap, BTreeSet};

use toml::{Table, Value};

use coderun_common::{ExecutionContext, OptimizationLevel, ToolchainConfig};

/// Dependencies a submission may use, with the exact version each resolves to.
///
/// Sorted by name.
pub const TRUSTED_DEPENDENCIES: &[(&str, &str)] = &[
    ("anyhow", "1.0.86"),
    ("itertools", "0.13.0"),
    ("lazy_static", "1.5.0"),
    ("num", "0.4.3"),
    ("once_cell", "1.19.0"),
    ("rand", "0.8.5"),
    ("regex", "1.10.5"),
    ("serde", "1.0.204"),
    ("serde_json", "1.0.120"),
    ("thiserror", "1.0.63"),
];

/// Look up the pinned version of a trusted dependency.
pub fn pinned_version(name: &str) -> Option<&'static str> {
    trusted_entry(name).map(|(_, version)| version)
}

fn trusted_entry(name: &str) -> Option<(&'static str, &'static str)> {
    TRUSTED_DEPENDENCIES
        .binary_search_by(|(candidate, _)| (*candidate).cmp(name))
        .ok()
        .map(|index| TRUSTED_DEPENDENCIES[index])
}

/// The `opt-level` value of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    Numeric(u8),
    Size,
    SizeMin,
}

impl OptLevel {
    fn to_toml(self) -> Value {
        match self {
            Self::Numeric(level) => Value::Integer(i64::from(level)),
            Self::Size => Value::String("s".into()),
            Self::SizeMin => Value::String("z".into()),
        }
    }
}

/// Settings written into one `[profile.*]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSettings {
    pub opt_level: OptLevel,
    pub debug: bool,
    pub lto: bool,
}

impl ProfileSettings {
    /// The unoptimized profile used for `debug`.
    pub const DEV: Self = Self {
        opt_level: OptLevel::Numeric(0),
        debug: true,
        lto: false,
    };

    /// Settings for the given level.
    pub fn for_level(level: OptimizationLevel) -> Self {
        let (opt_level, lto) = match level {
            OptimizationLevel::Debug => return Self::DEV,
            OptimizationLevel::O1 => (OptLevel::Numeric(1), false),
            OptimizationLevel::O2 => (OptLevel::Numeric(2), false),
            OptimizationLevel::O3 => (OptLevel::Numeric(3), true),
            OptimizationLevel::Size => (OptLevel::Size, true),
            OptimizationLevel::SizeMin => (OptLevel::SizeMin, true),
        };

        Self {
            opt_level,
            debug: false,
            lto,
        }
    }

    fn to_toml(self) -> Value {
        let mut table = Table::new();
        table.insert("opt-level".into(), self.opt_level.to_toml());
        table.insert("debug".into(), Value::Boolean(self.debug));
        table.insert("lto".into(), Value::Boolean(self.lto));
        Value::Table(table)
    }
}

/// A generated manifest and what went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    text: String,
    dependencies: BTreeMap<&'static str, &'static str>,
    omitted_dependencies: Vec<String>,
    features: Vec<String>,
    omitted_features: Vec<String>,
}

impl Manifest {
    /// The manifest as TOML text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Resolved dependencies, name to pinned version.
    pub fn dependencies(&self) -> &BTreeMap<&'static str, &'static str> {
        &self.dependencies
    }

    /// Requested dependency names that are not in the trusted table.
    pub fn omitted_dependencies(&self) -> &[String] {
        &self.omitted_dependencies
    }

    /// Feature flags declared in the manifest, in request order.
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Requested feature flags that were left out.
    pub fn omitted_features(&self) -> &[String] {
        &self.omitted_features
    }
}

/// Renders `Cargo.toml` text for a submission.
#[derive(Debug, Clone)]
pub struct ManifestGenerator {
    package_name: String,
    edition: String,
}

impl ManifestGenerator {
    /// Create a generator for the given package identity.
    pub fn new(package_name: impl Into<String>, edition: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            edition: edition.into(),
        }
    }

    /// Create a generator from toolchain configuration.
    pub fn from_config(config: &ToolchainConfig) -> Self {
        Self::new(&config.package_name, &config.edition)
    }

    /// The package name, which is also the artifact's file name.
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Generate the manifest for `context`.
    pub fn generate(&self, context: &ExecutionContext) -> Manifest {
        let mut dependencies = BTreeMap::new();
        let mut omitted_dependencies = Vec::new();

        for name in context.allowed_dependencies() {
            match trusted_entry(name) {
                Some((trusted, version)) => {
                    dependencies.insert(trusted, version);
                }
                None => omitted_dependencies.push(name.clone()),
            }
        }

        let mut seen = BTreeSet::new();
        let mut features = Vec::new();
        let mut omitted_features = Vec::new();

        for feature in context.extra_features() {
            if !seen.insert(feature.as_str()) {
                continue;
            }
            let usable = is_valid_feature_name(feature)
                && feature != "default"
                && !dependencies.contains_key(feature.as_str());
            if usable {
                features.push(feature.clone());
            } else {
                omitted_features.push(feature.clone());
            }
        }

        let text = self.render(&dependencies, &features, context.optimization_level());

        Manifest {
            text,
            dependencies,
            omitted_dependencies,
            features,
            omitted_features,
        }
    }

    fn render(
        &self,
        dependencies: &BTreeMap<&'static str, &'static str>,
        features: &[String],
        level: OptimizationLevel,
    ) -> String {
        let mut package = Table::new();
        package.insert("name".into(), Value::String(self.package_name.clone()));
        package.insert("version".into(), Value::String("0.1.0".into()));
        package.insert("edition".into(), Value::String(self.edition.clone()));
        package.insert("publish".into(), Value::Boolean(false));

        let mut deps = Table::new();
        for (name, version) in dependencies {
            deps.insert((*name).to_string(), Value::String(format!("={version}")));
        }

        let mut feature_table = Table::new();
        feature_table.insert("default".into(), Value::Array(Vec::new()));
        for feature in features {
            feature_table.insert(feature.clone(), Value::Array(Vec::new()));
        }

        // `debug` still writes a release profile so both tables are always present.
        let release = match level {
            OptimizationLevel::Debug => ProfileSettings::for_level(OptimizationLevel::O3),
            optimized => ProfileSettings::for_level(optimized),
        };

        let mut profile = Table::new();
        profile.insert("dev".into(), ProfileSettings::DEV.to_toml());
        profile.insert("release".into(), release.to_toml());

        let mut root = Table::new();
        root.insert("package".into(), Value::Table(package));
        root.insert("dependencies".into(), Value::Table(deps));
        root.insert("features".into(), Value::Table(feature_table));
        root.insert("profile".into(), Value::Table(profile));

        root.to_string()
    }
}

/// Feature names: ASCII alphanumerics and `_`, then also `-`, `+`, `.`.
fn is_valid_feature_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    (first.is_ascii_alphanumeric() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.'))
}
