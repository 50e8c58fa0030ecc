use riskledger_config::{
    AutoExtendSpec, BucketSpec, KeyTemplate, MAX_DURATION_SECS, NotificationRule, PolicyTable,
    ProfileConfig, RiskLedgerConfig, check_thresholds,
};
use riskledger_core::{ExecutionContext, LedgerError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// A bucket spec with its key template parsed once.
#[derive(Debug, Clone)]
pub struct CompiledBucket {
    pub spec: BucketSpec,
    pub template: KeyTemplate,
}

/// An immutable, validated profile. Shared by every charge that names it.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub buckets: Vec<CompiledBucket>,
    pub policies: PolicyTable,
    pub auto_extend: Option<AutoExtendSpec>,
    pub notifications: Vec<NotificationRule>,
}

impl Profile {
    pub fn compile(name: &str, config: &ProfileConfig) -> Result<Self> {
        let mut buckets = Vec::with_capacity(config.buckets.len());
        for spec in &config.buckets {
            let template = KeyTemplate::parse(&spec.key).map_err(|e| {
                LedgerError::Configuration(format!("profile '{name}', bucket '{}': {e}", spec.name))
            })?;
            if let Some(field) = template.fields().find(|f| !ExecutionContext::is_known_field(f)) {
                return Err(LedgerError::Configuration(format!(
                    "profile '{name}', bucket '{}': unknown context field '{field}'",
                    spec.name
                )));
            }
            if spec.ttl_secs.is_some_and(|ttl| ttl > MAX_DURATION_SECS) {
                return Err(LedgerError::Configuration(format!(
                    "profile '{name}', bucket '{}': ttl_secs exceeds {MAX_DURATION_SECS}",
                    spec.name
                )));
            }
            check_thresholds(&spec.thresholds).map_err(|e| {
                LedgerError::Configuration(format!("profile '{name}', bucket '{}': {e}", spec.name))
            })?;
            if buckets.iter().any(|b: &CompiledBucket| b.spec.name == spec.name) {
                return Err(LedgerError::Configuration(format!(
                    "profile '{name}': duplicate bucket '{}'",
                    spec.name
                )));
            }
            if let Some(shared) = buckets
                .iter()
                .find(|b: &&CompiledBucket| b.spec.scope.prefix() == spec.scope.prefix() && b.spec.key == spec.key)
            {
                return Err(LedgerError::Configuration(format!(
                    "profile '{name}': buckets '{}' and '{}' resolve to the same {} key '{}'",
                    shared.spec.name,
                    spec.name,
                    spec.scope.prefix(),
                    spec.key
                )));
            }
            buckets.push(CompiledBucket {
                spec: spec.clone(),
                template,
            });
        }
        if let Some(ext) = &config.auto_extend
            && ext.window_secs > MAX_DURATION_SECS
        {
            return Err(LedgerError::Configuration(format!(
                "profile '{name}': auto_extend.window_secs exceeds {MAX_DURATION_SECS}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            buckets,
            policies: config.policies.clone(),
            auto_extend: config.auto_extend.clone(),
            notifications: config.notifications.clone(),
        })
    }

    pub fn bucket(&self, name: &str) -> Option<&CompiledBucket> {
        self.buckets.iter().find(|b| b.spec.name == name)
    }
}

/// Profiles by name, compiled once at startup.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, Arc<Profile>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RiskLedgerConfig) -> Result<Self> {
        let mut registry = Self::new();
        for (name, profile) in &config.profiles {
            registry.insert(Profile::compile(name, profile)?);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, profile: Profile) {
        self.profiles.insert(profile.name.clone(), Arc::new(profile));
    }

    pub fn get(&self, name: &str) -> Result<Arc<Profile>> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| LedgerError::Configuration(format!("unknown profile '{name}'")))
    }

    /// Profile names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
