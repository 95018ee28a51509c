// ABOUTME: Declarative policy tables for templates and operation timeouts
// ABOUTME: Static lookups with guaranteed fallbacks; no runtime computation

use std::time::Duration;

use crate::types::{NetworkPolicy, SandboxConfig, SandboxResources};

/// Per-template resource ceilings and egress policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDefaults {
    pub memory_mb: u32,
    pub cpu_cores: u32,
    pub disk_gb: u32,
    pub network_enabled: bool,
    pub allowed_domains: &'static [&'static str],
}

const BUILDER_DEFAULTS: TemplateDefaults = TemplateDefaults {
    memory_mb: 8192,
    cpu_cores: 4,
    disk_gb: 20,
    network_enabled: true,
    allowed_domains: &[
        "registry.npmjs.org",
        "crates.io",
        "static.crates.io",
        "pypi.org",
        "files.pythonhosted.org",
        "api.skiff.dev",
    ],
};

const FALLBACK_DEFAULTS: TemplateDefaults = TemplateDefaults {
    memory_mb: 2048,
    cpu_cores: 1,
    disk_gb: 5,
    network_enabled: false,
    allowed_domains: &[],
};

/// Look up the default policy for a template, with a guaranteed fallback for
/// unknown templates.
pub fn template_defaults(template: &str) -> &'static TemplateDefaults {
    match template {
        "builder" => &BUILDER_DEFAULTS,
        _ => &FALLBACK_DEFAULTS,
    }
}

impl SandboxConfig {
    /// Fill unset resource and network fields from the template policy table.
    pub fn with_template_defaults(mut self) -> Self {
        let defaults = template_defaults(&self.template);

        let resources = self.resources.get_or_insert_with(SandboxResources::default);
        resources.memory_mb.get_or_insert(defaults.memory_mb);
        resources.cpu_cores.get_or_insert(defaults.cpu_cores);
        resources.disk_gb.get_or_insert(defaults.disk_gb);

        if self.network.is_none() {
            self.network = Some(NetworkPolicy {
                enabled: defaults.network_enabled,
                allowed_domains: defaults
                    .allowed_domains
                    .iter()
                    .map(|d| d.to_string())
                    .collect(),
                blocked_ports: Vec::new(),
            });
        }

        self
    }
}

/// Caller-supplied user class selecting a timeout tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserTier {
    Free,
    Pro,
}

/// Deployment phase selecting a timeout within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPhase {
    Build,
    Deploy,
    Cleanup,
    Default,
}

/// Fixed timeout for a tier/phase pair.
pub fn phase_timeout(tier: UserTier, phase: OperationPhase) -> Duration {
    let secs = match (tier, phase) {
        (UserTier::Free, OperationPhase::Build) => 300,
        (UserTier::Free, OperationPhase::Deploy) => 180,
        (UserTier::Free, OperationPhase::Cleanup) => 60,
        (UserTier::Free, OperationPhase::Default) => 120,
        (UserTier::Pro, OperationPhase::Build) => 900,
        (UserTier::Pro, OperationPhase::Deploy) => 600,
        (UserTier::Pro, OperationPhase::Cleanup) => 120,
        (UserTier::Pro, OperationPhase::Default) => 300,
    };
    Duration::from_secs(secs)
}
