//! Layout Composition
//!
//! Every cache configuration maps to a [`CacheLayout`]: the smallest set of
//! fields, methods and constructor parameters that configuration needs. The
//! layout is produced by running an ordered list of [`Rule`]s over a
//! [`TypeBuilder`], and the runtime cache then allocates only the components
//! whose [`Capability`] the layout carries. A cache without expiration pays
//! nothing for a timer wheel, an unbounded cache nothing for a sketch.
//!
//! ```text
//!  ConfigDescriptor ──validate──▶ KeyStrength ▶ ValueStrength ▶ Maximum ▶ Weigher
//!                                 ▶ ExpireAfterAccess ▶ ExpireAfterWrite ▶ Refresh
//!                                 ▶ Stats ▶ RemovalListener ▶ Buffers ▶ Finalize
//!                                                                         │
//!                                                                         ▼
//!                                                                   CacheLayout
//! ```
//!
//! Validation happens here and only here, so an invalid combination never
//! reaches the runtime.
//!
//! # Example
//!
//! ```
//! use wtinylfu::compose::{synthesize, Capability};
//! use wtinylfu::config::ConfigDescriptor;
//!
//! let descriptor = ConfigDescriptor {
//!     maximum_size: Some(100),
//!     ..Default::default()
//! };
//! let layout = synthesize(&descriptor).unwrap();
//! assert_eq!(layout.name(), "SSMS");
//! assert!(layout.has(Capability::Evicts));
//! assert!(!layout.has(Capability::Expires));
//! ```

mod layout;
mod rules;

use std::collections::BTreeSet;

use tracing::debug;

pub use self::layout::{CacheLayout, Capability, Field, Param};
pub use self::rules::Rule;

use crate::config::{ConfigDescriptor, KeyStrength, Maximum, ValueStrength};
use crate::error::ConfigError;

/// Accumulates the members of a layout while the rules run.
///
/// The builder only grows. Adding anything after [`finalize`](Self::finalize)
/// is a defect and panics.
#[derive(Debug, Default)]
pub struct TypeBuilder {
    fields: Vec<Field>,
    methods: Vec<&'static str>,
    constructor: Vec<Param>,
    suppressions: Vec<&'static str>,
    capabilities: BTreeSet<Capability>,
    attributes: Vec<String>,
    name: Option<String>,
}

impl TypeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) {
        assert!(self.name.is_none(), "layout member added after finalize");
    }

    /// Adds a field; a field that is already present is kept once.
    pub fn add_field(&mut self, name: &'static str, ty: &'static str) {
        self.check_open();
        if !self.fields.iter().any(|field| field.name == name) {
            self.fields.push(Field { name, ty });
        }
    }

    /// Adds or overrides a method; each method is listed once.
    pub fn add_method(&mut self, name: &'static str) {
        self.check_open();
        if !self.methods.contains(&name) {
            self.methods.push(name);
        }
    }

    pub fn add_param(&mut self, name: &'static str, ty: &'static str) {
        self.check_open();
        if !self.constructor.iter().any(|param| param.name == name) {
            self.constructor.push(Param { name, ty });
        }
    }

    /// Records a lint to allow on the finished type.
    pub fn suppress(&mut self, lint: &'static str) {
        self.check_open();
        if !self.suppressions.contains(&lint) {
            self.suppressions.push(lint);
        }
    }

    pub fn add_capability(&mut self, capability: Capability) {
        self.check_open();
        self.capabilities.insert(capability);
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn suppressions(&self) -> &[&'static str] {
        &self.suppressions
    }

    pub fn is_finalized(&self) -> bool {
        self.name.is_some()
    }

    /// Emits the consolidated lint attribute and closes the builder.
    ///
    /// # Panics
    ///
    /// Panics if the builder was already finalized.
    pub fn finalize(&mut self, name: String) {
        assert!(self.name.is_none(), "layout finalized twice");
        if !self.suppressions.is_empty() {
            self.attributes
                .push(format!("#[allow({})]", self.suppressions.join(", ")));
        }
        self.name = Some(name);
    }

    /// Turns a finalized builder into a layout.
    ///
    /// # Panics
    ///
    /// Panics if the builder was never finalized.
    pub fn build(self) -> CacheLayout {
        let name = match self.name {
            Some(name) => name,
            None => panic!("layout built before finalize"),
        };
        CacheLayout {
            name,
            fields: self.fields,
            methods: self.methods,
            constructor: self.constructor,
            attributes: self.attributes,
            capabilities: self.capabilities,
        }
    }
}

/// State shared by the rules: the configuration being composed and the
/// builder they add to.
#[derive(Debug)]
pub struct CompositionContext<'a> {
    pub descriptor: &'a ConfigDescriptor,
    pub builder: TypeBuilder,
}

impl<'a> CompositionContext<'a> {
    pub fn new(descriptor: &'a ConfigDescriptor) -> Self {
        Self {
            descriptor,
            builder: TypeBuilder::new(),
        }
    }
}

/// Validates the descriptor and composes its layout.
pub fn synthesize(descriptor: &ConfigDescriptor) -> Result<CacheLayout, ConfigError> {
    validate(descriptor)?;

    let mut context = CompositionContext::new(descriptor);
    for rule in rules::ordered() {
        if rule.applies(&context) {
            rule.execute(&mut context);
        }
    }
    let layout = context.builder.build();
    debug!(layout = layout.name(), "composed cache layout");
    Ok(layout)
}

/// Rejects feature combinations that cannot be built.
pub fn validate(descriptor: &ConfigDescriptor) -> Result<(), ConfigError> {
    if descriptor.maximum_size.is_some() && descriptor.maximum_weight.is_some() {
        return Err(ConfigError::SizeAndWeight);
    }
    if descriptor.has_weigher && descriptor.maximum_weight.is_none() {
        return Err(ConfigError::WeigherWithoutWeight);
    }
    if descriptor.maximum_weight.is_some() && !descriptor.has_weigher {
        return Err(ConfigError::WeightWithoutWeigher);
    }
    if descriptor.value_strength != ValueStrength::Strong && descriptor.async_loading {
        return Err(ConfigError::ReclaimableValuesWithAsyncLoading);
    }
    if descriptor.refresh_after_write.is_some() && !descriptor.has_loader {
        return Err(ConfigError::RefreshWithoutLoader);
    }
    if descriptor.async_loading && !descriptor.has_loader {
        return Err(ConfigError::AsyncLoadingWithoutLoader);
    }
    check_ratio("window_ratio", descriptor.window_ratio)?;
    check_ratio("protected_ratio", descriptor.protected_ratio)?;
    if descriptor.shards == 0 {
        return Err(ConfigError::ZeroShards);
    }
    Ok(())
}

fn check_ratio(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidRatio { name, value })
    }
}

fn encode_name(descriptor: &ConfigDescriptor) -> String {
    let mut name = String::new();
    name.push_str(match descriptor.key_strength {
        KeyStrength::Strong => "S",
        KeyStrength::Weak => "W",
    });
    name.push_str(match descriptor.value_strength {
        ValueStrength::Strong => "S",
        ValueStrength::Weak => "W",
        ValueStrength::Soft => "So",
    });
    if descriptor.has_removal_listener {
        name.push('L');
    }
    if descriptor.stats_enabled {
        name.push('S');
    }
    match descriptor.maximum() {
        Some(Maximum::Size(_)) => name.push_str("MS"),
        Some(Maximum::Weight(_)) => name.push_str("MW"),
        None => {}
    }
    if descriptor.expire_after_access.is_some() {
        name.push('A');
    }
    if descriptor.expire_after_write.is_some() {
        name.push('W');
    }
    if descriptor.refresh_after_write.is_some() {
        name.push('R');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn descriptor() -> ConfigDescriptor {
        ConfigDescriptor::default()
    }

    #[test]
    fn test_minimal_layout() {
        let layout = synthesize(&descriptor()).unwrap();
        assert_eq!(layout.name(), "SS");
        assert_eq!(layout.capabilities().count(), 0);
        assert!(layout.has_field("key_ref"));
        assert!(layout.has_field("value_ref"));
        assert!(!layout.has_field("read_buffer"));
        assert!(layout.attributes().is_empty());
        assert!(layout.constructor().is_empty());
    }

    #[test]
    fn test_bounded_layout() {
        let layout = synthesize(&ConfigDescriptor {
            maximum_size: Some(10),
            ..descriptor()
        })
        .unwrap();
        assert_eq!(layout.name(), "SSMS");
        assert!(layout.has(Capability::Evicts));
        assert!(layout.has(Capability::Buffers));
        assert!(layout.has_field("policy"));
        assert!(layout.has_field("drain_status"));
        assert_eq!(layout.constructor()[0].ty, "MaximumSize");
    }

    #[test]
    fn test_full_featured_name() {
        let layout = synthesize(&ConfigDescriptor {
            key_strength: KeyStrength::Weak,
            value_strength: ValueStrength::Soft,
            has_removal_listener: true,
            stats_enabled: true,
            expire_after_access: Some(Duration::from_secs(1)),
            expire_after_write: Some(Duration::from_secs(2)),
            ..descriptor()
        })
        .unwrap();
        assert_eq!(layout.name(), "WSoLSAW");
        assert!(layout.has(Capability::WeakKeys));
        assert!(layout.has(Capability::ReclaimableValues));
        assert!(layout.has(Capability::Expires));
        assert!(layout.has(Capability::Notifies));
        assert!(layout.has(Capability::RecordsStats));
        assert!(layout.methods().contains(&"release_soft_references"));
    }

    #[test]
    fn test_expiration_members_added_once() {
        let layout = synthesize(&ConfigDescriptor {
            expire_after_access: Some(Duration::from_secs(1)),
            expire_after_write: Some(Duration::from_secs(1)),
            ..descriptor()
        })
        .unwrap();
        let wheels = layout
            .fields()
            .iter()
            .filter(|field| field.name == "timer_wheel")
            .count();
        assert_eq!(wheels, 1);
        assert_eq!(layout.methods().iter().filter(|m| **m == "get").count(), 1);
        assert_eq!(
            layout.attributes(),
            &["#[allow(clippy::cast_possible_truncation)]".to_string()]
        );
    }

    #[test]
    fn test_suppressions_consolidated() {
        let layout = synthesize(&ConfigDescriptor {
            key_strength: KeyStrength::Weak,
            maximum_weight: Some(100),
            has_weigher: true,
            has_loader: true,
            refresh_after_write: Some(Duration::from_secs(5)),
            ..descriptor()
        })
        .unwrap();
        assert_eq!(layout.name(), "WSMWR");
        assert_eq!(
            layout.attributes(),
            &["#[allow(clippy::mutable_key_type, clippy::type_complexity)]".to_string()]
        );
        assert!(layout.has(Capability::Weighs));
        assert!(layout.has(Capability::Refreshes));
    }

    #[test]
    fn test_rejected_combinations() {
        let cases = [
            (
                ConfigDescriptor {
                    maximum_size: Some(1),
                    maximum_weight: Some(1),
                    has_weigher: true,
                    ..descriptor()
                },
                ConfigError::SizeAndWeight,
            ),
            (
                ConfigDescriptor {
                    has_weigher: true,
                    maximum_size: Some(1),
                    ..descriptor()
                },
                ConfigError::WeigherWithoutWeight,
            ),
            (
                ConfigDescriptor {
                    maximum_weight: Some(1),
                    ..descriptor()
                },
                ConfigError::WeightWithoutWeigher,
            ),
            (
                ConfigDescriptor {
                    value_strength: ValueStrength::Weak,
                    async_loading: true,
                    has_loader: true,
                    ..descriptor()
                },
                ConfigError::ReclaimableValuesWithAsyncLoading,
            ),
            (
                ConfigDescriptor {
                    refresh_after_write: Some(Duration::from_secs(1)),
                    ..descriptor()
                },
                ConfigError::RefreshWithoutLoader,
            ),
            (
                ConfigDescriptor {
                    async_loading: true,
                    ..descriptor()
                },
                ConfigError::AsyncLoadingWithoutLoader,
            ),
            (
                ConfigDescriptor {
                    shards: 0,
                    ..descriptor()
                },
                ConfigError::ZeroShards,
            ),
        ];
        for (descriptor, expected) in cases {
            assert_eq!(synthesize(&descriptor), Err(expected));
        }
    }

    #[test]
    fn test_invalid_ratio() {
        let result = synthesize(&ConfigDescriptor {
            window_ratio: 1.5,
            ..descriptor()
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidRatio { name: "window_ratio", .. })
        ));
        assert!(synthesize(&ConfigDescriptor {
            protected_ratio: f64::NAN,
            ..descriptor()
        })
        .is_err());
    }

    #[test]
    #[should_panic(expected = "finalized twice")]
    fn test_finalize_twice_panics() {
        let mut builder = TypeBuilder::new();
        builder.finalize("SS".to_string());
        builder.finalize("SS".to_string());
    }

    #[test]
    #[should_panic(expected = "after finalize")]
    fn test_add_after_finalize_panics() {
        let descriptor = descriptor();
        let mut context = CompositionContext::new(&descriptor);
        rules::Finalize.execute(&mut context);
        rules::StatsRule.execute(&mut context);
    }

    #[test]
    fn test_display() {
        let layout = synthesize(&ConfigDescriptor {
            key_strength: KeyStrength::Weak,
            maximum_size: Some(5),
            ..descriptor()
        })
        .unwrap();
        let rendered = layout.to_string();
        assert!(rendered.starts_with("#[allow(clippy::mutable_key_type)]\nstruct WSMS<K, V> {"));
        assert!(rendered.contains("    key_ref: Weak<K>,"));
        assert!(rendered.contains("fn new(maximum: MaximumSize) -> Self;"));
    }
}
