//! The ordered rules that shape a cache layout.
//!
//! Each rule looks at the descriptor, decides whether it applies, and adds
//! members to the builder. Rules only ever add; a later rule cannot take back
//! what an earlier one contributed.

use crate::compose::{Capability, CompositionContext};
use crate::config::{KeyStrength, Maximum, ValueStrength};

/// One step of layout synthesis.
pub trait Rule {
    /// True if this rule contributes to the given configuration.
    fn applies(&self, context: &CompositionContext<'_>) -> bool;

    /// Adds this rule's members to the builder.
    fn execute(&self, context: &mut CompositionContext<'_>);
}

/// All rules, in the order they must run. [`Finalize`] is always last.
pub(crate) fn ordered() -> [&'static dyn Rule; 11] {
    [
        &KeyStrengthRule,
        &ValueStrengthRule,
        &MaximumRule,
        &WeigherRule,
        &ExpireAfterAccessRule,
        &ExpireAfterWriteRule,
        &RefreshAfterWriteRule,
        &StatsRule,
        &RemovalListenerRule,
        &BuffersRule,
        &Finalize,
    ]
}

const CAST_TRUNCATION: &str = "clippy::cast_possible_truncation";
const TYPE_COMPLEXITY: &str = "clippy::type_complexity";

pub(crate) struct KeyStrengthRule;

impl Rule for KeyStrengthRule {
    fn applies(&self, _context: &CompositionContext<'_>) -> bool {
        true
    }

    fn execute(&self, context: &mut CompositionContext<'_>) {
        let builder = &mut context.builder;
        match context.descriptor.key_strength {
            KeyStrength::Strong => builder.add_field("key_ref", "Arc<K>"),
            KeyStrength::Weak => {
                builder.add_field("key_ref", "Weak<K>");
                builder.add_capability(Capability::WeakKeys);
                builder.suppress("clippy::mutable_key_type");
            }
        }
    }
}

pub(crate) struct ValueStrengthRule;

impl Rule for ValueStrengthRule {
    fn applies(&self, _context: &CompositionContext<'_>) -> bool {
        true
    }

    fn execute(&self, context: &mut CompositionContext<'_>) {
        let builder = &mut context.builder;
        match context.descriptor.value_strength {
            ValueStrength::Strong => builder.add_field("value_ref", "Arc<V>"),
            ValueStrength::Weak => {
                builder.add_field("value_ref", "Weak<V>");
                builder.add_capability(Capability::ReclaimableValues);
            }
            ValueStrength::Soft => {
                builder.add_field("value_ref", "Soft<V>");
                builder.add_capability(Capability::ReclaimableValues);
                builder.add_method("release_soft_references");
            }
        }
    }
}

pub(crate) struct MaximumRule;

impl Rule for MaximumRule {
    fn applies(&self, context: &CompositionContext<'_>) -> bool {
        context.descriptor.maximum().is_some()
    }

    fn execute(&self, context: &mut CompositionContext<'_>) {
        let builder = &mut context.builder;
        builder.add_field("policy", "EvictionEngine<K, V>");
        builder.add_capability(Capability::Evicts);
        match context.descriptor.maximum() {
            Some(Maximum::Weight(_)) => builder.add_param("maximum", "MaximumWeight"),
            _ => builder.add_param("maximum", "MaximumSize"),
        }
    }
}

pub(crate) struct WeigherRule;

impl Rule for WeigherRule {
    fn applies(&self, context: &CompositionContext<'_>) -> bool {
        context.descriptor.has_weigher
    }

    fn execute(&self, context: &mut CompositionContext<'_>) {
        let builder = &mut context.builder;
        builder.add_field("weigher", "Weigher<K, V>");
        builder.add_param("weigher", "Weigher<K, V>");
        builder.add_capability(Capability::Weighs);
        builder.suppress(TYPE_COMPLEXITY);
    }
}

/// Shared by both expiration rules so the wheel and the `get` override are
/// added once.
fn add_expiration(context: &mut CompositionContext<'_>) {
    let builder = &mut context.builder;
    builder.add_field("timer_wheel", "TimerWheel<K, V>");
    builder.add_capability(Capability::Expires);
    builder.add_method("get");
    builder.suppress(CAST_TRUNCATION);
}

pub(crate) struct ExpireAfterAccessRule;

impl Rule for ExpireAfterAccessRule {
    fn applies(&self, context: &CompositionContext<'_>) -> bool {
        context.descriptor.expire_after_access.is_some()
    }

    fn execute(&self, context: &mut CompositionContext<'_>) {
        context.builder.add_field("expires_after_access_nanos", "u64");
        context.builder.add_param("expire_after_access", "Duration");
        add_expiration(context);
    }
}

pub(crate) struct ExpireAfterWriteRule;

impl Rule for ExpireAfterWriteRule {
    fn applies(&self, context: &CompositionContext<'_>) -> bool {
        context.descriptor.expire_after_write.is_some()
    }

    fn execute(&self, context: &mut CompositionContext<'_>) {
        context.builder.add_field("expires_after_write_nanos", "u64");
        context.builder.add_param("expire_after_write", "Duration");
        add_expiration(context);
    }
}

pub(crate) struct RefreshAfterWriteRule;

impl Rule for RefreshAfterWriteRule {
    fn applies(&self, context: &CompositionContext<'_>) -> bool {
        context.descriptor.refresh_after_write.is_some()
    }

    fn execute(&self, context: &mut CompositionContext<'_>) {
        let builder = &mut context.builder;
        builder.add_field("refresher", "Refresher<K, V>");
        builder.add_param("refresh_after_write", "Duration");
        builder.add_capability(Capability::Refreshes);
        builder.suppress(TYPE_COMPLEXITY);
    }
}

pub(crate) struct StatsRule;

impl Rule for StatsRule {
    fn applies(&self, context: &CompositionContext<'_>) -> bool {
        context.descriptor.stats_enabled
    }

    fn execute(&self, context: &mut CompositionContext<'_>) {
        context.builder.add_field("stats", "StatsCounter");
        context.builder.add_capability(Capability::RecordsStats);
    }
}

pub(crate) struct RemovalListenerRule;

impl Rule for RemovalListenerRule {
    fn applies(&self, context: &CompositionContext<'_>) -> bool {
        context.descriptor.has_removal_listener
    }

    fn execute(&self, context: &mut CompositionContext<'_>) {
        context.builder.add_field("listener", "RemovalListener<K, V>");
        context.builder.add_param("removal_listener", "RemovalListener<K, V>");
        context.builder.add_capability(Capability::Notifies);
    }
}

pub(crate) struct BuffersRule;

impl Rule for BuffersRule {
    fn applies(&self, context: &CompositionContext<'_>) -> bool {
        let builder = &context.builder;
        builder.has(Capability::Evicts)
            || builder.has(Capability::Expires)
            || builder.has(Capability::WeakKeys)
            || builder.has(Capability::ReclaimableValues)
    }

    fn execute(&self, context: &mut CompositionContext<'_>) {
        let builder = &mut context.builder;
        builder.add_field("read_buffer", "ReadBuffer<Arc<Node<K, V>>>");
        builder.add_field("write_buffer", "WriteBuffer<WriteTask<K, V>>");
        builder.add_field("drain_status", "DrainStatus");
        builder.add_capability(Capability::Buffers);
    }
}

/// Closes the builder: emits the consolidated `#[allow(..)]` attribute and the
/// constructor, and names the layout.
pub(crate) struct Finalize;

impl Rule for Finalize {
    fn applies(&self, _context: &CompositionContext<'_>) -> bool {
        true
    }

    fn execute(&self, context: &mut CompositionContext<'_>) {
        let name = super::encode_name(context.descriptor);
        context.builder.finalize(name);
    }
}
