//! Synthesized cache layouts.

use core::fmt;
use std::collections::BTreeSet;

/// A feature the runtime cache must carry a component for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Keys are held weakly.
    WeakKeys,
    /// Values are held weakly or softly.
    ReclaimableValues,
    /// Entries are evicted to respect a maximum.
    Evicts,
    /// Entry weights come from a user weigher.
    Weighs,
    /// Entries expire after access or write.
    Expires,
    /// Entries are reloaded after a write age.
    Refreshes,
    /// Hit, miss, load and eviction counts are recorded.
    RecordsStats,
    /// Removals are reported to a listener.
    Notifies,
    /// Reads and writes are buffered for a maintenance pass.
    Buffers,
}

/// A field of a synthesized layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub ty: &'static str,
}

/// A constructor parameter of a synthesized layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub ty: &'static str,
}

/// The finished description of a cache type.
///
/// A layout lists exactly the members its configuration needs. The runtime
/// cache consults [`has`](CacheLayout::has) to decide which optional
/// components to allocate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    pub(crate) name: String,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<&'static str>,
    pub(crate) constructor: Vec<Param>,
    pub(crate) attributes: Vec<String>,
    pub(crate) capabilities: BTreeSet<Capability>,
}

impl CacheLayout {
    /// The type name, which encodes the enabled features.
    ///
    /// Letters in order: key strength (`S`/`W`), value strength
    /// (`S`/`W`/`So`), then `L` for a listener, `S` for statistics, `MS` or
    /// `MW` for a size or weight maximum, `A` and `W` for expiration after
    /// access and write, and `R` for refresh.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn methods(&self) -> &[&'static str] {
        &self.methods
    }

    pub fn constructor(&self) -> &[Param] {
        &self.constructor
    }

    /// Attributes attached to the type, at most one consolidated `#[allow(..)]`.
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.capabilities.iter().copied()
    }

    /// True if the layout carries the capability.
    #[inline]
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// True if the layout has a field with this name.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }
}

impl fmt::Display for CacheLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for attribute in &self.attributes {
            writeln!(f, "{}", attribute)?;
        }
        writeln!(f, "struct {}<K, V> {{", self.name)?;
        for field in &self.fields {
            writeln!(f, "    {}: {},", field.name, field.ty)?;
        }
        writeln!(f, "}}")?;
        writeln!(f)?;
        writeln!(f, "impl<K, V> {}<K, V> {{", self.name)?;
        let params: Vec<String> = self
            .constructor
            .iter()
            .map(|param| format!("{}: {}", param.name, param.ty))
            .collect();
        writeln!(f, "    fn new({}) -> Self;", params.join(", "))?;
        for method in &self.methods {
            writeln!(f, "    fn {}(..);", method)?;
        }
        write!(f, "}}")
    }
}
