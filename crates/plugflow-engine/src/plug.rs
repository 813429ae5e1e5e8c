use crate::{Attribute, AttributeFlag};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlugDirection {
    Input,
    Output,
    Both,
}

/// A named, typed port declared on a process type. Plugs are shared by every
/// node of that type; identity is the name.
#[derive(Clone, Debug)]
pub struct Plug {
    pub name: String,
    pub attribute: Attribute,
    pub direction: PlugDirection,
    pub affects: Vec<String>,
    pub affected_by: Vec<String>,
}

impl Plug {
    pub fn new(name: impl Into<String>, attribute: Attribute, direction: PlugDirection) -> Self {
        Self {
            name: name.into(),
            attribute,
            direction,
            affects: Vec::new(),
            affected_by: Vec::new(),
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self.direction, PlugDirection::Input | PlugDirection::Both)
    }

    pub fn is_output(&self) -> bool {
        matches!(self.direction, PlugDirection::Output | PlugDirection::Both)
    }

    /// Output plugs and computable plugs have their value produced by the
    /// owning process.
    pub fn provides_output(&self) -> bool {
        self.is_output() || self.attribute.has_flag(AttributeFlag::Computable)
    }

    /// Whether the plug may be the destination of a connection.
    pub fn provides_input(&self) -> bool {
        self.is_input() && !self.attribute.has_flag(AttributeFlag::Unconnectable)
    }

    pub fn is_readonly(&self) -> bool {
        self.attribute.is_readonly()
    }
}

/// Static plug catalogue of a process type, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct ProcessSpec {
    pub type_name: String,
    pub noun: String,
    pub verb: String,
    plugs: Vec<Arc<Plug>>,
}

impl ProcessSpec {
    pub fn new(
        type_name: impl Into<String>,
        noun: impl Into<String>,
        verb: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            noun: noun.into(),
            verb: verb.into(),
            plugs: Vec::new(),
        }
    }

    pub fn input(self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.plug(Plug::new(name, attribute, PlugDirection::Input))
    }

    pub fn output(self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.plug(Plug::new(name, attribute, PlugDirection::Output))
    }

    pub fn both(self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.plug(Plug::new(name, attribute, PlugDirection::Both))
    }

    pub fn plug(mut self, plug: Plug) -> Self {
        if self.plug_named(&plug.name).is_some() {
            tracing::warn!(
                process_type = %self.type_name,
                plug = %plug.name,
                "duplicate plug declaration ignored"
            );
            return self;
        }
        self.plugs.push(Arc::new(plug));
        self
    }

    /// Declares that changes to `source` invalidate `target`.
    pub fn affects(mut self, source: &str, target: &str) -> Self {
        let known = self.plug_named(source).is_some() && self.plug_named(target).is_some();
        if !known {
            tracing::warn!(
                process_type = %self.type_name,
                source,
                target,
                "affects relation names an unknown plug and was ignored"
            );
            return self;
        }
        for plug in &mut self.plugs {
            let plug = Arc::make_mut(plug);
            if plug.name == source && !plug.affects.iter().any(|name| name == target) {
                plug.affects.push(target.to_string());
            }
            if plug.name == target && !plug.affected_by.iter().any(|name| name == source) {
                plug.affected_by.push(source.to_string());
            }
        }
        self
    }

    pub fn plugs(&self) -> &[Arc<Plug>] {
        &self.plugs
    }

    pub fn plug_named(&self, name: &str) -> Option<&Arc<Plug>> {
        self.plugs.iter().find(|plug| plug.name == name)
    }

    pub fn input_plugs(&self) -> impl Iterator<Item = &Arc<Plug>> {
        self.plugs.iter().filter(|plug| plug.is_input())
    }

    pub fn output_plugs(&self) -> impl Iterator<Item = &Arc<Plug>> {
        self.plugs.iter().filter(|plug| plug.provides_output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValueType;

    fn spec() -> ProcessSpec {
        ProcessSpec::new("Adder", "sum", "adds")
            .input("lhs", Attribute::new(ValueType::Number))
            .input("rhs", Attribute::new(ValueType::Number))
            .output(
                "total",
                Attribute::new(ValueType::Number).with_flags(AttributeFlag::Computable),
            )
            .affects("lhs", "total")
            .affects("rhs", "total")
    }

    #[test]
    fn process_spec_affects_expected_bidirectional_links() {
        let spec = spec();
        let lhs = spec.plug_named("lhs").expect("lhs should exist");
        let total = spec.plug_named("total").expect("total should exist");
        assert_eq!(lhs.affects, vec!["total".to_string()]);
        assert_eq!(total.affected_by, vec!["lhs".to_string(), "rhs".to_string()]);
    }

    #[test]
    fn process_spec_duplicate_and_unknown_declarations_expected_ignored() {
        let spec = spec()
            .input("lhs", Attribute::new(ValueType::String))
            .affects("missing", "total");
        assert_eq!(spec.plugs().len(), 3);
        let lhs = spec.plug_named("lhs").expect("lhs should exist");
        assert_eq!(lhs.attribute.value_type, ValueType::Number);
    }

    #[test]
    fn process_spec_direction_filters_expected_declaration_order() {
        let spec = spec();
        let inputs: Vec<&str> = spec.input_plugs().map(|plug| plug.name.as_str()).collect();
        let outputs: Vec<&str> = spec.output_plugs().map(|plug| plug.name.as_str()).collect();
        assert_eq!(inputs, vec!["lhs", "rhs"]);
        assert_eq!(outputs, vec!["total"]);
    }
}
