use crate::{
    BoundsCheck, Concat, Constant, FlowError, ProcessArgs, QaProcess, Register, SharedProcess,
    Sum, Value, WorkflowProcess, parse_description,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type ProcessFactory = Arc<
    dyn Fn(&str, &ProcessArgs, &ProcessRegistry) -> Result<SharedProcess, FlowError> + Send + Sync,
>;

/// Maps type names used in workflow descriptions to process factories.
#[derive(Clone, Default)]
pub struct ProcessRegistry {
    factories: BTreeMap<String, ProcessFactory>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_type(
        &mut self,
        type_name: impl Into<String>,
        factory: impl Fn(&str, &ProcessArgs, &ProcessRegistry) -> Result<SharedProcess, FlowError>
        + Send
        + Sync
        + 'static,
    ) -> Option<ProcessFactory> {
        self.factories.insert(type_name.into(), Arc::new(factory))
    }

    /// Registers a process type backed by a whole workflow description. Every
    /// instance parses and builds its own copy of the inner workflow.
    pub fn register_workflow(
        &mut self,
        type_name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Option<ProcessFactory>, FlowError> {
        let type_name = type_name.into();
        let description = parse_description(&source.into())?;
        let name = type_name.clone();
        Ok(self.register_type(type_name, move |_id, _args, registry| {
            let inner = description.build(registry)?;
            Ok(Arc::new(WorkflowProcess::new(name.clone(), inner)?) as SharedProcess)
        }))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn type_names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create(
        &self,
        type_name: &str,
        id: &str,
        args: &ProcessArgs,
    ) -> Result<SharedProcess, FlowError> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| FlowError::ProcessTypeNotFound(type_name.to_string()))?;
        factory(id, args, self)
    }
}

/// Registry holding the built-in process types.
pub fn core_registry() -> ProcessRegistry {
    let mut registry = ProcessRegistry::new();
    registry.register_type("Constant", |_id, args, _registry| {
        let value = args.get(0, "value").cloned().unwrap_or(Value::Integer(0));
        Ok(Arc::new(Constant::new(value)) as SharedProcess)
    });
    registry.register_type("Sum", |_id, _args, _registry| {
        Ok(Arc::new(Sum::new()) as SharedProcess)
    });
    registry.register_type("Concat", |_id, args, _registry| {
        let separator = args
            .get(0, "separator")
            .map(Value::to_string_value)
            .unwrap_or_default();
        Ok(Arc::new(Concat::new(separator)) as SharedProcess)
    });
    registry.register_type("Register", |_id, args, _registry| {
        let initial = args.get(0, "initial").cloned().unwrap_or(Value::Integer(0));
        Ok(Arc::new(Register::new(initial)) as SharedProcess)
    });
    registry.register_type("BoundsCheck", |id, args, _registry| {
        let bound = |index: usize, key: &str| -> Result<f64, FlowError> {
            args.get(index, key).and_then(Value::as_f64).ok_or_else(|| {
                FlowError::InvalidDescription(format!(
                    "BoundsCheck node '{id}' needs a numeric '{key}' argument"
                ))
            })
        };
        let checks = BoundsCheck::new(bound(0, "min")?, bound(1, "max")?);
        Ok(Arc::new(QaProcess::new(checks)) as SharedProcess)
    });
    registry
}
