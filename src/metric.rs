use tracing::debug;

use crate::context::TestabilityContext;
use crate::cost::ClassCost;
use crate::error::AnalysisError;
use crate::ir::{ClassInfo, MethodInfo, Variable};
use crate::repository::ClassRepository;
use crate::whitelist::Whitelist;

/// Computes the testability cost of classes against one repository.
pub(crate) struct MetricComputer<'r> {
    repository: &'r mut ClassRepository,
    whitelist: &'r Whitelist,
}

impl<'r> MetricComputer<'r> {
    pub(crate) fn new(repository: &'r mut ClassRepository, whitelist: &'r Whitelist) -> Self {
        Self {
            repository,
            whitelist,
        }
    }

    /// Cost of every method declared by `class_name`.
    ///
    /// Fails only when the class itself cannot be loaded; unloadable
    /// dependencies are recorded on the result instead.
    pub(crate) fn compute(&mut self, class_name: &str) -> Result<ClassCost, AnalysisError> {
        let class = self.repository.get_class(class_name)?;
        let mut context = TestabilityContext::new(self.repository, self.whitelist, &class.name);

        for field in class.fields().iter().filter(|field| !field.is_private) {
            context.set_injectable(Variable::Field(field.clone()));
        }
        for method in class.methods().iter().filter(|method| !method.is_private()) {
            context.set_method_injectable(method);
        }

        // Initialisation runs first so that what it stores is known to the rest.
        let constructor = preferred_constructor(&class);
        for method in class.methods() {
            if method.is_static_initializer() {
                context.visit(&class, method);
            }
        }
        if let Some(constructor) = constructor {
            context.visit(&class, constructor);
        }
        for method in class.methods() {
            if method.name.starts_with("set") {
                context.visit(&class, method);
            }
        }
        let ids: Vec<_> = class
            .methods()
            .iter()
            .map(|method| context.visit(&class, method))
            .collect();

        // A test has to construct an instance before calling any instance method.
        if let Some(constructor) = constructor {
            let constructor_id = context.visit(&class, constructor);
            for (method, id) in class.methods().iter().zip(&ids) {
                if method.can_override() {
                    context.add_call(*id, constructor.starting_line, constructor_id);
                }
            }
        }

        let cost = context.finish(ids);
        debug!(
            class = %cost.class_name,
            complexity = cost.total_complexity_cost(),
            global = cost.total_global_cost(),
            "computed class cost"
        );
        Ok(cost)
    }
}

/// Visible constructor taking the most references; the first wins a tie.
fn preferred_constructor(class: &ClassInfo) -> Option<&MethodInfo> {
    let mut preferred: Option<&MethodInfo> = None;
    for method in class.methods() {
        if !method.is_constructor() || method.is_private() {
            continue;
        }
        let better = preferred.is_none_or(|current| {
            current.non_primitive_parameter_count() < method.non_primitive_parameter_count()
        });
        if better {
            preferred = Some(method);
        }
    }
    preferred
}
