use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cost::{ClassCost, CostGraph, MethodId, MissingClass};
use crate::error::AnalysisError;
use crate::ir::{ClassInfo, FieldInfo, MethodInfo, MethodInvocation, Operation, Variable};
use crate::repository::ClassRepository;
use crate::whitelist::Whitelist;

/// Injectability and global-state bookkeeping for the analysis of one class.
///
/// Methods are analysed at most once; invocations reached along the way are
/// queued and analysed with whatever injectability holds when they are
/// dequeued.
pub(crate) struct TestabilityContext<'r> {
    repository: &'r mut ClassRepository,
    whitelist: &'r Whitelist,
    class_name: String,
    injectables: HashSet<Variable>,
    globals: HashSet<Variable>,
    graph: CostGraph,
    worklist: Vec<(Arc<ClassInfo>, String)>,
    missing: Vec<MissingClass>,
}

impl<'r> TestabilityContext<'r> {
    pub(crate) fn new(
        repository: &'r mut ClassRepository,
        whitelist: &'r Whitelist,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            whitelist,
            class_name: class_name.into(),
            injectables: HashSet::new(),
            globals: HashSet::new(),
            graph: CostGraph::default(),
            worklist: Vec::new(),
            missing: Vec::new(),
        }
    }

    pub(crate) fn set_injectable(&mut self, variable: Variable) {
        self.injectables.insert(variable);
    }

    /// A test can pass any receiver and arguments to a visible method.
    pub(crate) fn set_method_injectable(&mut self, method: &MethodInfo) {
        if let Some(this) = &method.method_this {
            self.set_injectable(this.clone());
        }
        for parameter in &method.parameters {
            self.set_injectable(parameter.clone());
        }
    }

    pub(crate) fn is_injectable(&self, variable: &Variable) -> bool {
        self.injectables.contains(variable)
    }

    pub(crate) fn is_global(&self, variable: &Variable) -> bool {
        variable.is_static() || self.globals.contains(variable)
    }

    pub(crate) fn local_assignment(&mut self, destination: &Variable, source: &Variable) {
        if self.is_injectable(source) {
            self.injectables.insert(destination.clone());
        }
        if destination.is_static() || self.is_global(source) {
            self.globals.insert(destination.clone());
        }
    }

    /// Writes through a static or global instance touch global state.
    pub(crate) fn field_assignment(
        &mut self,
        method: MethodId,
        line: u32,
        instance: Option<&Variable>,
        field: &FieldInfo,
        value: &Variable,
    ) {
        let field = Variable::Field(field.clone());
        self.local_assignment(&field, value);
        if instance.is_none_or(|instance| self.is_global(instance)) {
            self.graph.add_global(method, line, &field);
            self.globals.insert(field);
        }
    }

    /// Element writes touch global state only when the array already is global.
    pub(crate) fn array_assignment(
        &mut self,
        method: MethodId,
        line: u32,
        array: &Variable,
        value: &Variable,
    ) {
        self.local_assignment(array, value);
        if self.is_global(array) {
            self.graph.add_global(method, line, array);
        }
    }

    /// Analyse `method` of `class` and everything it reaches; returns its cost node.
    pub(crate) fn visit(&mut self, class: &Arc<ClassInfo>, method: &MethodInfo) -> MethodId {
        if let Some(id) = self.graph.find(&method.full_name()) {
            return id;
        }
        let id = self.graph.add(method);
        self.worklist.push((Arc::clone(class), method.signature()));
        while let Some((class, signature)) = self.worklist.pop() {
            let Some(method) = class.method(&signature) else {
                continue;
            };
            let caller = self.graph.add(method);
            debug!(
                method = %method.full_name(),
                locals = method.local_variables.len(),
                "analysing method"
            );
            for operation in &method.operations {
                self.apply(caller, operation);
            }
        }
        id
    }

    pub(crate) fn add_call(&mut self, from: MethodId, line: u32, to: MethodId) {
        self.graph.add_call(from, line, to);
    }

    /// Link costs and hand over the per-class result.
    pub(crate) fn finish(mut self, methods: Vec<MethodId>) -> ClassCost {
        self.graph.link();
        ClassCost::new(self.class_name, self.graph, methods, self.missing)
    }

    fn apply(&mut self, method: MethodId, operation: &Operation) {
        match operation {
            Operation::LocalAssignment {
                variable, value, ..
            } => self.local_assignment(variable, value),
            Operation::FieldAssignment {
                line,
                instance,
                field,
                value,
            } => self.field_assignment(method, *line, instance.as_ref(), field, value),
            Operation::ArrayAssignment {
                line, array, value, ..
            } => self.array_assignment(method, *line, array, value),
            Operation::MethodInvocation(invocation) => self.invocation(method, invocation),
        }
    }

    fn invocation(&mut self, caller: MethodId, invocation: &MethodInvocation) {
        if self.whitelist.is_whitelisted(&invocation.owner) || invocation.owner.starts_with('[') {
            return;
        }
        let signature = invocation.signature();
        let class = match self.resolve(&invocation.owner, &signature) {
            Ok(Some(class)) => class,
            Ok(None) => return,
            Err(error) => {
                self.report_missing(&invocation.owner, &error);
                return;
            }
        };
        let Some(callee) = class.method(&signature) else {
            return;
        };
        // a test can substitute an overridable method on an injectable receiver
        let receiver_injectable = invocation
            .method_this
            .as_ref()
            .is_some_and(|receiver| self.is_injectable(receiver));
        if callee.can_override() && receiver_injectable {
            return;
        }

        for (parameter, argument) in callee.parameters.iter().zip(&invocation.parameters) {
            self.local_assignment(parameter, argument);
        }
        if let (Some(this), Some(receiver)) = (&callee.method_this, &invocation.method_this) {
            self.local_assignment(this, receiver);
        }
        let callee_id = match self.graph.find(&callee.full_name()) {
            Some(id) => id,
            None => {
                self.worklist.push((Arc::clone(&class), signature));
                self.graph.add(callee)
            }
        };
        self.graph.add_call(caller, invocation.line, callee_id);
    }

    /// Class declaring `signature`, searching `owner` and then its superclasses.
    fn resolve(
        &mut self,
        owner: &str,
        signature: &str,
    ) -> Result<Option<Arc<ClassInfo>>, AnalysisError> {
        let mut class = self.repository.get_class(owner)?;
        loop {
            if class.method(signature).is_some() {
                return Ok(Some(class));
            }
            match class.super_name.clone() {
                Some(parent) if !self.whitelist.is_whitelisted(&parent) => {
                    class = self.repository.get_class(&parent)?;
                }
                _ => return Ok(None),
            }
        }
    }

    /// Record an unloadable class once per analysed class.
    fn report_missing(&mut self, owner: &str, error: &AnalysisError) {
        let class_name = error.missing_class().unwrap_or(owner).to_string();
        if self
            .missing
            .iter()
            .any(|missing| missing.class_name == class_name)
        {
            return;
        }
        if error.is_missing_dependency() {
            warn!(
                "can not fully analyze class '{}' since class '{}' was not found",
                self.class_name, class_name
            );
        } else {
            warn!(
                "can not fully analyze class '{}' since class '{}' failed to load: {}",
                self.class_name, class_name, error
            );
        }
        self.missing.push(MissingClass {
            class_name,
            reason: error.to_string(),
        });
    }
}
