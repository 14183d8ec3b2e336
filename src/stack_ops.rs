use crate::ir::{Constant, FieldInfo, MethodInvocation, Operation, Type, Variable};

/// Stack effect of one decoded instruction, tagged with its source line.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StackOperation {
    pub(crate) line: u32,
    pub(crate) kind: StackOpKind,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum StackOpKind {
    /// Push a variable or constant.
    Load(Variable),
    /// Pop into a local slot.
    Store(Variable),
    /// Pop operands and push an untracked result, if any.
    Transform {
        consumes: usize,
        result: Option<Variable>,
    },
    GetField(FieldInfo),
    PutField(FieldInfo),
    ArrayLoad(Type),
    ArrayStore(Type),
    Invoke(Call),
    /// `dup`, `dup_x1`, `dup_x2` for offsets 0 to 2.
    Duplicate(usize),
    /// `dup2`, `dup2_x1`, `dup2_x2` for offsets 0 to 2.
    Duplicate2(usize),
    Swap,
    Pop(usize),
    Return(Type),
    Throw,
}

/// Resolved callee of an invoke instruction.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Call {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) is_static: bool,
    pub(crate) parameters: Vec<Type>,
    pub(crate) result: Type,
}

impl StackOperation {
    pub(crate) fn new(line: u32, kind: StackOpKind) -> Self {
        Self { line, kind }
    }

    /// Number of stack slots consumed.
    pub(crate) fn operand_count(&self) -> usize {
        match &self.kind {
            StackOpKind::Load(_) => 0,
            StackOpKind::Store(variable) => variable.ty().slots(),
            StackOpKind::Transform { consumes, .. } => *consumes,
            StackOpKind::GetField(field) => usize::from(!field.is_static),
            StackOpKind::PutField(field) => field.ty.slots() + usize::from(!field.is_static),
            StackOpKind::ArrayLoad(_) => 2,
            StackOpKind::ArrayStore(element) => 2 + element.slots(),
            StackOpKind::Invoke(call) => {
                usize::from(!call.is_static) + call.parameters.iter().map(|ty| ty.slots()).sum::<usize>()
            }
            StackOpKind::Duplicate(offset) => 1 + offset,
            StackOpKind::Duplicate2(offset) => 2 + offset,
            StackOpKind::Swap => 2,
            StackOpKind::Pop(count) => *count,
            StackOpKind::Return(ty) => ty.slots(),
            StackOpKind::Throw => 1,
        }
    }

    /// Values pushed for the popped `input`, bottom first.
    pub(crate) fn apply(&self, input: &[Variable]) -> Vec<Variable> {
        match &self.kind {
            StackOpKind::Load(variable) => slots_of(variable.clone()),
            StackOpKind::Transform { result, .. } => {
                result.clone().map(slots_of).unwrap_or_default()
            }
            StackOpKind::GetField(field) => slots_of(Variable::Field(field.clone())),
            StackOpKind::ArrayLoad(element) if element.is_reference() => input[..1].to_vec(),
            StackOpKind::ArrayLoad(element) => {
                slots_of(Variable::Constant(Constant::unknown(*element)))
            }
            StackOpKind::Invoke(call) if call.result == Type::Void => Vec::new(),
            StackOpKind::Invoke(call) => slots_of(Variable::Constant(Constant::unknown(call.result))),
            StackOpKind::Duplicate(_) => {
                let mut output = input[input.len() - 1..].to_vec();
                output.extend_from_slice(input);
                output
            }
            StackOpKind::Duplicate2(_) => {
                let mut output = input[input.len() - 2..].to_vec();
                output.extend_from_slice(input);
                output
            }
            StackOpKind::Swap => vec![input[1].clone(), input[0].clone()],
            StackOpKind::Store(_)
            | StackOpKind::PutField(_)
            | StackOpKind::ArrayStore(_)
            | StackOpKind::Pop(_)
            | StackOpKind::Return(_)
            | StackOpKind::Throw => Vec::new(),
        }
    }

    /// Source-level side effect of this operation, if it has one.
    pub(crate) fn to_operation(&self, input: &[Variable]) -> Option<Operation> {
        let line = self.line;
        match &self.kind {
            StackOpKind::Store(variable) => Some(Operation::LocalAssignment {
                line,
                variable: variable.clone(),
                value: input[0].clone(),
            }),
            StackOpKind::PutField(field) if field.is_static => Some(Operation::FieldAssignment {
                line,
                instance: None,
                field: field.clone(),
                value: input[0].clone(),
            }),
            StackOpKind::PutField(field) => Some(Operation::FieldAssignment {
                line,
                instance: Some(input[0].clone()),
                field: field.clone(),
                value: input[1].clone(),
            }),
            StackOpKind::ArrayStore(_) => Some(Operation::ArrayAssignment {
                line,
                array: input[0].clone(),
                index: input[1].clone(),
                value: input[2].clone(),
            }),
            StackOpKind::Invoke(call) => {
                let (method_this, mut position) = if call.is_static {
                    (None, 0)
                } else {
                    (Some(input[0].clone()), 1)
                };
                // wide arguments occupy two slots but are one parameter
                let mut parameters = Vec::with_capacity(call.parameters.len());
                for ty in &call.parameters {
                    parameters.push(input[position].clone());
                    position += ty.slots();
                }
                Some(Operation::MethodInvocation(MethodInvocation {
                    line,
                    owner: call.owner.clone(),
                    name: call.name.clone(),
                    descriptor: call.descriptor.clone(),
                    method_this,
                    parameters,
                }))
            }
            _ => None,
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self.kind, StackOpKind::Return(_) | StackOpKind::Throw)
    }
}

fn slots_of(variable: Variable) -> Vec<Variable> {
    match variable.ty().slots() {
        0 => Vec::new(),
        1 => vec![variable],
        _ => vec![variable.clone(), variable],
    }
}
