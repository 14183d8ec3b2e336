use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use jdescriptor::TypeDescriptor;

/// Value kinds tracked on the operand stack and in local slots.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) enum Type {
    Void,
    Byte,
    Short,
    Int,
    Boolean,
    Char,
    Long,
    Double,
    Float,
    Address,
}

impl Type {
    pub(crate) fn code(self) -> char {
        match self {
            Type::Void => 'V',
            Type::Byte => 'B',
            Type::Short => 'S',
            Type::Int => 'I',
            Type::Boolean => 'Z',
            Type::Char => 'C',
            Type::Long => 'J',
            Type::Double => 'D',
            Type::Float => 'F',
            Type::Address => 'L',
        }
    }

    /// Map a descriptor leading character to its kind; arrays are references.
    pub(crate) fn from_code(code: char) -> Option<Type> {
        let ty = match code {
            'V' => Type::Void,
            'B' => Type::Byte,
            'S' => Type::Short,
            'I' => Type::Int,
            'Z' => Type::Boolean,
            'C' => Type::Char,
            'J' => Type::Long,
            'D' => Type::Double,
            'F' => Type::Float,
            'L' | '[' => Type::Address,
            _ => return None,
        };
        Some(ty)
    }

    pub(crate) fn from_descriptor(descriptor: &TypeDescriptor) -> Type {
        match descriptor {
            TypeDescriptor::Byte => Type::Byte,
            TypeDescriptor::Char => Type::Char,
            TypeDescriptor::Double => Type::Double,
            TypeDescriptor::Float => Type::Float,
            TypeDescriptor::Integer => Type::Int,
            TypeDescriptor::Long => Type::Long,
            TypeDescriptor::Short => Type::Short,
            TypeDescriptor::Boolean => Type::Boolean,
            TypeDescriptor::Void => Type::Void,
            TypeDescriptor::Array(..) | TypeDescriptor::Object(_) => Type::Address,
        }
    }

    /// Long and double occupy two slots.
    pub(crate) fn is_wide(self) -> bool {
        matches!(self, Type::Long | Type::Double)
    }

    pub(crate) fn is_reference(self) -> bool {
        self == Type::Address
    }

    pub(crate) fn slots(self) -> usize {
        match self {
            Type::Void => 0,
            Type::Long | Type::Double => 2,
            _ => 1,
        }
    }

    /// The kind the JVM computes with: sub-int values are ints on the stack.
    pub(crate) fn stack_kind(self) -> Type {
        match self {
            Type::Byte | Type::Short | Type::Boolean | Type::Char => Type::Int,
            other => other,
        }
    }
}

/// A parameter or local slot of one method.
///
/// Identity is the owning method scope plus an ordinal assigned while decoding,
/// so two locals that share a name are still distinct variables.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct LocalVariable {
    pub(crate) scope: Arc<str>,
    pub(crate) ordinal: u32,
    pub(crate) name: String,
    pub(crate) ty: Type,
}

/// Immediate value; equal when value and type are equal.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Constant {
    pub(crate) value: String,
    pub(crate) ty: Type,
}

impl Constant {
    pub(crate) fn new(value: impl Into<String>, ty: Type) -> Self {
        Self {
            value: value.into(),
            ty,
        }
    }

    /// Result of a computation whose value is not tracked.
    pub(crate) fn unknown(ty: Type) -> Self {
        Self::new("?", ty)
    }
}

/// Field declared by a class, identified by owner and name.
#[derive(Clone, Debug)]
pub(crate) struct FieldInfo {
    pub(crate) class_name: String,
    pub(crate) name: String,
    pub(crate) ty: Type,
    pub(crate) is_static: bool,
    pub(crate) is_private: bool,
}

impl PartialEq for FieldInfo {
    fn eq(&self, other: &Self) -> bool {
        self.class_name == other.class_name && self.name == other.name
    }
}

impl Eq for FieldInfo {}

impl std::hash::Hash for FieldInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.class_name.hash(state);
        self.name.hash(state);
    }
}

/// Storage location or value flowing through a method.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) enum Variable {
    Parameter(LocalVariable),
    Local(LocalVariable),
    Field(FieldInfo),
    Constant(Constant),
}

impl Variable {
    pub(crate) fn ty(&self) -> Type {
        match self {
            Variable::Parameter(local) | Variable::Local(local) => local.ty,
            Variable::Field(field) => field.ty,
            Variable::Constant(constant) => constant.ty,
        }
    }

    pub(crate) fn is_static(&self) -> bool {
        matches!(self, Variable::Field(field) if field.is_static)
    }

    pub(crate) fn constant(value: impl Into<String>, ty: Type) -> Self {
        Variable::Constant(Constant::new(value, ty))
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Parameter(local) | Variable::Local(local) => f.write_str(&local.name),
            Variable::Field(field) => write!(f, "{}.{}", field.class_name, field.name),
            Variable::Constant(constant) => f.write_str(&constant.value),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Method visibility derived from access flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Visibility {
    Public,
    Protected,
    PackagePrivate,
    Private,
}

/// A decoded method with its translated operations.
#[derive(Clone, Debug)]
pub(crate) struct MethodInfo {
    pub(crate) class_name: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) visibility: Visibility,
    pub(crate) is_static: bool,
    pub(crate) method_this: Option<Variable>,
    pub(crate) parameters: Vec<Variable>,
    pub(crate) local_variables: Vec<Variable>,
    /// Branch, switch case, and typed catch count plus one.
    pub(crate) complexity: u64,
    pub(crate) starting_line: u32,
    pub(crate) operations: Vec<Operation>,
}

impl MethodInfo {
    /// Name plus descriptor, unique within a class.
    pub(crate) fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }

    pub(crate) fn full_name(&self) -> String {
        format!("{}.{}{}", self.class_name, self.name, self.descriptor)
    }

    pub(crate) fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub(crate) fn is_static_initializer(&self) -> bool {
        self.name == "<clinit>"
    }

    /// Whether a test double could replace this method by subclassing.
    pub(crate) fn can_override(&self) -> bool {
        !self.is_static && self.visibility != Visibility::Private && !self.is_constructor()
    }

    pub(crate) fn is_private(&self) -> bool {
        self.visibility == Visibility::Private
    }

    /// Cost of the method's own branching; a straight-line method costs 0.
    pub(crate) fn test_cost(&self) -> u64 {
        self.complexity.saturating_sub(1)
    }

    pub(crate) fn non_primitive_parameter_count(&self) -> usize {
        self.parameters
            .iter()
            .filter(|parameter| parameter.ty().is_reference())
            .count()
    }
}

/// A decoded class with methods keyed by signature and fields keyed by name.
#[derive(Clone, Debug)]
pub(crate) struct ClassInfo {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    methods: Vec<MethodInfo>,
    method_index: HashMap<String, usize>,
    fields: Vec<FieldInfo>,
}

impl ClassInfo {
    pub(crate) fn new(
        name: impl Into<String>,
        super_name: Option<String>,
        methods: Vec<MethodInfo>,
        fields: Vec<FieldInfo>,
    ) -> Self {
        let method_index = methods
            .iter()
            .enumerate()
            .map(|(index, method)| (method.signature(), index))
            .collect();
        Self {
            name: name.into(),
            super_name,
            methods,
            method_index,
            fields,
        }
    }

    pub(crate) fn method(&self, signature: &str) -> Option<&MethodInfo> {
        self.method_index
            .get(signature)
            .map(|index| &self.methods[*index])
    }

    /// Methods in declaration order.
    pub(crate) fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    pub(crate) fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }
}

impl fmt::Display for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Call site produced by stack translation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodInvocation {
    pub(crate) line: u32,
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) method_this: Option<Variable>,
    pub(crate) parameters: Vec<Variable>,
}

impl MethodInvocation {
    pub(crate) fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }
}

/// Explicit-variable operation emitted in place of stack effects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Operation {
    LocalAssignment {
        line: u32,
        variable: Variable,
        value: Variable,
    },
    /// `instance` is `None` for static fields.
    FieldAssignment {
        line: u32,
        instance: Option<Variable>,
        field: FieldInfo,
        value: Variable,
    },
    ArrayAssignment {
        line: u32,
        array: Variable,
        index: Variable,
        value: Variable,
    },
    MethodInvocation(MethodInvocation),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::LocalAssignment {
                variable, value, ..
            } => write!(f, "{variable} <- {value}"),
            Operation::FieldAssignment {
                instance,
                field,
                value,
                ..
            } => match instance {
                Some(instance) => write!(f, "{instance}.{} <- {value}", field.name),
                None => write!(f, "{}.{} <- {value}", field.class_name, field.name),
            },
            Operation::ArrayAssignment {
                array,
                index,
                value,
                ..
            } => write!(f, "{array}[{index}] <- {value}"),
            Operation::MethodInvocation(invocation) => {
                let parameters = invocation
                    .parameters
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                match &invocation.method_this {
                    Some(this) => write!(
                        f,
                        "{this}.{}{}({parameters})",
                        invocation.name, invocation.descriptor
                    ),
                    None => write!(
                        f,
                        "{}.{}{}({parameters})",
                        invocation.owner, invocation.name, invocation.descriptor
                    ),
                }
            }
        }
    }
}
