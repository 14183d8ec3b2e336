use std::collections::HashMap;
use std::sync::Arc;

use crate::bytecode::{CodeEvent, Instruction, LocalName, MethodCode, Operand};
use crate::cfg::CfgBuilder;
use crate::error::AnalysisError;
use crate::ir::{Constant, FieldInfo, LocalVariable, MethodInfo, Type, Variable, Visibility};
use crate::opcodes;
use crate::scan::{MemberRef, field_type, method_types};
use crate::stack_ops::{Call, StackOpKind, StackOperation};
use crate::translate::translate;

/// Declaration-level facts about a method, known before its code is read.
#[derive(Clone, Debug)]
pub(crate) struct MethodHeader {
    pub(crate) class_name: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) visibility: Visibility,
    pub(crate) is_static: bool,
}

impl MethodHeader {
    /// Name plus descriptor, unique within the class.
    pub(crate) fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }
}

const LOAD_TYPES: [Type; 5] = [Type::Int, Type::Long, Type::Float, Type::Double, Type::Address];

const ARRAY_TYPES: [Type; 8] = [
    Type::Int,
    Type::Long,
    Type::Float,
    Type::Double,
    Type::Address,
    Type::Byte,
    Type::Char,
    Type::Short,
];

/// Source and target kinds of `i2l` through `i2s`.
const CONVERSIONS: [(Type, Type); 15] = [
    (Type::Int, Type::Long),
    (Type::Int, Type::Float),
    (Type::Int, Type::Double),
    (Type::Long, Type::Int),
    (Type::Long, Type::Float),
    (Type::Long, Type::Double),
    (Type::Float, Type::Int),
    (Type::Float, Type::Long),
    (Type::Float, Type::Double),
    (Type::Double, Type::Int),
    (Type::Double, Type::Long),
    (Type::Double, Type::Float),
    (Type::Int, Type::Byte),
    (Type::Int, Type::Char),
    (Type::Int, Type::Short),
];

/// Decode a method body into a `MethodInfo` with translated operations.
///
/// Methods without code (abstract or native) get complexity 1 and no operations.
pub(crate) fn decode_method(
    header: MethodHeader,
    code: Option<&MethodCode>,
) -> Result<MethodInfo, AnalysisError> {
    let (parameter_types, _) = method_types(&header.descriptor)?;
    let scope: Arc<str> = Arc::from(format!(
        "{}.{}{}",
        header.class_name, header.name, header.descriptor
    ));
    let signature = header.signature();
    let empty = MethodCode::default();
    let code = code.unwrap_or(&empty);

    let mut slots = Slots::new(scope, &code.local_names);
    let method_this = if header.is_static {
        None
    } else {
        Some(slots.parameter(0, Type::Address, "this"))
    };
    let mut slot = u16::from(!header.is_static);
    let mut parameters = Vec::with_capacity(parameter_types.len());
    for (position, ty) in parameter_types.iter().enumerate() {
        parameters.push(slots.parameter(slot, *ty, &format!("param_{position}")));
        slot += ty.slots() as u16;
    }

    let mut decoder = Decoder {
        slots,
        cfg: CfgBuilder::new(),
        complexity: 1,
        line: 0,
        starting_line: None,
    };
    decoder
        .run(code)
        .map_err(|error| error.in_method(&header.class_name, &signature, decoder.line))?;
    let starting_line = decoder.starting_line.unwrap_or(0);
    let graph = decoder.cfg.finish();
    let operations = translate(&graph)
        .map_err(|error| error.in_method(&header.class_name, &signature, starting_line))?;

    Ok(MethodInfo {
        class_name: header.class_name,
        name: header.name,
        descriptor: header.descriptor,
        visibility: header.visibility,
        is_static: header.is_static,
        method_this,
        parameters,
        local_variables: decoder.slots.locals,
        complexity: decoder.complexity,
        starting_line,
        operations,
    })
}

/// Local slot allocation for one method.
///
/// A slot gets a fresh variable whenever it is used with a different kind or
/// under a different debug name than before.
struct Slots<'a> {
    scope: Arc<str>,
    names: &'a [LocalName],
    current: HashMap<u16, Variable>,
    locals: Vec<Variable>,
    next_ordinal: u32,
}

impl<'a> Slots<'a> {
    fn new(scope: Arc<str>, names: &'a [LocalName]) -> Self {
        Self {
            scope,
            names,
            current: HashMap::new(),
            locals: Vec::new(),
            next_ordinal: 0,
        }
    }

    fn parameter(&mut self, slot: u16, ty: Type, fallback: &str) -> Variable {
        let name = self
            .debug_name(slot, 0)
            .unwrap_or(fallback)
            .to_string();
        let variable = Variable::Parameter(self.allocate(name, ty));
        self.current.insert(slot, variable.clone());
        variable
    }

    fn local(&mut self, slot: u16, ty: Type, offset: u32) -> Variable {
        let name = self.debug_name(slot, offset).map(str::to_string);
        if let Some(existing) = self.current.get(&slot) {
            let same_kind = existing.ty().stack_kind() == ty.stack_kind();
            let same_name = name
                .as_deref()
                .is_none_or(|name| existing.to_string() == name);
            if same_kind && same_name {
                return existing.clone();
            }
        }
        let name = name.unwrap_or_else(|| format!("local_{slot}"));
        let variable = Variable::Local(self.allocate(name, ty));
        self.locals.push(variable.clone());
        self.current.insert(slot, variable.clone());
        variable
    }

    fn allocate(&mut self, name: String, ty: Type) -> LocalVariable {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        LocalVariable {
            scope: self.scope.clone(),
            ordinal,
            name,
            ty,
        }
    }

    /// Closest `LocalVariableTable` entry for `slot` around `offset`; a store
    /// precedes the range it starts.
    fn debug_name(&self, slot: u16, offset: u32) -> Option<&'a str> {
        self.names
            .iter()
            .filter(|entry| entry.slot == slot)
            .min_by_key(|entry| {
                let end = entry.start + entry.length;
                if (entry.start..end).contains(&offset) {
                    0
                } else if offset < entry.start {
                    entry.start - offset
                } else {
                    u32::MAX / 2 + (offset - end)
                }
            })
            .map(|entry| entry.name.as_str())
    }
}

struct Decoder<'a> {
    slots: Slots<'a>,
    cfg: CfgBuilder,
    complexity: u64,
    line: u32,
    starting_line: Option<u32>,
}

impl Decoder<'_> {
    fn run(&mut self, code: &MethodCode) -> Result<(), AnalysisError> {
        for block in &code.try_catch_blocks {
            let exception = block
                .catch_type
                .clone()
                .unwrap_or_else(|| "java.lang.Throwable".to_string());
            if block.catch_type.is_some() {
                self.complexity += 1;
            }
            self.cfg.try_catch(
                block.start,
                block.handler,
                StackOperation::new(0, StackOpKind::Load(Variable::constant(exception, Type::Address))),
            );
        }

        for event in &code.events {
            match event {
                CodeEvent::Label(label) => self.cfg.label(*label),
                CodeEvent::Line(line) => {
                    self.line = *line;
                    self.starting_line.get_or_insert(*line);
                }
                CodeEvent::Instruction(instruction) => self.instruction(instruction)?,
            }
        }
        Ok(())
    }

    fn push(&mut self, kind: StackOpKind) {
        self.cfg.add_op(StackOperation::new(self.line, kind));
    }

    fn instruction(&mut self, instruction: &Instruction) -> Result<(), AnalysisError> {
        let opcode = instruction.opcode;
        match (opcode, &instruction.operand) {
            (opcodes::NOP, _) => {}
            (opcodes::ACONST_NULL, _) => self.load(Constant::new("null", Type::Address)),
            (opcodes::ICONST_M1..=opcodes::ICONST_5, _) => {
                let value = i32::from(opcode) - i32::from(opcodes::ICONST_0);
                self.load(Constant::new(value.to_string(), Type::Int));
            }
            (opcodes::LCONST_0..=opcodes::LCONST_1, _) => {
                let value = opcode - opcodes::LCONST_0;
                self.load(Constant::new(value.to_string(), Type::Long));
            }
            (opcodes::FCONST_0..=opcodes::FCONST_2, _) => {
                let value = opcode - opcodes::FCONST_0;
                self.load(Constant::new(format!("{value}.0"), Type::Float));
            }
            (opcodes::DCONST_0..=opcodes::DCONST_1, _) => {
                let value = opcode - opcodes::DCONST_0;
                self.load(Constant::new(format!("{value}.0"), Type::Double));
            }
            (opcodes::BIPUSH | opcodes::SIPUSH, Operand::Int(value)) => {
                self.load(Constant::new(value.to_string(), Type::Int));
            }
            (opcodes::LDC, Operand::Constant(constant)) => self.load(constant.clone()),
            (opcodes::ILOAD..=opcodes::ALOAD, Operand::Local(slot)) => {
                let ty = LOAD_TYPES[usize::from(opcode - opcodes::ILOAD)];
                let variable = self.slots.local(*slot, ty, instruction.offset);
                self.push(StackOpKind::Load(variable));
            }
            (opcodes::ISTORE..=opcodes::ASTORE, Operand::Local(slot)) => {
                let ty = LOAD_TYPES[usize::from(opcode - opcodes::ISTORE)];
                let variable = self.slots.local(*slot, ty, instruction.offset);
                self.push(StackOpKind::Store(variable));
            }
            (opcodes::IALOAD..=opcodes::SALOAD, _) => {
                let ty = ARRAY_TYPES[usize::from(opcode - opcodes::IALOAD)];
                self.push(StackOpKind::ArrayLoad(ty));
            }
            (opcodes::IASTORE..=opcodes::SASTORE, _) => {
                let ty = ARRAY_TYPES[usize::from(opcode - opcodes::IASTORE)];
                self.push(StackOpKind::ArrayStore(ty));
            }
            (opcodes::POP, _) => self.push(StackOpKind::Pop(1)),
            (opcodes::POP2, _) => self.push(StackOpKind::Pop(2)),
            (opcodes::DUP..=opcodes::DUP_X2, _) => {
                self.push(StackOpKind::Duplicate(usize::from(opcode - opcodes::DUP)));
            }
            (opcodes::DUP2..=opcodes::DUP2_X2, _) => {
                self.push(StackOpKind::Duplicate2(usize::from(opcode - opcodes::DUP2)));
            }
            (opcodes::SWAP, _) => self.push(StackOpKind::Swap),
            (opcodes::IADD..=opcodes::LXOR, _) => self.arithmetic(opcode),
            (opcodes::IINC, Operand::Increment { local, .. }) => {
                // in-place update, no stack effect
                self.slots.local(*local, Type::Int, instruction.offset);
            }
            (opcodes::I2L..=opcodes::I2S, _) => {
                let (from, to) = CONVERSIONS[usize::from(opcode - opcodes::I2L)];
                self.transform(from.slots(), Some(to));
            }
            (opcodes::LCMP, _) => self.transform(4, Some(Type::Int)),
            (opcodes::FCMPL | opcodes::FCMPG, _) => self.transform(2, Some(Type::Int)),
            (opcodes::DCMPL | opcodes::DCMPG, _) => self.transform(4, Some(Type::Int)),
            (
                opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL,
                Operand::Jump(target),
            ) => {
                self.transform(1, None);
                self.cfg.conditional_goto(*target);
                self.complexity += 1;
            }
            (opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE, Operand::Jump(target)) => {
                self.transform(2, None);
                self.cfg.conditional_goto(*target);
                self.complexity += 1;
            }
            (opcodes::GOTO, Operand::Jump(target)) => self.cfg.unconditional_goto(*target),
            (opcodes::JSR, Operand::Jump(target)) => {
                let return_address = StackOperation::new(
                    self.line,
                    StackOpKind::Load(Variable::constant("returnAddress", Type::Address)),
                );
                self.cfg.subroutine_call(*target, return_address);
            }
            (opcodes::RET, Operand::Local(_)) => self.push(StackOpKind::Return(Type::Void)),
            (opcodes::TABLESWITCH, Operand::Switch { default, cases }) => {
                self.push(StackOpKind::Pop(1));
                self.complexity += cases.iter().filter(|case| *case != default).count() as u64;
                self.cfg.switch(*default, cases);
            }
            (opcodes::LOOKUPSWITCH, Operand::Switch { default, cases }) => {
                self.push(StackOpKind::Pop(1));
                self.complexity += cases.len() as u64;
                self.cfg.switch(*default, cases);
            }
            (opcodes::IRETURN..=opcodes::ARETURN, _) => {
                let ty = LOAD_TYPES[usize::from(opcode - opcodes::IRETURN)];
                self.push(StackOpKind::Return(ty));
            }
            (opcodes::RETURN, _) => self.push(StackOpKind::Return(Type::Void)),
            (opcodes::GETSTATIC..=opcodes::PUTFIELD, Operand::Field(member)) => {
                let field = FieldInfo {
                    class_name: member.owner.clone(),
                    name: member.name.clone(),
                    ty: field_type(&member.descriptor)?,
                    is_static: matches!(opcode, opcodes::GETSTATIC | opcodes::PUTSTATIC),
                    is_private: false,
                };
                if matches!(opcode, opcodes::GETSTATIC | opcodes::GETFIELD) {
                    self.push(StackOpKind::GetField(field));
                } else {
                    self.push(StackOpKind::PutField(field));
                }
            }
            (opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE, Operand::Method(member)) => {
                let call = call(member, opcode == opcodes::INVOKESTATIC)?;
                self.push(StackOpKind::Invoke(call));
            }
            (opcodes::INVOKEDYNAMIC, Operand::Dynamic { descriptor, .. }) => {
                let (parameters, result) = method_types(descriptor)?;
                let consumes = parameters.iter().map(|ty| ty.slots()).sum();
                self.transform(consumes, Some(result).filter(|ty| *ty != Type::Void));
            }
            (opcodes::NEW, Operand::Class(class)) => {
                self.load(Constant::new(format!("new {class}"), Type::Address));
            }
            (opcodes::NEWARRAY | opcodes::ANEWARRAY, _) => self.transform(1, Some(Type::Address)),
            (opcodes::ARRAYLENGTH, _) => self.transform(1, Some(Type::Int)),
            (opcodes::ATHROW, _) => self.push(StackOpKind::Throw),
            // a cast leaves the same reference on the stack
            (opcodes::CHECKCAST, _) => {}
            (opcodes::INSTANCEOF, _) => self.transform(1, Some(Type::Int)),
            (opcodes::MONITORENTER | opcodes::MONITOREXIT, _) => self.push(StackOpKind::Pop(1)),
            (opcodes::MULTIANEWARRAY, Operand::MultiArray { dimensions, .. }) => {
                self.transform(usize::from(*dimensions), Some(Type::Address));
            }
            _ => {
                return Err(AnalysisError::UnmappedOpcode {
                    opcode,
                    offset: instruction.offset,
                });
            }
        }
        Ok(())
    }

    fn load(&mut self, constant: Constant) {
        self.push(StackOpKind::Load(Variable::Constant(constant)));
    }

    fn transform(&mut self, consumes: usize, result: Option<Type>) {
        self.push(StackOpKind::Transform {
            consumes,
            result: result.map(|ty| Variable::Constant(Constant::unknown(ty))),
        });
    }

    /// `iadd` through `lxor`.
    fn arithmetic(&mut self, opcode: u8) {
        let (ty, consumes) = match opcode {
            // add, sub, mul, div, rem for int, long, float, double
            opcodes::IADD..=opcodes::DREM => {
                let ty = LOAD_TYPES[usize::from((opcode - opcodes::IADD) % 4)];
                (ty, ty.slots() * 2)
            }
            opcodes::INEG..=opcodes::DNEG => {
                let ty = LOAD_TYPES[usize::from(opcode - opcodes::INEG)];
                (ty, ty.slots())
            }
            // shift amount is always an int
            opcodes::ISHL..=opcodes::LUSHR => {
                let ty = integral(opcode - opcodes::ISHL);
                (ty, ty.slots() + 1)
            }
            _ => {
                let ty = integral(opcode - opcodes::IAND);
                (ty, ty.slots() * 2)
            }
        };
        self.transform(consumes, Some(ty));
    }
}

fn integral(relative: u8) -> Type {
    if relative % 2 == 0 { Type::Int } else { Type::Long }
}

fn call(member: &MemberRef, is_static: bool) -> Result<Call, AnalysisError> {
    let (parameters, result) = method_types(&member.descriptor)?;
    Ok(Call {
        owner: member.owner.clone(),
        name: member.name.clone(),
        descriptor: member.descriptor.clone(),
        is_static,
        parameters,
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::TryCatchBlock;
    use crate::ir::Operation;

    fn header(name: &str, descriptor: &str, is_static: bool) -> MethodHeader {
        MethodHeader {
            class_name: "com.example.Sample".to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            visibility: Visibility::Public,
            is_static,
        }
    }

    fn op(offset: u32, opcode: u8, operand: Operand) -> CodeEvent {
        CodeEvent::Instruction(Instruction {
            offset,
            opcode,
            operand,
        })
    }

    fn code(events: Vec<CodeEvent>) -> MethodCode {
        MethodCode {
            events,
            ..MethodCode::default()
        }
    }

    #[test]
    fn if_else_adds_one_to_complexity() {
        // static int choose(boolean flag) { return flag ? 1 : 2; }
        let body = code(vec![
            CodeEvent::Line(3),
            op(0, opcodes::ILOAD, Operand::Local(0)),
            op(1, opcodes::IFEQ, Operand::Jump(6)),
            op(4, opcodes::ICONST_1, Operand::None),
            op(5, opcodes::IRETURN, Operand::None),
            CodeEvent::Label(6),
            CodeEvent::Line(4),
            op(6, opcodes::ICONST_2, Operand::None),
            op(7, opcodes::IRETURN, Operand::None),
        ]);

        let method = decode_method(header("choose", "(Z)I", true), Some(&body)).expect("decode");

        assert_eq!(2, method.complexity);
        assert_eq!(1, method.test_cost());
        assert_eq!(3, method.starting_line);
        assert!(method.method_this.is_none());
        assert_eq!(1, method.parameters.len());
        assert!(method.operations.is_empty());
    }

    #[test]
    fn stores_become_local_assignments_with_debug_names() {
        // void keep(Object value) { Object copy = value; }
        let mut body = code(vec![
            CodeEvent::Line(10),
            op(0, opcodes::ALOAD, Operand::Local(1)),
            op(1, opcodes::ASTORE, Operand::Local(2)),
            op(2, opcodes::RETURN, Operand::None),
        ]);
        body.local_names = vec![
            LocalName {
                slot: 1,
                start: 0,
                length: 3,
                name: "value".to_string(),
                descriptor: "Ljava/lang/Object;".to_string(),
            },
            LocalName {
                slot: 2,
                start: 2,
                length: 1,
                name: "copy".to_string(),
                descriptor: "Ljava/lang/Object;".to_string(),
            },
        ];

        let method = decode_method(header("keep", "(Ljava/lang/Object;)V", false), Some(&body))
            .expect("decode");

        assert_eq!(Some("this"), method.method_this.as_ref().map(|this| this.to_string()).as_deref());
        assert_eq!(1, method.local_variables.len());
        match &method.operations[..] {
            [Operation::LocalAssignment { line, variable, value }] => {
                assert_eq!(10, *line);
                assert_eq!("copy", variable.to_string());
                assert_eq!(&method.parameters[0], value);
                assert_eq!("value", value.to_string());
            }
            other => panic!("unexpected operations {other:?}"),
        }
    }

    #[test]
    fn wide_parameters_take_two_slots() {
        // static void run(long a, int b) { int c = b; }
        let body = code(vec![
            op(0, opcodes::ILOAD, Operand::Local(2)),
            op(1, opcodes::ISTORE, Operand::Local(3)),
            op(2, opcodes::RETURN, Operand::None),
        ]);

        let method = decode_method(header("run", "(JI)V", true), Some(&body)).expect("decode");

        match &method.operations[..] {
            [Operation::LocalAssignment { value, .. }] => assert_eq!(&method.parameters[1], value),
            other => panic!("unexpected operations {other:?}"),
        }
    }

    #[test]
    fn switch_cases_and_typed_catches_count() {
        let mut body = code(vec![
            CodeEvent::Label(0),
            op(0, opcodes::ILOAD, Operand::Local(0)),
            op(
                1,
                opcodes::TABLESWITCH,
                Operand::Switch {
                    default: 30,
                    cases: vec![28, 29, 30],
                },
            ),
            CodeEvent::Label(28),
            op(28, opcodes::RETURN, Operand::None),
            CodeEvent::Label(29),
            op(29, opcodes::RETURN, Operand::None),
            CodeEvent::Label(30),
            op(30, opcodes::ASTORE, Operand::Local(1)),
            op(31, opcodes::RETURN, Operand::None),
        ]);
        body.try_catch_blocks = vec![
            TryCatchBlock {
                start: 0,
                end: 28,
                handler: 30,
                catch_type: Some("java.io.IOException".to_string()),
            },
            TryCatchBlock {
                start: 0,
                end: 28,
                handler: 30,
                catch_type: None,
            },
        ];

        let method = decode_method(header("pick", "(I)V", true), Some(&body)).expect("decode");

        // base 1, two non-default cases, one typed catch
        assert_eq!(4, method.complexity);
        assert!(method.operations.iter().any(|operation| matches!(
            operation,
            Operation::LocalAssignment { value: Variable::Constant(constant), .. }
                if constant.value == "java.io.IOException"
        )));
    }

    #[test]
    fn unmapped_opcode_carries_method_context() {
        let body = code(vec![CodeEvent::Line(7), op(0, 0xcb, Operand::None)]);

        let error = decode_method(header("broken", "()V", true), Some(&body)).expect_err("unmapped");

        match error {
            AnalysisError::Method {
                class,
                method,
                line,
                source,
            } => {
                assert_eq!("com.example.Sample", class);
                assert_eq!("broken()V", method);
                assert_eq!(7, line);
                assert!(matches!(*source, AnalysisError::UnmappedOpcode { opcode: 0xcb, .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn abstract_methods_have_unit_complexity() {
        let method = decode_method(header("run", "(Ljava/lang/String;)V", false), None)
            .expect("decode");

        assert_eq!(1, method.complexity);
        assert_eq!(0, method.starting_line);
        assert!(method.operations.is_empty());
        assert_eq!(1, method.non_primitive_parameter_count());
    }

    #[test]
    fn static_field_write_is_a_field_assignment() {
        // static void reset() { COUNT = 0; }
        let body = code(vec![
            CodeEvent::Line(5),
            op(0, opcodes::ICONST_0, Operand::None),
            op(
                1,
                opcodes::PUTSTATIC,
                Operand::Field(MemberRef {
                    owner: "com.example.Sample".to_string(),
                    name: "COUNT".to_string(),
                    descriptor: "I".to_string(),
                }),
            ),
            op(4, opcodes::RETURN, Operand::None),
        ]);

        let method = decode_method(header("reset", "()V", true), Some(&body)).expect("decode");

        match &method.operations[..] {
            [Operation::FieldAssignment { instance: None, field, value, .. }] => {
                assert!(field.is_static);
                assert_eq!("COUNT", field.name);
                assert_eq!(&Variable::constant("0", Type::Int), value);
            }
            other => panic!("unexpected operations {other:?}"),
        }
    }
}
