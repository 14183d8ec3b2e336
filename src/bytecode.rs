use std::collections::{BTreeMap, BTreeSet};

use jclassfile::attributes::{Attribute, ExceptionRecord};

use crate::error::AnalysisError;
use crate::ir::Constant;
use crate::opcodes;
use crate::scan::{ConstantPoolView, MemberRef};

/// Label identifier; the bytecode offset it marks.
pub(crate) type Label = u32;

/// Flat record of one method body, in program order.
#[derive(Clone, Debug, Default)]
pub(crate) struct MethodCode {
    pub(crate) events: Vec<CodeEvent>,
    pub(crate) try_catch_blocks: Vec<TryCatchBlock>,
    pub(crate) local_names: Vec<LocalName>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum CodeEvent {
    /// Start of a jump target or exception range.
    Label(Label),
    Line(u32),
    Instruction(Instruction),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TryCatchBlock {
    pub(crate) start: Label,
    pub(crate) end: Label,
    pub(crate) handler: Label,
    /// `None` for `finally` handlers.
    pub(crate) catch_type: Option<String>,
}

/// Entry of the `LocalVariableTable`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LocalName {
    pub(crate) slot: u16,
    pub(crate) start: u32,
    pub(crate) length: u32,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Instruction with resolved constant pool operands.
///
/// Short forms such as `iload_2` and `wide` prefixes are normalized to the
/// base opcode with an explicit slot operand; `goto_w`/`jsr_w` become
/// `goto`/`jsr`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) operand: Operand,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Operand {
    None,
    Local(u16),
    Increment { local: u16, amount: i16 },
    Int(i32),
    Constant(Constant),
    Class(String),
    Field(MemberRef),
    Method(MemberRef),
    Dynamic { name: String, descriptor: String },
    Jump(Label),
    Switch { default: Label, cases: Vec<Label> },
    MultiArray { class: String, dimensions: u8 },
}

/// Read a `Code` attribute into labelled events.
pub(crate) fn read_code(
    code: &[u8],
    exception_table: &[ExceptionRecord],
    attributes: &[Attribute],
    pool: &ConstantPoolView<'_>,
) -> Result<MethodCode, AnalysisError> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let (instruction, length) = read_instruction(code, offset, pool)?;
        instructions.push(instruction);
        offset += length;
    }

    let mut labels = BTreeSet::new();
    for instruction in &instructions {
        match &instruction.operand {
            Operand::Jump(target) => {
                labels.insert(*target);
            }
            Operand::Switch { default, cases } => {
                labels.insert(*default);
                labels.extend(cases.iter().copied());
            }
            _ => {}
        }
    }

    let mut try_catch_blocks = Vec::with_capacity(exception_table.len());
    for record in exception_table {
        let catch_type = match record.catch_type() {
            0 => None,
            index => Some(pool.class_name(index)?),
        };
        let block = TryCatchBlock {
            start: u32::from(record.start_pc()),
            end: u32::from(record.end_pc()),
            handler: u32::from(record.handler_pc()),
            catch_type,
        };
        labels.insert(block.start);
        labels.insert(block.handler);
        try_catch_blocks.push(block);
    }
    let starts: BTreeSet<u32> = instructions
        .iter()
        .map(|instruction| instruction.offset)
        .collect();
    if let Some(label) = labels.iter().find(|label| !starts.contains(label)) {
        return Err(AnalysisError::MalformedCode {
            offset: *label,
            message: "label does not start an instruction".to_string(),
        });
    }

    let mut lines = BTreeMap::new();
    let mut local_names = Vec::new();
    for attribute in attributes {
        match attribute {
            Attribute::LineNumberTable { line_number_table } => {
                for record in line_number_table {
                    lines.insert(
                        u32::from(record.start_pc()),
                        u32::from(record.line_number()),
                    );
                }
            }
            Attribute::LocalVariableTable {
                local_variable_table,
            } => {
                for record in local_variable_table {
                    local_names.push(LocalName {
                        slot: record.index(),
                        start: u32::from(record.start_pc()),
                        length: u32::from(record.length()),
                        name: pool.utf8(record.name_index())?.to_string(),
                        descriptor: pool.utf8(record.descriptor_index())?.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    let mut events = Vec::with_capacity(instructions.len() + labels.len() + lines.len());
    for instruction in instructions {
        if labels.contains(&instruction.offset) {
            events.push(CodeEvent::Label(instruction.offset));
        }
        if let Some(line) = lines.get(&instruction.offset) {
            events.push(CodeEvent::Line(*line));
        }
        events.push(CodeEvent::Instruction(instruction));
    }

    Ok(MethodCode {
        events,
        try_catch_blocks,
        local_names,
    })
}

fn read_instruction(
    code: &[u8],
    offset: usize,
    pool: &ConstantPoolView<'_>,
) -> Result<(Instruction, usize), AnalysisError> {
    let opcode = read_u8(code, offset)?;
    let at = offset as u32;
    let (opcode, operand, length) = match opcode {
        opcodes::NOP..=opcodes::DCONST_1 => (opcode, Operand::None, 1),
        opcodes::BIPUSH => (
            opcode,
            Operand::Int(i32::from(read_u8(code, offset + 1)? as i8)),
            2,
        ),
        opcodes::SIPUSH => (opcode, Operand::Int(i32::from(read_i16(code, offset + 1)?)), 3),
        opcodes::LDC => {
            let index = u16::from(read_u8(code, offset + 1)?);
            (opcode, Operand::Constant(pool.loadable(index)?), 2)
        }
        opcodes::LDC_W | opcodes::LDC2_W => {
            let index = read_u16(code, offset + 1)?;
            (opcodes::LDC, Operand::Constant(pool.loadable(index)?), 3)
        }
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => (
            opcode,
            Operand::Local(u16::from(read_u8(code, offset + 1)?)),
            2,
        ),
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let relative = opcode - opcodes::ILOAD_0;
            (
                opcodes::ILOAD + relative / 4,
                Operand::Local(u16::from(relative % 4)),
                1,
            )
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let relative = opcode - opcodes::ISTORE_0;
            (
                opcodes::ISTORE + relative / 4,
                Operand::Local(u16::from(relative % 4)),
                1,
            )
        }
        opcodes::IALOAD..=opcodes::SALOAD
        | opcodes::IASTORE..=opcodes::LXOR
        | opcodes::I2L..=opcodes::DCMPG
        | opcodes::IRETURN..=opcodes::RETURN
        | opcodes::ARRAYLENGTH
        | opcodes::ATHROW
        | opcodes::MONITORENTER
        | opcodes::MONITOREXIT => (opcode, Operand::None, 1),
        opcodes::IINC => (
            opcode,
            Operand::Increment {
                local: u16::from(read_u8(code, offset + 1)?),
                amount: i16::from(read_u8(code, offset + 2)? as i8),
            },
            3,
        ),
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            let target = jump_target(code, offset, i32::from(read_i16(code, offset + 1)?))?;
            (opcode, Operand::Jump(target), 3)
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            let target = jump_target(code, offset, read_i32(code, offset + 1)?)?;
            let opcode = if opcode == opcodes::GOTO_W {
                opcodes::GOTO
            } else {
                opcodes::JSR
            };
            (opcode, Operand::Jump(target), 5)
        }
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let default = jump_target(code, offset, read_i32(code, base)?)?;
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let count = high
                .checked_sub(low)
                .and_then(|range| range.checked_add(1))
                .filter(|count| *count >= 0)
                .ok_or_else(|| AnalysisError::MalformedCode {
                    offset: at,
                    message: format!("invalid tableswitch range {low}..{high}"),
                })? as usize;
            check_table_fits(code, at, base + 12, count, 4)?;
            let mut cases = Vec::with_capacity(count);
            for index in 0..count {
                cases.push(jump_target(
                    code,
                    offset,
                    read_i32(code, base + 12 + index * 4)?,
                )?);
            }
            (opcode, Operand::Switch { default, cases }, base + 12 + count * 4 - offset)
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let default = jump_target(code, offset, read_i32(code, base)?)?;
            let pairs = read_i32(code, base + 4)?;
            if pairs < 0 {
                return Err(AnalysisError::MalformedCode {
                    offset: at,
                    message: format!("negative lookupswitch pair count {pairs}"),
                });
            }
            let pairs = pairs as usize;
            check_table_fits(code, at, base + 8, pairs, 8)?;
            let mut cases = Vec::with_capacity(pairs);
            for index in 0..pairs {
                cases.push(jump_target(
                    code,
                    offset,
                    read_i32(code, base + 8 + index * 8 + 4)?,
                )?);
            }
            (opcode, Operand::Switch { default, cases }, base + 8 + pairs * 8 - offset)
        }
        opcodes::GETSTATIC..=opcodes::PUTFIELD => (
            opcode,
            Operand::Field(pool.member_ref(read_u16(code, offset + 1)?)?),
            3,
        ),
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKESTATIC => (
            opcode,
            Operand::Method(pool.member_ref(read_u16(code, offset + 1)?)?),
            3,
        ),
        opcodes::INVOKEINTERFACE => (
            opcode,
            Operand::Method(pool.member_ref(read_u16(code, offset + 1)?)?),
            5,
        ),
        opcodes::INVOKEDYNAMIC => {
            let (name, descriptor) = pool.dynamic(read_u16(code, offset + 1)?)?;
            (opcode, Operand::Dynamic { name, descriptor }, 5)
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => (
            opcode,
            Operand::Class(pool.class_name(read_u16(code, offset + 1)?)?),
            3,
        ),
        opcodes::NEWARRAY => (
            opcode,
            Operand::Int(i32::from(read_u8(code, offset + 1)?)),
            2,
        ),
        opcodes::WIDE => {
            let widened = read_u8(code, offset + 1)?;
            let local = read_u16(code, offset + 2)?;
            match widened {
                opcodes::IINC => (
                    widened,
                    Operand::Increment {
                        local,
                        amount: read_i16(code, offset + 4)?,
                    },
                    6,
                ),
                opcodes::ILOAD..=opcodes::ALOAD
                | opcodes::ISTORE..=opcodes::ASTORE
                | opcodes::RET => (widened, Operand::Local(local), 4),
                _ => {
                    return Err(AnalysisError::UnmappedOpcode {
                        opcode: widened,
                        offset: at,
                    });
                }
            }
        }
        opcodes::MULTIANEWARRAY => (
            opcode,
            Operand::MultiArray {
                class: pool.class_name(read_u16(code, offset + 1)?)?,
                dimensions: read_u8(code, offset + 3)?,
            },
            4,
        ),
        _ => return Err(AnalysisError::UnmappedOpcode { opcode, offset: at }),
    };

    Ok((
        Instruction {
            offset: at,
            opcode,
            operand,
        },
        length,
    ))
}

fn jump_target(code: &[u8], offset: usize, relative: i32) -> Result<Label, AnalysisError> {
    let target = offset as i64 + i64::from(relative);
    if target < 0 || target >= code.len() as i64 {
        return Err(AnalysisError::MalformedCode {
            offset: offset as u32,
            message: format!("jump target {target} outside of code"),
        });
    }
    Ok(target as Label)
}

/// Alignment bytes after a switch opcode.
pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

/// A switch table of `count` entries must fit in the remaining code.
fn check_table_fits(
    code: &[u8],
    at: u32,
    start: usize,
    count: usize,
    entry_size: usize,
) -> Result<(), AnalysisError> {
    if count > code.len().saturating_sub(start) / entry_size {
        return Err(AnalysisError::MalformedCode {
            offset: at,
            message: format!("switch table of {count} entries exceeds the code length"),
        });
    }
    Ok(())
}

fn read_u8(code: &[u8], offset: usize) -> Result<u8, AnalysisError> {
    code.get(offset)
        .copied()
        .ok_or_else(|| truncated(offset))
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16, AnalysisError> {
    let bytes = code.get(offset..offset + 2).ok_or_else(|| truncated(offset))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(code: &[u8], offset: usize) -> Result<u32, AnalysisError> {
    let bytes = code.get(offset..offset + 4).ok_or_else(|| truncated(offset))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16, AnalysisError> {
    let value = read_u16(code, offset)?;
    Ok(i16::from_be_bytes(value.to_be_bytes()))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32, AnalysisError> {
    let value = read_u32(code, offset)?;
    Ok(i32::from_be_bytes(value.to_be_bytes()))
}

fn truncated(offset: usize) -> AnalysisError {
    AnalysisError::MalformedCode {
        offset: offset as u32,
        message: "truncated instruction".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jclassfile::constant_pool::ConstantPool;

    fn empty_pool() -> Vec<ConstantPool> {
        vec![ConstantPool::Empty]
    }

    fn instructions(code: &MethodCode) -> Vec<&Instruction> {
        code.events
            .iter()
            .filter_map(|event| match event {
                CodeEvent::Instruction(instruction) => Some(instruction),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn short_forms_are_normalized() {
        let entries = empty_pool();
        let pool = ConstantPoolView::new(&entries);
        // iload_1, istore_2, aload_0, return
        let code = [0x1b, 0x3d, 0x2a, 0xb1];

        let method = read_code(&code, &[], &[], &pool).expect("read code");
        let instructions = instructions(&method);

        assert_eq!(opcodes::ILOAD, instructions[0].opcode);
        assert_eq!(Operand::Local(1), instructions[0].operand);
        assert_eq!(opcodes::ISTORE, instructions[1].opcode);
        assert_eq!(Operand::Local(2), instructions[1].operand);
        assert_eq!(opcodes::ALOAD, instructions[2].opcode);
        assert_eq!(Operand::Local(0), instructions[2].operand);
    }

    #[test]
    fn jump_targets_become_labels_before_their_instruction() {
        let entries = empty_pool();
        let pool = ConstantPoolView::new(&entries);
        // 0: iload_0, 1: ifeq +5 (-> 6), 4: iconst_1, 5: ireturn, 6: iconst_0, 7: ireturn
        let code = [0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];

        let method = read_code(&code, &[], &[], &pool).expect("read code");

        let label_position = method
            .events
            .iter()
            .position(|event| *event == CodeEvent::Label(6))
            .expect("label for jump target");
        match &method.events[label_position + 1] {
            CodeEvent::Instruction(instruction) => assert_eq!(6, instruction.offset),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            Operand::Jump(6),
            instructions(&method)[1].operand,
        );
    }

    #[test]
    fn tableswitch_reads_padded_targets() {
        let entries = empty_pool();
        let pool = ConstantPoolView::new(&entries);
        // 0: iload_0, 1: tableswitch (pad 2) default=+25 low=0 high=1 [+23, +24]
        let mut code = vec![0x1a, 0xaa, 0x00, 0x00];
        code.extend_from_slice(&25i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&23i32.to_be_bytes());
        code.extend_from_slice(&24i32.to_be_bytes());
        // 24: return x3
        code.extend_from_slice(&[0xb1, 0xb1, 0xb1]);

        let method = read_code(&code, &[], &[], &pool).expect("read code");
        let instructions = instructions(&method);

        assert_eq!(
            Operand::Switch {
                default: 26,
                cases: vec![24, 25],
            },
            instructions[1].operand
        );
        assert_eq!(24, instructions[2].offset);
    }

    #[test]
    fn oversized_switch_tables_are_malformed() {
        let entries = empty_pool();
        let pool = ConstantPoolView::new(&entries);
        // 0: iload_0, 1: tableswitch (pad 2) default=+4 low=0 high=i32::MAX - 1
        let mut table = vec![0x1a, 0xaa, 0x00, 0x00];
        table.extend_from_slice(&4i32.to_be_bytes());
        table.extend_from_slice(&0i32.to_be_bytes());
        table.extend_from_slice(&(i32::MAX - 1).to_be_bytes());
        table.push(0xb1);
        // 0: iload_0, 1: lookupswitch (pad 2) default=+4 npairs=i32::MAX
        let mut lookup = vec![0x1a, 0xab, 0x00, 0x00];
        lookup.extend_from_slice(&4i32.to_be_bytes());
        lookup.extend_from_slice(&i32::MAX.to_be_bytes());
        lookup.push(0xb1);

        for code in [table, lookup] {
            let error = read_code(&code, &[], &[], &pool).expect_err("oversized table");

            assert!(matches!(error, AnalysisError::MalformedCode { offset: 1, .. }));
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let entries = empty_pool();
        let pool = ConstantPoolView::new(&entries);
        let code = [0xcb];

        let error = read_code(&code, &[], &[], &pool).expect_err("unmapped opcode");

        assert!(matches!(
            error,
            AnalysisError::UnmappedOpcode {
                opcode: 0xcb,
                offset: 0
            }
        ));
    }

    #[test]
    fn jump_outside_code_is_malformed() {
        let entries = empty_pool();
        let pool = ConstantPoolView::new(&entries);
        let code = [0xa7, 0x00, 0x10];

        let error = read_code(&code, &[], &[], &pool).expect_err("bad jump");

        assert!(matches!(error, AnalysisError::MalformedCode { offset: 0, .. }));
    }

    #[test]
    fn wide_iinc_reads_sixteen_bit_operands() {
        let entries = empty_pool();
        let pool = ConstantPoolView::new(&entries);
        let code = [0xc4, 0x84, 0x01, 0x00, 0xff, 0xfe, 0xb1];

        let method = read_code(&code, &[], &[], &pool).expect("read code");

        assert_eq!(
            Operand::Increment {
                local: 256,
                amount: -2
            },
            instructions(&method)[0].operand
        );
    }
}
