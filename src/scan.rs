use std::str::FromStr;

use jclassfile::attributes::Attribute;
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use jclassfile::fields::FieldFlags;
use jclassfile::methods::MethodFlags;
use jdescriptor::MethodDescriptor;

use crate::bytecode::read_code;
use crate::decoder::{MethodHeader, decode_method};
use crate::error::AnalysisError;
use crate::ir::{ClassInfo, Constant, FieldInfo, Type, Visibility};

/// Class member referenced by a field or method instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MemberRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Typed access to a parsed constant pool.
pub(crate) struct ConstantPoolView<'a> {
    entries: &'a [ConstantPool],
}

impl<'a> ConstantPoolView<'a> {
    pub(crate) fn new(entries: &'a [ConstantPool]) -> Self {
        Self { entries }
    }

    pub(crate) fn utf8(&self, index: u16) -> Result<&'a str, AnalysisError> {
        match self.entries.get(index as usize) {
            Some(ConstantPool::Utf8 { value }) => Ok(value),
            _ => Err(bad_constant(index, "Utf8")),
        }
    }

    /// Dotted name of a `Class` entry.
    pub(crate) fn class_name(&self, index: u16) -> Result<String, AnalysisError> {
        match self.entries.get(index as usize) {
            Some(ConstantPool::Class { name_index }) => Ok(dotted(self.utf8(*name_index)?)),
            _ => Err(bad_constant(index, "Class")),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(&'a str, &'a str), AnalysisError> {
        match self.entries.get(index as usize) {
            Some(ConstantPool::NameAndType {
                name_index,
                descriptor_index,
            }) => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(bad_constant(index, "NameAndType")),
        }
    }

    pub(crate) fn member_ref(&self, index: u16) -> Result<MemberRef, AnalysisError> {
        match self.entries.get(index as usize) {
            Some(
                ConstantPool::Fieldref {
                    class_index,
                    name_and_type_index,
                }
                | ConstantPool::Methodref {
                    class_index,
                    name_and_type_index,
                }
                | ConstantPool::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                },
            ) => {
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                Ok(MemberRef {
                    owner: self.class_name(*class_index)?,
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                })
            }
            _ => Err(bad_constant(index, "member reference")),
        }
    }

    /// Name and descriptor of an `InvokeDynamic` call site.
    pub(crate) fn dynamic(&self, index: u16) -> Result<(String, String), AnalysisError> {
        match self.entries.get(index as usize) {
            Some(ConstantPool::InvokeDynamic {
                name_and_type_index,
                ..
            }) => {
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                Ok((name.to_string(), descriptor.to_string()))
            }
            _ => Err(bad_constant(index, "InvokeDynamic")),
        }
    }

    /// Value pushed by `ldc`, `ldc_w` or `ldc2_w`.
    pub(crate) fn loadable(&self, index: u16) -> Result<Constant, AnalysisError> {
        let constant = match self.entries.get(index as usize) {
            Some(ConstantPool::Integer { value }) => Constant::new(value.to_string(), Type::Int),
            Some(ConstantPool::Float { value }) => Constant::new(value.to_string(), Type::Float),
            Some(ConstantPool::Long { value }) => Constant::new(value.to_string(), Type::Long),
            Some(ConstantPool::Double { value }) => {
                Constant::new(value.to_string(), Type::Double)
            }
            Some(ConstantPool::String { string_index }) => {
                Constant::new(self.utf8(*string_index)?, Type::Address)
            }
            Some(ConstantPool::Class { .. }) => {
                Constant::new(format!("{}.class", self.class_name(index)?), Type::Address)
            }
            Some(ConstantPool::MethodType { descriptor_index }) => {
                Constant::new(self.utf8(*descriptor_index)?, Type::Address)
            }
            Some(ConstantPool::MethodHandle { .. }) => Constant::unknown(Type::Address),
            Some(ConstantPool::Dynamic {
                name_and_type_index,
                ..
            }) => {
                let (_, descriptor) = self.name_and_type(*name_and_type_index)?;
                Constant::unknown(field_type(descriptor)?)
            }
            _ => return Err(bad_constant(index, "loadable constant")),
        };
        Ok(constant)
    }
}

fn bad_constant(index: u16, expected: &'static str) -> AnalysisError {
    AnalysisError::BadConstant { index, expected }
}

/// Convert an internal name (`java/lang/String`) to its dotted form.
pub(crate) fn dotted(internal: &str) -> String {
    internal.replace('/', ".")
}

pub(crate) fn field_type(descriptor: &str) -> Result<Type, AnalysisError> {
    descriptor
        .chars()
        .next()
        .and_then(Type::from_code)
        .ok_or_else(|| AnalysisError::Descriptor {
            descriptor: descriptor.to_string(),
        })
}

/// Parameter kinds and return kind of a method descriptor.
pub(crate) fn method_types(descriptor: &str) -> Result<(Vec<Type>, Type), AnalysisError> {
    let parsed =
        MethodDescriptor::from_str(descriptor).map_err(|_| AnalysisError::Descriptor {
            descriptor: descriptor.to_string(),
        })?;
    let parameters = parsed
        .parameter_types()
        .iter()
        .map(Type::from_descriptor)
        .collect();
    Ok((parameters, Type::from_descriptor(parsed.return_type())))
}

/// Parse class bytes and decode every method.
///
/// `requested` names the class in errors raised before the class's own name is known.
pub(crate) fn parse_class(requested: &str, data: &[u8]) -> Result<ClassInfo, AnalysisError> {
    let class = class_file::parse(data).map_err(|error| AnalysisError::ClassFormat {
        class: requested.to_string(),
        message: format!("{error:?}"),
    })?;
    let pool = ConstantPoolView::new(class.constant_pool());
    let name = pool.class_name(class.this_class())?;
    let super_name = match class.super_class() {
        0 => None,
        index => Some(pool.class_name(index)?),
    };

    let mut fields = Vec::with_capacity(class.fields().len());
    for field in class.fields() {
        let flags = field.access_flags();
        fields.push(FieldInfo {
            class_name: name.clone(),
            name: pool.utf8(field.name_index())?.to_string(),
            ty: field_type(pool.utf8(field.descriptor_index())?)?,
            is_static: flags.contains(FieldFlags::ACC_STATIC),
            is_private: flags.contains(FieldFlags::ACC_PRIVATE),
        });
    }

    let mut methods = Vec::with_capacity(class.methods().len());
    for method in class.methods() {
        let flags = method.access_flags();
        let header = MethodHeader {
            class_name: name.clone(),
            name: pool.utf8(method.name_index())?.to_string(),
            descriptor: pool.utf8(method.descriptor_index())?.to_string(),
            visibility: visibility(flags),
            is_static: flags.contains(MethodFlags::ACC_STATIC),
        };
        let code = method
            .attributes()
            .iter()
            .find_map(|attribute| match attribute {
                Attribute::Code {
                    code,
                    exception_table,
                    attributes,
                    ..
                } => Some(read_code(code, exception_table, attributes, &pool)),
                _ => None,
            })
            .transpose()
            .map_err(|error| error.in_method(&name, &header.signature(), 0))?;
        methods.push(decode_method(header, code.as_ref())?);
    }

    Ok(ClassInfo::new(name, super_name, methods, fields))
}

fn visibility(flags: &MethodFlags) -> Visibility {
    if flags.contains(MethodFlags::ACC_PUBLIC) {
        Visibility::Public
    } else if flags.contains(MethodFlags::ACC_PRIVATE) {
        Visibility::Private
    } else if flags.contains(MethodFlags::ACC_PROTECTED) {
        Visibility::Protected
    } else {
        Visibility::PackagePrivate
    }
}
