//! Minimal class-file assembler for tests.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::error::AnalysisError;
use crate::repository::ClassSource;

const MAGIC: u32 = 0xCAFE_BABE;
const MAJOR_VERSION: u16 = 52;

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_PRIVATE: u16 = 0x0002;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_SUPER: u16 = 0x0020;
pub(crate) const ACC_INTERFACE: u16 = 0x0200;
pub(crate) const ACC_ABSTRACT: u16 = 0x0400;

/// Builds class-file bytes with a deduplicated constant pool.
pub(crate) struct ClassWriter {
    access: u16,
    this_class: u16,
    super_class: u16,
    pool: Vec<Vec<u8>>,
    pool_index: HashMap<Vec<u8>, u16>,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
}

impl ClassWriter {
    /// `name` and `super_name` use internal form (`com/example/Sample`).
    pub(crate) fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut writer = Self {
            access: ACC_PUBLIC | ACC_SUPER,
            this_class: 0,
            super_class: 0,
            pool: Vec::new(),
            pool_index: HashMap::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        };
        writer.this_class = writer.class(name);
        writer.super_class = super_name.map(|name| writer.class(name)).unwrap_or(0);
        writer
    }

    pub(crate) fn access(&mut self, access: u16) -> &mut Self {
        self.access = access;
        self
    }

    pub(crate) fn field(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        let mut bytes = Vec::new();
        push_u16(&mut bytes, access);
        push_u16(&mut bytes, self.utf8(name));
        push_u16(&mut bytes, self.utf8(descriptor));
        push_u16(&mut bytes, 0);
        self.fields.push(bytes);
        self
    }

    pub(crate) fn method(&mut self, access: u16, name: &str, descriptor: &str) -> MethodWriter<'_> {
        MethodWriter {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: Vec::new(),
            lines: Vec::new(),
            labels: HashMap::new(),
            jumps: Vec::new(),
            handlers: Vec::new(),
            locals: Vec::new(),
            class: self,
        }
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_be_bytes());
        push_u16(&mut bytes, 0);
        push_u16(&mut bytes, MAJOR_VERSION);
        push_u16(&mut bytes, self.pool.len() as u16 + 1);
        for entry in &self.pool {
            bytes.extend_from_slice(entry);
        }
        push_u16(&mut bytes, self.access);
        push_u16(&mut bytes, self.this_class);
        push_u16(&mut bytes, self.super_class);
        push_u16(&mut bytes, 0);
        push_u16(&mut bytes, self.fields.len() as u16);
        for field in &self.fields {
            bytes.extend_from_slice(field);
        }
        push_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            bytes.extend_from_slice(method);
        }
        push_u16(&mut bytes, 0);
        bytes
    }

    fn constant(&mut self, entry: Vec<u8>) -> u16 {
        if let Some(index) = self.pool_index.get(&entry) {
            return *index;
        }
        self.pool.push(entry.clone());
        let index = self.pool.len() as u16;
        self.pool_index.insert(entry, index);
        index
    }

    fn utf8(&mut self, value: &str) -> u16 {
        let mut entry = vec![1];
        push_u16(&mut entry, value.len() as u16);
        entry.extend_from_slice(value.as_bytes());
        self.constant(entry)
    }

    fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        let mut entry = vec![7];
        push_u16(&mut entry, name);
        self.constant(entry)
    }

    fn string(&mut self, value: &str) -> u16 {
        let value = self.utf8(value);
        let mut entry = vec![8];
        push_u16(&mut entry, value);
        self.constant(entry)
    }

    fn member(&mut self, tag: u8, owner: &str, name: &str, descriptor: &str) -> u16 {
        let owner = self.class(owner);
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut name_and_type = vec![12];
        push_u16(&mut name_and_type, name);
        push_u16(&mut name_and_type, descriptor);
        let name_and_type = self.constant(name_and_type);
        let mut entry = vec![tag];
        push_u16(&mut entry, owner);
        push_u16(&mut entry, name_and_type);
        self.constant(entry)
    }
}

/// Appends one method to its `ClassWriter` on `finish`.
pub(crate) struct MethodWriter<'a> {
    class: &'a mut ClassWriter,
    access: u16,
    name: String,
    descriptor: String,
    code: Vec<u8>,
    lines: Vec<(u16, u16)>,
    labels: HashMap<String, u16>,
    /// Opcode offset, operand offset, and target label of each branch.
    jumps: Vec<(usize, usize, String)>,
    handlers: Vec<(String, String, String, Option<String>)>,
    locals: Vec<(u16, String, String)>,
}

impl MethodWriter<'_> {
    pub(crate) fn op(mut self, opcode: u8) -> Self {
        self.code.push(opcode);
        self
    }

    /// Opcode with a one byte operand, such as `aload` or `bipush`.
    pub(crate) fn op_u8(mut self, opcode: u8, operand: u8) -> Self {
        self.code.push(opcode);
        self.code.push(operand);
        self
    }

    /// Following instructions belong to source `line`.
    pub(crate) fn line(mut self, line: u16) -> Self {
        self.lines.push((self.code.len() as u16, line));
        self
    }

    pub(crate) fn label(mut self, name: &str) -> Self {
        self.labels.insert(name.to_string(), self.code.len() as u16);
        self
    }

    /// Branch instruction with a 16-bit offset to `label`.
    pub(crate) fn jump(mut self, opcode: u8, label: &str) -> Self {
        let at = self.code.len();
        self.code.push(opcode);
        self.code.extend_from_slice(&[0, 0]);
        self.jumps.push((at, at + 1, label.to_string()));
        self
    }

    /// `getstatic`, `putstatic`, `getfield` or `putfield`.
    pub(crate) fn field_op(mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) -> Self {
        let index = self.class.member(9, owner, name, descriptor);
        self.code.push(opcode);
        push_u16(&mut self.code, index);
        self
    }

    /// `invokevirtual`, `invokespecial`, `invokestatic` or `invokeinterface`.
    pub(crate) fn invoke(mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) -> Self {
        let interface = opcode == crate::opcodes::INVOKEINTERFACE;
        let tag = if interface { 11 } else { 10 };
        let index = self.class.member(tag, owner, name, descriptor);
        self.code.push(opcode);
        push_u16(&mut self.code, index);
        if interface {
            let (parameters, _) =
                crate::scan::method_types(descriptor).unwrap_or((Vec::new(), crate::ir::Type::Void));
            let slots: usize = parameters.iter().map(|ty| ty.slots()).sum();
            self.code.push(slots as u8 + 1);
            self.code.push(0);
        }
        self
    }

    /// `new`, `checkcast`, `instanceof` or `anewarray`.
    pub(crate) fn type_op(mut self, opcode: u8, class: &str) -> Self {
        let index = self.class.class(class);
        self.code.push(opcode);
        push_u16(&mut self.code, index);
        self
    }

    /// `ldc_w` of a string constant.
    pub(crate) fn ldc_string(mut self, value: &str) -> Self {
        let index = self.class.string(value);
        self.code.push(crate::opcodes::LDC_W);
        push_u16(&mut self.code, index);
        self
    }

    pub(crate) fn try_catch(mut self, start: &str, end: &str, handler: &str, catch_type: Option<&str>) -> Self {
        self.handlers.push((
            start.to_string(),
            end.to_string(),
            handler.to_string(),
            catch_type.map(str::to_string),
        ));
        self
    }

    /// `LocalVariableTable` entry covering the whole body.
    pub(crate) fn local(mut self, slot: u16, name: &str, descriptor: &str) -> Self {
        self.locals.push((slot, name.to_string(), descriptor.to_string()));
        self
    }

    /// Append the method with a `Code` attribute.
    pub(crate) fn finish(mut self) {
        for (at, operand, label) in std::mem::take(&mut self.jumps) {
            let target = self.label_offset(&label);
            let relative = (i32::from(target) - at as i32) as i16;
            self.code[operand..operand + 2].copy_from_slice(&relative.to_be_bytes());
        }

        let mut table = Vec::new();
        push_u16(&mut table, self.handlers.len() as u16);
        for (start, end, handler, catch_type) in std::mem::take(&mut self.handlers) {
            push_u16(&mut table, self.label_offset(&start));
            push_u16(&mut table, self.label_offset(&end));
            push_u16(&mut table, self.label_offset(&handler));
            let catch_type = catch_type.map(|name| self.class.class(&name)).unwrap_or(0);
            push_u16(&mut table, catch_type);
        }

        let mut attributes = Vec::new();
        let mut attribute_count = 0u16;
        if !self.lines.is_empty() {
            attribute_count += 1;
            push_u16(&mut attributes, self.class.utf8("LineNumberTable"));
            push_u32(&mut attributes, 2 + 4 * self.lines.len() as u32);
            push_u16(&mut attributes, self.lines.len() as u16);
            for (start, line) in &self.lines {
                push_u16(&mut attributes, *start);
                push_u16(&mut attributes, *line);
            }
        }
        if !self.locals.is_empty() {
            attribute_count += 1;
            push_u16(&mut attributes, self.class.utf8("LocalVariableTable"));
            push_u32(&mut attributes, 2 + 10 * self.locals.len() as u32);
            push_u16(&mut attributes, self.locals.len() as u16);
            for (slot, name, descriptor) in std::mem::take(&mut self.locals) {
                push_u16(&mut attributes, 0);
                push_u16(&mut attributes, self.code.len() as u16);
                push_u16(&mut attributes, self.class.utf8(&name));
                push_u16(&mut attributes, self.class.utf8(&descriptor));
                push_u16(&mut attributes, slot);
            }
        }

        let mut body = Vec::new();
        push_u16(&mut body, 16);
        push_u16(&mut body, 16);
        push_u32(&mut body, self.code.len() as u32);
        body.extend_from_slice(&self.code);
        body.extend_from_slice(&table);
        push_u16(&mut body, attribute_count);
        body.extend_from_slice(&attributes);

        let code_name = self.class.utf8("Code");
        let mut method = self.header(1);
        push_u16(&mut method, code_name);
        push_u32(&mut method, body.len() as u32);
        method.extend_from_slice(&body);
        self.class.methods.push(method);
    }

    /// Append the method without code, as for abstract or native methods.
    pub(crate) fn finish_abstract(mut self) {
        let method = self.header(0);
        self.class.methods.push(method);
    }

    fn header(&mut self, attribute_count: u16) -> Vec<u8> {
        let mut method = Vec::new();
        push_u16(&mut method, self.access);
        let name = self.name.clone();
        let descriptor = self.descriptor.clone();
        push_u16(&mut method, self.class.utf8(&name));
        push_u16(&mut method, self.class.utf8(&descriptor));
        push_u16(&mut method, attribute_count);
        method
    }

    fn label_offset(&self, label: &str) -> u16 {
        match self.labels.get(label) {
            Some(offset) => *offset,
            None => panic!("undefined label {label}"),
        }
    }
}

fn push_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn push_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

/// Class bytes held in memory, keyed by dotted class name.
#[derive(Default)]
pub(crate) struct MemorySource {
    classes: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub(crate) fn with(self, writer: &ClassWriter, name: &str) -> Self {
        self.with_bytes(name, writer.to_bytes())
    }

    pub(crate) fn with_bytes(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.classes.insert(name.to_string(), bytes);
        self
    }
}

impl ClassSource for MemorySource {
    fn read_class(&mut self, name: &str) -> Result<Option<Vec<u8>>, AnalysisError> {
        Ok(self.classes.get(name).cloned())
    }
}

/// Log lines emitted while `run` executes, formatted without colour.
pub(crate) fn capture_logs<T>(run: impl FnOnce() -> T) -> (T, String) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, run);
    let bytes = logs.0.lock().expect("log buffer").clone();
    (result, String::from_utf8(bytes).expect("utf-8 logs"))
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
