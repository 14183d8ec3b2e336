use thiserror::Error;

/// Failures raised by `KeyedMultiStack`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub(crate) enum StackError {
    #[error("stack underflow: popping {requested} value(s) from key {key}")]
    Underflow { key: String, requested: usize },
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("stacks under {keys} have different depths: {depths:?}")]
    UnevenDepth { keys: String, depths: Vec<isize> },
}

/// Failures raised while decoding, translating, or costing classes.
#[derive(Debug, Error)]
pub(crate) enum AnalysisError {
    #[error("class '{name}' was not found")]
    ClassNotFound { name: String },
    #[error("failed to read class '{class}': {message}")]
    Read { class: String, message: String },
    #[error("failed to parse class '{class}': {message}")]
    ClassFormat { class: String, message: String },
    #[error("no stack mapping for opcode 0x{opcode:02x} at offset {offset}")]
    UnmappedOpcode { opcode: u8, offset: u32 },
    #[error("malformed code at offset {offset}: {message}")]
    MalformedCode { offset: u32, message: String },
    #[error("constant pool entry {index} is not a valid {expected}")]
    BadConstant { index: u16, expected: &'static str },
    #[error("invalid descriptor '{descriptor}'")]
    Descriptor { descriptor: String },
    #[error("wide value must be followed by its duplicate, got {0}")]
    WideValueMismatch(String),
    #[error(transparent)]
    Stack(#[from] StackError),
    #[error("{class}.{method} (line {line}): {source}")]
    Method {
        class: String,
        method: String,
        line: u32,
        #[source]
        source: Box<AnalysisError>,
    },
}

impl AnalysisError {
    /// Name of the missing class when this is a recoverable lookup failure.
    pub(crate) fn missing_class(&self) -> Option<&str> {
        match self {
            AnalysisError::ClassNotFound { name } => Some(name),
            _ => None,
        }
    }

    pub(crate) fn is_missing_dependency(&self) -> bool {
        self.missing_class().is_some()
    }

    pub(crate) fn in_method(self, class: &str, method: &str, line: u32) -> AnalysisError {
        AnalysisError::Method {
            class: class.to_string(),
            method: method.to_string(),
            line,
            source: Box::new(self),
        }
    }
}
