use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::AnalysisError;
use crate::ir::ClassInfo;
use crate::scan::{dotted, parse_class};

/// Supplies raw class bytes by dotted class name.
pub(crate) trait ClassSource {
    /// `Ok(None)` when no root holds the class.
    fn read_class(&mut self, name: &str) -> Result<Option<Vec<u8>>, AnalysisError>;
}

/// Decodes classes on first request and caches them by dotted name.
///
/// Failures are never cached, so a class that failed once fails the same way
/// on every request.
pub(crate) struct ClassRepository {
    source: Box<dyn ClassSource>,
    cache: HashMap<String, Arc<ClassInfo>>,
}

impl ClassRepository {
    pub(crate) fn new(source: Box<dyn ClassSource>) -> Self {
        Self {
            source,
            cache: HashMap::new(),
        }
    }

    pub(crate) fn get_class(&mut self, name: &str) -> Result<Arc<ClassInfo>, AnalysisError> {
        let name = dotted(name);
        if let Some(class) = self.cache.get(&name) {
            return Ok(Arc::clone(class));
        }
        let data = self
            .source
            .read_class(&name)?
            .ok_or_else(|| AnalysisError::ClassNotFound { name: name.clone() })?;
        let class = Arc::new(parse_class(&name, &data)?);
        debug!(class = %name, methods = class.methods().len(), "decoded class");
        self.cache.insert(name, Arc::clone(&class));
        Ok(class)
    }

    pub(crate) fn cached_count(&self) -> usize {
        self.cache.len()
    }
}
