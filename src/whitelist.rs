use crate::scan::dotted;

/// Package or class prefixes whose call edges never count against a class.
#[derive(Clone, Debug)]
pub(crate) struct Whitelist {
    prefixes: Vec<String>,
}

impl Default for Whitelist {
    fn default() -> Self {
        Self {
            prefixes: vec!["java.".to_string()],
        }
    }
}

impl Whitelist {
    /// Whitelist from a `:`-separated list; the standard library is always present.
    pub(crate) fn parse(value: Option<&str>) -> Self {
        let mut whitelist = Self::default();
        for prefix in value.into_iter().flat_map(|value| value.split(':')) {
            whitelist.add(prefix);
        }
        whitelist
    }

    pub(crate) fn add(&mut self, prefix: &str) {
        let prefix = dotted(prefix.trim());
        if !prefix.is_empty() && !self.prefixes.contains(&prefix) {
            self.prefixes.push(prefix);
        }
    }

    pub(crate) fn is_whitelisted(&self, class_name: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| class_name.starts_with(prefix.as_str()))
    }
}
