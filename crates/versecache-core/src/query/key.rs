use std::fmt;

/// Ordered (namespace, params...) tuple addressing one query.
///
/// Displays as the dash-joined form used for store keys, e.g.
/// `quran-surah-12-arabic`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    namespace: String,
    params: Vec<String>,
}

impl QueryKey {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            params: Vec::new(),
        }
    }

    pub fn with(mut self, param: impl ToString) -> Self {
        self.params.push(param.to_string());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.namespace)?;
        for param in &self.params {
            write!(f, "-{}", param)?;
        }
        Ok(())
    }
}
