//! Filter construction from command-line style options

use super::{parse_selection, FilterParseError, TestFilter};

/// Filter-related options gathered from the command line
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub tests: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub where_clause: Option<String>,
}

impl FilterOptions {
    /// Parse `--test:NAME`, `--include:A,B`, `--exclude:A,B` and
    /// `--where:EXPR` options (`=` works as well as `:`). Repeated options
    /// accumulate.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, FilterParseError> {
        let mut options = Self::default();

        for arg in args {
            let arg = arg.as_ref();
            let body = arg
                .strip_prefix("--")
                .or_else(|| arg.strip_prefix('-'))
                .ok_or_else(|| FilterParseError::UnknownOption(arg.to_string()))?;

            let (name, value) = body
                .split_once([':', '='])
                .ok_or_else(|| FilterParseError::UnknownOption(arg.to_string()))?;

            match name.to_lowercase().as_str() {
                "test" => options.tests.push(value.to_string()),
                "include" => options.include.extend(split_list(value)),
                "exclude" => options.exclude.extend(split_list(value)),
                "where" => options.where_clause = Some(value.to_string()),
                _ => return Err(FilterParseError::UnknownOption(arg.to_string())),
            }
        }

        Ok(options)
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
            && self.include.is_empty()
            && self.exclude.is_empty()
            && self.where_clause.is_none()
    }

    /// Build the filter. Parts are combined in a fixed order: names,
    /// included categories, excluded categories, then the where clause.
    /// A single part is returned as is, without an enclosing `And`.
    pub fn build(&self) -> Result<TestFilter, FilterParseError> {
        let mut parts = Vec::new();

        if !self.tests.is_empty() {
            parts.push(TestFilter::names(self.tests.iter().cloned()));
        }
        if !self.include.is_empty() {
            parts.push(TestFilter::categories(self.include.iter().cloned()));
        }
        if !self.exclude.is_empty() {
            parts.push(TestFilter::negate(TestFilter::categories(
                self.exclude.iter().cloned(),
            )));
        }
        if let Some(expr) = &self.where_clause {
            parts.push(parse_selection(expr)?);
        }

        Ok(match parts.len() {
            0 => TestFilter::Empty,
            1 => parts.remove(0),
            _ => TestFilter::And(parts),
        })
    }
}

pub(super) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
