//! Format string compiler
//!
//! Templates such as `"{category}/{id:>05}_{title!l:L40/long/}.{extension}"`
//! are compiled once into a [`Formatter`] and applied to many kwdicts.
//! Compilation is memoized by [`FormatterCache`] on the triple
//! `(template, default, base format)`; asking twice returns the same `Arc`.
//!
//! A template may start with a `\f<kind> ` prefix selecting another front-end:
//!
//! | prefix | meaning                                       |
//! |--------|-----------------------------------------------|
//! | none / `\fS ` | regular template                       |
//! | `\fT ` | template read from the named file             |
//! | `\fE ` | expression evaluated against the kwdict       |
//! | `\fF ` | template whose fields are expressions         |
//! | `\fM ` | function registered on the cache under a name |
//!
//! Malformed templates fail at compile time with a [`FormatError`]. Applying
//! a compiled formatter never fails: fields whose value cannot be produced fall
//! back to the default value.

pub mod conversion;
pub mod expr;
mod field;
pub mod spec;
mod standard;
pub mod value;

pub use conversion::Conversion;
pub use expr::Expression;
pub use spec::Spec;
pub use value::Val;

use crate::error::FormatError;
use crate::types::{Kwdict, Value};
use field::{FieldName, Piece};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Externally provided formatting function for the `\fM` front-end
pub type FormatFunction = Arc<dyn Fn(&Kwdict) -> String + Send + Sync>;

/// How values reaching the end of a spec chain without a spec are rendered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BaseFormat {
    /// `str()`
    #[default]
    Str,
    /// JSON text
    Json,
}

/// One replacement field of a template
#[derive(Clone, Debug)]
struct Field {
    alternatives: Vec<FieldName>,
    conversion: Option<Conversion>,
    spec: Spec,
}

impl Field {
    fn value(&self, kwdict: &Kwdict, default: &Val) -> Val {
        if let [name] = self.alternatives.as_slice() {
            return name.resolve(kwdict).unwrap_or_else(|| default.clone());
        }
        self.alternatives
            .iter()
            .filter_map(|name| name.resolve(kwdict))
            .find(Val::truthy)
            .unwrap_or_else(|| default.clone())
    }

    fn render(&self, value: Val, base: BaseFormat) -> Result<String, String> {
        let value = match self.conversion {
            Some(conversion) => conversion.apply(value)?,
            None => value,
        };
        self.spec.apply(value, base)
    }

    fn apply(&self, kwdict: &Kwdict, default: &Val, base: BaseFormat) -> String {
        self.render(self.value(kwdict, default), base)
            .or_else(|_| self.render(default.clone(), base))
            .unwrap_or_else(|_| default.to_str())
    }
}

#[derive(Clone, Debug)]
enum Part {
    Literal(String),
    Field(Field),
}

#[derive(Clone, Debug)]
struct ExprField {
    expression: Expression,
    conversion: Option<Conversion>,
    spec: String,
}

impl ExprField {
    fn apply(&self, kwdict: &Kwdict, default: &Val) -> String {
        let rendered = self.expression.eval(kwdict).and_then(|value| {
            let value = match self.conversion {
                Some(conversion) => conversion.apply(value)?,
                None => value,
            };
            standard::format_value(&value, &self.spec)
        });
        rendered.unwrap_or_else(|_| default.to_str())
    }
}

#[derive(Clone, Debug)]
enum ExprPart {
    Literal(String),
    Field(ExprField),
}

enum Kind {
    Literal(String),
    Template {
        parts: Vec<Part>,
        default: Val,
        base: BaseFormat,
    },
    Expression {
        expression: Expression,
        default: Val,
    },
    FString {
        parts: Vec<ExprPart>,
        default: Val,
    },
    Function(FormatFunction),
}

/// A compiled format string
pub struct Formatter {
    template: String,
    kind: Kind,
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formatter")
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

impl Formatter {
    /// The template this formatter was compiled from
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Apply the formatter to `kwdict`
    pub fn format_map(&self, kwdict: &Kwdict) -> String {
        match &self.kind {
            Kind::Literal(text) => text.clone(),
            Kind::Template {
                parts,
                default,
                base,
            } => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        Part::Literal(text) => out.push_str(text),
                        Part::Field(field) => out.push_str(&field.apply(kwdict, default, *base)),
                    }
                }
                out
            }
            Kind::Expression {
                expression,
                default,
            } => expression
                .eval(kwdict)
                .map(|v| v.to_str())
                .unwrap_or_else(|_| default.to_str()),
            Kind::FString { parts, default } => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        ExprPart::Literal(text) => out.push_str(text),
                        ExprPart::Field(field) => out.push_str(&field.apply(kwdict, default)),
                    }
                }
                out
            }
            Kind::Function(function) => function(kwdict),
        }
    }

    fn compile_template(
        template: &str,
        source: &str,
        default: Val,
        base: BaseFormat,
    ) -> Result<Kind, FormatError> {
        let syntax = |reason: String| FormatError::Syntax {
            template: template.to_string(),
            reason,
        };

        let mut parts = Vec::new();
        for piece in field::scan(source).map_err(syntax)? {
            match piece {
                Piece::Literal(text) => parts.push(Part::Literal(text)),
                Piece::Field(raw) => {
                    let alternatives = field::split_alternatives(&raw.name)
                        .into_iter()
                        .map(FieldName::parse)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(syntax)?;
                    let conversion = raw
                        .conversion
                        .map(|c| {
                            Conversion::from_char(c).ok_or_else(|| {
                                FormatError::UnknownConversion {
                                    template: template.to_string(),
                                    conversion: c,
                                }
                            })
                        })
                        .transpose()?;
                    let spec = Spec::parse(&raw.spec).map_err(|e| match e {
                        spec::SpecError::Syntax(reason) => syntax(reason),
                        spec::SpecError::Conversion(c) => FormatError::UnknownConversion {
                            template: template.to_string(),
                            conversion: c,
                        },
                    })?;
                    parts.push(Part::Field(Field {
                        alternatives,
                        conversion,
                        spec,
                    }));
                }
            }
        }

        if let [Part::Literal(text)] = parts.as_slice() {
            return Ok(Kind::Literal(text.clone()));
        }
        if parts.is_empty() {
            return Ok(Kind::Literal(String::new()));
        }
        Ok(Kind::Template {
            parts,
            default,
            base,
        })
    }

    fn compile_fstring(template: &str, source: &str, default: Val) -> Result<Kind, FormatError> {
        let syntax = |reason: String| FormatError::Syntax {
            template: template.to_string(),
            reason,
        };
        let mut parts = Vec::new();
        for piece in field::scan_expressions(source).map_err(syntax)? {
            match piece {
                field::ExprPiece::Literal(text) => parts.push(ExprPart::Literal(text)),
                field::ExprPiece::Field {
                    expression,
                    conversion,
                    spec,
                } => {
                    let conversion = conversion
                        .map(|c| {
                            Conversion::from_char(c).ok_or_else(|| {
                                FormatError::UnknownConversion {
                                    template: template.to_string(),
                                    conversion: c,
                                }
                            })
                        })
                        .transpose()?;
                    parts.push(ExprPart::Field(ExprField {
                        expression: Expression::parse(&expression)?,
                        conversion,
                        spec,
                    }));
                }
            }
        }
        Ok(Kind::FString { parts, default })
    }
}

type CacheKey = (String, String, BaseFormat);

/// Memoizing format string compiler
///
/// Also carries the function registry used by `\fM` templates.
#[derive(Default)]
pub struct FormatterCache {
    compiled: Mutex<HashMap<CacheKey, Arc<Formatter>>>,
    functions: RwLock<HashMap<String, FormatFunction>>,
}

impl fmt::Debug for FormatterCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterCache")
            .field("compiled", &self.len())
            .finish_non_exhaustive()
    }
}

impl FormatterCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function for `\fM <name>` templates
    pub fn register_function(&self, name: impl Into<String>, function: FormatFunction) {
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), function);
    }

    /// Number of compiled formatters held
    pub fn len(&self) -> usize {
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been compiled yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compile with a `None` default and `str()` base format
    pub fn parse(&self, template: &str) -> Result<Arc<Formatter>, FormatError> {
        self.compile(template, &Value::Null, BaseFormat::Str)
    }

    /// Compile `template`, reusing an earlier result for the same arguments
    pub fn compile(
        &self,
        template: &str,
        default: &Value,
        base: BaseFormat,
    ) -> Result<Arc<Formatter>, FormatError> {
        let key = (template.to_string(), default.to_string(), base);
        if let Some(formatter) = self
            .compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(formatter));
        }

        let formatter = Arc::new(self.build(template, Val::from(default), base)?);
        let mut compiled = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(compiled.entry(key).or_insert(formatter)))
    }

    fn build(&self, template: &str, default: Val, base: BaseFormat) -> Result<Formatter, FormatError> {
        let (kind, source) = match template.strip_prefix('\u{0c}') {
            Some(rest) => match rest.split_once(' ') {
                Some((kind, source)) => (kind, source),
                None => (rest, ""),
            },
            None => ("S", template),
        };

        let kind = match kind {
            "S" | "" => Formatter::compile_template(template, source, default, base)?,
            "T" => {
                let path = crate::utils::expand_path(source);
                let text = std::fs::read_to_string(&path).map_err(|source| {
                    FormatError::TemplateFile {
                        path: path.clone(),
                        source,
                    }
                })?;
                Formatter::compile_template(template, &text, default, base)?
            }
            "E" => Kind::Expression {
                expression: Expression::parse(source)?,
                default,
            },
            "F" => Formatter::compile_fstring(template, source, default)?,
            "M" => {
                let function = self
                    .functions
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(source)
                    .cloned()
                    .ok_or_else(|| FormatError::UnknownFunction(source.to_string()))?;
                Kind::Function(function)
            }
            other => {
                return Err(FormatError::Syntax {
                    template: template.to_string(),
                    reason: format!("unknown formatter type '{other}'"),
                });
            }
        };

        Ok(Formatter {
            template: template.to_string(),
            kind,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
