//! `{name:spec}` path templates, e.g. `model-{epoch:02d}-{loss:.4f}.safetensors`.
//!
//! Format specs take the form `[0][width][.precision][d|f]`. `{{` and `}}`
//! are literal braces.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("malformed template '{template}' at byte {position}: {reason}")]
    Malformed {
        template: String,
        position: usize,
        reason: String,
    },

    #[error("template '{template}' references {missing:?}, available keys are {available:?}")]
    MissingKeys {
        template: String,
        missing: Vec<String>,
        available: Vec<String>,
    },

    #[error("cannot format {key} = {value} with '{spec}'")]
    IncompatibleFormat { key: String, spec: String, value: String },
}

/// A value a template can render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(u64),
    Float(f64),
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as u64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Default,
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq)]
struct Spec {
    raw: String,
    zero_fill: bool,
    width: usize,
    precision: Option<usize>,
    kind: Kind,
}

impl Spec {
    fn parse(raw: &str) -> Result<Self, String> {
        let (body, kind) = match raw.chars().last() {
            Some('d') => (&raw[..raw.len() - 1], Kind::Int),
            Some('f') => (&raw[..raw.len() - 1], Kind::Float),
            _ => (raw, Kind::Default),
        };
        let (width_part, precision) = match body.split_once('.') {
            Some((w, p)) => {
                let p = p.parse::<usize>().map_err(|_| format!("bad precision '{p}'"))?;
                (w, Some(p))
            }
            None => (body, None),
        };
        if kind == Kind::Int && precision.is_some() {
            return Err("precision is not allowed with 'd'".to_string());
        }
        let zero_fill = width_part.starts_with('0');
        let width = match width_part.trim_start_matches('0') {
            "" => 0,
            w => w.parse::<usize>().map_err(|_| format!("bad format spec '{raw}'"))?,
        };
        Ok(Spec {
            raw: raw.to_string(),
            zero_fill,
            width,
            precision,
            kind,
        })
    }

    fn render(&self, key: &str, value: Value) -> Result<String, TemplateError> {
        let w = self.width;
        let text = match (value, self.kind) {
            (Value::Float(_), Kind::Int) => {
                return Err(TemplateError::IncompatibleFormat {
                    key: key.to_string(),
                    spec: self.raw.clone(),
                    value: value.to_string(),
                })
            }
            (Value::Int(v), Kind::Int | Kind::Default) if self.precision.is_none() => {
                if self.zero_fill {
                    format!("{v:0w$}")
                } else {
                    format!("{v:w$}")
                }
            }
            (Value::Float(v), Kind::Default) if self.precision.is_none() => {
                format!("{:>w$}", Value::Float(v).to_string())
            }
            (Value::Int(v), _) => self.float(v as f64),
            (Value::Float(v), _) => self.float(v),
        };
        Ok(text)
    }

    fn float(&self, v: f64) -> String {
        let (w, p) = (self.width, self.precision.unwrap_or(6));
        if self.zero_fill {
            format!("{v:0w$.p$}")
        } else {
            format!("{v:w$.p$}")
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field { key: String, spec: Spec },
}

/// A parsed template. Parsing checks the syntax; rendering checks the keys.
#[derive(Debug, Clone, PartialEq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let malformed = |position: usize, reason: &str| TemplateError::Malformed {
            template: source.to_string(),
            position,
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match c {
                '{' if chars.peek().map(|&(_, n)| n) == Some('{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().map(|&(_, n)| n) == Some('}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(malformed(i, "unmatched '}'")),
                '{' => {
                    let close = source[i..]
                        .find('}')
                        .map(|off| i + off)
                        .ok_or_else(|| malformed(i, "unclosed '{'"))?;
                    let field = &source[i + 1..close];
                    if field.contains('{') {
                        return Err(malformed(i, "nested '{'"));
                    }
                    let (key, spec) = field.split_once(':').unwrap_or((field, ""));
                    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return Err(malformed(i + 1, &format!("invalid field name '{key}'")));
                    }
                    let spec = Spec::parse(spec).map_err(|reason| malformed(i + 1 + key.len(), &reason))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field {
                        key: key.to_string(),
                        spec,
                    });
                    while chars.peek().is_some_and(|&(j, _)| j <= close) {
                        chars.next();
                    }
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Field names in order of first appearance.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Field { key, .. } = segment {
                if !keys.contains(&key.as_str()) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    pub fn render(&self, values: &BTreeMap<String, Value>) -> Result<String, TemplateError> {
        let missing: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|k| !values.contains_key(*k))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(TemplateError::MissingKeys {
                template: self.source.clone(),
                missing,
                available: values.keys().cloned().collect(),
            });
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { key, spec } => out.push_str(&spec.render(key, values[key])?),
            }
        }
        Ok(out)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn zero_padded_epoch() {
        let template = PathTemplate::parse("model-{epoch:02d}.safetensors").unwrap();
        let rendered = template.render(&values(&[("epoch", Value::Int(7))])).unwrap();
        assert_eq!(rendered, "model-07.safetensors");

        let rendered = template.render(&values(&[("epoch", Value::Int(130))])).unwrap();
        assert_eq!(rendered, "model-130.safetensors");
    }

    #[test]
    fn float_precision_and_plain_fields() {
        let template = PathTemplate::parse("e{epoch}-{loss:.3f}-{lr}").unwrap();
        let rendered = template
            .render(&values(&[
                ("epoch", Value::Int(3)),
                ("loss", Value::Float(0.123456)),
                ("lr", Value::Float(0.5)),
            ]))
            .unwrap();
        assert_eq!(rendered, "e3-0.123-0.5");
    }

    #[test]
    fn missing_keys_are_listed() {
        let template = PathTemplate::parse("{epoch:02d}-{val_loss:.2f}").unwrap();
        let err = template.render(&values(&[("epoch", Value::Int(1))])).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingKeys {
                template: "{epoch:02d}-{val_loss:.2f}".to_string(),
                missing: vec!["val_loss".to_string()],
                available: vec!["epoch".to_string()],
            }
        );
    }

    #[test]
    fn malformed_templates_name_the_position() {
        for (source, position) in [("model-{epoch", 6), ("model}", 5), ("{:02d}", 1), ("{epoch:x2d}", 6)] {
            match PathTemplate::parse(source) {
                Err(TemplateError::Malformed { position: p, .. }) => assert_eq!(p, position, "{source}"),
                other => panic!("{source}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn escaped_braces_and_type_mismatch() {
        let template = PathTemplate::parse("{{{epoch}}}").unwrap();
        assert_eq!(template.render(&values(&[("epoch", Value::Int(2))])).unwrap(), "{2}");
        assert_eq!(template.keys(), vec!["epoch"]);

        let template = PathTemplate::parse("{loss:02d}").unwrap();
        assert!(matches!(
            template.render(&values(&[("loss", Value::Float(0.5))])),
            Err(TemplateError::IncompatibleFormat { .. })
        ));
    }
}
