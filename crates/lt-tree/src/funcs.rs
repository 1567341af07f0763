//! # Pipeline Functions
//!
//! The registered function table for `{{ .X | fn }}` pipelines. A stage
//! receives its explicit arguments plus the piped value appended as the
//! final argument.
//!
//! `raw` is not in this table: the generator treats a trailing `raw`
//! stage as the marker that disables default HTML escaping.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::error::RenderError;
use crate::value::ValueAccess;

pub type Func = Arc<dyn Fn(&[Value]) -> Result<Value, RenderError> + Send + Sync>;

/// Named function table, cloned per renderer. The default table carries
/// the builtins; applications may register their own on top.
#[derive(Clone)]
pub struct FuncRegistry {
    map: HashMap<String, Func>,
}

impl std::fmt::Debug for FuncRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.map.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FuncRegistry").field("names", &names).finish()
    }
}

static BUILTINS: Lazy<FuncRegistry> = Lazy::new(|| {
    let mut reg = FuncRegistry { map: HashMap::new() };
    reg.register("upper", |args| {
        one_arg("upper", args).map(|v| Value::String(v.as_scalar().to_uppercase()))
    });
    reg.register("lower", |args| {
        one_arg("lower", args).map(|v| Value::String(v.as_scalar().to_lowercase()))
    });
    reg.register("len", |args| {
        let v = one_arg("len", args)?;
        let len = match v {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            Value::Null => 0,
            other => {
                return Err(RenderError::Function {
                    name: "len".into(),
                    message: format!("{} has no length", other.kind()),
                })
            }
        };
        Ok(Value::from(len as u64))
    });
    reg.register("printf", printf);
    reg.register("json", |args| {
        let v = one_arg("json", args)?;
        serde_json::to_string(v)
            .map(Value::String)
            .map_err(|e| RenderError::Function { name: "json".into(), message: e.to_string() })
    });

    // Comparisons. `eq` accepts two or more arguments like its Go
    // counterpart: true when the first equals any of the rest.
    reg.register("eq", |args| {
        let [first, rest @ ..] = args else {
            return Err(RenderError::Function {
                name: "eq".into(),
                message: "expected at least 2 arguments".into(),
            });
        };
        if rest.is_empty() {
            return Err(RenderError::Function {
                name: "eq".into(),
                message: "expected at least 2 arguments".into(),
            });
        }
        Ok(Value::Bool(rest.iter().any(|v| loose_eq(first, v))))
    });
    reg.register("ne", |args| {
        let [a, b] = args else {
            return Err(RenderError::Function {
                name: "ne".into(),
                message: format!("expected 2 arguments, got {}", args.len()),
            });
        };
        Ok(Value::Bool(!loose_eq(a, b)))
    });
    reg.register("lt", ordering("lt", |o| o == std::cmp::Ordering::Less));
    reg.register("le", ordering("le", |o| o != std::cmp::Ordering::Greater));
    reg.register("gt", ordering("gt", |o| o == std::cmp::Ordering::Greater));
    reg.register("ge", ordering("ge", |o| o != std::cmp::Ordering::Less));

    // Boolean combinators evaluate truthiness, returning the deciding
    // value like Go's `and`/`or` (useful with `default`-style chains).
    reg.register("and", |args| {
        let mut last = Value::Bool(true);
        for v in args {
            if !ValueAccess::as_bool(v) {
                return Ok(v.clone());
            }
            last = v.clone();
        }
        Ok(last)
    });
    reg.register("or", |args| {
        for v in args {
            if ValueAccess::as_bool(v) {
                return Ok(v.clone());
            }
        }
        Ok(args.last().cloned().unwrap_or(Value::Null))
    });
    reg.register("not", |args| Ok(Value::Bool(!ValueAccess::as_bool(one_arg("not", args)?))));

    // index collection key: sequence position or mapping field.
    reg.register("index", |args| {
        let [collection, key] = args else {
            return Err(RenderError::Function {
                name: "index".into(),
                message: format!("expected 2 arguments, got {}", args.len()),
            });
        };
        let value = match (collection, key) {
            (Value::Array(items), Value::Number(n)) => {
                n.as_u64().and_then(|i| items.get(i as usize))
            }
            (Value::Object(map), Value::String(k)) => map.get(k),
            _ => None,
        };
        Ok(value.cloned().unwrap_or(Value::Null))
    });

    // default fallback value: falsy values fall through.
    reg.register("default", |args| {
        let [fallback, value] = args else {
            return Err(RenderError::Function {
                name: "default".into(),
                message: format!("expected 2 arguments, got {}", args.len()),
            });
        };
        Ok(if ValueAccess::as_bool(value) { value.clone() } else { fallback.clone() })
    });

    reg
});

/// Equality across the number/string boundary form inputs blur.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s == &n.to_string()
        }
        _ => false,
    }
}

fn ordering(
    name: &'static str,
    accept: fn(std::cmp::Ordering) -> bool,
) -> impl Fn(&[Value]) -> Result<Value, RenderError> + Send + Sync + 'static {
    move |args| {
        let [a, b] = args else {
            return Err(RenderError::Function {
                name: name.into(),
                message: format!("expected 2 arguments, got {}", args.len()),
            });
        };
        let ord = match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) else {
                    return Err(RenderError::Function {
                        name: name.into(),
                        message: "numbers are not comparable".into(),
                    });
                };
                x.partial_cmp(&y).ok_or_else(|| RenderError::Function {
                    name: name.into(),
                    message: "numbers are not comparable".into(),
                })?
            }
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => {
                return Err(RenderError::Function {
                    name: name.into(),
                    message: format!("cannot compare {} with {}", a.kind(), b.kind()),
                })
            }
        };
        Ok(Value::Bool(accept(ord)))
    }
}

impl Default for FuncRegistry {
    fn default() -> Self {
        BUILTINS.clone()
    }
}

impl FuncRegistry {
    /// An empty table, no builtins.
    pub fn empty() -> Self {
        Self { map: HashMap::new() }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, RenderError> + Send + Sync + 'static,
    {
        self.map.insert(name.into(), Arc::new(func));
    }

    pub fn get(&self, name: &str) -> Option<&Func> {
        self.map.get(name)
    }
}

fn one_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value, RenderError> {
    match args {
        [v] => Ok(v),
        _ => Err(RenderError::Function {
            name: name.into(),
            message: format!("expected 1 argument, got {}", args.len()),
        }),
    }
}

/// Minimal Go-style `printf`: `%v` `%s` `%d` `%f` `%%`.
fn printf(args: &[Value]) -> Result<Value, RenderError> {
    let [format, rest @ ..] = args else {
        return Err(RenderError::Function {
            name: "printf".into(),
            message: "missing format string".into(),
        });
    };
    let Value::String(format) = format else {
        return Err(RenderError::Function {
            name: "printf".into(),
            message: "format must be a string".into(),
        });
    };

    let mut out = String::with_capacity(format.len());
    let mut values = rest.iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb @ ('v' | 's' | 'd' | 'f')) => {
                let Some(value) = values.next() else {
                    return Err(RenderError::Function {
                        name: "printf".into(),
                        message: format!("missing argument for %{}", verb),
                    });
                };
                match verb {
                    'd' => match value.as_i64() {
                        Some(i) => out.push_str(&i.to_string()),
                        None => {
                            return Err(RenderError::Function {
                                name: "printf".into(),
                                message: format!("%d on {} value", value.kind()),
                            })
                        }
                    },
                    'f' => match value.as_f64() {
                        Some(f) => out.push_str(&format!("{:.6}", f)),
                        None => {
                            return Err(RenderError::Function {
                                name: "printf".into(),
                                message: format!("%f on {} value", value.kind()),
                            })
                        }
                    },
                    _ => out.push_str(&value.as_scalar()),
                }
            }
            other => {
                return Err(RenderError::Function {
                    name: "printf".into(),
                    message: format!("unsupported verb {:?}", other),
                })
            }
        }
    }
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: &[Value]) -> Result<Value, RenderError> {
        (FuncRegistry::default().get(name).unwrap())(args)
    }

    #[test]
    fn test_upper_lower() {
        assert_eq!(call("upper", &[json!("abc")]).unwrap(), json!("ABC"));
        assert_eq!(call("lower", &[json!("ABC")]).unwrap(), json!("abc"));
    }

    #[test]
    fn test_len() {
        assert_eq!(call("len", &[json!([1, 2, 3])]).unwrap(), json!(3));
        assert_eq!(call("len", &[json!("ab")]).unwrap(), json!(2));
        assert!(call("len", &[json!(5)]).is_err());
    }

    #[test]
    fn test_printf() {
        assert_eq!(
            call("printf", &[json!("%s has %d items (%v)"), json!("cart"), json!(3), json!(true)])
                .unwrap(),
            json!("cart has 3 items (true)")
        );
        assert_eq!(call("printf", &[json!("100%%")]).unwrap(), json!("100%"));
        assert!(call("printf", &[json!("%d"), json!("x")]).is_err());
    }

    #[test]
    fn test_json_func() {
        assert_eq!(call("json", &[json!({"a": 1})]).unwrap(), json!(r#"{"a":1}"#));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(call("eq", &[json!(1), json!(1)]).unwrap(), json!(true));
        assert_eq!(call("eq", &[json!(1), json!("1")]).unwrap(), json!(true));
        assert_eq!(call("eq", &[json!(1), json!(2), json!(1)]).unwrap(), json!(true));
        assert_eq!(call("ne", &[json!("a"), json!("b")]).unwrap(), json!(true));
        assert_eq!(call("lt", &[json!(1), json!(2)]).unwrap(), json!(true));
        assert_eq!(call("ge", &[json!("b"), json!("a")]).unwrap(), json!(true));
        assert!(call("lt", &[json!(1), json!("x")]).is_err());
    }

    #[test]
    fn test_boolean_combinators() {
        assert_eq!(call("and", &[json!(1), json!("x")]).unwrap(), json!("x"));
        assert_eq!(call("and", &[json!(1), json!(0)]).unwrap(), json!(0));
        assert_eq!(call("or", &[json!(0), json!("fallback")]).unwrap(), json!("fallback"));
        assert_eq!(call("not", &[json!(0)]).unwrap(), json!(true));
    }

    #[test]
    fn test_index_and_default() {
        assert_eq!(call("index", &[json!(["a", "b"]), json!(1)]).unwrap(), json!("b"));
        assert_eq!(call("index", &[json!({"k": 7}), json!("k")]).unwrap(), json!(7));
        assert_eq!(call("index", &[json!(["a"]), json!(9)]).unwrap(), json!(null));
        assert_eq!(call("default", &[json!("none"), json!("")]).unwrap(), json!("none"));
        assert_eq!(call("default", &[json!("none"), json!("x")]).unwrap(), json!("x"));
    }

    #[test]
    fn test_custom_registration() {
        let mut reg = FuncRegistry::default();
        reg.register("double", |args| {
            let n = args[0].as_i64().unwrap_or(0);
            Ok(Value::from(n * 2))
        });
        assert!(reg.get("double").is_some());
        assert!(reg.get("upper").is_some());
    }
}
