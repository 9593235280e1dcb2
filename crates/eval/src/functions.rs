//! Builtin function and predicate registry
//!
//! Functions are plain `fn` pointers over already-evaluated values; the
//! evaluator unwraps bound variables before dispatch, so every builtin sees
//! concrete values (or a still-symbolic variable, which the type checks
//! reject). Strings are stored without their quotes, so the string builtins
//! operate on the content directly.

use fact_model::{EngineError, EngineResult, Value};
use ahash::AHashMap;
use rand::Rng;
use std::cmp::Ordering;

/// A builtin implementation.
pub type BuiltinFn = fn(&[Value]) -> EngineResult<Value>;

/// Name-to-implementation table for functions and predicates.
#[derive(Clone)]
pub struct FunctionRegistry {
    map: AHashMap<String, BuiltinFn>,
}

impl FunctionRegistry {
    /// Registry pre-loaded with the builtin arithmetic, string, and
    /// predicate functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            map: AHashMap::new(),
        };
        registry.register("+", addition);
        registry.register("-", subtraction);
        registry.register("*", multiplication);
        registry.register("/", division);
        registry.register("%", modulus);
        registry.register("**", power);
        registry.register("abs", absolute);
        registry.register("min", minimum);
        registry.register("max", maximum);
        registry.register("strcat", strcat);
        registry.register("substr", substr);
        registry.register("strlen", strlen);
        registry.register("strindex", strindex);
        registry.register("symcat", symcat);
        registry.register("randint", randint);
        registry.register("eq", equal);
        registry.register("neq", not_equal);
        registry.register("<", less_than);
        registry.register("<=", less_equal);
        registry.register(">", greater_than);
        registry.register(">=", greater_equal);
        registry.register("and", logical_and);
        registry.register("or", logical_or);
        registry.register("not", logical_not);
        registry
    }

    /// Register a function, keeping an existing entry on name collision.
    pub fn register(&mut self, name: impl Into<String>, f: BuiltinFn) {
        self.map.entry(name.into()).or_insert(f);
    }

    /// Resolve a function by name.
    pub fn get(&self, name: &str) -> EngineResult<BuiltinFn> {
        self.map.get(name).copied().ok_or_else(|| {
            EngineError::Evaluate(format!("unable to find the function \"{name}\""))
        })
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn require_at_least(name: &str, args: &[Value], n: usize) -> EngineResult<()> {
    if args.len() < n {
        return Err(EngineError::Evaluate(format!(
            "\"{name}\" requires at least {n} arguments ({} given)",
            args.len()
        )));
    }
    Ok(())
}

fn require_exactly(name: &str, args: &[Value], n: usize) -> EngineResult<()> {
    if args.len() != n {
        return Err(EngineError::Evaluate(format!(
            "\"{name}\" requires exactly {n} arguments ({} given)",
            args.len()
        )));
    }
    Ok(())
}

fn addition(args: &[Value]) -> EngineResult<Value> {
    require_at_least("+", args, 2)?;
    args.iter()
        .try_fold(Value::Int(0), |acc, v| acc.add(v))
}

fn subtraction(args: &[Value]) -> EngineResult<Value> {
    require_at_least("-", args, 2)?;
    args[1..]
        .iter()
        .try_fold(args[0].clone(), |acc, v| acc.sub(v))
}

fn multiplication(args: &[Value]) -> EngineResult<Value> {
    require_at_least("*", args, 2)?;
    args.iter()
        .try_fold(Value::Int(1), |acc, v| acc.mul(v))
}

fn division(args: &[Value]) -> EngineResult<Value> {
    require_at_least("/", args, 2)?;
    args[1..]
        .iter()
        .try_fold(args[0].clone(), |acc, v| acc.div(v))
}

fn modulus(args: &[Value]) -> EngineResult<Value> {
    require_at_least("%", args, 2)?;
    args[1..]
        .iter()
        .try_fold(args[0].clone(), |acc, v| acc.rem(v))
}

fn power(args: &[Value]) -> EngineResult<Value> {
    require_at_least("**", args, 2)?;
    args[1..]
        .iter()
        .try_fold(args[0].clone(), |acc, v| acc.pow(v))
}

fn absolute(args: &[Value]) -> EngineResult<Value> {
    require_exactly("abs", args, 1)?;
    args[0].abs()
}

fn extremum(name: &'static str, args: &[Value], keep: Ordering) -> EngineResult<Value> {
    require_at_least(name, args, 2)?;
    if !args.iter().all(Value::is_number) {
        return Err(EngineError::Evaluate(format!(
            "\"{name}\" requires all arguments to be numbers"
        )));
    }
    let mut best = args[0].clone();
    for v in &args[1..] {
        if v.compare(&best) == Some(keep) {
            best = v.clone();
        }
    }
    Ok(best)
}

fn minimum(args: &[Value]) -> EngineResult<Value> {
    extremum("min", args, Ordering::Less)
}

fn maximum(args: &[Value]) -> EngineResult<Value> {
    extremum("max", args, Ordering::Greater)
}

fn string_args<'a>(name: &str, args: &'a [Value]) -> EngineResult<Vec<&'a str>> {
    args.iter()
        .map(|v| match v {
            Value::Str(s) => Ok(s.as_str()),
            _ => Err(EngineError::Evaluate(format!(
                "\"{name}\" requires all arguments to be strings"
            ))),
        })
        .collect()
}

fn strcat(args: &[Value]) -> EngineResult<Value> {
    require_at_least("strcat", args, 1)?;
    let parts = string_args("strcat", args)?;
    Ok(Value::Str(parts.concat()))
}

fn substr(args: &[Value]) -> EngineResult<Value> {
    require_exactly("substr", args, 3)?;
    match (&args[0], &args[1], &args[2]) {
        (Value::Str(s), Value::Int(start), Value::Int(end)) => {
            let start = (*start).max(0) as usize;
            let end = (*end).max(0) as usize;
            let taken: String = s
                .chars()
                .skip(start)
                .take(end.saturating_sub(start))
                .collect();
            Ok(Value::Str(taken))
        }
        _ => Err(EngineError::Evaluate(
            "\"substr\" requires one string and two integers".into(),
        )),
    }
}

fn strlen(args: &[Value]) -> EngineResult<Value> {
    require_exactly("strlen", args, 1)?;
    match &args[0] {
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        _ => Err(EngineError::Evaluate(
            "\"strlen\" requires one string".into(),
        )),
    }
}

fn strindex(args: &[Value]) -> EngineResult<Value> {
    require_exactly("strindex", args, 2)?;
    match (&args[0], &args[1]) {
        (Value::Str(s), Value::Str(needle)) => {
            let index = s
                .find(needle.as_str())
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::Int(index))
        }
        _ => Err(EngineError::Evaluate(
            "\"strindex\" requires two strings".into(),
        )),
    }
}

fn symcat(args: &[Value]) -> EngineResult<Value> {
    require_at_least("symcat", args, 1)?;
    let mut out = String::new();
    for v in args {
        match v {
            Value::Symbol(s) => out.push_str(s),
            _ => {
                return Err(EngineError::Evaluate(
                    "\"symcat\" requires all arguments to be symbols".into(),
                ))
            }
        }
    }
    Ok(Value::Symbol(out))
}

fn randint(args: &[Value]) -> EngineResult<Value> {
    require_exactly("randint", args, 2)?;
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => {
            // Half-open like the source semantics: the second bound is
            // excluded whichever direction the range runs.
            let mut rng = rand::thread_rng();
            match a.cmp(b) {
                Ordering::Less => Ok(Value::Int(rng.gen_range(*a..*b))),
                Ordering::Greater => Ok(Value::Int(rng.gen_range(*b + 1..=*a))),
                Ordering::Equal => {
                    Err(EngineError::Evaluate("\"randint\" range is empty".into()))
                }
            }
        }
        _ => Err(EngineError::Evaluate(
            "\"randint\" requires two integers".into(),
        )),
    }
}

fn equal(args: &[Value]) -> EngineResult<Value> {
    require_at_least("eq", args, 2)?;
    Ok(Value::Bool(args[1..].iter().all(|v| *v == args[0])))
}

fn not_equal(args: &[Value]) -> EngineResult<Value> {
    require_at_least("neq", args, 2)?;
    Ok(Value::Bool(args[1..].iter().all(|v| *v != args[0])))
}

fn chain(args: &[Value], accept: fn(Ordering) -> bool) -> Value {
    let ok = args
        .windows(2)
        .all(|pair| pair[0].compare(&pair[1]).is_some_and(accept));
    Value::Bool(ok)
}

fn less_than(args: &[Value]) -> EngineResult<Value> {
    require_at_least("<", args, 2)?;
    Ok(chain(args, Ordering::is_lt))
}

fn less_equal(args: &[Value]) -> EngineResult<Value> {
    require_at_least("<=", args, 2)?;
    Ok(chain(args, Ordering::is_le))
}

fn greater_than(args: &[Value]) -> EngineResult<Value> {
    require_at_least(">", args, 2)?;
    Ok(chain(args, Ordering::is_gt))
}

fn greater_equal(args: &[Value]) -> EngineResult<Value> {
    require_at_least(">=", args, 2)?;
    Ok(chain(args, Ordering::is_ge))
}

fn boolean_args(name: &str, args: &[Value]) -> EngineResult<Vec<bool>> {
    args.iter()
        .map(|v| match v {
            Value::Bool(b) => Ok(*b),
            _ => Err(EngineError::Evaluate(format!(
                "the \"{name}\" predicate takes only boolean arguments"
            ))),
        })
        .collect()
}

fn logical_and(args: &[Value]) -> EngineResult<Value> {
    let bools = boolean_args("and", args)?;
    Ok(Value::Bool(bools.into_iter().all(|b| b)))
}

fn logical_or(args: &[Value]) -> EngineResult<Value> {
    let bools = boolean_args("or", args)?;
    Ok(Value::Bool(bools.into_iter().any(|b| b)))
}

fn logical_not(args: &[Value]) -> EngineResult<Value> {
    let bools = boolean_args("not", args)?;
    require_exactly("not", args, 1)?;
    Ok(Value::Bool(!bools[0]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_builtins() {
        assert_eq!(
            addition(&[Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap(),
            Value::Int(6)
        );
        assert_eq!(
            subtraction(&[Value::Int(10), Value::Int(3), Value::Int(2)]).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            multiplication(&[Value::Int(2), Value::Float(1.5)]).unwrap(),
            Value::Float(3.0)
        );
        assert_eq!(
            division(&[Value::Int(7), Value::Int(2)]).unwrap(),
            Value::Float(3.5)
        );
    }

    #[test]
    fn test_arity_is_checked() {
        assert!(addition(&[Value::Int(1)]).is_err());
        assert!(absolute(&[Value::Int(1), Value::Int(2)]).is_err());
        assert!(substr(&[Value::string("abc")]).is_err());
    }

    #[test]
    fn test_division_by_zero_surfaces() {
        assert!(division(&[Value::Int(1), Value::Int(0)]).is_err());
        assert!(modulus(&[Value::Int(1), Value::Int(0)]).is_err());
    }

    #[test]
    fn test_min_max_preserve_tags() {
        assert_eq!(
            minimum(&[Value::Int(3), Value::Float(1.5), Value::Int(2)]).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            maximum(&[Value::Int(3), Value::Float(1.5)]).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_string_builtins_work_on_unquoted_content() {
        assert_eq!(
            strcat(&[Value::string("foo"), Value::string("bar")]).unwrap(),
            Value::string("foobar")
        );
        assert_eq!(
            substr(&[Value::string("hello"), Value::Int(1), Value::Int(3)]).unwrap(),
            Value::string("el")
        );
        assert_eq!(strlen(&[Value::string("hello")]).unwrap(), Value::Int(5));
        assert_eq!(
            strindex(&[Value::string("hello"), Value::string("llo")]).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            strindex(&[Value::string("hello"), Value::string("xyz")]).unwrap(),
            Value::Int(-1)
        );
    }

    #[test]
    fn test_symcat_concatenates_symbols() {
        assert_eq!(
            symcat(&[Value::symbol("foo"), Value::symbol("-bar")]).unwrap(),
            Value::symbol("foo-bar")
        );
        assert!(symcat(&[Value::string("foo")]).is_err());
    }

    #[test]
    fn test_randint_stays_in_range() {
        for _ in 0..50 {
            let Value::Int(v) = randint(&[Value::Int(1), Value::Int(4)]).unwrap() else {
                panic!("randint must return an integer");
            };
            assert!((1..4).contains(&v));
        }
        assert!(randint(&[Value::Int(2), Value::Int(2)]).is_err());
    }

    #[test]
    fn test_equality_predicates() {
        assert_eq!(
            equal(&[Value::Int(2), Value::Float(2.0)]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            equal(&[Value::Int(2), Value::Int(3)]).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            not_equal(&[Value::symbol("a"), Value::symbol("b")]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_comparison_chains() {
        let args = [Value::Int(1), Value::Int(2), Value::Int(3)];
        assert_eq!(less_than(&args).unwrap(), Value::Bool(true));
        assert_eq!(greater_than(&args).unwrap(), Value::Bool(false));
        // Incomparable pairs fail the chain rather than erroring.
        assert_eq!(
            less_than(&[Value::Int(1), Value::symbol("x")]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_boolean_predicates_reject_non_booleans() {
        assert!(logical_and(&[Value::Bool(true), Value::Int(1)]).is_err());
        assert_eq!(
            logical_and(&[Value::Bool(true), Value::Bool(true)]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(logical_not(&[Value::Bool(true)]).unwrap(), Value::Bool(false));
        assert!(logical_not(&[Value::Bool(true), Value::Bool(false)]).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.get("+").is_ok());
        assert!(registry.get("frobnicate").is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_addition_matches_integer_sum(
            values in proptest::collection::vec(-1000i64..1000, 2..8)
        ) {
            let args: Vec<Value> = values.iter().copied().map(Value::Int).collect();
            let total: i64 = values.iter().sum();
            proptest::prop_assert_eq!(addition(&args).unwrap(), Value::Int(total));
        }

        #[test]
        fn prop_comparison_chain_agrees_with_pairwise_order(
            values in proptest::collection::vec(-50i64..50, 2..6)
        ) {
            let args: Vec<Value> = values.iter().copied().map(Value::Int).collect();
            let ascending = values.windows(2).all(|pair| pair[0] < pair[1]);
            proptest::prop_assert_eq!(less_than(&args).unwrap(), Value::Bool(ascending));
        }
    }
}
