//! Compilation of reaction rate expressions into native code
//!
//! Rate expressions are plain strings such as `k1 * A * B / (Km + A)`. They
//! are compiled once, with the values of known constants folded in, into a
//! function that maps a vector of variable values to one result per
//! expression. Parsing and code generation are handled by `evalexpr-jit`.

use evalexpr_jit::{errors::EquationError, EquationSystem};
use log::{debug, trace};
use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Debug},
    sync::Arc,
};
use thiserror::Error;

/// Native function evaluating a set of expressions
///
/// The first argument holds the variable values, the second receives one
/// result per expression.
pub type CompiledFunction = Arc<dyn Fn(&[f64], &mut [f64]) + Send + Sync>;

/// Compiled set of expressions
#[derive(Clone)]
pub struct Evaluator {
    /// Compiled function, if there was anything to compile
    function: Option<CompiledFunction>,

    /// Number of variables
    num_inputs: usize,

    /// Number of expressions
    num_outputs: usize,
}
//
impl Evaluator {
    /// Evaluate all expressions at one point
    ///
    /// `inputs` must hold one value per variable, in the order in which the
    /// variables were specified at compile time. `outputs` must have room
    /// for one result per expression.
    #[inline]
    pub fn eval(&self, outputs: &mut [f64], inputs: &[f64]) {
        assert_eq!(inputs.len(), self.num_inputs, "wrong number of inputs");
        assert_eq!(outputs.len(), self.num_outputs, "wrong number of outputs");
        if let Some(function) = &self.function {
            function(inputs, outputs);
        }
    }

    /// Number of variables
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Number of expressions
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }
}
//
impl Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("num_inputs", &self.num_inputs)
            .field("num_outputs", &self.num_outputs)
            .finish_non_exhaustive()
    }
}

/// Compile a set of expressions
///
/// Expressions may refer to `variables`, whose values are provided at
/// evaluation time, and to `constants`, whose values are substituted right
/// away. A variable shadows a constant of the same name. Any other symbol is
/// an error.
pub fn compile(
    expressions: &[String],
    variables: &[String],
    constants: &BTreeMap<String, f64>,
) -> Result<Evaluator, Error> {
    let mut variable_map = HashMap::with_capacity(variables.len());
    for (idx, variable) in variables.iter().enumerate() {
        if variable_map.insert(variable.clone(), idx as u32).is_some() {
            return Err(Error::DuplicateVariable(variable.clone()));
        }
    }
    if let Some((name, &value)) = constants.iter().find(|(_, value)| !value.is_finite()) {
        return Err(Error::NonFiniteConstant {
            name: name.clone(),
            value,
        });
    }

    let expressions = expressions
        .iter()
        .map(|expression| substitute_constants(expression, constants, variables))
        .collect::<Vec<_>>();
    for (idx, expression) in expressions.iter().enumerate() {
        trace!("Expression #{idx}: {expression}");
    }
    let evaluator = Evaluator {
        function: None,
        num_inputs: variables.len(),
        num_outputs: expressions.len(),
    };
    if expressions.is_empty() {
        return Ok(evaluator);
    }

    let system = match EquationSystem::from_var_map(expressions.clone(), &variable_map) {
        Ok(system) => system,
        Err(source) => {
            // Narrow down the failure to one expression for diagnostics
            let expression = expressions
                .into_iter()
                .find(|expression| {
                    EquationSystem::from_var_map(vec![expression.clone()], &variable_map).is_err()
                })
                .unwrap_or_default();
            return Err(Error::Compile { expression, source });
        }
    };
    debug!(
        "Compiled {} expressions of {} variables",
        evaluator.num_outputs, evaluator.num_inputs
    );
    let function: CompiledFunction = system.combined_fun.clone();
    Ok(Evaluator {
        function: Some(function),
        ..evaluator
    })
}

/// Replace constant names with their values in an expression
///
/// Identifiers that are listed in `variables`, and identifiers used as
/// function names, are left untouched.
pub fn substitute_constants(
    expression: &str,
    constants: &BTreeMap<String, f64>,
    variables: &[String],
) -> String {
    let mut output = String::with_capacity(expression.len());
    for token in tokens(expression) {
        match token {
            Token::Number(literal) => output.push_str(literal),
            Token::Identifier { name, is_function } => {
                let is_variable = variables.iter().any(|v| v == name);
                match constants.get(name) {
                    Some(&value) if !is_function && !is_variable => {
                        output.push_str(&format_constant(value))
                    }
                    _ => output.push_str(name),
                }
            }
            Token::Other(c) => output.push(c),
        }
    }
    output
}

/// Truth that an expression refers to `symbol`, other than as a function
pub fn uses_symbol(expression: &str, symbol: &str) -> bool {
    tokens(expression).into_iter().any(|token| {
        matches!(token, Token::Identifier { name, is_function: false } if name == symbol)
    })
}

/// Lexical element of an expression
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Token<'expr> {
    /// Numeric literal, possibly with an exponent
    Number(&'expr str),

    /// Identifier, flagged when it is called as a function
    Identifier { name: &'expr str, is_function: bool },

    /// Operator, parenthesis, separator or whitespace
    Other(char),
}

/// Split an expression into numbers, identifiers and everything else
fn tokens(expression: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        let mut end = start + c.len_utf8();
        if c.is_ascii_digit() || c == '.' {
            let mut prev = c;
            while let Some(&(idx, c)) = chars.peek() {
                let exponent_sign = (c == '+' || c == '-') && (prev == 'e' || prev == 'E');
                if !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign) {
                    break;
                }
                chars.next();
                end = idx + c.len_utf8();
                prev = c;
            }
            tokens.push(Token::Number(&expression[start..end]));
        } else if c.is_alphabetic() || c == '_' {
            while let Some(&(idx, c)) = chars.peek() {
                if !(c.is_alphanumeric() || c == '_') {
                    break;
                }
                chars.next();
                end = idx + c.len_utf8();
            }
            tokens.push(Token::Identifier {
                name: &expression[start..end],
                is_function: expression[end..].trim_start().starts_with('('),
            });
        } else {
            tokens.push(Token::Other(c));
        }
    }
    tokens
}

/// Format a constant so that it parses back as a single operand
///
/// Non-negative values are written bare, so that they remain usable as
/// integer exponents.
fn format_constant(value: f64) -> String {
    if value < 0.0 {
        format!("({value})")
    } else {
        // Also turns -0.0 into 0
        format!("{}", value.abs())
    }
}

/// Things that can go wrong when compiling expressions
#[derive(Debug, Error)]
pub enum Error {
    /// The same variable name was given twice
    #[error("variable '{0}' was specified twice")]
    DuplicateVariable(String),

    /// A constant has a value that cannot be written in an expression
    #[error("constant '{name}' has non-finite value {value}")]
    NonFiniteConstant { name: String, value: f64 },

    /// An expression could not be parsed or compiled
    #[error("failed to compile expression '{expression}'")]
    Compile {
        expression: String,
        #[source]
        source: EquationError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    fn init_logger() {
        static INIT_LOGGER: Once = Once::new();
        INIT_LOGGER.call_once(|| env_logger::init());
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|&s| s.to_owned()).collect()
    }

    fn constants(items: &[(&str, f64)]) -> BTreeMap<String, f64> {
        items.iter().map(|&(k, v)| (k.to_owned(), v)).collect()
    }

    #[test]
    fn substitution() {
        let constants = constants(&[("k", 0.5), ("n", 2.0), ("m", -3.0), ("exp", 1.0)]);
        let variables = strings(&["x", "n2"]);
        assert_eq!(
            substitute_constants("k*x^n + m*kk - exp(k)", &constants, &variables),
            "0.5*x^2 + (-3)*kk - exp(0.5)"
        );
        // Number literals and longer identifiers are left alone
        assert_eq!(
            substitute_constants("1e-3*n2 + 2.5e+2 + k_1", &constants, &variables),
            "1e-3*n2 + 2.5e+2 + k_1"
        );
    }

    #[test]
    fn variables_shadow_constants() {
        let constants = constants(&[("x", 1.0)]);
        let variables = strings(&["x"]);
        assert_eq!(substitute_constants("2*x", &constants, &variables), "2*x");
    }

    #[test]
    fn negative_zero() {
        let constants = constants(&[("z", -0.0)]);
        assert_eq!(substitute_constants("x^z", &constants, &[]), "x^0");
    }

    #[test]
    fn symbol_usage() {
        let expression = "2*time + exp(x) - t1e3 + 1e-3";
        assert!(uses_symbol(expression, "time"));
        assert!(uses_symbol(expression, "t1e3"));
        assert!(uses_symbol(expression, "x"));
        // Function names and parts of other tokens do not count
        assert!(!uses_symbol(expression, "exp"));
        assert!(!uses_symbol(expression, "tim"));
        assert!(!uses_symbol(expression, "e"));
    }

    #[test]
    fn compile_and_evaluate() -> Result<(), Error> {
        init_logger();
        let evaluator = compile(
            &strings(&["k*x*y", "x - y", "3"]),
            &strings(&["x", "y"]),
            &constants(&[("k", 2.0)]),
        )?;
        assert_eq!(evaluator.num_inputs(), 2);
        assert_eq!(evaluator.num_outputs(), 3);
        let mut outputs = [0.0; 3];
        evaluator.eval(&mut outputs, &[3.0, 5.0]);
        assert_eq!(outputs, [30.0, -2.0, 3.0]);
        Ok(())
    }

    #[test]
    fn nothing_to_compile() -> Result<(), Error> {
        init_logger();
        let evaluator = compile(&[], &strings(&["x"]), &BTreeMap::new())?;
        evaluator.eval(&mut [], &[1.0]);
        Ok(())
    }

    #[test]
    fn unknown_symbol() {
        init_logger();
        let result = compile(
            &strings(&["x", "x*unknown"]),
            &strings(&["x"]),
            &BTreeMap::new(),
        );
        match result {
            Err(Error::Compile { expression, .. }) => assert_eq!(expression, "x*unknown"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn bad_inputs() {
        init_logger();
        assert!(matches!(
            compile(&strings(&["x"]), &strings(&["x", "x"]), &BTreeMap::new()),
            Err(Error::DuplicateVariable(_))
        ));
        assert!(matches!(
            compile(
                &strings(&["k"]),
                &[],
                &constants(&[("k", f64::NAN)])
            ),
            Err(Error::NonFiniteConstant { .. })
        ));
    }
}
