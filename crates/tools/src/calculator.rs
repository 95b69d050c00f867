//! Calculator tool: evaluates arithmetic expressions.
//!
//! Supports `+`, `-`, `*`, `/`, `%`, `^` (right associative), parentheses,
//! unary minus and decimal numbers. Malformed expressions ask the model to
//! retry; arithmetic failures such as division by zero are reported as
//! error results.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;
use typeclaw_core::error::ToolError;
use typeclaw_core::tool::{Tool, ToolResult};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports + - * / % ^, parentheses and decimal numbers."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '(2 + 3) * 4'"
                }
            },
            "required": ["expression"]
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": { "result": { "type": "number" } },
            "required": ["result"]
        }))
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let expression = arguments
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'expression' argument".into()))?;

        debug!(expression, "Evaluating expression");
        match evaluate(expression) {
            Ok(value) => Ok(ToolResult::structured(json!({ "result": value }))),
            Err(EvalError::Syntax(reason)) => Err(ToolError::retry(format!(
                "Could not parse '{expression}': {reason}. Use only numbers, + - * / % ^ and parentheses."
            ))),
            Err(EvalError::Math(reason)) => Ok(ToolResult::error(format!("Error: {reason}"))),
        }
    }
}

/// Why an expression could not be evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The expression is malformed
    Syntax(String),
    /// The expression is well formed but has no finite value
    Math(String),
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, EvalError> {
    let tokens = lex(expression)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let value = parser.expression(0)?;
    if let Some(token) = parser.tokens.get(parser.pos) {
        return Err(EvalError::Syntax(format!("unexpected {token:?} at token {}", parser.pos)));
    }
    if !value.is_finite() {
        return Err(EvalError::Math("result is not a finite number".into()));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Op(char),
    Open,
    Close,
}

fn lex(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if !(d.is_ascii_digit() || d == '.') {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                let literal = &input[start..end];
                let number = literal
                    .parse()
                    .map_err(|_| EvalError::Syntax(format!("invalid number '{literal}'")))?;
                tokens.push(Token::Number(number));
            }
            other => return Err(EvalError::Syntax(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

/// Binding power and associativity of a binary operator.
fn binding(op: char) -> Option<(u8, bool)> {
    match op {
        '+' | '-' => Some((1, false)),
        '*' | '/' | '%' => Some((2, false)),
        '^' => Some((4, true)),
        _ => None,
    }
}

/// Precedence-climbing parser that evaluates as it goes.
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).copied();
        self.pos += usize::from(token.is_some());
        token
    }

    fn expression(&mut self, min_power: u8) -> Result<f64, EvalError> {
        let mut lhs = self.operand()?;

        while let Some(Token::Op(op)) = self.tokens.get(self.pos).copied() {
            let Some((power, right_assoc)) = binding(op) else {
                break;
            };
            if power < min_power {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(if right_assoc { power } else { power + 1 })?;
            lhs = apply(op, lhs, rhs)?;
        }

        Ok(lhs)
    }

    fn operand(&mut self) -> Result<f64, EvalError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            // Unary minus binds tighter than * but looser than ^, so -2^2 = -4
            Some(Token::Op('-')) => Ok(-self.expression(3)?),
            Some(Token::Open) => {
                let value = self.expression(0)?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => Err(EvalError::Syntax("expected ')'".into())),
                }
            }
            Some(token) => Err(EvalError::Syntax(format!("unexpected {token:?}"))),
            None => Err(EvalError::Syntax("unexpected end of expression".into())),
        }
    }
}

fn apply(op: char, lhs: f64, rhs: f64) -> Result<f64, EvalError> {
    match op {
        '+' => Ok(lhs + rhs),
        '-' => Ok(lhs - rhs),
        '*' => Ok(lhs * rhs),
        '/' | '%' if rhs == 0.0 => Err(EvalError::Math("division by zero".into())),
        '/' => Ok(lhs / rhs),
        '%' => Ok(lhs % rhs),
        '^' => Ok(lhs.powf(rhs)),
        other => Err(EvalError::Syntax(format!("unknown operator '{other}'"))),
    }
}
