use std::{cmp::Ordering, fmt, str::FromStr};

use crate::{vector::Feature, ExtractError, Result};

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Comparison {
    field: String,
    op: CompareOp,
    literal: Literal,
}

impl Comparison {
    fn matches(&self, feature: &Feature) -> bool {
        let Some(value) = feature.field(&self.field) else {
            return false;
        };
        let ordering = match &self.literal {
            Literal::Number(n) => match value.as_f64() {
                Some(v) => v.partial_cmp(n),
                None => Some(value.as_string().as_str().cmp(n.to_string().as_str())),
            },
            Literal::Text(s) => Some(value.as_string().as_str().cmp(s.as_str())),
        };
        ordering.map_or(false, |ordering| self.op.accepts(ordering))
    }
}

/// 图层的属性过滤条件
///
/// 支持由 `AND` 连接的 `字段 运算符 字面量` 比较，例如
/// `class = 'forest' AND area >= 10`。
/// 字面量可以是单引号字符串（`''` 表示一个单引号）或数字；
/// 数字字面量与能转换为数字的字段值按数值比较，否则按字符串比较。
/// 要素上缺少比较所用的字段时视为不满足条件。
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFilter {
    clauses: Vec<Comparison>,
}

impl AttributeFilter {
    /// 解析过滤表达式
    pub fn parse(expression: &str) -> Result<Self> {
        let tokens = tokenize(expression)?;
        let mut clauses = vec![];
        let mut iter = tokens.into_iter().peekable();
        loop {
            let field = match iter.next() {
                Some(Token::Ident(field)) => field,
                other => return Err(syntax(expression, "字段名", other)),
            };
            let op = match iter.next() {
                Some(Token::Op(op)) => op,
                other => return Err(syntax(expression, "比较运算符", other)),
            };
            let literal = match iter.next() {
                Some(Token::Number(n)) => Literal::Number(n),
                Some(Token::Text(s)) => Literal::Text(s),
                other => return Err(syntax(expression, "字面量", other)),
            };
            clauses.push(Comparison { field, op, literal });
            match iter.next() {
                None => break,
                Some(Token::Ident(kw)) if kw.eq_ignore_ascii_case("and") => continue,
                other => return Err(syntax(expression, "AND", other)),
            }
        }
        Ok(AttributeFilter { clauses })
    }

    /// 要素是否满足所有比较条件
    pub fn matches(&self, feature: &Feature) -> bool {
        self.clauses.iter().all(|clause| clause.matches(feature))
    }
}

impl FromStr for AttributeFilter {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        AttributeFilter::parse(s)
    }
}

impl fmt::Display for AttributeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            write!(f, "{} {} ", clause.field, clause.op.symbol())?;
            match &clause.literal {
                Literal::Number(n) => write!(f, "{}", n)?,
                Literal::Text(s) => write!(f, "'{}'", s.replace('\'', "''"))?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Op(CompareOp),
    Number(f64),
    Text(String),
}

fn syntax(expression: &str, expected: &str, found: Option<Token>) -> ExtractError {
    ExtractError::FilterSyntax(format!(
        "`{}`: 期望{}，实际为 {:?}",
        expression, expected, found
    ))
}

fn tokenize(expression: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = vec![];
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() || c == '-' || c == '.' {
            let start = i;
            i += 1;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || ((chars[i] == '-' || chars[i] == '+')
                        && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
            {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let number = text.parse().map_err(|_| {
                ExtractError::FilterSyntax(format!("`{}`: 无效的数字 `{}`", expression, text))
            })?;
            tokens.push(Token::Number(number));
        } else if c == '\'' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(ExtractError::FilterSyntax(format!(
                            "`{}`: 字符串没有结束",
                            expression
                        )))
                    }
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        text.push('\'');
                        i += 2;
                    }
                    Some('\'') => {
                        i += 1;
                        break;
                    }
                    Some(&other) => {
                        text.push(other);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Text(text));
        } else {
            let next = chars.get(i + 1).copied();
            let (op, width) = match (c, next) {
                ('=', _) => (CompareOp::Eq, 1),
                ('!', Some('=')) => (CompareOp::Ne, 2),
                ('<', Some('>')) => (CompareOp::Ne, 2),
                ('<', Some('=')) => (CompareOp::Le, 2),
                ('<', _) => (CompareOp::Lt, 1),
                ('>', Some('=')) => (CompareOp::Ge, 2),
                ('>', _) => (CompareOp::Gt, 1),
                _ => {
                    return Err(ExtractError::FilterSyntax(format!(
                        "`{}`: 无法识别的字符 `{}`",
                        expression, c
                    )))
                }
            };
            tokens.push(Token::Op(op));
            i += width;
        }
    }
    Ok(tokens)
}
