//! Minimal lexer/parser for `rule.expression`: columns, numeric/string
//! literals, and `+ - * / ( ) ==`. Nothing else is recognized. This is the
//! compiler's only path from free user text to SQL — the parsed AST is
//! re-rendered from scratch, so no input byte reaches the generated SQL
//! verbatim.

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    EqEq,
}

fn lex(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::EqEq);
                i += 2;
            }
            '\'' => {
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) =>
            {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Ast {
    Column(String),
    Number(String),
    Str(String),
    BinOp(Box<Ast>, &'static str, Box<Ast>),
    Eq(Box<Ast>, Box<Ast>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_equality(&mut self) -> Result<Ast, String> {
        let left = self.parse_additive()?;
        if self.peek() == Some(&Token::EqEq) {
            self.next();
            let right = self.parse_additive()?;
            Ok(Ast::Eq(Box::new(left), Box::new(right)))
        } else {
            Ok(left)
        }
    }

    fn parse_additive(&mut self) -> Result<Ast, String> {
        let mut left = self.parse_multiplicative()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    let right = self.parse_multiplicative()?;
                    left = Ast::BinOp(Box::new(left), "+", Box::new(right));
                }
                Some(Token::Minus) => {
                    self.next();
                    let right = self.parse_multiplicative()?;
                    left = Ast::BinOp(Box::new(left), "-", Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Ast, String> {
        let mut left = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    let right = self.parse_primary()?;
                    left = Ast::BinOp(Box::new(left), "*", Box::new(right));
                }
                Some(Token::Slash) => {
                    self.next();
                    let right = self.parse_primary()?;
                    left = Ast::BinOp(Box::new(left), "/", Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Ast, String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Ast::Column(name)),
            Some(Token::Number(n)) => Ok(Ast::Number(n)),
            Some(Token::Str(s)) => Ok(Ast::Str(s)),
            Some(Token::LParen) => {
                let inner = self.parse_additive()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected closing ')'".to_string()),
                }
            }
            other => Err(format!("unexpected token: {other:?}")),
        }
    }
}

fn parse(tokens: Vec<Token>) -> Result<Ast, String> {
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_equality()?;
    if parser.pos != parser.tokens.len() {
        return Err("trailing tokens after expression".to_string());
    }
    Ok(ast)
}

/// Re-render an [`Ast`] into SQL from scratch. Identifiers are upper-cased
/// (compiler rule i: always upper-case identifiers in case-folded
/// predicates); string literals are re-quoted with embedded `'` doubled.
fn render(ast: &Ast) -> String {
    match ast {
        Ast::Column(name) => name.to_ascii_uppercase(),
        Ast::Number(n) => n.clone(),
        Ast::Str(s) => format!("'{}'", s.replace('\'', "''")),
        Ast::BinOp(left, op, right) => format!("({} {} {})", render(left), op, render(right)),
        Ast::Eq(left, right) => format!("{} = {}", render(left), render(right)),
    }
}

/// Lex, parse, and re-render `input` as a safe SQL fragment. `input` must
/// not itself contain a top-level `==` (rule expressions are split on that
/// before either half reaches this function).
pub fn parse_and_render(input: &str) -> Result<String, String> {
    let tokens = lex(input)?;
    let ast = parse(tokens)?;
    if matches!(ast, Ast::Eq(..)) {
        return Err("nested '==' is not permitted in a rule operand".to_string());
    }
    Ok(render(&ast))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_arithmetic_with_uppercased_columns() {
        let rendered = parse_and_render("price * quantity").unwrap();
        assert_eq!(rendered, "(PRICE * QUANTITY)");
    }

    #[test]
    fn renders_single_column() {
        assert_eq!(parse_and_render("total_amount").unwrap(), "TOTAL_AMOUNT");
    }

    #[test]
    fn rejects_disallowed_tokens() {
        assert!(parse_and_render("price; DROP TABLE t").is_err());
    }

    #[test]
    fn rejects_nested_equality() {
        assert!(parse_and_render("a == b").is_err());
    }

    #[test]
    fn respects_parentheses_and_precedence() {
        let rendered = parse_and_render("(price + tax) * quantity").unwrap();
        assert_eq!(rendered, "((PRICE + TAX) * QUANTITY)");
    }
}
