//! Tokenizer, parser and evaluator for the predicate subset the in-memory backend understands.

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    LParen,
    RParen,
    Comma,
    Op(Op),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    pub(crate) fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    /// The card's own number.
    Number,
    Property(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Literal(String),
    CardNumber(u64),
    /// `THIS CARD`, or `THIS CARD.property`.
    ThisCard(Option<String>),
    Today,
    CurrentUser,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Subquery {
    pub tree: Option<String>,
    pub predicate: Option<Box<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Set {
    Values(Vec<Value>),
    /// `SELECT NUMBER [FROM TREE t] [WHERE …]`
    Numbers(Subquery),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        lhs: Operand,
        op: Op,
        rhs: Value,
    },
    IsNull {
        lhs: Operand,
        negated: bool,
    },
    In {
        lhs: Operand,
        /// `prop NUMBER IN (…)`: compare the referenced card's number.
        by_number: bool,
        negated: bool,
        set: Set,
    },
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut out = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            c if c.is_whitespace() => {}
            '(' => out.push(Token::LParen),
            ')' => out.push(Token::RParen),
            ',' => out.push(Token::Comma),
            '\'' | '"' => {
                let mut text = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == ch {
                        closed = true;
                        break;
                    }
                    text.push(c);
                }
                if !closed {
                    return Err(format!("unterminated quote starting at offset {idx}"));
                }
                out.push(Token::Quoted(text));
            }
            '=' => out.push(Token::Op(Op::Eq)),
            '!' => {
                if chars.next_if(|(_, c)| *c == '=').is_none() {
                    return Err("`!` must be followed by `=`".to_string());
                }
                out.push(Token::Op(Op::Ne));
            }
            '<' => {
                if chars.next_if(|(_, c)| *c == '=').is_some() {
                    out.push(Token::Op(Op::Le));
                } else if chars.next_if(|(_, c)| *c == '>').is_some() {
                    out.push(Token::Op(Op::Ne));
                } else {
                    out.push(Token::Op(Op::Lt));
                }
            }
            '>' => {
                if chars.next_if(|(_, c)| *c == '=').is_some() {
                    out.push(Token::Op(Op::Ge));
                } else {
                    out.push(Token::Op(Op::Gt));
                }
            }
            _ => {
                let mut word = String::from(ch);
                while let Some((_, c)) =
                    chars.next_if(|(_, c)| !c.is_whitespace() && !"(),=<>!'\"".contains(*c))
                {
                    word.push(c);
                }
                out.push(Token::Word(word));
            }
        }
    }
    Ok(out)
}

const KEYWORDS: &[&str] = &["AND", "OR", "NOT", "IS", "IN", "NUMBER", "NULL", "WHERE", "FROM"];

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.keyword_at(self.pos, keyword)
    }

    fn keyword_at(&self, pos: usize, keyword: &str) -> bool {
        matches!(self.tokens.get(pos), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), String> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(format!("expected {keyword} {}", self.position()))
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected {token:?} {}", self.position()))
        }
    }

    fn position(&self) -> String {
        match self.peek() {
            Some(Token::Word(w)) | Some(Token::Quoted(w)) => format!("near `{w}`"),
            Some(other) => format!("near {other:?}"),
            None => "at end of condition".to_string(),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("OR") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_not()?;
        while self.eat_keyword("AND") {
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, String> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        if self.eat_keyword("NUMBER") {
            return Ok(Operand::Number);
        }
        match self.peek().cloned() {
            Some(Token::Quoted(name)) => {
                self.pos += 1;
                Ok(Operand::Property(name))
            }
            Some(Token::Word(first)) if !is_keyword(&first) => {
                self.pos += 1;
                let mut name = first;
                while let Some(Token::Word(next)) = self.peek() {
                    if is_keyword(next) {
                        break;
                    }
                    name.push(' ');
                    name.push_str(next);
                    self.pos += 1;
                }
                Ok(Operand::Property(name))
            }
            _ => Err(format!("expected a property {}", self.position())),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.parse_operand()?;

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Expr::IsNull { lhs, negated });
        }

        let negated = self.eat_keyword("NOT");
        let by_number = matches!(lhs, Operand::Property(_))
            && self.peek_keyword("NUMBER")
            && self.keyword_at(self.pos + 1, "IN");
        if by_number {
            self.pos += 1;
        }
        if self.eat_keyword("IN") {
            let set = self.parse_set()?;
            return Ok(Expr::In {
                lhs,
                by_number,
                negated,
                set,
            });
        }
        if negated {
            return Err(format!("expected IN {}", self.position()));
        }

        let Some(Token::Op(op)) = self.peek().cloned() else {
            return Err(format!("expected a comparison {}", self.position()));
        };
        self.pos += 1;
        let rhs = self.parse_value()?;
        Ok(Expr::Compare { lhs, op, rhs })
    }

    fn parse_value(&mut self) -> Result<Value, String> {
        match self.peek().cloned() {
            Some(Token::Quoted(text)) => {
                self.pos += 1;
                Ok(Value::Literal(text))
            }
            Some(Token::Word(word)) => {
                self.pos += 1;
                if word.eq_ignore_ascii_case("NUMBER") {
                    return match self.peek().cloned() {
                        Some(Token::Word(n)) | Some(Token::Quoted(n)) => {
                            self.pos += 1;
                            n.parse::<u64>()
                                .map(Value::CardNumber)
                                .map_err(|_| format!("`{n}` is not a card number"))
                        }
                        _ => Err(format!("expected a card number {}", self.position())),
                    };
                }
                if word.eq_ignore_ascii_case("TODAY") {
                    return Ok(Value::Today);
                }
                if word.eq_ignore_ascii_case("CURRENT") && self.eat_keyword("USER") {
                    return Ok(Value::CurrentUser);
                }
                if word.eq_ignore_ascii_case("THIS") {
                    return self.parse_this_card();
                }
                let mut text = word;
                while let Some(Token::Word(next)) = self.peek() {
                    if is_keyword(next) {
                        break;
                    }
                    text.push(' ');
                    text.push_str(next);
                    self.pos += 1;
                }
                Ok(Value::Literal(text))
            }
            _ => Err(format!("expected a value {}", self.position())),
        }
    }

    fn parse_this_card(&mut self) -> Result<Value, String> {
        let Some(Token::Word(word)) = self.peek().cloned() else {
            return Err(format!("expected CARD {}", self.position()));
        };
        let upper = word.to_ascii_uppercase();
        if !upper.starts_with("CARD") {
            return Err(format!("expected CARD {}", self.position()));
        }
        self.pos += 1;
        let rest = &word["CARD".len()..];
        if rest.is_empty() {
            return Ok(Value::ThisCard(None));
        }
        let Some(property) = rest.strip_prefix('.') else {
            return Err(format!("expected CARD near `{word}`"));
        };
        if !property.is_empty() {
            return Ok(Value::ThisCard(Some(property.to_string())));
        }
        match self.peek().cloned() {
            Some(Token::Quoted(property)) => {
                self.pos += 1;
                Ok(Value::ThisCard(Some(property)))
            }
            _ => Err(format!("expected a property after THIS CARD. {}", self.position())),
        }
    }

    fn parse_set(&mut self) -> Result<Set, String> {
        self.expect(Token::LParen)?;
        if self.eat_keyword("SELECT") {
            self.expect_keyword("NUMBER")?;
            let tree = if self.eat_keyword("FROM") {
                self.expect_keyword("TREE")?;
                match self.peek().cloned() {
                    Some(Token::Word(name)) | Some(Token::Quoted(name)) => {
                        self.pos += 1;
                        Some(name)
                    }
                    _ => return Err(format!("expected a tree name {}", self.position())),
                }
            } else {
                None
            };
            let predicate = if self.eat_keyword("WHERE") {
                Some(Box::new(self.parse_or()?))
            } else {
                None
            };
            self.expect(Token::RParen)?;
            return Ok(Set::Numbers(Subquery { tree, predicate }));
        }

        let mut values = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                values.push(self.parse_value()?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(Set::Values(values))
    }
}

/// Parses a WHERE clause.
pub(crate) fn parse_predicate(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!("unexpected input {}", parser.position()));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(s: &str) -> Value {
        Value::Literal(s.to_string())
    }

    fn property(s: &str) -> Operand {
        Operand::Property(s.to_string())
    }

    #[test]
    fn parses_precedence_and_groups() {
        let expr = parse_predicate("Type = Story AND (Status = Open OR Status != 'Done')").unwrap();
        let Expr::And(lhs, rhs) = expr else {
            panic!("expected AND at the top");
        };
        assert_eq!(
            *lhs,
            Expr::Compare {
                lhs: property("Type"),
                op: Op::Eq,
                rhs: literal("Story")
            }
        );
        assert!(matches!(*rhs, Expr::Or(..)));
    }

    #[test]
    fn parses_null_checks_and_lists() {
        assert_eq!(
            parse_predicate("'Entered Scope Iteration' IS NOT NULL").unwrap(),
            Expr::IsNull {
                lhs: property("Entered Scope Iteration"),
                negated: true
            }
        );
        assert_eq!(
            parse_predicate("Size IN ('1.00', 2)").unwrap(),
            Expr::In {
                lhs: property("Size"),
                by_number: false,
                negated: false,
                set: Set::Values(vec![literal("1.00"), literal("2")]),
            }
        );
        assert_eq!(
            parse_predicate("Iteration NUMBER IN (3, 7)").unwrap(),
            Expr::In {
                lhs: property("Iteration"),
                by_number: true,
                negated: false,
                set: Set::Values(vec![literal("3"), literal("7")]),
            }
        );
    }

    #[test]
    fn parses_number_subqueries() {
        let expr = parse_predicate(
            "(Size > 0) AND NOT NUMBER IN (SELECT NUMBER WHERE (Type = Story) AND Iteration = NUMBER 2)",
        )
        .unwrap();
        let Expr::And(_, rhs) = expr else {
            panic!("expected AND at the top");
        };
        let Expr::Not(inner) = *rhs else {
            panic!("expected NOT");
        };
        let Expr::In { lhs, set, .. } = *inner else {
            panic!("expected IN");
        };
        assert_eq!(lhs, Operand::Number);
        assert!(matches!(set, Set::Numbers(Subquery { tree: None, predicate: Some(_) })));
    }

    #[test]
    fn parses_contextual_values() {
        assert_eq!(
            parse_predicate("Owner = CURRENT USER").unwrap(),
            Expr::Compare {
                lhs: property("Owner"),
                op: Op::Eq,
                rhs: Value::CurrentUser
            }
        );
        assert_eq!(
            parse_predicate("Iteration = THIS CARD.Iteration").unwrap(),
            Expr::Compare {
                lhs: property("Iteration"),
                op: Op::Eq,
                rhs: Value::ThisCard(Some("Iteration".to_string()))
            }
        );
        assert_eq!(
            parse_predicate("Due <= TODAY").unwrap(),
            Expr::Compare {
                lhs: property("Due"),
                op: Op::Le,
                rhs: Value::Today
            }
        );
    }

    #[test]
    fn reports_malformed_conditions() {
        assert!(parse_predicate("Status =").is_err());
        assert!(parse_predicate("Status = 'open").is_err());
        assert!(parse_predicate("(Status = Open").is_err());
        assert!(parse_predicate("Status NOT = Open").is_err());
    }
}
