//! The lexer.

use derive_more::Display;
use regex::Regex;

/// Tokens in the program
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display, Debug)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// The source line the token starts on, 1-based.
    pub line: u32,
}

impl<'src> Token<'src> {
    pub fn is_a(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display, Debug)]
pub enum TokenKind {
    #[display("id")]
    Ident,
    #[display("num")]
    Num,
    #[display("str")]
    Str,
    #[display("main")]
    Main,
    #[display("const")]
    Const,
    #[display("int")]
    Int,
    #[display("void")]
    Void,
    #[display("break")]
    Break,
    #[display("continue")]
    Continue,
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("while")]
    While,
    #[display("return")]
    Return,
    #[display("getint")]
    GetInt,
    #[display("printf")]
    Printf,
    #[display("&&")]
    And,
    #[display("||")]
    Or,
    #[display("<=")]
    Le,
    #[display(">=")]
    Ge,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
    #[display("!")]
    Not,
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Mod,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("=")]
    Assign,
    #[display(";")]
    Semi,
    #[display(",")]
    Comma,
    #[display("(")]
    LPar,
    #[display(")")]
    RPar,
    #[display("[")]
    LBrk,
    #[display("]")]
    RBrk,
    #[display("{{")]
    LBrc,
    #[display("}}")]
    RBrc,
}

use TokenKind::*;

fn keyword(text: &str) -> Option<TokenKind> {
    Some(match text {
        "main" => Main,
        "const" => Const,
        "int" => Int,
        "void" => Void,
        "break" => Break,
        "continue" => Continue,
        "if" => If,
        "else" => Else,
        "while" => While,
        "return" => Return,
        "getint" => GetInt,
        "printf" => Printf,
        _ => return None,
    })
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    line: u32,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        let table: &[(&str, TokenKind)] = &[
            (r"\A[0-9]+", Num),
            (r"\A[A-Za-z_][A-Za-z0-9_]*", Ident),
            (r#"\A"[^"]*""#, Str),
            (r"\A&&", And),
            (r"\A\|\|", Or),
            (r"\A<=", Le),
            (r"\A>=", Ge),
            (r"\A==", Eq),
            (r"\A!=", Ne),
            (r"\A!", Not),
            (r"\A\+", Add),
            (r"\A-", Sub),
            (r"\A\*", Mul),
            (r"\A/", Div),
            (r"\A%", Mod),
            (r"\A<", Lt),
            (r"\A>", Gt),
            (r"\A=", Assign),
            (r"\A;", Semi),
            (r"\A,", Comma),
            (r"\A\(", LPar),
            (r"\A\)", RPar),
            (r"\A\[", LBrk),
            (r"\A\]", RBrk),
            (r"\A\{", LBrc),
            (r"\A\}", RBrc),
        ];
        Lexer {
            input,
            pos: 0,
            line: 1,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\x0b]|//[^\n]*|(?s:/\*.*?\*/))*").unwrap(),
            matchers: table
                .iter()
                .map(|&(re, kind)| (Regex::new(re).unwrap(), kind))
                .collect(),
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    fn advance(&mut self, len: usize) {
        let skipped = &self.input[self.pos..self.pos + len];
        self.line += skipped.bytes().filter(|&b| b == b'\n').count() as u32;
        self.pos += len;
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.advance(m.end());
        }
    }

    /// Get the next token if possible.
    ///
    /// Unknown characters abort the compilation: correct tokenization is a
    /// precondition of everything downstream.
    pub fn next(&mut self) -> Option<Token<'input>> {
        self.skip_whitespace();
        if self.end_of_input() {
            return None;
        }
        let rest = &self.input[self.pos..];
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                let line = self.line;
                let kind = match kind {
                    Ident => keyword(m.as_str()).unwrap_or(Ident),
                    k => *k,
                };
                self.advance(m.end());
                return Some(Token {
                    kind,
                    text: &rest[..m.end()],
                    line,
                });
            }
        }
        panic!(
            "unexpected character {:?} at line {}",
            rest.chars().next().unwrap(),
            self.line
        );
    }
}

/// Tokenize the whole input.
pub fn lex(input: &str) -> Vec<Token<'_>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        tokens.push(token);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_and_lines() {
        let toks = lex("int main() { // c\n  return 0;\n}");
        let kinds: Vec<_> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![Int, Main, LPar, RPar, LBrc, Return, Num, Semi, RBrc]
        );
        assert_eq!(toks[5].line, 2);
        assert_eq!(toks[8].line, 3);
    }

    #[test]
    fn operators_and_strings() {
        let toks = lex(r#"a <= b && c != 0; printf("%d\n", x);"#);
        let kinds: Vec<_> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                Ident, Le, Ident, And, Ident, Ne, Num, Semi, Printf, LPar, Str, Comma, Ident,
                RPar, Semi
            ]
        );
        assert_eq!(toks[10].text, r#""%d\n""#);
    }

    #[test]
    fn block_comments() {
        let toks = lex("a /* x\n * y */ b");
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[1].line, 2);
    }
}
