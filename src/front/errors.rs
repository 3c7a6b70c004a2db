//! Source-level diagnostics.
//!
//! Errors are collected during parsing and emitted sorted by line, one
//! `line letter` pair per line.  A mask stack lets tentative parses collect
//! errors speculatively and either keep or drop them.

use derive_more::Display;

/// The diagnostic kinds, keyed by their report letter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Debug)]
pub enum ErrorKind {
    #[display("a")]
    IllegalFormatChar,
    #[display("b")]
    Redefined,
    #[display("c")]
    Undeclared,
    #[display("d")]
    ArgCountMismatch,
    #[display("e")]
    ArgTypeMismatch,
    #[display("f")]
    ReturnValueInVoid,
    #[display("g")]
    MissingReturn,
    #[display("h")]
    AssignToConst,
    #[display("i")]
    MissingSemi,
    #[display("j")]
    MissingRPar,
    #[display("k")]
    MissingRBrk,
    #[display("l")]
    PrintfArgMismatch,
    #[display("m")]
    BreakOutsideLoop,
}

/// Collects lettered diagnostics during parsing.
#[derive(Debug)]
pub struct Reporter {
    /// Stack of masks; the bottom entry holds the committed errors.
    masks: Vec<Vec<(u32, ErrorKind)>>,
}

impl Default for Reporter {
    fn default() -> Self {
        Reporter {
            masks: vec![Vec::new()],
        }
    }
}

impl Reporter {
    pub fn push(&mut self, kind: ErrorKind, line: u32) {
        log::info!("got err {} at line {}", kind, line);
        self.masks.last_mut().unwrap().push((line, kind));
    }

    /// Start collecting errors for a tentative parse.
    pub fn mask_push(&mut self) {
        self.masks.push(Vec::new());
    }

    /// Keep the errors collected since the matching [Reporter::mask_push].
    pub fn mask_resolve(&mut self) {
        let top = self.masks.pop().unwrap();
        self.masks.last_mut().unwrap().extend(top);
    }

    /// Drop the errors collected since the matching [Reporter::mask_push].
    pub fn mask_reject(&mut self) {
        self.masks.pop().unwrap();
    }

    pub fn mask_depth(&self) -> usize {
        self.masks.len()
    }

    pub fn has_errors(&self) -> bool {
        debug_assert_eq!(self.masks.len(), 1);
        !self.masks[0].is_empty()
    }
}

impl std::fmt::Display for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut errs = self.masks[0].clone();
        errs.sort();
        for (line, kind) in errs {
            writeln!(f, "{} {}", line, kind)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_output_and_masks() {
        let mut r = Reporter::default();
        r.push(ErrorKind::MissingSemi, 7);
        r.mask_push();
        r.push(ErrorKind::Undeclared, 2);
        r.mask_reject();
        r.mask_push();
        r.push(ErrorKind::Redefined, 3);
        r.mask_resolve();
        assert!(r.has_errors());
        assert_eq!(r.to_string(), "3 b\n7 i\n");
    }
}
