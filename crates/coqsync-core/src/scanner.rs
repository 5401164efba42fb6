//! Splitting Coq source into sentences.
//!
//! The scanner never builds a token stream. From a position it skips
//! whitespace and comments, then finds where the next unit ends: either a
//! bullet/brace token at that position or a statement ending in `.` followed
//! by whitespace or end of input. Comments nest; string literals are skipped
//! wholesale, so a `.` or `(*` inside one has no effect.

use std::sync::LazyLock;

use regex::Regex;

use crate::text::{Region, TextSource};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static COMMENT_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\*").unwrap());
static COMMENT_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""|\(\*|\*\)"#).unwrap());
static QUOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"""#).unwrap());
static BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+|\++|\*+|\{|\}").unwrap());
static STATEMENT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""|\(\*|\.(?:\s|\z)"#).unwrap());

/// Why the scanner cannot move past the current position.
///
/// Both are permanent until the text is edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    UnterminatedComment,
    UnterminatedString,
}

/// Result of one scanning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// First position after the skipped whitespace and comments
    pub skipped_to: usize,
    /// End of the unit starting at `skipped_to`, if a complete one exists
    pub unit_end: Option<usize>,
}

impl Advance {
    /// The unit found, if any.
    pub fn unit(&self) -> Option<Region> {
        self.unit_end.map(|end| Region::new(self.skipped_to, end))
    }
}

/// Skip whitespace and comments, then locate the next unit.
pub fn advance<S: TextSource + ?Sized>(src: &S, from: usize) -> Result<Advance, ScanStop> {
    let skipped_to = skip_blanks(src, from)?;
    let unit_end = unit_end(src, skipped_to)?;
    Ok(Advance {
        skipped_to,
        unit_end,
    })
}

/// Position after any run of whitespace and (nested) comments at `from`.
pub fn skip_blanks<S: TextSource + ?Sized>(src: &S, from: usize) -> Result<usize, ScanStop> {
    let mut pos = from;
    loop {
        if let Some(ws) = src.find(&WHITESPACE, pos).filter(|r| r.start == pos) {
            pos = ws.end;
        }
        match src.find(&COMMENT_OPEN, pos).filter(|r| r.start == pos) {
            Some(open) => pos = skip_comment(src, open.end)?,
            None => return Ok(pos),
        }
    }
}

/// End of the unit starting at `from`, or `None` if it is not complete yet.
///
/// `from` is expected to be past any leading blanks.
pub fn unit_end<S: TextSource + ?Sized>(src: &S, from: usize) -> Result<Option<usize>, ScanStop> {
    if let Some(bullet) = src.find(&BULLET, from).filter(|r| r.start == from) {
        return Ok(Some(bullet.end));
    }

    let mut pos = from;
    loop {
        let Some(token) = src.find(&STATEMENT_TOKEN, pos) else {
            return Ok(None);
        };
        match src.substr(token).as_str() {
            "\"" => pos = skip_string(src, token.end)?,
            "(*" => pos = skip_comment(src, token.end)?,
            // The terminator is the dot alone, not the whitespace after it.
            _ => return Ok(Some(token.start + 1)),
        }
    }
}

/// `from` is just inside an opening `(*`; returns the position after the
/// matching `*)`.
fn skip_comment<S: TextSource + ?Sized>(src: &S, from: usize) -> Result<usize, ScanStop> {
    let mut depth = 1usize;
    let mut pos = from;
    while depth > 0 {
        let token = src
            .find(&COMMENT_TOKEN, pos)
            .ok_or(ScanStop::UnterminatedComment)?;
        pos = token.end;
        match src.substr(token).as_str() {
            "\"" => pos = skip_string(src, pos)?,
            "(*" => depth += 1,
            _ => depth -= 1,
        }
    }
    Ok(pos)
}

/// `from` is just inside an opening quote. A doubled quote is read as a
/// closing quote immediately followed by a new literal, which skips the same
/// text.
fn skip_string<S: TextSource + ?Sized>(src: &S, from: usize) -> Result<usize, ScanStop> {
    src.find(&QUOTE, from)
        .map(|r| r.end)
        .ok_or(ScanStop::UnterminatedString)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every unit in `text`, as source strings, until the scanner stops.
    fn units(text: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut pos = 0;
        while let Ok(step) = advance(text, pos) {
            let Some(unit) = step.unit() else { break };
            out.push(&text[unit.start..unit.end]);
            pos = unit.end;
        }
        out
    }

    mod blanks {
        use super::*;

        #[test]
        fn whitespace_and_comments() {
            let text = "  (* a *)\n\t(* b *) Lemma";
            assert_eq!(skip_blanks(text, 0), Ok(text.len() - 5));
        }

        #[test]
        fn nested_comment_is_skipped_entirely() {
            let text = "(* (* *) *)";
            assert_eq!(skip_blanks(text, 0), Ok(text.len()));
            let step = advance(text, 0).unwrap();
            assert_eq!(step.skipped_to, text.len());
            assert_eq!(step.unit_end, None);
        }

        #[test]
        fn comment_closer_inside_string_does_not_close() {
            let text = r#"(* "*)" still comment *)x"#;
            assert_eq!(skip_blanks(text, 0), Ok(text.len() - 1));
        }

        #[test]
        fn unterminated_comment_stops() {
            assert_eq!(
                advance("(* (* *)", 0),
                Err(ScanStop::UnterminatedComment)
            );
        }

        #[test]
        fn nothing_to_skip() {
            assert_eq!(skip_blanks("Qed.", 0), Ok(0));
            assert_eq!(skip_blanks("", 0), Ok(0));
        }
    }

    mod statements {
        use super::*;

        #[test]
        fn dot_followed_by_whitespace_or_end() {
            assert_eq!(
                units("Definition a := 1.\nDefinition b := 2."),
                vec!["Definition a := 1.", "Definition b := 2."]
            );
        }

        #[test]
        fn qualified_names_do_not_terminate() {
            assert_eq!(units("Check Nat.add 1 2. "), vec!["Check Nat.add 1 2."]);
        }

        #[test]
        fn incomplete_statement_has_no_end() {
            let step = advance("  Lemma foo : True", 0).unwrap();
            assert_eq!(step.skipped_to, 2);
            assert_eq!(step.unit_end, None);
        }

        #[test]
        fn dots_inside_strings_and_comments_are_ignored() {
            let text = r#"Notation "x . y" := (pair x y) (* a. b. *) (at level 50)."#;
            assert_eq!(units(text), vec![text]);
        }

        #[test]
        fn doubled_quotes_stay_inside_the_literal() {
            let text = r#"Definition s := "a"". b". Next."#;
            assert_eq!(units(text), vec![r#"Definition s := "a"". b"."#, "Next."]);
        }

        #[test]
        fn unterminated_string_stops() {
            assert_eq!(
                advance(r#"Definition s := "abc. "#, 0),
                Err(ScanStop::UnterminatedString)
            );
        }

        #[test]
        fn comments_between_statements() {
            assert_eq!(
                units("Lemma t : True. (* why *) Proof. exact I. Qed."),
                vec!["Lemma t : True.", "Proof.", "exact I.", "Qed."]
            );
        }
    }

    mod bullets {
        use super::*;

        #[test]
        fn bullets_and_braces_are_units() {
            assert_eq!(
                units("split.\n- auto.\n+ { exact I. }\n** trivial."),
                vec!["split.", "-", "auto.", "+", "{", "exact I.", "}", "**", "trivial."]
            );
        }

        #[test]
        fn repeated_bullet_chars_are_one_unit() {
            assert_eq!(advance("--- auto.", 0).unwrap().unit_end, Some(3));
        }
    }

    #[test]
    fn works_on_any_text_source() {
        let owned = String::from("Qed.");
        assert_eq!(advance(&owned, 0).unwrap().unit(), Some(Region::new(0, 4)));
    }
}
