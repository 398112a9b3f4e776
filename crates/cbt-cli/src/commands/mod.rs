pub mod bank;
pub mod exam;
pub mod history;
pub mod init;

use std::path::Path;

use anyhow::Result;

use cbt_core::bank::QuestionBank;

/// Load the bank at `path`, or the built-in bank.
pub(crate) fn load_bank(path: Option<&Path>) -> Result<QuestionBank> {
    let Some(path) = path else {
        return Ok(QuestionBank::builtin());
    };
    let loaded = QuestionBank::load(path)?;
    if loaded.bank.is_empty() {
        anyhow::bail!("question bank {} has no valid questions", path.display());
    }
    Ok(loaded.bank)
}

/// Display letter for a 0-based option index.
pub(crate) fn option_letter(index: usize) -> char {
    u8::try_from(index)
        .ok()
        .filter(|i| *i < 26)
        .map_or('?', |i| char::from(b'a' + i))
}

/// Parse an option letter typed by the user.
pub(crate) fn parse_option(input: &str) -> Option<usize> {
    let mut chars = input.chars();
    match (chars.next(), chars.next()) {
        (Some(c @ 'a'..='f'), None) => Some(c as usize - 'a' as usize),
        _ => None,
    }
}
