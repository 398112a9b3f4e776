//! The `cbt bank` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use cbt_core::bank::{BankLoad, QuestionBank};
use cbt_core::model::Level;

pub fn execute(path: Option<PathBuf>) -> Result<()> {
    let (label, loaded) = match &path {
        Some(path) => (path.display().to_string(), QuestionBank::load(path)?),
        None => (
            "built-in".to_string(),
            BankLoad {
                bank: QuestionBank::builtin(),
                rejected: Vec::new(),
            },
        ),
    };

    let summary = loaded.bank.summary();
    println!("Question bank: {label} ({} questions)", summary.total);

    let mut table = Table::new();
    table.set_header(vec!["Level", "Level questions", "Eligible (incl. General)"]);
    for level in Level::ALL {
        let own = summary.per_level.get(&level).copied().unwrap_or(0);
        table.add_row(vec![
            Cell::new(level),
            Cell::new(own),
            Cell::new(loaded.bank.eligible(level).len()),
        ]);
    }
    println!("{table}");
    println!("General questions: {}", summary.general);

    if loaded.rejected.is_empty() {
        println!("All records valid.");
    } else {
        for rejection in &loaded.rejected {
            println!("  [{}] REJECTED: {}", rejection.id, rejection.reason);
        }
        println!("\n{} record(s) rejected.", loaded.rejected.len());
    }

    Ok(())
}
